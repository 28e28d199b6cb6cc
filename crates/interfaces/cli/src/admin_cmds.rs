use std::io;
use std::io::IsTerminal;
use std::io::Write;

use anyhow::{Result, bail};

use taxtrack_core::TrackerError;
use taxtrack_engine::Tracker;

/// Ask the operator to type `expected` exactly.  Refuses outright when stdin
/// is not a terminal.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    if !io::stdin().is_terminal() {
        bail!("refusing destructive operation in non-interactive mode without --yes");
    }
    print!("{prompt} Type '{expected}' to continue: ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(answer.trim() == expected)
}

fn rejected(err: TrackerError) -> Result<()> {
    crate::report(Err(err))
}

pub(crate) async fn run_mark_all(tracker: &Tracker, page_key: &str, yes: bool) -> Result<()> {
    let stats = match tracker.page(page_key).await {
        Ok(page) => page.stats(),
        Err(err) => return rejected(err),
    };
    println!("page {page_key}: {} records, {} already filed", stats.total, stats.filed);

    if !yes && !confirm("Every record on this page will be marked as filed.", "MARK ALL")? {
        println!("mark-all cancelled");
        return Ok(());
    }

    match tracker.mark_all_filed(page_key).await {
        Ok(updated) => {
            println!("marked {} records as filed", updated.len());
            Ok(())
        }
        Err(err) => rejected(err),
    }
}

pub(crate) async fn run_reset_page(tracker: &Tracker, page_key: &str, yes: bool) -> Result<()> {
    if let Err(err) = tracker.page(page_key).await {
        return rejected(err);
    }

    if !yes
        && !confirm(
            "Every status and verification on this page will be cleared.",
            "RESET PAGE",
        )?
    {
        println!("page reset cancelled");
        return Ok(());
    }

    match tracker.reset_page(page_key).await {
        Ok(count) => {
            println!("cleared {count} records on {page_key}");
            Ok(())
        }
        Err(err) => rejected(err),
    }
}

pub(crate) async fn run_factory_reset(tracker: &Tracker, yes: bool) -> Result<()> {
    if !yes {
        if !confirm(
            "Factory reset deletes every page and the whole audit history.",
            "FACTORY RESET",
        )? {
            println!("factory reset cancelled");
            return Ok(());
        }
        if !confirm("This cannot be undone. Confirm once more.", "YES DELETE ALL")? {
            println!("factory reset cancelled");
            return Ok(());
        }
    }

    match tracker.factory_reset().await {
        Ok(()) => {
            println!("factory reset complete");
            println!("- pages reseeded: {}", tracker.page_keys().await.len());
            println!("- audit history cleared");
            Ok(())
        }
        Err(err) => rejected(err),
    }
}
