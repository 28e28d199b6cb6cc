use chrono::{DateTime, Local, Utc};

use taxtrack_audit::{AuditEntry, AuditLog};
use taxtrack_config::AppConfig;
use taxtrack_core::{PageStats, PersonRecord, TaxStatus, TrackerError};
use taxtrack_engine::{PersonnelDirectory, Tracker};

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn stats_line(stats: &PageStats) -> String {
    format!(
        "{}/{} filed ({}%), {} not filed, {} pending",
        stats.filed, stats.total, stats.percentage, stats.not_filed, stats.pending
    )
}

fn status_cell(status: TaxStatus) -> &'static str {
    match status {
        TaxStatus::Filed => "filed",
        TaxStatus::NotFiled => "not filed",
        TaxStatus::Unset => "-",
    }
}

fn verification_cell(record: &PersonRecord) -> String {
    let Some(verification) = &record.verification else {
        return String::new();
    };
    let kind = if verification.is_self_verified {
        "self"
    } else if verification.is_admin_verified {
        "admin"
    } else {
        "other"
    };
    format!(
        "{kind}: {} @ {}",
        verification.verified_by.name,
        local_time(verification.verified_at)
    )
}

pub(crate) fn run_whoami(tracker: &Tracker, config: &AppConfig) {
    match tracker.current_session() {
        Some(session) => {
            println!("user     : {} ({})", session.user.full_name(), session.user.id);
            println!("role     : {}", if session.is_admin { "administrator" } else { "personnel" });
            println!("since    : {}", local_time(session.login_time));
            println!("expires  : after {}h", config.session.max_age_hours);
        }
        None => println!("not logged in"),
    }
    let remote = if !tracker.sync().is_enabled() {
        "local-only"
    } else if tracker.sync().is_connected() {
        "connected"
    } else {
        "offline"
    };
    println!("remote   : {remote}");
}

pub(crate) fn run_personnel(directory: &PersonnelDirectory, search: Option<&str>) {
    let matches: Vec<_> = match search {
        Some(term) => directory.search(term),
        None => directory.all().iter().collect(),
    };
    for person in &matches {
        println!(
            "  {:<14} {:<10} {:<28} {}",
            person.id,
            person.rank,
            person.full_name(),
            person.page_key.as_deref().unwrap_or("")
        );
    }
    println!("  ({} of {} people)", matches.len(), directory.len());
}

pub(crate) async fn run_pages(tracker: &Tracker) {
    println!("── pages ─────────────────────────────────────────────");
    for key in tracker.page_keys().await {
        let title = tracker
            .page(&key)
            .await
            .map(|page| page.title)
            .unwrap_or_default();
        let stats = tracker.stats(&key).await;
        println!("  {key:<10} {title:<32} {}", stats_line(&stats));
    }
    println!("  overall: {}", stats_line(&tracker.overall_stats().await));
}

pub(crate) async fn run_show(tracker: &Tracker, page_key: &str) -> Result<(), TrackerError> {
    let page = tracker.page(page_key).await?;
    let session = tracker.current_session();

    println!("── {} ── {}", page.title, page.subtitle);
    for record in &page.personnel {
        let owned = session.as_ref().is_some_and(|s| s.is_subject(&record.id));
        println!(
            "{} {:<14} {:<10} {:<28} {:<10} {}",
            if owned { "*" } else { " " },
            record.id,
            record.rank,
            record.full_name(),
            status_cell(record.tax_status),
            verification_cell(record)
        );
    }
    println!("  {}", stats_line(&page.stats()));
    if let Some(at) = tracker.last_updated(page_key).await {
        println!("  last updated {}", local_time(at));
    }
    Ok(())
}

pub(crate) async fn run_set(
    tracker: &Tracker,
    page_key: &str,
    person_id: &str,
    status: TaxStatus,
) -> Result<(), TrackerError> {
    let record = tracker.update_status(page_key, person_id, status).await?;
    println!(
        "{} is now {} ({})",
        record.full_name(),
        status_cell(record.tax_status),
        verification_cell(&record)
    );
    Ok(())
}

pub(crate) async fn run_batch(
    tracker: &Tracker,
    page_key: &str,
    ids: &[String],
    status: TaxStatus,
) -> Result<(), TrackerError> {
    let updated = tracker.batch_update(page_key, ids, status).await?;
    println!("updated {} of {} records", updated.len(), ids.len());
    for id in ids.iter().filter(|id| !updated.iter().any(|r| &r.id == *id)) {
        println!("  skipped unknown id {id}");
    }
    Ok(())
}

fn print_entry(entry: &AuditEntry) {
    let actor = entry
        .performed_by
        .as_ref()
        .map(|v| v.name.as_str())
        .unwrap_or("-");
    let details = if entry.details.is_empty() {
        String::new()
    } else {
        serde_json::Value::Object(entry.details.clone()).to_string()
    };
    println!(
        "  {}  {:<14} {:<14} by {:<24} {}",
        local_time(entry.timestamp),
        entry.action.as_str(),
        entry.person_id,
        actor,
        details
    );
}

pub(crate) fn run_audit_recent(audit: &AuditLog, limit: usize) {
    let entries = audit.recent(limit);
    if entries.is_empty() {
        println!("audit log is empty");
        return;
    }
    entries.iter().for_each(print_entry);
}

pub(crate) fn run_audit_person(audit: &AuditLog, person_id: &str) {
    let entries = audit.for_person(person_id);
    if entries.is_empty() {
        println!("no audit entries for {person_id}");
        return;
    }
    entries.iter().for_each(print_entry);
    if let Some(info) = audit.verification_info(person_id) {
        let by = info
            .verified_by
            .as_ref()
            .map(|v| v.name.as_str())
            .unwrap_or("-");
        println!(
            "latest: {} by {by} at {}{}",
            status_cell(info.status),
            local_time(info.verified_at),
            if info.is_self_verified { " (self-verified)" } else { "" }
        );
    }
}
