mod admin_cmds;
mod record_cmds;
mod watch;

use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taxtrack_config::{AppConfig, DEFAULT_CONFIG_PATH};
use taxtrack_core::{TaxStatus, TrackerError};
use taxtrack_engine::Tracker;
use taxtrack_remote::{RemoteSync, SheetsClient};
use taxtrack_store::{FileStore, KeyValueStore, SeedProvider, StaticSeedProvider};

/// How long pending remote pushes may delay process exit.
const PUSH_FLUSH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Parser)]
#[command(
    name = "taxtrack",
    version,
    about = "Personnel tax-filing status tracker with spreadsheet sync"
)]
struct Cli {
    /// Configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a session as a person or as the administrator.
    Login {
        #[arg(long, conflicts_with = "admin", required_unless_present = "admin")]
        person: Option<String>,
        #[arg(long, requires = "pin")]
        admin: bool,
        #[arg(long)]
        pin: Option<String>,
    },
    Logout,
    /// Show the current session.
    Whoami,
    /// List known personnel, optionally filtered by name or rank.
    Personnel {
        #[arg(long)]
        search: Option<String>,
    },
    /// List pages with their filing progress.
    Pages,
    /// Show every record on a page.
    Show { page: String },
    /// Set one person's status.
    Set {
        page: String,
        id: String,
        #[arg(value_enum)]
        status: CliStatus,
    },
    /// Set the status of several people at once (administrator only).
    Batch {
        page: String,
        #[arg(value_enum)]
        status: CliStatus,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Mark everyone on a page as filed (administrator only).
    MarkAll {
        page: String,
        #[arg(long)]
        yes: bool,
    },
    /// Clear every status on a page (administrator only).
    ResetPage {
        page: String,
        #[arg(long)]
        yes: bool,
    },
    /// Wipe all pages and audit history, then reseed (administrator only).
    FactoryReset {
        #[arg(long)]
        yes: bool,
    },
    /// Pull from the remote service now.
    Sync,
    /// Write every persisted page as JSON to a file or stdout.
    Export {
        #[arg(long, value_name = "PATH")]
        output: Option<String>,
    },
    /// Keep polling the remote and following local store changes until Ctrl-C.
    Watch,
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Debug, Subcommand)]
enum AuditCommands {
    /// Most recent entries, newest first.
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Every entry about one person, plus their latest verification.
    Person { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliStatus {
    Filed,
    NotFiled,
    Unset,
}

impl From<CliStatus> for TaxStatus {
    fn from(status: CliStatus) -> Self {
        match status {
            CliStatus::Filed => TaxStatus::Filed,
            CliStatus::NotFiled => TaxStatus::NotFiled,
            CliStatus::Unset => TaxStatus::Unset,
        }
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.telemetry.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_tracker(config: &AppConfig) -> Result<Tracker> {
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&config.store.data_dir));

    let seed_path = Path::new(&config.store.seed_path);
    let seed = if seed_path.exists() {
        StaticSeedProvider::from_json_file(seed_path)
            .with_context(|| format!("failed to load seed data from {}", seed_path.display()))?
    } else {
        warn!(path = %seed_path.display(), "seed file not found; starting with no pages");
        StaticSeedProvider::default()
    };
    let seed: Arc<dyn SeedProvider> = Arc::new(seed);

    let remote: Option<Arc<dyn RemoteSync>> = if config.remote.is_configured() {
        let client = SheetsClient::new(
            config.remote.base_url.trim(),
            Duration::from_secs(config.remote.timeout_secs.max(1)),
        )?;
        Some(Arc::new(client))
    } else {
        info!("no remote service configured; running local-only");
        None
    };

    Ok(Tracker::new(config, kv, seed, remote))
}

/// Marks a command the tracker refused; the message has already been printed.
#[derive(Debug, thiserror::Error)]
#[error("request rejected")]
pub(crate) struct Rejected;

/// Exit status for rejected requests, distinct from failures (1).
const REJECTED_EXIT: u8 = 2;

/// Print operator-actionable rejections plainly and flag them as
/// [`Rejected`]; anything else is a failure.
pub(crate) fn report(result: Result<(), TrackerError>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_rejection() => {
            eprintln!("rejected: {err}");
            Err(Rejected.into())
        }
        Err(err) => Err(err.into()),
    }
}

fn exit_code(outcome: Result<()>) -> Result<ExitCode> {
    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) if err.is::<Rejected>() => Ok(ExitCode::from(REJECTED_EXIT)),
        Err(err) => Err(err),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("invalid configuration in {}", cli.config))?;
    init_tracing(&config);

    let tracker = Arc::new(build_tracker(&config)?);
    if tracker.sync().is_enabled() && !tracker.connect().await {
        eprintln!("remote service unreachable; changes are kept locally");
    }

    let outcome = run(&cli.command, &tracker, &config).await;
    tracker.flush_pushes(PUSH_FLUSH_TIMEOUT).await;
    exit_code(outcome)
}

async fn run(command: &Commands, tracker: &Arc<Tracker>, config: &AppConfig) -> Result<()> {
    match command {
        Commands::Login { person, admin, pin } => {
            let result = if *admin {
                tracker.auth().login_admin(pin.as_deref().unwrap_or_default())
            } else {
                tracker.auth().login_person(person.as_deref().unwrap_or_default())
            };
            report(result.map(|session| {
                println!(
                    "logged in as {}{}",
                    session.user.full_name(),
                    if session.is_admin { " (administrator)" } else { "" }
                );
            }))?;
        }
        Commands::Logout => {
            report(tracker.auth().logout().map(|ended| match ended {
                Some(session) => println!("logged out {}", session.user.full_name()),
                None => println!("no active session"),
            }))?;
        }
        Commands::Whoami => record_cmds::run_whoami(tracker, config),
        Commands::Personnel { search } => {
            record_cmds::run_personnel(tracker.directory(), search.as_deref())
        }
        Commands::Pages => record_cmds::run_pages(tracker).await,
        Commands::Show { page } => report(record_cmds::run_show(tracker, page).await)?,
        Commands::Set { page, id, status } => {
            report(record_cmds::run_set(tracker, page, id, (*status).into()).await)?
        }
        Commands::Batch { page, status, ids } => {
            report(record_cmds::run_batch(tracker, page, ids, (*status).into()).await)?
        }
        Commands::MarkAll { page, yes } => {
            admin_cmds::run_mark_all(tracker, page, *yes).await?;
        }
        Commands::ResetPage { page, yes } => {
            admin_cmds::run_reset_page(tracker, page, *yes).await?;
        }
        Commands::FactoryReset { yes } => {
            admin_cmds::run_factory_reset(tracker, *yes).await?;
        }
        Commands::Sync => match tracker.sync_now().await {
            Ok(true) => println!("remote changes merged"),
            Ok(false) => println!("already up to date"),
            Err(TrackerError::RemoteUnavailable(reason)) => {
                eprintln!("sync unavailable: {reason}");
            }
            Err(err) => return Err(err.into()),
        },
        Commands::Export { output } => {
            let pages = tracker.export_pages().await?;
            let rendered = serde_json::to_string_pretty(&pages)?;
            match output {
                Some(path) => {
                    fs::write(path, rendered)
                        .with_context(|| format!("failed to write export to {path}"))?;
                    println!("exported {} pages to {path}", pages.len());
                }
                None => println!("{rendered}"),
            }
        }
        Commands::Watch => watch::run_watch(Arc::clone(tracker), config).await?,
        Commands::Audit { command } => match command {
            AuditCommands::Recent { limit } => {
                record_cmds::run_audit_recent(tracker.audit(), (*limit).max(1))
            }
            AuditCommands::Person { id } => record_cmds::run_audit_person(tracker.audit(), id),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_requires_person_or_admin_with_pin() {
        assert!(Cli::try_parse_from(["taxtrack", "login"]).is_err());
        assert!(Cli::try_parse_from(["taxtrack", "login", "--admin"]).is_err());
        assert!(
            Cli::try_parse_from(["taxtrack", "login", "--person", "p1", "--admin", "--pin", "1"])
                .is_err()
        );

        let cli = Cli::try_parse_from(["taxtrack", "login", "--admin", "--pin", "1919"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Login { admin: true, pin: Some(ref pin), .. } if pin == "1919"
        ));
    }

    #[test]
    fn status_values_use_kebab_case() {
        let cli = Cli::try_parse_from(["taxtrack", "set", "page1", "p1", "not-filed"]).unwrap();
        match cli.command {
            Commands::Set { status, .. } => {
                assert_eq!(TaxStatus::from(status), TaxStatus::NotFiled)
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["taxtrack", "set", "page1", "p1", "done"]).is_err());
    }

    #[test]
    fn batch_needs_at_least_one_id() {
        assert!(Cli::try_parse_from(["taxtrack", "batch", "page1", "filed"]).is_err());
        let cli =
            Cli::try_parse_from(["taxtrack", "batch", "page1", "filed", "a", "b"]).unwrap();
        assert!(matches!(cli.command, Commands::Batch { ref ids, .. } if ids.len() == 2));
    }

    #[test]
    fn rejections_exit_with_their_own_status() {
        let rejected = report(Err(TrackerError::SessionExpired)).unwrap_err();
        assert!(rejected.is::<Rejected>());
        assert!(report(Err(TrackerError::unauthorized("nope"))).is_err());
        assert_eq!(
            exit_code(report(Err(TrackerError::not_found("ghost")))).unwrap(),
            ExitCode::from(REJECTED_EXIT)
        );

        let failure = report(Err(TrackerError::StorageFailure("disk".into())));
        assert!(!failure.as_ref().unwrap_err().is::<Rejected>());
        assert!(exit_code(failure).is_err());
        assert_eq!(exit_code(report(Ok(()))).unwrap(), ExitCode::SUCCESS);
    }

    #[test]
    fn export_takes_an_optional_output_path() {
        let cli = Cli::try_parse_from(["taxtrack", "export", "--output", "pages.json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Export { output: Some(ref path) } if path == "pages.json"
        ));
        let cli = Cli::try_parse_from(["taxtrack", "export"]).unwrap();
        assert!(matches!(cli.command, Commands::Export { output: None }));
    }
}
