use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ratingrelay::config::{AppConfig, RelaySettings};
use ratingrelay::destination::{self, Destination, Service};
use ratingrelay::ledger::{LedgerStore, PassSummary, SqliteLedger};
use ratingrelay::relay::{Plan, Relay, RunReport, Snapshot, Step};
use ratingrelay::source::{Plex, Source};

#[derive(Parser)]
#[command(name = "ratingrelay", version, about = "Relay Plex track ratings to Last.fm and ListenBrainz")]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the SQLite ledger database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync loves and hates from Plex ratings to every enabled destination
    Relay {
        /// Show what would change without calling any destination
        #[arg(long)]
        dry_run: bool,
    },

    /// Withdraw every love/hate this tool has placed, then clear the ledger
    Reset {
        /// Required to actually retract
        #[arg(long)]
        yes: bool,
    },

    /// Show ledger size and the last pass per destination
    Status,

    /// List ledger entries
    Ledger {
        /// Only show entries for this destination (lastfm, listenbrainz)
        #[arg(long)]
        destination: Option<String>,
    },

    /// Validate the config file without touching the network
    CheckConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    // Resolve database path: CLI > config > XDG default
    let db_path = || {
        cli.db_path
            .clone()
            .or(config.db_path.clone())
            .unwrap_or_else(ratingrelay::config::default_db_path)
    };

    match cli.command {
        Commands::Relay { dry_run } => {
            let (session, mut ledger) = start_session(&config, db_path)?;
            let Session {
                settings,
                agent,
                mut destinations,
            } = session;
            let (url, token) = config.plex.connection()?;

            let mut plex = Plex::new(agent, url, token);
            let records = plex
                .list_rated_tracks(&settings.library)
                .context("Failed to read ratings from Plex")?;
            let snapshot = Snapshot::build(records);
            let (loved, hated) = snapshot.tally(&settings.thresholds);
            println!(
                "Plex: {} rated tracks ({} loved, {} hated, {} skipped)",
                snapshot.len(),
                loved,
                hated,
                snapshot.skipped()
            );

            if dry_run {
                println!("DRY RUN - no destination will be contacted");
                let plans = Relay::new(&mut ledger, &settings)
                    .preview(&snapshot, &destinations)
                    .context("Failed to read ledger")?;
                for (service, plan) in &plans {
                    print_plan(*service, plan);
                }
                println!("(dry run - re-run without --dry-run to apply)");
                return Ok(());
            }

            let report = Relay::new(&mut ledger, &settings)
                .with_progress(std::io::stderr().is_terminal())
                .run(&snapshot, &mut destinations);
            print_report(&report);
            finish(&report)?;
        }

        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!(
                    "Reset removes every love/hate this tool placed on each destination. Re-run with --yes to proceed."
                );
            }
            let (session, mut ledger) = start_session(&config, db_path)?;
            let Session {
                settings,
                mut destinations,
                ..
            } = session;

            let report = Relay::new(&mut ledger, &settings)
                .with_progress(std::io::stderr().is_terminal())
                .retract_all(&mut destinations);
            print_report(&report);
            finish(&report)?;
        }

        Commands::Status => {
            let ledger = open_ledger(&db_path())?;
            let stats = ledger.stats().context("Failed to get stats")?;
            println!("Ledger Statistics");
            println!("=================");
            println!("Total entries:    {}", stats.total_entries);
            println!("Recorded passes:  {}", stats.total_passes);
            println!();

            if !stats.by_destination.is_empty() {
                println!("Entries:");
                for (dest, mark, count) in &stats.by_destination {
                    println!("  {:<14} {:<6} {}", dest, mark, count);
                }
                println!();
            }

            println!("Last pass:");
            for service in Service::ALL {
                match ledger.last_pass(service).context("Failed to read pass history")? {
                    Some(pass) => println!("  {:<14} {}", service.display_name(), describe_pass(&pass)),
                    None => println!("  {:<14} never", service.display_name()),
                }
            }
        }

        Commands::Ledger { destination } => {
            let filter = match destination.as_deref() {
                Some(name) => Some(
                    Service::parse(name)
                        .with_context(|| format!("Unknown destination \"{name}\" (expected lastfm or listenbrainz)"))?,
                ),
                None => None,
            };
            let entries: Vec<_> = open_ledger(&db_path())?
                .all_entries()
                .context("Failed to read ledger")?
                .into_iter()
                .filter(|e| filter.is_none_or(|s| e.destination == s))
                .collect();

            if entries.is_empty() {
                println!("Ledger is empty.");
                return Ok(());
            }

            println!(
                "{:<14} {:<6} {:<10} {:<25} {:<30} {}",
                "Destination", "Mark", "Plex ID", "Artist", "Title", "Added"
            );
            println!("{}", "-".repeat(110));
            for e in &entries {
                println!(
                    "{:<14} {:<6} {:<10} {:<25} {:<30} {}",
                    e.destination.display_name(),
                    e.mark.as_str(),
                    e.track.source_id,
                    truncate(&e.track.artist, 25),
                    truncate(&e.track.title, 30),
                    e.added_at.format("%Y-%m-%d %H:%M")
                );
            }
            println!("{} entries", entries.len());
        }

        Commands::CheckConfig => check_config(&config)?,
    }

    Ok(())
}

/// What a relay or reset needs once the config has been checked.
struct Session {
    settings: RelaySettings,
    agent: ureq::Agent,
    destinations: Vec<Box<dyn Destination>>,
}

/// Validate the config and build the destinations, then open the ledger.
/// A bad config fails before any file or network I/O.
fn start_session(config: &AppConfig, db_path: impl FnOnce() -> PathBuf) -> Result<(Session, SqliteLedger)> {
    let settings = config.validate().context("Invalid configuration")?;
    let agent = ratingrelay::http::agent(config.request_timeout());
    let destinations = destination::connect_all(config, &agent)?;
    let ledger = open_ledger(&db_path())?;
    Ok((
        Session {
            settings,
            agent,
            destinations,
        },
        ledger,
    ))
}

fn open_ledger(path: &Path) -> Result<SqliteLedger> {
    log::info!("Ledger: {}", path.display());
    SqliteLedger::open(path).context("Failed to open ledger database")
}

fn check_config(config: &AppConfig) -> Result<()> {
    let settings = config.validate().context("Invalid configuration")?;
    println!("Configuration OK");
    println!("  Love threshold:  {}", settings.thresholds.love());
    match settings.thresholds.hate() {
        Some(hate) => println!("  Hate threshold:  {hate}"),
        None => println!("  Hate threshold:  (hates disabled)"),
    }
    println!("  Plex library:    {}", settings.library);

    let enabled = |on: Option<bool>| match on {
        Some(true) => "enabled",
        Some(false) => "disabled",
        None => "not configured",
    };
    println!("  Last.fm:         {}", enabled(config.lastfm.as_ref().map(|c| c.enabled)));
    println!(
        "  ListenBrainz:    {}",
        enabled(config.listenbrainz.as_ref().map(|c| c.enabled))
    );
    Ok(())
}

fn print_plan(service: Service, plan: &Plan) {
    let adds = plan.count(|s| matches!(s, Step::Add { .. }));
    let removes = plan.count(|s| matches!(s, Step::Remove { .. }));
    let replaces = plan.count(|s| matches!(s, Step::Replace { .. }));
    println!(
        "{}: {} to add, {} to remove, {} to replace, {} in sync",
        service.display_name(),
        adds,
        removes,
        replaces,
        plan.unchanged
    );
    for action in &plan.actions {
        let what = match &action.step {
            Step::Add { mark } => format!("add {mark}"),
            Step::Remove { mark, .. } if action.orphan => format!("remove {mark} (deleted from Plex)"),
            Step::Remove { mark, .. } => format!("remove {mark}"),
            Step::Replace { from, to, .. } => format!("{from} -> {to}"),
        };
        println!("  {:<32} {}", what, action.track);
    }
}

fn print_report(report: &RunReport) {
    println!(
        "{:<14} {:>6} {:>8} {:>9} {:>10} {:>7} {:>8}",
        "Destination", "Added", "Removed", "Replaced", "Not found", "Failed", "Unsaved"
    );
    println!("{}", "-".repeat(70));
    for pass in &report.passes {
        println!(
            "{:<14} {:>6} {:>8} {:>9} {:>10} {:>7} {:>8}",
            pass.destination.display_name(),
            pass.added,
            pass.removed,
            pass.replaced,
            pass.not_found,
            pass.failed,
            pass.persistence_failures
        );
        if let Some(reason) = &pass.aborted {
            println!("  aborted: {reason}");
        }
    }
}

/// Exit non-zero when any destination could not complete its pass.
fn finish(report: &RunReport) -> Result<()> {
    let aborted = report.aborted();
    if aborted > 0 {
        anyhow::bail!("{aborted} destination(s) aborted; see the log for details");
    }
    Ok(())
}

fn describe_pass(pass: &PassSummary) -> String {
    let when = pass.finished_at.format("%Y-%m-%d %H:%M");
    match &pass.aborted {
        Some(reason) => format!("{when}  aborted: {reason}"),
        None => format!(
            "{when}  +{} -{} ~{} ({} not found, {} failed)",
            pass.added, pass.removed, pass.replaced, pass.not_found, pass.failed
        ),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
love_threshold = 10.0
hate_threshold = 2.0

[plex]
url = "http://localhost:32400"
token = "plex-token"

[listenbrainz]
token = "lb-token"
"#;

    #[test]
    fn test_bad_config_creates_no_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        let inverted = AppConfig::from_toml(&VALID.replace("hate_threshold = 2.0", "hate_threshold = 10.0")).unwrap();
        assert!(start_session(&inverted, || path.clone()).is_err());
        assert!(!path.exists());

        let no_plex = AppConfig::from_toml(&VALID.replace("token = \"plex-token\"", "")).unwrap();
        assert!(start_session(&no_plex, || path.clone()).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_valid_config_opens_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        let config = AppConfig::from_toml(VALID).unwrap();
        let (session, _ledger) = start_session(&config, || path.clone()).unwrap();
        assert_eq!(session.destinations.len(), 1);
        assert_eq!(session.settings.thresholds.love(), 10.0);
        assert!(path.exists());
    }
}
