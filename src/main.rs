use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use vacancy_watch::config::MonitorConfig;
use vacancy_watch::notifier::sample_listing;
use vacancy_watch::telemetry;
use vacancy_watch::{
    obtain_codes, CodeResolution, CycleReport, DocumentTextFile, JsonFileFeed, Ledger,
    LogNotifier, ManualCodeFile, Monitor, Notifier, OutboxNotifier, RunLock,
};

const PRUNE_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Parser, Debug)]
#[command(
    name = "vacancy-watch",
    about = "Watch teaching vacancy listings and notify the ones matching your eligibility codes",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single check and exit
    Once,
    /// Check periodically until interrupted (default command)
    Watch,
    /// Show ledger statistics and the last run
    Stats,
    /// Remove notification records older than the retention horizon
    Prune(PruneArgs),
    /// Show the eligibility codes currently in effect
    Codes,
    /// Export notified listings as CSV
    Export(ExportArgs),
    /// Send a sample listing through the configured notifier
    TestNotify,
}

#[derive(Args, Debug)]
struct PruneArgs {
    /// Override the configured retention horizon (days)
    #[arg(long)]
    days: Option<i64>,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Destination CSV file
    #[arg(long)]
    out: PathBuf,
}

// ============================================================================
// WIRING
// ============================================================================

/// Collaborators built once from configuration
struct Runtime {
    config: MonitorConfig,
    feed: JsonFileFeed,
    notifier: Box<dyn Notifier>,
    manual_codes: ManualCodeFile,
    document_codes: DocumentTextFile,
}

impl Runtime {
    fn new(config: MonitorConfig) -> Self {
        let notifier: Box<dyn Notifier> = match &config.outbox_dir {
            Some(dir) => Box::new(OutboxNotifier::new(dir)),
            None => Box::new(LogNotifier),
        };

        Runtime {
            feed: JsonFileFeed::new(&config.feed.path),
            manual_codes: ManualCodeFile::new(&config.codes.manual_list),
            document_codes: DocumentTextFile::new(&config.codes.document_text),
            notifier,
            config,
        }
    }

    fn ledger_path(&self) -> &Path {
        &self.config.storage.ledger_path
    }

    fn open_ledger(&self) -> Result<Ledger> {
        Ok(Ledger::open(self.ledger_path())?.with_run_log_limit(self.config.storage.run_log_limit))
    }

    fn lock(&self) -> Result<RunLock> {
        RunLock::acquire(RunLock::path_for(self.ledger_path()))
    }

    fn monitor<'a>(&'a self, ledger: &'a Ledger) -> Monitor<'a> {
        Monitor::new(
            &self.config,
            ledger,
            &self.feed,
            self.notifier.as_ref(),
            &self.manual_codes,
            &self.document_codes,
        )
    }

    /// One locked cycle, optionally preceded by pruning
    ///
    /// A failed prune is logged and never keeps the cycle from running.
    fn cycle(&self, prune: bool) -> Result<CycleReport> {
        let _lock = self.lock()?;
        let ledger = self.open_ledger()?;
        let monitor = self.monitor(&ledger);

        if prune {
            monitor.run_cycle_after_maintenance()
        } else {
            monitor.run_cycle()
        }
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = MonitorConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let runtime = Runtime::new(config);

    match cli.command.unwrap_or(Command::Watch) {
        Command::Once => run_once(&runtime),
        Command::Watch => run_watch(&runtime),
        Command::Stats => show_stats(&runtime),
        Command::Prune(args) => run_prune(&runtime, args.days),
        Command::Codes => show_codes(&runtime),
        Command::Export(args) => run_export(&runtime, &args.out),
        Command::TestNotify => run_test_notify(&runtime),
    }
}

fn print_report(report: &CycleReport) {
    println!("🔎 Vacancy check: {}", report.status);
    println!("   Codes from:  {}", report.codes_origin);
    println!("   Found:       {}", report.total_found);
    println!("   Matching:    {}", report.matched);
    println!("   New:         {}", report.new_count);
    println!("   Notified:    {}", report.notified);
    if report.fail_open {
        println!("   ⚠️  No eligibility codes available, nothing was filtered");
    }
}

fn run_once(runtime: &Runtime) -> Result<()> {
    let report = runtime.cycle(false)?;
    print_report(&report);

    if report.status.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_watch(runtime: &Runtime) -> Result<()> {
    let interval = runtime.config.check_interval();
    info!(
        "watching vacancies every {}h (feed {:?}, ledger {:?})",
        runtime.config.check_interval_hours,
        runtime.feed.path(),
        runtime.ledger_path()
    );

    let mut last_prune: Option<Instant> = None;

    loop {
        let prune = last_prune.map_or(true, |at| at.elapsed() >= PRUNE_EVERY);

        match runtime.cycle(prune) {
            Ok(report) => {
                if prune {
                    last_prune = Some(Instant::now());
                }
                info!(
                    "found={} new={} status={}",
                    report.total_found, report.new_count, report.status
                );
            }
            // A held lock or unreadable ledger skips this cycle only
            Err(err) => warn!("cycle skipped: {:#}", err),
        }

        thread::sleep(interval);
    }
}

fn show_stats(runtime: &Runtime) -> Result<()> {
    let ledger = runtime.open_ledger()?;
    let stats = ledger.stats()?;

    println!("📊 Vacancy Watch Statistics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Ledger:            {:?}", runtime.ledger_path());
    println!("Notified listings: {}", stats.total_notified);
    println!(
        "Runs logged:       {} (keeping the last {})",
        stats.total_runs,
        ledger.run_log_limit()
    );

    match stats.last_run {
        Some(run) => {
            println!("Last run:          {}", run.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("  found={} new={} status={}", run.total_found, run.new_count, run.status);
        }
        None => println!("Last run:          never"),
    }

    Ok(())
}

fn run_prune(runtime: &Runtime, days: Option<i64>) -> Result<()> {
    let days = days.unwrap_or(runtime.config.storage.retention_days);
    if days < 1 {
        anyhow::bail!("--days must be at least 1");
    }

    let _lock = runtime.lock()?;
    let ledger = runtime.open_ledger()?;
    let removed = ledger.prune_older_than(days)?;

    println!("🧹 Removed {} records older than {} days", removed, days);
    Ok(())
}

fn show_codes(runtime: &Runtime) -> Result<()> {
    let resolution = obtain_codes(&runtime.manual_codes, &runtime.document_codes);

    match &resolution {
        CodeResolution::Manual(_) => {
            println!("🏷️  Codes from {:?}", runtime.manual_codes.path())
        }
        CodeResolution::Document(_) => {
            println!("🏷️  Codes from {:?}", runtime.document_codes.path())
        }
        CodeResolution::Unavailable => {
            println!("⚠️  No eligibility codes found; every listing would be notified");
            return Ok(());
        }
    }

    let codes: Vec<String> = resolution.codes().iter().map(|c| c.to_string()).collect();
    println!("   {} codes: {}", codes.len(), codes.join(", "));
    Ok(())
}

fn run_export(runtime: &Runtime, out: &Path) -> Result<()> {
    let ledger = runtime.open_ledger()?;
    let records = ledger.notified_records()?;

    let mut writer = csv::Writer::from_path(out)
        .with_context(|| format!("Failed to create export file {:?}", out))?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    println!("📤 Exported {} records to {:?}", records.len(), out);
    Ok(())
}

fn run_test_notify(runtime: &Runtime) -> Result<()> {
    runtime
        .notifier
        .deliver(&[sample_listing()])
        .with_context(|| format!("{} notifier failed", runtime.notifier.name()))?;

    println!("✅ Sample notification delivered via {}", runtime.notifier.name());
    Ok(())
}
