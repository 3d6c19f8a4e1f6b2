// 🔁 Run Orchestrator - one polling cycle
// codes → feed → matcher → ledger → notifier, one run log entry per cycle

use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::codes::{obtain_codes, CodeSource};
use crate::config::MonitorConfig;
use crate::feed::{FeedQuery, ListingFeed};
use crate::ledger::Ledger;
use crate::listing::Listing;
use crate::matcher::filter_by_codes;
use crate::notifier::Notifier;

/// Longest error message kept in a run log status
const STATUS_MESSAGE_LIMIT: usize = 100;

// ============================================================================
// RUN STATUS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// New listings delivered and recorded
    Ok,
    NoListings,
    NoMatches,
    NothingNew,
    /// Notifier refused the batch; nothing recorded
    DeliveryFailed,
    Failed(String),
}

impl RunStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, RunStatus::DeliveryFailed | RunStatus::Failed(_))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Ok => write!(f, "OK"),
            RunStatus::NoListings => write!(f, "OK - no listings"),
            RunStatus::NoMatches => write!(f, "OK - no matches"),
            RunStatus::NothingNew => write!(f, "OK - nothing new"),
            RunStatus::DeliveryFailed => write!(f, "ERROR - notification not delivered"),
            RunStatus::Failed(message) => {
                let short: String = message.chars().take(STATUS_MESSAGE_LIMIT).collect();
                write!(f, "ERROR - {}", short)
            }
        }
    }
}

/// Outcome of one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// "manual", "document" or "none"
    pub codes_origin: &'static str,
    /// True when listings went through unfiltered for lack of codes
    pub fail_open: bool,
    pub total_found: usize,
    pub matched: usize,
    pub new_count: usize,
    pub notified: usize,
    pub status: RunStatus,
}

impl CycleReport {
    fn new(codes_origin: &'static str, total_found: usize) -> Self {
        CycleReport {
            codes_origin,
            fail_open: false,
            total_found,
            matched: 0,
            new_count: 0,
            notified: 0,
            status: RunStatus::Ok,
        }
    }

    fn failed(err: &anyhow::Error) -> Self {
        CycleReport {
            codes_origin: "none",
            fail_open: false,
            total_found: 0,
            matched: 0,
            new_count: 0,
            notified: 0,
            status: RunStatus::Failed(format!("{:#}", err)),
        }
    }
}

// ============================================================================
// DELIVER, THEN COMMIT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Delivered and recorded in the ledger
    Delivered(usize),
    /// Not delivered; ids stay new for the next cycle
    NotDelivered(String),
}

/// Deliver `batch`, and only if the notifier confirms, record it as notified
pub fn dispatch(notifier: &dyn Notifier, ledger: &Ledger, batch: &[Listing]) -> Result<Dispatch> {
    if batch.is_empty() {
        return Ok(Dispatch::Delivered(0));
    }

    if let Err(err) = notifier.deliver(batch) {
        warn!(
            "{} notifier failed for {} listings: {:#}",
            notifier.name(),
            batch.len(),
            err
        );
        return Ok(Dispatch::NotDelivered(format!("{:#}", err)));
    }

    let recorded = ledger
        .record_batch(batch)
        .context("Batch was delivered but could not be recorded")?;

    info!("{} listings delivered via {}", recorded, notifier.name());
    Ok(Dispatch::Delivered(recorded))
}

// ============================================================================
// MONITOR
// ============================================================================

pub struct Monitor<'a> {
    ledger: &'a Ledger,
    feed: &'a dyn ListingFeed,
    notifier: &'a dyn Notifier,
    manual_codes: &'a dyn CodeSource,
    document_codes: &'a dyn CodeSource,
    query: FeedQuery,
    retention_days: i64,
}

impl<'a> Monitor<'a> {
    pub fn new(
        config: &MonitorConfig,
        ledger: &'a Ledger,
        feed: &'a dyn ListingFeed,
        notifier: &'a dyn Notifier,
        manual_codes: &'a dyn CodeSource,
        document_codes: &'a dyn CodeSource,
    ) -> Self {
        Monitor {
            ledger,
            feed,
            notifier,
            manual_codes,
            document_codes,
            query: config.feed.query(),
            retention_days: config.storage.retention_days,
        }
    }

    /// Run one cycle and append its outcome to the run log
    ///
    /// Failures inside the cycle end up in the report status; only a failure
    /// to write the run log itself is returned as an error.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        info!(
            "checking vacancies: district={} levels={:?}",
            self.query.district, self.query.levels
        );

        let report = match self.check() {
            Ok(report) => report,
            Err(err) => {
                error!("vacancy check failed: {:#}", err);
                CycleReport::failed(&err)
            }
        };

        self.ledger
            .log_run(report.total_found, report.new_count, &report.status.to_string())
            .context("Failed to append run log entry")?;

        info!("cycle finished: {}", report.status);
        Ok(report)
    }

    fn check(&self) -> Result<CycleReport> {
        let resolution = obtain_codes(self.manual_codes, self.document_codes);
        let codes = resolution.codes();

        let listings = self
            .feed
            .fetch(&self.query)
            .context("Failed to fetch listings")?;

        let mut report = CycleReport::new(resolution.origin(), listings.len());
        if listings.is_empty() {
            info!("no published listings");
            report.status = RunStatus::NoListings;
            return Ok(report);
        }

        let filtered = filter_by_codes(&listings, &codes);
        report.fail_open = filtered.fail_open;
        report.matched = filtered.len();
        if filtered.is_empty() {
            info!("no listings match the eligibility codes");
            report.status = RunStatus::NoMatches;
            return Ok(report);
        }

        let fresh = self.ledger.filter_new(&filtered.listings)?;
        report.new_count = fresh.len();
        if fresh.is_empty() {
            info!("nothing new since the last check");
            report.status = RunStatus::NothingNew;
            return Ok(report);
        }

        info!("{} new listings to notify", fresh.len());
        match dispatch(self.notifier, self.ledger, &fresh)? {
            Dispatch::Delivered(count) => {
                report.notified = count;
                report.status = RunStatus::Ok;
            }
            Dispatch::NotDelivered(_) => {
                report.status = RunStatus::DeliveryFailed;
            }
        }

        Ok(report)
    }

    /// Age out old notification records
    pub fn maintenance(&self) -> Result<usize> {
        self.ledger.prune_older_than(self.retention_days)
    }

    /// Prune, then run a cycle regardless of how the prune went
    pub fn run_cycle_after_maintenance(&self) -> Result<CycleReport> {
        match self.maintenance() {
            Ok(removed) => info!("pruned {} old notification records", removed),
            Err(err) => error!("retention prune failed: {:#}", err),
        }

        self.run_cycle()
    }
}

// ============================================================================
// RUN LOCK
// ============================================================================

/// Cross-process guard so overlapping invocations don't interleave ledger writes
///
/// The lock file is removed on drop. A process killed hard leaves it behind;
/// it then has to be removed by hand.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create lock directory {:?}", parent))?;
            }
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                if let Err(err) = writeln!(file, "{}", std::process::id()) {
                    debug!("could not write pid into lock {:?}: {}", path, err);
                }
                Ok(RunLock { path })
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => bail!(
                "Another run holds the lock at {:?} (remove it if no run is active)",
                path
            ),
            Err(err) => Err(err).with_context(|| format!("Failed to create lock {:?}", path)),
        }
    }

    /// Lock file conventionally kept next to the ledger
    pub fn path_for(ledger_path: &Path) -> PathBuf {
        ledger_path.with_extension("lock")
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{code_set, CodeSet};
    use anyhow::anyhow;
    use std::cell::{Cell, RefCell};

    struct StaticFeed(Vec<Listing>);

    impl ListingFeed for StaticFeed {
        fn fetch(&self, _query: &FeedQuery) -> Result<Vec<Listing>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenFeed;

    impl ListingFeed for BrokenFeed {
        fn fetch(&self, _query: &FeedQuery) -> Result<Vec<Listing>> {
            Err(anyhow!("connection reset"))
        }
    }

    struct Codes(CodeSet);

    impl CodeSource for Codes {
        fn name(&self) -> &str {
            "test codes"
        }

        fn load(&self) -> CodeSet {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        fail: Cell<bool>,
        batches: RefCell<Vec<Vec<String>>>,
    }

    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        fn deliver(&self, listings: &[Listing]) -> Result<()> {
            if self.fail.get() {
                return Err(anyhow!("smtp unavailable"));
            }
            self.batches
                .borrow_mut()
                .push(listings.iter().map(|l| l.id.clone()).collect());
            Ok(())
        }
    }

    fn feed() -> StaticFeed {
        StaticFeed(vec![
            Listing::new("1", "Maestro de grado", "MAT", "primaria"),
            Listing::new("2", "Profesor de arte", "ART", "artistica"),
        ])
    }

    #[test]
    fn test_two_cycles_notify_once() {
        let config = MonitorConfig::default();
        let ledger = Ledger::open_in_memory().unwrap();
        let feed = feed();
        let notifier = RecordingNotifier::default();
        let manual = Codes(code_set(["MAT"]));
        let document = Codes(CodeSet::new());

        let monitor = Monitor::new(&config, &ledger, &feed, &notifier, &manual, &document);

        let first = monitor.run_cycle().unwrap();
        assert_eq!(first.status, RunStatus::Ok);
        assert_eq!(first.total_found, 2);
        assert_eq!(first.matched, 1);
        assert_eq!(first.notified, 1);
        assert_eq!(first.codes_origin, "manual");

        let second = monitor.run_cycle().unwrap();
        assert_eq!(second.status, RunStatus::NothingNew);
        assert_eq!(second.new_count, 0);

        assert_eq!(*notifier.batches.borrow(), vec![vec!["1".to_string()]]);

        let log = ledger.run_log().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].status, "OK");
        assert_eq!(log[1].status, "OK - nothing new");
    }

    #[test]
    fn test_failed_delivery_records_nothing() {
        let config = MonitorConfig::default();
        let ledger = Ledger::open_in_memory().unwrap();
        let feed = feed();
        let notifier = RecordingNotifier::default();
        notifier.fail.set(true);
        let manual = Codes(code_set(["MAT"]));
        let document = Codes(CodeSet::new());

        let monitor = Monitor::new(&config, &ledger, &feed, &notifier, &manual, &document);

        let report = monitor.run_cycle().unwrap();
        assert_eq!(report.status, RunStatus::DeliveryFailed);
        assert!(report.status.is_error());
        assert!(!ledger.is_notified("1").unwrap());

        // Next cycle retries the same listing
        notifier.fail.set(false);
        let retry = monitor.run_cycle().unwrap();
        assert_eq!(retry.status, RunStatus::Ok);
        assert!(ledger.is_notified("1").unwrap());

        let statuses: Vec<_> = ledger.run_log().unwrap().into_iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec!["ERROR - notification not delivered", "OK"]);
    }

    #[test]
    fn test_no_codes_fails_open() {
        let config = MonitorConfig::default();
        let ledger = Ledger::open_in_memory().unwrap();
        let feed = feed();
        let notifier = RecordingNotifier::default();
        let empty = Codes(CodeSet::new());

        let monitor = Monitor::new(&config, &ledger, &feed, &notifier, &empty, &empty);
        let report = monitor.run_cycle().unwrap();

        assert!(report.fail_open);
        assert_eq!(report.codes_origin, "none");
        assert_eq!(report.notified, 2);
    }

    #[test]
    fn test_cycle_outcomes_are_logged() {
        let config = MonitorConfig::default();
        let ledger = Ledger::open_in_memory().unwrap();
        let notifier = RecordingNotifier::default();
        let manual = Codes(code_set(["LEN"]));
        let document = Codes(CodeSet::new());

        let empty_feed = StaticFeed(Vec::new());
        Monitor::new(&config, &ledger, &empty_feed, &notifier, &manual, &document)
            .run_cycle()
            .unwrap();

        let feed = feed();
        Monitor::new(&config, &ledger, &feed, &notifier, &manual, &document)
            .run_cycle()
            .unwrap();

        let report = Monitor::new(&config, &ledger, &BrokenFeed, &notifier, &manual, &document)
            .run_cycle()
            .unwrap();
        assert!(report.status.is_error());

        let statuses: Vec<_> = ledger.run_log().unwrap().into_iter().map(|e| e.status).collect();
        assert_eq!(statuses[0], "OK - no listings");
        assert_eq!(statuses[1], "OK - no matches");
        assert!(statuses[2].starts_with("ERROR - Failed to fetch listings"));
        assert!(notifier.batches.borrow().is_empty());
    }

    #[test]
    fn test_failed_status_is_truncated() {
        let status = RunStatus::Failed("x".repeat(500));
        assert_eq!(status.to_string().len(), "ERROR - ".len() + STATUS_MESSAGE_LIMIT);
    }

    #[test]
    fn test_dispatch_empty_batch_skips_notifier() {
        let ledger = Ledger::open_in_memory().unwrap();
        let notifier = RecordingNotifier::default();

        assert_eq!(dispatch(&notifier, &ledger, &[]).unwrap(), Dispatch::Delivered(0));
        assert!(notifier.batches.borrow().is_empty());
    }

    #[test]
    fn test_failed_prune_does_not_block_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let ledger_path = dir.path().join("notified.db");

        let ledger = Ledger::open(&ledger_path).unwrap();
        let raw = rusqlite::Connection::open(&ledger_path).unwrap();
        raw.execute(
            "INSERT INTO notified (id, title, category, level, notified_at)
             VALUES ('old', 'X', 'MAT', 'primaria', 'not-a-date')",
            [],
        )
        .unwrap();
        drop(raw);

        let config = MonitorConfig::default();
        let feed = feed();
        let notifier = RecordingNotifier::default();
        let manual = Codes(code_set(["MAT"]));
        let document = Codes(CodeSet::new());
        let monitor = Monitor::new(&config, &ledger, &feed, &notifier, &manual, &document);

        assert!(monitor.maintenance().is_err());

        let report = monitor.run_cycle_after_maintenance().unwrap();
        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(report.notified, 1);
        assert!(ledger.is_notified("old").unwrap());

        let log = ledger.run_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, "OK");
    }

    #[test]
    fn test_run_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = RunLock::path_for(&dir.path().join("notified.db"));

        let lock = RunLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert!(RunLock::acquire(&path).is_err());

        drop(lock);
        assert!(!path.exists());
        assert!(RunLock::acquire(&path).is_ok());
    }
}
