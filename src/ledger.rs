// 🗄️ Notification Ledger - which listings were already notified, and run history
// SQLite + WAL; every mutation is one statement or one transaction

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::listing::Listing;

/// Run log entries kept by default
pub const DEFAULT_RUN_LOG_LIMIT: usize = 100;

/// Bumped whenever the table layout changes
const SCHEMA_VERSION: i64 = 1;

// ============================================================================
// RECORDS
// ============================================================================

/// One notified listing. Identity is `id`; the rest is kept for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub title: String,
    pub category: String,
    pub level: String,
    pub notified_at: DateTime<Utc>,
}

/// One orchestrator invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub timestamp: DateTime<Utc>,
    pub total_found: usize,
    pub new_count: usize,
    pub status: String,
}

/// Read-only summary of the ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStats {
    pub total_notified: usize,
    pub last_run: Option<RunLogEntry>,
    pub total_runs: usize,
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, what: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Malformed timestamp {:?} in {}", raw, what))
}

// ============================================================================
// LEDGER
// ============================================================================

/// Durable notification ledger
///
/// Assumes a single owning process. Overlapping invocations must be
/// serialized by the caller (see `monitor::RunLock`).
pub struct Ledger {
    conn: Connection,
    run_log_limit: usize,
}

impl Ledger {
    /// Open (creating if needed) the ledger stored at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create ledger directory {:?}", parent))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open ledger at {:?}", path))?;

        let ledger = Ledger {
            conn,
            run_log_limit: DEFAULT_RUN_LOG_LIMIT,
        };
        ledger
            .initialize()
            .with_context(|| format!("Failed to initialize ledger at {:?}", path))?;

        Ok(ledger)
    }

    /// Throwaway ledger (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory ledger")?;
        let ledger = Ledger {
            conn,
            run_log_limit: DEFAULT_RUN_LOG_LIMIT,
        };
        ledger.initialize()?;
        Ok(ledger)
    }

    /// Change how many run log entries are retained (at least one)
    pub fn with_run_log_limit(mut self, limit: usize) -> Self {
        self.run_log_limit = limit.max(1);
        self
    }

    pub fn run_log_limit(&self) -> usize {
        self.run_log_limit
    }

    /// Create the `notified` and `run_log` tables if missing
    ///
    /// Idempotent: existing data is never touched. A store written by a newer
    /// schema, or a file that is not a database, is reported as an error.
    pub fn initialize(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .context("Failed to read ledger schema version (not a ledger database?)")?;

        if version > SCHEMA_VERSION {
            bail!(
                "Ledger schema version {} is newer than supported version {}",
                version,
                SCHEMA_VERSION
            );
        }

        // Enable WAL mode for crash recovery
        self.conn.pragma_update(None, "journal_mode", "WAL")?;

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS notified (
                id TEXT PRIMARY KEY NOT NULL,
                title TEXT NOT NULL,
                category TEXT NOT NULL,
                level TEXT NOT NULL,
                notified_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS run_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                total_found INTEGER NOT NULL,
                new_count INTEGER NOT NULL,
                status TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notified_at ON notified(notified_at);",
        )?;

        if version < SCHEMA_VERSION {
            self.conn
                .pragma_update(None, "user_version", SCHEMA_VERSION)?;
            debug!("ledger schema initialized at version {}", SCHEMA_VERSION);
        }

        Ok(())
    }

    // ========================================================================
    // NOTIFIED LISTINGS
    // ========================================================================

    pub fn is_notified(&self, id: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM notified WHERE id = ?1")?;
        Ok(stmt.exists(params![id])?)
    }

    /// Listings never notified before, in their original order
    pub fn filter_new(&self, listings: &[Listing]) -> Result<Vec<Listing>> {
        let mut fresh = Vec::new();

        for listing in listings {
            if !self.is_notified(&listing.id)? {
                fresh.push(listing.clone());
            }
        }

        info!("{} of {} listings are new", fresh.len(), listings.len());
        Ok(fresh)
    }

    /// Record a notification, timestamped now
    ///
    /// Only call this once the notifier has confirmed delivery.
    pub fn record_notified(&self, id: &str, title: &str, category: &str, level: &str) -> Result<()> {
        self.record_notified_at(id, title, category, level, Utc::now())
    }

    pub fn record_notified_at(
        &self,
        id: &str,
        title: &str,
        category: &str,
        level: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO notified (id, title, category, level, notified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, title, category, level, format_timestamp(at)],
            )
            .with_context(|| format!("Failed to record notification for listing {}", id))?;

        debug!("listing {} marked as notified", id);
        Ok(())
    }

    /// Record a whole delivered batch atomically
    pub fn record_batch(&self, listings: &[Listing]) -> Result<usize> {
        let at = format_timestamp(Utc::now());
        let tx = self.conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO notified (id, title, category, level, notified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for listing in listings {
                stmt.execute(params![
                    listing.id,
                    listing.title,
                    listing.category,
                    listing.level,
                    at
                ])?;
            }
        }

        tx.commit().context("Failed to commit notified batch")?;
        Ok(listings.len())
    }

    pub fn record(&self, id: &str) -> Result<Option<NotificationRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, category, level, notified_at FROM notified WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, title, category, level, at)| -> Result<NotificationRecord> {
            let notified_at = parse_timestamp(&at, &format!("notified record {}", id))?;
            Ok(NotificationRecord {
                id,
                title,
                category,
                level,
                notified_at,
            })
        })
        .transpose()
    }

    /// Every notification record, oldest first
    pub fn notified_records(&self) -> Result<Vec<NotificationRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, category, level, notified_at
             FROM notified
             ORDER BY notified_at ASC, id ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, title, category, level, at)| -> Result<NotificationRecord> {
                let notified_at = parse_timestamp(&at, &format!("notified record {}", id))?;
                Ok(NotificationRecord {
                    id,
                    title,
                    category,
                    level,
                    notified_at,
                })
            })
            .collect()
    }

    // ========================================================================
    // RETENTION
    // ========================================================================

    /// Drop records notified more than `days` days ago
    pub fn prune_older_than(&self, days: i64) -> Result<usize> {
        self.prune_older_than_at(days, Utc::now())
    }

    /// Drop records with `now - notified_at > days`; keep everything else
    ///
    /// A record with an unreadable timestamp aborts the prune untouched.
    pub fn prune_older_than_at(&self, days: i64, now: DateTime<Utc>) -> Result<usize> {
        let horizon = Duration::try_days(days)
            .with_context(|| format!("Retention of {} days is out of range", days))?;

        let mut stmt = self.conn.prepare("SELECT id, notified_at FROM notified")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut expired = Vec::new();
        for (id, at) in rows {
            let notified_at = parse_timestamp(&at, &format!("notified record {}", id))?;
            if now - notified_at > horizon {
                expired.push(id);
            }
        }

        if expired.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM notified WHERE id = ?1")?;
            for id in &expired {
                stmt.execute(params![id])?;
            }
        }
        tx.commit().context("Failed to commit prune")?;

        info!(
            "pruned {} notification records older than {} days",
            expired.len(),
            days
        );
        Ok(expired.len())
    }

    // ========================================================================
    // RUN LOG
    // ========================================================================

    /// Append a run entry and trim the log to the most recent entries
    pub fn log_run(&self, total_found: usize, new_count: usize, status: &str) -> Result<()> {
        self.log_run_at(total_found, new_count, status, Utc::now())
    }

    pub fn log_run_at(
        &self,
        total_found: usize,
        new_count: usize,
        status: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO run_log (timestamp, total_found, new_count, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                format_timestamp(at),
                total_found as i64,
                new_count as i64,
                status
            ],
        )?;

        tx.execute(
            "DELETE FROM run_log
             WHERE seq NOT IN (SELECT seq FROM run_log ORDER BY seq DESC LIMIT ?1)",
            params![self.run_log_limit as i64],
        )?;

        tx.commit().context("Failed to append run log entry")?;
        Ok(())
    }

    /// Retained run entries, oldest first
    pub fn run_log(&self) -> Result<Vec<RunLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, total_found, new_count, status FROM run_log ORDER BY seq ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(at, total_found, new_count, status)| run_entry(&at, total_found, new_count, status))
            .collect()
    }

    pub fn stats(&self) -> Result<LedgerStats> {
        let total_notified: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM notified", [], |row| row.get(0))?;
        let total_runs: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM run_log", [], |row| row.get(0))?;

        let last = self
            .conn
            .query_row(
                "SELECT timestamp, total_found, new_count, status
                 FROM run_log ORDER BY seq DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let last_run = last
            .map(|(at, total_found, new_count, status)| run_entry(&at, total_found, new_count, status))
            .transpose()?;

        Ok(LedgerStats {
            total_notified: total_notified as usize,
            last_run,
            total_runs: total_runs as usize,
        })
    }
}

fn run_entry(at: &str, total_found: i64, new_count: i64, status: String) -> Result<RunLogEntry> {
    Ok(RunLogEntry {
        timestamp: parse_timestamp(at, "run log")?,
        total_found: total_found.max(0) as usize,
        new_count: new_count.max(0) as usize,
        status,
    })
}

// ============================================================================
// TESTS
// ============================================================================
