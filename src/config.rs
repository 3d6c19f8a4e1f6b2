// Configuration - one explicit value handed to every component
// Read from the environment (and an optional .env file)

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::feed::FeedQuery;
use crate::ledger::DEFAULT_RUN_LOG_LIMIT;

/// Longest accepted interval between checks (one year)
const MAX_CHECK_INTERVAL_HOURS: u64 = 24 * 366;

/// Longest accepted retention horizon (about 100 years)
const MAX_RETENTION_DAYS: i64 = 36_600;

/// Top-level configuration for a monitor run
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub feed: FeedConfig,
    pub codes: CodeSourcesConfig,
    pub storage: StorageConfig,
    /// Outbox directory for digests; `None` = log-only notifier
    pub outbox_dir: Option<PathBuf>,
    pub check_interval_hours: u64,
    pub telemetry: TelemetryConfig,
}

/// Which listings to ask the feed for, and where its response lives
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub district: String,
    pub levels: Vec<String>,
    pub max_results: usize,
    pub path: PathBuf,
}

impl FeedConfig {
    pub fn query(&self) -> FeedQuery {
        FeedQuery {
            district: self.district.clone(),
            levels: self.levels.clone(),
            max_results: self.max_results,
        }
    }
}

/// Where eligibility codes come from
#[derive(Debug, Clone)]
pub struct CodeSourcesConfig {
    pub manual_list: PathBuf,
    pub document_text: PathBuf,
}

/// Ledger location and retention
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub ledger_path: PathBuf,
    pub retention_days: i64,
    pub run_log_limit: usize,
}

/// Tracing controls
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            feed: FeedConfig {
                district: "patagones".to_string(),
                levels: vec![
                    "primaria".to_string(),
                    "secundaria".to_string(),
                    "artistica".to_string(),
                ],
                max_results: 500,
                path: PathBuf::from("data/feed.json"),
            },
            codes: CodeSourcesConfig {
                manual_list: PathBuf::from("codigos.txt"),
                document_text: PathBuf::from("oblea.txt"),
            },
            storage: StorageConfig {
                ledger_path: PathBuf::from("data/notified.db"),
                retention_days: 30,
                run_log_limit: DEFAULT_RUN_LOG_LIMIT,
            },
            outbox_dir: None,
            check_interval_hours: 6,
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
            },
        }
    }
}

impl MonitorConfig {
    /// Load from `WATCH_*` environment variables, falling back to defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = MonitorConfig::default();

        let levels = match env::var("WATCH_LEVELS") {
            Ok(raw) => split_list(&raw),
            Err(_) => defaults.feed.levels,
        };

        let config = MonitorConfig {
            feed: FeedConfig {
                district: env::var("WATCH_DISTRICT").unwrap_or(defaults.feed.district),
                levels,
                max_results: parse_var("WATCH_MAX_RESULTS", defaults.feed.max_results)?,
                path: path_var("WATCH_FEED_FILE", defaults.feed.path),
            },
            codes: CodeSourcesConfig {
                manual_list: path_var("WATCH_CODES_FILE", defaults.codes.manual_list),
                document_text: path_var("WATCH_DOCUMENT_TEXT", defaults.codes.document_text),
            },
            storage: StorageConfig {
                ledger_path: path_var("WATCH_LEDGER_PATH", defaults.storage.ledger_path),
                retention_days: parse_var("WATCH_RETENTION_DAYS", defaults.storage.retention_days)?,
                run_log_limit: parse_var("WATCH_RUN_LOG_LIMIT", defaults.storage.run_log_limit)?,
            },
            outbox_dir: env::var("WATCH_OUTBOX_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            check_interval_hours: parse_var(
                "WATCH_CHECK_INTERVAL_HOURS",
                defaults.check_interval_hours,
            )?,
            telemetry: TelemetryConfig {
                log_level: env::var("WATCH_LOG_LEVEL").unwrap_or(defaults.telemetry.log_level),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_RETENTION_DAYS).contains(&self.storage.retention_days) {
            bail!("WATCH_RETENTION_DAYS must be between 1 and {}", MAX_RETENTION_DAYS);
        }
        if self.storage.run_log_limit < 1 {
            bail!("WATCH_RUN_LOG_LIMIT must be at least 1");
        }
        if !(1..=MAX_CHECK_INTERVAL_HOURS).contains(&self.check_interval_hours) {
            bail!(
                "WATCH_CHECK_INTERVAL_HOURS must be between 1 and {}",
                MAX_CHECK_INTERVAL_HOURS
            );
        }
        if self.feed.max_results < 1 {
            bail!("WATCH_MAX_RESULTS must be at least 1");
        }
        Ok(())
    }

    /// Time between checks in `watch` mode
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_hours.saturating_mul(60 * 60))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn path_var(name: &str, default: PathBuf) -> PathBuf {
    env::var(name).map(PathBuf::from).unwrap_or(default)
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} must be a number, got {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}
