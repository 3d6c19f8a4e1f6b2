// Vacancy Watch - Core Library
// Exposes all modules for use in the CLI and tests

pub mod codes;      // Eligibility code extraction + source precedence
pub mod listing;    // Listing model + feed document mapping
pub mod matcher;    // Listing ↔ code matching
pub mod ledger;     // Notification ledger (SQLite)
pub mod feed;
pub mod notifier;
pub mod monitor;    // One polling cycle, deliver-then-commit
pub mod config;
pub mod telemetry;

// Re-export commonly used types
pub use codes::{
    CodeResolution, CodeSet, CodeSource, DocumentTextFile, EligibilityCode, ManualCodeFile,
    code_set, extract, extract_from_lines, obtain_codes,
};
pub use listing::{Listing, ListingDocument};
pub use matcher::{CodeFilter, filter_by_codes, matches_codes};
pub use ledger::{Ledger, LedgerStats, NotificationRecord, RunLogEntry};
pub use feed::{FeedQuery, JsonFileFeed, ListingFeed, parse_feed_response};
pub use notifier::{Digest, LogNotifier, Notifier, OutboxNotifier, format_digest};
pub use monitor::{CycleReport, Dispatch, Monitor, RunLock, RunStatus, dispatch};
pub use config::MonitorConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
