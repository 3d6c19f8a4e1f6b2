// 📬 Notifier - delivers a batch of new listings
// Success/failure is all the orchestrator needs; mail transport lives elsewhere

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::listing::Listing;

/// Notifier - consumes a batch and reports whether delivery succeeded
pub trait Notifier {
    fn name(&self) -> &str;

    /// `Ok(())` only once the whole batch has been delivered
    fn deliver(&self, listings: &[Listing]) -> Result<()>;
}

// ============================================================================
// DIGEST
// ============================================================================

/// Plain-text message for one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub subject: String,
    pub body: String,
}

fn or_unspecified(value: Option<&str>) -> &str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or("not specified")
}

pub fn format_digest(listings: &[Listing], generated_at: DateTime<Utc>) -> Digest {
    let subject = match listings.len() {
        1 => "[vacancy-watch] 1 new vacancy".to_string(),
        n => format!("[vacancy-watch] {} new vacancies", n),
    };

    let mut body = String::new();
    let _ = writeln!(body, "{} new vacancies match your eligibility codes.", listings.len());

    for listing in listings {
        let _ = writeln!(body);
        let _ = writeln!(body, "== {} ==", listing.title);
        let _ = writeln!(body, "Level:        {}", listing.level.to_uppercase());
        let _ = writeln!(body, "Code:         {}", listing.category);
        let _ = writeln!(body, "School:       {}", listing.school);
        let _ = writeln!(body, "Address:      {}", listing.address);
        let _ = writeln!(body, "Shift:        {} - {}", listing.shift, listing.workday);
        let _ = writeln!(body, "Starts:       {}", or_unspecified(listing.starts_on.as_deref()));
        let _ = writeln!(
            body,
            "Offer closes: {}",
            or_unspecified(listing.offer_closes_on.as_deref())
        );

        let days: Vec<_> = listing.scheduled_days().collect();
        if days.is_empty() {
            let _ = writeln!(body, "Schedule:     not specified");
        } else {
            let _ = writeln!(body, "Schedule:");
            for (day, hours) in days {
                let _ = writeln!(body, "  - {}: {}", day, hours);
            }
        }

        if let Some(replaces) = &listing.replaces {
            let _ = writeln!(
                body,
                "Replaces:     {} ({})",
                replaces,
                or_unspecified(listing.replacement_reason.as_deref())
            );
        }
    }

    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "Generated {} by vacancy-watch.",
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );

    Digest { subject, body }
}

// ============================================================================
// NOTIFIERS
// ============================================================================

/// Logs the digest instead of sending it (dry run)
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&self, listings: &[Listing]) -> Result<()> {
        let digest = format_digest(listings, Utc::now());
        info!("{}\n{}", digest.subject, digest.body);
        Ok(())
    }
}

/// Writes one digest file per batch into an outbox directory
pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        OutboxNotifier { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_path(&self, at: DateTime<Utc>) -> PathBuf {
        let stem = at.format("%Y%m%dT%H%M%S%.6fZ").to_string();
        let mut n = 0;
        loop {
            let candidate = self.dir.join(format!("{}-{}.txt", stem, n));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

impl Notifier for OutboxNotifier {
    fn name(&self) -> &str {
        "outbox"
    }

    fn deliver(&self, listings: &[Listing]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create outbox {:?}", self.dir))?;

        let now = Utc::now();
        let digest = format_digest(listings, now);
        let path = self.next_path(now);
        let tmp = path.with_extension("tmp");

        // Write then rename: a half-written digest never shows up as .txt
        fs::write(&tmp, format!("Subject: {}\n\n{}", digest.subject, digest.body))
            .with_context(|| format!("Failed to write digest {:?}", tmp))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to publish digest {:?}", path))?;

        info!("digest with {} listings written to {:?}", listings.len(), path);
        Ok(())
    }
}

/// Listing used by `test-notify`
pub fn sample_listing() -> Listing {
    let mut listing = Listing::new("TEST-001", "Test vacancy - Maestro de grado", "MAT", "primaria");
    listing.district = "PATAGONES".to_string();
    listing.school = "EP N° 1".to_string();
    listing.address = "Calle Falsa 123".to_string();
    listing.shift = "Mañana".to_string();
    listing.workday = "Simple".to_string();
    listing.schedule = vec![
        ("lunes".to_string(), "08:00 - 12:00".to_string()),
        ("miercoles".to_string(), "08:00 - 12:00".to_string()),
    ];
    listing
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_digest_lists_every_listing() {
        let mut second = Listing::new("2", "Profesor de arte", "ART", "artistica");
        second.replaces = Some("Pérez, Ana".to_string());
        let listings = vec![sample_listing(), second];
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap();

        let digest = format_digest(&listings, at);

        assert_eq!(digest.subject, "[vacancy-watch] 2 new vacancies");
        assert!(digest.body.contains("== Test vacancy - Maestro de grado =="));
        assert!(digest.body.contains("== Profesor de arte =="));
        assert!(digest.body.contains("  - lunes: 08:00 - 12:00"));
        assert!(digest.body.contains("Replaces:     Pérez, Ana (not specified)"));
        assert!(digest.body.contains("Generated 2026-10-18 09:30 UTC"));
    }

    #[test]
    fn test_digest_singular_subject() {
        let digest = format_digest(&[sample_listing()], Utc::now());
        assert_eq!(digest.subject, "[vacancy-watch] 1 new vacancy");
    }

    #[test]
    fn test_outbox_writes_one_file_per_batch() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = OutboxNotifier::new(dir.path().join("outbox"));

        outbox.deliver(&[sample_listing()]).unwrap();
        outbox.deliver(&[sample_listing()]).unwrap();

        let files: Vec<_> = fs::read_dir(outbox.dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();

        assert_eq!(files.len(), 2);
        for file in files {
            assert_eq!(file.extension().unwrap(), "txt");
            let content = fs::read_to_string(&file).unwrap();
            assert!(content.starts_with("Subject: [vacancy-watch] 1 new vacancy"));
        }
    }
}
