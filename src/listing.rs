// Listing - one vacancy as published by the feed
// Built once from the raw feed document, read-only afterwards

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Weekday keys used by the feed for the weekly schedule
pub const WEEKDAYS: [&str; 6] = ["lunes", "martes", "miercoles", "jueves", "viernes", "sabado"];

/// Listing - immutable job posting
///
/// Identity is `id` alone; every other field is descriptive and passes
/// through unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Eligibility category, matched against the user's codes
    pub category: String,
    pub level: String,
    pub district: String,
    pub school: String,
    pub address: String,
    pub shift: String,
    pub workday: String,
    pub starts_on: Option<String>,
    pub offer_closes_on: Option<String>,
    /// Weekday → hours, in weekday order
    pub schedule: Vec<(String, String)>,
    pub replaces: Option<String>,
    pub replacement_reason: Option<String>,
}

impl Listing {
    /// Minimal listing, mostly for tests and sample notifications
    pub fn new(id: &str, title: &str, category: &str, level: &str) -> Self {
        Listing {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            category: category.trim().to_uppercase(),
            level: level.to_string(),
            district: String::new(),
            school: String::new(),
            address: String::new(),
            shift: String::new(),
            workday: String::new(),
            starts_on: None,
            offer_closes_on: None,
            schedule: Vec::new(),
            replaces: None,
            replacement_reason: None,
        }
    }

    /// Build a listing from a raw feed document
    pub fn from_document(doc: ListingDocument) -> Self {
        let schedule = WEEKDAYS
            .iter()
            .map(|day| {
                let hours = doc
                    .extra
                    .get(*day)
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_string();
                (day.to_string(), hours)
            })
            .collect();

        Listing {
            id: doc.id,
            title: doc.cargo,
            description: doc.descripcioncargo,
            category: doc.areaincumbencia.trim().to_uppercase(),
            level: doc.descnivelmodalidad,
            district: doc.descdistrito,
            school: doc.escuela,
            address: doc.domiciliodesempeno,
            shift: doc.turno,
            workday: doc.jornada,
            starts_on: doc.tomaposesion.filter(|s| !s.is_empty()),
            offer_closes_on: doc.finoferta.filter(|s| !s.is_empty()),
            schedule,
            replaces: doc.reemp_apeynom.filter(|s| !s.is_empty()),
            replacement_reason: doc.reemp_motivo.filter(|s| !s.is_empty()),
        }
    }

    /// Schedule entries that actually carry hours
    pub fn scheduled_days(&self) -> impl Iterator<Item = (&str, &str)> {
        self.schedule
            .iter()
            .filter(|(_, hours)| !hours.trim().is_empty())
            .map(|(day, hours)| (day.as_str(), hours.as_str()))
    }
}

// ============================================================================
// RAW FEED DOCUMENT
// ============================================================================

/// Raw document as returned by the vacancy API (Solr-style `docs` entry)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingDocument {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,

    #[serde(default, deserialize_with = "nullable_string")]
    pub cargo: String,

    #[serde(default, deserialize_with = "nullable_string")]
    pub descripcioncargo: String,

    #[serde(default, deserialize_with = "nullable_string")]
    pub areaincumbencia: String,

    #[serde(default, deserialize_with = "nullable_string")]
    pub descnivelmodalidad: String,

    #[serde(default, deserialize_with = "nullable_string")]
    pub descdistrito: String,

    #[serde(default, deserialize_with = "nullable_string")]
    pub escuela: String,

    #[serde(default, deserialize_with = "nullable_string")]
    pub domiciliodesempeno: String,

    #[serde(default, deserialize_with = "nullable_string")]
    pub turno: String,

    #[serde(default, deserialize_with = "nullable_string")]
    pub jornada: String,

    #[serde(default)]
    pub tomaposesion: Option<String>,

    #[serde(default)]
    pub finoferta: Option<String>,

    #[serde(default)]
    pub reemp_apeynom: Option<String>,

    #[serde(default)]
    pub reemp_motivo: Option<String>,

    /// Weekday columns and any other field we do not model
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "listing id must be a string or number, got {}",
            other
        ))),
    }
}
