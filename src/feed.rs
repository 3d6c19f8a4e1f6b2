// Feed client - where listings come from
// The transport is external; this crate reads the response document from disk

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::listing::{Listing, ListingDocument};

/// What to ask the feed for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub district: String,
    /// Empty = every level
    pub levels: Vec<String>,
    pub max_results: usize,
}

impl FeedQuery {
    fn accepts(&self, listing: &Listing) -> bool {
        let district_ok = self.district.trim().is_empty()
            || listing.district.trim().eq_ignore_ascii_case(self.district.trim());

        let level_ok = self.levels.is_empty()
            || self
                .levels
                .iter()
                .any(|level| listing.level.trim().eq_ignore_ascii_case(level.trim()));

        district_ok && level_ok
    }
}

/// ListingFeed - supplies listings for a query
pub trait ListingFeed {
    fn fetch(&self, query: &FeedQuery) -> Result<Vec<Listing>>;
}

// ============================================================================
// FILE-BACKED FEED
// ============================================================================

#[derive(Debug, Deserialize)]
struct FeedResponse {
    response: FeedBody,
}

#[derive(Debug, Deserialize)]
struct FeedBody {
    #[serde(default)]
    docs: Vec<ListingDocument>,
}

/// Parse a feed response document (`{"response": {"docs": [...]}}`)
pub fn parse_feed_response(json: &str) -> Result<Vec<Listing>> {
    let response: FeedResponse =
        serde_json::from_str(json).context("Failed to parse feed response")?;

    Ok(response
        .response
        .docs
        .into_iter()
        .map(Listing::from_document)
        .collect())
}

/// Feed response saved to disk by an external fetcher
pub struct JsonFileFeed {
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileFeed { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ListingFeed for JsonFileFeed {
    fn fetch(&self, query: &FeedQuery) -> Result<Vec<Listing>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read feed from {:?}", self.path))?;

        let listings: Vec<Listing> = parse_feed_response(&content)
            .with_context(|| format!("Feed at {:?} is not a valid response", self.path))?
            .into_iter()
            .filter(|listing| query.accepts(listing))
            .take(query.max_results)
            .collect();

        info!(
            "feed returned {} listings for district={} levels={:?}",
            listings.len(),
            query.district,
            query.levels
        );

        Ok(listings)
    }
}
