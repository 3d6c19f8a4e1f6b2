// 🔍 Listing Matcher - eligibility filtering by category code
// Exact match on the normalized category, no partial matching

use crate::codes::{CodeSet, EligibilityCode};
use crate::listing::Listing;
use tracing::{debug, info, warn};

// ============================================================================
// FILTER RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CodeFilter {
    /// Listings that passed, in original relative order
    pub listings: Vec<Listing>,

    /// True when no codes were available and nothing was filtered out
    pub fail_open: bool,
}

impl CodeFilter {
    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

// ============================================================================
// MATCHING
// ============================================================================

/// True if the listing's category is one of the codes
pub fn matches_codes(listing: &Listing, codes: &CodeSet) -> bool {
    codes.contains(&EligibilityCode::normalize(&listing.category))
}

/// Keep the listings whose category is one of `codes`
///
/// With no codes at all the input passes through untouched and the result is
/// flagged `fail_open`, so the caller can surface it.
pub fn filter_by_codes(listings: &[Listing], codes: &CodeSet) -> CodeFilter {
    if codes.is_empty() {
        warn!(
            "no eligibility codes to filter by, passing all {} listings through",
            listings.len()
        );
        return CodeFilter {
            listings: listings.to_vec(),
            fail_open: true,
        };
    }

    let matched: Vec<Listing> = listings
        .iter()
        .filter(|listing| {
            let hit = matches_codes(listing, codes);
            if hit {
                debug!("listing {} matches code {}", listing.id, listing.category);
            }
            hit
        })
        .cloned()
        .collect();

    info!(
        "{} of {} listings match the eligibility codes",
        matched.len(),
        listings.len()
    );

    CodeFilter {
        listings: matched,
        fail_open: false,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::code_set;

    fn listing(id: &str, category: &str) -> Listing {
        Listing::new(id, "Cargo", category, "primaria")
    }

    fn ids(listings: &[Listing]) -> Vec<&str> {
        listings.iter().map(|l| l.id.as_str()).collect()
    }

    #[test]
    fn test_empty_codes_fail_open() {
        let listings = vec![listing("1", "MAT"), listing("2", "ART"), listing("3", "")];

        let result = filter_by_codes(&listings, &CodeSet::new());

        assert!(result.fail_open);
        assert_eq!(result.listings, listings);
    }

    #[test]
    fn test_exact_match_only() {
        let listings = vec![
            listing("1", "MAT"),
            listing("2", "MATE"),
            listing("3", "ART"),
            listing("4", "MA"),
        ];

        let result = filter_by_codes(&listings, &code_set(["MAT"]));

        assert!(!result.fail_open);
        assert_eq!(ids(&result.listings), vec!["1"]);
    }

    #[test]
    fn test_category_normalization() {
        let mut odd = listing("1", "mat");
        odd.category = "  mat ".to_string();
        let listings = vec![odd, listing("2", "/ef")];

        let result = filter_by_codes(&listings, &code_set(["MAT", "/EF"]));

        assert_eq!(ids(&result.listings), vec!["1", "2"]);
    }

    #[test]
    fn test_preserves_order() {
        let listings = vec![
            listing("c", "LEN"),
            listing("a", "ART"),
            listing("b", "MAT"),
            listing("d", "LEN"),
        ];

        let result = filter_by_codes(&listings, &code_set(["LEN", "MAT"]));

        assert_eq!(ids(&result.listings), vec!["c", "b", "d"]);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let listings = vec![listing("1", "MAT"), listing("2", "ART"), listing("3", "LEN")];
        let codes = code_set(["MAT", "LEN"]);

        let once = filter_by_codes(&listings, &codes);
        let twice = filter_by_codes(&once.listings, &codes);

        assert_eq!(once, twice);
    }
}
