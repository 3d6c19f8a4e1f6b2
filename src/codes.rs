// 🏷️ Eligibility Codes - extraction from free text and code lists
// Dictionary match OR generic shape match, manual list always wins over the document

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

// ============================================================================
// CORE TYPES
// ============================================================================

/// Marker that may precede a code inside a document (e.g. "/EF")
const CODE_MARKER: char = '/';

/// Comment marker for hand-written code lists
const COMMENT_MARKER: char = '#';

/// Codes known to appear on eligibility documents
pub const KNOWN_CODES: &[&str] = &[
    // General areas
    "AE", "FPG", "MG", "MI",
    // Primary / secondary subjects
    "MAT", "LEN", "NAT", "SOC", "ING", "EFI", "MUS", "PLA", "TEC",
    // Physical education
    "/EF", "/AL",
    // Arts
    "ART", "DAN", "TEA",
    // Special education
    "ESP", "PSI",
    // Others
    "INF", "ADM", "BIB", "PRE", "SEC",
];

/// EligibilityCode - normalized (upper-case, trimmed) short token
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EligibilityCode(String);

impl EligibilityCode {
    /// Normalize raw text into a code (no shape validation)
    pub fn normalize(raw: &str) -> Self {
        EligibilityCode(raw.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the code appears in the built-in dictionary
    pub fn is_known(&self) -> bool {
        KNOWN_CODES.contains(&self.0.as_str())
    }
}

impl fmt::Display for EligibilityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EligibilityCode {
    fn from(raw: &str) -> Self {
        EligibilityCode::normalize(raw)
    }
}

/// Set of eligibility codes (ordered only for stable display)
pub type CodeSet = BTreeSet<EligibilityCode>;

/// Build a code set from string literals
pub fn code_set<'a>(codes: impl IntoIterator<Item = &'a str>) -> CodeSet {
    codes.into_iter().map(EligibilityCode::normalize).collect()
}

// ============================================================================
// EXTRACTION FROM DOCUMENT TEXT
// ============================================================================

/// "/" + 2-3 letters, or 2-4 letters standing alone as a word
fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/[A-Z]{2,3}\b|\b[A-Z]{2,4}\b").expect("code pattern is a valid regex")
    })
}

/// Generic shape test: 2-4 chars, letters only once the marker is stripped
fn has_code_shape(candidate: &str) -> bool {
    let len = candidate.chars().count();
    if !(2..=4).contains(&len) {
        return false;
    }

    let stem = candidate.strip_prefix(CODE_MARKER).unwrap_or(candidate);
    !stem.is_empty() && stem.chars().all(char::is_alphabetic)
}

/// Extract eligibility codes from unstructured document text
///
/// Case-insensitive. A candidate is accepted when it is a known code, or when
/// it passes the generic shape test. Never fails; worst case is an empty set.
pub fn extract(text: &str) -> CodeSet {
    let upper = text.to_uppercase();

    let mut codes = CodeSet::new();
    let mut known = 0usize;
    let mut shaped = 0usize;

    for found in code_pattern().find_iter(&upper) {
        let code = EligibilityCode::normalize(found.as_str());

        if code.is_known() {
            known += 1;
        } else if has_code_shape(code.as_str()) {
            shaped += 1;
        } else {
            continue;
        }

        codes.insert(code);
    }

    debug!(
        "extracted {} codes ({} dictionary hits, {} shape hits)",
        codes.len(),
        known,
        shaped
    );

    codes
}

// ============================================================================
// EXTRACTION FROM HAND-WRITTEN LISTS
// ============================================================================

/// Extract codes from a hand-written list
///
/// One or more codes per line, separated by commas or whitespace. Blank lines
/// and lines starting with `#` are skipped. Any 2-4 character token is
/// accepted, so prefixed codes such as `+3N` or `-7H` survive.
pub fn extract_from_lines(text: &str) -> CodeSet {
    let mut codes = CodeSet::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(COMMENT_MARKER) {
            continue;
        }

        for token in line.split(|c: char| c == ',' || c.is_whitespace()) {
            let code = EligibilityCode::normalize(token);
            let len = code.as_str().chars().count();
            if (2..=4).contains(&len) {
                codes.insert(code);
            }
        }
    }

    codes
}

// ============================================================================
// CODE SOURCES
// ============================================================================

/// CodeSource - anything that can yield eligibility codes
///
/// Loading never fails: an unreadable source yields an empty set.
pub trait CodeSource {
    /// Short label used in logs
    fn name(&self) -> &str;

    fn load(&self) -> CodeSet;
}

/// Hand-maintained list of codes, one or more per line
pub struct ManualCodeFile {
    path: PathBuf,
}

impl ManualCodeFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ManualCodeFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CodeSource for ManualCodeFile {
    fn name(&self) -> &str {
        "manual code list"
    }

    fn load(&self) -> CodeSet {
        if !self.path.exists() {
            debug!("no manual code list at {:?}", self.path);
            return CodeSet::new();
        }

        match fs::read_to_string(&self.path) {
            Ok(text) => extract_from_lines(&text),
            Err(err) => {
                warn!("failed to read manual code list {:?}: {}", self.path, err);
                CodeSet::new()
            }
        }
    }
}

/// Plain text previously extracted from the eligibility document (PDF)
pub struct DocumentTextFile {
    path: PathBuf,
}

impl DocumentTextFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DocumentTextFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CodeSource for DocumentTextFile {
    fn name(&self) -> &str {
        "eligibility document"
    }

    fn load(&self) -> CodeSet {
        match fs::read_to_string(&self.path) {
            Ok(text) => {
                info!("document text loaded: {} characters", text.len());
                extract(&text)
            }
            Err(err) => {
                warn!("eligibility document {:?} unavailable: {}", self.path, err);
                CodeSet::new()
            }
        }
    }
}

// ============================================================================
// SOURCE PRECEDENCE
// ============================================================================

/// Where the active codes came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeResolution {
    Manual(CodeSet),
    Document(CodeSet),
    /// Nothing usable: callers must not filter at all
    Unavailable,
}

impl CodeResolution {
    /// Active codes (empty when unavailable)
    pub fn codes(&self) -> CodeSet {
        match self {
            CodeResolution::Manual(codes) | CodeResolution::Document(codes) => codes.clone(),
            CodeResolution::Unavailable => CodeSet::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, CodeResolution::Unavailable)
    }

    pub fn origin(&self) -> &'static str {
        match self {
            CodeResolution::Manual(_) => "manual",
            CodeResolution::Document(_) => "document",
            CodeResolution::Unavailable => "none",
        }
    }
}

/// Resolve the active codes: manual list first, document only as fallback
pub fn obtain_codes(manual: &dyn CodeSource, document: &dyn CodeSource) -> CodeResolution {
    let codes = manual.load();
    if !codes.is_empty() {
        info!("{} codes loaded from {}", codes.len(), manual.name());
        return CodeResolution::Manual(codes);
    }

    let codes = document.load();
    if !codes.is_empty() {
        info!("{} codes loaded from {}", codes.len(), document.name());
        return CodeResolution::Document(codes);
    }

    warn!("no eligibility codes available, listings will not be filtered");
    CodeResolution::Unavailable
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FixedSource {
        codes: CodeSet,
        loads: Cell<usize>,
    }

    impl FixedSource {
        fn new(codes: &[&str]) -> Self {
            FixedSource {
                codes: code_set(codes.iter().copied()),
                loads: Cell::new(0),
            }
        }
    }

    impl CodeSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        fn load(&self) -> CodeSet {
            self.loads.set(self.loads.get() + 1);
            self.codes.clone()
        }
    }

    #[test]
    fn test_extract_dictionary_codes() {
        let text = "Habilitación: MAT, len y /EF para primaria";
        let codes = extract(text);

        assert!(codes.contains(&EligibilityCode::from("MAT")));
        assert!(codes.contains(&EligibilityCode::from("LEN")));
        assert!(codes.contains(&EligibilityCode::from("/EF")));
    }

    #[test]
    fn test_extract_normalizes_to_upper_case() {
        let codes = extract("mus");
        assert_eq!(codes, code_set(["MUS"]));
        assert_eq!(codes.iter().next().unwrap().as_str(), "MUS");
    }

    #[test]
    fn test_extract_rejects_long_runs() {
        let codes = extract("PRIMARIA SECUNDARIA ARTISTICA");
        assert!(codes.is_empty(), "5+ letter words are not codes: {:?}", codes);

        let codes = extract("ABCDE MAT");
        assert_eq!(codes, code_set(["MAT"]));
    }

    #[test]
    fn test_extract_accepts_generic_shape() {
        // Not in the dictionary, but shaped like a code
        let codes = extract("CCD APV /PR");
        assert_eq!(codes, code_set(["CCD", "APV", "/PR"]));
    }

    #[test]
    fn test_extract_ignores_tokens_glued_to_digits() {
        let codes = extract("MAT2 3LEN 2024");
        assert!(codes.is_empty());
    }

    #[test]
    fn test_extract_marker_with_long_run_keeps_letters() {
        let codes = extract("/ABCD");
        assert_eq!(codes, code_set(["ABCD"]));
    }

    #[test]
    fn test_extract_collapses_duplicates() {
        let codes = extract("MAT MAT mat Mat");
        assert_eq!(codes.len(), 1);
    }

    #[test]
    fn test_extract_never_fails_on_garbage() {
        assert!(extract("").is_empty());
        assert!(extract("12345 !!! ### ... ñññññ").is_empty());
    }

    #[test]
    fn test_extract_from_lines_basic() {
        let codes = extract_from_lines("mat\nlen\n# comment\n");
        assert_eq!(codes, code_set(["MAT", "LEN"]));
    }

    #[test]
    fn test_extract_from_lines_separators_and_prefixes() {
        let text = "\n  # my codes\nMAT, LEN  ART\n+3N,-7H\n/PR\n\n   #IGN\nX\nTOOLONG\n";
        let codes = extract_from_lines(text);

        assert_eq!(codes, code_set(["MAT", "LEN", "ART", "+3N", "-7H", "/PR"]));
    }

    #[test]
    fn test_manual_source_wins() {
        let manual = FixedSource::new(&["MAT"]);
        let document = FixedSource::new(&["LEN", "ART"]);

        let resolution = obtain_codes(&manual, &document);

        assert_eq!(resolution, CodeResolution::Manual(code_set(["MAT"])));
        assert_eq!(document.loads.get(), 0, "document must not be consulted");
    }

    #[test]
    fn test_document_fallback() {
        let manual = FixedSource::new(&[]);
        let document = FixedSource::new(&["LEN"]);

        let resolution = obtain_codes(&manual, &document);

        assert_eq!(resolution, CodeResolution::Document(code_set(["LEN"])));
        assert_eq!(resolution.origin(), "document");
    }

    #[test]
    fn test_no_codes_available() {
        let resolution = obtain_codes(&FixedSource::new(&[]), &FixedSource::new(&[]));

        assert_eq!(resolution, CodeResolution::Unavailable);
        assert!(!resolution.is_available());
        assert!(resolution.codes().is_empty());
    }

    #[test]
    fn test_file_sources() {
        let dir = tempfile::tempdir().unwrap();
        let manual_path = dir.path().join("codigos.txt");
        let document_path = dir.path().join("oblea.txt");

        fs::write(&document_path, "Habilitaciones: MAT\n").unwrap();

        let manual = ManualCodeFile::new(&manual_path);
        let document = DocumentTextFile::new(&document_path);
        assert_eq!(manual.path(), manual_path.as_path());
        assert_eq!(document.path(), document_path.as_path());

        // Missing manual list falls back to the document
        assert_eq!(
            obtain_codes(&manual, &document),
            CodeResolution::Document(code_set(["MAT"]))
        );

        fs::write(&manual_path, "# override\nart\n").unwrap();
        assert_eq!(
            obtain_codes(&manual, &document),
            CodeResolution::Manual(code_set(["ART"]))
        );
    }

    #[test]
    fn test_short_words_pass_shape_test() {
        // Any 2-4 letter word is taken as a code; categories still match exactly
        let codes = extract("Area: MAT\nNivel: PRIMARIA\n");
        assert_eq!(codes, code_set(["AREA", "MAT"]));
    }

    #[test]
    fn test_missing_document_is_empty() {
        let document = DocumentTextFile::new("/definitely/not/here/oblea.txt");
        assert!(document.load().is_empty());
    }
}
