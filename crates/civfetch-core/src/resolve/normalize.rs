//! Reference normalization.
//!
//! Turns a raw filename or free-text reference into a search term plus hint
//! tokens. Pure and deterministic; normalizing an already-normalized query
//! yields the same query.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Model file extensions stripped from references.
pub const MODEL_EXTENSIONS: &[&str] = &[
    ".safetensors",
    ".ckpt",
    ".pt",
    ".pth",
    ".bin",
    ".gguf",
    ".onnx",
    ".sft",
    ".pkl",
];

/// Words that carry no identifying signal in model names.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "model", "models", "version", "lora", "checkpoint",
    "final", "pruned", "fp16", "fp32", "bf16", "emaonly", "safetensors",
];

/// Minimum keyword length.
pub const MIN_KEYWORD_LEN: usize = 3;

static VERSION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v\d+(\.\d+)*$").expect("valid version regex"));

/// Known base-model families and the tokens that suggest them.
const FAMILY_MARKERS: &[(&str, &[&str])] = &[
    ("sdxl", &["sdxl", "xl"]),
    ("sd15", &["sd15", "sd1.5", "sd1", "1.5"]),
    ("sd3", &["sd3", "sd3.5"]),
    ("flux", &["flux", "flux1", "flux.1"]),
    ("pony", &["pony", "pdxl"]),
    ("illustrious", &["illustrious", "ilxl"]),
];

/// A normalized reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    /// Lower-cased comparison form.
    pub query: String,
    /// Original-case display form.
    pub display: String,
    /// Hint tokens such as `family:sdxl` or `version:v3`.
    pub hints: BTreeSet<String>,
}

impl NormalizedQuery {
    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }

    /// Suspected base-model family, if any hint names one.
    pub fn family(&self) -> Option<&str> {
        self.hints.iter().find_map(|h| h.strip_prefix("family:"))
    }

    /// Distinct keywords of the query.
    pub fn keywords(&self) -> BTreeSet<String> {
        keywords(&self.query)
    }
}

/// Normalize a raw reference.
///
/// # Examples
///
/// ```
/// use civfetch_core::resolve::normalize;
///
/// let q = normalize("Better_Detailed_Anatomy_v3.safetensors");
/// assert_eq!(q.query, "better detailed anatomy v3");
/// assert_eq!(q.display, "Better Detailed Anatomy v3");
/// ```
pub fn normalize(raw: &str) -> NormalizedQuery {
    let display = canonical_display(raw);
    let query = display.to_lowercase();
    let hints = extract_hints(&query);

    NormalizedQuery {
        query,
        display,
        hints,
    }
}

/// Strip extensions, turn separators into spaces and collapse whitespace
/// until nothing changes.
fn canonical_display(raw: &str) -> String {
    let mut current = collapse(raw);
    while let Some(stripped) = strip_extension(&current) {
        current = collapse(stripped);
    }
    current
}

fn collapse(s: &str) -> String {
    s.replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_extension(s: &str) -> Option<&str> {
    let lower = s.to_lowercase();
    MODEL_EXTENSIONS
        .iter()
        .find(|ext| lower.ends_with(*ext) && lower.len() >= ext.len())
        .and_then(|ext| s.get(..s.len() - ext.len()))
}

fn extract_hints(query: &str) -> BTreeSet<String> {
    let mut hints = BTreeSet::new();
    for token in query.split_whitespace() {
        if VERSION_TOKEN.is_match(token) {
            hints.insert(format!("version:{}", token));
        }
        for (family, markers) in FAMILY_MARKERS {
            if markers.contains(&token) {
                hints.insert(format!("family:{}", family));
            }
        }
    }
    hints
}

/// Tokenize text into distinct lower-case keywords, dropping stop words and
/// tokens shorter than [`MIN_KEYWORD_LEN`].
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_KEYWORD_LEN)
        .filter(|t| !STOP_WORDS.contains(t))
        .map(String::from)
        .collect()
}
