//! Candidate scoring rubric.
//!
//! Signals are additive and applied identically for every strategy:
//!
//! | Signal | Points |
//! |---|---|
//! | Exact name match after normalization | +100 |
//! | Otherwise, one name contains the other | +50 |
//! | Each distinct shared keyword | +25 |
//! | Retrieved by known-reference lookup | +50 |
//! | A safetensors file is available | +5 |
//!
//! The keyword bonus is not capped.

use super::candidate::{SearchCandidate, Strategy};
use super::normalize::{normalize, NormalizedQuery};
use crate::registry::RegistryItem;

pub const EXACT_MATCH_POINTS: u32 = 100;
pub const PARTIAL_MATCH_POINTS: u32 = 50;
pub const KEYWORD_POINTS: u32 = 25;
pub const KNOWN_ID_POINTS: u32 = 50;
pub const SAFE_FORMAT_POINTS: u32 = 5;

/// Score an item name against a query.
pub fn score_name(query: &NormalizedQuery, item_name: &str, strategy: Strategy) -> u32 {
    let name = normalize(item_name);
    let mut score = 0;

    if !query.is_empty() && !name.is_empty() {
        if name.query == query.query {
            score += EXACT_MATCH_POINTS;
        } else if name.query.contains(&query.query) || query.query.contains(&name.query) {
            score += PARTIAL_MATCH_POINTS;
        }
    }

    let shared = query.keywords().intersection(&name.keywords()).count() as u32;
    score += shared * KEYWORD_POINTS;

    if strategy == Strategy::KnownId {
        score += KNOWN_ID_POINTS;
    }

    score
}

/// Score a registry item, including format preference.
pub fn score_item(query: &NormalizedQuery, item: &RegistryItem, strategy: Strategy) -> u32 {
    let mut score = score_name(query, &item.name, strategy);
    if item.has_safe_format() {
        score += SAFE_FORMAT_POINTS;
    }
    score
}

/// Turn a registry item into a scored candidate.
pub fn score_candidate(
    query: &NormalizedQuery,
    item: RegistryItem,
    strategy: Strategy,
    version_id: Option<u64>,
) -> SearchCandidate {
    let score = score_item(query, &item, strategy);
    SearchCandidate::new(item, strategy, score, version_id)
}
