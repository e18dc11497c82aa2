//! Merge, deduplicate and rank candidates.

use super::candidate::SearchCandidate;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Default length cap for ranked output.
pub const DEFAULT_RESULT_LIMIT: usize = 10;

/// Deduplicate by registry id and sort best-first.
///
/// The first-seen candidate keeps its metadata and strategy; a later
/// duplicate only contributes a higher score. Ties break on download count,
/// then most recent publish date, then ascending id.
pub fn rank(candidates: Vec<SearchCandidate>, limit: usize) -> Vec<SearchCandidate> {
    let mut merged: Vec<SearchCandidate> = Vec::with_capacity(candidates.len());
    let mut index: HashMap<u64, usize> = HashMap::new();

    for candidate in candidates {
        match index.get(&candidate.model_id()) {
            Some(&pos) => merged[pos].keep_higher_score(&candidate),
            None => {
                index.insert(candidate.model_id(), merged.len());
                merged.push(candidate);
            }
        }
    }

    merged.sort_by(compare);
    merged.truncate(limit);
    merged
}

/// Best-first ordering.
pub fn compare(a: &SearchCandidate, b: &SearchCandidate) -> Ordering {
    b.score()
        .cmp(&a.score())
        .then_with(|| b.item().download_count().cmp(&a.item().download_count()))
        .then_with(|| b.item().latest_published().cmp(&a.item().latest_published()))
        .then_with(|| a.model_id().cmp(&b.model_id()))
}
