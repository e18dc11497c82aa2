//! Scored search candidates.

use crate::registry::RegistryItem;
use serde::{Deserialize, Serialize};

/// Search strategy that produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    KnownId,
    ExactQuery,
    UnfilteredQuery,
    TagQuery,
    CreatorQuery,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::KnownId => "known-id",
            Strategy::ExactQuery => "exact-query",
            Strategy::UnfilteredQuery => "unfiltered-query",
            Strategy::TagQuery => "tag-query",
            Strategy::CreatorQuery => "creator-query",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse confidence bucket derived from a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    pub const HIGH_THRESHOLD: u32 = 90;
    pub const MEDIUM_THRESHOLD: u32 = 60;

    pub fn from_score(score: u32) -> Self {
        if score >= Self::HIGH_THRESHOLD {
            ConfidenceTier::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registry item proposed as a match for a reference.
///
/// Built only by the scorer; identity is the registry model id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchCandidate {
    model_id: u64,
    name: String,
    strategy: Strategy,
    score: u32,
    tier: ConfidenceTier,
    /// Version pinned by a known-reference entry.
    version_id: Option<u64>,
    item: RegistryItem,
}

impl SearchCandidate {
    pub(crate) fn new(
        item: RegistryItem,
        strategy: Strategy,
        score: u32,
        version_id: Option<u64>,
    ) -> Self {
        Self {
            model_id: item.id,
            name: item.name.clone(),
            strategy,
            score,
            tier: ConfidenceTier::from_score(score),
            version_id,
            item,
        }
    }

    pub fn model_id(&self) -> u64 {
        self.model_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn tier(&self) -> ConfidenceTier {
        self.tier
    }

    pub fn version_id(&self) -> Option<u64> {
        self.version_id
    }

    /// Raw registry metadata.
    pub fn item(&self) -> &RegistryItem {
        &self.item
    }

    /// Raise the score when the same item was found again with a better one.
    pub(crate) fn keep_higher_score(&mut self, other: &SearchCandidate) {
        if other.score > self.score {
            self.score = other.score;
            self.tier = other.tier;
        }
        if self.version_id.is_none() {
            self.version_id = other.version_id;
        }
    }
}
