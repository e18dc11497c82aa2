//! Reference resolution.
//!
//! Pipeline: [`normalize`] → known-reference lookup and [`SearchCascade`]
//! (with [`extract_tags`] feeding the tag stage) → [`scoring`] → [`rank`] →
//! selection.
//!
//! [`Resolver`] owns the long-lived pieces (registry handle, read-only
//! known-reference mapping, cascade limits). It holds no mutable state, so
//! independent resolutions can run concurrently on clones.

pub mod candidate;
pub mod cascade;
pub mod diagnostics;
pub mod known;
pub mod normalize;
pub mod ranking;
pub mod scoring;
pub mod selector;
pub mod tags;

pub use candidate::{ConfidenceTier, SearchCandidate, Strategy};
pub use cascade::{CascadeOutcome, ResolveRequest, SearchCascade, Stage, StageOutcome, StageRecord};
pub use diagnostics::{DiagnosticReport, Diagnosis, DiagnosticsReporter, StageReport};
pub use known::{KnownReferenceEntry, KnownReferenceStore, KnownReferences, UpsertOutcome};
pub use normalize::{normalize, NormalizedQuery};
pub use ranking::rank;
pub use selector::{
    interactive_select, select, top_result, SelectionCommand, SelectionMode, SelectionOutcome,
    SelectionPrompt,
};
pub use tags::extract_tags;

use crate::config::CascadeConfig;
use crate::error::{ResolverError, Result};
use crate::registry::ModelRegistry;
use std::sync::Arc;
use tracing::{debug, info};

/// Ranked candidates for one reference.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub query: NormalizedQuery,
    /// Deduplicated, best-first, capped at the configured limit.
    pub candidates: Vec<SearchCandidate>,
    pub stages: Vec<StageRecord>,
}

impl Resolution {
    pub fn top(&self) -> Option<&SearchCandidate> {
        top_result(&self.candidates)
    }
}

/// Resolves references against a registry.
#[derive(Clone)]
pub struct Resolver {
    registry: Arc<dyn ModelRegistry>,
    known: Arc<KnownReferences>,
    config: CascadeConfig,
}

impl Resolver {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        known: Arc<KnownReferences>,
        config: CascadeConfig,
    ) -> Self {
        Self {
            registry,
            known,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<dyn ModelRegistry> {
        &self.registry
    }

    pub fn known(&self) -> &KnownReferences {
        &self.known
    }

    /// Run the cascade and rank its output.
    pub async fn resolve(&self, request: &ResolveRequest) -> Resolution {
        let outcome = SearchCascade::new(self.registry.as_ref(), &self.known, &self.config)
            .run(request)
            .await;
        debug!(
            "Cascade for '{}' collected {} candidate(s)",
            outcome.query.display,
            outcome.candidates.len()
        );

        let candidates = rank(outcome.candidates, self.config.result_limit);
        if let Some(top) = candidates.first() {
            info!(
                "Resolved '{}' -> {} (id {}, score {}, {})",
                outcome.query.display,
                top.name(),
                top.model_id(),
                top.score(),
                top.tier()
            );
        }

        Resolution {
            query: outcome.query,
            candidates,
            stages: outcome.stages,
        }
    }

    /// Resolve and return the top candidate only when it is high confidence
    /// or comes from a confirmed known reference.
    ///
    /// Returns `NotFound` when nothing matched and `AmbiguousMatch` when the
    /// best match needs a manual decision.
    pub async fn resolve_confident(&self, request: &ResolveRequest) -> Result<SearchCandidate> {
        let resolution = self.resolve(request).await;
        match resolution.top() {
            None => Err(ResolverError::NotFound(request.reference.clone())),
            Some(top) if top.tier() == ConfidenceTier::High => Ok(top.clone()),
            Some(top) if top.strategy() == Strategy::KnownId => Ok(top.clone()),
            Some(_) => Err(ResolverError::AmbiguousMatch {
                reference: request.reference.clone(),
                candidates: resolution.candidates.len(),
            }),
        }
    }

    /// Re-run every stage and classify the search.
    pub async fn diagnose(&self, request: &ResolveRequest) -> DiagnosticReport {
        DiagnosticsReporter::new(
            self.registry.as_ref(),
            &self.known,
            self.config.per_stage_limit,
        )
        .run(request)
        .await
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("known_references", &self.known.len())
            .field("config", &self.config)
            .finish()
    }
}
