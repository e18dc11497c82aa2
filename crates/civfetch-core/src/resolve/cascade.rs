//! Search strategy cascade.
//!
//! Stages run strictly in order: known-reference lookup, filtered exact
//! query, unfiltered exact query, tag query, creator query. A known
//! reference that resolves ends the cascade: every search stage is recorded
//! as skipped. Otherwise, before each stage the accumulated candidates are
//! checked against the sufficiency threshold; once it is met the remaining
//! stages are recorded as skipped and never hit the network. A failing
//! stage is recorded and the cascade moves on.

use super::candidate::{ConfidenceTier, SearchCandidate, Strategy};
use super::known::KnownReferences;
use super::normalize::{keywords, normalize, NormalizedQuery};
use super::scoring::score_candidate;
use super::tags::extract_tags;
use crate::config::CascadeConfig;
use crate::error::ResolverError;
use crate::kind::ModelKind;
use crate::registry::{ModelRegistry, RegistryItem, SearchParams};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, warn};

/// One step of the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    KnownLookup,
    ExactFiltered,
    ExactUnfiltered,
    TagQuery,
    CreatorQuery,
}

impl Stage {
    /// Stages in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::KnownLookup,
        Stage::ExactFiltered,
        Stage::ExactUnfiltered,
        Stage::TagQuery,
        Stage::CreatorQuery,
    ];

    /// Strategy stamped on candidates this stage produces.
    pub fn strategy(&self) -> Strategy {
        match self {
            Stage::KnownLookup => Strategy::KnownId,
            Stage::ExactFiltered => Strategy::ExactQuery,
            Stage::ExactUnfiltered => Strategy::UnfilteredQuery,
            Stage::TagQuery => Strategy::TagQuery,
            Stage::CreatorQuery => Strategy::CreatorQuery,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::KnownLookup => "known-lookup",
            Stage::ExactFiltered => "exact-filtered",
            Stage::ExactUnfiltered => "exact-unfiltered",
            Stage::TagQuery => "tag-query",
            Stage::CreatorQuery => "creator-query",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to resolve plus the collaborator's hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveRequest {
    pub reference: String,
    /// Expected type; chooses the destination subdirectory only.
    pub kind: Option<ModelKind>,
    /// Creator username to search when earlier stages find no creator.
    pub creator: Option<String>,
}

impl ResolveRequest {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: ModelKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }
}

/// What happened in one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum StageOutcome {
    Completed {
        item_count: usize,
    },
    Failed {
        reason: String,
        status: Option<u16>,
        message: String,
    },
    Skipped {
        why: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    #[serde(flatten)]
    pub outcome: StageOutcome,
    pub elapsed_ms: u64,
}

/// Unsorted union of candidates plus a record per stage.
#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    pub query: NormalizedQuery,
    pub candidates: Vec<SearchCandidate>,
    pub stages: Vec<StageRecord>,
}

/// Items returned by a stage, with the version a known entry pins.
pub(crate) type StageItems = Vec<(RegistryItem, Option<u64>)>;

/// Raw result of executing one stage.
pub(crate) enum StageExecution {
    Items(StageItems),
    Failed(ResolverError),
    Skipped(String),
}

/// Inputs shared by every stage of one run.
pub(crate) struct StageContext<'a> {
    pub registry: &'a dyn ModelRegistry,
    pub known: &'a KnownReferences,
    pub request: &'a ResolveRequest,
    pub query: &'a NormalizedQuery,
    pub limit: u32,
}

impl StageContext<'_> {
    /// Execute one stage. `prior` holds items returned by earlier stages of
    /// the same run and feeds the creator stage.
    pub(crate) async fn execute(&self, stage: Stage, prior: &[RegistryItem]) -> StageExecution {
        if self.query.is_empty() && stage != Stage::CreatorQuery {
            return StageExecution::Skipped("empty query".to_string());
        }

        let params = match stage {
            Stage::KnownLookup => return self.known_lookup().await,
            Stage::ExactFiltered => SearchParams {
                query: Some(self.query.query.clone()),
                nsfw: Some(false),
                limit: self.limit,
                ..Default::default()
            },
            Stage::ExactUnfiltered => SearchParams::query(self.query.query.clone(), self.limit),
            Stage::TagQuery => {
                let tags = extract_tags(&self.query.query, None);
                match tags.into_iter().next() {
                    Some(tag) => SearchParams {
                        tag: Some(tag),
                        limit: self.limit,
                        ..Default::default()
                    },
                    None => return StageExecution::Skipped("no topical tags".to_string()),
                }
            }
            Stage::CreatorQuery => match self.creator_for(prior) {
                Some(username) => SearchParams {
                    username: Some(username),
                    limit: self.limit,
                    ..Default::default()
                },
                None => return StageExecution::Skipped("no creator known".to_string()),
            },
        };

        match self.registry.search(&params).await {
            Ok(items) => StageExecution::Items(items.into_iter().map(|i| (i, None)).collect()),
            Err(e) => StageExecution::Failed(e),
        }
    }

    async fn known_lookup(&self) -> StageExecution {
        let Some(entry) = self.known.get(&self.query.query) else {
            return StageExecution::Skipped("no known reference".to_string());
        };
        match self.registry.model_by_id(entry.model_id).await {
            Ok(item) => StageExecution::Items(vec![(item, entry.version_id)]),
            Err(e) => StageExecution::Failed(e),
        }
    }

    /// Explicit hint first, then the creator of the first earlier item that
    /// shares a keyword with the query.
    fn creator_for(&self, prior: &[RegistryItem]) -> Option<String> {
        if let Some(ref creator) = self.request.creator {
            let creator = creator.trim();
            if !creator.is_empty() {
                return Some(creator.to_string());
            }
        }
        let query_keywords = self.query.keywords();
        prior
            .iter()
            .filter(|item| !keywords(&item.name).is_disjoint(&query_keywords))
            .find_map(|item| item.creator_name().map(String::from))
    }
}

/// Sequential multi-strategy search.
pub struct SearchCascade<'a> {
    registry: &'a dyn ModelRegistry,
    known: &'a KnownReferences,
    config: &'a CascadeConfig,
}

impl<'a> SearchCascade<'a> {
    pub fn new(
        registry: &'a dyn ModelRegistry,
        known: &'a KnownReferences,
        config: &'a CascadeConfig,
    ) -> Self {
        Self {
            registry,
            known,
            config,
        }
    }

    /// Run stages until the sufficiency threshold is reached.
    pub async fn run(&self, request: &ResolveRequest) -> CascadeOutcome {
        let query = normalize(&request.reference);
        let ctx = StageContext {
            registry: self.registry,
            known: self.known,
            request,
            query: &query,
            limit: self.config.per_stage_limit,
        };

        let mut candidates: Vec<SearchCandidate> = Vec::new();
        let mut seen_items: Vec<RegistryItem> = Vec::new();
        let mut stages = Vec::with_capacity(Stage::ALL.len());

        let mut known_hit = false;

        for stage in Stage::ALL {
            let skip_reason = if known_hit {
                Some("known reference")
            } else if self.is_sufficient(&candidates) {
                Some("sufficiency reached")
            } else {
                None
            };
            if let Some(why) = skip_reason {
                stages.push(StageRecord {
                    stage,
                    outcome: StageOutcome::Skipped {
                        why: why.to_string(),
                    },
                    elapsed_ms: 0,
                });
                continue;
            }

            let started = Instant::now();
            let execution = ctx.execute(stage, &seen_items).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let outcome = match execution {
                StageExecution::Items(items) => {
                    debug!("Stage {} returned {} item(s)", stage, items.len());
                    let item_count = items.len();
                    known_hit = stage == Stage::KnownLookup && item_count > 0;
                    for (item, version_id) in items {
                        seen_items.push(item.clone());
                        candidates.push(score_candidate(
                            &query,
                            item,
                            stage.strategy(),
                            version_id,
                        ));
                    }
                    StageOutcome::Completed { item_count }
                }
                StageExecution::Failed(e) => {
                    warn!("Stage {} failed for '{}': {}", stage, query.display, e);
                    StageOutcome::Failed {
                        reason: e.reason().to_string(),
                        status: e.http_status(),
                        message: e.to_string(),
                    }
                }
                StageExecution::Skipped(why) => StageOutcome::Skipped { why },
            };

            stages.push(StageRecord {
                stage,
                outcome,
                elapsed_ms,
            });
        }

        CascadeOutcome {
            query,
            candidates,
            stages,
        }
    }

    fn is_sufficient(&self, candidates: &[SearchCandidate]) -> bool {
        let mut all = HashSet::new();
        let mut high = HashSet::new();
        for c in candidates {
            all.insert(c.model_id());
            if c.tier() == ConfidenceTier::High {
                high.insert(c.model_id());
            }
        }
        high.len() >= self.config.high_tier_stop || all.len() >= self.config.total_stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::resolve::known::KnownReferenceEntry;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Frozen registry that records every call.
    #[derive(Default)]
    struct Scripted {
        search_items: Vec<RegistryItem>,
        fail_searches: bool,
        calls: Mutex<Vec<String>>,
    }

    fn item(id: u64, name: &str, creator: &str) -> RegistryItem {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": name,
            "creator": {"username": creator}
        }))
        .unwrap()
    }

    #[async_trait]
    impl ModelRegistry for Scripted {
        async fn search(&self, params: &SearchParams) -> Result<Vec<RegistryItem>> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("search:{}", params.to_query_string()));
            if self.fail_searches {
                return Err(ResolverError::Registry {
                    endpoint: "/models".into(),
                    status: 503,
                });
            }
            Ok(self.search_items.clone())
        }

        async fn model_by_id(&self, model_id: u64) -> Result<RegistryItem> {
            self.calls.lock().unwrap().push(format!("model:{}", model_id));
            Ok(item(model_id, "Better Detailed Anatomy v3", "anatomist"))
        }

        fn download_url(&self, version_id: u64) -> String {
            format!("http://registry.test/{}", version_id)
        }
    }

    #[tokio::test]
    async fn test_known_hit_stops_cascade() {
        let registry = Scripted::default();
        let known = KnownReferences::from_entries([(
            "better detailed anatomy v3",
            KnownReferenceEntry {
                model_id: 1091495,
                version_id: Some(1226600),
                notes: String::new(),
            },
        )]);
        let config = CascadeConfig::default();

        let outcome = SearchCascade::new(&registry, &known, &config)
            .run(&ResolveRequest::new("Better_Detailed_Anatomy_v3.safetensors"))
            .await;

        assert_eq!(*registry.calls.lock().unwrap(), vec!["model:1091495"]);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].version_id(), Some(1226600));
        assert!(outcome.stages[1..].iter().all(
            |r| matches!(r.outcome, StageOutcome::Skipped { ref why } if why == "known reference")
        ));
    }

    #[tokio::test]
    async fn test_known_hit_with_different_registry_name_skips_search() {
        let registry = Scripted::default();
        let known = KnownReferences::from_entries([(
            "add_detail.safetensors",
            KnownReferenceEntry {
                model_id: 58390,
                version_id: None,
                notes: String::new(),
            },
        )]);
        let config = CascadeConfig::default();

        let outcome = SearchCascade::new(&registry, &known, &config)
            .run(&ResolveRequest::new("add_detail.safetensors"))
            .await;

        assert_eq!(*registry.calls.lock().unwrap(), vec!["model:58390"]);
        assert_eq!(outcome.candidates.len(), 1);
        assert_ne!(outcome.candidates[0].tier(), ConfidenceTier::High);
        assert_eq!(outcome.candidates[0].strategy(), Strategy::KnownId);
    }

    #[tokio::test]
    async fn test_stage_failures_do_not_abort() {
        let registry = Scripted {
            fail_searches: true,
            ..Default::default()
        };
        let known = KnownReferences::empty();
        let config = CascadeConfig::default();

        let outcome = SearchCascade::new(&registry, &known, &config)
            .run(&ResolveRequest::new("detail tweaker").with_creator("someone"))
            .await;

        assert!(outcome.candidates.is_empty());
        let failed = outcome
            .stages
            .iter()
            .filter(|r| matches!(r.outcome, StageOutcome::Failed { status: Some(503), .. }))
            .count();
        // filtered, unfiltered, tag ("detail"), creator
        assert_eq!(failed, 4);
        assert!(matches!(
            outcome.stages[0].outcome,
            StageOutcome::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_filtered_stage_sends_content_filter_only() {
        let registry = Scripted::default();
        let known = KnownReferences::empty();
        let config = CascadeConfig::default();

        SearchCascade::new(&registry, &known, &config)
            .run(&ResolveRequest::new("add detail").with_kind(ModelKind::Lora))
            .await;

        let calls = registry.calls.lock().unwrap();
        let sort = "sort=Most%20Downloaded";
        assert_eq!(calls[0], format!("search:query=add%20detail&nsfw=false&limit=20&{}", sort));
        assert_eq!(calls[1], format!("search:query=add%20detail&limit=20&{}", sort));
        assert!(calls[2].contains("tag=detail"));
    }

    #[tokio::test]
    async fn test_total_threshold_stops_after_enough_items() {
        let registry = Scripted {
            search_items: (1..=6).map(|i| item(i, &format!("Unrelated {}", i), "x")).collect(),
            ..Default::default()
        };
        let known = KnownReferences::empty();
        let config = CascadeConfig::default();

        let outcome = SearchCascade::new(&registry, &known, &config)
            .run(&ResolveRequest::new("detail tweaker"))
            .await;

        assert_eq!(registry.calls.lock().unwrap().len(), 1);
        assert_eq!(outcome.candidates.len(), 6);
    }

    #[tokio::test]
    async fn test_creator_taken_from_earlier_matching_item() {
        let registry = Scripted {
            search_items: vec![
                item(1, "Pony Diffusion", "ponyguy"),
                item(2, "Detail Slider", "slidermaker"),
            ],
            ..Default::default()
        };
        let known = KnownReferences::empty();
        let config = CascadeConfig {
            total_stop: 100,
            ..Default::default()
        };

        let outcome = SearchCascade::new(&registry, &known, &config)
            .run(&ResolveRequest::new("detail tweaker"))
            .await;

        let calls = registry.calls.lock().unwrap();
        assert_eq!(
            calls.last().unwrap(),
            "search:username=slidermaker&limit=20&sort=Most%20Downloaded"
        );
        assert_eq!(outcome.stages.len(), 5);
    }
}
