//! Search diagnostics.
//!
//! Re-runs every cascade stage without the sufficiency cut-off, captures what
//! each one returned, and classifies why a search under- or over-matched.

use super::cascade::{ResolveRequest, Stage, StageContext, StageExecution};
use super::known::KnownReferences;
use super::normalize::{keywords, normalize, NormalizedQuery};
use super::tags::extract_tags;
use crate::error::ResolverError;
use crate::registry::{ModelRegistry, RegistryItem};
use serde::Serialize;
use std::time::Instant;
use tracing::info;

/// Classified outcome of a diagnostic run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Diagnosis {
    NoResults,
    ResultsMismatched,
    ApiFailure,
    Success,
}

impl Diagnosis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Diagnosis::NoResults => "no-results",
            Diagnosis::ResultsMismatched => "results-mismatched",
            Diagnosis::ApiFailure => "api-failure",
            Diagnosis::Success => "success",
        }
    }
}

impl std::fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageError {
    pub reason: String,
    pub message: String,
    pub timed_out: bool,
}

/// What one stage did during a diagnostic run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// 200 for any successful response, the registry status for HTTP errors,
    /// absent when no response arrived.
    pub http_status: Option<u16>,
    pub item_count: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl StageReport {
    /// A failure that is neither a timeout nor a skip.
    pub fn is_api_failure(&self) -> bool {
        self.error.as_ref().is_some_and(|e| !e.timed_out)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub reference: String,
    pub query: String,
    pub stages: Vec<StageReport>,
    pub total_items: usize,
    pub diagnosis: Diagnosis,
    /// Ordered remediation suggestions, most useful first.
    pub suggestions: Vec<String>,
}

/// Classify stage reports. `items` are every item returned across stages.
///
/// Precedence: api-failure, then no-results, then results-mismatched.
pub fn classify(
    stages: &[StageReport],
    items: &[RegistryItem],
    query: &NormalizedQuery,
) -> Diagnosis {
    if stages.iter().any(StageReport::is_api_failure) {
        return Diagnosis::ApiFailure;
    }
    if items.is_empty() {
        return Diagnosis::NoResults;
    }
    let query_keywords = query.keywords();
    let any_shared = items
        .iter()
        .any(|item| !keywords(&item.name).is_disjoint(&query_keywords));
    if any_shared {
        Diagnosis::Success
    } else {
        Diagnosis::ResultsMismatched
    }
}

/// Remediation suggestions for a diagnosis.
pub fn suggestions(
    diagnosis: Diagnosis,
    stages: &[StageReport],
    query: &NormalizedQuery,
) -> Vec<String> {
    let mut out = Vec::new();
    match diagnosis {
        Diagnosis::NoResults => {
            out.push(
                "Use a direct identifier lookup: find the model page by hand and download \
                 by model id, then record it as a known reference"
                    .to_string(),
            );
            let tags = extract_tags(&query.query, None);
            if tags.is_empty() {
                out.push("Try alternate tags describing the model's style or subject".to_string());
            } else {
                out.push(format!("Try alternate tags (current: {})", tags.join(", ")));
            }
            if query.hints.iter().any(|h| h.starts_with("version:")) {
                out.push("Drop the version suffix from the query".to_string());
            }
        }
        Diagnosis::ResultsMismatched => {
            out.push(
                "Search by creator: pass the author's username to run a creator-based query"
                    .to_string(),
            );
            out.push("Rephrase the query using the registry's naming for this model".to_string());
        }
        Diagnosis::ApiFailure => {
            for report in stages.iter().filter(|r| r.is_api_failure()) {
                let status = report
                    .http_status
                    .map(|s| format!("HTTP {}", s))
                    .unwrap_or_else(|| "no response".to_string());
                let message = report
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or_default();
                out.push(format!("Stage {} failed with {}: {}", report.stage, status, message));
            }
            out.push("Check registry availability and the configured API token".to_string());
        }
        Diagnosis::Success => {}
    }

    let timeouts = stages
        .iter()
        .filter(|r| r.error.as_ref().is_some_and(|e| e.timed_out))
        .count();
    if timeouts > 0 {
        out.push(format!("{} stage(s) timed out; retry later", timeouts));
    }
    out
}

/// Runs every stage independently and produces a [`DiagnosticReport`].
pub struct DiagnosticsReporter<'a> {
    registry: &'a dyn ModelRegistry,
    known: &'a KnownReferences,
    limit: u32,
}

impl<'a> DiagnosticsReporter<'a> {
    pub fn new(registry: &'a dyn ModelRegistry, known: &'a KnownReferences, limit: u32) -> Self {
        Self {
            registry,
            known,
            limit,
        }
    }

    pub async fn run(&self, request: &ResolveRequest) -> DiagnosticReport {
        let query = normalize(&request.reference);
        let ctx = StageContext {
            registry: self.registry,
            known: self.known,
            request,
            query: &query,
            limit: self.limit,
        };

        let mut items: Vec<RegistryItem> = Vec::new();
        let mut stages = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            let started = Instant::now();
            let execution = ctx.execute(stage, &items).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let report = match execution {
                StageExecution::Items(found) => {
                    let item_count = found.len();
                    items.extend(found.into_iter().map(|(item, _)| item));
                    StageReport {
                        stage,
                        http_status: Some(200),
                        item_count,
                        elapsed_ms,
                        error: None,
                        skipped: None,
                    }
                }
                StageExecution::Failed(e) => StageReport {
                    stage,
                    http_status: e.http_status(),
                    item_count: 0,
                    elapsed_ms,
                    error: Some(StageError {
                        reason: e.reason().to_string(),
                        message: e.to_string(),
                        timed_out: matches!(e, ResolverError::Timeout(_)),
                    }),
                    skipped: None,
                },
                StageExecution::Skipped(why) => StageReport {
                    stage,
                    http_status: None,
                    item_count: 0,
                    elapsed_ms,
                    error: None,
                    skipped: Some(why),
                },
            };
            stages.push(report);
        }

        let diagnosis = classify(&stages, &items, &query);
        let suggestions = suggestions(diagnosis, &stages, &query);
        info!(
            "Diagnosis for '{}': {} ({} item(s) across {} stage(s))",
            query.display,
            diagnosis,
            items.len(),
            stages.len()
        );

        DiagnosticReport {
            reference: request.reference.clone(),
            query: query.query,
            stages,
            total_items: items.len(),
            diagnosis,
            suggestions,
        }
    }
}
