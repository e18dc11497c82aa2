//! Integration tests for reference resolution against a frozen registry.

mod common;

use civfetch_core::download::DownloadExecutor;
use civfetch_core::resolve::{normalize, Stage, StageOutcome};
use civfetch_core::{
    ConfidenceTier, Diagnosis, DownloadTarget, KnownReferenceEntry, KnownReferenceStore,
    KnownReferences, ModelKind, ResolveRequest, Resolver, ResolverConfig, Strategy,
};
use common::FrozenRegistry;
use std::sync::Arc;
use tempfile::TempDir;

fn resolver_with(registry: Arc<FrozenRegistry>, known: KnownReferences) -> Resolver {
    Resolver::new(registry, Arc::new(known), ResolverConfig::default().cascade)
}

fn anatomy_known() -> KnownReferences {
    KnownReferences::from_entries([(
        "Better_Detailed_Anatomy_v3.safetensors",
        KnownReferenceEntry {
            model_id: 1091495,
            version_id: Some(1226600),
            notes: "confirmed by hand".to_string(),
        },
    )])
}

#[tokio::test]
async fn test_known_reference_resolves_without_searching() {
    let registry = Arc::new(FrozenRegistry::from_fixture());
    let resolver = resolver_with(registry.clone(), anatomy_known());

    let resolution = resolver
        .resolve(&ResolveRequest::new("Better_Detailed_Anatomy_v3.safetensors"))
        .await;

    let top = resolution.top().expect("a candidate");
    assert_eq!(top.model_id(), 1091495);
    assert_eq!(top.tier(), ConfidenceTier::High);
    assert_eq!(top.strategy(), Strategy::KnownId);
    assert!(top.score() >= 150);
    assert_eq!(top.version_id(), Some(1226600));
    assert_eq!(registry.calls(), vec!["model/1091495".to_string()]);
}

#[tokio::test]
async fn test_ranking_is_stable_across_runs() {
    let registry = Arc::new(FrozenRegistry::from_fixture());
    let resolver = resolver_with(registry, KnownReferences::empty());
    let request = ResolveRequest::new("detail_tweaker");

    let first = resolver.resolve(&request).await;
    let second = resolver.resolve(&request).await;

    let order = |r: &civfetch_core::Resolution| {
        r.candidates
            .iter()
            .map(|c| (c.model_id(), c.score()))
            .collect::<Vec<_>>()
    };
    assert_eq!(order(&first), order(&second));
    // Equal scores: the more downloaded model ranks first.
    assert_eq!(
        first.candidates.iter().map(|c| c.model_id()).collect::<Vec<_>>(),
        vec![58390, 122359]
    );
}

#[tokio::test]
async fn test_cascade_stops_once_a_high_tier_candidate_exists() {
    let registry = Arc::new(FrozenRegistry::from_fixture());
    let resolver = resolver_with(registry.clone(), KnownReferences::empty());

    let resolution = resolver.resolve(&ResolveRequest::new("detail tweaker")).await;

    assert_eq!(registry.calls().len(), 1);
    let skipped_after: Vec<Stage> = resolution
        .stages
        .iter()
        .filter(|r| {
            matches!(r.outcome, StageOutcome::Skipped { ref why } if why == "sufficiency reached")
        })
        .map(|r| r.stage)
        .collect();
    assert_eq!(
        skipped_after,
        vec![Stage::ExactUnfiltered, Stage::TagQuery, Stage::CreatorQuery]
    );
}

#[tokio::test]
async fn test_medium_confidence_requires_manual_selection() {
    let registry = Arc::new(FrozenRegistry::from_fixture());
    let resolver = resolver_with(registry.clone(), KnownReferences::empty());

    let err = resolver
        .resolve_confident(&ResolveRequest::new("tweaker"))
        .await
        .unwrap_err();

    assert_eq!(err.reason(), "ambiguous-match");
    // The creator stage found the author from earlier matches.
    assert!(registry
        .calls()
        .iter()
        .any(|c| c.starts_with("search?username=tweakmaster")));
}

#[tokio::test]
async fn test_type_hint_does_not_change_search_or_ranking() {
    let hinted_registry = Arc::new(FrozenRegistry::from_fixture());
    let plain_registry = Arc::new(FrozenRegistry::from_fixture());
    let hinted = resolver_with(hinted_registry.clone(), KnownReferences::empty());
    let plain = resolver_with(plain_registry.clone(), KnownReferences::empty());

    // A wrong hint must not hide the checkpoint.
    let with_kind = hinted
        .resolve(&ResolveRequest::new("pony diffusion").with_kind(ModelKind::Lora))
        .await;
    let without_kind = plain.resolve(&ResolveRequest::new("pony diffusion")).await;

    assert_eq!(hinted_registry.calls(), plain_registry.calls());
    let ranked = |r: &civfetch_core::Resolution| {
        r.candidates
            .iter()
            .map(|c| (c.model_id(), c.score()))
            .collect::<Vec<_>>()
    };
    assert_eq!(ranked(&with_kind), ranked(&without_kind));
    assert_eq!(with_kind.top().unwrap().model_id(), 257749);
}

#[tokio::test]
async fn test_zero_matches_diagnosed_as_no_results() {
    let registry = Arc::new(FrozenRegistry::from_fixture());
    let resolver = resolver_with(registry, KnownReferences::empty());

    let report = resolver
        .diagnose(&ResolveRequest::new("zzqx_obscure_widget.safetensors"))
        .await;

    assert_eq!(report.diagnosis, Diagnosis::NoResults);
    assert_eq!(report.total_items, 0);
    assert_eq!(report.stages.len(), 5);
    assert!(report.suggestions[0].contains("direct identifier lookup"));
}

#[tokio::test]
async fn test_failing_registry_diagnosed_as_api_failure() {
    let registry = Arc::new(FrozenRegistry::from_fixture().failing_searches(503));
    let resolver = resolver_with(registry, KnownReferences::empty());

    let report = resolver
        .diagnose(&ResolveRequest::new("detail tweaker"))
        .await;

    assert_eq!(report.diagnosis, Diagnosis::ApiFailure);
    assert!(report.suggestions[0].starts_with("Stage exact-filtered failed with HTTP 503"));
    assert!(report
        .stages
        .iter()
        .filter(|s| s.error.is_some())
        .all(|s| s.http_status == Some(503)));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["diagnosis"], "api-failure");
}

#[tokio::test]
async fn test_diagnostics_run_every_stage() {
    let registry = Arc::new(FrozenRegistry::from_fixture());
    let resolver = resolver_with(registry.clone(), KnownReferences::empty());

    let report = resolver.diagnose(&ResolveRequest::new("detail tweaker")).await;

    assert_eq!(report.diagnosis, Diagnosis::Success);
    // filtered, unfiltered, tag=detail, creator=tweakmaster
    assert_eq!(registry.calls().len(), 4);
    let filtered = &report.stages[1];
    assert_eq!(filtered.stage, Stage::ExactFiltered);
    assert_eq!(filtered.http_status, Some(200));
    assert_eq!(filtered.item_count, 2);
}

#[tokio::test]
async fn test_policy_blocks_high_confidence_match() {
    let registry = Arc::new(FrozenRegistry::from_fixture());
    let resolver = resolver_with(registry.clone(), KnownReferences::empty());

    let candidate = resolver
        .resolve_confident(&ResolveRequest::new("Realistic_Vision"))
        .await
        .unwrap();
    assert_eq!(candidate.strategy(), Strategy::UnfilteredQuery);

    let executor = DownloadExecutor::new(registry, &ResolverConfig::default()).unwrap();
    let err = executor
        .resolve(&DownloadTarget::Candidate(candidate))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "license-or-policy-block");
}

#[tokio::test]
async fn test_concurrent_resolutions_share_known_mapping() {
    let registry = Arc::new(FrozenRegistry::from_fixture());
    let resolver = resolver_with(registry, anatomy_known());
    let other = resolver.clone();

    let a_request = ResolveRequest::new("better detailed anatomy v3");
    let b_request = ResolveRequest::new("pony diffusion v6 xl");
    let (a, b) = tokio::join!(resolver.resolve(&a_request), other.resolve(&b_request));

    assert_eq!(a.top().unwrap().model_id(), 1091495);
    assert_eq!(b.top().unwrap().model_id(), 257749);
}

#[tokio::test]
async fn test_maintained_entry_is_used_after_reload() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(FrozenRegistry::from_fixture());
    let store = KnownReferenceStore::new(tmp.path().join("known_references.json"));

    store
        .upsert(
            registry.as_ref(),
            "add_detail.safetensors",
            KnownReferenceEntry {
                model_id: 58390,
                version_id: Some(62833),
                notes: String::new(),
            },
        )
        .await
        .unwrap();

    let resolver = resolver_with(registry.clone(), store.load().unwrap());
    let resolution = resolver.resolve(&ResolveRequest::new("add_detail.safetensors")).await;

    let top = resolution.top().unwrap();
    assert_eq!(top.model_id(), 58390);
    assert_eq!(top.strategy(), Strategy::KnownId);
    assert_eq!(normalize("add_detail.safetensors").query, "add detail");
    // one lookup while validating the upsert, one while resolving
    assert_eq!(
        registry.calls(),
        vec!["model/58390".to_string(), "model/58390".to_string()]
    );
}

fn add_detail_known() -> KnownReferences {
    KnownReferences::from_entries([(
        "add_detail.safetensors",
        KnownReferenceEntry {
            model_id: 58390,
            version_id: Some(62833),
            notes: String::new(),
        },
    )])
}

#[tokio::test]
async fn test_known_reference_with_different_registry_name_is_trusted() {
    let registry = Arc::new(FrozenRegistry::from_fixture());
    let resolver = resolver_with(registry.clone(), add_detail_known());
    let request = ResolveRequest::new("add_detail.safetensors");

    let resolution = resolver.resolve(&request).await;

    assert_eq!(resolution.candidates.len(), 1);
    let top = resolution.top().unwrap();
    assert_eq!(top.model_id(), 58390);
    assert_eq!(top.strategy(), Strategy::KnownId);
    assert_eq!(top.score(), 80);
    assert_eq!(top.tier(), ConfidenceTier::Medium);
    assert!(resolution.stages[1..]
        .iter()
        .all(|r| r.outcome == StageOutcome::Skipped { why: "known reference".to_string() }));
    assert_eq!(registry.calls(), vec!["model/58390".to_string()]);

    let confident = resolver.resolve_confident(&request).await.unwrap();
    assert_eq!(confident.model_id(), 58390);
    assert_eq!(confident.version_id(), Some(62833));
}

#[tokio::test]
async fn test_known_reference_to_missing_model_reports_status() {
    let registry = Arc::new(FrozenRegistry::from_fixture());
    let known = KnownReferences::from_entries([(
        "add_detail.safetensors",
        KnownReferenceEntry {
            model_id: 999_999,
            version_id: None,
            notes: String::new(),
        },
    )]);
    let resolver = resolver_with(registry, known);

    let report = resolver
        .diagnose(&ResolveRequest::new("add_detail.safetensors"))
        .await;

    assert_eq!(report.diagnosis, Diagnosis::ApiFailure);
    let lookup = &report.stages[0];
    assert_eq!(lookup.stage, Stage::KnownLookup);
    assert_eq!(lookup.http_status, Some(404));
    assert_eq!(lookup.error.as_ref().unwrap().reason, "not-found");
    assert!(report.suggestions[0].contains("failed with HTTP 404"));
    assert!(!report.suggestions.iter().any(|s| s.contains("no response")));
}
