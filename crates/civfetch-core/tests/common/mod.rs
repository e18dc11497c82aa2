//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use civfetch_core::resolve::normalize::keywords;
use civfetch_core::{ModelRegistry, RegistryItem, ResolverError, Result, SearchParams};
use std::path::PathBuf;
use std::sync::Mutex;

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn load_items() -> Vec<RegistryItem> {
    let raw = std::fs::read_to_string(fixture_path("registry_items.json"))
        .expect("Failed to read registry fixture");
    serde_json::from_str(&raw).expect("Failed to parse registry fixture")
}

/// In-memory registry with deterministic search behavior.
///
/// - `query` matches items sharing at least one keyword with the name
/// - `tag` matches the item's `tags` array
/// - `username` matches the creator
/// - `nsfw=false` filters flagged items as the real API does
pub struct FrozenRegistry {
    items: Vec<RegistryItem>,
    fail_status: Option<u16>,
    calls: Mutex<Vec<String>>,
}

impl FrozenRegistry {
    pub fn new(items: Vec<RegistryItem>) -> Self {
        Self {
            items,
            fail_status: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_fixture() -> Self {
        Self::new(load_items())
    }

    /// Every search fails with `status`; lookups by id still work.
    pub fn failing_searches(mut self, status: u16) -> Self {
        self.fail_status = Some(status);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn matches(item: &RegistryItem, params: &SearchParams) -> bool {
        if let Some(ref q) = params.query {
            if keywords(&item.name).is_disjoint(&keywords(q)) {
                return false;
            }
        }
        if let Some(ref tag) = params.tag {
            let has_tag = item
                .extra
                .get("tags")
                .and_then(|t| t.as_array())
                .map(|tags| tags.iter().any(|t| t.as_str() == Some(tag.as_str())))
                .unwrap_or(false);
            if !has_tag {
                return false;
            }
        }
        if let Some(ref username) = params.username {
            if item.creator_name() != Some(username.as_str()) {
                return false;
            }
        }
        if params.nsfw == Some(false) && item.nsfw {
            return false;
        }
        true
    }
}

#[async_trait]
impl ModelRegistry for FrozenRegistry {
    async fn search(&self, params: &SearchParams) -> Result<Vec<RegistryItem>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("search?{}", params.to_query_string()));
        if let Some(status) = self.fail_status {
            return Err(ResolverError::Registry {
                endpoint: "/models".to_string(),
                status,
            });
        }
        Ok(self
            .items
            .iter()
            .filter(|item| Self::matches(item, params))
            .take(params.limit as usize)
            .cloned()
            .collect())
    }

    async fn model_by_id(&self, model_id: u64) -> Result<RegistryItem> {
        self.calls.lock().unwrap().push(format!("model/{}", model_id));
        self.items
            .iter()
            .find(|item| item.id == model_id)
            .cloned()
            .ok_or(ResolverError::ModelMissing {
                model_id,
                status: 404,
            })
    }

    fn download_url(&self, version_id: u64) -> String {
        format!("http://registry.test/download/{}", version_id)
    }
}
