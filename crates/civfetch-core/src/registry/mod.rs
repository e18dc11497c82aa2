//! Remote model registry access.
//!
//! - [`types`] - Registry item shape with an explicit extra-metadata bag
//! - [`civitai`] - HTTP client for the Civitai public API
//!
//! Resolution code only talks to the [`ModelRegistry`] trait so the cascade,
//! diagnostics and known-reference maintenance can run against a frozen
//! in-memory registry in tests.

mod civitai;
mod types;

pub use civitai::CivitaiClient;
pub use types::{
    Creator, FileMetadata, ItemStats, ModelVersion, RegistryFile, RegistryItem, SearchPage,
};

use crate::config::NetworkConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Query parameters for one registry search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchParams {
    pub query: Option<String>,
    pub tag: Option<String>,
    pub username: Option<String>,
    /// Content filter; `Some(false)` excludes flagged content, `None` sends nothing.
    pub nsfw: Option<bool>,
    pub limit: u32,
}

impl SearchParams {
    pub fn query(query: impl Into<String>, limit: u32) -> Self {
        Self {
            query: Some(query.into()),
            limit,
            ..Default::default()
        }
    }

    /// Encode as a URL query string (without the leading `?`).
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ref q) = self.query {
            parts.push(format!("query={}", urlencoding::encode(q)));
        }
        if let Some(ref tag) = self.tag {
            parts.push(format!("tag={}", urlencoding::encode(tag)));
        }
        if let Some(ref username) = self.username {
            parts.push(format!("username={}", urlencoding::encode(username)));
        }
        if let Some(nsfw) = self.nsfw {
            parts.push(format!("nsfw={}", nsfw));
        }
        parts.push(format!("limit={}", self.limit));
        parts.push(format!(
            "sort={}",
            urlencoding::encode(NetworkConfig::SEARCH_SORT)
        ));
        parts.join("&")
    }
}

/// Registry operations used by resolution and download.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Free-text / tag / creator search.
    async fn search(&self, params: &SearchParams) -> Result<Vec<RegistryItem>>;

    /// Fetch a single item by registry identifier.
    async fn model_by_id(&self, model_id: u64) -> Result<RegistryItem>;

    /// Download URL for a version identifier.
    fn download_url(&self, version_id: u64) -> String;
}
