//! Civitai public API client.

use super::types::{RegistryItem, SearchPage};
use super::{ModelRegistry, SearchParams};
use crate::config::{AppConfig, RegistryConfig};
use crate::error::{ResolverError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Client for the Civitai REST API.
pub struct CivitaiClient {
    client: Client,
    api_base: String,
    download_base: String,
    api_token: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for CivitaiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CivitaiClient")
            .field("api_base", &self.api_base)
            .field("download_base", &self.download_base)
            .field("has_api_token", &self.api_token.is_some())
            .finish()
    }
}

impl CivitaiClient {
    /// Create a client from registry configuration.
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let timeout = config.timeout();
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(AppConfig::USER_AGENT)
            .build()
            .map_err(|e| ResolverError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            download_base: config.download_base.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            timeout,
        })
    }

    /// Bearer header value for authenticated requests.
    pub fn auth_header_value(&self) -> Option<String> {
        self.api_token.as_ref().map(|t| format!("Bearer {}", t))
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, url: &str) -> Result<T> {
        let mut request = self.client.get(url);
        if let Some(auth) = self.auth_header_value() {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ResolverError::Timeout(self.timeout)
            } else {
                ResolverError::Network {
                    message: format!("Civitai API request failed: {}", e),
                    cause: Some(e.to_string()),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolverError::Registry {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ResolverError::Timeout(self.timeout)
            } else {
                ResolverError::Network {
                    message: format!("Failed to read Civitai response: {}", e),
                    cause: Some(e.to_string()),
                }
            }
        })?;

        serde_json::from_slice(&body).map_err(|e| ResolverError::Parse {
            message: format!("Invalid payload from {}: {}", endpoint, e),
            source: Some(e),
        })
    }
}

#[async_trait]
impl ModelRegistry for CivitaiClient {
    async fn search(&self, params: &SearchParams) -> Result<Vec<RegistryItem>> {
        let url = format!("{}/models?{}", self.api_base, params.to_query_string());
        debug!("Civitai search: {}", url);
        let page: SearchPage = self.get_json("/models", &url).await?;
        Ok(page.items)
    }

    async fn model_by_id(&self, model_id: u64) -> Result<RegistryItem> {
        let endpoint = format!("/models/{}", model_id);
        let url = format!("{}{}", self.api_base, endpoint);
        match self.get_json(&endpoint, &url).await {
            Err(ResolverError::Registry { status: 404, .. }) => {
                Err(ResolverError::ModelMissing {
                    model_id,
                    status: 404,
                })
            }
            other => other,
        }
    }

    fn download_url(&self, version_id: u64) -> String {
        format!("{}/{}", self.download_base, version_id)
    }
}
