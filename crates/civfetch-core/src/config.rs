//! Centralized configuration for civfetch.
//!
//! Fixed values live in constant structs; tunables live in [`ResolverConfig`],
//! which is loaded from `config.json` and falls back to defaults for every
//! missing field.

use crate::error::{ResolverError, Result};
use crate::metadata::atomic_read_json;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "civfetch";
    pub const USER_AGENT: &'static str = "civfetch/0.3";
    pub const CONFIG_FILENAME: &'static str = "config.json";
    pub const KNOWN_REFERENCES_FILENAME: &'static str = "known_references.json";
    pub const TOKEN_ENV_VAR: &'static str = "CIVITAI_API_TOKEN";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const CIVITAI_API_BASE: &'static str = "https://civitai.com/api/v1";
    pub const CIVITAI_DOWNLOAD_BASE: &'static str = "https://civitai.com/api/download/models";
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Search ordering; popular models first.
    pub const SEARCH_SORT: &'static str = "Most Downloaded";
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    pub const KNOWN_LOOKUP_MAX_ATTEMPTS: u32 = 3;
}

/// Tunable configuration, persisted as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub cascade: CascadeConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub policy: ContentPolicy,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_download_base")]
    pub download_base: String,
    /// Bounded timeout for every API call.
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
    /// Bearer token; the `CIVITAI_API_TOKEN` environment variable overrides it.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("api_base", &self.api_base)
            .field("download_base", &self.download_base)
            .field("timeout_secs", &self.timeout_secs)
            .field("has_api_token", &self.api_token.is_some())
            .finish()
    }
}

/// Sufficiency threshold and result limits for the search cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Stop once this many high-tier candidates are collected.
    #[serde(default = "default_high_tier_stop")]
    pub high_tier_stop: usize,
    /// Stop once this many candidates in total are collected.
    #[serde(default = "default_total_stop")]
    pub total_stop: usize,
    /// `limit` sent with every registry search.
    #[serde(default = "default_per_stage_limit")]
    pub per_stage_limit: u32,
    /// Length cap for the ranked output.
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Additional attempts after the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff unit; the n-th retry waits `n * unit`.
    #[serde(default = "default_backoff_unit_secs")]
    pub backoff_unit_secs: u64,
    /// Pause between successful downloads to respect registry rate limits.
    #[serde(default = "default_inter_download_delay_ms")]
    pub inter_download_delay_ms: u64,
    /// Upper bound on a stalled body read.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_continue_on_failure")]
    pub continue_on_failure: bool,
}

/// Content classification policy applied before any bytes are fetched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentPolicy {
    #[serde(default)]
    pub allow_nsfw: bool,
}

fn default_api_base() -> String {
    NetworkConfig::CIVITAI_API_BASE.to_string()
}

fn default_download_base() -> String {
    NetworkConfig::CIVITAI_DOWNLOAD_BASE.to_string()
}

fn default_api_timeout_secs() -> u64 {
    30
}

fn default_high_tier_stop() -> usize {
    1
}

fn default_total_stop() -> usize {
    5
}

fn default_per_stage_limit() -> u32 {
    20
}

fn default_result_limit() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_unit_secs() -> u64 {
    2
}

fn default_inter_download_delay_ms() -> u64 {
    1000
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_continue_on_failure() -> bool {
    true
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            download_base: default_download_base(),
            timeout_secs: default_api_timeout_secs(),
            api_token: None,
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            high_tier_stop: default_high_tier_stop(),
            total_stop: default_total_stop(),
            per_stage_limit: default_per_stage_limit(),
            result_limit: default_result_limit(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_unit_secs: default_backoff_unit_secs(),
            inter_download_delay_ms: default_inter_download_delay_ms(),
            read_timeout_secs: default_read_timeout_secs(),
            continue_on_failure: default_continue_on_failure(),
        }
    }
}

impl ResolverConfig {
    /// Default data directory: `{config_dir}/civfetch/`.
    pub fn base_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(AppConfig::APP_NAME))
            .ok_or_else(|| ResolverError::Config {
                message: "Could not determine config directory".to_string(),
            })
    }

    /// Load configuration from `path`, using defaults when the file is absent,
    /// then apply the token environment override.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: ResolverConfig = atomic_read_json(path)?.unwrap_or_default();
        if let Ok(token) = std::env::var(AppConfig::TOKEN_ENV_VAR) {
            let token = token.trim();
            if !token.is_empty() {
                config.registry.api_token = Some(token.to_string());
            }
        }
        Ok(config)
    }

    /// Load from the default location.
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::base_dir()?.join(AppConfig::CONFIG_FILENAME))
    }

    /// Path of the known-reference mapping in the default location.
    pub fn known_references_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join(AppConfig::KNOWN_REFERENCES_FILENAME))
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DownloadConfig {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_secs(self.backoff_unit_secs)
    }

    pub fn inter_download_delay(&self) -> Duration {
        Duration::from_millis(self.inter_download_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
