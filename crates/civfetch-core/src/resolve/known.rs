//! Known-reference mapping.
//!
//! Previously confirmed references map straight to registry identifiers so
//! resolution can skip searching. [`KnownReferences`] is the loaded-once,
//! read-only view threaded through resolution; [`KnownReferenceStore`] is the
//! single maintenance entry point that validates and persists changes.

use super::normalize::normalize;
use crate::config::NetworkConfig;
use crate::error::{ResolverError, Result};
use crate::metadata::{atomic_read_json, atomic_write_json};
use crate::network::{retry_async, RetryPolicy};
use crate::registry::ModelRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Registry identifiers confirmed for a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownReferenceEntry {
    pub model_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<u64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

/// On-disk shape of the mapping file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct KnownReferenceFile {
    #[serde(default)]
    references: BTreeMap<String, KnownReferenceEntry>,
}

/// Read-only known-reference mapping keyed by normalized query.
#[derive(Debug, Clone, Default)]
pub struct KnownReferences {
    entries: BTreeMap<String, KnownReferenceEntry>,
}

impl KnownReferences {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from raw names; keys are normalized.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, KnownReferenceEntry)>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, entry)| (normalize(name.as_ref()).query, entry))
                .collect(),
        }
    }

    /// Look up by normalized query string.
    pub fn get(&self, normalized_query: &str) -> Option<&KnownReferenceEntry> {
        self.entries.get(normalized_query)
    }

    /// Look up a raw reference.
    pub fn lookup(&self, reference: &str) -> Option<&KnownReferenceEntry> {
        self.get(&normalize(reference).query)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &KnownReferenceEntry)> {
        self.entries.iter()
    }
}

/// Result of [`KnownReferenceStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
}

/// Persisted known-reference mapping file.
#[derive(Debug, Clone)]
pub struct KnownReferenceStore {
    path: PathBuf,
    retry: RetryPolicy,
}

impl KnownReferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry: RetryPolicy::new()
                .with_max_retries(NetworkConfig::KNOWN_LOOKUP_MAX_ATTEMPTS - 1)
                .with_unit(Duration::from_secs(1)),
        }
    }

    /// Override the validation retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the mapping. A missing file is an empty mapping.
    pub fn load(&self) -> Result<KnownReferences> {
        let file: KnownReferenceFile = atomic_read_json(&self.path)?.unwrap_or_default();
        Ok(KnownReferences::from_entries(file.references))
    }

    /// Validate `entry` against the registry and write it under `name`.
    ///
    /// The model must exist, and a pinned version must belong to it. An
    /// existing entry for the same normalized name is replaced in place.
    pub async fn upsert(
        &self,
        registry: &dyn ModelRegistry,
        name: &str,
        entry: KnownReferenceEntry,
    ) -> Result<UpsertOutcome> {
        let key = normalize(name).query;
        if key.is_empty() {
            return Err(ResolverError::Validation {
                field: "name".to_string(),
                message: "reference name is empty after normalization".to_string(),
            });
        }

        let model_id = entry.model_id;
        let (fetched, stats) = retry_async(
            &self.retry,
            || registry.model_by_id(model_id),
            ResolverError::is_retryable,
        )
        .await;
        let item = fetched?;

        if let Some(version_id) = entry.version_id {
            if item.version(version_id).is_none() {
                return Err(ResolverError::Validation {
                    field: "version_id".to_string(),
                    message: format!(
                        "version {} does not belong to model {} ({})",
                        version_id, item.id, item.name
                    ),
                });
            }
        }

        let mut file: KnownReferenceFile = atomic_read_json(&self.path)?.unwrap_or_default();
        let outcome = match file.references.insert(key.clone(), entry) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Added,
        };
        atomic_write_json(&self.path, &file, true)?;

        info!(
            "Known reference '{}' -> model {} ({:?}, validated in {} attempt(s))",
            key, model_id, outcome, stats.attempts
        );
        Ok(outcome)
    }
}
