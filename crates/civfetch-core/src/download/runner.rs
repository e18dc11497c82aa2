//! [`JobRunner`] backed by the registry resolver and download executor.

use super::batch::{JobRunner, PreparedJob};
use super::executor::{DownloadExecutor, DownloadTarget, StagedFile};
use super::job::JobDescriptor;
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::resolve::normalize::MODEL_EXTENSIONS;
use crate::resolve::{ResolveRequest, Resolver};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Whether a name ends with a known model extension.
fn has_model_extension(name: &str) -> bool {
    let lower = name.to_lowercase();
    MODEL_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// File name to store a download under.
///
/// The workflow's own filename wins so the workflow finds the file; the
/// registry's name is used when the reference is free text.
pub fn destination_file_name(reference: &str, registry_file_name: &str) -> String {
    Path::new(reference)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| has_model_extension(n))
        .unwrap_or_else(|| registry_file_name.to_string())
}

/// Destination path for a job.
///
/// An explicit destination ending in a model extension is a file path; any
/// other explicit destination is a directory. Without one, the kind's
/// subdirectory under `models_root` is used.
pub fn destination_for(
    descriptor: &JobDescriptor,
    models_root: &Path,
    registry_file_name: &str,
) -> PathBuf {
    let file_name = destination_file_name(&descriptor.reference, registry_file_name);
    match descriptor.destination {
        Some(ref dest) if has_model_extension(&dest.to_string_lossy()) => dest.clone(),
        Some(ref dir) => dir.join(file_name),
        None => descriptor
            .model_kind()
            .destination_dir(models_root)
            .join(file_name),
    }
}

/// Resolves references, then downloads through a [`DownloadExecutor`].
pub struct RegistryJobRunner {
    resolver: Resolver,
    executor: DownloadExecutor,
    models_root: PathBuf,
}

impl RegistryJobRunner {
    pub fn new(
        resolver: Resolver,
        executor: DownloadExecutor,
        models_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver,
            executor,
            models_root: models_root.into(),
        }
    }

    async fn target_for(&self, descriptor: &JobDescriptor) -> Result<DownloadTarget> {
        if let Some(model_id) = descriptor.model_id {
            return Ok(DownloadTarget::Direct {
                model_id,
                version_id: descriptor.version_id,
            });
        }

        let mut request = ResolveRequest::new(descriptor.reference.clone());
        if descriptor.kind.is_some() {
            request = request.with_kind(descriptor.model_kind());
        }
        let candidate = self.resolver.resolve_confident(&request).await?;
        debug!(
            "'{}' resolved to model {} ({})",
            descriptor.reference,
            candidate.model_id(),
            candidate.tier()
        );

        Ok(match descriptor.version_id {
            Some(version_id) => DownloadTarget::Direct {
                model_id: candidate.model_id(),
                version_id: Some(version_id),
            },
            None => DownloadTarget::Candidate(candidate),
        })
    }
}

#[async_trait]
impl JobRunner for RegistryJobRunner {
    type Staged = StagedFile;

    async fn prepare(&self, descriptor: &JobDescriptor) -> Result<PreparedJob> {
        let target = self.target_for(descriptor).await?;
        let resolved = self.executor.resolve(&target).await?;
        let destination = destination_for(descriptor, &self.models_root, &resolved.file_name);
        Ok(PreparedJob {
            resolved,
            destination,
        })
    }

    async fn transfer(&self, job: &PreparedJob, cancel: &CancellationToken) -> Result<StagedFile> {
        self.executor
            .transfer(&job.resolved, &job.destination, cancel)
            .await
    }

    async fn verify(&self, job: &PreparedJob, staged: StagedFile) -> Result<PathBuf> {
        self.executor
            .verify_and_commit(staged, job.resolved.expected_hash.as_ref())
            .await
    }
}

impl std::fmt::Debug for RegistryJobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryJobRunner")
            .field("models_root", &self.models_root)
            .finish()
    }
}
