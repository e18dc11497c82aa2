//! Batch orchestration.
//!
//! Jobs run one at a time in input order. Each job walks the state machine
//! in [`super::job`]; a retryable failure re-enters `pending` and waits
//! `attempt * unit` before the next attempt. Successful downloads are
//! followed by a fixed delay to respect registry rate limits.

use super::executor::ResolvedFile;
use super::job::{DownloadJob, JobDescriptor, JobEvent, JobStatus};
use crate::cancel::CancellationToken;
use crate::config::DownloadConfig;
use crate::error::{ResolverError, Result};
use crate::network::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A job resolved to a concrete file and destination.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedJob {
    pub resolved: ResolvedFile,
    pub destination: PathBuf,
}

/// The I/O the orchestrator drives. Implementations must not keep
/// per-job state; the orchestrator owns the job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Output of a transfer, consumed by verification.
    type Staged: Send;

    async fn prepare(&self, descriptor: &JobDescriptor) -> Result<PreparedJob>;

    async fn transfer(
        &self,
        job: &PreparedJob,
        cancel: &CancellationToken,
    ) -> Result<Self::Staged>;

    async fn verify(&self, job: &PreparedJob, staged: Self::Staged) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub retry: RetryPolicy,
    pub inter_download_delay: Duration,
    pub continue_on_failure: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl From<&DownloadConfig> for BatchOptions {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            retry: RetryPolicy::from(config),
            inter_download_delay: config.inter_download_delay(),
            continue_on_failure: config.continue_on_failure,
        }
    }
}

/// Outcome of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub id: Uuid,
    pub reference: String,
    pub status: JobStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&DownloadJob> for JobReport {
    fn from(job: &DownloadJob) -> Self {
        Self {
            id: job.id,
            reference: job.descriptor.reference.clone(),
            status: job.status,
            attempts: job.attempts,
            resolved_url: job.resolved_url.clone(),
            destination: job.destination.clone(),
            reason: job.last_error.as_ref().map(|e| e.reason.clone()),
            message: job.last_error.as_ref().map(|e| e.message.clone()),
        }
    }
}

/// Aggregate result of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs never started because the batch aborted or was cancelled.
    pub not_started: usize,
    pub aborted: bool,
    pub cancelled: bool,
    pub jobs: Vec<JobReport>,
}

impl BatchSummary {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Split off jobs whose reference filename is already present locally.
///
/// Comparison is case-insensitive on the file-name component. Returns the
/// jobs still to run and the skipped references.
pub fn partition_satisfied<I, S>(
    jobs: Vec<JobDescriptor>,
    present_filenames: I,
) -> (Vec<JobDescriptor>, Vec<String>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let present: HashSet<String> = present_filenames
        .into_iter()
        .map(|s| s.as_ref().to_lowercase())
        .collect();

    let mut remaining = Vec::new();
    let mut skipped = Vec::new();
    for job in jobs {
        let name = Path::new(&job.reference)
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !name.is_empty() && present.contains(&name) {
            skipped.push(job.reference);
        } else {
            remaining.push(job);
        }
    }
    (remaining, skipped)
}

/// Sequential batch runner with retry and backoff.
pub struct BatchOrchestrator<R: JobRunner> {
    runner: R,
    options: BatchOptions,
    cancel: CancellationToken,
}

impl<R: JobRunner> BatchOrchestrator<R> {
    pub fn new(runner: R, options: BatchOptions) -> Self {
        Self {
            runner,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the batch before the next pending job.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, descriptors: Vec<JobDescriptor>) -> BatchSummary {
        let started_at = Utc::now();
        let clock = tokio::time::Instant::now();
        let mut jobs: Vec<DownloadJob> = descriptors.into_iter().map(DownloadJob::new).collect();
        let total = jobs.len();
        let mut aborted = false;
        let mut cancelled = false;

        info!("Starting batch of {} job(s)", total);

        for index in 0..total {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let job = &mut jobs[index];
            self.run_job(job).await;

            match job.status {
                JobStatus::Completed => {
                    let more_pending = index + 1 < total;
                    if more_pending && !self.options.inter_download_delay.is_zero() {
                        tokio::time::sleep(self.options.inter_download_delay).await;
                    }
                }
                _ => {
                    if job.last_error.as_ref().is_some_and(|e| e.reason == "cancelled") {
                        cancelled = true;
                        break;
                    }
                    if !self.options.continue_on_failure {
                        warn!("Aborting batch after '{}' failed", job.descriptor.reference);
                        aborted = true;
                        break;
                    }
                }
            }
        }

        let reports: Vec<JobReport> = jobs.iter().map(JobReport::from).collect();
        let completed = reports.iter().filter(|r| r.status == JobStatus::Completed).count();
        let failed = reports.iter().filter(|r| r.status == JobStatus::Failed).count();
        let summary = BatchSummary {
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            total,
            completed,
            failed,
            not_started: total - completed - failed,
            aborted,
            cancelled,
            jobs: reports,
        };

        info!(
            "Batch finished: {} completed, {} failed, {} not started in {} ms",
            summary.completed, summary.failed, summary.not_started, summary.duration_ms
        );
        summary
    }

    async fn run_job(&self, job: &mut DownloadJob) {
        let policy = self.options.retry;
        let mut prepared: Option<PreparedJob> = None;

        loop {
            if self.cancel.is_cancelled() {
                job.record_error("cancelled", ResolverError::Cancelled.to_string());
                let _ = job.apply(JobEvent::Abandon, &policy);
                return;
            }

            if job.apply(JobEvent::Start, &policy).is_err() {
                return;
            }
            info!(
                "Job '{}' attempt {}/{}",
                job.descriptor.reference,
                job.attempts,
                policy.max_attempts()
            );

            match self.attempt(job, &mut prepared).await {
                Ok(path) => {
                    job.destination = Some(path);
                    let _ = job.apply(JobEvent::Complete, &policy);
                    return;
                }
                Err(e) => {
                    job.record_error(e.reason(), e.to_string());
                    let retryable = e.is_retryable();
                    match job.apply(JobEvent::Fail { retryable }, &policy) {
                        Ok(JobStatus::Pending) => {
                            let delay = policy.delay_for(job.attempts);
                            warn!(
                                "Job '{}' attempt {} failed ({}); retrying in {:?}",
                                job.descriptor.reference, job.attempts, e, delay
                            );
                            tokio::time::sleep(delay).await;
                        }
                        _ => {
                            error!(
                                "Job '{}' failed after {} attempt(s): {}",
                                job.descriptor.reference, job.attempts, e
                            );
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        job: &mut DownloadJob,
        prepared: &mut Option<PreparedJob>,
    ) -> Result<PathBuf> {
        if prepared.is_none() {
            let ready = self.runner.prepare(&job.descriptor).await?;
            job.resolved_url = Some(ready.resolved.url.clone());
            job.destination = Some(ready.destination.clone());
            job.expected_hash = ready.resolved.expected_hash.clone();
            *prepared = Some(ready);
        }
        let Some(ready) = prepared.as_ref() else {
            return Err(ResolverError::Validation {
                field: "job".to_string(),
                message: "job was not prepared".to_string(),
            });
        };

        let staged = self.runner.transfer(ready, &self.cancel).await?;
        job.apply(JobEvent::BeginVerify, &self.options.retry)
            .map_err(|e| ResolverError::Validation {
                field: "status".to_string(),
                message: e.to_string(),
            })?;
        self.runner.verify(ready, staged).await
    }
}
