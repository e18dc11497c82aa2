//! Download job state machine.
//!
//! ```text
//! pending -> in-progress -> verifying -> completed
//!                 |             |
//!                 +-------------+--> failed
//!                 |             |
//!                 +-------------+--> pending   (retryable failure, attempts left)
//! ```
//!
//! [`transition`] is pure; [`DownloadJob::apply`] is the only way a job's
//! status changes. Terminal states accept no events.

use super::hashing::ExpectedHash;
use crate::kind::ModelKind;
use crate::network::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Verifying,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in-progress",
            JobStatus::Verifying => "verifying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// Begin an attempt.
    Start,
    /// Transfer finished; integrity check begins.
    BeginVerify,
    Complete,
    /// The current attempt failed.
    Fail { retryable: bool },
    /// Stop without further attempts (batch aborted or cancelled).
    Abandon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job transition: {event:?} while {from}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub event: JobEvent,
}

/// Next status for `event`, given how many attempts have started.
pub fn transition(
    from: JobStatus,
    attempts: u32,
    event: JobEvent,
    policy: &RetryPolicy,
) -> Result<JobStatus, InvalidTransition> {
    use JobEvent::*;
    use JobStatus::*;

    let next = match (from, event) {
        (Pending, Start) => InProgress,
        (InProgress, BeginVerify) => Verifying,
        (Verifying, Complete) => Completed,
        (InProgress | Verifying, Fail { retryable }) => {
            if retryable && policy.allows_retry(attempts) {
                Pending
            } else {
                Failed
            }
        }
        (Pending | InProgress | Verifying, Abandon) => Failed,
        _ => return Err(InvalidTransition { from, event }),
    };
    Ok(next)
}

/// One batch input entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Reference as found in the workflow (usually a filename).
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<u64>,
    /// Expected-type hint; chooses the destination subdirectory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Explicit destination path or directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
}

impl JobDescriptor {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            model_id: None,
            version_id: None,
            kind: None,
            destination: None,
        }
    }

    pub fn model_kind(&self) -> ModelKind {
        self.kind
            .as_deref()
            .map(ModelKind::from_hint)
            .unwrap_or(ModelKind::Other)
    }
}

/// Failure details kept on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobError {
    pub reason: String,
    pub message: String,
}

/// A download job and its progress through the state machine.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadJob {
    pub id: Uuid,
    pub descriptor: JobDescriptor,
    pub resolved_url: Option<String>,
    pub destination: Option<PathBuf>,
    pub expected_hash: Option<ExpectedHash>,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<JobError>,
}

impl DownloadJob {
    pub fn new(descriptor: JobDescriptor) -> Self {
        Self {
            id: Uuid::new_v4(),
            descriptor,
            resolved_url: None,
            destination: None,
            expected_hash: None,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// Apply an event. `Start` opens a new attempt under the same job id.
    pub fn apply(
        &mut self,
        event: JobEvent,
        policy: &RetryPolicy,
    ) -> Result<JobStatus, InvalidTransition> {
        let next = transition(self.status, self.attempts, event, policy)?;
        if event == JobEvent::Start {
            self.attempts += 1;
        }
        self.status = next;
        Ok(next)
    }

    pub fn record_error(&mut self, reason: &str, message: impl Into<String>) {
        self.last_error = Some(JobError {
            reason: reason.to_string(),
            message: message.into(),
        });
    }
}
