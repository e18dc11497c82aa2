//! Verified downloads and batch orchestration.
//!
//! - [`executor`] - Resolve a file, stream to `.part`, verify, commit
//! - [`hashing`] - SHA256 / BLAKE3 verification
//! - [`job`] - Per-job state machine
//! - [`batch`] - Sequential batch runner with retry and backoff
//! - [`runner`] - Registry-backed [`JobRunner`]

pub mod batch;
pub mod executor;
pub mod hashing;
pub mod job;
pub mod runner;

pub use batch::{
    partition_satisfied, BatchOptions, BatchOrchestrator, BatchSummary, JobReport, JobRunner,
    PreparedJob,
};
pub use executor::{
    select_file, DownloadExecutor, DownloadProgress, DownloadTarget, ProgressCallback,
    ResolvedFile, StagedFile,
};
pub use hashing::{ExpectedHash, HashAlgorithm};
pub use job::{DownloadJob, JobDescriptor, JobEvent, JobStatus};
pub use runner::RegistryJobRunner;
