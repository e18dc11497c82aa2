//! civfetch core library.
//!
//! Resolves missing model references against a Civitai-compatible registry
//! and drives verified, resumable downloads.
//!
//! # Architecture
//!
//! - [`resolve`] - Normalization, cascading search, scoring, ranking,
//!   diagnostics and candidate selection
//! - [`download`] - Download executor, job state machine, batch orchestrator
//! - [`registry`] - Registry trait and HTTP client
//! - [`network`] - Retry with linear backoff
//! - [`metadata`] - Atomic JSON persistence
//!
//! # Example
//!
//! ```rust,ignore
//! use civfetch_core::{CivitaiClient, KnownReferences, ResolveRequest, Resolver, ResolverConfig};
//! use std::sync::Arc;
//!
//! let config = ResolverConfig::load_default()?;
//! let registry = Arc::new(CivitaiClient::new(&config.registry)?);
//! let resolver = Resolver::new(registry, Arc::new(KnownReferences::empty()), config.cascade);
//!
//! let resolution = resolver
//!     .resolve(&ResolveRequest::new("Better_Detailed_Anatomy_v3.safetensors"))
//!     .await;
//! ```

pub mod cancel;
pub mod config;
pub mod download;
pub mod error;
pub mod kind;
pub mod metadata;
pub mod network;
pub mod registry;
pub mod resolve;

pub use cancel::CancellationToken;
pub use config::{AppConfig, ContentPolicy, ResolverConfig};
pub use download::{
    BatchOptions, BatchOrchestrator, BatchSummary, DownloadExecutor, DownloadTarget, JobDescriptor,
    JobStatus, RegistryJobRunner,
};
pub use error::{ResolverError, Result};
pub use kind::ModelKind;
pub use registry::{CivitaiClient, ModelRegistry, RegistryItem, SearchParams};
pub use resolve::{
    ConfidenceTier, DiagnosticReport, Diagnosis, KnownReferenceEntry, KnownReferenceStore,
    KnownReferences, ResolveRequest, Resolution, Resolver, SearchCandidate, Strategy,
};
