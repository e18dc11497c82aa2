//! Error types for civfetch.
//!
//! Every failure carries a stable reason code (see [`ResolverError::reason`])
//! so callers and downstream automation can tell failures apart without
//! parsing display strings.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the civfetch library.
#[derive(Debug, Error)]
pub enum ResolverError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Registry returned HTTP {status} for {endpoint}")]
    Registry { endpoint: String, status: u16 },

    // Serialization errors
    #[error("Failed to parse registry payload: {message}")]
    Parse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Resolution errors
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Registry has no model {model_id} (HTTP {status})")]
    ModelMissing { model_id: u64, status: u16 },

    #[error(
        "No high-confidence match for '{reference}' \
         ({candidates} candidate(s) need manual selection)"
    )]
    AmbiguousMatch { reference: String, candidates: usize },

    #[error("Blocked by content policy: {reason}")]
    PolicyBlocked { reason: String },

    // Download errors
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Destination already has a download in flight: {0}")]
    DestinationBusy(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    // Validation / configuration
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for civfetch operations.
pub type Result<T> = std::result::Result<T, ResolverError>;

impl From<std::io::Error> for ResolverError {
    fn from(err: std::io::Error) -> Self {
        ResolverError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ResolverError {
    fn from(err: serde_json::Error) -> Self {
        ResolverError::Parse {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ResolverError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ResolverError::Timeout(std::time::Duration::from_secs(0))
        } else if err.is_decode() {
            ResolverError::Parse {
                message: err.to_string(),
                source: None,
            }
        } else if let Some(status) = err.status() {
            ResolverError::Registry {
                endpoint: err
                    .url()
                    .map(|u| u.path().to_string())
                    .unwrap_or_default(),
                status: status.as_u16(),
            }
        } else {
            ResolverError::Network {
                message: err.to_string(),
                cause: Some(err.to_string()),
            }
        }
    }
}

impl ResolverError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ResolverError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Stable, kebab-case reason code for display and automated decisioning.
    pub fn reason(&self) -> &'static str {
        match self {
            ResolverError::Network { .. } | ResolverError::Timeout(_) => "transient-network",
            ResolverError::Registry { .. } => "registry-error",
            ResolverError::Parse { .. } => "parse-error",
            ResolverError::Io { .. } => "io-error",
            ResolverError::NotFound(_) | ResolverError::ModelMissing { .. } => "not-found",
            ResolverError::AmbiguousMatch { .. } => "ambiguous-match",
            ResolverError::PolicyBlocked { .. } => "license-or-policy-block",
            ResolverError::HashMismatch { .. } => "integrity-mismatch",
            ResolverError::DestinationBusy(_) => "destination-busy",
            ResolverError::Cancelled => "cancelled",
            ResolverError::Validation { .. } => "validation-error",
            ResolverError::Config { .. } => "config-error",
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Registry statuses 408, 429 and 5xx are treated as transient; every
    /// other registry status is a hard answer from the server.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolverError::Network { .. } | ResolverError::Timeout(_) => true,
            ResolverError::Registry { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            _ => false,
        }
    }

    /// HTTP status attached to this error, if the registry answered at all.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ResolverError::Registry { status, .. }
            | ResolverError::ModelMissing { status, .. } => Some(*status),
            _ => None,
        }
    }
}
