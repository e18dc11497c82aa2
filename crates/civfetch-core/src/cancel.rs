//! Cooperative cancellation for batch runs and in-flight transfers.
//!
//! A [`CancellationToken`] is cloned into every unit of work. The batch
//! orchestrator checks it before starting each pending job. The download
//! executor checks it before a single-shot download starts and between body
//! chunks, discarding the partial file when it fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation token shared by clone.
///
/// # Example
///
/// ```
/// use civfetch_core::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker = token.clone();
///
/// token.cancel();
/// assert!(worker.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return [`ResolverError::Cancelled`](crate::ResolverError::Cancelled)
    /// once cancellation has been requested.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::ResolverError::Cancelled)
        } else {
            Ok(())
        }
    }
}
