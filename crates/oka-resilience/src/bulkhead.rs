//! Bulkhead for upstream connections.
//!
//! Bounds the number of concurrent exchanges with one upstream. A limit of
//! zero disables the bulkhead.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Bulkhead errors
#[derive(Debug, Error)]
pub enum BulkheadError {
    /// No permit became free in time
    #[error("Bulkhead {id} queue timeout after {timeout:?}")]
    Timeout {
        /// Bulkhead identifier
        id: String,
        /// Time waited
        timeout: Duration,
    },

    /// Semaphore closed
    #[error("Bulkhead {0} closed")]
    Closed(String),
}

/// Bulkhead configuration
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Maximum concurrent exchanges, zero for unlimited
    pub max_concurrent: usize,
    /// How long to wait for a free slot
    pub queue_timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            queue_timeout: Duration::from_secs(30),
        }
    }
}

/// Bulkhead for limiting concurrent upstream exchanges
#[derive(Debug)]
pub struct Bulkhead {
    /// Identifier (listener name)
    id: String,
    config: BulkheadConfig,
    semaphore: Option<Arc<Semaphore>>,
}

impl Bulkhead {
    /// Create a new bulkhead
    #[must_use]
    pub fn new(id: impl Into<String>, config: BulkheadConfig) -> Self {
        let semaphore =
            (config.max_concurrent > 0).then(|| Arc::new(Semaphore::new(config.max_concurrent)));
        Self {
            id: id.into(),
            config,
            semaphore,
        }
    }

    /// Get the bulkhead ID
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether a limit is enforced
    #[must_use]
    pub const fn is_limited(&self) -> bool {
        self.semaphore.is_some()
    }

    /// Acquire a permit for one exchange
    ///
    /// # Errors
    /// Returns error if no slot frees up within the queue timeout
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadError> {
        let Some(ref semaphore) = self.semaphore else {
            return Ok(BulkheadPermit {
                permit: None,
                bulkhead_id: self.id.clone(),
            });
        };

        if semaphore.available_permits() == 0 {
            debug!(
                bulkhead = %self.id,
                max_concurrent = self.config.max_concurrent,
                "Upstream exchange queued in bulkhead"
            );
        }

        match tokio::time::timeout(self.config.queue_timeout, Arc::clone(semaphore).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => Ok(BulkheadPermit {
                permit: Some(permit),
                bulkhead_id: self.id.clone(),
            }),
            Ok(Err(_)) => Err(BulkheadError::Closed(self.id.clone())),
            Err(_) => {
                warn!(
                    bulkhead = %self.id,
                    timeout_ms = self.config.queue_timeout.as_millis() as u64,
                    "Bulkhead queue timeout"
                );
                Err(BulkheadError::Timeout {
                    id: self.id.clone(),
                    timeout: self.config.queue_timeout,
                })
            }
        }
    }

    /// Number of free slots, `None` when unlimited
    #[must_use]
    pub fn available_permits(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Number of exchanges currently holding a slot
    #[must_use]
    pub fn active(&self) -> usize {
        self.available_permits()
            .map_or(0, |free| self.config.max_concurrent.saturating_sub(free))
    }
}

/// A slot in a bulkhead, released on drop.
pub struct BulkheadPermit {
    permit: Option<OwnedSemaphorePermit>,
    bulkhead_id: String,
}

impl BulkheadPermit {
    /// Get the bulkhead ID this permit belongs to
    #[must_use]
    pub fn bulkhead_id(&self) -> &str {
        &self.bulkhead_id
    }
}

impl std::fmt::Debug for BulkheadPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkheadPermit")
            .field("bulkhead_id", &self.bulkhead_id)
            .finish_non_exhaustive()
    }
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        if self.permit.is_some() {
            debug!(bulkhead = %self.bulkhead_id, "Bulkhead permit released");
        }
    }
}
