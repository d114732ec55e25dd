//! Fixed-window counter stores.
//!
//! A counter is created by its first increment, which also sets its expiry to
//! the window length. Later increments in the same window never touch the
//! expiry, so the window resets when the key expires.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

/// Increment a counter and start its window on first use.
pub const INCREMENT_SCRIPT: &str = r"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return current
";

/// Error types for counter store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection or command failure
    #[error("Counter store error: {0}")]
    Backend(String),

    /// Operation timeout
    #[error("Counter store operation timeout after {0:?}")]
    Timeout(Duration),

    /// Store already released
    #[error("Counter store closed")]
    Closed,

    /// Bad connection settings
    #[error("Counter store configuration error: {0}")]
    Config(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Increments between sweeps of expired in-memory counters.
pub const SWEEP_INTERVAL: u64 = 1024;

/// Result type for counter store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared counter backend.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, starting a `window` expiry when the
    /// post-increment value is 1. Returns the post-increment value.
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64>;

    /// Check that the backend is reachable
    async fn health_check(&self) -> StoreResult<()>;

    /// Release connections. Further operations fail with [`StoreError::Closed`].
    async fn close(&self);

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Redis backed counters shared by every proxy instance.
pub struct RedisCounterStore {
    client: redis::Client,
    connection: RwLock<Option<ConnectionManager>>,
    connecting: tokio::sync::Mutex<()>,
    script: Script,
    operation_timeout: Duration,
    connect_timeout: Duration,
    closed: AtomicBool,
}

impl RedisCounterStore {
    /// Create a store. The connection is established on first use.
    ///
    /// # Errors
    /// Returns error if the URL is not a valid Redis URL.
    pub fn new(
        url: &str,
        operation_timeout: Duration,
        connect_timeout: Duration,
    ) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Config(e.to_string()))?;
        info!(
            operation_timeout_ms = operation_timeout.as_millis() as u64,
            "Initializing Redis counter store"
        );

        Ok(Self {
            client,
            connection: RwLock::new(None),
            connecting: tokio::sync::Mutex::new(()),
            script: Script::new(INCREMENT_SCRIPT),
            operation_timeout,
            connect_timeout,
            closed: AtomicBool::new(false),
        })
    }

    async fn connection(&self) -> StoreResult<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        let cached = self.connection.read().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        // Only the first caller after a cold start dials; the rest reuse its result.
        let _connecting = self.connecting.lock().await;
        let cached = self.connection.read().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        let conn = tokio::time::timeout(
            self.connect_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.connect_timeout))??;

        debug!("Redis counter store connected");
        *self.connection.write() = Some(conn.clone());
        Ok(conn)
    }

    async fn bounded<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        tokio::time::timeout(self.operation_timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.operation_timeout))?
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("operation_timeout", &self.operation_timeout)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let count: u64 = self
                .script
                .key(key)
                .arg(window.as_secs())
                .invoke_async(&mut conn)
                .await?;
            Ok(count)
        })
        .await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.bounded(async {
            let mut conn = self.connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _connecting = self.connecting.lock().await;
            self.connection.write().take();
            info!("Redis counter store closed");
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Single-process counters with the same window semantics as Redis.
///
/// Expired counters are dropped every [`SWEEP_INTERVAL`] increments.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    state: Mutex<MemoryState>,
    closed: AtomicBool,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, (u64, Instant)>,
    increments: u64,
}

impl MemoryCounterStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime of a live counter.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(_, expires_at)| *expires_at - now)
    }

    /// Current value of a live counter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(count, _)| *count)
    }

    /// Counters held, live or not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether no counter is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<u64> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        state.increments += 1;
        if state.increments % SWEEP_INTERVAL == 0 {
            state.entries.retain(|_, (_, expires_at)| *expires_at > now);
        }

        let entry = state
            .entries
            .entry(key.to_string())
            .or_insert((0, now + window));

        if entry.1 <= now {
            *entry = (0, now + window);
        }
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn health_check(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.state.lock().entries.clear();
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
