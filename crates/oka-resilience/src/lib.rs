//! # OkaProxy Resilience
//!
//! Protection for the proxy and its upstreams:
//! - [`store`]: atomic fixed-window counters (Redis, in-memory)
//! - [`rate_limit`]: the per-client rate-limit admission stage
//! - [`bulkhead`]: concurrency limit on upstream exchanges

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bulkhead;
pub mod rate_limit;
pub mod store;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadError, BulkheadPermit};
pub use rate_limit::{KeyScope, RateDecision, RateLimitConfig, RateLimiter, RATE_LIMIT_MESSAGE};
pub use store::{
    CounterStore, MemoryCounterStore, RedisCounterStore, StoreError, StoreResult,
    INCREMENT_SCRIPT,
};
