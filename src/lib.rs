//! Tiered cache over an ordered list of storage backends.
//!
//! Reads fall through the backends in order until one has the key; writes
//! and deletes go to every backend. [`middleware::response_cache`] builds an
//! HTTP response cache on top.

pub mod backend;
pub mod cache;
pub mod config;
pub mod durable;
pub mod error;
pub mod memory;
pub mod middleware;

pub use backend::{Backend, BackendInit, Ttl};
pub use cache::Cache;
pub use config::{CacheConfig, TierConfig};
pub use durable::{DurableBackend, Record, RecordStore};
#[cfg(feature = "redis")]
pub use durable::RedisRecordStore;
#[cfg(feature = "sqlite")]
pub use durable::SqliteRecordStore;
pub use error::CacheError;
pub use memory::MemoryBackend;
pub use middleware::{
  canonical_key, response_cache, CacheStatus, ResponseSnapshot, CACHEABLE_STATUS_CODES, X_CACHE,
};
