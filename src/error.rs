//! Error taxonomy shared by every cache tier

use thiserror::Error;

/// Boxed source for failures raised by a storage backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by backends and the cache orchestrator.
///
/// `NotFound` and `Expired` are recoverable miss signals that the cache
/// consumes while falling through its tiers. Every other variant aborts the
/// current operation and is handed back to the caller untouched.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("item not found")]
  NotFound,

  #[error("item found but expired")]
  Expired,

  #[error("backend error: {0}")]
  Backend(#[source] BoxError),

  #[error("configuration error: {0}")]
  Config(String),

  #[error("failed to encode value: {0}")]
  Encode(#[from] rmp_serde::encode::Error),

  #[error("failed to decode value: {0}")]
  Decode(#[from] rmp_serde::decode::Error),
}

impl CacheError {
  pub fn backend<E>(err: E) -> Self
  where
    E: Into<BoxError>,
  {
    CacheError::Backend(err.into())
  }

  pub fn config(msg: impl Into<String>) -> Self {
    CacheError::Config(msg.into())
  }

  /// True for the two soft failures a read may fall through.
  pub fn is_miss(&self) -> bool {
    matches!(self, CacheError::NotFound | CacheError::Expired)
  }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
