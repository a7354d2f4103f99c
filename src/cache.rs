//! Cache orchestrator fanning operations across ordered backends

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{Backend, BackendInit};
use crate::error::{CacheError, Result};

/// Ordered list of backends behind a typed get/set/del API.
///
/// Reads try the backends in list order and stop at the first hit, so the
/// fastest tier belongs first. Writes and deletes go to every backend in
/// order and stop at the first failure without undoing earlier writes.
pub struct Cache {
  backends: Vec<Box<dyn Backend>>,
}

impl std::fmt::Debug for Cache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Cache")
      .field("backends", &self.backends.len())
      .finish()
  }
}

impl Cache {
  /// Run every initializer in order. The first failing initializer aborts
  /// construction.
  pub fn new<I>(inits: I) -> Result<Self>
  where
    I: IntoIterator<Item = BackendInit>,
  {
    let backends = inits
      .into_iter()
      .map(|init| init())
      .collect::<Result<Vec<_>>>()?;

    Self::from_backends(backends)
  }

  /// Build from already constructed backends
  pub fn from_backends(backends: Vec<Box<dyn Backend>>) -> Result<Self> {
    if backends.is_empty() {
      return Err(CacheError::config("you need at least one backend"));
    }
    tracing::debug!("Cache created with {} backends", backends.len());
    Ok(Self { backends })
  }

  /// Number of configured backends
  pub fn len(&self) -> usize {
    self.backends.len()
  }

  pub fn is_empty(&self) -> bool {
    self.backends.is_empty()
  }

  /// Read `key` from the first backend that has it.
  ///
  /// When no backend has a live value, the miss kind reported by the last
  /// backend is returned.
  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
    let mut last_miss = CacheError::NotFound;

    for (tier, backend) in self.backends.iter().enumerate() {
      match backend.get(key).await {
        Ok(data) => {
          tracing::trace!(key, tier, "cache hit");
          return Ok(rmp_serde::from_slice(&data)?);
        }
        Err(e) if e.is_miss() => {
          tracing::trace!(key, tier, "cache miss: {}", e);
          last_miss = e;
        }
        Err(e) => return Err(e),
      }
    }

    Err(last_miss)
  }

  /// Encode `value` once and store it in every backend
  pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let data = rmp_serde::to_vec_named(value)?;

    for (tier, backend) in self.backends.iter().enumerate() {
      if let Err(e) = backend.set(key, data.clone()).await {
        tracing::debug!(key, tier, "cache set aborted: {}", e);
        return Err(e);
      }
    }

    Ok(())
  }

  /// Remove `key` from every backend
  pub async fn del(&self, key: &str) -> Result<()> {
    for (tier, backend) in self.backends.iter().enumerate() {
      if let Err(e) = backend.del(key).await {
        tracing::debug!(key, tier, "cache del aborted: {}", e);
        return Err(e);
      }
    }

    Ok(())
  }
}
