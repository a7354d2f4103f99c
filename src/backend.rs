//! Backend capability contract

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// A storage tier the cache can read from and write to.
///
/// `get` reports a missing key with [`CacheError::NotFound`] and a lapsed key
/// with [`CacheError::Expired`]. Transport or storage failures use
/// [`CacheError::Backend`].
///
/// [`CacheError::NotFound`]: crate::CacheError::NotFound
/// [`CacheError::Expired`]: crate::CacheError::Expired
/// [`CacheError::Backend`]: crate::CacheError::Backend
#[async_trait]
pub trait Backend: Send + Sync {
  async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
  async fn get(&self, key: &str) -> Result<Vec<u8>>;
  async fn del(&self, key: &str) -> Result<()>;
}

/// Deferred backend constructor, run once by [`Cache::new`](crate::Cache::new).
pub type BackendInit = Box<dyn FnOnce() -> Result<Box<dyn Backend>> + Send>;

/// Time-to-live applied to every entry a backend writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
  /// Entries never expire
  Never,
  /// Entries expire this long after they were written
  After(Duration),
}

impl Ttl {
  /// Build from a seconds count where 0 means no expiry
  pub fn from_secs(secs: u64) -> Self {
    if secs == 0 {
      Ttl::Never
    } else {
      Ttl::After(Duration::from_secs(secs))
    }
  }

  pub fn duration(&self) -> Option<Duration> {
    match self {
      Ttl::Never => None,
      Ttl::After(d) => Some(*d),
    }
  }

  pub fn is_enabled(&self) -> bool {
    matches!(self, Ttl::After(_))
  }
}

impl From<Duration> for Ttl {
  fn from(d: Duration) -> Self {
    Ttl::After(d)
  }
}

impl std::fmt::Display for Ttl {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Ttl::Never => write!(f, "never"),
      Ttl::After(d) => write!(f, "{}ms", d.as_millis()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ttl_from_secs() {
    assert_eq!(Ttl::from_secs(0), Ttl::Never);
    assert_eq!(Ttl::from_secs(5), Ttl::After(Duration::from_secs(5)));
    assert!(!Ttl::Never.is_enabled());
    assert_eq!(Ttl::Never.duration(), None);
  }

  #[test]
  fn test_ttl_display() {
    assert_eq!(Ttl::Never.to_string(), "never");
    assert_eq!(Ttl::from(Duration::from_millis(1500)).to_string(), "1500ms");
  }
}
