//! Durable cache tier backed by an external keyed record store
//!
//! The backend writes one [`Record`] per key carrying an absolute expiry in
//! epoch seconds and checks it on every read. Stores may apply their own
//! native expiry on top, but the client-side check is authoritative.

#[cfg(feature = "redis")]
mod redis_store;
#[cfg(feature = "sqlite")]
mod sqlite_store;

#[cfg(feature = "redis")]
pub use redis_store::RedisRecordStore;
#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteRecordStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{Backend, BackendInit, Ttl};
use crate::error::{CacheError, Result};

/// Record shape persisted in the external store.
///
/// The attribute names `Key`, `TTL` and `Data` are part of the on-disk
/// contract and must not change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
  #[serde(rename = "Key")]
  pub key: String,
  /// Absolute expiry in epoch seconds
  #[serde(rename = "TTL", default, skip_serializing_if = "Option::is_none")]
  pub ttl: Option<i64>,
  #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Vec<u8>>,
}

impl Record {
  pub fn is_expired(&self, now_secs: i64) -> bool {
    // A record without an expiry has no known freshness
    self.ttl.map(|ttl| now_secs > ttl).unwrap_or(true)
  }
}

/// Minimal keyed storage used by [`DurableBackend`].
///
/// `table` names the logical collection the record lives in. Failures must
/// be reported as [`CacheError::Backend`]; a missing record is `Ok(None)`.
#[async_trait]
pub trait RecordStore: Send + Sync {
  async fn get_record(&self, table: &str, key: &str) -> Result<Option<Record>>;
  async fn put_record(&self, table: &str, record: &Record) -> Result<()>;
  async fn delete_record(&self, table: &str, key: &str) -> Result<()>;
}

#[async_trait]
impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
  async fn get_record(&self, table: &str, key: &str) -> Result<Option<Record>> {
    (**self).get_record(table, key).await
  }

  async fn put_record(&self, table: &str, record: &Record) -> Result<()> {
    (**self).put_record(table, record).await
  }

  async fn delete_record(&self, table: &str, key: &str) -> Result<()> {
    (**self).delete_record(table, key).await
  }
}

/// Cache tier persisting entries through a [`RecordStore`]
pub struct DurableBackend<S> {
  store: S,
  table: String,
  ttl: Ttl,
}

impl<S: RecordStore> DurableBackend<S> {
  pub fn new(store: S, table: impl Into<String>, ttl: Ttl) -> Result<Self> {
    let table = table.into();
    if table.is_empty() {
      return Err(CacheError::config("durable: name of table is empty"));
    }
    if ttl == Ttl::After(Duration::ZERO) {
      return Err(CacheError::config(
        "durable: ttl needs to be above 0 (ttl active) or never (no ttl)",
      ));
    }

    Ok(Self { store, table, ttl })
  }

  pub fn table(&self) -> &str {
    &self.table
  }

  pub fn ttl(&self) -> Ttl {
    self.ttl
  }
}

impl<S: RecordStore + 'static> DurableBackend<S> {
  /// Deferred constructor for [`Cache::new`](crate::Cache::new)
  pub fn init(store: S, table: impl Into<String>, ttl: Ttl) -> BackendInit {
    let table = table.into();
    Box::new(move || {
      let backend = DurableBackend::new(store, table, ttl)?;
      Ok(Box::new(backend) as Box<dyn Backend>)
    })
  }
}

/// Absolute expiry in epoch seconds, truncated after adding the TTL
fn expiry_secs(ttl: Ttl, now: DateTime<Utc>) -> Option<i64> {
  ttl.duration().map(|d| {
    chrono::Duration::from_std(d)
      .ok()
      .and_then(|d| now.checked_add_signed(d))
      .map(|at| at.timestamp())
      .unwrap_or(i64::MAX)
  })
}

#[async_trait]
impl<S: RecordStore> Backend for DurableBackend<S> {
  async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
    let record = Record {
      key: key.to_string(),
      ttl: expiry_secs(self.ttl, Utc::now()),
      data: Some(value),
    };
    self.store.put_record(&self.table, &record).await
  }

  async fn get(&self, key: &str) -> Result<Vec<u8>> {
    let record = self
      .store
      .get_record(&self.table, key)
      .await?
      .ok_or(CacheError::NotFound)?;

    if self.ttl.is_enabled() && record.is_expired(Utc::now().timestamp()) {
      return Err(CacheError::Expired);
    }

    Ok(record.data.unwrap_or_default())
  }

  async fn del(&self, key: &str) -> Result<()> {
    self.store.delete_record(&self.table, key).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;
  use std::collections::HashMap;

  /// In-memory store that can be told to fail
  #[derive(Default)]
  struct MockStore {
    records: Mutex<HashMap<(String, String), Record>>,
    fail: Mutex<Option<String>>,
  }

  impl MockStore {
    fn with_record(record: Record) -> Self {
      let store = MockStore::default();
      store
        .records
        .lock()
        .insert(("TestCache".to_string(), record.key.clone()), record);
      store
    }

    fn failing(msg: &str) -> Self {
      let store = MockStore::default();
      *store.fail.lock() = Some(msg.to_string());
      store
    }

    fn check(&self) -> Result<()> {
      match self.fail.lock().clone() {
        Some(msg) => Err(CacheError::backend(msg)),
        None => Ok(()),
      }
    }
  }

  #[async_trait]
  impl RecordStore for MockStore {
    async fn get_record(&self, table: &str, key: &str) -> Result<Option<Record>> {
      self.check()?;
      Ok(
        self
          .records
          .lock()
          .get(&(table.to_string(), key.to_string()))
          .cloned(),
      )
    }

    async fn put_record(&self, table: &str, record: &Record) -> Result<()> {
      self.check()?;
      self
        .records
        .lock()
        .insert((table.to_string(), record.key.clone()), record.clone());
      Ok(())
    }

    async fn delete_record(&self, table: &str, key: &str) -> Result<()> {
      self.check()?;
      self
        .records
        .lock()
        .remove(&(table.to_string(), key.to_string()));
      Ok(())
    }
  }

  fn backend(store: MockStore, ttl: Ttl) -> DurableBackend<MockStore> {
    DurableBackend::new(store, "TestCache", ttl).unwrap()
  }

  #[test]
  fn test_new_rejects_bad_config() {
    let err = DurableBackend::new(MockStore::default(), "", Ttl::from_secs(1))
      .err()
      .unwrap();
    assert_eq!(
      err.to_string(),
      "configuration error: durable: name of table is empty"
    );

    let err = DurableBackend::new(MockStore::default(), "TestCache", Ttl::After(Duration::ZERO))
      .err()
      .unwrap();
    assert!(matches!(err, CacheError::Config(_)));

    assert!(DurableBackend::new(MockStore::default(), "TestCache", Ttl::Never).is_ok());
  }

  #[test]
  fn test_record_attribute_names() {
    let record = Record {
      key: "1".into(),
      ttl: Some(42),
      data: Some(vec![1, 2]),
    };
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["Key"], "1");
    assert_eq!(json["TTL"], 42);
    assert_eq!(json["Data"], serde_json::json!([1, 2]));

    let bare: Record = serde_json::from_str(r#"{"Key":"1"}"#).unwrap();
    assert_eq!(bare.ttl, None);
    assert_eq!(bare.data, None);
  }

  #[tokio::test]
  async fn test_get_not_found() {
    let backend = backend(MockStore::default(), Ttl::Never);
    assert!(matches!(backend.get("1").await, Err(CacheError::NotFound)));
  }

  #[tokio::test]
  async fn test_get_found_without_ttl() {
    let backend = backend(
      MockStore::with_record(Record {
        key: "1".into(),
        ttl: None,
        data: Some(b"One".to_vec()),
      }),
      Ttl::Never,
    );
    assert_eq!(backend.get("1").await.unwrap(), b"One");
  }

  #[tokio::test]
  async fn test_get_found_but_expired() {
    let backend = backend(
      MockStore::with_record(Record {
        key: "1".into(),
        ttl: Some(Utc::now().timestamp() - 1),
        data: Some(b"One".to_vec()),
      }),
      Ttl::from_secs(1),
    );
    assert!(matches!(backend.get("1").await, Err(CacheError::Expired)));
  }

  #[tokio::test]
  async fn test_get_missing_ttl_with_ttl_enabled() {
    let backend = backend(
      MockStore::with_record(Record {
        key: "1".into(),
        ttl: None,
        data: Some(b"One".to_vec()),
      }),
      Ttl::from_secs(60),
    );
    assert!(matches!(backend.get("1").await, Err(CacheError::Expired)));
  }

  #[tokio::test]
  async fn test_store_errors_pass_through() {
    let backend = backend(MockStore::failing("some error"), Ttl::from_secs(1));

    let err = backend.get("1").await.unwrap_err();
    assert!(matches!(err, CacheError::Backend(_)));
    assert_eq!(err.to_string(), "backend error: some error");

    assert!(matches!(
      backend.set("1", b"One".to_vec()).await,
      Err(CacheError::Backend(_))
    ));
    assert!(matches!(backend.del("1").await, Err(CacheError::Backend(_))));
  }

  #[tokio::test]
  async fn test_set_writes_absolute_expiry() {
    let backend = backend(MockStore::default(), Ttl::from_secs(60));
    let before = Utc::now().timestamp();
    backend.set("1", b"One".to_vec()).await.unwrap();

    let record = backend.store.records.lock()[&("TestCache".to_string(), "1".to_string())].clone();
    let ttl = record.ttl.unwrap();
    assert!(ttl >= before + 60 && ttl <= Utc::now().timestamp() + 60);
    assert_eq!(record.data, Some(b"One".to_vec()));

    assert_eq!(backend.get("1").await.unwrap(), b"One");
  }

  #[test]
  fn test_expiry_adds_before_truncating() {
    let now = DateTime::from_timestamp(1_000, 600_000_000).unwrap();
    assert_eq!(
      expiry_secs(Ttl::After(Duration::from_millis(1_500)), now),
      Some(1_002)
    );
    assert_eq!(expiry_secs(Ttl::After(Duration::from_secs(60)), now), Some(1_060));
    assert_eq!(expiry_secs(Ttl::Never, now), None);
    assert_eq!(
      expiry_secs(Ttl::After(Duration::from_secs(u64::MAX)), now),
      Some(i64::MAX)
    );
  }

  #[tokio::test]
  async fn test_set_without_ttl_omits_expiry() {
    let backend = backend(MockStore::default(), Ttl::Never);
    backend.set("1", b"One".to_vec()).await.unwrap();
    let record = backend.store.records.lock()[&("TestCache".to_string(), "1".to_string())].clone();
    assert_eq!(record.ttl, None);
  }

  #[tokio::test]
  async fn test_del() {
    let backend = backend(MockStore::default(), Ttl::Never);
    backend.set("1", b"One".to_vec()).await.unwrap();
    backend.del("1").await.unwrap();
    backend.del("1").await.unwrap();
    assert!(matches!(backend.get("1").await, Err(CacheError::NotFound)));
  }
}
