//! In-process cache tier with TTL expiry

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::backend::{Backend, BackendInit, Ttl};
use crate::error::{CacheError, Result};

/// How often the sweep task evicts expired entries
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
struct Entry {
  value: Vec<u8>,
  /// `None` when the backend was built with [`Ttl::Never`]
  expires_at: Option<Instant>,
}

impl Entry {
  fn is_expired(&self, now: Instant) -> bool {
    self.expires_at.map(|exp| now > exp).unwrap_or(false)
  }
}

type Entries = RwLock<HashMap<String, Entry>>;

/// Concurrent byte store guarded by a single reader/writer lock.
///
/// Expired entries are reported as [`CacheError::Expired`] until the sweep
/// task removes them; reads never delete.
pub struct MemoryBackend {
  entries: Arc<Entries>,
  ttl: Ttl,
  renew_on_read: bool,
  shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl MemoryBackend {
  /// Create the backend and, when `ttl` is enabled, start its sweep task on
  /// the current tokio runtime.
  pub fn new(ttl: Ttl, renew_on_read: bool) -> Result<Self> {
    let entries: Arc<Entries> = Arc::new(RwLock::new(HashMap::new()));

    let shutdown_tx = if ttl.is_enabled() {
      let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| CacheError::config(format!("memory: sweep needs a tokio runtime: {}", e)))?;
      let (tx, rx) = oneshot::channel();
      handle.spawn(run_sweep(entries.clone(), rx));
      Some(tx)
    } else {
      None
    };

    tracing::debug!("Memory backend created: ttl={}, renew_on_read={}", ttl, renew_on_read);

    Ok(Self {
      entries,
      ttl,
      renew_on_read,
      shutdown_tx: Mutex::new(shutdown_tx),
    })
  }

  /// Deferred constructor for [`Cache::new`](crate::Cache::new)
  pub fn init(ttl: Ttl, renew_on_read: bool) -> BackendInit {
    Box::new(move || {
      let backend = MemoryBackend::new(ttl, renew_on_read)?;
      Ok(Box::new(backend) as Box<dyn Backend>)
    })
  }

  /// Stop the sweep task. Dropping the backend has the same effect.
  pub fn shutdown(&self) {
    if let Some(tx) = self.shutdown_tx.lock().take() {
      let _ = tx.send(());
    }
  }

  /// Number of stored entries, expired ones included
  pub fn len(&self) -> usize {
    self.entries.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn lookup(&self, key: &str, now: Instant) -> Result<Vec<u8>> {
    if !self.renew_on_read || !self.ttl.is_enabled() {
      let data = self.entries.read();
      let entry = data.get(key).ok_or(CacheError::NotFound)?;
      if entry.is_expired(now) {
        return Err(CacheError::Expired);
      }
      return Ok(entry.value.clone());
    }

    let data = self.entries.upgradable_read();
    match data.get(key) {
      None => return Err(CacheError::NotFound),
      Some(entry) if entry.is_expired(now) => return Err(CacheError::Expired),
      Some(_) => {}
    }

    let mut data = RwLockUpgradableReadGuard::upgrade(data);
    let entry = data.get_mut(key).ok_or(CacheError::NotFound)?;
    entry.expires_at = self.ttl.duration().map(|d| now + d);
    Ok(entry.value.clone())
  }
}

impl Drop for MemoryBackend {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[async_trait]
impl Backend for MemoryBackend {
  async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
    let expires_at = self.ttl.duration().map(|d| Instant::now() + d);
    self
      .entries
      .write()
      .insert(key.to_string(), Entry { value, expires_at });
    Ok(())
  }

  async fn get(&self, key: &str) -> Result<Vec<u8>> {
    self.lookup(key, Instant::now())
  }

  async fn del(&self, key: &str) -> Result<()> {
    self.entries.write().remove(key);
    Ok(())
  }
}

/// Remove every entry whose expiry is at or before `now`
fn sweep(entries: &Entries, now: Instant) -> usize {
  let mut data = entries.write();
  let before = data.len();
  data.retain(|_, entry| entry.expires_at.map(|exp| exp > now).unwrap_or(true));
  before - data.len()
}

async fn run_sweep(entries: Arc<Entries>, mut shutdown_rx: oneshot::Receiver<()>) {
  let mut ticker = tokio::time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);

  loop {
    tokio::select! {
      tick = ticker.tick() => {
        let evicted = sweep(&entries, tick);
        if evicted > 0 {
          tracing::debug!("Evicted {} expired keys", evicted);
        }
      }
      _ = &mut shutdown_rx => {
        tracing::debug!("Memory backend sweep stopped");
        break;
      }
    }
  }
}
