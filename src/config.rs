//! YAML configuration describing the cache tiers

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::backend::{BackendInit, Ttl};
use crate::cache::Cache;
use crate::memory::MemoryBackend;

/// Expand `${VAR}` and `$VAR` references from the environment.
///
/// Unset variables expand to nothing. A `$` not followed by a name, or a
/// `${` without its closing brace, is kept as written.
fn expand_env_vars(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  let mut chars = input.chars().peekable();

  while let Some(c) = chars.next() {
    if c != '$' {
      out.push(c);
      continue;
    }

    if chars.peek() == Some(&'{') {
      chars.next();
      let mut name = String::new();
      let mut closed = false;
      for c in chars.by_ref() {
        if c == '}' {
          closed = true;
          break;
        }
        name.push(c);
      }
      if closed {
        out.push_str(&std::env::var(&name).unwrap_or_default());
      } else {
        out.push_str("${");
        out.push_str(&name);
      }
      continue;
    }

    let mut name = String::new();
    while let Some(&c) = chars.peek() {
      if !(c.is_ascii_alphanumeric() || c == '_') {
        break;
      }
      name.push(c);
      chars.next();
    }
    if name.is_empty() {
      out.push('$');
    } else {
      out.push_str(&std::env::var(&name).unwrap_or_default());
    }
  }

  out
}

/// One cache tier, listed in read-priority order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TierConfig {
  Memory {
    /// Seconds until an entry expires (0 = never)
    #[serde(default)]
    ttl_secs: u64,
    #[serde(default)]
    renew_on_read: bool,
  },
  Sqlite {
    #[serde(default = "default_sqlite_path")]
    path: String,
    #[serde(default = "default_table")]
    table: String,
    /// Seconds until a record expires; omit for records that never expire
    #[serde(default)]
    ttl_secs: Option<u64>,
  },
  Redis {
    #[serde(default = "default_redis_url")]
    url: String,
    #[serde(default = "default_table")]
    table: String,
    /// Seconds until a record expires; omit for records that never expire
    #[serde(default)]
    ttl_secs: Option<u64>,
  },
}

fn default_sqlite_path() -> String {
  "./data/cache.db".into()
}

fn default_redis_url() -> String {
  "redis://localhost:6379/0".into()
}

fn default_table() -> String {
  "tiercache".into()
}

impl TierConfig {
  pub fn kind(&self) -> &'static str {
    match self {
      TierConfig::Memory { .. } => "memory",
      TierConfig::Sqlite { .. } => "sqlite",
      TierConfig::Redis { .. } => "redis",
    }
  }

  /// Open the tier's store and return its deferred constructor
  pub async fn open(&self) -> Result<BackendInit, anyhow::Error> {
    match self {
      TierConfig::Memory {
        ttl_secs,
        renew_on_read,
      } => Ok(MemoryBackend::init(Ttl::from_secs(*ttl_secs), *renew_on_read)),

      #[cfg(feature = "sqlite")]
      TierConfig::Sqlite {
        path,
        table,
        ttl_secs,
      } => {
        if let Some(parent) = Path::new(path).parent() {
          if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
          }
        }
        let store = crate::durable::SqliteRecordStore::open(path).await?;
        Ok(crate::durable::DurableBackend::init(
          store,
          table.clone(),
          durable_ttl(*ttl_secs),
        ))
      }

      #[cfg(feature = "redis")]
      TierConfig::Redis {
        url,
        table,
        ttl_secs,
      } => {
        let store = crate::durable::RedisRecordStore::connect(url).await?;
        Ok(crate::durable::DurableBackend::init(
          store,
          table.clone(),
          durable_ttl(*ttl_secs),
        ))
      }

      #[allow(unreachable_patterns)]
      other => anyhow::bail!(
        "{} tier requested but the `{}` feature is not enabled",
        other.kind(),
        other.kind()
      ),
    }
  }
}

// Zero stays a zero duration so the durable backend rejects it.
#[cfg(any(feature = "sqlite", feature = "redis"))]
fn durable_ttl(ttl_secs: Option<u64>) -> Ttl {
  ttl_secs.map_or(Ttl::Never, |secs| Ttl::After(std::time::Duration::from_secs(secs)))
}

fn default_tiers() -> Vec<TierConfig> {
  vec![TierConfig::Memory {
    ttl_secs: 600,
    renew_on_read: true,
  }]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
  #[serde(default = "default_host")]
  pub host: String,
  #[serde(default = "default_port")]
  pub port: u16,
}

fn default_host() -> String {
  "127.0.0.1".into()
}

fn default_port() -> u16 {
  3000
}

impl Default for ServerSection {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_port(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_level")]
  pub level: String,
}

fn default_level() -> String {
  "info".into()
}

impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_tiers")]
  pub tiers: Vec<TierConfig>,
  #[serde(default)]
  pub server: ServerSection,
  #[serde(default)]
  pub logging: LoggingSection,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      tiers: default_tiers(),
      server: ServerSection::default(),
      logging: LoggingSection::default(),
    }
  }
}

impl CacheConfig {
  pub fn from_yaml(content: &str) -> Result<Self, anyhow::Error> {
    let expanded = expand_env_vars(content);
    let mut config: Self = serde_yaml::from_str(&expanded)?;
    if config.tiers.is_empty() {
      config.tiers = default_tiers();
    }
    Ok(config)
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    let content = std::fs::read_to_string(&path)?;
    Self::from_yaml(&content)
  }

  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    for p in ["tiercache.yaml", "tiercache.yml"] {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }

  pub fn address(&self) -> String {
    format!("{}:{}", self.server.host, self.server.port)
  }

  /// Open every tier in order and assemble the cache
  pub async fn build_cache(&self) -> Result<Cache, anyhow::Error> {
    let mut inits = Vec::with_capacity(self.tiers.len());
    for tier in &self.tiers {
      tracing::info!("Opening {} tier", tier.kind());
      inits.push(tier.open().await?);
    }
    Ok(Cache::new(inits)?)
  }
}
