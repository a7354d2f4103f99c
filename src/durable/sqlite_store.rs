//! SQLite-backed record store

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use super::{Record, RecordStore};
use crate::error::{CacheError, Result};

const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
"#;

// One physical table holds every logical table, keyed by (store, Key).
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_records (
    store TEXT NOT NULL,
    "Key" TEXT NOT NULL,
    "TTL" INTEGER,
    "Data" BLOB,
    PRIMARY KEY (store, "Key")
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_cache_records_ttl ON cache_records("TTL");
"#;

pub struct SqliteRecordStore {
  conn: Connection,
}

impl SqliteRecordStore {
  pub async fn open(path: &str) -> Result<Self> {
    let conn = if path == ":memory:" {
      Connection::open_in_memory().await
    } else {
      Connection::open(path).await
    }
    .map_err(CacheError::backend)?;

    conn
      .call(|conn| {
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await
      .map_err(CacheError::backend)?;

    tracing::info!("SQLite record store opened at {}", path);
    Ok(Self { conn })
  }

  pub async fn in_memory() -> Result<Self> {
    Self::open(":memory:").await
  }

  /// Drop records of `table` whose expiry lies before `now_secs`.
  ///
  /// Secondary to the client-side check; records without an expiry are kept.
  pub async fn purge_expired(&self, table: &str, now_secs: i64) -> Result<usize> {
    let table = table.to_string();
    let purged = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          r#"DELETE FROM cache_records WHERE store = ?1 AND "TTL" IS NOT NULL AND "TTL" < ?2"#,
          params![table, now_secs],
        )?;
        Ok(n)
      })
      .await
      .map_err(CacheError::backend)?;

    if purged > 0 {
      tracing::debug!("Purged {} expired records", purged);
    }
    Ok(purged)
  }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
  async fn get_record(&self, table: &str, key: &str) -> Result<Option<Record>> {
    let (table, key) = (table.to_string(), key.to_string());
    self
      .conn
      .call(move |conn| {
        let record = conn
          .query_row(
            r#"SELECT "Key", "TTL", "Data" FROM cache_records WHERE store = ?1 AND "Key" = ?2"#,
            params![table, key],
            |row| {
              Ok(Record {
                key: row.get(0)?,
                ttl: row.get(1)?,
                data: row.get(2)?,
              })
            },
          )
          .optional()?;
        Ok(record)
      })
      .await
      .map_err(CacheError::backend)
  }

  async fn put_record(&self, table: &str, record: &Record) -> Result<()> {
    let table = table.to_string();
    let record = record.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          r#"INSERT OR REPLACE INTO cache_records (store, "Key", "TTL", "Data") VALUES (?1, ?2, ?3, ?4)"#,
          params![table, record.key, record.ttl, record.data],
        )?;
        Ok(())
      })
      .await
      .map_err(CacheError::backend)
  }

  async fn delete_record(&self, table: &str, key: &str) -> Result<()> {
    let (table, key) = (table.to_string(), key.to_string());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          r#"DELETE FROM cache_records WHERE store = ?1 AND "Key" = ?2"#,
          params![table, key],
        )?;
        Ok(())
      })
      .await
      .map_err(CacheError::backend)
  }
}
