//! Redis-backed record store
//!
//! Each record is a hash at `{table}:{key}` with the fields `Key`, `TTL` and
//! `Data`. When a record carries an expiry, `EXPIREAT` is set as well so Redis
//! reclaims it natively.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;

use super::{Record, RecordStore};
use crate::error::{CacheError, Result};

pub struct RedisRecordStore {
  connection: ConnectionManager,
}

impl RedisRecordStore {
  /// Connect using a `redis://` or `rediss://` URL
  pub async fn connect(url: &str) -> Result<Self> {
    let client = Client::open(url).map_err(CacheError::backend)?;
    let connection = ConnectionManager::new(client)
      .await
      .map_err(CacheError::backend)?;
    Ok(Self { connection })
  }

  /// Test the connection to Redis
  pub async fn test_connection(&self) -> Result<()> {
    let mut conn = self.connection.clone();
    let _: () = redis::cmd("PING")
      .query_async(&mut conn)
      .await
      .map_err(CacheError::backend)?;
    Ok(())
  }
}

fn record_key(table: &str, key: &str) -> String {
  format!("{}:{}", table, key)
}

fn record_from_fields(mut fields: HashMap<String, Vec<u8>>) -> Result<Option<Record>> {
  if fields.is_empty() {
    return Ok(None);
  }

  let key = fields
    .remove("Key")
    .map(String::from_utf8)
    .transpose()
    .map_err(CacheError::backend)?
    .unwrap_or_default();

  let ttl = match fields.remove("TTL") {
    Some(raw) => {
      let text = String::from_utf8(raw).map_err(CacheError::backend)?;
      Some(text.parse::<i64>().map_err(CacheError::backend)?)
    }
    None => None,
  };

  Ok(Some(Record {
    key,
    ttl,
    data: fields.remove("Data"),
  }))
}

#[async_trait]
impl RecordStore for RedisRecordStore {
  async fn get_record(&self, table: &str, key: &str) -> Result<Option<Record>> {
    let mut conn = self.connection.clone();
    let fields: HashMap<String, Vec<u8>> = conn
      .hgetall(record_key(table, key))
      .await
      .map_err(CacheError::backend)?;
    record_from_fields(fields)
  }

  async fn put_record(&self, table: &str, record: &Record) -> Result<()> {
    let mut conn = self.connection.clone();
    let k = record_key(table, &record.key);

    let mut pipe = redis::pipe();
    pipe.atomic().del(&k).ignore();
    pipe.hset(&k, "Key", &record.key).ignore();
    if let Some(ttl) = record.ttl {
      pipe.hset(&k, "TTL", ttl).ignore();
      pipe.expire_at(&k, ttl).ignore();
    }
    if let Some(data) = &record.data {
      pipe.hset(&k, "Data", data.as_slice()).ignore();
    }

    let _: () = pipe
      .query_async(&mut conn)
      .await
      .map_err(CacheError::backend)?;
    Ok(())
  }

  async fn delete_record(&self, table: &str, key: &str) -> Result<()> {
    let mut conn = self.connection.clone();
    let _: () = conn
      .del(record_key(table, key))
      .await
      .map_err(CacheError::backend)?;
    Ok(())
  }
}
