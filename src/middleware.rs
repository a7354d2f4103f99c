//! HTTP response cache middleware
//!
//! Memoizes whole GET responses in a [`Cache`], keyed by the request path and
//! a canonical form of its query string.
//!
//! ```rust,no_run
//! use axum::{middleware, routing::get, Router};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tiercache::{response_cache, Cache, MemoryBackend, Ttl};
//!
//! # async fn run() -> Result<(), tiercache::CacheError> {
//! let cache = Arc::new(Cache::new([MemoryBackend::init(
//!   Ttl::After(Duration::from_secs(600)),
//!   true,
//! )])?);
//!
//! let app: Router = Router::new()
//!   .route("/", get(|| async { "welcome" }))
//!   .layer(middleware::from_fn_with_state(cache, response_cache));
//! # Ok(())
//! # }
//! ```

use axum::{
  body::{to_bytes, Body},
  extract::{Request, State},
  http::{HeaderName, HeaderValue, Method, StatusCode, Uri},
  middleware::Next,
  response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::Cache;
use crate::error::CacheError;

/// Response header reporting how the cache served a request
pub const X_CACHE: &str = "x-cache";

/// Status codes whose responses may be stored
pub const CACHEABLE_STATUS_CODES: [StatusCode; 11] = [
  StatusCode::OK,
  StatusCode::NON_AUTHORITATIVE_INFORMATION,
  StatusCode::NO_CONTENT,
  StatusCode::PARTIAL_CONTENT,
  StatusCode::MULTIPLE_CHOICES,
  StatusCode::MOVED_PERMANENTLY,
  StatusCode::NOT_FOUND,
  StatusCode::METHOD_NOT_ALLOWED,
  StatusCode::GONE,
  StatusCode::URI_TOO_LONG,
  StatusCode::NOT_IMPLEMENTED,
];

/// Value of the [`X_CACHE`] header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
  Hit,
  Miss,
  Expired,
}

impl CacheStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      CacheStatus::Hit => "HIT",
      CacheStatus::Miss => "MISS",
      CacheStatus::Expired => "EXPIRED",
    }
  }
}

impl std::fmt::Display for CacheStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A fully buffered response as stored in the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  /// Header pairs in their original order; names may repeat
  pub headers: Vec<(String, Vec<u8>)>,
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  /// Buffer a downstream response
  pub async fn capture(response: Response) -> Result<Self, axum::Error> {
    let (parts, body) = response.into_parts();
    let body = to_bytes(body, usize::MAX).await?;

    let headers = parts
      .headers
      .iter()
      .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
      .collect();

    Ok(Self {
      status: parts.status.as_u16(),
      headers,
      body: body.to_vec(),
    })
  }

  pub fn is_cacheable(&self) -> bool {
    CACHEABLE_STATUS_CODES
      .iter()
      .any(|code| code.as_u16() == self.status)
  }

  /// Replay the snapshot, tagging it with `cache_status` when given
  pub fn respond(self, cache_status: Option<CacheStatus>) -> Response {
    let mut response = Response::new(Body::from(self.body));
    *response.status_mut() =
      StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let headers = response.headers_mut();
    for (name, value) in self.headers {
      match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_bytes(&value),
      ) {
        (Ok(name), Ok(value)) => {
          headers.append(name, value);
        }
        _ => tracing::warn!("Skipping invalid cached header: {}", name),
      }
    }

    if let Some(status) = cache_status {
      headers.insert(X_CACHE, HeaderValue::from_static(status.as_str()));
    }

    response
  }
}

/// Cache key for a request: its path plus the query string with names
/// sorted and every name's values sorted.
pub fn canonical_key(uri: &Uri) -> String {
  let query = uri.query().map(canonical_query).unwrap_or_default();
  if query.is_empty() {
    uri.path().to_string()
  } else {
    format!("{}?{}", uri.path(), query)
  }
}

fn canonical_query(query: &str) -> String {
  let mut params: BTreeMap<Vec<u8>, Vec<Vec<u8>>> = BTreeMap::new();
  for pair in query.split('&').filter(|p| !p.is_empty()) {
    let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
    params
      .entry(decode_component(name))
      .or_default()
      .push(decode_component(value));
  }

  let mut encoded = Vec::new();
  for (name, values) in params.iter_mut() {
    values.sort();
    for value in values.iter() {
      encoded.push(format!(
        "{}={}",
        urlencoding::encode_binary(name),
        urlencoding::encode_binary(value)
      ));
    }
  }
  encoded.join("&")
}

// Decodes to raw bytes so components that are not UTF-8 stay distinct.
fn decode_component(raw: &str) -> Vec<u8> {
  let spaced = raw.replace('+', " ");
  urlencoding::decode_binary(spaced.as_bytes()).into_owned()
}

/// Axum middleware serving GET requests from `cache`.
///
/// Install with [`axum::middleware::from_fn_with_state`]. Misses run the
/// inner handler, reply immediately and store the response in the
/// background when its status is in [`CACHEABLE_STATUS_CODES`].
pub async fn response_cache(
  State(cache): State<Arc<Cache>>,
  request: Request,
  next: Next,
) -> Response {
  if *request.method() != Method::GET {
    return next.run(request).await;
  }

  let key = canonical_key(request.uri());

  let pending = match cache.get::<ResponseSnapshot>(&key).await {
    Ok(snapshot) => return snapshot.respond(Some(CacheStatus::Hit)),
    Err(CacheError::NotFound) => CacheStatus::Miss,
    Err(CacheError::Expired) => CacheStatus::Expired,
    Err(e) => {
      tracing::error!(key, "Cache lookup failed: {}", e);
      return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
  };

  let snapshot = match ResponseSnapshot::capture(next.run(request).await).await {
    Ok(snapshot) => snapshot,
    Err(e) => {
      tracing::error!(key, "Failed to buffer response: {}", e);
      return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
  };

  if !snapshot.is_cacheable() {
    tracing::trace!(key, status = snapshot.status, "response not cacheable");
    return snapshot.respond(None);
  }

  // Populate in the background; the response does not wait for it.
  let stored = snapshot.clone();
  tokio::spawn(async move {
    if let Err(e) = cache.set(&key, &stored).await {
      tracing::warn!(key, "Failed to store response: {}", e);
    }
  });

  snapshot.respond(Some(pending))
}
