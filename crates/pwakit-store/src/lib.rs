//! # PWAKit Store
//!
//! Versioned request/response cache storage.
//!
//! ## Features
//!
//! - **Namespaces**: named, versioned partitions (`caches.open()`, `caches.delete()`)
//! - **Entries**: GET request → response snapshots, replaced wholesale
//! - **Backends**: in-memory, or SQLite for persistence across restarts
//! - **Soft writes**: `CacheStorage::put` never fails the caller
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage (caches)
//!     │
//!     ├── stats (reads / writes / failed writes)
//!     │
//!     └── dyn CacheBackend
//!             ├── MemoryBackend
//!             └── SqliteBackend
//!                     └── namespace → CacheKey → CacheEntry
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use pwakit_common::{StoreBackendKind, StoreSettings};
use pwakit_net::{Request, Response, ResponseSource};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

// ==================== Errors ====================

/// Errors that can occur in cache storage.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Quota exceeded: {needed} bytes needed, quota is {quota}")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ==================== Keys and entries ====================

/// Identity of a cached request: upper-case method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (normalized).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: i64,
}

impl CacheEntry {
    /// Snapshot a response under the given key.
    pub fn from_response(key: CacheKey, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: key.url,
            method: key.method,
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }

    /// Body size in bytes, the unit quotas are measured in.
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> StoreResult<Response> {
        let url = Url::parse(&self.url).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let status =
            StatusCode::from_u16(self.status).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        Ok(Response {
            url,
            status,
            headers,
            body: Bytes::from(self.body.clone()),
            source: ResponseSource::Cache,
        })
    }
}

/// Handle to an opened namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle {
    namespace: String,
}

impl CacheHandle {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

// ==================== Backend ====================

/// Storage engine behind `CacheStorage`.
///
/// Writing into a namespace that does not exist creates it. Reads from a missing
/// namespace return nothing. A single key holds at most one entry; later writes win.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Create the namespace if it does not exist.
    async fn open(&self, namespace: &str) -> StoreResult<()>;

    async fn has(&self, namespace: &str) -> StoreResult<bool>;

    async fn get(&self, namespace: &str, key: &CacheKey) -> StoreResult<Option<CacheEntry>>;

    async fn put(&self, namespace: &str, entry: CacheEntry) -> StoreResult<()>;

    /// Write every entry or none of them.
    async fn put_all(&self, namespace: &str, entries: Vec<CacheEntry>) -> StoreResult<()>;

    /// Remove a namespace and its entries. Returns whether it existed.
    async fn delete(&self, namespace: &str) -> StoreResult<bool>;

    /// Namespace names in creation order.
    async fn namespaces(&self) -> StoreResult<Vec<String>>;

    async fn keys(&self, namespace: &str) -> StoreResult<Vec<CacheKey>>;

    /// Total body bytes stored across all namespaces.
    async fn usage(&self) -> StoreResult<u64>;
}

pub(crate) fn check_quota(quota: Option<u64>, needed: u64) -> StoreResult<()> {
    match quota {
        Some(quota) if needed > quota => Err(StoreError::QuotaExceeded { needed, quota }),
        _ => Ok(()),
    }
}

// ==================== Cache Storage ====================

/// Counters of store traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
    pub failed_writes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    failed_writes: AtomicU64,
}

/// Cache storage (the `caches` global).
#[derive(Clone)]
pub struct CacheStorage {
    backend: Arc<dyn CacheBackend>,
    counters: Arc<Counters>,
}

impl CacheStorage {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Unbounded in-memory storage.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new(None)))
    }

    /// Build the backend described by the settings.
    pub fn from_settings(settings: &StoreSettings) -> StoreResult<Self> {
        let backend: Arc<dyn CacheBackend> = match settings.backend {
            StoreBackendKind::Memory => Arc::new(MemoryBackend::new(settings.quota_bytes)),
            StoreBackendKind::Sqlite => Arc::new(SqliteBackend::open(
                &settings.resolved_path(),
                settings.quota_bytes,
            )?),
        };
        Ok(Self::new(backend))
    }

    /// Open a namespace (creates it if it doesn't exist).
    pub async fn open(&self, namespace: &str) -> StoreResult<CacheHandle> {
        self.backend.open(namespace).await?;
        Ok(CacheHandle {
            namespace: namespace.to_string(),
        })
    }

    /// Handle to a namespace without creating it. Writes through it create the namespace.
    pub fn handle(&self, namespace: &str) -> CacheHandle {
        CacheHandle {
            namespace: namespace.to_string(),
        }
    }

    /// Check if a namespace exists.
    pub async fn has(&self, namespace: &str) -> StoreResult<bool> {
        self.backend.has(namespace).await
    }

    /// Look up an entry.
    pub async fn match_request(
        &self,
        handle: &CacheHandle,
        key: &CacheKey,
    ) -> StoreResult<Option<CacheEntry>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        self.backend.get(&handle.namespace, key).await
    }

    /// Store an entry. Failures are logged and swallowed; returns whether it was written.
    pub async fn put(&self, handle: &CacheHandle, entry: CacheEntry) -> bool {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        let url = entry.url.clone();
        match self.backend.put(&handle.namespace, entry).await {
            Ok(()) => {
                debug!(namespace = %handle.namespace, url = %url, "Cached entry");
                true
            }
            Err(e) => {
                self.counters.failed_writes.fetch_add(1, Ordering::Relaxed);
                warn!(namespace = %handle.namespace, url = %url, error = %e, "Cache write skipped");
                false
            }
        }
    }

    /// Store every entry atomically; errors propagate.
    pub async fn put_all(&self, namespace: &str, entries: Vec<CacheEntry>) -> StoreResult<()> {
        self.counters
            .writes
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        self.backend.put_all(namespace, entries).await
    }

    /// Delete a namespace.
    pub async fn delete(&self, namespace: &str) -> StoreResult<bool> {
        self.backend.delete(namespace).await
    }

    /// All namespace names.
    pub async fn keys(&self) -> StoreResult<Vec<String>> {
        self.backend.namespaces().await
    }

    /// All keys stored in a namespace.
    pub async fn entries(&self, handle: &CacheHandle) -> StoreResult<Vec<CacheKey>> {
        self.backend.keys(&handle.namespace).await
    }

    /// Total body bytes stored.
    pub async fn usage(&self) -> StoreResult<u64> {
        self.backend.usage().await
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            failed_writes: self.counters.failed_writes.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage")
            .field("stats", &self.stats())
            .finish()
    }
}
