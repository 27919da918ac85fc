//! SQLite cache backend, persisted across restarts.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use crate::{check_quota, CacheBackend, CacheEntry, CacheKey, StoreError, StoreResult};

/// Database schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Initialize or open the cache database
fn init_database(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get::<_, i32>(0).map(|count| count > 0),
        )
        .unwrap_or(false);

    let version: i32 = if table_exists {
        conn.query_row(
            "SELECT version FROM schema_version ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0)
    } else {
        0
    };

    if version < SCHEMA_VERSION {
        create_schema_v1(conn)?;
    }

    Ok(())
}

/// Create initial schema (version 1)
fn create_schema_v1(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS namespaces (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
            namespace TEXT NOT NULL REFERENCES namespaces(name) ON DELETE CASCADE,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            status INTEGER NOT NULL,
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, method, url)
        );
        "#,
    )?;

    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
        params![SCHEMA_VERSION, Utc::now().timestamp()],
    )?;

    info!(version = SCHEMA_VERSION, "Created cache schema");
    Ok(())
}

fn ensure_namespace(conn: &Connection, namespace: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO namespaces (name, created_at) VALUES (?, ?)",
        params![namespace, Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

fn usage(conn: &Connection) -> StoreResult<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(LENGTH(body)), 0) FROM entries",
        [],
        |row| row.get(0),
    )?;
    Ok(total.max(0) as u64)
}

fn insert_entry(tx: &Transaction<'_>, namespace: &str, entry: &CacheEntry) -> StoreResult<()> {
    let headers = serde_json::to_string(&entry.headers)
        .map_err(|e| StoreError::Corrupt(format!("headers for {}: {}", entry.url, e)))?;
    tx.execute(
        "INSERT OR REPLACE INTO entries (namespace, method, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            namespace,
            entry.method,
            entry.url,
            entry.status,
            headers,
            entry.body,
            entry.cached_at
        ],
    )?;
    Ok(())
}

/// Cache backend stored in a SQLite database file.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    quota: Option<u64>,
}

impl SqliteBackend {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, quota: Option<u64>) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        init_database(&conn)?;
        info!(path = %path.display(), "Opened cache database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            quota,
        })
    }

    /// Database that disappears with the connection.
    pub fn in_memory(quota: Option<u64>) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_database(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            quota,
        })
    }

    /// Run blocking database work off the async runtime.
    async fn run<T, F>(&self, work: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("cache database lock poisoned".to_string()))?;
            work(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    async fn open(&self, namespace: &str) -> StoreResult<()> {
        let namespace = namespace.to_string();
        self.run(move |conn| ensure_namespace(conn, &namespace)).await
    }

    async fn has(&self, namespace: &str) -> StoreResult<bool> {
        let namespace = namespace.to_string();
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM namespaces WHERE name = ?",
                    params![namespace],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn get(&self, namespace: &str, key: &CacheKey) -> StoreResult<Option<CacheEntry>> {
        let namespace = namespace.to_string();
        let key = key.clone();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT status, headers, body, cached_at FROM entries
                     WHERE namespace = ? AND method = ? AND url = ?",
                    params![namespace, key.method, key.url],
                    |row| {
                        Ok((
                            row.get::<_, u16>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;

            match row {
                Some((status, headers, body, cached_at)) => {
                    let headers = serde_json::from_str(&headers).map_err(|e| {
                        StoreError::Corrupt(format!("headers for {}: {}", key.url, e))
                    })?;
                    Ok(Some(CacheEntry {
                        url: key.url,
                        method: key.method,
                        status,
                        headers,
                        body,
                        cached_at,
                    }))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn put(&self, namespace: &str, entry: CacheEntry) -> StoreResult<()> {
        self.put_all(namespace, vec![entry]).await
    }

    async fn put_all(&self, namespace: &str, entries: Vec<CacheEntry>) -> StoreResult<()> {
        let namespace = namespace.to_string();
        let quota = self.quota;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            ensure_namespace(&tx, &namespace)?;
            for entry in &entries {
                insert_entry(&tx, &namespace, entry)?;
            }
            check_quota(quota, usage(&tx)?)?;
            tx.commit()?;
            debug!(namespace = %namespace, count = entries.len(), "Stored entries");
            Ok(())
        })
        .await
    }

    async fn delete(&self, namespace: &str) -> StoreResult<bool> {
        let namespace = namespace.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM entries WHERE namespace = ?", params![namespace])?;
            let removed = tx.execute("DELETE FROM namespaces WHERE name = ?", params![namespace])?;
            tx.commit()?;
            Ok(removed > 0)
        })
        .await
    }

    async fn namespaces(&self) -> StoreResult<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM namespaces ORDER BY rowid")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn keys(&self, namespace: &str) -> StoreResult<Vec<CacheKey>> {
        let namespace = namespace.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT method, url FROM entries WHERE namespace = ? ORDER BY url, method",
            )?;
            let keys = stmt
                .query_map(params![namespace], |row| {
                    Ok(CacheKey {
                        method: row.get(0)?,
                        url: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn usage(&self) -> StoreResult<u64> {
        self.run(|conn| usage(conn)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(url: &str, body: &[u8]) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: body.to_vec(),
            cached_at: 1,
        }
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache").join("cache.db");

        {
            let backend = SqliteBackend::open(&path, None).unwrap();
            backend.put("app-v1", entry("https://e.com/a.css", b"a{}")).await.unwrap();
        }

        let backend = SqliteBackend::open(&path, None).unwrap();
        assert_eq!(backend.namespaces().await.unwrap(), vec!["app-v1"]);

        let key = CacheKey {
            method: "GET".to_string(),
            url: "https://e.com/a.css".to_string(),
        };
        let stored = backend.get("app-v1", &key).await.unwrap().unwrap();
        assert_eq!(stored.body, b"a{}");
        assert_eq!(stored.headers[0].1, "text/plain");
    }

    #[tokio::test]
    async fn test_replace_keeps_one_row() {
        let backend = SqliteBackend::in_memory(None).unwrap();
        backend.put("v1", entry("https://e.com/logo.png", b"1")).await.unwrap();
        backend.put("v1", entry("https://e.com/logo.png", b"22")).await.unwrap();

        let keys = backend.keys("v1").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(backend.usage().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let backend = SqliteBackend::in_memory(None).unwrap();
        backend.put("old", entry("https://e.com/a", b"x")).await.unwrap();
        backend.open("new").await.unwrap();

        assert!(backend.delete("old").await.unwrap());
        assert!(!backend.delete("old").await.unwrap());
        assert_eq!(backend.namespaces().await.unwrap(), vec!["new"]);
        assert_eq!(backend.usage().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_put_all_rolls_back_on_quota() {
        let backend = SqliteBackend::in_memory(Some(3)).unwrap();
        let err = backend
            .put_all("v2", vec![entry("https://e.com/a", b"12"), entry("https://e.com/b", b"34")])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::QuotaExceeded { needed: 4, quota: 3 }));
        assert!(!backend.has("v2").await.unwrap());
        assert_eq!(backend.usage().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_namespace_reads_nothing() {
        let backend = SqliteBackend::in_memory(None).unwrap();
        let key = CacheKey {
            method: "GET".to_string(),
            url: "https://e.com/".to_string(),
        };
        assert!(backend.get("nope", &key).await.unwrap().is_none());
        assert!(backend.keys("nope").await.unwrap().is_empty());
    }
}
