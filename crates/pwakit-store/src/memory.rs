//! In-memory cache backend.

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;

use crate::{check_quota, CacheBackend, CacheEntry, CacheKey, StoreResult};

#[derive(Debug, Default)]
struct Namespace {
    /// Creation sequence, for ordering.
    seq: u64,
    entries: HashMap<CacheKey, CacheEntry>,
}

#[derive(Debug, Default)]
struct Inner {
    namespaces: HashMap<String, Namespace>,
    next_seq: u64,
}

impl Inner {
    fn ensure(&mut self, name: &str) -> &mut Namespace {
        let next_seq = &mut self.next_seq;
        self.namespaces
            .entry(name.to_string())
            .or_insert_with(|| {
                let seq = *next_seq;
                *next_seq += 1;
                Namespace {
                    seq,
                    entries: HashMap::new(),
                }
            })
    }

    fn usage(&self) -> u64 {
        self.namespaces
            .values()
            .flat_map(|ns| ns.entries.values())
            .map(CacheEntry::size)
            .sum()
    }

    fn existing_size(&self, name: &str, key: &CacheKey) -> u64 {
        self.namespaces
            .get(name)
            .and_then(|ns| ns.entries.get(key))
            .map(CacheEntry::size)
            .unwrap_or(0)
    }
}

/// Cache backend that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
    quota: Option<u64>,
}

impl MemoryBackend {
    pub fn new(quota: Option<u64>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            quota,
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn open(&self, namespace: &str) -> StoreResult<()> {
        self.inner.write().await.ensure(namespace);
        Ok(())
    }

    async fn has(&self, namespace: &str) -> StoreResult<bool> {
        Ok(self.inner.read().await.namespaces.contains_key(namespace))
    }

    async fn get(&self, namespace: &str, key: &CacheKey) -> StoreResult<Option<CacheEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.entries.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &str, entry: CacheEntry) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let key = entry.key();
        let needed = inner.usage() - inner.existing_size(namespace, &key) + entry.size();
        check_quota(self.quota, needed)?;

        inner.ensure(namespace).entries.insert(key, entry);
        Ok(())
    }

    async fn put_all(&self, namespace: &str, entries: Vec<CacheEntry>) -> StoreResult<()> {
        let mut inner = self.inner.write().await;

        // Later duplicates replace earlier ones, so size the batch after dedup.
        let mut batch: HashMap<CacheKey, CacheEntry> = HashMap::new();
        for entry in entries {
            batch.insert(entry.key(), entry);
        }
        let replaced: u64 = batch
            .keys()
            .map(|key| inner.existing_size(namespace, key))
            .sum();
        let added: u64 = batch.values().map(CacheEntry::size).sum();
        check_quota(self.quota, inner.usage() - replaced + added)?;

        inner.ensure(namespace).entries.extend(batch);
        Ok(())
    }

    async fn delete(&self, namespace: &str) -> StoreResult<bool> {
        Ok(self.inner.write().await.namespaces.remove(namespace).is_some())
    }

    async fn namespaces(&self) -> StoreResult<Vec<String>> {
        let inner = self.inner.read().await;
        let mut names: Vec<(&String, u64)> = inner
            .namespaces
            .iter()
            .map(|(name, ns)| (name, ns.seq))
            .collect();
        names.sort_by_key(|(_, seq)| *seq);
        Ok(names.into_iter().map(|(name, _)| name.clone()).collect())
    }

    async fn keys(&self, namespace: &str) -> StoreResult<Vec<CacheKey>> {
        let inner = self.inner.read().await;
        let mut keys: Vec<CacheKey> = inner
            .namespaces
            .get(namespace)
            .map(|ns| ns.entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort_by(|a, b| a.url.cmp(&b.url).then_with(|| a.method.cmp(&b.method)));
        Ok(keys)
    }

    async fn usage(&self) -> StoreResult<u64> {
        Ok(self.inner.read().await.usage())
    }
}
