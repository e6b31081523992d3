//! Bounded LRU + TTL cache of query embeddings with disk persistence.
//!
//! Repeated queries skip the enrichment provider entirely, and a warm cache
//! keeps semantic search working through provider outages. State is flushed
//! to a single JSON file (temp-file + rename) once a batch of mutations has
//! accumulated, and force-saved on shutdown.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    query: String,
    embedding: Vec<f32>,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    access_count: u64,
    /// Monotonic recency stamp, rebuilt from `last_accessed` on load.
    #[serde(skip)]
    touched: u64,
}

#[derive(Serialize, Deserialize)]
struct CacheFileMeta {
    version: u32,
    hits: u64,
    misses: u64,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    meta: CacheFileMeta,
    entries: Vec<CacheEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub ttl_days: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopQuery {
    pub query: String,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    /// Mutations since the last flush.
    dirty: u64,
    seq: u64,
}

/// Query → embedding cache. One logical monitor; readers and writers
/// serialize on the inner mutex.
pub struct QueryEmbeddingCache {
    inner: Mutex<CacheInner>,
    path: PathBuf,
    capacity: usize,
    ttl: Duration,
    persist_every: u64,
}

/// The cache key: trimmed and case-folded. The retrieval pipeline applies
/// the same normalization before lookup.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

impl QueryEmbeddingCache {
    /// Load the cache from `path`. A missing or corrupt file starts the
    /// cache empty; corruption is logged and never user-visible.
    pub fn load(path: &Path, capacity: usize, ttl_days: i64, persist_every: u64) -> Self {
        let mut inner = CacheInner {
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            dirty: 0,
            seq: 0,
        };

        let ttl = Duration::days(ttl_days.max(1));
        if path.exists() {
            match fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<CacheFile>(&raw).map_err(|e| e.to_string()))
            {
                Ok(file) => {
                    inner.hits = file.meta.hits;
                    inner.misses = file.meta.misses;

                    let now = Utc::now();
                    let mut entries = file.entries;
                    entries.retain(|e| now - e.created_at <= ttl);
                    entries.sort_by_key(|e| e.last_accessed);
                    for mut entry in entries {
                        inner.seq += 1;
                        entry.touched = inner.seq;
                        inner.entries.insert(entry.query.clone(), entry);
                    }
                    log::info!(
                        "loaded {} query embeddings from {}",
                        inner.entries.len(),
                        path.display()
                    );
                }
                Err(err) => {
                    log::warn!(
                        "query cache at {} is unreadable, starting empty: {err}",
                        path.display()
                    );
                }
            }
        }

        Self {
            inner: Mutex::new(inner),
            path: path.to_path_buf(),
            capacity: capacity.max(1),
            ttl,
            persist_every: persist_every.max(1),
        }
    }

    pub fn get(&self, query: &str) -> Option<Vec<f32>> {
        self.get_at(query, Utc::now())
    }

    /// Lookup with explicit clock, for TTL-sensitive tests.
    pub fn get_at(&self, query: &str, now: DateTime<Utc>) -> Option<Vec<f32>> {
        let key = normalize_query(query);
        let ttl = self.ttl;
        let mut inner = self.lock();

        let expired = matches!(inner.entries.get(&key), Some(e) if now - e.created_at > ttl);
        if expired {
            inner.entries.remove(&key);
        }

        inner.seq += 1;
        let seq = inner.seq;
        let embedding = match inner.entries.get_mut(&key) {
            Some(entry) => {
                entry.touched = seq;
                entry.last_accessed = now;
                entry.access_count += 1;
                entry.embedding.clone()
            }
            None => {
                inner.misses += 1;
                return None;
            }
        };

        inner.hits += 1;
        inner.dirty += 1;
        self.flush_if_due(&mut inner);

        Some(embedding)
    }

    pub fn put(&self, query: &str, embedding: Vec<f32>) {
        self.put_at(query, embedding, Utc::now())
    }

    pub fn put_at(&self, query: &str, embedding: Vec<f32>, now: DateTime<Utc>) {
        if embedding.is_empty() {
            return;
        }
        let key = normalize_query(query);
        let mut inner = self.lock();

        let ttl = self.ttl;
        inner.entries.retain(|_, e| now - e.created_at <= ttl);

        while inner.entries.len() >= self.capacity && !inner.entries.contains_key(&key) {
            let Some(lru_key) = inner
                .entries
                .values()
                .min_by_key(|e| e.touched)
                .map(|e| e.query.clone())
            else {
                break;
            };
            inner.entries.remove(&lru_key);
        }

        inner.seq += 1;
        let entry = CacheEntry {
            query: key.clone(),
            embedding,
            created_at: now,
            last_accessed: now,
            access_count: 1,
            touched: inner.seq,
        };
        inner.entries.insert(key, entry);

        inner.dirty += 1;
        self.flush_if_due(&mut inner);
    }

    /// Drop expired entries, reporting how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner.entries.retain(|_, e| now - e.created_at <= ttl);
        let removed = before - inner.entries.len();
        if removed > 0 {
            inner.dirty += 1;
            self.persist(&inner);
            inner.dirty = 0;
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.dirty = 0;
        self.persist(&inner);
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let total = inner.hits + inner.misses;
        CacheStats {
            capacity: self.capacity,
            size: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if total > 0 {
                inner.hits as f64 / total as f64
            } else {
                0.0
            },
            ttl_days: self.ttl.num_days(),
        }
    }

    /// Most frequently accessed queries, best first.
    pub fn top(&self, n: usize) -> Vec<TopQuery> {
        let inner = self.lock();
        let mut queries: Vec<&CacheEntry> = inner.entries.values().collect();
        queries.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| b.last_accessed.cmp(&a.last_accessed))
        });
        queries
            .into_iter()
            .take(n)
            .map(|e| TopQuery {
                query: e.query.clone(),
                access_count: e.access_count,
                last_accessed: e.last_accessed,
                created_at: e.created_at,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush to disk regardless of the dirty counter.
    pub fn force_save(&self) {
        let mut inner = self.lock();
        self.persist(&inner);
        inner.dirty = 0;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn flush_if_due(&self, inner: &mut CacheInner) {
        if inner.dirty >= self.persist_every {
            self.persist(inner);
            inner.dirty = 0;
        }
    }

    fn persist(&self, inner: &CacheInner) {
        let file = CacheFile {
            meta: CacheFileMeta {
                version: 1,
                hits: inner.hits,
                misses: inner.misses,
            },
            entries: inner.entries.values().cloned().collect(),
        };

        let write = || -> std::io::Result<()> {
            let raw = serde_json::to_string(&file)?;
            let tmp = self.path.with_extension("tmp");
            fs::write(&tmp, raw)?;
            fs::rename(&tmp, &self.path)?;
            Ok(())
        };

        if let Err(err) = write() {
            log::error!("failed to persist query cache to {}: {err}", self.path.display());
        }
    }
}
