//! Durable keyed store of pages with a full-text index.
//!
//! The store is the single authority for page state. Every mutation keeps
//! the full-text index in sync under the same write lock, so readers never
//! observe a page row whose indexed text differs from its fields.

pub mod fts;
mod local;

pub use local::LocalPageStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A visited web page with enrichment outputs and frequency metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: u64,

    /// Canonical full URL including path and query string. Unique.
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Comma-separated keyword list produced by enrichment.
    #[serde(default)]
    pub keywords: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,

    /// Dense vector, absent until enrichment succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(default)]
    pub visit_count: u64,
    #[serde(default)]
    pub first_visited: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_visited: Option<DateTime<Utc>>,
    pub indexed_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,

    #[serde(default)]
    pub access_frequency: f32,
    #[serde(default)]
    pub recency_score: f32,
    #[serde(default)]
    pub arc_score: f32,
}

/// Shell of a page as written by ingestion, before enrichment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPage {
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
}

/// Partial update applied by id. Only `Some` fields are written.
#[derive(Debug, Clone, Default)]
pub struct PageUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub content: Option<String>,
    pub favicon_url: Option<Option<String>>,
    pub embedding: Option<Vec<f32>>,
    pub access_frequency: Option<f32>,
    pub recency_score: Option<f32>,
    pub arc_score: Option<f32>,
}

/// Counters returned by [`PageStore::bump_visit`].
#[derive(Debug, Clone, Copy)]
pub struct VisitCounters {
    pub visit_count: u64,
    pub first_visited: DateTime<Utc>,
    pub last_visited: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("page {0} not found")]
    NotFound(u64),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store file is corrupt: {0}")]
    Corrupt(String),
}

/// Contract of the document store (full-text index included).
///
/// `upsert_by_url` is the only write path used by ingestion; it reports
/// `was_new = true` exactly when no row for the URL existed at call time.
pub trait PageStore: Send + Sync {
    fn insert(&self, page: NewPage, at: DateTime<Utc>) -> Result<u64, StoreError>;
    fn update_by_id(&self, id: u64, update: PageUpdate) -> Result<(), StoreError>;
    fn upsert_by_url(&self, page: NewPage, at: DateTime<Utc>) -> Result<(u64, bool), StoreError>;
    fn get_by_id(&self, id: u64) -> Result<Option<Page>, StoreError>;
    fn get_by_url(&self, url: &str) -> Result<Option<Page>, StoreError>;
    /// Idempotent: deleting an unknown id reports `false`.
    fn delete(&self, id: u64) -> Result<bool, StoreError>;
    /// Rows ordered newest-first (descending id).
    fn list(&self, offset: usize, limit: usize) -> Result<Vec<Page>, StoreError>;
    fn count(&self) -> Result<usize, StoreError>;
    /// Hits ordered best-first; the second element is the 1-based rank.
    fn full_text_search(&self, query: &str, limit: usize)
        -> Result<Vec<(u64, usize)>, StoreError>;
    /// Increment the visit counter and touch visit timestamps atomically.
    fn bump_visit(&self, id: u64, at: DateTime<Utc>) -> Result<VisitCounters, StoreError>;
    /// Integer-halve every visit counter in a single pass.
    fn halve_visit_counts(&self) -> Result<(), StoreError>;
    fn snapshot(&self) -> Result<Vec<Page>, StoreError>;
}
