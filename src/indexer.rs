//! Ingestion pipeline: validation, deduplication, staleness-based
//! re-indexing and background enrichment.
//!
//! A page becomes lexically searchable the moment its shell row is written;
//! keyword/description generation and embedding happen afterwards on the
//! enrichment queue. Enrichment results are discarded when a newer ingest
//! updated the row in the meantime, and enrichment failures never fail an
//! ingest: the page simply stays lexical until the next refresh.

use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::enrich::{placeholder_enrichment, truncate_chars, EnrichmentBackend};
use crate::frequency::FrequencyEngine;
use crate::semantic::VectorIndex;
use crate::store::{NewPage, PageStore, PageUpdate, StoreError};

/// Stored content is bounded; the tail beyond this is discarded on ingest.
pub const MAX_CONTENT_CHARS: usize = 10_000;
/// Pages with less text than this are not useful search targets.
pub const MIN_CONTENT_CHARS: usize = 100;
/// Content slice joined with the title as embedding input.
const EMBED_CONTENT_PREFIX: usize = 1_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexRequest {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Indexed,
    AlreadyIndexed,
    Reindexed,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct IndexOutcome {
    pub id: u64,
    pub status: IndexStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub indexed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<u64>,
    pub needs_reindex: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

enum EnrichTask {
    Enrich { page_id: u64, stamp: DateTime<Utc> },
    Shutdown,
}

pub struct IndexingPipeline {
    store: Arc<dyn PageStore>,
    vectors: Arc<RwLock<VectorIndex>>,
    enrichment: Arc<dyn EnrichmentBackend>,
    frequency: Arc<FrequencyEngine>,
    staleness: Duration,
    queue: Mutex<Option<mpsc::Sender<EnrichTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IndexingPipeline {
    pub fn new(
        store: Arc<dyn PageStore>,
        vectors: Arc<RwLock<VectorIndex>>,
        enrichment: Arc<dyn EnrichmentBackend>,
        frequency: Arc<FrequencyEngine>,
        staleness_days: i64,
    ) -> Self {
        Self {
            store,
            vectors,
            enrichment,
            frequency,
            staleness: Duration::days(staleness_days),
            queue: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Ingest a page. The URL is taken verbatim (path and query included):
    /// distinct query strings are distinct resources.
    pub fn index_page(
        &self,
        request: IndexRequest,
        now: DateTime<Utc>,
    ) -> Result<IndexOutcome, IndexError> {
        validate_url(&request.url)?;
        if request.content.chars().count() < MIN_CONTENT_CHARS {
            return Err(IndexError::Rejected(format!(
                "content must be at least {MIN_CONTENT_CHARS} characters"
            )));
        }

        let existing = self.store.get_by_url(&request.url)?;
        if let Some(page) = &existing {
            if now - page.last_updated_at <= self.staleness {
                self.frequency.record_visit(page.id, now)?;
                return Ok(IndexOutcome {
                    id: page.id,
                    status: IndexStatus::AlreadyIndexed,
                });
            }
        }

        let content = truncate_chars(&request.content, MAX_CONTENT_CHARS).to_string();
        let (id, was_new) = self.store.upsert_by_url(
            NewPage {
                url: request.url,
                title: request.title,
                content,
                favicon_url: request.favicon_url,
            },
            now,
        )?;

        self.schedule_enrichment(id, now);

        let status = if was_new {
            IndexStatus::Indexed
        } else {
            IndexStatus::Reindexed
        };
        Ok(IndexOutcome { id, status })
    }

    /// Read-only check: is the URL indexed, and is it due for a refresh?
    pub fn probe(&self, url: &str, now: DateTime<Utc>) -> Result<ProbeOutcome, StoreError> {
        Ok(match self.store.get_by_url(url)? {
            Some(page) => ProbeOutcome {
                indexed: true,
                page_id: Some(page.id),
                needs_reindex: now - page.last_updated_at > self.staleness,
                last_updated: Some(page.last_updated_at),
            },
            None => ProbeOutcome {
                indexed: false,
                page_id: None,
                needs_reindex: false,
                last_updated: None,
            },
        })
    }

    /// Start the long-lived enrichment worker. Until this runs, enrichment
    /// happens inline (one-shot CLI mode).
    pub fn run_queue(&self) {
        let (tx, rx) = mpsc::channel();
        *self.queue.lock().unwrap() = Some(tx);

        let store = self.store.clone();
        let vectors = self.vectors.clone();
        let enrichment = self.enrichment.clone();

        let handle = std::thread::spawn(move || {
            log::debug!("enrichment worker started");
            while let Ok(task) = rx.recv() {
                match task {
                    EnrichTask::Enrich { page_id, stamp } => {
                        enrich_page(store.as_ref(), &vectors, enrichment.as_ref(), page_id, stamp)
                    }
                    EnrichTask::Shutdown => break,
                }
            }
            log::debug!("enrichment worker stopped");
        });
        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Drain the queue and stop the worker.
    pub fn shutdown(&self) {
        if let Some(tx) = self.queue.lock().unwrap().take() {
            let _ = tx.send(EnrichTask::Shutdown);
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            if handle.join().is_err() {
                log::error!("enrichment worker panicked");
            }
        }
    }

    fn schedule_enrichment(&self, page_id: u64, stamp: DateTime<Utc>) {
        let queue = self.queue.lock().unwrap();
        if let Some(tx) = queue.as_ref() {
            if tx
                .send(EnrichTask::Enrich { page_id, stamp })
                .is_ok()
            {
                return;
            }
            log::warn!("enrichment queue is gone, running inline");
        }
        drop(queue);
        enrich_page(
            self.store.as_ref(),
            &self.vectors,
            self.enrichment.as_ref(),
            page_id,
            stamp,
        );
    }
}

fn validate_url(url: &str) -> Result<(), IndexError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| IndexError::Rejected(format!("invalid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(IndexError::Rejected(format!(
            "unsupported URL scheme '{scheme}'"
        ))),
    }
}

/// Run enrichment for one page. The `stamp` is the row's `last_updated_at`
/// at scheduling time; when the row has moved on, this result is stale and
/// is dropped.
fn enrich_page(
    store: &dyn PageStore,
    vectors: &RwLock<VectorIndex>,
    enrichment: &dyn EnrichmentBackend,
    page_id: u64,
    stamp: DateTime<Utc>,
) {
    let page = match store.get_by_id(page_id) {
        Ok(Some(page)) => page,
        Ok(None) => {
            log::debug!("page {page_id} disappeared before enrichment");
            return;
        }
        Err(err) => {
            log::error!("failed to read page {page_id} for enrichment: {err}");
            return;
        }
    };
    if page.last_updated_at != stamp {
        log::debug!("page {page_id} changed since scheduling, dropping enrichment");
        return;
    }

    let summary = match enrichment.generate_keywords_and_description(&page.title, &page.content) {
        Ok(summary) => summary,
        Err(err) => {
            log::warn!("keyword generation failed for page {page_id}: {err}");
            placeholder_enrichment(&page.title, &page.content)
        }
    };

    let embed_text = format!(
        "{}\n{}",
        page.title,
        truncate_chars(&page.content, EMBED_CONTENT_PREFIX)
    );
    let embedding = match enrichment.generate_embedding(&embed_text) {
        Ok(vector) => Some(vector),
        Err(err) => {
            log::warn!("embedding generation failed for page {page_id}: {err}");
            None
        }
    };

    // Enrichment calls may have taken a while; a newer ingest wins.
    match store.get_by_id(page_id) {
        Ok(Some(current)) if current.last_updated_at == stamp => {}
        _ => {
            log::debug!("page {page_id} changed during enrichment, dropping result");
            return;
        }
    }

    let has_embedding = embedding.is_some();
    let keywords = summary.keywords_joined();
    let update = PageUpdate {
        description: Some(summary.description),
        keywords: Some(keywords),
        embedding: embedding.clone(),
        ..Default::default()
    };
    if let Err(err) = store.update_by_id(page_id, update) {
        log::error!("failed to write enrichment for page {page_id}: {err}");
        return;
    }

    if let Some(vector) = embedding {
        let mut index = vectors.write().unwrap();
        if let Err(err) = index.replace(page_id, vector) {
            log::error!("failed to index vector for page {page_id}: {err}");
        }
    }

    log::info!("enrichment completed for page {page_id} (embedding: {has_embedding})");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvictionConfig;
    use crate::enrich::MockProvider;
    use crate::store::LocalPageStore;

    struct Fixture {
        pipeline: IndexingPipeline,
        store: Arc<LocalPageStore>,
        vectors: Arc<RwLock<VectorIndex>>,
        provider: Arc<MockProvider>,
        dir: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let dir = std::env::temp_dir().join(format!(
            "memtab-indexer-test-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&dir).unwrap();

        let store: Arc<LocalPageStore> =
            Arc::new(LocalPageStore::load(&dir.join("web_memory.json")).unwrap());
        let vectors = Arc::new(RwLock::new(VectorIndex::new(64, 1_000)));
        let provider = Arc::new(MockProvider::new(64));
        let frequency = Arc::new(FrequencyEngine::new(
            store.clone(),
            vectors.clone(),
            EvictionConfig {
                random_trigger_probability: 0.0,
                ..Default::default()
            },
        ));
        let pipeline = IndexingPipeline::new(
            store.clone(),
            vectors.clone(),
            provider.clone(),
            frequency,
            3,
        );

        Fixture {
            pipeline,
            store,
            vectors,
            provider,
            dir,
        }
    }

    fn request(url: &str, title: &str) -> IndexRequest {
        IndexRequest {
            url: url.to_string(),
            title: title.to_string(),
            content: "x".repeat(200),
            favicon_url: None,
        }
    }

    #[test]
    fn fresh_ingest_is_indexed_and_enriched() {
        let f = fixture();
        let now = Utc::now();

        let outcome = f
            .pipeline
            .index_page(request("https://a.test/x", "Rust Guide"), now)
            .unwrap();
        assert_eq!(outcome.status, IndexStatus::Indexed);

        let page = f.store.get_by_id(outcome.id).unwrap().unwrap();
        assert!(!page.description.is_empty());
        assert!(page.embedding.is_some());
        assert!(f.vectors.read().unwrap().contains(outcome.id));

        let _ = std::fs::remove_dir_all(&f.dir);
    }

    #[test]
    fn content_length_boundary_is_exact() {
        let f = fixture();
        let now = Utc::now();

        let mut short = request("https://a.test/short", "t");
        short.content = "x".repeat(99);
        assert!(matches!(
            f.pipeline.index_page(short, now),
            Err(IndexError::Rejected(_))
        ));

        let mut exact = request("https://a.test/exact", "t");
        exact.content = "x".repeat(100);
        assert!(f.pipeline.index_page(exact, now).is_ok());

        let _ = std::fs::remove_dir_all(&f.dir);
    }

    #[test]
    fn non_web_urls_are_rejected() {
        let f = fixture();
        let now = Utc::now();

        for url in ["ftp://a.test/x", "file:///etc/passwd", "not a url"] {
            assert!(matches!(
                f.pipeline.index_page(request(url, "t"), now),
                Err(IndexError::Rejected(_))
            ));
        }
        assert_eq!(f.store.count().unwrap(), 0);

        let _ = std::fs::remove_dir_all(&f.dir);
    }

    #[test]
    fn duplicate_ingest_within_staleness_window() {
        let f = fixture();
        let t0 = Utc::now();

        let first = f
            .pipeline
            .index_page(request("https://a.test/x", "Guide"), t0)
            .unwrap();
        let updated_at = f.store.get_by_id(first.id).unwrap().unwrap().last_updated_at;

        let second = f
            .pipeline
            .index_page(request("https://a.test/x", "Guide"), t0 + Duration::hours(1))
            .unwrap();

        assert_eq!(second.status, IndexStatus::AlreadyIndexed);
        assert_eq!(second.id, first.id);

        let page = f.store.get_by_id(first.id).unwrap().unwrap();
        assert_eq!(page.last_updated_at, updated_at);
        assert_eq!(page.visit_count, 1);

        let _ = std::fs::remove_dir_all(&f.dir);
    }

    #[test]
    fn stale_ingest_refreshes_content() {
        let f = fixture();
        let t0 = Utc::now();

        let first = f
            .pipeline
            .index_page(request("https://a.test/x", "Old Title"), t0)
            .unwrap();
        let old_embedding = f.store.get_by_id(first.id).unwrap().unwrap().embedding;

        let t1 = t0 + Duration::days(4);
        let mut refresh = request("https://a.test/x", "New Title");
        refresh.content = format!("fresh words {}", "y".repeat(200));
        let second = f.pipeline.index_page(refresh, t1).unwrap();

        assert_eq!(second.status, IndexStatus::Reindexed);
        assert_eq!(second.id, first.id);

        let page = f.store.get_by_id(first.id).unwrap().unwrap();
        assert_eq!(page.title, "New Title");
        assert!(page.content.starts_with("fresh words"));
        assert_eq!(page.last_updated_at, t1);
        assert!(page.indexed_at <= page.last_updated_at);
        assert!(page.embedding.is_some());
        assert_ne!(page.embedding, old_embedding);

        let _ = std::fs::remove_dir_all(&f.dir);
    }

    #[test]
    fn oversized_content_is_truncated() {
        let f = fixture();
        let now = Utc::now();

        let mut big = request("https://a.test/big", "t");
        big.content = "z".repeat(MAX_CONTENT_CHARS + 500);
        let outcome = f.pipeline.index_page(big, now).unwrap();

        let page = f.store.get_by_id(outcome.id).unwrap().unwrap();
        assert_eq!(page.content.chars().count(), MAX_CONTENT_CHARS);

        let _ = std::fs::remove_dir_all(&f.dir);
    }

    #[test]
    fn enrichment_failure_keeps_page_lexical() {
        let f = fixture();
        let now = Utc::now();
        f.provider.set_unavailable(true);

        let outcome = f
            .pipeline
            .index_page(request("https://a.test/x", "Rust Guide"), now)
            .unwrap();
        assert_eq!(outcome.status, IndexStatus::Indexed);

        let page = f.store.get_by_id(outcome.id).unwrap().unwrap();
        assert!(page.embedding.is_none());
        // Placeholder summary still lands.
        assert_eq!(page.description, "Rust Guide");
        assert!(!f.vectors.read().unwrap().contains(outcome.id));
        assert_eq!(
            f.store.full_text_search("rust", 10).unwrap().first().map(|r| r.0),
            Some(outcome.id)
        );

        let _ = std::fs::remove_dir_all(&f.dir);
    }

    #[test]
    fn stale_enrichment_results_are_discarded() {
        let f = fixture();
        let t0 = Utc::now();

        let outcome = f
            .pipeline
            .index_page(request("https://a.test/x", "Guide"), t0)
            .unwrap();

        // Simulate a loser whose scheduling stamp predates a newer write.
        enrich_page(
            f.store.as_ref(),
            &f.vectors,
            f.provider.as_ref(),
            outcome.id,
            t0 - Duration::seconds(10),
        );

        let page = f.store.get_by_id(outcome.id).unwrap().unwrap();
        assert_eq!(page.last_updated_at, t0);

        let _ = std::fs::remove_dir_all(&f.dir);
    }

    #[test]
    fn probe_reflects_index_state() {
        let f = fixture();
        let t0 = Utc::now();

        let missing = f.pipeline.probe("https://a.test/x", t0).unwrap();
        assert!(!missing.indexed);
        assert!(!missing.needs_reindex);

        let outcome = f
            .pipeline
            .index_page(request("https://a.test/x", "Guide"), t0)
            .unwrap();

        let fresh = f.pipeline.probe("https://a.test/x", t0 + Duration::hours(1)).unwrap();
        assert!(fresh.indexed);
        assert_eq!(fresh.page_id, Some(outcome.id));
        assert!(!fresh.needs_reindex);

        let stale = f.pipeline.probe("https://a.test/x", t0 + Duration::days(4)).unwrap();
        assert!(stale.needs_reindex);
        assert_eq!(stale.last_updated, Some(t0));

        let _ = std::fs::remove_dir_all(&f.dir);
    }
}
