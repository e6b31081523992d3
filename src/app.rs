//! Service wiring and the transport-agnostic control surface.
//!
//! `App` owns every component: the document store, the vector index, the
//! query-embedding cache, the enrichment provider and the two pipelines.
//! The web layer and the CLI both talk to it; no component is reachable any
//! other way, and there is no module-level state.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;

use crate::config::Config;
use crate::enrich::{EnrichmentBackend, LiveProvider, MockProvider};
use crate::frequency::{
    EvictionCandidate, EvictionOutcome, EvictionStats, FrequencyEngine, VisitOutcome,
};
use crate::indexer::{IndexError, IndexOutcome, IndexRequest, IndexingPipeline, ProbeOutcome};
use crate::search::{RetrievalPipeline, SearchHit};
use crate::semantic::{CacheStats, QueryEmbeddingCache, TopQuery, VectorIndex};
use crate::store::{LocalPageStore, Page, PageStore, StoreError};

/// User-visible error kinds; the web layer maps them onto status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Rejected(msg) => ApiError::Validation(msg),
            IndexError::Store(e) => ApiError::Store(e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub db: DbStats,
    pub vector: VectorStats,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DbStats {
    pub total_pages: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VectorStats {
    pub total_vectors: usize,
    pub dimension: usize,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub total_pages: usize,
    pub enrichment_reachable: bool,
}

pub struct App {
    pub config: Config,
    store: Arc<LocalPageStore>,
    vectors: Arc<RwLock<VectorIndex>>,
    cache: Arc<QueryEmbeddingCache>,
    enrichment: Arc<dyn EnrichmentBackend>,
    frequency: Arc<FrequencyEngine>,
    indexer: IndexingPipeline,
    retrieval: RetrievalPipeline,
    maintenance_stop: Arc<AtomicBool>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl App {
    /// Build the service from configuration: load persisted state, rebuild
    /// the vector index from stored embeddings, pick the enrichment
    /// provider, wire the pipelines.
    pub fn build(config: Config, base_path: &Path) -> anyhow::Result<Self> {
        let store_path = config.resolve(base_path, &config.store.path);
        let store: Arc<LocalPageStore> = Arc::new(
            LocalPageStore::load(&store_path).context("failed to open document store")?,
        );

        let mut index = VectorIndex::new(config.embedding.dimension, config.vector.soft_cap);
        let mut loaded = 0usize;
        for page in store.snapshot()? {
            if let Some(embedding) = page.embedding {
                match index.add(page.id, embedding) {
                    Ok(()) => loaded += 1,
                    Err(err) => {
                        log::warn!("skipping stored vector for page {}: {err}", page.id)
                    }
                }
            }
        }
        log::info!("loaded {loaded} vectors into the index");
        let vectors = Arc::new(RwLock::new(index));

        let cache_path = config.resolve(base_path, &config.cache.persistence_path);
        let cache = Arc::new(QueryEmbeddingCache::load(
            &cache_path,
            config.cache.capacity,
            config.cache.ttl_days,
            config.cache.persist_every_n_mutations,
        ));

        let enrichment: Arc<dyn EnrichmentBackend> = if config.enrichment.token.trim().is_empty()
        {
            log::warn!("no enrichment token configured, starting in mock mode");
            Arc::new(MockProvider::new(config.embedding.dimension))
        } else {
            match LiveProvider::new(&config.enrichment, config.embedding.dimension) {
                Ok(provider) => Arc::new(provider),
                Err(err) => {
                    log::warn!("enrichment client init failed ({err}), starting in mock mode");
                    Arc::new(MockProvider::new(config.embedding.dimension))
                }
            }
        };

        let frequency = Arc::new(FrequencyEngine::new(
            store.clone(),
            vectors.clone(),
            config.eviction.clone(),
        ));
        let indexer = IndexingPipeline::new(
            store.clone(),
            vectors.clone(),
            enrichment.clone(),
            frequency.clone(),
            config.store.staleness_days,
        );
        let retrieval = RetrievalPipeline::new(
            store.clone(),
            vectors.clone(),
            enrichment.clone(),
            cache.clone(),
            config.search.clone(),
        );

        Ok(Self {
            config,
            store,
            vectors,
            cache,
            enrichment,
            frequency,
            indexer,
            retrieval,
            maintenance_stop: Arc::new(AtomicBool::new(false)),
            maintenance: Mutex::new(None),
        })
    }

    // MARK: - Control surface operations

    pub fn ingest(&self, request: IndexRequest) -> Result<IndexOutcome, ApiError> {
        Ok(self.indexer.index_page(request, Utc::now())?)
    }

    pub fn probe(&self, url: &str) -> Result<ProbeOutcome, ApiError> {
        if url.trim().is_empty() {
            return Err(ApiError::Validation("url must not be empty".to_string()));
        }
        Ok(self.indexer.probe(url, Utc::now())?)
    }

    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        self.retrieval.search(query, Utc::now())
    }

    pub fn track_visit(&self, url: &str) -> Result<VisitOutcome, ApiError> {
        if url.trim().is_empty() {
            return Err(ApiError::Validation("url must not be empty".to_string()));
        }
        Ok(self.frequency.track_visit(url, Utc::now())?)
    }

    pub fn get_page(&self, id: u64) -> Result<Page, ApiError> {
        self.store
            .get_by_id(id)?
            .ok_or_else(|| ApiError::NotFound(format!("page {id} not found")))
    }

    pub fn list_pages(&self, offset: usize, limit: usize) -> Result<(Vec<Page>, usize), ApiError> {
        if limit > 1_000 {
            return Err(ApiError::Validation("limit cannot exceed 1000".to_string()));
        }
        let pages = self.store.list(offset, limit)?;
        let total = self.store.count()?;
        Ok((pages, total))
    }

    pub fn delete_page(&self, id: u64) -> Result<(), ApiError> {
        if !self.store.delete(id)? {
            return Err(ApiError::NotFound(format!("page {id} not found")));
        }
        self.vectors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        Ok(())
    }

    pub fn stats(&self) -> Result<ServiceStats, ApiError> {
        let total_pages = self.store.count()?;
        let (total_vectors, dimension) = {
            let index = self.vectors.read().unwrap_or_else(|e| e.into_inner());
            (index.size(), index.dimension())
        };
        let memory_mb =
            (total_vectors * dimension * std::mem::size_of::<f32>()) as f64 / (1024.0 * 1024.0);

        Ok(ServiceStats {
            db: DbStats { total_pages },
            vector: VectorStats {
                total_vectors,
                dimension,
                memory_mb,
            },
            cache: self.cache.stats(),
        })
    }

    pub fn health(&self) -> Result<HealthReport, ApiError> {
        Ok(HealthReport {
            status: "ok",
            total_pages: self.store.count()?,
            enrichment_reachable: self.enrichment.health_check(),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache_top(&self, n: usize) -> Vec<TopQuery> {
        self.cache.top(n)
    }

    pub fn cache_clear(&self) {
        self.cache.clear();
    }

    pub fn cache_cleanup(&self) -> usize {
        self.cache.cleanup_expired()
    }

    pub fn eviction_preview(&self, count: usize) -> Result<Vec<EvictionCandidate>, ApiError> {
        Ok(self.frequency.eviction_candidates(Utc::now(), count)?)
    }

    pub fn eviction_run(&self) -> Result<EvictionOutcome, ApiError> {
        Ok(self.frequency.run_eviction(Utc::now())?)
    }

    pub fn eviction_stats(&self) -> Result<EvictionStats, ApiError> {
        Ok(self.frequency.stats(Utc::now())?)
    }

    // MARK: - Lifecycle

    /// Start the background enrichment worker.
    pub fn run_queue(&self) {
        self.indexer.run_queue();
    }

    /// Start the periodic maintenance sweep (eviction + cache cleanup).
    pub fn run_maintenance(&self) {
        let frequency = self.frequency.clone();
        let cache = self.cache.clone();
        let stop = self.maintenance_stop.clone();
        let interval = StdDuration::from_secs(self.config.eviction.sweep_interval_minutes * 60);

        let handle = std::thread::spawn(move || {
            log::debug!("maintenance sweep started");
            let mut elapsed = StdDuration::ZERO;
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(StdDuration::from_secs(1));
                elapsed += StdDuration::from_secs(1);
                if elapsed < interval {
                    continue;
                }
                elapsed = StdDuration::ZERO;

                match frequency.run_eviction(Utc::now()) {
                    Ok(outcome) if outcome.evicted_count > 0 => {
                        log::info!("sweep evicted {} pages", outcome.evicted_count)
                    }
                    Ok(_) => {}
                    Err(err) => log::warn!("sweep eviction failed: {err}"),
                }
                let removed = cache.cleanup_expired();
                if removed > 0 {
                    log::info!("sweep removed {removed} expired cache entries");
                }
            }
            log::debug!("maintenance sweep stopped");
        });

        *self.maintenance.lock().unwrap() = Some(handle);
    }

    /// Stop background work and flush the query cache.
    pub fn shutdown(&self) {
        self.maintenance_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.maintenance.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.indexer.shutdown();
        self.cache.force_save();
        log::info!("shutdown complete");
    }
}
