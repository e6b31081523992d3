//! End-to-end scenarios exercised through the full component wiring.
//!
//! These tests build the real pipelines on a temp directory with the mock
//! provider, driving them with explicit timestamps where the scenario needs
//! clock control.

mod retrieval;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::config::{EvictionConfig, SearchConfig};
use crate::enrich::MockProvider;
use crate::frequency::FrequencyEngine;
use crate::indexer::{IndexRequest, IndexingPipeline};
use crate::search::RetrievalPipeline;
use crate::semantic::{QueryEmbeddingCache, VectorIndex};
use crate::store::LocalPageStore;

pub(crate) const DIM: usize = 256;

pub(crate) struct TestService {
    pub store: Arc<LocalPageStore>,
    pub vectors: Arc<RwLock<VectorIndex>>,
    pub cache: Arc<QueryEmbeddingCache>,
    pub provider: Arc<MockProvider>,
    pub frequency: Arc<FrequencyEngine>,
    pub indexer: IndexingPipeline,
    pub retrieval: RetrievalPipeline,
    dir: PathBuf,
}

impl TestService {
    pub fn new() -> Self {
        Self::with_eviction(EvictionConfig {
            random_trigger_probability: 0.0,
            ..Default::default()
        })
    }

    pub fn with_eviction(eviction: EvictionConfig) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let dir = std::env::temp_dir().join(format!(
            "memtab-e2e-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&dir).unwrap();

        let store: Arc<LocalPageStore> =
            Arc::new(LocalPageStore::load(&dir.join("web_memory.json")).unwrap());
        let vectors = Arc::new(RwLock::new(VectorIndex::new(DIM, 1_000)));
        let provider = Arc::new(MockProvider::new(DIM));
        let cache = Arc::new(QueryEmbeddingCache::load(
            &dir.join("query_embeddings_cache.json"),
            1_000,
            7,
            20,
        ));
        let frequency = Arc::new(FrequencyEngine::new(
            store.clone(),
            vectors.clone(),
            eviction,
        ));
        let indexer = IndexingPipeline::new(
            store.clone(),
            vectors.clone(),
            provider.clone(),
            frequency.clone(),
            3,
        );
        let retrieval = RetrievalPipeline::new(
            store.clone(),
            vectors.clone(),
            provider.clone(),
            cache.clone(),
            SearchConfig::default(),
        );

        Self {
            store,
            vectors,
            cache,
            provider,
            frequency,
            indexer,
            retrieval,
            dir,
        }
    }

    pub fn request(url: &str, title: &str, content: &str) -> IndexRequest {
        // Pad so requests clear the minimum-content validation.
        let content = format!("{content} {}", "filler ".repeat(20));
        IndexRequest {
            url: url.to_string(),
            title: title.to_string(),
            content,
            favicon_url: None,
        }
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
