//! Retrieval pipeline: parallel lexical + semantic search with score fusion.
//!
//! The two branches run concurrently and are merged by page id. Fusion is
//! `semantic_weight * semantic + keyword_weight * keyword` plus a small
//! frequency boost from the page's ARC score, and the fused list is cut at
//! the first large score drop before being capped.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::config::SearchConfig;
use crate::enrich::EnrichmentBackend;
use crate::semantic::{
    normalize_query, DropFilter, QueryEmbeddingCache, VectorHit, VectorIndex,
};
use crate::store::{Page, PageStore};

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub page: Page,
    pub semantic_score: f32,
    pub keyword_score: f32,
    pub final_score: f32,
}

pub struct RetrievalPipeline {
    store: Arc<dyn PageStore>,
    vectors: Arc<RwLock<VectorIndex>>,
    enrichment: Arc<dyn EnrichmentBackend>,
    cache: Arc<QueryEmbeddingCache>,
    config: SearchConfig,
}

impl RetrievalPipeline {
    pub fn new(
        store: Arc<dyn PageStore>,
        vectors: Arc<RwLock<VectorIndex>>,
        enrichment: Arc<dyn EnrichmentBackend>,
        cache: Arc<QueryEmbeddingCache>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            vectors,
            enrichment,
            cache,
            config,
        }
    }

    /// Run a search. An empty (post-normalization) query yields no results;
    /// branch failures degrade to whatever the other branch found.
    pub fn search(&self, query: &str, now: DateTime<Utc>) -> Vec<SearchHit> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return vec![];
        }

        let (lexical, semantic) = std::thread::scope(|scope| {
            let lexical = scope.spawn(|| self.lexical_branch(&normalized));
            let semantic = scope.spawn(|| self.semantic_branch(&normalized, now));
            (
                lexical.join().unwrap_or_else(|_| {
                    log::error!("lexical search branch panicked");
                    vec![]
                }),
                semantic.join().unwrap_or_else(|_| {
                    log::error!("semantic search branch panicked");
                    vec![]
                }),
            )
        });

        self.fuse(lexical, semantic)
    }

    fn lexical_branch(&self, query: &str) -> Vec<(u64, usize)> {
        match self.store.full_text_search(query, self.config.k_lexical) {
            Ok(hits) => hits,
            Err(err) => {
                log::error!("lexical search failed: {err}");
                vec![]
            }
        }
    }

    fn semantic_branch(&self, query: &str, now: DateTime<Utc>) -> Vec<VectorHit> {
        let Some(embedding) = self.resolve_query_embedding(query, now) else {
            return vec![];
        };

        let filter = DropFilter::new(self.config.drop_ratio, self.config.min_absolute);
        let index = self.vectors.read().unwrap_or_else(|e| e.into_inner());
        match index.filtered_search(&embedding, self.config.k_lexical, &filter) {
            Ok(hits) => hits,
            Err(err) => {
                log::error!("vector search failed: {err}");
                vec![]
            }
        }
    }

    /// Resolve the query embedding: cache first, then the provider, then a
    /// degraded surrogate (the stored embedding of the best lexical hit)
    /// when the provider is out and the cache is cold.
    fn resolve_query_embedding(&self, query: &str, now: DateTime<Utc>) -> Option<Vec<f32>> {
        if let Some(embedding) = self.cache.get_at(query, now) {
            return Some(embedding);
        }

        match self.enrichment.generate_embedding(query) {
            Ok(embedding) => {
                self.cache.put_at(query, embedding.clone(), now);
                Some(embedding)
            }
            Err(err) => {
                log::info!("query embedding unavailable ({err}), trying lexical surrogate");
                self.lexical_surrogate(query)
            }
        }
    }

    fn lexical_surrogate(&self, query: &str) -> Option<Vec<f32>> {
        let top = self
            .store
            .full_text_search(query, 1)
            .ok()?
            .into_iter()
            .next()?;
        self.store.get_by_id(top.0).ok().flatten()?.embedding
    }

    fn fuse(&self, lexical: Vec<(u64, usize)>, semantic: Vec<VectorHit>) -> Vec<SearchHit> {
        // page id -> (semantic, keyword) components, 0 where absent
        let mut components: HashMap<u64, (f32, f32)> = HashMap::new();

        for (id, rank) in lexical {
            let keyword = (1.0 - 0.1 * (rank as f32 - 1.0)).max(0.1);
            components.entry(id).or_insert((0.0, 0.0)).1 = keyword;
        }
        for hit in semantic {
            components.entry(hit.id).or_insert((0.0, 0.0)).0 = hit.score.max(0.0);
        }

        let mut hits: Vec<SearchHit> = components
            .into_iter()
            .filter_map(|(id, (semantic_score, keyword_score))| {
                // A result may straddle a concurrent delete; skip gone rows.
                let page = self.store.get_by_id(id).ok().flatten()?;
                let boost = self.config.freq_weight * page.arc_score;
                let final_score = self.config.semantic_weight * semantic_score
                    + self.config.keyword_weight * keyword_score
                    + boost;
                Some(SearchHit {
                    page,
                    semantic_score,
                    keyword_score,
                    final_score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.semantic_score
                        .partial_cmp(&a.semantic_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    b.keyword_score
                        .partial_cmp(&a.keyword_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.page.id.cmp(&a.page.id))
        });

        let filter = DropFilter::new(self.config.drop_ratio, self.config.min_absolute);
        let scores: Vec<f32> = hits.iter().map(|h| h.final_score).collect();
        hits.truncate(filter.cutoff(&scores));
        hits.truncate(self.config.max_results);
        hits
    }
}
