//! Visit frequency tracking, ARC scoring and eviction.
//!
//! Every page carries a frequency score (visits per active day, saturating
//! at 5/day), a recency score (24-hour half-life decay, floored at 0.01) and
//! their weighted combination, the ARC score. Eviction removes the lowest
//! ARC scorers once the store exceeds its capacity, skipping anything
//! visited inside the protection window.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::EvictionConfig;
use crate::semantic::VectorIndex;
use crate::store::{NewPage, Page, PageStore, PageUpdate, StoreError};

/// When any counter reaches this bound, every counter is halved.
pub const SUPPRESSION_THRESHOLD: u64 = 1_000_000;
/// Visits per day at which the frequency score saturates.
const FREQUENCY_SATURATION: f32 = 5.0;
const RECENCY_HALF_LIFE_HOURS: f32 = 24.0;
const RECENCY_FLOOR: f32 = 0.01;
const FREQUENCY_WEIGHT: f32 = 0.6;
const RECENCY_WEIGHT: f32 = 0.4;

/// Visits per active day, normalized so 5 visits/day saturates at 1.0.
pub fn access_frequency(
    visit_count: u64,
    first_visited: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> f32 {
    let days_active = first_visited
        .map(|first| (now - first).num_days())
        .unwrap_or(0)
        .max(1);
    (visit_count as f32 / days_active as f32 / FREQUENCY_SATURATION).min(1.0)
}

/// Exponential decay: 1.0 at the moment of the visit, 0.5 after 24 hours,
/// never below the floor. Pages never visited score a neutral 1.0.
pub fn recency_score(last_visited: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f32 {
    let Some(last) = last_visited else {
        return 1.0;
    };
    let hours = (now - last).num_seconds() as f32 / 3600.0;
    0.5f32
        .powf(hours.max(0.0) / RECENCY_HALF_LIFE_HOURS)
        .max(RECENCY_FLOOR)
        .min(1.0)
}

pub fn arc_score(frequency: f32, recency: f32) -> f32 {
    FREQUENCY_WEIGHT * frequency + RECENCY_WEIGHT * recency
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VisitOutcome {
    pub page_id: u64,
    pub visit_count: u64,
    pub arc_score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvictionCandidate {
    pub id: u64,
    pub url: String,
    pub title: String,
    pub visit_count: u64,
    pub last_visited: Option<DateTime<Utc>>,
    pub arc_score: f32,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EvictionOutcome {
    pub evicted_count: usize,
    pub total_pages: usize,
    pub candidates_found: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvictionStats {
    pub total_pages: usize,
    pub capacity: usize,
    pub pages_over_limit: usize,
    pub eviction_needed: bool,
    pub visit_distribution: BTreeMap<String, usize>,
    pub age_distribution: BTreeMap<String, usize>,
    pub arc_distribution: BTreeMap<String, usize>,
}

pub struct FrequencyEngine {
    store: Arc<dyn PageStore>,
    vectors: Arc<RwLock<VectorIndex>>,
    config: EvictionConfig,
}

impl FrequencyEngine {
    pub fn new(
        store: Arc<dyn PageStore>,
        vectors: Arc<RwLock<VectorIndex>>,
        config: EvictionConfig,
    ) -> Self {
        Self {
            store,
            vectors,
            config,
        }
    }

    /// Track a visit to `url`, creating a placeholder row when the page has
    /// never been indexed. Occasionally kicks off an eviction pass so the
    /// store stays pruned without a dedicated scheduler.
    pub fn track_visit(&self, url: &str, at: DateTime<Utc>) -> Result<VisitOutcome, StoreError> {
        let id = match self.store.get_by_url(url)? {
            Some(page) => page.id,
            None => self.store.insert(
                NewPage {
                    url: url.to_string(),
                    title: url.to_string(),
                    content: String::new(),
                    favicon_url: None,
                },
                at,
            )?,
        };

        let outcome = self.record_visit(id, at)?;

        if rand::random::<f64>() < self.config.random_trigger_probability {
            if let Err(err) = self.run_eviction(at) {
                log::warn!("visit-triggered eviction failed: {err}");
            }
        }

        Ok(outcome)
    }

    /// Bump counters and recompute the derived scores for one page.
    pub fn record_visit(&self, id: u64, at: DateTime<Utc>) -> Result<VisitOutcome, StoreError> {
        let counters = self.store.bump_visit(id, at)?;

        let frequency = access_frequency(counters.visit_count, Some(counters.first_visited), at);
        let recency = recency_score(Some(counters.last_visited), at);
        let arc = arc_score(frequency, recency);

        self.store.update_by_id(
            id,
            PageUpdate {
                access_frequency: Some(frequency),
                recency_score: Some(recency),
                arc_score: Some(arc),
                ..Default::default()
            },
        )?;

        if counters.visit_count >= SUPPRESSION_THRESHOLD {
            self.suppress_counts(at)?;
            let suppressed = self
                .store
                .get_by_id(id)?
                .ok_or(StoreError::NotFound(id))?;
            return Ok(VisitOutcome {
                page_id: id,
                visit_count: suppressed.visit_count,
                arc_score: suppressed.arc_score,
            });
        }

        Ok(VisitOutcome {
            page_id: id,
            visit_count: counters.visit_count,
            arc_score: arc,
        })
    }

    /// Halve every visit counter and recompute all derived scores.
    /// Preserves the relative ordering of counters.
    fn suppress_counts(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        log::warn!("visit count reached {SUPPRESSION_THRESHOLD}, halving all counters");
        self.store.halve_visit_counts()?;
        self.recompute_scores(now)
    }

    /// Recompute frequency/recency/ARC for every page that has ever been
    /// visited. Counters halved down to zero still get fresh scores, so
    /// suppression cannot leave a stale high score behind.
    pub fn recompute_scores(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        for page in self.store.snapshot()? {
            if page.first_visited.is_none() {
                continue;
            }
            let frequency = access_frequency(page.visit_count, page.first_visited, now);
            let recency = recency_score(page.last_visited, now);
            self.store.update_by_id(
                page.id,
                PageUpdate {
                    access_frequency: Some(frequency),
                    recency_score: Some(recency),
                    arc_score: Some(arc_score(frequency, recency)),
                    ..Default::default()
                },
            )?;
        }
        Ok(())
    }

    /// Worst `count` evictable pages: lowest ARC score first, ties broken by
    /// older last visit, then lower id. Pages visited inside the protection
    /// window are not candidates.
    pub fn eviction_candidates(
        &self,
        now: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<EvictionCandidate>, StoreError> {
        let protect = Duration::minutes(self.config.protect_window_minutes);

        let mut candidates: Vec<Page> = self
            .store
            .snapshot()?
            .into_iter()
            .filter(|page| match page.last_visited {
                Some(last) => now - last >= protect,
                None => true,
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.arc_score
                .partial_cmp(&b.arc_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let a_last = a.last_visited.unwrap_or(DateTime::<Utc>::MIN_UTC);
                    let b_last = b.last_visited.unwrap_or(DateTime::<Utc>::MIN_UTC);
                    a_last.cmp(&b_last)
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(candidates
            .into_iter()
            .take(count)
            .map(|page| EvictionCandidate {
                id: page.id,
                url: page.url,
                title: page.title,
                visit_count: page.visit_count,
                last_visited: page.last_visited,
                arc_score: page.arc_score,
            })
            .collect())
    }

    /// Evict until the store is back at `capacity - headroom`, or no
    /// evictable candidates remain. No-op while at or under capacity.
    pub fn run_eviction(&self, now: DateTime<Utc>) -> Result<EvictionOutcome, StoreError> {
        let total = self.store.count()?;
        if total <= self.config.capacity {
            return Ok(EvictionOutcome {
                evicted_count: 0,
                total_pages: total,
                candidates_found: 0,
            });
        }

        let target = self.config.capacity.saturating_sub(self.config.headroom);
        let needed = total.saturating_sub(target);
        let candidates = self.eviction_candidates(now, needed)?;

        let mut evicted = 0;
        for candidate in &candidates {
            if self.store.delete(candidate.id)? {
                self.vectors
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(candidate.id);
                evicted += 1;
            }
        }

        let total_pages = self.store.count()?;
        log::info!("evicted {evicted} pages, {total_pages} remain");

        Ok(EvictionOutcome {
            evicted_count: evicted,
            total_pages,
            candidates_found: candidates.len(),
        })
    }

    pub fn stats(&self, now: DateTime<Utc>) -> Result<EvictionStats, StoreError> {
        let pages = self.store.snapshot()?;
        let total_pages = pages.len();

        let mut visit_distribution: BTreeMap<String, usize> = BTreeMap::new();
        let mut age_distribution: BTreeMap<String, usize> = BTreeMap::new();
        let mut arc_distribution: BTreeMap<String, usize> = BTreeMap::new();

        for page in &pages {
            let visit_bucket = match page.visit_count {
                0 => "never_visited",
                1..=2 => "low_visits",
                3..=10 => "medium_visits",
                _ => "high_visits",
            };
            *visit_distribution.entry(visit_bucket.to_string()).or_default() += 1;

            let age_bucket = match page.last_visited {
                Some(last) if (now - last).num_days() <= 7 => "recent",
                Some(last) if (now - last).num_days() <= 30 => "medium_age",
                Some(last) if (now - last).num_days() <= 90 => "old",
                _ => "very_old",
            };
            *age_distribution.entry(age_bucket.to_string()).or_default() += 1;

            let arc_bucket = if page.arc_score == 0.0 {
                "no_score"
            } else if page.arc_score <= 0.2 {
                "low_relevance"
            } else if page.arc_score <= 0.5 {
                "medium_relevance"
            } else {
                "high_relevance"
            };
            *arc_distribution.entry(arc_bucket.to_string()).or_default() += 1;
        }

        Ok(EvictionStats {
            total_pages,
            capacity: self.config.capacity,
            pages_over_limit: total_pages.saturating_sub(self.config.capacity),
            eviction_needed: total_pages > self.config.capacity,
            visit_distribution,
            age_distribution,
            arc_distribution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalPageStore;

    fn setup(config: EvictionConfig) -> (FrequencyEngine, Arc<LocalPageStore>, std::path::PathBuf) {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let dir = std::env::temp_dir().join(format!(
            "memtab-freq-test-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&dir).unwrap();

        let store = Arc::new(LocalPageStore::load(&dir.join("web_memory.json")).unwrap());
        let vectors = Arc::new(RwLock::new(VectorIndex::new(4, 100)));
        let engine = FrequencyEngine::new(store.clone(), vectors, config);
        (engine, store, dir)
    }

    fn no_random_config() -> EvictionConfig {
        EvictionConfig {
            random_trigger_probability: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn frequency_saturates_at_five_visits_per_day() {
        let now = Utc::now();
        let first = now - Duration::days(2);

        assert!((access_frequency(5, Some(first), now) - 0.5).abs() < 1e-6);
        assert!((access_frequency(10, Some(first), now) - 1.0).abs() < 1e-6);
        assert!((access_frequency(100, Some(first), now) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn days_active_has_a_floor_of_one() {
        let now = Utc::now();
        // First visit minutes ago still counts as one active day.
        let first = now - Duration::minutes(5);
        assert!((access_frequency(5, Some(first), now) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn recency_half_life_is_24_hours() {
        let now = Utc::now();

        assert!((recency_score(Some(now), now) - 1.0).abs() < 1e-6);
        let day_old = recency_score(Some(now - Duration::hours(24)), now);
        assert!((day_old - 0.5).abs() < 1e-3);
        let two_days = recency_score(Some(now - Duration::hours(48)), now);
        assert!((two_days - 0.25).abs() < 1e-3);
    }

    #[test]
    fn recency_never_drops_below_floor() {
        let now = Utc::now();
        let ancient = recency_score(Some(now - Duration::days(365)), now);
        assert!((ancient - 0.01).abs() < 1e-6);
    }

    #[test]
    fn arc_score_combines_with_60_40_weights() {
        assert!((arc_score(1.0, 1.0) - 1.0).abs() < 1e-6);
        assert!((arc_score(0.5, 1.0) - 0.7).abs() < 1e-6);
        assert!((arc_score(0.0, 0.5) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn track_visit_creates_placeholder_row() {
        let (engine, store, dir) = setup(no_random_config());
        let now = Utc::now();

        let outcome = engine.track_visit("https://a.test/x", now).unwrap();
        assert_eq!(outcome.visit_count, 1);
        assert!(outcome.arc_score > 0.0);

        let page = store.get_by_id(outcome.page_id).unwrap().unwrap();
        assert_eq!(page.title, "https://a.test/x");
        assert_eq!(page.content, "");
        assert_eq!(page.visit_count, 1);
        assert!(page.first_visited.unwrap() <= page.last_visited.unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn repeat_visits_increment_one_row() {
        let (engine, store, dir) = setup(no_random_config());
        let t0 = Utc::now();

        engine.track_visit("https://a.test/x", t0).unwrap();
        let outcome = engine
            .track_visit("https://a.test/x", t0 + Duration::hours(1))
            .unwrap();

        assert_eq!(outcome.visit_count, 2);
        assert_eq!(store.count().unwrap(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn suppression_preserves_arc_ordering() {
        let (engine, store, dir) = setup(no_random_config());
        let t0 = Utc::now() - Duration::days(10);

        let (hot, _) = store
            .upsert_by_url(
                NewPage {
                    url: "https://hot.test".into(),
                    title: "hot".into(),
                    content: "hot page content goes here".into(),
                    favicon_url: None,
                },
                t0,
            )
            .unwrap();
        let (warm, _) = store
            .upsert_by_url(
                NewPage {
                    url: "https://warm.test".into(),
                    title: "warm".into(),
                    content: "warm page content goes here".into(),
                    favicon_url: None,
                },
                t0,
            )
            .unwrap();
        let (cold, _) = store
            .upsert_by_url(
                NewPage {
                    url: "https://cold.test".into(),
                    title: "cold".into(),
                    content: "cold page content goes here".into(),
                    favicon_url: None,
                },
                t0,
            )
            .unwrap();

        let now = Utc::now();
        for _ in 0..6 {
            engine.record_visit(hot, now).unwrap();
        }
        for _ in 0..3 {
            engine.record_visit(warm, now - Duration::hours(12)).unwrap();
        }
        engine.record_visit(cold, now - Duration::days(5)).unwrap();

        let order_before: Vec<u64> = {
            let mut pages = store.snapshot().unwrap();
            pages.sort_by(|a, b| b.arc_score.partial_cmp(&a.arc_score).unwrap());
            pages.iter().map(|p| p.id).collect()
        };

        engine.suppress_counts(now).unwrap();

        let order_after: Vec<u64> = {
            let mut pages = store.snapshot().unwrap();
            pages.sort_by(|a, b| b.arc_score.partial_cmp(&a.arc_score).unwrap());
            pages.iter().map(|p| p.id).collect()
        };

        assert_eq!(order_before, order_after);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn eviction_removes_lowest_arc_first_and_respects_protection() {
        let config = EvictionConfig {
            capacity: 3,
            headroom: 0,
            protect_window_minutes: 60,
            random_trigger_probability: 0.0,
            ..Default::default()
        };
        let (engine, store, dir) = setup(config);
        let old = Utc::now() - Duration::days(2);
        let now = Utc::now();

        for i in 1..=4 {
            store
                .upsert_by_url(
                    NewPage {
                        url: format!("https://p{i}.test"),
                        title: format!("page {i}"),
                        content: "filler content for the page".into(),
                        favicon_url: None,
                    },
                    old,
                )
                .unwrap();
        }

        // Page 1 visited twice (well in the past, outside protection).
        engine.record_visit(1, old).unwrap();
        engine.record_visit(1, old + Duration::hours(1)).unwrap();
        // Page 4 visited just now: protected despite a low score.
        engine.record_visit(4, now).unwrap();

        let outcome = engine.run_eviction(now).unwrap();
        assert_eq!(outcome.evicted_count, 1);
        assert_eq!(outcome.total_pages, 3);

        // The twice-visited page and the protected page survive.
        assert!(store.get_by_id(1).unwrap().is_some());
        assert!(store.get_by_id(4).unwrap().is_some());
        // The unvisited page with the lower id went first.
        assert!(store.get_by_id(2).unwrap().is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn eviction_is_a_noop_under_capacity() {
        let (engine, store, dir) = setup(no_random_config());
        let now = Utc::now();

        store
            .upsert_by_url(
                NewPage {
                    url: "https://a.test".into(),
                    title: "a".into(),
                    content: "c".into(),
                    favicon_url: None,
                },
                now,
            )
            .unwrap();

        let outcome = engine.run_eviction(now).unwrap();
        assert_eq!(outcome.evicted_count, 0);
        assert_eq!(store.count().unwrap(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stats_bucket_pages() {
        let (engine, store, dir) = setup(no_random_config());
        let now = Utc::now();

        store
            .upsert_by_url(
                NewPage {
                    url: "https://a.test".into(),
                    title: "a".into(),
                    content: "c".into(),
                    favicon_url: None,
                },
                now,
            )
            .unwrap();
        engine.record_visit(1, now).unwrap();

        let stats = engine.stats(now).unwrap();
        assert_eq!(stats.total_pages, 1);
        assert!(!stats.eviction_needed);
        assert_eq!(stats.visit_distribution.get("low_visits"), Some(&1));
        assert_eq!(stats.age_distribution.get("recent"), Some(&1));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
