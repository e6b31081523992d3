//! Deterministic mock provider.
//!
//! Embeddings are derived from token hashes: each distinct token seeds a
//! fixed pseudo-random direction, and a text embeds to the normalized sum
//! over its token set. Texts sharing vocabulary therefore land close in the
//! vector space, which is enough structure for end-to-end tests and for
//! running the service without a provider.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{placeholder_enrichment, Enrichment, EnrichmentBackend, EnrichmentError};
use crate::store::fts::tokenize;

pub struct MockProvider {
    dimension: usize,
    unavailable: AtomicBool,
    embedding_calls: AtomicU64,
    summary_calls: AtomicU64,
}

impl MockProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            unavailable: AtomicBool::new(false),
            embedding_calls: AtomicU64::new(0),
            summary_calls: AtomicU64::new(0),
        }
    }

    /// Simulate a provider outage: embedding calls fail until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of embedding calls made, including failed ones.
    pub fn embedding_calls(&self) -> u64 {
        self.embedding_calls.load(Ordering::SeqCst)
    }

    pub fn summary_calls(&self) -> u64 {
        self.summary_calls.load(Ordering::SeqCst)
    }

    fn token_direction(&self, token: &str) -> Vec<f32> {
        let mut state = fnv1a64(token.as_bytes());
        (0..self.dimension)
            .map(|_| {
                let bits = splitmix64(&mut state);
                // Map to [-1, 1)
                (bits >> 40) as f32 / (1u64 << 23) as f32 - 1.0
            })
            .collect()
    }
}

impl EnrichmentBackend for MockProvider {
    fn generate_keywords_and_description(
        &self,
        title: &str,
        content: &str,
    ) -> Result<Enrichment, EnrichmentError> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        Ok(placeholder_enrichment(title, content))
    }

    fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, EnrichmentError> {
        self.embedding_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EnrichmentError::Unavailable(
                "mock provider disabled".to_string(),
            ));
        }

        let mut tokens: std::collections::BTreeSet<String> =
            tokenize(text).into_iter().collect();
        if tokens.is_empty() {
            tokens.insert(text.to_string());
        }

        let mut sum = vec![0.0f32; self.dimension];
        for token in &tokens {
            for (acc, x) in sum.iter_mut().zip(self.token_direction(token)) {
                *acc += x;
            }
        }

        let norm = sum.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < f32::EPSILON {
            // All-token cancellation is astronomically unlikely; fall back to
            // a single fixed direction.
            sum[0] = 1.0;
            return Ok(sum);
        }
        for x in &mut sum {
            *x /= norm;
        }
        Ok(sum)
    }

    fn health_check(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (na * nb)
    }

    #[test]
    fn embeddings_are_deterministic() {
        let provider = MockProvider::new(64);
        let a = provider.generate_embedding("rust async tutorial").unwrap();
        let b = provider.generate_embedding("rust async tutorial").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn embeddings_are_normalized() {
        let provider = MockProvider::new(64);
        let v = provider.generate_embedding("hello world").unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn shared_vocabulary_means_higher_similarity() {
        let provider = MockProvider::new(256);
        let doc = provider
            .generate_embedding("python fastapi tutorial web framework")
            .unwrap();
        let related = provider.generate_embedding("fastapi tutorial").unwrap();
        let unrelated = provider.generate_embedding("gardening compost soil").unwrap();

        assert!(cosine(&doc, &related) > cosine(&doc, &unrelated));
        assert!(cosine(&doc, &related) > 0.2);
    }

    #[test]
    fn outage_mode_fails_embeddings_only() {
        let provider = MockProvider::new(64);
        provider.set_unavailable(true);

        assert!(matches!(
            provider.generate_embedding("q"),
            Err(EnrichmentError::Unavailable(_))
        ));
        assert!(provider.generate_keywords_and_description("t", "c").is_ok());
        assert!(!provider.health_check());
    }

    #[test]
    fn call_counter_tracks_every_attempt() {
        let provider = MockProvider::new(64);
        let _ = provider.generate_embedding("one");
        provider.set_unavailable(true);
        let _ = provider.generate_embedding("two");
        assert_eq!(provider.embedding_calls(), 2);
    }
}
