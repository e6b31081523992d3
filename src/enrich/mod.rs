//! Enrichment client: keyword/description generation and text embeddings.
//!
//! Two providers implement the same capability set. The live provider talks
//! to an OpenAI-compatible HTTP API; the mock provider derives deterministic
//! outputs from input hashes and is used when no token is configured and in
//! tests. Either way, ingestion is never blocked: keyword generation falls
//! back to a synthesized placeholder, and only embedding generation reports
//! `Unavailable` so callers can run their own fallback.

mod live;
mod mock;

pub use live::LiveProvider;
pub use mock::MockProvider;

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;

use crate::store::fts::tokenize;

/// Keyword/description output of the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub description: String,
    pub keywords: Vec<String>,
}

impl Enrichment {
    /// Comma-separated keyword list as stored on the page row.
    pub fn keywords_joined(&self) -> String {
        self.keywords.join(", ")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    /// The provider could not be reached or kept failing after retries.
    #[error("enrichment provider unavailable: {0}")]
    Unavailable(String),

    #[error("malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Capability set of an enrichment provider. Calls may block on the network
/// and are expected to apply the configured retry policy internally.
pub trait EnrichmentBackend: Send + Sync {
    /// Derive a description and keyword list for a page. Never fails in
    /// practice: exhausted retries degrade to [`placeholder_enrichment`].
    fn generate_keywords_and_description(
        &self,
        title: &str,
        content: &str,
    ) -> Result<Enrichment, EnrichmentError>;

    /// Embed a text. Exhausted retries surface as
    /// [`EnrichmentError::Unavailable`].
    fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, EnrichmentError>;

    fn health_check(&self) -> bool;
}

/// Maximum keywords in a synthesized placeholder.
const PLACEHOLDER_KEYWORDS: usize = 10;

/// Fallback enrichment when the provider is out: the title stands in for the
/// description and the most frequent content tokens become keywords.
pub fn placeholder_enrichment(title: &str, content: &str) -> Enrichment {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in tokenize(content) {
        *counts.entry(token).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    Enrichment {
        description: title.to_string(),
        keywords: ranked
            .into_iter()
            .take(PLACEHOLDER_KEYWORDS)
            .map(|(token, _)| token)
            .collect(),
    }
}

/// Truncate to at most `max_chars` characters, respecting char boundaries.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Exponential backoff with jitter for retryable provider failures.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
    exp + jitter
}
