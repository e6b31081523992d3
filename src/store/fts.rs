//! In-memory inverted full-text index over page text fields.
//!
//! Terms from `title`, `keywords`, `description` and `content` are weighted
//! by field so that a title hit outranks a body hit. Queries support exact
//! terms plus prefix matches at reduced weight.

use std::collections::{HashMap, HashSet};

const TITLE_WEIGHT: f32 = 3.0;
const KEYWORDS_WEIGHT: f32 = 2.5;
const DESCRIPTION_WEIGHT: f32 = 1.5;
const CONTENT_WEIGHT: f32 = 1.0;

/// Prefix matches count for half of an exact match.
const PREFIX_FACTOR: f32 = 0.5;

/// Tokenize text into lowercase terms.
/// Filters out single-character terms and common stop words.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "in", "on", "at",
        "to", "for", "of", "with", "by", "from", "as", "and", "or", "but", "not", "no", "so",
        "if", "then",
    ];

    text.split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.len() > 1 && !STOP_WORDS.contains(&s.as_str()))
        .collect()
}

#[derive(Debug, Default)]
pub struct FullTextIndex {
    /// term -> page id -> accumulated field-weighted hits
    postings: HashMap<String, HashMap<u64, f32>>,
    /// page id -> terms posted for it, kept for removal
    docs: HashMap<u64, HashSet<String>>,
}

impl FullTextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index (or re-index) a page's text fields.
    pub fn index_page(
        &mut self,
        id: u64,
        title: &str,
        description: &str,
        keywords: &str,
        content: &str,
    ) {
        self.remove(id);

        let mut weights: HashMap<String, f32> = HashMap::new();
        for (text, weight) in [
            (title, TITLE_WEIGHT),
            (keywords, KEYWORDS_WEIGHT),
            (description, DESCRIPTION_WEIGHT),
            (content, CONTENT_WEIGHT),
        ] {
            for term in tokenize(text) {
                *weights.entry(term).or_default() += weight;
            }
        }

        let mut terms = HashSet::with_capacity(weights.len());
        for (term, weight) in weights {
            terms.insert(term.clone());
            self.postings.entry(term).or_default().insert(id, weight);
        }
        self.docs.insert(id, terms);
    }

    pub fn remove(&mut self, id: u64) {
        let Some(terms) = self.docs.remove(&id) else {
            return;
        };
        for term in terms {
            if let Some(posting) = self.postings.get_mut(&term) {
                posting.remove(&id);
                if posting.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// Search for pages matching the query terms.
    ///
    /// Ranking: number of distinct matched terms first, then the weighted
    /// hit sum, then higher id. Returns at most `limit` ids paired with
    /// their 1-based rank position.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(u64, usize)> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || limit == 0 {
            return vec![];
        }

        // page id -> (matched terms, weighted hits)
        let mut scores: HashMap<u64, (usize, f32)> = HashMap::new();

        for term in &query_terms {
            let mut term_hits: HashMap<u64, f32> = HashMap::new();

            if let Some(posting) = self.postings.get(term) {
                for (&id, &weight) in posting {
                    *term_hits.entry(id).or_default() += weight;
                }
            }

            for (indexed_term, posting) in &self.postings {
                if indexed_term != term && indexed_term.starts_with(term.as_str()) {
                    for (&id, &weight) in posting {
                        *term_hits.entry(id).or_default() += weight * PREFIX_FACTOR;
                    }
                }
            }

            for (id, hits) in term_hits {
                let entry = scores.entry(id).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += hits;
            }
        }

        let mut ranked: Vec<(u64, usize, f32)> = scores
            .into_iter()
            .map(|(id, (matched, hits))| (id, matched, hits))
            .collect();

        ranked.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| b.0.cmp(&a.0))
        });

        ranked
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(pos, (id, _, _))| (id, pos + 1))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_filters_stop_words_and_short_terms() {
        let tokens = tokenize("the quick brown fox");
        assert_eq!(tokens, vec!["quick", "brown", "fox"]);

        let tokens = tokenize("I am a person");
        assert_eq!(tokens, vec!["am", "person"]);
    }

    #[test]
    fn tokenize_splits_on_punctuation() {
        let tokens = tokenize("rust-lang, python/django");
        assert_eq!(tokens, vec!["rust", "lang", "python", "django"]);
    }

    #[test]
    fn empty_query_returns_nothing() {
        let mut index = FullTextIndex::new();
        index.index_page(1, "Rust Guide", "", "", "learn rust");
        assert!(index.search("", 10).is_empty());
        assert!(index.search("the a", 10).is_empty());
    }

    #[test]
    fn title_match_outranks_content_match() {
        let mut index = FullTextIndex::new();
        index.index_page(1, "Cooking", "", "", "rust prevention for pans");
        index.index_page(2, "Rust Tutorial", "", "", "programming language");

        let results = index.search("rust", 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], (2, 1));
        assert_eq!(results[1], (1, 2));
    }

    #[test]
    fn more_matched_terms_rank_first() {
        let mut index = FullTextIndex::new();
        index.index_page(1, "Rust Guide", "", "", "about rust");
        index.index_page(2, "Machine Learning with Rust", "", "", "ml in rust");

        let results = index.search("rust machine learning", 10);
        assert_eq!(results[0].0, 2);
    }

    #[test]
    fn prefix_matches_are_found() {
        let mut index = FullTextIndex::new();
        index.index_page(1, "FastAPI Tutorial", "", "", "building APIs");

        let results = index.search("fast", 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn removal_drops_postings() {
        let mut index = FullTextIndex::new();
        index.index_page(1, "Rust Guide", "", "", "learn rust");
        index.remove(1);

        assert!(index.search("rust", 10).is_empty());
        assert_eq!(index.doc_count(), 0);
    }

    #[test]
    fn reindex_replaces_old_terms() {
        let mut index = FullTextIndex::new();
        index.index_page(1, "Rust Guide", "", "", "");
        index.index_page(1, "Python Guide", "", "", "");

        assert!(index.search("rust", 10).is_empty());
        assert_eq!(index.search("python", 10).len(), 1);
    }

    #[test]
    fn limit_caps_results_with_stable_ranks() {
        let mut index = FullTextIndex::new();
        for id in 1..=5 {
            index.index_page(id, "shared topic", "", "", "");
        }

        let results = index.search("topic", 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].1, 1);
        assert_eq!(results[2].1, 3);
        // Equal scores tie-break toward the higher id.
        assert_eq!(results[0].0, 5);
    }
}
