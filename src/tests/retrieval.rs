use chrono::Utc;

use super::TestService;

#[test]
fn fresh_ingest_then_exact_title_search() {
    let service = TestService::new();
    let now = Utc::now();

    let outcome = service
        .indexer
        .index_page(
            TestService::request(
                "https://a.test/x",
                "Python FastAPI Tutorial",
                "a short walkthrough of building web services with fastapi",
            ),
            now,
        )
        .unwrap();

    let results = service.retrieval.search("fastapi tutorial", now);
    assert!(!results.is_empty());

    let top = &results[0];
    assert_eq!(top.page.id, outcome.id);
    assert!(top.keyword_score >= 0.9, "keyword score {}", top.keyword_score);
    assert!(top.semantic_score > 0.0, "semantic score {}", top.semantic_score);
    let expected = 0.7 * top.semantic_score + 0.3 * top.keyword_score + 0.1 * top.page.arc_score;
    assert!((top.final_score - expected).abs() < 1e-5);
}

#[test]
fn provider_outage_falls_back_to_lexical_surrogate() {
    let service = TestService::new();
    let now = Utc::now();

    service
        .indexer
        .index_page(
            TestService::request("https://a.test/1", "Release Overview", "general release overview"),
            now,
        )
        .unwrap();
    let alpha = service
        .indexer
        .index_page(
            TestService::request(
                "https://a.test/2",
                "Alpha Milestones",
                "alpha milestones and what landed in them",
            ),
            now,
        )
        .unwrap();
    service
        .indexer
        .index_page(
            TestService::request("https://a.test/3", "Closing Notes", "unrelated closing notes"),
            now,
        )
        .unwrap();

    service.provider.set_unavailable(true);

    let results = service.retrieval.search("alpha", now);
    assert!(!results.is_empty());

    let top = &results[0];
    assert_eq!(top.page.id, alpha.id);
    // The surrogate query vector is the page's own stored embedding, so the
    // page matches itself with cosine 1.
    assert!((top.semantic_score - 1.0).abs() < 1e-4);
    assert!((top.keyword_score - 1.0).abs() < 1e-6);
}

#[test]
fn repeated_search_is_served_from_the_cache() {
    let service = TestService::new();
    let now = Utc::now();

    service
        .indexer
        .index_page(
            TestService::request("https://a.test/x", "Beta Guide", "all about the beta rollout"),
            now,
        )
        .unwrap();

    let baseline = service.provider.embedding_calls();
    let first = service.retrieval.search("beta", now);
    assert_eq!(service.provider.embedding_calls(), baseline + 1);

    let second = service.retrieval.search("beta", now);
    assert_eq!(
        service.provider.embedding_calls(),
        baseline + 1,
        "second search must not call the provider"
    );

    let first_ids: Vec<u64> = first.iter().map(|h| h.page.id).collect();
    let second_ids: Vec<u64> = second.iter().map(|h| h.page.id).collect();
    assert_eq!(first_ids, second_ids);
}

#[test]
fn search_results_never_exceed_ten() {
    let service = TestService::new();
    let now = Utc::now();

    for i in 0..14 {
        service
            .indexer
            .index_page(
                TestService::request(
                    &format!("https://a.test/{i}"),
                    "Common Subject",
                    "every page shares this common subject",
                ),
                now,
            )
            .unwrap();
    }

    let results = service.retrieval.search("common subject", now);
    assert!(!results.is_empty());
    assert!(results.len() <= 10);
}
