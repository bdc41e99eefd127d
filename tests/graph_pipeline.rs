//! Integration tests: graph construction through hybrid retrieval
//!
//! Exercises the full build -> retrieve pipeline on a realistic fixture
//! corpus with deterministic mock embeddings.

use std::sync::Arc;

use ragraph::config::RetrievalConfig;
use ragraph::corpus::{Chunk, CorpusIndex};
use ragraph::graph::{GraphBuilder, RelationKind};
use ragraph::provider::MockEmbedding;
use ragraph::retrieval::{HybridRetriever, RetrievalMethod};
use ragraph::RagraphError;

fn fixture_chunks(embedding: &MockEmbedding) -> Vec<Chunk> {
    let raw = vec![
        (
            "services.md",
            0,
            "AuthService issues login tokens. AuthService validates sessions and scopes.",
        ),
        (
            "services.md",
            1,
            "AuthService rotates signing keys nightly. AuthService audits failures.",
        ),
        (
            "projects.md",
            0,
            "ProjectAlpha depends on AuthService for all authentication flows.",
        ),
        (
            "projects.md",
            1,
            "ProjectAlpha milestones cover reporting dashboards and billing exports.",
        ),
        (
            "misc.md",
            0,
            "The cafeteria menu rotates weekly with seasonal produce.",
        ),
    ];

    raw.into_iter()
        .map(|(source, position, text)| {
            let vector = embedding.embed_sync(text);
            Chunk::new(source, position, text).with_embedding(vector)
        })
        .collect()
}

async fn build_fixture() -> (Arc<CorpusIndex>, HybridRetriever, MockEmbedding) {
    let embedding = MockEmbedding::default();
    let chunks = fixture_chunks(&embedding);
    let graph = Arc::new(GraphBuilder::pattern(2).build(&chunks).await.unwrap());
    let corpus = Arc::new(CorpusIndex::from_chunks(chunks));
    let retriever = HybridRetriever::new(
        Arc::clone(&corpus),
        Arc::clone(&graph),
        RetrievalConfig::default(),
    );
    (corpus, retriever, embedding)
}

#[tokio::test]
async fn test_empty_corpus_fails_loudly() {
    let err = GraphBuilder::pattern(2).build(&[]).await.unwrap_err();
    assert!(matches!(err, RagraphError::EmptyCorpus));
}

#[tokio::test]
async fn test_explicit_dependency_edge_exists() {
    let embedding = MockEmbedding::default();
    let chunks = fixture_chunks(&embedding);
    let graph = GraphBuilder::pattern(2).build(&chunks).await.unwrap();

    let explicit: Vec<_> = graph
        .relations_between("ProjectAlpha", "AuthService")
        .into_iter()
        .filter(|r| r.kind == RelationKind::DependsOn)
        .collect();
    assert_eq!(explicit.len(), 1);
    assert!((explicit[0].weight - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_dependency_query_reaches_hop_one_chunks() {
    let (_corpus, retriever, embedding) = build_fixture().await;

    let query = "Which projects depend on AuthService?";
    let vector = embedding.embed_sync(query);
    let results = retriever.retrieve(&vector, query, 5, true);

    // Entity detection finds AuthService; hop 0 returns its own chunks
    // and hop 1 reaches ProjectAlpha's chunks over the DEPENDS_ON edge.
    assert!(results
        .iter()
        .any(|r| r.matched_entities.contains(&"AuthService".to_string())));

    let milestone = results
        .iter()
        .find(|r| r.chunk.text.contains("milestones"))
        .expect("hop-1 ProjectAlpha chunk retrieved");
    assert_eq!(milestone.hops, Some(1));

    // The chunk stating the dependency outright carries both a direct
    // mention (hop 0) and the strongest query overlap, so it ranks above
    // the milestone chunk that is only related through the graph.
    let explicit_rank = results
        .iter()
        .position(|r| r.chunk.text.contains("depends on AuthService"))
        .expect("explicit chunk retrieved");
    let milestone_rank = results
        .iter()
        .position(|r| r.chunk.text.contains("milestones"))
        .unwrap();
    assert!(explicit_rank < milestone_rank);
}

#[tokio::test]
async fn test_unknown_entity_degrades_to_semantic() {
    let (_corpus, retriever, embedding) = build_fixture().await;

    let query = "What is Zorblatt?";
    let vector = embedding.embed_sync(query);
    let results = retriever.retrieve(&vector, query, 5, true);

    // No recognizable entity: the graph pass contributes nothing and
    // whatever comes back is purely semantic. Never an error.
    assert!(results
        .iter()
        .all(|r| r.method == RetrievalMethod::Semantic));
}

#[tokio::test]
async fn test_build_idempotent_across_runs() {
    let embedding = MockEmbedding::default();
    let chunks = fixture_chunks(&embedding);
    let builder = GraphBuilder::pattern(2);

    let first = builder.build(&chunks).await.unwrap();
    let second = builder.build(&chunks).await.unwrap();

    assert_eq!(first.stats().entity_count, second.stats().entity_count);
    assert_eq!(first.stats().relation_count, second.stats().relation_count);
    for (a, b) in first.entities().iter().zip(second.entities()) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.mentions, b.mentions);
        assert_eq!(a.chunks, b.chunks);
    }
    for (a, b) in first.relations().iter().zip(second.relations()) {
        assert_eq!(a.source, b.source);
        assert_eq!(a.target, b.target);
        assert_eq!(a.kind, b.kind);
        assert!((a.weight - b.weight).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_mention_floor_holds_in_final_graph() {
    let embedding = MockEmbedding::default();
    let chunks = fixture_chunks(&embedding);
    let graph = GraphBuilder::pattern(2).build(&chunks).await.unwrap();

    for entity in graph.entities() {
        let pattern_endpoint = graph.relations().iter().any(|r| {
            r.kind != RelationKind::CoOccurs
                && (r.source == entity.name || r.target == entity.name)
        });
        assert!(
            entity.mentions >= 2 || pattern_endpoint,
            "{} retained with {} mentions and no explicit relation",
            entity.name,
            entity.mentions
        );
    }
}
