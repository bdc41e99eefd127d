//! Knowledge graph construction from corpus chunks

use ahash::AHashMap;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    Entity, EntityExtractor, EntityKind, KnowledgeGraph, PatternExtractor, Relation, RelationKind,
};
use crate::corpus::{Chunk, ChunkId};
use crate::error::{RagraphError, Result};

/// Maximum supporting snippets kept per relation
const MAX_SNIPPETS: usize = 3;
/// Snippet length stored as relation evidence
const SNIPPET_LEN: usize = 200;

/// Builds a [`KnowledgeGraph`] from a chunk sequence.
///
/// Construction is deterministic given the same chunk order and
/// extractor: entities and relations are accumulated in first-seen
/// order, so repeated builds produce identical graphs.
pub struct GraphBuilder {
    extractor: Arc<dyn EntityExtractor>,
    min_mentions: usize,
    relation_patterns: Vec<(Regex, RelationKind)>,
}

impl GraphBuilder {
    pub fn new(extractor: Arc<dyn EntityExtractor>, min_mentions: usize) -> Self {
        let relation_patterns = vec![
            (
                Regex::new(r"(?i)\b(\w+)\s+depends?\s+on\s+(\w+)\b").expect("valid pattern"),
                RelationKind::DependsOn,
            ),
            (
                Regex::new(r"(?i)\b(\w+)\s+uses?\s+(\w+)\b").expect("valid pattern"),
                RelationKind::Uses,
            ),
            (
                Regex::new(r"(?i)\b(\w+)\s+calls?\s+(\w+)\b").expect("valid pattern"),
                RelationKind::Calls,
            ),
            (
                Regex::new(r"(?i)\b(\w+)\s+extends?\s+(\w+)\b").expect("valid pattern"),
                RelationKind::Extends,
            ),
            (
                Regex::new(r"(?i)\b(\w+)\s+implements?\s+(\w+)\b").expect("valid pattern"),
                RelationKind::Implements,
            ),
            (
                Regex::new(r"(?i)\b(\w+)\s+is\s+part\s+of\s+(\w+)\b").expect("valid pattern"),
                RelationKind::PartOf,
            ),
        ];

        Self {
            extractor,
            min_mentions,
            relation_patterns,
        }
    }

    /// Builder with the deterministic pattern extractor
    pub fn pattern(min_mentions: usize) -> Self {
        Self::new(Arc::new(PatternExtractor::new()), min_mentions)
    }

    /// Builder with the extraction backend selected by configuration
    pub fn from_config(
        config: &crate::config::Config,
        completion: Arc<dyn crate::provider::CompletionProvider>,
    ) -> Self {
        let extractor: Arc<dyn EntityExtractor> = match config.graph.extractor {
            crate::config::ExtractorKind::Pattern => Arc::new(PatternExtractor::new()),
            crate::config::ExtractorKind::Model => Arc::new(super::LlmExtractor::new(
                completion,
                config.llm.call_policy(),
            )),
        };
        Self::new(extractor, config.graph.min_mentions)
    }

    /// Build a graph from the given chunks.
    ///
    /// A chunk whose extraction fails or yields nothing contributes
    /// nothing; only an empty input sequence is an error.
    pub async fn build(&self, chunks: &[Chunk]) -> Result<KnowledgeGraph> {
        if chunks.is_empty() {
            return Err(RagraphError::EmptyCorpus);
        }

        // Pass 1: extract and accumulate entity mentions per chunk.
        let mut accumulator = EntityAccumulator::default();
        let mut chunk_mentions: Vec<(ChunkId, Vec<String>, String)> = Vec::new();

        for chunk in chunks {
            let mentions = match self.extractor.extract(&chunk.text).await {
                Ok(mentions) => mentions,
                Err(err) => {
                    warn!(chunk = %chunk.id, error = %err, "entity extraction failed, skipping chunk");
                    continue;
                }
            };

            let mut names_in_order: Vec<String> = Vec::new();
            for mention in mentions {
                if !names_in_order.contains(&mention.name) {
                    names_in_order.push(mention.name.clone());
                }
                accumulator.record(mention.name, mention.kind, &chunk.id);
            }
            chunk_mentions.push((chunk.id.clone(), names_in_order, snippet(&chunk.text)));
        }

        debug!(
            unique = accumulator.len(),
            "entity extraction pass complete"
        );

        // Pass 2: explicit relation templates. Runs before filtering so
        // that pattern endpoints can be exempted from the mention floor.
        let mut relations = RelationAccumulator::default();
        let mut pattern_endpoints: HashSet<String> = HashSet::new();

        for chunk in chunks {
            for (pattern, kind) in &self.relation_patterns {
                for captures in pattern.captures_iter(&chunk.text) {
                    let source = &captures[1];
                    let target = &captures[2];
                    if source == target {
                        continue;
                    }
                    if !accumulator.contains(source) || !accumulator.contains(target) {
                        continue;
                    }
                    pattern_endpoints.insert(source.to_string());
                    pattern_endpoints.insert(target.to_string());
                    relations.record(source, target, *kind, 2.0, snippet(&chunk.text));
                }
            }
        }

        // Filter: the mention floor bounds noise, but an explicit relation
        // is itself evidence, so its endpoints survive regardless.
        let surviving = accumulator.filter(self.min_mentions, &pattern_endpoints);
        let survivor_names: HashSet<&str> = surviving.iter().map(|e| e.name.as_str()).collect();

        // Pass 3: co-occurrence edges between surviving entities sharing a
        // chunk, both directions.
        let mut chunk_entities: AHashMap<ChunkId, Vec<String>> = AHashMap::new();
        for (chunk_id, names, snip) in &chunk_mentions {
            let present: Vec<&String> = names
                .iter()
                .filter(|n| survivor_names.contains(n.as_str()))
                .collect();
            chunk_entities.insert(chunk_id.clone(), present.iter().map(|n| (*n).clone()).collect());

            for (i, a) in present.iter().enumerate() {
                for b in present.iter().skip(i + 1) {
                    relations.record(a, b, RelationKind::CoOccurs, 1.0, snip.clone());
                    relations.record(b, a, RelationKind::CoOccurs, 1.0, snip.clone());
                }
            }
        }

        let graph = KnowledgeGraph::assemble(surviving, relations.into_vec(), chunk_entities);
        let stats = graph.stats();
        info!(
            entities = stats.entity_count,
            relations = stats.relation_count,
            "knowledge graph built"
        );
        Ok(graph)
    }
}

fn snippet(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_LEN) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

fn kind_rank(kind: EntityKind) -> u8 {
    match kind {
        EntityKind::Service => 2,
        EntityKind::Identifier => 1,
        EntityKind::Generic => 0,
    }
}

/// First-seen-ordered entity accumulation with idempotent merging
#[derive(Default)]
struct EntityAccumulator {
    entities: Vec<Entity>,
    index: AHashMap<String, usize>,
}

impl EntityAccumulator {
    fn record(&mut self, name: String, kind: EntityKind, chunk: &ChunkId) {
        match self.index.get(&name) {
            Some(&i) => {
                let entity = &mut self.entities[i];
                entity.mentions += 1;
                entity.chunks.insert(chunk.clone());
                if kind_rank(kind) > kind_rank(entity.kind) {
                    entity.kind = kind;
                }
            }
            None => {
                self.index.insert(name.clone(), self.entities.len());
                self.entities.push(Entity {
                    name,
                    kind,
                    mentions: 1,
                    chunks: HashSet::from([chunk.clone()]),
                });
            }
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn len(&self) -> usize {
        self.entities.len()
    }

    fn filter(self, min_mentions: usize, exempt: &HashSet<String>) -> Vec<Entity> {
        self.entities
            .into_iter()
            .filter(|e| e.mentions >= min_mentions || exempt.contains(&e.name))
            .collect()
    }
}

/// Insertion-ordered relation accumulation merging identical
/// (source, target, kind) triples by weight
#[derive(Default)]
struct RelationAccumulator {
    relations: Vec<Relation>,
    index: AHashMap<(String, String, RelationKind), usize>,
}

impl RelationAccumulator {
    fn record(&mut self, source: &str, target: &str, kind: RelationKind, weight: f64, snip: String) {
        let key = (source.to_string(), target.to_string(), kind);
        match self.index.get(&key) {
            Some(&i) => {
                let relation = &mut self.relations[i];
                relation.weight += weight;
                if relation.snippets.len() < MAX_SNIPPETS && !relation.snippets.contains(&snip) {
                    relation.snippets.push(snip);
                }
            }
            None => {
                self.index.insert(key, self.relations.len());
                self.relations.push(Relation {
                    source: source.to_string(),
                    target: target.to_string(),
                    kind,
                    weight,
                    snippets: vec![snip],
                });
            }
        }
    }

    fn into_vec(self) -> Vec<Relation> {
        self.relations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str, position: usize, text: &str) -> Chunk {
        Chunk::new(source, position, text)
    }

    fn fixture_chunks() -> Vec<Chunk> {
        vec![
            chunk("services.md", 0, "AuthService issues tokens. AuthService stores sessions."),
            chunk("services.md", 1, "PaymentRouter forwards charges. AuthService verifies them."),
            chunk("projects.md", 0, "ProjectAlpha depends on AuthService for login."),
            chunk("projects.md", 1, "ProjectAlpha ships quarterly. PaymentRouter bills it."),
        ]
    }

    #[tokio::test]
    async fn test_empty_corpus_is_an_error() {
        let builder = GraphBuilder::pattern(2);
        let err = builder.build(&[]).await.unwrap_err();
        assert!(matches!(err, RagraphError::EmptyCorpus));
    }

    #[tokio::test]
    async fn test_build_extracts_and_filters_entities() {
        let builder = GraphBuilder::pattern(2);
        let graph = builder.build(&fixture_chunks()).await.unwrap();

        let auth = graph.entity("AuthService").unwrap();
        assert_eq!(auth.mentions, 4);
        assert_eq!(auth.kind, EntityKind::Service);
        assert_eq!(auth.chunks.len(), 3);

        assert!(graph.entity("PaymentRouter").is_some());
        assert!(graph.entity("ProjectAlpha").is_some());
    }

    #[tokio::test]
    async fn test_mention_floor_with_pattern_exemption() {
        let chunks = vec![
            chunk("a.md", 0, "CacheModule warms entries. CacheModule evicts stale ones."),
            chunk("a.md", 1, "StatsEngine depends on CacheModule heavily."),
        ];
        let builder = GraphBuilder::pattern(2);
        let graph = builder.build(&chunks).await.unwrap();

        // StatsEngine has a single mention but is an explicit-relation
        // endpoint, so it survives the floor.
        assert!(graph.entity("StatsEngine").is_some());

        for entity in graph.entities() {
            let exempt = graph
                .relations()
                .iter()
                .any(|r| r.weight >= 2.0 && (r.source == entity.name || r.target == entity.name));
            assert!(
                entity.mentions >= 2 || exempt,
                "{} violates the mention floor",
                entity.name
            );
        }
    }

    #[tokio::test]
    async fn test_explicit_relation_extracted_with_weight() {
        let builder = GraphBuilder::pattern(2);
        let graph = builder.build(&fixture_chunks()).await.unwrap();

        let deps = graph.relations_between("ProjectAlpha", "AuthService");
        let explicit = deps
            .iter()
            .find(|r| r.kind == RelationKind::DependsOn)
            .expect("DEPENDS_ON edge present");
        assert!((explicit.weight - 2.0).abs() < 1e-9);
        assert!(!explicit.snippets.is_empty());
    }

    #[tokio::test]
    async fn test_co_occurrence_is_bidirectional() {
        let builder = GraphBuilder::pattern(2);
        let graph = builder.build(&fixture_chunks()).await.unwrap();

        let forward = graph.relations_between("AuthService", "PaymentRouter");
        let backward = graph.relations_between("PaymentRouter", "AuthService");
        assert!(forward.iter().any(|r| r.kind == RelationKind::CoOccurs));
        assert!(backward.iter().any(|r| r.kind == RelationKind::CoOccurs));
    }

    #[tokio::test]
    async fn test_duplicate_relations_accumulate_weight() {
        let chunks = vec![
            chunk("a.md", 0, "LogService uses DiskModule nightly. LogService works."),
            chunk("a.md", 1, "LogService uses DiskModule on rotation. DiskModule spins."),
        ];
        let builder = GraphBuilder::pattern(2);
        let graph = builder.build(&chunks).await.unwrap();

        let uses: Vec<_> = graph
            .relations_between("LogService", "DiskModule")
            .into_iter()
            .filter(|r| r.kind == RelationKind::Uses)
            .collect();
        assert_eq!(uses.len(), 1);
        assert!((uses[0].weight - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_build_is_deterministic() {
        let chunks = fixture_chunks();
        let builder = GraphBuilder::pattern(2);
        let first = builder.build(&chunks).await.unwrap();
        let second = builder.build(&chunks).await.unwrap();

        let names =
            |g: &KnowledgeGraph| g.entities().iter().map(|e| e.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&first), names(&second));

        for (a, b) in first.entities().iter().zip(second.entities()) {
            assert_eq!(a.mentions, b.mentions);
            assert_eq!(a.chunks, b.chunks);
        }
        assert_eq!(first.relations().len(), second.relations().len());
        for (a, b) in first.relations().iter().zip(second.relations()) {
            assert_eq!((&a.source, &a.target, a.kind), (&b.source, &b.target, b.kind));
            assert!((a.weight - b.weight).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_entityless_chunk_contributes_nothing() {
        let chunks = vec![
            chunk("a.md", 0, "nothing lowercase here at all"),
            chunk("a.md", 1, "AuthService runs. AuthService rests."),
        ];
        let builder = GraphBuilder::pattern(2);
        let graph = builder.build(&chunks).await.unwrap();
        assert_eq!(graph.stats().entity_count, 1);
    }
}
