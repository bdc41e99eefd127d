//! Graph-aware hybrid retriever
//!
//! Fuses a linear cosine scan over chunk vectors with bounded-hop graph
//! expansion from entities detected in the query text. The 50/50
//! weighting is a deliberate simplicity choice; there is no learned
//! re-ranking.

use ahash::AHashMap;
use std::sync::Arc;
use tracing::debug;

use super::{cosine_similarity, RetrievalMethod, RetrievalResult};
use crate::config::RetrievalConfig;
use crate::corpus::CorpusIndex;
use crate::graph::{KnowledgeGraph, Traversal};

const SEMANTIC_WEIGHT: f64 = 0.5;
const GRAPH_WEIGHT: f64 = 0.5;
const HOP_DECAY: f64 = 0.3;
/// Semantic pass keeps `OVERFETCH * top_k` candidates for fusion
const OVERFETCH: usize = 2;

/// Relevance decay per relation hop: 1.0 at hop 0, monotonically
/// decreasing but never zero.
pub fn hop_penalty(hops: usize) -> f64 {
    1.0 / (1.0 + hops as f64 * HOP_DECAY)
}

/// Retriever over one consistent corpus + graph snapshot
pub struct HybridRetriever {
    corpus: Arc<CorpusIndex>,
    graph: Arc<KnowledgeGraph>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        corpus: Arc<CorpusIndex>,
        graph: Arc<KnowledgeGraph>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            corpus,
            graph,
            config,
        }
    }

    /// Retrieve up to `top_k` chunks for a query, ordered by descending
    /// fused score; score ties resolve by chunk ingestion order.
    pub fn retrieve(
        &self,
        query_vector: &[f32],
        query_text: &str,
        top_k: usize,
        use_graph: bool,
    ) -> Vec<RetrievalResult> {
        if top_k == 0 || self.corpus.is_empty() {
            return Vec::new();
        }

        // One similarity scan serves both passes: the semantic frontier
        // and the real semantic score of every graph-derived chunk.
        let similarities: Vec<f64> = self
            .corpus
            .iter()
            .map(|chunk| cosine_similarity(query_vector, &chunk.embedding))
            .collect();

        // Zero-similarity chunks carry no semantic signal and are not
        // candidates; the graph pass may still surface them.
        let mut frontier: Vec<usize> = (0..similarities.len())
            .filter(|&i| similarities[i] > 0.0)
            .collect();
        frontier.sort_by(|&a, &b| {
            similarities[b]
                .partial_cmp(&similarities[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        frontier.truncate(OVERFETCH * top_k);
        let in_frontier: Vec<bool> = {
            let mut flags = vec![false; similarities.len()];
            for &i in &frontier {
                flags[i] = true;
            }
            flags
        };

        let query_entities = if use_graph {
            self.detect_query_entities(query_text)
        } else {
            Vec::new()
        };
        debug!(entities = ?query_entities, "query entity detection");

        let graph_hits = self.graph_pass(&query_entities);

        // Fusion over the union of both candidate sets.
        let mut results: Vec<RetrievalResult> = Vec::new();
        for (ordinal, chunk) in self.corpus.iter().enumerate() {
            let graph_hit = graph_hits.get(&ordinal);
            let semantic = in_frontier[ordinal];
            if !semantic && graph_hit.is_none() {
                continue;
            }

            let semantic_score = similarities[ordinal];
            let (graph_score, hops, matched) = match graph_hit {
                Some(hit) => (
                    semantic_score * hop_penalty(hit.hops),
                    Some(hit.hops),
                    hit.entities.clone(),
                ),
                None => (0.0, None, Vec::new()),
            };

            let method = match (semantic, graph_hit.is_some()) {
                (true, true) => RetrievalMethod::Hybrid,
                (true, false) => RetrievalMethod::Semantic,
                (false, true) => RetrievalMethod::Graph,
                (false, false) => unreachable!(),
            };

            results.push(RetrievalResult {
                chunk: chunk.clone(),
                score: SEMANTIC_WEIGHT * semantic_score + GRAPH_WEIGHT * graph_score,
                method,
                hops,
                matched_entities: matched,
            });
        }

        // Stable sort over ingestion-ordered candidates keeps the
        // ordinal tie-break.
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        results
    }

    /// Entity-scoped retrieval used by tool evidence gathering: chunks
    /// within `max_hops` of the entity, direct mentions first.
    pub fn retrieve_by_entity(&self, entity_name: &str, top_k: usize) -> Vec<RetrievalResult> {
        let Some(entity) = self.graph.find_entity_ci(entity_name) else {
            return Vec::new();
        };
        let name = entity.name.clone();

        let mut hits: AHashMap<usize, GraphHit> = AHashMap::new();
        self.collect_entity_chunks(&name, &mut hits);

        let mut results: Vec<RetrievalResult> = Vec::new();
        for (ordinal, chunk) in self.corpus.iter().enumerate() {
            if let Some(hit) = hits.get(&ordinal) {
                results.push(RetrievalResult {
                    chunk: chunk.clone(),
                    score: if hit.hops == 0 { 1.0 } else { 0.5 },
                    method: RetrievalMethod::Graph,
                    hops: Some(hit.hops),
                    matched_entities: hit.entities.clone(),
                });
            }
        }
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        results
    }

    /// Whole-token, case-insensitive scan of the query against the
    /// graph's entity set.
    fn detect_query_entities(&self, query: &str) -> Vec<String> {
        let query_tokens = tokenize(query);
        let mut found = Vec::new();
        for entity in self.graph.entities() {
            let name_tokens = tokenize(&entity.name);
            if name_tokens.is_empty() || name_tokens.len() > query_tokens.len() {
                continue;
            }
            if query_tokens
                .windows(name_tokens.len())
                .any(|window| window == name_tokens.as_slice())
            {
                found.push(entity.name.clone());
            }
        }
        found
    }

    fn graph_pass(&self, query_entities: &[String]) -> AHashMap<usize, GraphHit> {
        let mut hits: AHashMap<usize, GraphHit> = AHashMap::new();
        for entity in query_entities {
            self.collect_entity_chunks(entity, &mut hits);
        }
        hits
    }

    /// Attribute the chunks of `entity` (hop 0) and of its bounded-hop
    /// neighborhood into `hits`, keeping the minimum hop per chunk.
    fn collect_entity_chunks(&self, entity: &str, hits: &mut AHashMap<usize, GraphHit>) {
        if let Some(chunks) = self.graph.chunks_for(entity) {
            for chunk_id in chunks {
                if let Some(ordinal) = self.corpus.ordinal(chunk_id) {
                    record_hit(hits, ordinal, 0, entity);
                }
            }
        }

        for (neighbor, info) in self
            .graph
            .neighbors(entity, self.config.max_hops, Traversal::Undirected)
        {
            if let Some(chunks) = self.graph.chunks_for(&neighbor) {
                for chunk_id in chunks {
                    if let Some(ordinal) = self.corpus.ordinal(chunk_id) {
                        record_hit(hits, ordinal, info.hops, entity);
                    }
                }
            }
        }
    }
}

struct GraphHit {
    hops: usize,
    entities: Vec<String>,
}

fn record_hit(hits: &mut AHashMap<usize, GraphHit>, ordinal: usize, hops: usize, entity: &str) {
    match hits.get_mut(&ordinal) {
        Some(hit) => {
            if hops < hit.hops {
                hit.hops = hops;
            }
            if !hit.entities.iter().any(|e| e == entity) {
                hit.entities.push(entity.to_string());
            }
        }
        None => {
            hits.insert(
                ordinal,
                GraphHit {
                    hops,
                    entities: vec![entity.to_string()],
                },
            );
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}
