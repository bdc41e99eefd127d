//! Entity-relation knowledge graph
//!
//! The graph is stored as two flat arenas (entities, relations) plus
//! name-keyed adjacency indices, rather than pointer-linked nodes. All
//! lookups and traversals are synchronous and read-only after assembly;
//! sharing across queries goes through [`GraphStore`].

mod builder;
mod export;
mod extract;

pub use builder::GraphBuilder;
pub use export::{export_graphml, GraphExport};
pub use extract::{EntityExtractor, ExtractedMention, LlmExtractor, PatternExtractor};

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::corpus::ChunkId;
use crate::error::{RagraphError, Result};

/// Closed set of entity type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    /// Component-style names (AuthService, PaymentRouter, ...)
    Service,
    /// Camel-case identifiers
    Identifier,
    /// Everything else that looks like a named concept
    Generic,
}

/// Closed set of relation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    CoOccurs,
    DependsOn,
    Uses,
    Calls,
    Extends,
    Implements,
    PartOf,
}

impl RelationKind {
    /// Kinds that express a dependency between components
    pub fn is_dependency(self) -> bool {
        matches!(self, Self::DependsOn | Self::Uses | Self::Calls)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::CoOccurs => "CO_OCCURS",
            Self::DependsOn => "DEPENDS_ON",
            Self::Uses => "USES",
            Self::Calls => "CALLS",
            Self::Extends => "EXTENDS",
            Self::Implements => "IMPLEMENTS",
            Self::PartOf => "PART_OF",
        }
    }
}

/// A named concept discovered in chunks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical name
    pub name: String,
    /// Type tag
    pub kind: EntityKind,
    /// Total mentions across the corpus
    pub mentions: usize,
    /// Chunks in which the entity appears
    pub chunks: HashSet<ChunkId>,
}

/// Directed, typed, weighted edge between two entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,
    pub kind: RelationKind,
    /// Accumulated weight (co-occurrence 1.0, pattern-derived 2.0 per piece of evidence)
    pub weight: f64,
    /// Supporting text snippets
    pub snippets: Vec<String>,
}

/// A neighbor reached by bounded traversal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Minimum hop distance from the start entity
    pub hops: usize,
    /// Kind of the strongest edge that first reached this neighbor
    pub via: RelationKind,
}

/// Edge-direction handling during traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Follow stored edges plus their reverse (default discovery mode)
    Undirected,
    /// Follow stored edge direction only
    Directed,
}

/// Aggregate graph statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relation_count: usize,
    pub relations_by_kind: BTreeMap<String, usize>,
    pub mean_mentions: f64,
}

/// In-memory directed multigraph over entities
#[derive(Debug)]
pub struct KnowledgeGraph {
    entities: Vec<Entity>,
    relations: Vec<Relation>,
    entity_index: AHashMap<String, usize>,
    outgoing: AHashMap<String, Vec<usize>>,
    incoming: AHashMap<String, Vec<usize>>,
    chunk_entities: AHashMap<ChunkId, Vec<String>>,
}

impl KnowledgeGraph {
    /// Assemble a graph from finished entity and relation sets.
    ///
    /// Any relation whose endpoint is not in the entity set is dropped
    /// here, which is what upholds the no-dangling-edge invariant for
    /// every construction path (builder and import alike).
    pub(crate) fn assemble(
        entities: Vec<Entity>,
        relations: Vec<Relation>,
        chunk_entities: AHashMap<ChunkId, Vec<String>>,
    ) -> Self {
        let entity_index: AHashMap<String, usize> = entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();

        let relations: Vec<Relation> = relations
            .into_iter()
            .filter(|r| {
                entity_index.contains_key(&r.source) && entity_index.contains_key(&r.target)
            })
            .collect();

        let mut outgoing: AHashMap<String, Vec<usize>> = AHashMap::new();
        let mut incoming: AHashMap<String, Vec<usize>> = AHashMap::new();
        for (i, relation) in relations.iter().enumerate() {
            outgoing.entry(relation.source.clone()).or_default().push(i);
            incoming.entry(relation.target.clone()).or_default().push(i);
        }

        Self {
            entities,
            relations,
            entity_index,
            outgoing,
            incoming,
            chunk_entities,
        }
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entity_index.get(name).map(|&i| &self.entities[i])
    }

    /// Case-insensitive entity lookup, used by tools resolving user-supplied names
    pub fn find_entity_ci(&self, name: &str) -> Option<&Entity> {
        self.entity(name).or_else(|| {
            self.entities
                .iter()
                .find(|e| e.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Chunk ids in which an entity appears directly (hop 0)
    pub fn chunks_for(&self, entity: &str) -> Option<&HashSet<ChunkId>> {
        self.entity(entity).map(|e| &e.chunks)
    }

    /// Entity names mentioned in a chunk
    pub fn entities_in_chunk(&self, chunk: &ChunkId) -> &[String] {
        self.chunk_entities
            .get(chunk)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn outgoing_relations(&self, entity: &str) -> Vec<&Relation> {
        self.outgoing
            .get(entity)
            .map(|idxs| idxs.iter().map(|&i| &self.relations[i]).collect())
            .unwrap_or_default()
    }

    pub fn incoming_relations(&self, entity: &str) -> Vec<&Relation> {
        self.incoming
            .get(entity)
            .map(|idxs| idxs.iter().map(|&i| &self.relations[i]).collect())
            .unwrap_or_default()
    }

    /// Relations stored in the direction `source` → `target`
    pub fn relations_between(&self, source: &str, target: &str) -> Vec<&Relation> {
        self.outgoing_relations(source)
            .into_iter()
            .filter(|r| r.target == target)
            .collect()
    }

    /// Bounded breadth-first neighbor discovery.
    ///
    /// Each entity is attributed to its minimum hop distance only; the
    /// visited set guarantees termination on cyclic graphs. At every
    /// frontier node candidate edges are expanded in descending weight
    /// order, so the reported `via` kind is the strongest edge that
    /// reached the neighbor.
    pub fn neighbors(
        &self,
        entity: &str,
        max_hops: usize,
        mode: Traversal,
    ) -> AHashMap<String, Neighbor> {
        let mut found: AHashMap<String, Neighbor> = AHashMap::new();
        if max_hops == 0 || !self.entity_index.contains_key(entity) {
            return found;
        }

        let mut visited: AHashSet<String> = AHashSet::new();
        visited.insert(entity.to_string());
        let mut frontier: Vec<String> = vec![entity.to_string()];

        for hop in 1..=max_hops {
            let mut next = Vec::new();
            for name in &frontier {
                for (neighbor, kind, _weight) in self.edge_candidates(name, mode) {
                    if visited.contains(neighbor) {
                        continue;
                    }
                    visited.insert(neighbor.to_string());
                    found.insert(neighbor.to_string(), Neighbor { hops: hop, via: kind });
                    next.push(neighbor.to_string());
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        found
    }

    /// Unweighted BFS shortest path over the undirected view.
    ///
    /// Ties resolve by discovery order, which is the same weight-ordered
    /// edge listing `neighbors` uses, so results are deterministic.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if !self.entity_index.contains_key(from) || !self.entity_index.contains_key(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut predecessor: AHashMap<String, String> = AHashMap::new();
        let mut visited: AHashSet<String> = AHashSet::new();
        visited.insert(from.to_string());
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(from.to_string());

        while let Some(name) = queue.pop_front() {
            for (neighbor, _kind, _weight) in self.edge_candidates(&name, Traversal::Undirected) {
                if visited.contains(neighbor) {
                    continue;
                }
                visited.insert(neighbor.to_string());
                predecessor.insert(neighbor.to_string(), name.clone());

                if neighbor == to {
                    let mut path = vec![to.to_string()];
                    let mut cursor = to.to_string();
                    while let Some(prev) = predecessor.get(&cursor) {
                        path.push(prev.clone());
                        cursor = prev.clone();
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(neighbor.to_string());
            }
        }

        None
    }

    pub fn stats(&self) -> GraphStats {
        let mut relations_by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for relation in &self.relations {
            *relations_by_kind
                .entry(relation.kind.label().to_string())
                .or_insert(0) += 1;
        }

        let mean_mentions = if self.entities.is_empty() {
            0.0
        } else {
            self.entities.iter().map(|e| e.mentions as f64).sum::<f64>()
                / self.entities.len() as f64
        };

        GraphStats {
            entity_count: self.entities.len(),
            relation_count: self.relations.len(),
            relations_by_kind,
            mean_mentions,
        }
    }

    /// Check structural invariants before a graph is published.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for relation in &self.relations {
            if !self.entity_index.contains_key(&relation.source)
                || !self.entity_index.contains_key(&relation.target)
            {
                return Err(format!(
                    "dangling relation {} -> {}",
                    relation.source, relation.target
                ));
            }
        }
        Ok(())
    }

    /// Candidate edges out of a node, strongest first.
    ///
    /// Stable sort keeps stored order within equal weights, which fixes
    /// traversal tie-breaking across runs.
    fn edge_candidates(&self, name: &str, mode: Traversal) -> Vec<(&str, RelationKind, f64)> {
        let mut candidates = Vec::new();
        if let Some(idxs) = self.outgoing.get(name) {
            for &i in idxs {
                let r = &self.relations[i];
                candidates.push((r.target.as_str(), r.kind, r.weight));
            }
        }
        if mode == Traversal::Undirected {
            if let Some(idxs) = self.incoming.get(name) {
                for &i in idxs {
                    let r = &self.relations[i];
                    candidates.push((r.source.as_str(), r.kind, r.weight));
                }
            }
        }
        candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        candidates
    }
}

/// Atomically swappable shared graph handle
///
/// Queries take an `Arc` snapshot and keep it for their whole lifetime;
/// a rebuild swaps the pointer only once the new graph has been
/// validated, so in-flight queries never observe partial state.
pub struct GraphStore {
    current: RwLock<Arc<KnowledgeGraph>>,
}

impl GraphStore {
    pub fn new(graph: KnowledgeGraph) -> Self {
        Self {
            current: RwLock::new(Arc::new(graph)),
        }
    }

    /// Consistent snapshot for the duration of one query
    pub fn snapshot(&self) -> Arc<KnowledgeGraph> {
        Arc::clone(&self.current.read().expect("graph store lock poisoned"))
    }

    /// Validate and publish a freshly built graph; the previous snapshot
    /// is released once its last holder drops.
    pub fn swap(&self, next: KnowledgeGraph) -> Result<()> {
        next.validate()
            .map_err(|m| RagraphError::Other(anyhow::anyhow!("graph validation failed: {}", m)))?;
        let stats = next.stats();
        info!(
            entities = stats.entity_count,
            relations = stats.relation_count,
            "publishing rebuilt knowledge graph"
        );
        *self.current.write().expect("graph store lock poisoned") = Arc::new(next);
        Ok(())
    }
}
