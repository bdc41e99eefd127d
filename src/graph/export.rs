//! Graph persistence as a derived view
//!
//! The in-memory graph contract is authoritative; these serializations
//! exist for external inspection tools and for reloading a previously
//! built graph. Entities and relations round-trip through JSON, and a
//! GraphML document is emitted for graph viewers.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{Entity, KnowledgeGraph, Relation};
use crate::corpus::ChunkId;
use crate::error::{RagraphError, Result};

const ENTITIES_FILE: &str = "entities.json";
const RELATIONS_FILE: &str = "relations.json";
const GRAPHML_FILE: &str = "knowledge_graph.graphml";

/// Serializable snapshot of a knowledge graph
#[derive(Debug, Serialize, Deserialize)]
pub struct GraphExport {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl GraphExport {
    pub fn from_graph(graph: &KnowledgeGraph) -> Self {
        Self {
            entities: graph.entities().to_vec(),
            relations: graph.relations().to_vec(),
        }
    }

    /// Rebuild an in-memory graph through the same assembly path the
    /// builder uses, so the no-dangling-edge invariant holds on import.
    pub fn into_graph(self) -> KnowledgeGraph {
        let mut chunk_entities: AHashMap<ChunkId, Vec<String>> = AHashMap::new();
        for entity in &self.entities {
            for chunk in &entity.chunks {
                chunk_entities
                    .entry(chunk.clone())
                    .or_default()
                    .push(entity.name.clone());
            }
        }
        KnowledgeGraph::assemble(self.entities, self.relations, chunk_entities)
    }

    /// Write entities.json, relations.json, and a GraphML document.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| RagraphError::Io {
            source: e,
            context: format!("failed to create export directory {:?}", dir),
        })?;

        write_json(&dir.join(ENTITIES_FILE), &self.entities)?;
        write_json(&dir.join(RELATIONS_FILE), &self.relations)?;

        let graphml = graphml_document(&self.entities, &self.relations);
        std::fs::write(dir.join(GRAPHML_FILE), graphml).map_err(|e| RagraphError::Io {
            source: e,
            context: format!("failed to write {}", GRAPHML_FILE),
        })?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            entities: read_json(&dir.join(ENTITIES_FILE))?,
            relations: read_json(&dir.join(RELATIONS_FILE))?,
        })
    }
}

/// GraphML rendering of a graph, for external inspection tools
pub fn export_graphml(graph: &KnowledgeGraph) -> String {
    graphml_document(graph.entities(), graph.relations())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| RagraphError::Json {
        source: e,
        context: format!("failed to serialize {:?}", path),
    })?;
    std::fs::write(path, json).map_err(|e| RagraphError::Io {
        source: e,
        context: format!("failed to write {:?}", path),
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| RagraphError::Io {
        source: e,
        context: format!("failed to read {:?}", path),
    })?;
    serde_json::from_str(&content).map_err(|e| RagraphError::Json {
        source: e,
        context: format!("failed to parse {:?}", path),
    })
}

fn graphml_document(entities: &[Entity], relations: &[Relation]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">\n");
    out.push_str("  <key id=\"kind\" for=\"node\" attr.name=\"kind\" attr.type=\"string\"/>\n");
    out.push_str("  <key id=\"mentions\" for=\"node\" attr.name=\"mentions\" attr.type=\"int\"/>\n");
    out.push_str("  <key id=\"relation\" for=\"edge\" attr.name=\"relation\" attr.type=\"string\"/>\n");
    out.push_str("  <key id=\"weight\" for=\"edge\" attr.name=\"weight\" attr.type=\"double\"/>\n");
    out.push_str("  <graph edgedefault=\"directed\">\n");

    for entity in entities {
        out.push_str(&format!(
            "    <node id=\"{}\">\n      <data key=\"kind\">{:?}</data>\n      <data key=\"mentions\">{}</data>\n    </node>\n",
            xml_escape(&entity.name),
            entity.kind,
            entity.mentions
        ));
    }

    for relation in relations {
        out.push_str(&format!(
            "    <edge source=\"{}\" target=\"{}\">\n      <data key=\"relation\">{}</data>\n      <data key=\"weight\">{}</data>\n    </edge>\n",
            xml_escape(&relation.source),
            xml_escape(&relation.target),
            relation.kind.label(),
            relation.weight
        ));
    }

    out.push_str("  </graph>\n</graphml>\n");
    out
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Chunk;
    use crate::graph::GraphBuilder;
    use tempfile::TempDir;

    async fn sample_graph() -> KnowledgeGraph {
        let chunks = vec![
            Chunk::new("a.md", 0, "AuthService guards logins. AuthService signs tokens."),
            Chunk::new("a.md", 1, "ProjectAlpha depends on AuthService. ProjectAlpha grows."),
        ];
        GraphBuilder::pattern(2).build(&chunks).await.unwrap()
    }

    #[tokio::test]
    async fn test_export_round_trip() {
        let graph = sample_graph().await;
        let dir = TempDir::new().unwrap();

        GraphExport::from_graph(&graph).save(dir.path()).unwrap();
        let reloaded = GraphExport::load(dir.path()).unwrap().into_graph();

        assert_eq!(reloaded.stats().entity_count, graph.stats().entity_count);
        assert_eq!(reloaded.stats().relation_count, graph.stats().relation_count);
        assert_eq!(
            reloaded.entity("AuthService").unwrap().mentions,
            graph.entity("AuthService").unwrap().mentions
        );
        assert!(!reloaded
            .relations_between("ProjectAlpha", "AuthService")
            .is_empty());
    }

    #[tokio::test]
    async fn test_graphml_contains_nodes_and_edges() {
        let graph = sample_graph().await;
        let doc = export_graphml(&graph);

        assert!(doc.contains("<node id=\"AuthService\">"));
        assert!(doc.contains("DEPENDS_ON"));
        assert!(doc.contains("edgedefault=\"directed\""));
    }
}
