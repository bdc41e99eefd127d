//! Statistic computation over the knowledge graph
//!
//! Requests are matched against a small fixed vocabulary; anything
//! outside it fails with `UnsupportedCalculation` rather than guessing.

use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

use super::ToolError;
use crate::graph::{EntityKind, KnowledgeGraph, RelationKind};

fn depends_on_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)depends?\s+on\s+(\w+)").expect("valid pattern"))
}

fn type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\btype\s+(\w+)").expect("valid pattern"))
}

fn touching_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:of|for)\s+(\w+)").expect("valid pattern"))
}

pub(super) fn run(
    graph: &KnowledgeGraph,
    request: &str,
) -> Result<serde_json::Value, ToolError> {
    let lower = request.to_lowercase();

    // "how many X depend on Y" counts explicit dependency edges only;
    // co-occurrence is not a dependency.
    if let Some(captures) = depends_on_re().captures(request) {
        let name = &captures[1];
        let entity = graph
            .find_entity_ci(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let count = graph
            .incoming_relations(&entity.name)
            .iter()
            .filter(|r| r.kind == RelationKind::DependsOn)
            .count();
        return Ok(json!({
            "calculation": "count_dependents",
            "entity": entity.name,
            "value": count,
            "description": format!("{} entities depend on {}", count, entity.name),
        }));
    }

    if lower.contains("average") || lower.contains("avg") || lower.contains("mean") {
        let mean = graph.stats().mean_mentions;
        return Ok(json!({
            "calculation": "mean_mentions",
            "value": (mean * 100.0).round() / 100.0,
            "description": format!("mean mentions per entity: {:.2}", mean),
        }));
    }

    if lower.contains("entit") {
        if let Some(captures) = type_re().captures(request) {
            let kind = parse_entity_kind(&captures[1])
                .ok_or_else(|| ToolError::UnsupportedCalculation(request.to_string()))?;
            let count = graph.entities().iter().filter(|e| e.kind == kind).count();
            return Ok(json!({
                "calculation": "count_entities_by_kind",
                "kind": kind,
                "value": count,
                "description": format!("{} entities of type {:?}", count, kind),
            }));
        }
        let count = graph.stats().entity_count;
        return Ok(json!({
            "calculation": "count_entities",
            "value": count,
            "description": format!("total entities: {}", count),
        }));
    }

    if lower.contains("relation") {
        if let Some(kind) = parse_relation_kind(&lower) {
            let count = graph.relations().iter().filter(|r| r.kind == kind).count();
            return Ok(json!({
                "calculation": "count_relations_by_kind",
                "kind": kind.label(),
                "value": count,
                "description": format!("{} relations of kind {}", count, kind.label()),
            }));
        }
        if let Some(captures) = touching_re().captures(request) {
            let name = &captures[1];
            if let Some(entity) = graph.find_entity_ci(name) {
                let count = graph.outgoing_relations(&entity.name).len()
                    + graph.incoming_relations(&entity.name).len();
                return Ok(json!({
                    "calculation": "count_entity_relations",
                    "entity": entity.name,
                    "value": count,
                    "description": format!("{} relations touch {}", count, entity.name),
                }));
            }
        }
        let count = graph.stats().relation_count;
        return Ok(json!({
            "calculation": "count_relations",
            "value": count,
            "description": format!("total relations: {}", count),
        }));
    }

    Err(ToolError::UnsupportedCalculation(request.to_string()))
}

fn parse_entity_kind(text: &str) -> Option<EntityKind> {
    match text.to_lowercase().as_str() {
        "service" | "services" => Some(EntityKind::Service),
        "identifier" | "identifiers" => Some(EntityKind::Identifier),
        "generic" => Some(EntityKind::Generic),
        _ => None,
    }
}

fn parse_relation_kind(lower: &str) -> Option<RelationKind> {
    const KINDS: [RelationKind; 7] = [
        RelationKind::CoOccurs,
        RelationKind::DependsOn,
        RelationKind::Uses,
        RelationKind::Calls,
        RelationKind::Extends,
        RelationKind::Implements,
        RelationKind::PartOf,
    ];
    KINDS.into_iter().find(|kind| {
        let label = kind.label().to_lowercase();
        lower.contains(&label) || lower.contains(&label.replace('_', " "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Chunk;
    use crate::graph::GraphBuilder;

    async fn fixture_graph() -> KnowledgeGraph {
        let chunks = vec![
            Chunk::new("auth.md", 0, "AuthService issues tokens. AuthService rotates keys."),
            Chunk::new("alpha.md", 0, "ProjectAlpha depends on AuthService. ProjectAlpha ships."),
            Chunk::new("beta.md", 0, "BillingService depends on AuthService. BillingService invoices."),
            Chunk::new("gamma.md", 0, "ReportModule depends on AuthService. ReportModule renders."),
        ];
        GraphBuilder::pattern(2).build(&chunks).await.unwrap()
    }

    #[tokio::test]
    async fn test_count_dependents_excludes_co_occurrence() {
        let graph = fixture_graph().await;
        // Three DEPENDS_ON edges target AuthService; the co-occurrence
        // edges from the same chunks must not inflate the count.
        let payload = run(&graph, "how many services depend on AuthService").unwrap();
        assert_eq!(payload["value"], 3);
        assert_eq!(payload["entity"], "AuthService");
    }

    #[tokio::test]
    async fn test_count_entities() {
        let graph = fixture_graph().await;
        let payload = run(&graph, "count entities").unwrap();
        assert_eq!(payload["value"], graph.stats().entity_count);
    }

    #[tokio::test]
    async fn test_count_entities_by_kind() {
        let graph = fixture_graph().await;
        let payload = run(&graph, "count entities of type service").unwrap();
        let expected = graph
            .entities()
            .iter()
            .filter(|e| e.kind == EntityKind::Service)
            .count();
        assert_eq!(payload["value"], expected);
    }

    #[tokio::test]
    async fn test_count_relations_by_kind() {
        let graph = fixture_graph().await;
        let payload = run(&graph, "count relations of kind depends_on").unwrap();
        assert_eq!(payload["value"], 3);
    }

    #[tokio::test]
    async fn test_mean_mentions() {
        let graph = fixture_graph().await;
        let payload = run(&graph, "calculate average mentions").unwrap();
        let expected = graph.stats().mean_mentions;
        let got = payload["value"].as_f64().unwrap();
        assert!((got - expected).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_unknown_request_is_unsupported() {
        let graph = fixture_graph().await;
        let err = run(&graph, "derive the meaning of life").unwrap_err();
        assert!(matches!(err, ToolError::UnsupportedCalculation(_)));
    }

    #[tokio::test]
    async fn test_dependents_of_unknown_entity() {
        let graph = fixture_graph().await;
        let err = run(&graph, "how many depend on Zorblatt").unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
