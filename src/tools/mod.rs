//! Fixed analysis tools over the knowledge graph and retriever
//!
//! Every tool invocation returns a [`ToolResult`]; internal failures are
//! captured there rather than propagated, so the workflow can carry a
//! failed tool call into reasoning and answer gracefully.

mod calculate;

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::graph::{KnowledgeGraph, Traversal};
use crate::provider::{
    complete_bounded, embed_bounded, CallPolicy, CompletionProvider, EmbeddingProvider,
    ProviderError,
};
use crate::retrieval::HybridRetriever;

/// The closed set of callable tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    LookupFacts,
    Summarize,
    Calculate,
    AnalyzeDependencies,
}

impl ToolName {
    pub fn label(self) -> &'static str {
        match self {
            Self::LookupFacts => "lookup_facts",
            Self::Summarize => "summarize",
            Self::Calculate => "calculate",
            Self::AnalyzeDependencies => "analyze_dependencies",
        }
    }

    /// Loose matching for tool names coming back from the router
    pub fn parse(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        if lower.contains("lookup") {
            Some(Self::LookupFacts)
        } else if lower.contains("summar") {
            Some(Self::Summarize)
        } else if lower.contains("calc") {
            Some(Self::Calculate)
        } else if lower.contains("depend") {
            Some(Self::AnalyzeDependencies)
        } else {
            None
        }
    }
}

/// A requested tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: ToolName,
    /// Entity name, topic, or calculation request depending on the tool
    pub argument: String,
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub tool: ToolName,
    pub success: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ToolResult {
    fn ok(tool: ToolName, payload: serde_json::Value) -> Self {
        Self {
            tool,
            success: true,
            payload,
            error: None,
        }
    }

    fn failed(tool: ToolName, error: &ToolError) -> Self {
        Self {
            tool,
            success: false,
            payload: serde_json::Value::Null,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("entity '{0}' not found in knowledge graph")]
    NotFound(String),

    #[error("no documents found related to '{0}'")]
    NoContext(String),

    #[error("unsupported calculation: '{0}'")]
    UnsupportedCalculation(String),

    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),
}

/// Executes the fixed tool set against one graph snapshot
pub struct ToolRegistry {
    graph: Arc<KnowledgeGraph>,
    retriever: Arc<HybridRetriever>,
    embedding: Arc<dyn EmbeddingProvider>,
    completion: Arc<dyn CompletionProvider>,
    top_k: usize,
    embed_policy: CallPolicy,
    llm_policy: CallPolicy,
}

impl ToolRegistry {
    pub fn new(
        graph: Arc<KnowledgeGraph>,
        retriever: Arc<HybridRetriever>,
        embedding: Arc<dyn EmbeddingProvider>,
        completion: Arc<dyn CompletionProvider>,
        config: &Config,
    ) -> Self {
        Self {
            graph,
            retriever,
            embedding,
            completion,
            top_k: config.retrieval.top_k,
            embed_policy: config.embedding.call_policy(),
            llm_policy: config.llm.call_policy(),
        }
    }

    /// Run a tool call; failures become unsuccessful results, never
    /// errors raised to the caller.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        debug!(tool = call.tool.label(), argument = %call.argument, "executing tool");
        let outcome = match call.tool {
            ToolName::LookupFacts => self.lookup_facts(&call.argument),
            ToolName::Summarize => self.summarize(&call.argument).await,
            ToolName::Calculate => calculate::run(&self.graph, &call.argument),
            ToolName::AnalyzeDependencies => self.analyze_dependencies(&call.argument),
        };

        match outcome {
            Ok(payload) => ToolResult::ok(call.tool, payload),
            Err(err) => ToolResult::failed(call.tool, &err),
        }
    }

    /// Entity record, direct relations, neighbors, and evidence chunks
    fn lookup_facts(&self, entity_name: &str) -> Result<serde_json::Value, ToolError> {
        let entity = self
            .graph
            .find_entity_ci(entity_name)
            .ok_or_else(|| ToolError::NotFound(entity_name.to_string()))?;

        let mut neighbors: Vec<String> = self
            .graph
            .neighbors(&entity.name, 1, Traversal::Undirected)
            .into_keys()
            .collect();
        neighbors.sort();

        let relations: Vec<serde_json::Value> = self
            .graph
            .outgoing_relations(&entity.name)
            .into_iter()
            .chain(self.graph.incoming_relations(&entity.name))
            .take(5)
            .map(|r| {
                json!({
                    "source": r.source,
                    "target": r.target,
                    "kind": r.kind.label(),
                })
            })
            .collect();

        let evidence: Vec<serde_json::Value> = self
            .retriever
            .retrieve_by_entity(&entity.name, 3)
            .into_iter()
            .map(|res| {
                json!({
                    "source": res.chunk.source,
                    "excerpt": excerpt(&res.chunk.text),
                    "entities": self.graph.entities_in_chunk(&res.chunk.id),
                })
            })
            .collect();

        Ok(json!({
            "entity": entity.name,
            "kind": entity.kind,
            "mentions": entity.mentions,
            "related_entities": neighbors,
            "relations": relations,
            "evidence": evidence,
        }))
    }

    /// Retrieve chunks about a topic and synthesize a summary
    async fn summarize(&self, topic: &str) -> Result<serde_json::Value, ToolError> {
        let query = format!("information about {}", topic);
        let vector = embed_bounded(self.embedding.as_ref(), &query, &self.embed_policy).await?;

        let results = self
            .retriever
            .retrieve(&vector, &query, self.top_k, true);
        if results.is_empty() {
            return Err(ToolError::NoContext(topic.to_string()));
        }

        let context: String = results
            .iter()
            .map(|res| format!("[Source: {}]\n{}\n", res.chunk.source, res.chunk.text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Based on the following excerpts, provide a comprehensive summary about {}.\n\nContext:\n{}\n\nSummary:",
            topic, context
        );

        let summary =
            complete_bounded(self.completion.as_ref(), &prompt, "", &self.llm_policy).await?;

        let sources: Vec<&str> = results.iter().map(|r| r.chunk.source.as_str()).collect();
        Ok(json!({
            "topic": topic,
            "summary": summary,
            "sources": sources,
            "num_chunks": results.len(),
        }))
    }

    /// Outgoing/incoming dependency relations and a criticality label
    fn analyze_dependencies(&self, entity_name: &str) -> Result<serde_json::Value, ToolError> {
        let entity = self
            .graph
            .find_entity_ci(entity_name)
            .ok_or_else(|| ToolError::NotFound(entity_name.to_string()))?;

        let mut depends_on: Vec<String> = Vec::new();
        for relation in self.graph.outgoing_relations(&entity.name) {
            if relation.kind.is_dependency() && !depends_on.contains(&relation.target) {
                depends_on.push(relation.target.clone());
            }
        }

        let mut depended_by: Vec<String> = Vec::new();
        for relation in self.graph.incoming_relations(&entity.name) {
            if relation.kind.is_dependency() && !depended_by.contains(&relation.source) {
                depended_by.push(relation.source.clone());
            }
        }

        let criticality = match depended_by.len() {
            n if n >= 3 => "high",
            n if n >= 1 => "medium",
            _ => "low",
        };

        Ok(json!({
            "entity": entity.name,
            "depends_on": depends_on,
            "depended_by": depended_by,
            "depends_on_count": depends_on.len(),
            "depended_by_count": depended_by.len(),
            "criticality": criticality,
        }))
    }
}

fn excerpt(text: &str) -> String {
    const LIMIT: usize = 200;
    match text.char_indices().nth(LIMIT) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
