//! The workflow orchestrator
//!
//! A five-state machine: `Routing` branches to `Retrieving`,
//! `ToolExecuting`, or `DirectAnswer`, all of which converge on
//! `Reasoning`; only a reasoning-stage provider failure reaches
//! `ErrorHandling`, which always terminates at `Done` with a
//! deterministic fallback answer.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::{RouteDecision, WorkflowState};
use crate::config::Config;
use crate::corpus::CorpusIndex;
use crate::error::{RagraphError, Result};
use crate::graph::{GraphStore, KnowledgeGraph};
use crate::provider::{
    complete_bounded, embed_bounded, CompletionProvider, EmbeddingProvider, ProviderError,
};
use crate::retrieval::HybridRetriever;
use crate::tools::{ToolCall, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Routing,
    Retrieving,
    ToolExecuting,
    DirectAnswer,
    Reasoning,
    ErrorHandling,
    Done,
}

/// Drives one query at a time through the workflow state machine.
///
/// Queries are independent units of work: each takes its own graph
/// snapshot up front and owns its [`WorkflowState`], so concurrent
/// queries share nothing mutable.
pub struct Orchestrator {
    corpus: Arc<CorpusIndex>,
    store: Arc<GraphStore>,
    embedding: Arc<dyn EmbeddingProvider>,
    completion: Arc<dyn CompletionProvider>,
    config: Config,
}

impl Orchestrator {
    pub fn new(
        corpus: Arc<CorpusIndex>,
        store: Arc<GraphStore>,
        embedding: Arc<dyn EmbeddingProvider>,
        completion: Arc<dyn CompletionProvider>,
        config: Config,
    ) -> Self {
        Self {
            corpus,
            store,
            embedding,
            completion,
            config,
        }
    }

    /// Answer a query, running the workflow to completion.
    pub async fn answer(&self, query: &str) -> Result<WorkflowState> {
        self.answer_with_cancel(query, CancellationToken::new())
            .await
    }

    /// Answer a query under a cancellation token. Cancellation stops
    /// waiting on the current provider call and discards the partial
    /// state.
    #[instrument(skip_all, fields(query = %query))]
    pub async fn answer_with_cancel(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<WorkflowState> {
        let graph = self.store.snapshot();
        let retriever = Arc::new(HybridRetriever::new(
            Arc::clone(&self.corpus),
            Arc::clone(&graph),
            self.config.retrieval.clone(),
        ));
        let tools = ToolRegistry::new(
            Arc::clone(&graph),
            Arc::clone(&retriever),
            Arc::clone(&self.embedding),
            Arc::clone(&self.completion),
            &self.config,
        );

        let mut state = WorkflowState::new(query);
        let mut stage = Stage::Routing;

        while stage != Stage::Done {
            if cancel.is_cancelled() {
                return Err(RagraphError::Cancelled);
            }
            stage = match stage {
                Stage::Routing => self.route(&mut state, &graph, &cancel).await?,
                Stage::Retrieving => self.retrieve(&mut state, &retriever, &cancel).await?,
                Stage::ToolExecuting => self.execute_tools(&mut state, &tools, &cancel).await?,
                Stage::DirectAnswer => {
                    state.record("direct answer: skipping retrieval and tools");
                    Stage::Reasoning
                }
                Stage::Reasoning => self.reason(&mut state, &cancel).await?,
                Stage::ErrorHandling => self.handle_error(&mut state),
                Stage::Done => Stage::Done,
            };
        }

        info!(
            workflow = %state.id,
            steps = state.trace.len(),
            route = state.route.as_ref().map(RouteDecision::label),
            "workflow complete"
        );
        Ok(state)
    }

    /// `Routing`: ask the completion provider to pick an action and
    /// parse the reply at the boundary. Provider failure or a malformed
    /// reply both default to `Retrieve`.
    async fn route(
        &self,
        state: &mut WorkflowState,
        graph: &KnowledgeGraph,
        cancel: &CancellationToken,
    ) -> Result<Stage> {
        let prompt = routing_prompt(&state.query);
        let policy = self.config.llm.call_policy();
        let outcome = guarded(
            cancel,
            complete_bounded(self.completion.as_ref(), &prompt, "", &policy),
        )
        .await?;

        let mut decision = match outcome {
            Ok(reply) => RouteDecision::parse(&reply),
            Err(err) => {
                state.record(format!(
                    "routing provider failed ({}), defaulting to retrieve",
                    err
                ));
                RouteDecision::Retrieve
            }
        };

        // A tool decision without parameters falls back to the best
        // entity or topic visible in the query itself.
        if let RouteDecision::Tool(call) = &mut decision {
            if call.argument.is_empty() {
                call.argument = derive_argument(&state.query, graph);
            }
        }

        state.record(format!("router decided: {}", decision.label()));
        let next = match &decision {
            RouteDecision::Retrieve => Stage::Retrieving,
            RouteDecision::DirectAnswer => Stage::DirectAnswer,
            RouteDecision::Tool(call) => {
                state.tool_calls.push(call.clone());
                Stage::ToolExecuting
            }
        };
        state.route = Some(decision);
        Ok(next)
    }

    /// `Retrieving`: embed the query and run the hybrid retriever.
    /// Empty results and embedding failures both proceed to reasoning;
    /// only the trace records the difference.
    async fn retrieve(
        &self,
        state: &mut WorkflowState,
        retriever: &HybridRetriever,
        cancel: &CancellationToken,
    ) -> Result<Stage> {
        let policy = self.config.embedding.call_policy();
        let outcome = guarded(
            cancel,
            embed_bounded(self.embedding.as_ref(), &state.query, &policy),
        )
        .await?;

        match outcome {
            Ok(vector) => {
                let results =
                    retriever.retrieve(&vector, &state.query, self.config.retrieval.top_k, true);
                state.record(format!(
                    "retrieved {} chunks via hybrid retrieval",
                    results.len()
                ));
                state.retrieved = results;
            }
            Err(err) => {
                state.record(format!(
                    "retrieval unavailable ({}), continuing with empty context",
                    err
                ));
            }
        }
        Ok(Stage::Reasoning)
    }

    /// `ToolExecuting`: run the requested tools; failures are recorded
    /// in the state and surfaced to reasoning as context, never raised.
    async fn execute_tools(
        &self,
        state: &mut WorkflowState,
        tools: &ToolRegistry,
        cancel: &CancellationToken,
    ) -> Result<Stage> {
        let calls: Vec<ToolCall> = state.tool_calls.clone();
        for call in &calls {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(RagraphError::Cancelled),
                result = tools.execute(call) => result,
            };
            state.record(format!(
                "executed tool: {} ({})",
                call.tool.label(),
                if result.success { "success" } else { "failed" }
            ));
            state.tool_results.push(result);
        }
        Ok(Stage::Reasoning)
    }

    /// `Reasoning`: synthesize the final answer from whatever context is
    /// present. This is the only transition whose provider failure
    /// routes to `ErrorHandling`.
    async fn reason(&self, state: &mut WorkflowState, cancel: &CancellationToken) -> Result<Stage> {
        let context = build_context(state);
        let prompt = if context.is_empty() {
            format!(
                "Answer this query directly and concisely:\n\nQuery: {}\n\nAnswer:",
                state.query
            )
        } else {
            format!(
                "Based on the following context, provide a comprehensive answer to the query.\n\n\
                 {}\n\nQuery: {}\n\n\
                 Instructions:\n\
                 - Cite sources when referencing specific information\n\
                 - Be concise but thorough\n\
                 - If the context doesn't contain enough information, say so\n\
                 - If tools were used, incorporate their results into your answer\n\n\
                 Answer:",
                context, state.query
            )
        };

        let policy = self.config.llm.call_policy();
        let outcome = guarded(
            cancel,
            complete_bounded(self.completion.as_ref(), &prompt, &context, &policy),
        )
        .await?;

        match outcome {
            Ok(answer) => {
                state.answer = Some(answer);
                state.record("generated final answer");
                Ok(Stage::Done)
            }
            Err(err) => {
                state.error = Some(err.to_string());
                state.record(format!("reasoning failed: {}", err));
                Ok(Stage::ErrorHandling)
            }
        }
    }

    /// `ErrorHandling`: a deterministic fallback answer carrying the
    /// captured error description. No provider involvement, so this
    /// cannot fail; it always reaches `Done`.
    fn handle_error(&self, state: &mut WorkflowState) -> Stage {
        let error = state
            .error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());
        state.answer = Some(format!(
            "I was unable to produce a grounded answer for this query ({}). \
             You could try rephrasing the question or asking about a specific \
             known entity.",
            error
        ));
        state.record("error handler produced fallback answer");
        Stage::Done
    }
}

/// Race a provider call against cancellation. The outer error is only
/// ever `Cancelled`; the provider outcome stays inspectable.
async fn guarded<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = std::result::Result<T, ProviderError>>,
) -> Result<std::result::Result<T, ProviderError>> {
    tokio::select! {
        _ = cancel.cancelled() => Err(RagraphError::Cancelled),
        outcome = call => Ok(outcome),
    }
}

fn routing_prompt(query: &str) -> String {
    format!(
        "Analyze this query and decide what action to take:\n\n\
         Query: \"{}\"\n\n\
         Available actions:\n\
         1. retrieve - Search the knowledge base for relevant information\n\
         2. tool - Use a specific tool\n\
         3. direct_answer - Answer directly without retrieval (greetings, meta questions)\n\n\
         Available tools:\n\
         - lookup_facts: Look up information about a specific entity\n\
         - summarize: Summarize documents about a topic\n\
         - calculate: Compute statistics (count entities, dependencies, ...)\n\
         - analyze_dependencies: Analyze dependencies for an entity\n\n\
         Respond in this format:\n\
         Action: [retrieve/tool/direct_answer]\n\
         Tool: [tool name if action is 'tool', otherwise 'none']\n\
         Argument: [entity, topic, or calculation for the tool, otherwise 'none']",
        query
    )
}

/// Best-effort entity or topic extraction from the query, used when the
/// router picked a tool but provided no parameters.
fn derive_argument(query: &str, graph: &KnowledgeGraph) -> String {
    let lower = query.to_lowercase();
    for entity in graph.entities() {
        if lower.contains(&entity.name.to_lowercase()) {
            return entity.name.clone();
        }
    }

    // Fall back to the first capitalized word, then the whole query.
    query
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .find(|token| {
            token.len() > 2 && token.chars().next().is_some_and(|c| c.is_uppercase())
        })
        .map(str::to_string)
        .unwrap_or_else(|| query.to_string())
}

fn build_context(state: &WorkflowState) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !state.retrieved.is_empty() {
        parts.push("## Retrieved Context:".to_string());
        for (i, result) in state.retrieved.iter().enumerate() {
            parts.push(format!(
                "[{}] (Source: {}, Method: {}, Score: {:.3})\n{}",
                i + 1,
                result.chunk.source,
                result.method.label(),
                result.score,
                result.chunk.text
            ));
        }
    }

    if !state.tool_results.is_empty() {
        parts.push("## Tool Results:".to_string());
        for result in &state.tool_results {
            if result.success {
                parts.push(format!(
                    "Tool: {}\nResult: {}",
                    result.tool.label(),
                    result.payload
                ));
            } else {
                parts.push(format!(
                    "Tool: {}\nError: {}",
                    result.tool.label(),
                    result.error.as_deref().unwrap_or("unknown")
                ));
            }
        }
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Chunk;
    use crate::graph::GraphBuilder;
    use crate::provider::{MockCompletion, MockEmbedding};

    async fn orchestrator_with(completion: MockCompletion) -> Orchestrator {
        let embedding = MockEmbedding::default();
        let chunks: Vec<Chunk> = vec![
            Chunk::new("auth.md", 0, "AuthService issues tokens. AuthService rotates keys."),
            Chunk::new("alpha.md", 0, "ProjectAlpha depends on AuthService. ProjectAlpha ships."),
        ]
        .into_iter()
        .map(|c| {
            let v = embedding.embed_sync(&c.text);
            c.with_embedding(v)
        })
        .collect();

        let graph = GraphBuilder::pattern(2).build(&chunks).await.unwrap();
        let mut config = Config::default();
        config.llm.retry = false;
        config.llm.timeout_secs = 5;

        Orchestrator::new(
            Arc::new(CorpusIndex::from_chunks(chunks)),
            Arc::new(GraphStore::new(graph)),
            Arc::new(embedding),
            Arc::new(completion),
            config,
        )
    }

    #[tokio::test]
    async fn test_retrieve_path_produces_answer_and_trace() {
        let completion = MockCompletion::new();
        completion.push_response("Action: retrieve\nTool: none");
        completion.push_response("AuthService issues tokens.");

        let orchestrator = orchestrator_with(completion).await;
        let state = orchestrator.answer("What does AuthService do?").await.unwrap();

        assert_eq!(state.answer.as_deref(), Some("AuthService issues tokens."));
        assert!(state.error.is_none());
        assert!(!state.retrieved.is_empty());
        assert!(state.trace.iter().any(|t| t.step.contains("router decided")));
        assert!(state.trace.iter().any(|t| t.step.contains("retrieved")));
        assert!(state
            .trace
            .iter()
            .any(|t| t.step.contains("generated final answer")));
    }

    #[tokio::test]
    async fn test_garbled_routing_defaults_to_retrieve() {
        let completion = MockCompletion::new();
        completion.push_response("the moon is made of cheese");
        completion.push_response("fallback answer");

        let orchestrator = orchestrator_with(completion).await;
        let state = orchestrator.answer("What does AuthService do?").await.unwrap();

        assert_eq!(state.route, Some(RouteDecision::Retrieve));
        assert!(state.answer.is_some());
    }

    #[tokio::test]
    async fn test_routing_provider_failure_defaults_to_retrieve() {
        let completion = MockCompletion::new();
        completion.push_failure("router backend down");
        completion.push_response("answer without router");

        let orchestrator = orchestrator_with(completion).await;
        let state = orchestrator.answer("What does AuthService do?").await.unwrap();

        assert_eq!(state.route, Some(RouteDecision::Retrieve));
        assert!(state
            .trace
            .iter()
            .any(|t| t.step.contains("routing provider failed")));
        assert_eq!(state.answer.as_deref(), Some("answer without router"));
    }

    #[tokio::test]
    async fn test_reasoning_failure_reaches_fallback() {
        let completion = MockCompletion::new();
        completion.push_response("Action: direct_answer\nTool: none");
        completion.push_failure("reasoning backend down");

        let orchestrator = orchestrator_with(completion).await;
        let state = orchestrator.answer("hello there").await.unwrap();

        assert!(state.error.is_some());
        let answer = state.answer.as_deref().unwrap();
        assert!(answer.contains("unable to produce"));
        assert!(state
            .trace
            .iter()
            .any(|t| t.step.contains("error handler produced fallback answer")));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let completion = MockCompletion::new();
        completion.push_response("Action: retrieve\nTool: none");

        let orchestrator = orchestrator_with(completion).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .answer_with_cancel("What does AuthService do?", cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RagraphError::Cancelled));
    }

    #[tokio::test]
    async fn test_derive_argument_prefers_known_entity() {
        let completion = MockCompletion::new();
        let orchestrator = orchestrator_with(completion).await;
        let graph = orchestrator.store.snapshot();

        assert_eq!(
            derive_argument("tell me about authservice please", &graph),
            "AuthService"
        );
        assert_eq!(
            derive_argument("tell me about Gadgets please", &graph),
            "Gadgets"
        );
        assert_eq!(derive_argument("tell me more", &graph), "tell me more");
    }
}
