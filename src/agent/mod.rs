//! Workflow state machine types
//!
//! The per-query [`WorkflowState`] is an explicit struct threaded through
//! the orchestrator's transitions, and the routing outcome is parsed into
//! the closed [`RouteDecision`] enumeration right at the provider
//! boundary; unrecognized shapes map to `Retrieve`, never to an
//! unchecked default inside the workflow.

mod orchestrator;

pub use orchestrator::Orchestrator;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::retrieval::RetrievalResult;
use crate::tools::{ToolCall, ToolName, ToolResult};

/// The routing outcome, parsed from the completion provider's reply
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// Search the knowledge base (the safe default)
    Retrieve,
    /// Invoke a specific tool
    Tool(ToolCall),
    /// Answer without retrieval or tools (greetings, meta-queries)
    DirectAnswer,
}

impl RouteDecision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Retrieve => "retrieve",
            Self::Tool(_) => "tool",
            Self::DirectAnswer => "direct_answer",
        }
    }

    /// Parse a routing reply.
    ///
    /// The reply is expected to carry `Action:` / `Tool:` / `Argument:`
    /// lines. Anything malformed (a missing action, an action of `tool`
    /// without a recognizable tool name, free-form prose) falls back to
    /// `Retrieve`: always attempt grounding before giving up.
    pub fn parse(reply: &str) -> Self {
        let mut action: Option<&str> = None;
        let mut tool: Option<ToolName> = None;
        let mut argument: Option<String> = None;

        for line in reply.lines() {
            let line = line.trim();
            let lower = line.to_lowercase();
            if let Some(rest) = lower.strip_prefix("action:") {
                let rest = rest.trim();
                if rest.contains("direct_answer") || rest.contains("direct answer") {
                    action = Some("direct_answer");
                } else if rest.contains("tool") {
                    action = Some("tool");
                } else if rest.contains("retrieve") {
                    action = Some("retrieve");
                }
            } else if lower.starts_with("tool:") {
                tool = ToolName::parse(&lower);
            } else if lower.starts_with("argument:") {
                let rest = &line["argument:".len()..];
                let trimmed = rest.trim().trim_matches(|c| c == '[' || c == ']').trim();
                if !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("none") {
                    argument = Some(trimmed.to_string());
                }
            }
        }

        match action {
            Some("direct_answer") => Self::DirectAnswer,
            Some("tool") => match tool {
                Some(tool) => Self::Tool(ToolCall {
                    tool,
                    argument: argument.unwrap_or_default(),
                }),
                None => Self::Retrieve,
            },
            Some("retrieve") => Self::Retrieve,
            _ => Self::Retrieve,
        }
    }
}

/// One step in the workflow trace
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub at: DateTime<Utc>,
    pub step: String,
}

/// Per-query record mutated only by the orchestrator's transitions
#[derive(Debug)]
pub struct WorkflowState {
    pub id: Uuid,
    pub query: String,
    pub route: Option<RouteDecision>,
    pub retrieved: Vec<RetrievalResult>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    /// Ordered log of executed transitions, the workflow's sole
    /// observability mechanism
    pub trace: Vec<TraceEntry>,
    pub answer: Option<String>,
    pub error: Option<String>,
}

impl WorkflowState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            route: None,
            retrieved: Vec::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            trace: Vec::new(),
            answer: None,
            error: None,
        }
    }

    /// Append a human-readable trace entry
    pub fn record(&mut self, step: impl Into<String>) {
        let step = step.into();
        tracing::debug!(workflow = %self.id, "{}", step);
        self.trace.push(TraceEntry {
            at: Utc::now(),
            step,
        });
    }
}
