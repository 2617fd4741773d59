//! Observable events emitted while a query is being answered.
//!
//! The controller and retry loop emit a stream of events that consumers can
//! render live (a CLI spinner, a UI panel) and that the trace recorder
//! captures for offline analysis. Events arrive in emission order; the
//! stream closes when the query finishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Types of events emitted during query answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentEventKind {
    /// A new grading attempt started
    AttemptStart,
    /// A slice of the reasoning stream (one LLM turn)
    ReasoningDelta,
    /// A tool finished and produced an observation
    ToolResult,
    /// Grader verdict for the attempt
    Grading,
    /// Refiner produced follow-up queries
    Refining,
    /// Final answer for the query
    Final,
    /// An attempt aborted on an infrastructure fault
    Error,
    /// The session was cancelled
    Cancelled,
}

impl std::fmt::Display for AgentEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AttemptStart => "ATTEMPT_START",
            Self::ReasoningDelta => "REASONING_DELTA",
            Self::ToolResult => "TOOL_RESULT",
            Self::Grading => "GRADING",
            Self::Refining => "REFINING",
            Self::Final => "FINAL",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// One event in the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub kind: AgentEventKind,
    /// 1-based attempt the event belongs to (0 for query-level events)
    pub attempt: usize,
    /// Human-readable content
    pub content: String,
    /// Event-specific metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    pub fn new(kind: AgentEventKind, attempt: usize, content: impl Into<String>) -> Self {
        Self {
            kind,
            attempt,
            content: content.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref()?.get(key)
    }

    pub fn attempt_start(attempt: usize, limit: usize) -> Self {
        Self::new(AgentEventKind::AttemptStart, attempt, format!("limit={}", limit))
            .with_metadata("limit", limit as i64)
    }

    pub fn reasoning_delta(attempt: usize, delta: impl Into<String>) -> Self {
        Self::new(AgentEventKind::ReasoningDelta, attempt, delta)
    }

    pub fn tool_result(attempt: usize, tool: &str, args: &Value, output: impl Into<String>) -> Self {
        Self::new(AgentEventKind::ToolResult, attempt, output)
            .with_metadata("tool", tool)
            .with_metadata("args", args.clone())
    }

    pub fn final_answer(answer: impl Into<String>, passed: bool) -> Self {
        Self::new(AgentEventKind::Final, 0, answer).with_metadata("passed", passed)
    }

    pub fn error(attempt: usize, message: impl Into<String>) -> Self {
        Self::new(AgentEventKind::Error, attempt, message)
    }

    /// Format as a single-line log entry.
    pub fn as_log_line(&self) -> String {
        format!(
            "[{}] #{} {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.attempt,
            self.kind,
            self.content.lines().next().unwrap_or("")
        )
    }
}

/// Best-effort event emitter.
///
/// Observation must never block or fail the pipeline: a missing or closed
/// receiver silently drops events.
#[derive(Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventSink {
    /// A sink wired to a channel; returns the receiving half alongside.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_constructors() {
        let event = AgentEvent::attempt_start(2, 5);
        assert_eq!(event.kind, AgentEventKind::AttemptStart);
        assert_eq!(event.attempt, 2);
        assert_eq!(event.get_metadata("limit"), Some(&Value::from(5)));
    }

    #[test]
    fn test_log_line() {
        let event = AgentEvent::reasoning_delta(1, "Thought: 需要查询组织\nAction: lookup_knowledge");
        let line = event.as_log_line();
        assert!(line.contains("REASONING_DELTA"));
        assert!(line.contains("Thought: 需要查询组织"));
        assert!(!line.contains("Action")); // only the first line
    }

    #[tokio::test]
    async fn test_sink_preserves_emission_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(AgentEvent::attempt_start(1, 3));
        sink.emit(AgentEvent::reasoning_delta(1, "a"));
        sink.emit(AgentEvent::final_answer("done", true));
        drop(sink);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind);
        }
        assert_eq!(
            kinds,
            vec![
                AgentEventKind::AttemptStart,
                AgentEventKind::ReasoningDelta,
                AgentEventKind::Final
            ]
        );
    }

    #[test]
    fn test_disabled_sink_is_silent() {
        let sink = EventSink::disabled();
        sink.emit(AgentEvent::error(1, "nothing listens"));
    }
}
