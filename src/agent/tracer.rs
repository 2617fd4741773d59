//! Full-chain trace recording.
//!
//! A passive sink with lifecycle hooks; the retry loop drives it and a
//! forwarding task feeds it reasoning deltas live. Everything is captured
//! into one tree and written as a pretty-printed JSON file per query.
//! Recorder problems are logged and swallowed: tracing must never take the
//! pipeline down with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::react;
use crate::tools::{truncate_chars, TRACE_CHAR_BUDGET};

/// One recorded tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceToolCall {
    pub tool: String,
    pub input: Value,
    pub output: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Raw and post-parsed reasoning for one attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningTrace {
    pub raw_stream: String,
    pub thoughts: Vec<String>,
    pub actions: Vec<String>,
    pub action_inputs: Vec<String>,
}

/// One attempt in the trace tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptTrace {
    pub attempt: usize,
    pub limit: usize,
    pub input_query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_from_previous: Option<Value>,
    pub tool_calls: Vec<TraceToolCall>,
    pub reasoning: ReasoningTrace,
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grading: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refiner: Option<Value>,
    pub cancelled: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// The whole recorded query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceDoc {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub config: Value,
    pub attempts: Vec<AttemptTrace>,
    pub final_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humanized_response: Option<String>,
    pub passed: bool,
    pub cancelled: bool,
    pub total_duration_ms: u64,
    pub end_timestamp: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct RecorderState {
    trace: Option<TraceDoc>,
    attempt: Option<AttemptTrace>,
}

/// Passive execution recorder. All hooks are no-ops outside an open trace
/// (or attempt), so callers never need to guard.
pub struct TraceRecorder {
    trace_dir: PathBuf,
    state: Mutex<RecorderState>,
}

impl TraceRecorder {
    pub fn new(trace_dir: impl Into<PathBuf>) -> Self {
        Self {
            trace_dir: trace_dir.into(),
            state: Mutex::new(RecorderState::default()),
        }
    }

    /// Open a trace for a query. Returns the trace id
    /// (`YYYYMMDD-HHMMSS-<6 hex of the query hash>`).
    pub fn start_trace(&self, query: &str, config: Value) -> String {
        let digest = Sha256::digest(query.as_bytes());
        let trace_id = format!(
            "{}-{:02x}{:02x}{:02x}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            digest[0],
            digest[1],
            digest[2]
        );

        let mut state = self.state.lock().unwrap();
        state.trace = Some(TraceDoc {
            trace_id: trace_id.clone(),
            timestamp: Utc::now(),
            query: query.to_string(),
            config,
            attempts: Vec::new(),
            final_response: None,
            humanized_response: None,
            passed: false,
            cancelled: false,
            total_duration_ms: 0,
            end_timestamp: None,
        });
        state.attempt = None;

        tracing::info!(trace_id = %trace_id, "trace started");
        trace_id
    }

    pub fn start_attempt(&self, attempt: usize, limit: usize, input_query: &str) {
        let mut state = self.state.lock().unwrap();
        if state.trace.is_none() {
            return;
        }
        state.attempt = Some(AttemptTrace {
            attempt,
            limit,
            input_query: input_query.to_string(),
            context_from_previous: None,
            tool_calls: Vec::new(),
            reasoning: ReasoningTrace::default(),
            response: None,
            grading: None,
            refiner: None,
            cancelled: false,
            start_time: Utc::now(),
            end_time: None,
        });
    }

    /// Record the structured summary injected from prior attempts.
    pub fn log_context_injection(&self, summary: Value) {
        let mut state = self.state.lock().unwrap();
        if let Some(attempt) = state.attempt.as_mut() {
            attempt.context_from_previous = Some(summary);
        }
    }

    pub fn log_tool_call(&self, tool: &str, input: &Value, output: &str, duration_ms: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(attempt) = state.attempt.as_mut() {
            attempt.tool_calls.push(TraceToolCall {
                tool: tool.to_string(),
                input: input.clone(),
                output: truncate_chars(output, TRACE_CHAR_BUDGET),
                duration_ms,
                timestamp: Utc::now(),
            });
        }
    }

    /// Append a slice of the live reasoning stream.
    pub fn log_reasoning_stream(&self, delta: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(attempt) = state.attempt.as_mut() {
            attempt.reasoning.raw_stream.push_str(delta);
        }
    }

    pub fn log_grading(&self, input: Value, output: Value, duration_ms: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(attempt) = state.attempt.as_mut() {
            attempt.grading = Some(serde_json::json!({
                "input": input,
                "output": output,
                "duration_ms": duration_ms,
                "timestamp": Utc::now(),
            }));
        }
    }

    pub fn log_refiner(&self, question: &str, suggestion: &str, queries: &[String], duration_ms: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(attempt) = state.attempt.as_mut() {
            attempt.refiner = Some(serde_json::json!({
                "input": {"question": question, "suggestion": suggestion},
                "output": {"queries": queries},
                "duration_ms": duration_ms,
                "timestamp": Utc::now(),
            }));
        }
    }

    /// Close the current attempt: post-parse the raw stream into structured
    /// thought/action lists (adjacent duplicate actions collapsed) and move
    /// the attempt into the trace.
    pub fn end_attempt(&self, response: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(mut attempt) = state.attempt.take() else {
            return;
        };

        attempt.reasoning.thoughts = react::parse_thoughts(&attempt.reasoning.raw_stream);
        let sequence = react::parse_action_sequence(&attempt.reasoning.raw_stream);
        attempt.reasoning.actions = sequence.iter().map(|(a, _)| a.clone()).collect();
        attempt.reasoning.action_inputs = sequence
            .into_iter()
            .map(|(_, input)| input)
            .filter(|input| !input.is_empty())
            .collect();

        attempt.response = Some(response.to_string());
        attempt.end_time = Some(Utc::now());

        if let Some(trace) = state.trace.as_mut() {
            trace.attempts.push(attempt);
        }
    }

    /// Record cancellation. A half-finished attempt is preserved with the
    /// marker set.
    pub fn mark_cancelled(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(mut attempt) = state.attempt.take() {
            attempt.cancelled = true;
            attempt.end_time = Some(Utc::now());
            if let Some(trace) = state.trace.as_mut() {
                trace.attempts.push(attempt);
            }
        }
        if let Some(trace) = state.trace.as_mut() {
            trace.cancelled = true;
        }
    }

    /// Close the trace and write it to disk. Returns the file path, or
    /// `None` when recording failed (the pipeline carries on either way).
    pub fn end_trace(
        &self,
        final_response: &str,
        humanized_response: Option<&str>,
        passed: bool,
        total_duration_ms: u64,
    ) -> Option<PathBuf> {
        let doc = {
            let mut state = self.state.lock().unwrap();
            // A trace aborted mid-attempt still closes cleanly.
            if let Some(mut attempt) = state.attempt.take() {
                attempt.end_time = Some(Utc::now());
                if let Some(trace) = state.trace.as_mut() {
                    trace.attempts.push(attempt);
                }
            }
            let Some(mut trace) = state.trace.take() else {
                return None;
            };
            trace.final_response = Some(final_response.to_string());
            trace.humanized_response = humanized_response.map(|s| s.to_string());
            trace.passed = passed;
            trace.total_duration_ms = total_duration_ms;
            trace.end_timestamp = Some(Utc::now());
            trace
        };

        match self.write(&doc) {
            Ok(path) => {
                tracing::info!(path = %path.display(), passed, "trace saved");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to write trace file");
                None
            }
        }
    }

    fn write(&self, doc: &TraceDoc) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.trace_dir)?;
        let path = self.trace_dir.join(format!("{}.json", doc.trace_id));
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    /// Current trace snapshot (for debugging).
    pub fn current_trace(&self) -> Option<TraceDoc> {
        self.state.lock().unwrap().trace.clone()
    }

    pub fn trace_dir(&self) -> &Path {
        &self.trace_dir
    }
}
