//! The tool-calling reasoning loop.
//!
//! One [`Controller::run`] call is one *attempt*: a fresh conversation
//! seeded with the session history and the attempt input, advanced by
//! alternating LLM turns and tool observations until the model emits an
//! `Answer:` or the step budget runs out.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::llm::{ChatMessage, CompletionRequest, LlmClient};
use crate::tools::{ToolCatalog, OBSERVATION_CHAR_BUDGET, TRACE_CHAR_BUDGET};
use crate::trajectory::{AgentEvent, EventSink};

use super::prompts::SYSTEM_PROMPT;
use super::react;

/// One executed tool call, as seen by the grader and the tracer.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub args: Value,
    /// Observation fed back to the LLM and later to the grader
    /// (end-truncated to the observation budget)
    pub output: String,
    /// Larger capture for traces (end-truncated to the trace budget)
    pub raw_output: String,
    pub duration_ms: u64,
}

/// Result of one reasoning attempt.
#[derive(Debug, Clone)]
pub struct AttemptRun {
    pub answer: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Concatenated reasoning turns, exactly as emitted
    pub raw_stream: String,
    /// LLM turns consumed
    pub steps: usize,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub model: String,
    /// Maximum LLM turns per attempt before forcing a final answer
    pub max_steps: usize,
}

impl ControllerConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_steps: 12,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }
}

pub struct Controller {
    llm: Arc<dyn LlmClient>,
    catalog: Arc<ToolCatalog>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(llm: Arc<dyn LlmClient>, catalog: Arc<ToolCatalog>, config: ControllerConfig) -> Self {
        Self {
            llm,
            catalog,
            config,
        }
    }

    fn system_prompt(&self) -> String {
        format!("{}{}", SYSTEM_PROMPT, self.catalog.render_usage())
    }

    /// Run one attempt.
    ///
    /// `history` is the session-persistent conversation prefix (prior
    /// question/answer turns); attempt-local state starts empty. Tool
    /// argument problems and logical empties flow back to the model as
    /// observations; store-unavailable faults abort the attempt.
    pub async fn run(
        &self,
        history: &[ChatMessage],
        input: &str,
        attempt: usize,
        events: &EventSink,
    ) -> Result<AttemptRun> {
        let system = self.system_prompt();
        let mut messages: Vec<ChatMessage> = history.to_vec();
        messages.push(ChatMessage::user(input));

        let mut raw_stream = String::new();
        let mut tool_calls: Vec<ToolCallRecord> = Vec::new();

        for step in 1..=self.config.max_steps {
            let request = CompletionRequest::new()
                .with_model(self.config.model.as_str())
                .with_system(system.as_str())
                .with_messages(messages.clone())
                // The model must stop before hallucinating an observation.
                .with_stop(vec!["\nObservation:".to_string()]);

            let response = self.llm.complete_with_retry(request).await?;
            let text = response.content;

            raw_stream.push_str(&text);
            raw_stream.push('\n');
            events.emit(AgentEvent::reasoning_delta(attempt, text.clone()));
            messages.push(ChatMessage::assistant(text.clone()));

            if let Some(answer) = react::parse_answer(&text) {
                return Ok(AttemptRun {
                    answer,
                    tool_calls,
                    raw_stream,
                    steps: step,
                });
            }

            let Some(action) = react::parse_action(&text) else {
                // Neither protocol keyword: the model answered in plain
                // prose. Take it as the final answer rather than looping.
                return Ok(AttemptRun {
                    answer: text.trim().to_string(),
                    tool_calls,
                    raw_stream,
                    steps: step,
                });
            };

            let observation = self
                .dispatch(&action, attempt, &mut tool_calls, events)
                .await?;
            messages.push(ChatMessage::user(format!("Observation: {}", observation)));
        }

        // Step budget exhausted: one last turn, answer only.
        tracing::warn!(attempt, "step budget exhausted, forcing final answer");
        messages.push(ChatMessage::user(
            "已达到工具调用上限。请基于以上 Observation 直接给出最终 Answer。".to_string(),
        ));
        let request = CompletionRequest::new()
            .with_model(self.config.model.as_str())
            .with_system(system.as_str())
            .with_messages(messages);
        let response = self.llm.complete_with_retry(request).await?;
        let text = response.content;
        raw_stream.push_str(&text);
        raw_stream.push('\n');
        events.emit(AgentEvent::reasoning_delta(attempt, text.clone()));

        let answer = react::parse_answer(&text).unwrap_or_else(|| text.trim().to_string());
        Ok(AttemptRun {
            answer,
            tool_calls,
            raw_stream,
            steps: self.config.max_steps + 1,
        })
    }

    /// Execute one parsed action and record it. Returns the observation to
    /// feed back.
    async fn dispatch(
        &self,
        action: &react::ParsedAction,
        attempt: usize,
        tool_calls: &mut Vec<ToolCallRecord>,
        events: &EventSink,
    ) -> Result<String> {
        let Some(tool) = self.catalog.get(&action.tool) else {
            let msg = format!(
                "未知工具 \"{}\"。可用工具：{}。",
                action.tool,
                self.catalog.names().join("、")
            );
            tool_calls.push(ToolCallRecord {
                tool: action.tool.clone(),
                args: action.args.clone(),
                output: msg.clone(),
                raw_output: msg.clone(),
                duration_ms: 0,
            });
            events.emit(AgentEvent::tool_result(attempt, &action.tool, &action.args, msg.clone()));
            return Ok(msg);
        };

        let started = Instant::now();
        let args = if action.args.is_null() {
            // Malformed Action Input still reaches the tool, which answers
            // with its own argument guidance.
            Value::Object(serde_json::Map::new())
        } else {
            action.args.clone()
        };

        let report = match tool.invoke(&args).await {
            Ok(report) => report,
            Err(e) if e.is_store_unavailable() => return Err(e),
            Err(e) => {
                // Transient non-store faults stay inside the loop; the
                // model can try different arguments or another tool.
                format!("tool {} failed: {}", action.tool, e)
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let observation = crate::tools::truncate_chars(&report, OBSERVATION_CHAR_BUDGET);
        let record = ToolCallRecord {
            tool: action.tool.clone(),
            args: args.clone(),
            output: observation.clone(),
            raw_output: crate::tools::truncate_chars(&report, TRACE_CHAR_BUDGET),
            duration_ms,
        };
        events.emit(
            AgentEvent::tool_result(attempt, &action.tool, &args, record.raw_output.clone())
                .with_metadata("duration_ms", duration_ms as i64),
        );
        tool_calls.push(record);

        Ok(observation)
    }
}
