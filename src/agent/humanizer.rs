//! Citation-stripping pass for answers that passed grading.
//!
//! The grader rewards explicit chapter/task citations, which read as
//! academic footnotes to an end user. This pass rewrites a passing answer
//! into natural prose while preserving its facts. The raw answer is always
//! kept alongside for debugging.

use std::sync::Arc;

use crate::llm::{ChatMessage, CompletionRequest, LlmClient};

use super::prompts::HUMANIZER_PROMPT;

pub struct Humanizer {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl Humanizer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Rewrite `answer` without citation markers. Returns the original on
    /// any failure: this pass must never lose a passing answer.
    pub async fn humanize(&self, answer: &str) -> String {
        let prompt = HUMANIZER_PROMPT.replace("{answer}", answer);

        let request = CompletionRequest::new()
            .with_model(self.model.as_str())
            .with_message(ChatMessage::user(prompt))
            .with_temperature(0.3);

        match self.llm.complete_with_retry(request).await {
            Ok(response) => {
                let rewritten = response.content.trim().to_string();
                if rewritten.is_empty() {
                    answer.to_string()
                } else {
                    rewritten
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "humanizer failed, keeping raw answer");
                answer.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedClient;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_rewrites_answer() {
        let h = Humanizer::new(
            Arc::new(ScriptedClient::of(&["少女为了守护世界献出了身体，化作月光。"])),
            "fast-model",
        );
        let out = h.humanize("根据第2章任务1601，少女献出身体（来源：对话原文）。").await;
        assert_eq!(out, "少女为了守护世界献出了身体，化作月光。");
    }

    #[tokio::test]
    async fn test_failure_keeps_raw_answer() {
        let h = Humanizer::new(Arc::new(ScriptedClient::new(vec![None, None])), "fast-model");
        let raw = "根据第2章任务1601，少女献出身体。";
        assert_eq!(h.humanize(raw).await, raw);
    }

    #[tokio::test]
    async fn test_empty_rewrite_keeps_raw_answer() {
        let h = Humanizer::new(Arc::new(ScriptedClient::of(&["   "])), "fast-model");
        let raw = "原答案";
        assert_eq!(h.humanize(raw).await, raw);
    }
}
