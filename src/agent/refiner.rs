//! Query decomposition for failed attempts.
//!
//! When an answer fails grading, the refiner turns the question plus the
//! grader's suggestion into 2-3 short vector-search strings. Output is
//! advisory: the reasoning loop may use or ignore the suggestions.

use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;

use crate::llm::{ChatMessage, CompletionRequest, LlmClient};

use super::prompts::REFINER_PROMPT;

const MAX_QUERIES: usize = 3;

static JSON_ARRAY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*?\]").expect("Invalid regex"));

/// Stopwords dropped by the keyword fallback. Mixed CJK/ASCII because
/// questions arrive in Chinese with occasional Latin names.
const STOPWORDS: &[&str] = &[
    "是", "什么", "为什么", "怎么", "如何", "的", "和", "与", "吗", "呢", "了", "在",
    "有", "谁", "哪", "请问", "？", "?",
];

pub struct QueryRefiner {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl QueryRefiner {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Decompose a question into targeted search queries.
    ///
    /// Never fails: LLM or parse trouble falls back to the keyword
    /// heuristic.
    pub async fn refine(&self, question: &str, suggestion: &str) -> Vec<String> {
        let prompt = REFINER_PROMPT
            .replace("{question}", question)
            .replace("{suggestion}", if suggestion.is_empty() { "需要更详细的信息" } else { suggestion });

        let request = CompletionRequest::new()
            .with_model(self.model.as_str())
            .with_message(ChatMessage::user(prompt))
            .with_temperature(0.0);

        let response = match self.llm.complete_with_retry(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "refiner call failed, using keyword fallback");
                return fallback_queries(question);
            }
        };

        match parse_queries(&response.content) {
            Some(queries) if !queries.is_empty() => {
                tracing::info!(?queries, "refined queries");
                queries
            }
            _ => {
                tracing::warn!("unparseable refiner output, using keyword fallback");
                fallback_queries(question)
            }
        }
    }
}

/// Parse a JSON array of strings out of a response that may wrap it in
/// markdown fences or prose.
fn parse_queries(text: &str) -> Option<Vec<String>> {
    let candidate = if text.trim().starts_with('[') {
        text.trim().to_string()
    } else {
        JSON_ARRAY_PATTERN.find(text)?.as_str().to_string()
    };

    let queries: Vec<String> = serde_json::from_str(&candidate).ok()?;
    Some(
        queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .take(MAX_QUERIES)
            .collect(),
    )
}

/// Keyword-extraction fallback: segment on stopwords and punctuation, keep
/// the substantive fragments.
fn fallback_queries(question: &str) -> Vec<String> {
    let mut cleaned = question.to_string();
    for stop in STOPWORDS {
        cleaned = cleaned.replace(stop, " ");
    }
    let terms: Vec<&str> = cleaned
        .split([' ', '，', '。', '、', '！', '：', '“', '”'])
        .filter(|t| !t.is_empty())
        .collect();

    if terms.len() >= 2 {
        vec![question.to_string(), terms.join(" ")]
    } else {
        vec![question.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedClient;
    use pretty_assertions::assert_eq;

    fn refiner(responses: Vec<Option<String>>) -> QueryRefiner {
        QueryRefiner::new(Arc::new(ScriptedClient::new(responses)), "fast-model")
    }

    #[tokio::test]
    async fn test_parses_bare_array() {
        let r = refiner(vec![Some(
            r#"["努昂诺塔 少女 相遇", "少女 月灵 起源"]"#.to_string(),
        )]);
        let queries = r.refine("努昂诺塔和少女是什么关系？", "").await;
        assert_eq!(queries, vec!["努昂诺塔 少女 相遇", "少女 月灵 起源"]);
    }

    #[tokio::test]
    async fn test_strips_markdown_fences() {
        let r = refiner(vec![Some(
            "好的：\n```json\n[\"玛薇卡 试炼 目的\", \"纳塔 竞技场\"]\n```".to_string(),
        )]);
        let queries = r.refine("玛薇卡为什么要举办试炼？", "深度不足").await;
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0], "玛薇卡 试炼 目的");
    }

    #[tokio::test]
    async fn test_caps_at_three_queries() {
        let r = refiner(vec![Some(
            r#"["一", "二", "三", "四", "五"]"#.to_string(),
        )]);
        let queries = r.refine("q", "").await;
        assert_eq!(queries.len(), 3);
    }

    #[tokio::test]
    async fn test_non_array_falls_back_to_keywords() {
        let r = refiner(vec![Some("我无法分解这个问题".to_string())]);
        let queries = r.refine("努昂诺塔和少女是什么关系？", "").await;
        assert_eq!(queries[0], "努昂诺塔和少女是什么关系？");
        assert!(queries.len() >= 2);
        assert!(queries[1].contains("努昂诺塔"));
        assert!(!queries[1].contains("什么"));
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back() {
        let r = refiner(vec![None, None]);
        let queries = r.refine("玛薇卡的称号？", "").await;
        assert!(!queries.is_empty());
        assert_eq!(queries[0], "玛薇卡的称号？");
    }

    #[test]
    fn test_fallback_single_term_returns_question_only() {
        assert_eq!(fallback_queries("玛薇卡"), vec!["玛薇卡"]);
    }
}
