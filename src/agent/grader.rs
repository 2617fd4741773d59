//! Answer quality grading.
//!
//! A second, faster model scores each answer on four rubric axes; hard
//! floors turn the scores into a pass/fail verdict. Grading is
//! observational: it never rewrites the answer, and it never propagates an
//! error into the retry loop — anything unparseable degrades to a default
//! fail verdict.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::GraderThresholds;
use crate::llm::{ChatMessage, CompletionRequest, LlmClient};

use super::controller::ToolCallRecord;
use super::prompts::{GRADER_PROMPT, UNKNOWN_CONCLUSION_PROMPT};

/// Question category the grader assigns before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Relational,
    Factual,
    Journey,
    Detail,
    /// Grader output missing or unparseable
    Unknown,
}

/// The four 0-25 rubric axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeScores {
    pub tool_usage: u8,
    pub completeness: u8,
    pub citation: u8,
    pub depth: u8,
}

impl GradeScores {
    pub fn total(&self) -> u8 {
        self.tool_usage + self.completeness + self.citation + self.depth
    }
}

/// One grading verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeVerdict {
    pub question_type: QuestionType,
    pub scores: GradeScores,
    /// Total score 0-100
    pub score: u8,
    pub reason: String,
    pub suggestion: String,
    pub passed: bool,
    /// Names the violated floor (or other cause) when `passed` is false
    pub fail_reason: Option<String>,
}

impl GradeVerdict {
    /// Default fail verdict used when grading itself misbehaves.
    pub fn default_fail(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            question_type: QuestionType::Unknown,
            scores: GradeScores::default(),
            score: 0,
            reason: reason.clone(),
            suggestion: "请重试或检查答案格式".to_string(),
            passed: false,
            fail_reason: Some(reason),
        }
    }
}

pub struct AnswerGrader {
    llm: Arc<dyn LlmClient>,
    model: String,
    thresholds: GraderThresholds,
}

impl AnswerGrader {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, thresholds: GraderThresholds) -> Self {
        Self {
            llm,
            model: model.into(),
            thresholds,
        }
    }

    /// Grade an answer against its question and tool transcript.
    ///
    /// Infallible by design; transport failures and malformed JSON both
    /// come back as default fail verdicts.
    pub async fn grade(
        &self,
        question: &str,
        answer: &str,
        tool_calls: &[ToolCallRecord],
    ) -> GradeVerdict {
        let prompt = GRADER_PROMPT
            .replace("{question}", question)
            .replace("{answer}", answer)
            .replace("{tool_calls}", &format_tool_calls(tool_calls));

        let request = CompletionRequest::new()
            .with_model(self.model.as_str())
            .with_message(ChatMessage::user(prompt))
            .with_temperature(0.0);

        let response = match self.llm.complete_with_retry(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "grader call failed");
                return GradeVerdict::default_fail(format!("评估调用失败: {}", e));
            }
        };

        let mut verdict = match parse_verdict(&response.content, &self.thresholds) {
            Some(verdict) => verdict,
            None => {
                tracing::warn!("unparseable grader verdict");
                return GradeVerdict::default_fail("无法解析评估结果");
            }
        };

        // High scores cannot save an answer whose conclusion is "I don't
        // know": that is a retry signal, not an answer.
        if verdict.passed && self.is_unknown_conclusion(question, answer).await {
            verdict.passed = false;
            verdict.fail_reason = Some("答案结论为\"不知道\"".to_string());
            if verdict.suggestion.is_empty() {
                verdict.suggestion =
                    "答案结论是\"不知道\"。请用 search_memory 换不同关键词再搜索。".to_string();
            }
        }

        verdict
    }

    /// Third fast-model call: does the answer *conclude* with "unknown"?
    /// Mentioning "不知道" inside quoted dialogue does not count.
    async fn is_unknown_conclusion(&self, question: &str, answer: &str) -> bool {
        let prompt = UNKNOWN_CONCLUSION_PROMPT
            .replace("{question}", question)
            .replace("{answer}", answer);

        let request = CompletionRequest::new()
            .with_model(self.model.as_str())
            .with_message(ChatMessage::user(prompt))
            .with_temperature(0.0)
            .with_max_tokens(8);

        match self.llm.complete_with_retry(request).await {
            Ok(response) => {
                let text = response.content.trim().to_lowercase();
                text.starts_with("yes") || text.starts_with("是")
            }
            // If the check itself fails, do not block an otherwise passing
            // answer.
            Err(e) => {
                tracing::warn!(error = %e, "unknown-conclusion check failed");
                false
            }
        }
    }
}

fn format_tool_calls(tool_calls: &[ToolCallRecord]) -> String {
    if tool_calls.is_empty() {
        return "(没有调用任何工具)".to_string();
    }
    tool_calls
        .iter()
        .map(|tc| format!("- {}({}) → {}", tc.tool, tc.args, tc.output))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    question_type: Option<String>,
    #[serde(default)]
    scores: RawScores,
    score: Option<i64>,
    reason: Option<String>,
    suggestion: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawScores {
    tool_usage: Option<i64>,
    completeness: Option<i64>,
    citation: Option<i64>,
    depth: Option<i64>,
}

fn clamp_axis(value: Option<i64>) -> u8 {
    value.unwrap_or(0).clamp(0, 25) as u8
}

/// Extract and validate the JSON verdict, then apply the hard floors in
/// priority order: depth, citation, total.
fn parse_verdict(text: &str, thresholds: &GraderThresholds) -> Option<GradeVerdict> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let raw: RawVerdict = serde_json::from_str(&text[start..=end]).ok()?;

    let scores = GradeScores {
        tool_usage: clamp_axis(raw.scores.tool_usage),
        completeness: clamp_axis(raw.scores.completeness),
        citation: clamp_axis(raw.scores.citation),
        depth: clamp_axis(raw.scores.depth),
    };
    let score = raw
        .score
        .map(|s| s.clamp(0, 100) as u8)
        .unwrap_or_else(|| scores.total());

    let question_type = match raw.question_type.as_deref() {
        Some("relational") => QuestionType::Relational,
        Some("factual") => QuestionType::Factual,
        Some("journey") => QuestionType::Journey,
        Some("detail") => QuestionType::Detail,
        _ => QuestionType::Unknown,
    };

    let mut suggestion = raw.suggestion.unwrap_or_default();
    let (passed, fail_reason) = if scores.depth < thresholds.depth_floor {
        if suggestion.is_empty() {
            suggestion = "答案深度不足，请调用 search_memory 获取具体剧情内容".to_string();
        }
        (
            false,
            Some(format!(
                "depth={} < {} (硬性门槛)",
                scores.depth, thresholds.depth_floor
            )),
        )
    } else if scores.citation < thresholds.citation_floor {
        if suggestion.is_empty() {
            suggestion = "答案缺乏来源引用，请在回答中明确引用章节/任务编号".to_string();
        }
        (
            false,
            Some(format!(
                "citation={} < {} (硬性门槛)",
                scores.citation, thresholds.citation_floor
            )),
        )
    } else if score < thresholds.total_floor {
        (
            false,
            Some(format!("score={} < {}", score, thresholds.total_floor)),
        )
    } else {
        (true, None)
    };

    Some(GradeVerdict {
        question_type,
        scores,
        score,
        reason: raw.reason.unwrap_or_else(|| "评估完成".to_string()),
        suggestion,
        passed,
        fail_reason,
    })
}
