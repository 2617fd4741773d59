//! The progressive-retry state machine.
//!
//! Runs up to `max_attempts` reasoning attempts, widening the vector
//! tool's breadth budget each round. Failed attempts are distilled into a
//! structured Markdown history (tool calls reduced to one-line conclusion
//! summaries, never raw outputs) that prefixes the next attempt's input:
//! the model learns what was tried without re-reading the same chunk text,
//! which would bias it toward repeating the prior answer.

use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::llm::ChatMessage;
use crate::tools::BreadthBudget;
use crate::trajectory::{AgentEvent, AgentEventKind, EventSink};

use super::controller::{AttemptRun, Controller, ToolCallRecord};
use super::grader::{AnswerGrader, GradeVerdict};
use super::humanizer::Humanizer;
use super::refiner::QueryRefiner;
use super::tracer::TraceRecorder;

/// Cooperative cancellation handle for a session.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }
}

/// Everything retained about one finished (or aborted) attempt.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: usize,
    pub limit: usize,
    pub answer: String,
    pub verdict: GradeVerdict,
    pub tool_calls: Vec<ToolCallRecord>,
    pub refined_queries: Vec<String>,
    /// Infrastructure abort reason, when the attempt never produced an
    /// answer
    pub aborted: Option<String>,
}

/// Final outcome of a query.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// The answer handed to the user (humanized when grading passed and
    /// the pass is enabled)
    pub answer: String,
    /// The pre-humanizer answer, always kept for debugging
    pub raw_answer: String,
    pub passed: bool,
    pub attempts: Vec<AttemptRecord>,
    pub trace_path: Option<PathBuf>,
}

pub struct RetryOrchestrator {
    settings: Settings,
    controller: Controller,
    grader: AnswerGrader,
    refiner: QueryRefiner,
    humanizer: Option<Humanizer>,
    breadth: BreadthBudget,
    tracer: TraceRecorder,
}

impl RetryOrchestrator {
    pub fn new(
        settings: Settings,
        controller: Controller,
        grader: AnswerGrader,
        refiner: QueryRefiner,
        humanizer: Option<Humanizer>,
        breadth: BreadthBudget,
        tracer: TraceRecorder,
    ) -> Self {
        Self {
            settings,
            controller,
            grader,
            refiner,
            humanizer,
            breadth,
            tracer,
        }
    }

    /// Answer a question through the full retry loop.
    pub async fn answer(
        &self,
        question: &str,
        history: &[ChatMessage],
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<QueryOutcome> {
        let started = Instant::now();
        self.tracer.start_trace(
            question,
            serde_json::json!({
                "reasoning_model": self.settings.reasoning_model,
                "fast_model": self.settings.fast_model,
                "max_attempts": self.settings.max_attempts,
                "limit_progression": self.settings.limit_progression,
            }),
        );

        let mut records: Vec<AttemptRecord> = Vec::new();

        for attempt in 1..=self.settings.max_attempts {
            let limit = self.settings.limit_for_attempt(attempt);
            self.breadth.set(limit);

            let input = if records.is_empty() {
                question.to_string()
            } else {
                build_history_document(question, &records)
            };

            self.tracer.start_attempt(attempt, limit, &input);
            if !records.is_empty() {
                self.tracer
                    .log_context_injection(context_summary(&records));
            }
            events.emit(AgentEvent::attempt_start(attempt, limit));
            tracing::info!(attempt, limit, "attempt started");

            let run = match self
                .run_attempt(history, &input, attempt, events, cancel)
                .await
            {
                Ok(run) => run,
                Err(Error::Cancelled) => {
                    return self.finish_cancelled(question, events, started);
                }
                Err(e) => {
                    // Infrastructure abort: record a fail verdict and, if
                    // budget remains, try again (the store may recover).
                    tracing::warn!(attempt, error = %e, "attempt aborted");
                    events.emit(AgentEvent::error(attempt, e.to_string()));
                    self.tracer.end_attempt("");
                    records.push(AttemptRecord {
                        attempt,
                        limit,
                        answer: String::new(),
                        verdict: GradeVerdict::default_fail(e.to_string()),
                        tool_calls: Vec::new(),
                        refined_queries: Vec::new(),
                        aborted: Some(e.to_string()),
                    });
                    if attempt == self.settings.max_attempts {
                        return self.finish_exhausted(records, events, started, Some(e));
                    }
                    continue;
                }
            };

            // Grade the attempt.
            let grade_started = Instant::now();
            let verdict = tokio::select! {
                _ = cancel.cancelled() => return self.finish_cancelled(question, events, started),
                verdict = self.grader.grade(question, &run.answer, &run.tool_calls) => verdict,
            };
            let grade_ms = grade_started.elapsed().as_millis() as u64;

            self.tracer.log_grading(
                serde_json::json!({
                    "question": question,
                    "answer": crate::tools::truncate_chars(&run.answer, 500),
                    "tool_calls": run.tool_calls.len(),
                }),
                serde_json::to_value(&verdict).unwrap_or(Value::Null),
                grade_ms,
            );
            events.emit(
                AgentEvent::new(
                    AgentEventKind::Grading,
                    attempt,
                    verdict
                        .fail_reason
                        .clone()
                        .unwrap_or_else(|| verdict.reason.clone()),
                )
                .with_metadata("score", verdict.score as i64)
                .with_metadata("depth", verdict.scores.depth as i64)
                .with_metadata("passed", verdict.passed),
            );
            tracing::info!(
                attempt,
                score = verdict.score,
                depth = verdict.scores.depth,
                passed = verdict.passed,
                "graded"
            );

            if verdict.passed {
                self.tracer.end_attempt(&run.answer);
                return self
                    .finish_passed(run, verdict, records, attempt, limit, events, started)
                    .await;
            }

            // Failed with budget left: refine before the next round.
            let refined_queries = if attempt < self.settings.max_attempts {
                let refine_started = Instant::now();
                let queries = tokio::select! {
                    _ = cancel.cancelled() => return self.finish_cancelled(question, events, started),
                    queries = self.refiner.refine(question, &verdict.suggestion) => queries,
                };
                self.tracer.log_refiner(
                    question,
                    &verdict.suggestion,
                    &queries,
                    refine_started.elapsed().as_millis() as u64,
                );
                events.emit(AgentEvent::new(
                    AgentEventKind::Refining,
                    attempt,
                    queries.join(" | "),
                ));
                queries
            } else {
                Vec::new()
            };

            self.tracer.end_attempt(&run.answer);
            records.push(AttemptRecord {
                attempt,
                limit,
                answer: run.answer,
                verdict,
                tool_calls: run.tool_calls,
                refined_queries,
                aborted: None,
            });
        }

        self.finish_exhausted(records, events, started, None)
    }

    /// Run the controller with live event forwarding into the tracer.
    async fn run_attempt(
        &self,
        history: &[ChatMessage],
        input: &str,
        attempt: usize,
        events: &EventSink,
        cancel: &CancelToken,
    ) -> Result<AttemptRun> {
        let (tee, mut rx) = EventSink::channel();

        let controller_run = async {
            let result = self.controller.run(history, input, attempt, &tee).await;
            drop(tee);
            result
        };

        let forward = async {
            while let Some(event) = rx.recv().await {
                match event.kind {
                    AgentEventKind::ReasoningDelta => {
                        self.tracer
                            .log_reasoning_stream(&format!("{}\n", event.content));
                    }
                    AgentEventKind::ToolResult => {
                        let tool = event
                            .get_metadata("tool")
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown")
                            .to_string();
                        let args = event.get_metadata("args").cloned().unwrap_or(Value::Null);
                        let duration_ms = event
                            .get_metadata("duration_ms")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0);
                        self.tracer
                            .log_tool_call(&tool, &args, &event.content, duration_ms);
                    }
                    _ => {}
                }
                events.emit(event);
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            (result, ()) = futures::future::join(controller_run, forward) => result,
        }
    }

    async fn finish_passed(
        &self,
        run: AttemptRun,
        verdict: GradeVerdict,
        mut records: Vec<AttemptRecord>,
        attempt: usize,
        limit: usize,
        events: &EventSink,
        started: Instant,
    ) -> Result<QueryOutcome> {
        let raw_answer = run.answer.clone();
        let answer = match &self.humanizer {
            Some(humanizer) => humanizer.humanize(&raw_answer).await,
            None => raw_answer.clone(),
        };
        let humanized = (answer != raw_answer).then_some(answer.as_str());

        records.push(AttemptRecord {
            attempt,
            limit,
            answer: raw_answer.clone(),
            verdict,
            tool_calls: run.tool_calls,
            refined_queries: Vec::new(),
            aborted: None,
        });

        let trace_path = self.tracer.end_trace(
            &raw_answer,
            humanized,
            true,
            started.elapsed().as_millis() as u64,
        );
        events.emit(AgentEvent::final_answer(answer.clone(), true));

        Ok(QueryOutcome {
            answer,
            raw_answer,
            passed: true,
            attempts: records,
            trace_path,
        })
    }

    /// All attempts spent. Return the last real answer unhumanized; if no
    /// attempt ever produced one, surface the infrastructure fault.
    fn finish_exhausted(
        &self,
        records: Vec<AttemptRecord>,
        events: &EventSink,
        started: Instant,
        last_error: Option<Error>,
    ) -> Result<QueryOutcome> {
        let last_answer = records
            .iter()
            .rev()
            .find(|r| r.aborted.is_none())
            .map(|r| r.answer.clone());

        let trace_path = self.tracer.end_trace(
            last_answer.as_deref().unwrap_or(""),
            None,
            false,
            started.elapsed().as_millis() as u64,
        );

        match last_answer {
            Some(answer) => {
                tracing::warn!("retry budget exhausted, returning last answer");
                events.emit(AgentEvent::final_answer(answer.clone(), false));
                Ok(QueryOutcome {
                    answer: answer.clone(),
                    raw_answer: answer,
                    passed: false,
                    attempts: records,
                    trace_path,
                })
            }
            None => Err(last_error
                .unwrap_or_else(|| Error::Internal("no attempt produced an answer".to_string()))),
        }
    }

    fn finish_cancelled(
        &self,
        question: &str,
        events: &EventSink,
        started: Instant,
    ) -> Result<QueryOutcome> {
        tracing::info!(question, "query cancelled");
        self.tracer.mark_cancelled();
        self.tracer
            .end_trace("", None, false, started.elapsed().as_millis() as u64);
        events.emit(AgentEvent::new(AgentEventKind::Cancelled, 0, "cancelled"));
        Err(Error::Cancelled)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn tracer(&self) -> &TraceRecorder {
        &self.tracer
    }
}

/// One-line conclusion for a tool call: name, arguments, and the first
/// informative line of its output.
fn summarize_tool_call(record: &ToolCallRecord) -> String {
    let conclusion = record
        .output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("(无输出)");
    format!(
        "{}({}) → {}",
        record.tool,
        record.args,
        crate::tools::truncate_chars(conclusion, 80)
    )
}

/// The structured Markdown document injected for attempts 2+. Prior tool
/// outputs are collapsed to conclusions on purpose.
fn build_history_document(question: &str, records: &[AttemptRecord]) -> String {
    let mut doc = String::from("# 任务重试上下文\n\n## 历史尝试记录\n");

    for record in records {
        doc.push_str(&format!(
            "\n### 尝试 {}（limit={}）\n",
            record.attempt, record.limit
        ));

        if let Some(reason) = &record.aborted {
            doc.push_str(&format!("**结果**: 执行中断（{}）\n", reason));
            continue;
        }

        doc.push_str("**调用的工具**:\n");
        if record.tool_calls.is_empty() {
            doc.push_str("- (没有调用任何工具)\n");
        }
        for call in &record.tool_calls {
            doc.push_str(&format!("- {}\n", summarize_tool_call(call)));
        }

        doc.push_str(&format!(
            "**答案**: {}\n",
            crate::tools::truncate_chars(&record.answer, 300)
        ));
        doc.push_str(&format!(
            "**评分**: 总分={}, depth={}, citation={}",
            record.verdict.score, record.verdict.scores.depth, record.verdict.scores.citation
        ));
        if let Some(reason) = &record.verdict.fail_reason {
            doc.push_str(&format!("；未通过原因: {}", reason));
        }
        doc.push('\n');
        if !record.verdict.suggestion.is_empty() {
            doc.push_str(&format!("**改进建议**: {}\n", record.verdict.suggestion));
        }
        if !record.refined_queries.is_empty() {
            let quoted: Vec<String> = record
                .refined_queries
                .iter()
                .map(|q| format!("\"{}\"", q))
                .collect();
            doc.push_str(&format!("**推荐搜索词**: {}\n", quoted.join(", ")));
        }
    }

    doc.push_str(&format!(
        "\n## 当前任务\n{}\n\n要求：\n\
         - 不要重复调用与之前完全相同参数的工具（会返回相同结果）。\n\
         - 优先使用 search_memory 获取对话原文，提高答案深度。\n\
         - 可参考上面的推荐搜索词。\n",
        question
    ));
    doc
}

/// Compact context summary for the tracer.
fn context_summary(records: &[AttemptRecord]) -> Value {
    serde_json::json!({
        "from_attempts": records.iter().map(|r| r.attempt).collect::<Vec<_>>(),
        "tool_summary": records
            .iter()
            .flat_map(|r| r.tool_calls.iter().map(summarize_tool_call))
            .collect::<Vec<_>>(),
        "grade_summary": records.last().map(|r| serde_json::json!({
            "score": r.verdict.score,
            "depth": r.verdict.scores.depth,
        })),
        "refiner_queries": records.last().map(|r| r.refined_queries.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::controller::ControllerConfig;
    use crate::config::GraderThresholds;
    use crate::llm::testing::ScriptedClient;
    use crate::llm::LlmClient;
    use crate::tools::{Tool, ToolCatalog};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    /// Tool that returns scripted outputs and counts invocations.
    struct CountingTool {
        outputs: Vec<std::result::Result<String, ()>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &'static str {
            "search_memory"
        }

        fn usage(&self) -> &'static str {
            "scripted memory tool"
        }

        async fn invoke(&self, _args: &Value) -> Result<String> {
            let idx = self.calls.fetch_add(1, Ordering::Relaxed);
            match self.outputs.get(idx.min(self.outputs.len() - 1)) {
                Some(Ok(out)) => Ok(out.clone()),
                Some(Err(())) => Err(Error::graph("connection refused")),
                None => Ok("空".to_string()),
            }
        }
    }

    fn verdict_json(depth: u8) -> String {
        let total = 20 + 20 + 15 + depth as i64;
        format!(
            r#"{{"question_type": "relational", "scores": {{"tool_usage": 20, "completeness": 20, "citation": 15, "depth": {}}}, "score": {}, "reason": "r", "suggestion": "用 search_memory 搜索对话"}}"#,
            depth, total
        )
    }

    struct Fixture {
        orchestrator: RetryOrchestrator,
        _dir: tempfile::TempDir,
    }

    /// Wire an orchestrator from scripted reasoning/fast models and one
    /// scripted tool.
    fn fixture(
        reasoning: Vec<Option<String>>,
        fast: Vec<Option<String>>,
        tool_outputs: Vec<std::result::Result<String, ()>>,
        humanize: bool,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default()
            .with_trace_dir(dir.path().to_str().unwrap())
            .with_thresholds(GraderThresholds::default());

        let catalog = Arc::new(ToolCatalog::new().register(Arc::new(CountingTool {
            outputs: tool_outputs,
            calls: AtomicUsize::new(0),
        })));
        let reasoning_llm: Arc<dyn LlmClient> = Arc::new(ScriptedClient::new(reasoning));
        let fast_llm: Arc<dyn LlmClient> = Arc::new(ScriptedClient::new(fast));

        let controller = Controller::new(
            reasoning_llm,
            catalog,
            ControllerConfig::new("reasoning").with_max_steps(6),
        );
        let grader = AnswerGrader::new(fast_llm.clone(), "fast", settings.thresholds);
        let refiner = QueryRefiner::new(fast_llm.clone(), "fast");
        let humanizer = humanize.then(|| Humanizer::new(fast_llm, "fast"));
        let breadth = BreadthBudget::default();
        let tracer = TraceRecorder::new(dir.path());

        Fixture {
            orchestrator: RetryOrchestrator::new(
                settings, controller, grader, refiner, humanizer, breadth, tracer,
            ),
            _dir: dir,
        }
    }

    fn turn(answer: &str) -> Option<String> {
        Some(format!("Thought: 综合判断\nAnswer: {}", answer))
    }

    fn tool_turn() -> Option<String> {
        Some("Action: search_memory\nAction Input: {\"query\": \"对话\"}".to_string())
    }

    #[tokio::test]
    async fn test_first_attempt_pass() {
        let fx = fixture(
            vec![tool_turn(), turn("根据第2章任务1601的对话，答案是……")],
            vec![
                Some(verdict_json(20)), // grade: pass
                Some("no".to_string()), // unknown-conclusion check
                Some("自然化后的答案".to_string()),
            ],
            vec![Ok("### 结果 1\n少女：……".to_string())],
            true,
        );

        let outcome = fx
            .orchestrator
            .answer("问题", &[], &EventSink::disabled(), &CancelToken::new())
            .await
            .unwrap();

        assert!(outcome.passed);
        assert_eq!(outcome.answer, "自然化后的答案");
        assert!(outcome.raw_answer.contains("第2章任务1601"));
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.trace_path.is_some());

        let doc: crate::agent::tracer::TraceDoc = serde_json::from_str(
            &std::fs::read_to_string(outcome.trace_path.unwrap()).unwrap(),
        )
        .unwrap();
        assert!(doc.passed);
        assert_eq!(doc.attempts.len(), 1);
        assert_eq!(doc.humanized_response.as_deref(), Some("自然化后的答案"));
        assert_eq!(doc.attempts[0].tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_then_pass_with_history_injection() {
        let fx = fixture(
            vec![
                // Attempt 1: path only, shallow answer.
                Some("Action: search_memory\nAction Input: {\"query\": \"关系\"}".to_string()),
                turn("他们是伙伴关系。"),
                // Attempt 2: deeper answer.
                tool_turn(),
                turn("根据第2章任务1601的对话\"我们又见面了\"……"),
            ],
            vec![
                Some(verdict_json(5)),                                  // attempt 1: depth floor fails
                Some(r#"["A B 相遇", "A B 对话"]"#.to_string()),          // refiner
                Some(verdict_json(20)),                                 // attempt 2: pass
                Some("no".to_string()),                                 // unknown check
            ],
            vec![Ok("摘要".to_string()), Ok("### 结果 1\n对话原文".to_string())],
            false,
        );

        let outcome = fx
            .orchestrator
            .answer("A和B是什么关系？", &[], &EventSink::disabled(), &CancelToken::new())
            .await
            .unwrap();

        assert!(outcome.passed);
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].refined_queries, vec!["A B 相遇", "A B 对话"]);
        assert!(outcome.attempts[0].verdict.fail_reason.as_deref().unwrap().starts_with("depth=5"));
        // Breadth grew between attempts.
        assert!(outcome.attempts[1].limit > outcome.attempts[0].limit);
    }

    #[tokio::test]
    async fn test_history_document_structure() {
        let record = AttemptRecord {
            attempt: 1,
            limit: 3,
            answer: "他们是伙伴。".to_string(),
            verdict: {
                let mut v = GradeVerdict::default_fail("depth=5 < 15 (硬性门槛)");
                v.score = 60;
                v.suggestion = "引用对话原文".to_string();
                v
            },
            tool_calls: vec![ToolCallRecord {
                tool: "find_connection".to_string(),
                args: serde_json::json!({"entity1": "A", "entity2": "B"}),
                output: "## 关系路径：A ↔ B\n**路径**（1 步）".to_string(),
                raw_output: String::new(),
                duration_ms: 4,
            }],
            refined_queries: vec!["A B 相遇".to_string()],
            aborted: None,
        };

        let doc = build_history_document("A和B是什么关系？", &[record]);

        assert!(doc.contains("### 尝试 1（limit=3）"));
        // Conclusion summary, not the raw multi-line output.
        assert!(doc.contains("find_connection"));
        assert!(doc.contains("## 关系路径：A ↔ B"));
        assert!(!doc.contains("**路径**（1 步）"));
        assert!(doc.contains("**推荐搜索词**: \"A B 相遇\""));
        assert!(doc.contains("## 当前任务"));
        assert!(doc.contains("不要重复调用"));
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_answer_unhumanized() {
        let fx = fixture(
            vec![turn("浅答案一"), turn("浅答案二"), turn("浅答案三")],
            vec![
                Some(verdict_json(5)),
                Some(r#"["q1"]"#.to_string()),
                Some(verdict_json(5)),
                Some(r#"["q2"]"#.to_string()),
                Some(verdict_json(5)),
                Some("这不应该被调用-humanizer".to_string()),
            ],
            vec![],
            true,
        );

        let outcome = fx
            .orchestrator
            .answer("q", &[], &EventSink::disabled(), &CancelToken::new())
            .await
            .unwrap();

        assert!(!outcome.passed);
        assert_eq!(outcome.answer, "浅答案三");
        assert_eq!(outcome.attempts.len(), 3);
        // No humanizer on the exhausted path.
        assert_eq!(outcome.answer, outcome.raw_answer);
    }

    #[tokio::test]
    async fn test_store_abort_mid_loop_recovers_next_attempt() {
        let fx = fixture(
            vec![
                tool_turn(),                 // attempt 1: tool fails with store error
                tool_turn(),                 // attempt 2: tool works
                turn("根据对话……"),
            ],
            vec![
                // The aborted attempt skips grading and refining entirely,
                // so the fast script starts at attempt 2's verdict.
                Some(verdict_json(20)),
                Some("no".to_string()),
            ],
            vec![Err(()), Ok("### 结果 1".to_string())],
            false,
        );

        let outcome = fx
            .orchestrator
            .answer("q", &[], &EventSink::disabled(), &CancelToken::new())
            .await
            .unwrap();

        assert!(outcome.passed);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.attempts[0].aborted.is_some());
        assert!(outcome.attempts[0].verdict.fail_reason.as_deref().unwrap().contains("graph store"));
    }

    #[tokio::test]
    async fn test_all_attempts_aborted_propagates_fault() {
        let fx = fixture(
            vec![tool_turn(), tool_turn(), tool_turn()],
            vec![],
            vec![Err(()), Err(()), Err(())],
            false,
        );

        let err = fx
            .orchestrator
            .answer("q", &[], &EventSink::disabled(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_cancellation_is_terminal_and_traced() {
        let fx = fixture(vec![turn("答案")], vec![], vec![], false);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = fx
            .orchestrator
            .answer("q", &[], &EventSink::disabled(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_events_cover_lifecycle() {
        let fx = fixture(
            vec![tool_turn(), turn("根据对话……")],
            vec![Some(verdict_json(20)), Some("no".to_string())],
            vec![Ok("### 结果 1".to_string())],
            false,
        );

        let (sink, mut rx) = EventSink::channel();
        fx.orchestrator
            .answer("q", &[], &sink, &CancelToken::new())
            .await
            .unwrap();
        drop(sink);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(kinds[0], AgentEventKind::AttemptStart);
        assert!(kinds.contains(&AgentEventKind::ReasoningDelta));
        assert!(kinds.contains(&AgentEventKind::ToolResult));
        assert!(kinds.contains(&AgentEventKind::Grading));
        assert_eq!(*kinds.last().unwrap(), AgentEventKind::Final);
        // Observations precede the grading verdict.
        let tool_idx = kinds.iter().position(|k| *k == AgentEventKind::ToolResult).unwrap();
        let grade_idx = kinds.iter().position(|k| *k == AgentEventKind::Grading).unwrap();
        assert!(tool_idx < grade_idx);
    }

    #[tokio::test]
    async fn test_summarize_tool_call_first_line_only() {
        let record = ToolCallRecord {
            tool: "lookup_knowledge".to_string(),
            args: serde_json::json!({"entity": "A"}),
            output: "\n## 实体信息：A\n- [MEMBER_OF] → 花羽会".to_string(),
            raw_output: String::new(),
            duration_ms: 2,
        };
        let summary = summarize_tool_call(&record);
        assert!(summary.contains("lookup_knowledge"));
        assert!(summary.contains("## 实体信息：A"));
        assert!(!summary.contains("MEMBER_OF"));
    }
}
