//! `search_memory` — semantic search over story chunks.
//!
//! The only tool that returns actual story text. Three mechanisms keep its
//! results useful to the reasoning loop:
//!
//! 1. Dedup by `(task_id, event_order)` — one story event may be split
//!    across adjacent chunks, and near-identical chunks burn context budget
//!    that should go to diverse evidence.
//! 2. An expanding fetch loop: the store is asked for more candidates until
//!    enough *distinct* events survive dedup or a cap is hit.
//! 3. A character-filter fallback: the `characters` payload field lists a
//!    chunk's speakers, not everyone mentioned, so a filter can miss chunks
//!    *about* a character; re-embedding the query with the canonical name
//!    appended recovers them.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::alias::AliasResolver;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::model::ChunkHit;
use crate::vector::{CharacterFilter, VectorSearch};

use super::{optional_str_arg, require_str_arg, Tool};

/// Hard cap on retained results regardless of the requested limit.
const MAX_TARGET: usize = 20;

/// Maximum fetch is this multiple of the target.
const FETCH_MULTIPLIER: usize = 8;

/// Result ordering for `search_memory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    /// Best semantic matches first
    #[default]
    Relevance,
    /// Chronological: by (chapter, event ordinal)
    Time,
}

impl SortBy {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "relevance" => Some(Self::Relevance),
            "time" => Some(Self::Time),
            _ => None,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Self::Relevance => "relevance",
            Self::Time => "time",
        }
    }
}

/// Per-attempt breadth budget, shared between the retry loop (which raises
/// it each attempt) and the tool (which reads it per call).
#[derive(Clone)]
pub struct BreadthBudget(Arc<AtomicUsize>);

impl BreadthBudget {
    pub fn new(limit: usize) -> Self {
        Self(Arc::new(AtomicUsize::new(limit.max(1))))
    }

    pub fn set(&self, limit: usize) {
        self.0.store(limit.max(1), Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for BreadthBudget {
    fn default() -> Self {
        Self::new(5)
    }
}

pub struct SearchMemory {
    vector: Arc<dyn VectorSearch>,
    embedder: Arc<dyn Embedder>,
    resolver: Arc<AliasResolver>,
    breadth: BreadthBudget,
}

impl SearchMemory {
    pub fn new(
        vector: Arc<dyn VectorSearch>,
        embedder: Arc<dyn Embedder>,
        resolver: Arc<AliasResolver>,
        breadth: BreadthBudget,
    ) -> Self {
        Self {
            vector,
            embedder,
            resolver,
            breadth,
        }
    }

    /// Search story chunks.
    ///
    /// `limit` is the number of distinct events to retain; zero is rejected
    /// outright. The LLM-facing wrapper always passes the current breadth
    /// budget instead.
    pub async fn search(
        &self,
        query: &str,
        characters: Option<&str>,
        sort_by: SortBy,
        limit: usize,
    ) -> Result<String> {
        if limit == 0 {
            return Err(Error::InvalidArgument(
                "search_memory limit must be at least 1".to_string(),
            ));
        }

        tracing::info!(
            query = %crate::tools::truncate_chars(query, 50),
            ?characters,
            sort_by = sort_by.tag(),
            limit,
            "search_memory"
        );

        let target = limit.min(MAX_TARGET);
        let max_fetch = target * FETCH_MULTIPLIER;

        // Filter construction with alias expansion: the store keeps surface
        // names, so a single canonical is not enough.
        let mut resolved: Option<String> = None;
        let mut expanded: Vec<String> = Vec::new();
        let filter = match characters {
            Some(name) => {
                expanded = self.resolver.expand(name).await;
                resolved = Some(self.resolver.resolve(name).await);
                if expanded.len() > 1 {
                    CharacterFilter::from_names(expanded.clone())
                } else {
                    resolved.clone().map(CharacterFilter::Exact)
                }
            }
            None => None,
        };

        let query_vector = self.embedder.embed(query).await?;
        let mut unique = self
            .expanding_search(query_vector, filter.as_ref(), target, max_fetch)
            .await?;

        // Character-filter fallback: zero hits through the filter path,
        // retry unfiltered with the name folded into the query semantics.
        let mut fallback_used = false;
        if unique.is_empty() && filter.is_some() {
            let name = resolved.clone().unwrap_or_default();
            tracing::info!(character = %name, "character filter empty, semantic fallback");
            let augmented = format!("{} {}", name, query);
            let augmented_vector = self.embedder.embed(&augmented).await?;
            unique = self
                .expanding_search(augmented_vector, None, target, max_fetch)
                .await?;
            fallback_used = true;
        }

        unique.truncate(target);

        if sort_by == SortBy::Time {
            unique.sort_by_key(|hit| (hit.chapter, hit.event_ordinal));
        }

        Ok(render_report(
            query,
            characters,
            resolved.as_deref(),
            &expanded,
            fallback_used,
            sort_by,
            &unique,
        ))
    }

    async fn expanding_search(
        &self,
        vector: Vec<f32>,
        filter: Option<&CharacterFilter>,
        target: usize,
        max_fetch: usize,
    ) -> Result<Vec<ChunkHit>> {
        let mut fetch = target;
        let mut unique = Vec::new();
        while fetch <= max_fetch {
            let raw = self.vector.search(vector.clone(), filter, fetch).await?;
            let raw_count = raw.len();
            unique = deduplicate(raw);
            tracing::debug!(fetch, raw = raw_count, unique = unique.len(), "vector fetch");
            if unique.len() >= target {
                break;
            }
            fetch *= 2;
        }
        Ok(unique)
    }
}

/// Keep the highest-scoring chunk per `(task_id, event_order)` key. Input
/// arrives score-descending from the store, so first occurrence wins.
fn deduplicate(hits: Vec<ChunkHit>) -> Vec<ChunkHit> {
    let mut seen: HashSet<(Option<String>, Option<i64>)> = HashSet::new();
    hits.into_iter()
        .filter(|hit| {
            let key = (hit.task_id.clone(), hit.event_ordinal);
            seen.insert(key)
        })
        .collect()
}

fn render_report(
    query: &str,
    characters: Option<&str>,
    resolved: Option<&str>,
    expanded: &[String],
    fallback_used: bool,
    sort_by: SortBy,
    results: &[ChunkHit],
) -> String {
    if results.is_empty() {
        let mut msg = format!("未找到与查询 '{}' 相关的故事内容", query);
        if let Some(name) = characters {
            match resolved {
                Some(canonical) if canonical != name => {
                    msg.push_str(&format!("（已过滤角色：{} → {}）", name, canonical));
                }
                _ => msg.push_str(&format!("（已过滤角色：{}）", name)),
            }
        }
        msg.push_str("\n\n建议：\n");
        msg.push_str("- 尝试更宽泛或不同的查询词。\n");
        msg.push_str("- 移除角色过滤器以搜索所有内容。\n");
        msg.push_str("- 使用 lookup_knowledge 验证角色名是否正确。");
        return msg;
    }

    let mut lines = vec![format!("## 故事内容：\"{}\"", query)];
    if let Some(name) = characters {
        if fallback_used {
            lines.push(format!(
                "（角色过滤无结果，已改用语义搜索：{}）",
                resolved.unwrap_or(name)
            ));
        } else if expanded.len() > 1 {
            lines.push(format!(
                "（已过滤角色：{} → [{}]）",
                name,
                expanded.join(" | ")
            ));
        } else if let Some(canonical) = resolved.filter(|c| *c != name) {
            lines.push(format!("（已过滤角色：{} → {}）", name, canonical));
        } else {
            lines.push(format!("（已过滤角色：{}）", name));
        }
    }
    lines.push(format!("（排序方式：{}）", sort_by.tag()));
    lines.push(String::new());

    for (i, hit) in results.iter().enumerate() {
        lines.push(format!("### 结果 {}", i + 1));
        lines.push(format!(
            "**来源**: 第 {} 章，任务: {}，事件 #{}",
            hit.chapter.map_or("?".to_string(), |c| c.to_string()),
            hit.task_id.as_deref().unwrap_or("未知"),
            hit.event_ordinal.unwrap_or(0)
        ));
        if sort_by == SortBy::Relevance {
            lines.push(format!("**相关度**: {:.3}", hit.score));
        }
        lines.push(String::new());
        lines.push(hit.text.clone());
        lines.push(String::new());
        lines.push("---".to_string());
        lines.push(String::new());
    }

    lines.join("\n")
}

#[async_trait]
impl Tool for SearchMemory {
    fn name(&self) -> &'static str {
        "search_memory"
    }

    fn usage(&self) -> &'static str {
        "搜索故事原文，获取具体剧情细节、对话或事件描述。这是唯一返回故事原文的工具。\n\
         适用：\"X说了什么\"、\"描述某场战斗\"、引用对话作为证据。\n\
         参数: {\"query\": \"搜索关键词（支持中文）\", \"characters\": \"可选角色名过滤\", \"sort_by\": \"relevance（默认）或 time（按时间顺序）\"}\n\
         注意：返回数量由系统根据尝试轮次控制。"
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let query = match require_str_arg(args, "query") {
            Ok(q) => q,
            Err(msg) => return Ok(msg),
        };
        let sort_by = match optional_str_arg(args, "sort_by") {
            None => SortBy::Relevance,
            Some(tag) => match SortBy::parse(tag) {
                Some(s) => s,
                None => {
                    return Ok(format!(
                        "参数错误：sort_by 必须是 \"relevance\" 或 \"time\"，收到 \"{}\"。",
                        tag
                    ));
                }
            },
        };
        self.search(
            query,
            optional_str_arg(args, "characters"),
            sort_by,
            self.breadth.get(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::HashEmbedder;
    use crate::graph::testing::FakeGraph;
    use crate::vector::testing::FakeVector;
    use std::collections::HashMap;

    fn hit(id: &str, score: f32, task: &str, event: i64, chapter: i64, speaker: &str) -> ChunkHit {
        ChunkHit {
            id: id.to_string(),
            score,
            text: format!("{}：……", speaker),
            chapter: Some(chapter),
            task_id: Some(task.to_string()),
            event_ordinal: Some(event),
            characters: vec![speaker.to_string()],
        }
    }

    fn tool_with(
        hits: Vec<ChunkHit>,
        aliases: &[(&str, &str)],
    ) -> (SearchMemory, Arc<FakeVector>) {
        let graph = Arc::new(FakeGraph::new());
        let resolver = Arc::new(AliasResolver::new(
            graph,
            aliases
                .iter()
                .map(|(a, c)| (a.to_string(), c.to_string()))
                .collect::<HashMap<_, _>>(),
        ));
        let vector = Arc::new(FakeVector::new(hits));
        let tool = SearchMemory::new(
            vector.clone(),
            Arc::new(HashEmbedder::new(8)),
            resolver,
            BreadthBudget::new(5),
        );
        (tool, vector)
    }

    #[tokio::test]
    async fn test_dedup_keeps_highest_scoring_chunk_per_event() {
        let (tool, _) = tool_with(
            vec![
                hit("a", 0.9, "1601", 14, 2, "少女"),
                hit("b", 0.8, "1601", 14, 2, "少女"), // same event, lower score
                hit("c", 0.7, "1601", 15, 2, "少女"),
            ],
            &[],
        );
        let report = tool.search("月光", None, SortBy::Relevance, 5).await.unwrap();
        assert!(report.contains("### 结果 1"));
        assert!(report.contains("### 结果 2"));
        assert!(!report.contains("### 结果 3"));
        assert!(report.contains("事件 #14"));
        assert!(report.contains("事件 #15"));
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let (tool, _) = tool_with(vec![], &[]);
        let err = tool
            .search("月光", None, SortBy::Relevance, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_character_fallback_when_filter_empty() {
        // All chunks list 旅行者 as speaker; filtering by 少女 finds nothing
        // until the fallback drops the filter.
        let (tool, vector) = tool_with(vec![hit("a", 0.9, "1601", 14, 2, "旅行者")], &[]);
        let report = tool
            .search("月光", Some("少女"), SortBy::Relevance, 5)
            .await
            .unwrap();
        assert!(report.contains("角色过滤无结果，已改用语义搜索"));
        assert!(report.contains("### 结果 1"));
        // Filter path exhausted its expanding loop before the fallback ran.
        assert!(vector.calls.load(std::sync::atomic::Ordering::Relaxed) > 1);
    }

    #[tokio::test]
    async fn test_alias_expansion_builds_match_any_filter() {
        let (tool, _) = tool_with(
            vec![hit("a", 0.9, "1601", 14, 2, "少女")],
            &[("少女", "哥伦比娅"), ("露珠", "哥伦比娅")],
        );
        let report = tool
            .search("月光", Some("少女"), SortBy::Relevance, 5)
            .await
            .unwrap();
        // The expansion header lists the whole family and the speaker-named
        // chunk is matched through it.
        assert!(report.contains("已过滤角色：少女 →"));
        assert!(report.contains("### 结果 1"));
    }

    #[tokio::test]
    async fn test_time_sort_reorders_final_set() {
        let (tool, _) = tool_with(
            vec![
                hit("a", 0.9, "1603", 30, 3, "少女"),
                hit("b", 0.8, "1601", 10, 1, "少女"),
            ],
            &[],
        );
        let report = tool.search("月光", None, SortBy::Time, 5).await.unwrap();
        let first = report.find("第 1 章").unwrap();
        let second = report.find("第 3 章").unwrap();
        assert!(first < second);
        // Relevance scores are not shown in time mode.
        assert!(!report.contains("相关度"));
    }

    #[tokio::test]
    async fn test_empty_result_suggests_alternatives() {
        let (tool, _) = tool_with(vec![], &[]);
        let report = tool
            .search("不存在的剧情", None, SortBy::Relevance, 5)
            .await
            .unwrap();
        assert!(report.contains("未找到"));
        assert!(report.contains("lookup_knowledge"));
    }

    #[tokio::test]
    async fn test_store_fault_propagates() {
        let (tool, vector) = tool_with(vec![], &[]);
        vector
            .unavailable
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let err = tool
            .search("月光", None, SortBy::Relevance, 5)
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_invoke_uses_breadth_budget_and_validates_sort() {
        let (tool, _) = tool_with(vec![hit("a", 0.9, "1601", 14, 2, "少女")], &[]);
        tool.breadth.set(3);
        let report = tool
            .invoke(&serde_json::json!({"query": "月光", "sort_by": "newest"}))
            .await
            .unwrap();
        assert!(report.contains("参数错误"));
        let report = tool
            .invoke(&serde_json::json!({"query": "月光"}))
            .await
            .unwrap();
        assert!(report.contains("### 结果 1"));
    }

    proptest::proptest! {
        #[test]
        fn prop_dedup_has_unique_keys(
            events in proptest::collection::vec((0i64..6, 0i64..6), 0..40)
        ) {
            let hits: Vec<ChunkHit> = events
                .iter()
                .enumerate()
                .map(|(i, (task, event))| ChunkHit {
                    id: i.to_string(),
                    score: 1.0 - i as f32 * 0.01,
                    text: String::new(),
                    chapter: Some(1),
                    task_id: Some(task.to_string()),
                    event_ordinal: Some(*event),
                    characters: vec![],
                })
                .collect();
            let deduped = deduplicate(hits);
            let mut keys = HashSet::new();
            for hit in &deduped {
                proptest::prop_assert!(keys.insert((hit.task_id.clone(), hit.event_ordinal)));
            }
        }
    }
}
