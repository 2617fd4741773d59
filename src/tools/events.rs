//! `get_character_events` — major plot events for a character.
//!
//! Bridges the gap between abstract questions ("how did X return?") and
//! concrete narrative chunks scattered across many tasks: the graph holds
//! coarse turning points ("献出身体", "化作月光") that seed precise memory
//! searches.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::alias::AliasResolver;
use crate::error::Result;
use crate::graph::GraphQuery;
use crate::model::EventType;

use super::{optional_str_arg, require_str_arg, truncate_chars, Tool};

const EVENT_LIMIT: usize = 20;
const EVIDENCE_CHAR_BUDGET: usize = 100;

pub struct GetCharacterEvents {
    graph: Arc<dyn GraphQuery>,
    resolver: Arc<AliasResolver>,
}

impl GetCharacterEvents {
    pub fn new(graph: Arc<dyn GraphQuery>, resolver: Arc<AliasResolver>) -> Self {
        Self { graph, resolver }
    }

    pub async fn events(&self, entity: &str, event_type: Option<&str>) -> Result<String> {
        // Taxonomy check happens before any store round-trip.
        let parsed_type = match event_type {
            Some(tag) => match tag.parse::<EventType>() {
                Ok(t) => Some(t),
                Err(_) => {
                    return Ok(format!(
                        "无效的事件类型 '{}'。\n\n有效类型：\n{}\n\n请使用有效的事件类型重试。",
                        tag,
                        EventType::ALL
                            .iter()
                            .map(|t| format!("- {}", t.describe()))
                            .collect::<Vec<_>>()
                            .join("\n")
                    ));
                }
            },
            None => None,
        };

        let canonical = self.resolver.resolve(entity).await;
        tracing::info!(entity = %canonical, event_type = ?parsed_type, "get_character_events");

        let events = self
            .graph
            .major_events_of(&canonical, parsed_type, EVENT_LIMIT)
            .await?;

        if events.is_empty() {
            let mut msg = format!("在知识图谱中未找到 '{}' 的重大事件", entity);
            if let Some(t) = parsed_type {
                msg.push_str(&format!("（类型：{}）", t.describe()));
            }
            msg.push_str("。\n\n建议：\n");
            msg.push_str(&format!(
                "1. 使用 track_journey(entity=\"{}\") 查看关系时间线\n",
                entity
            ));
            msg.push_str(&format!("2. 使用 search_memory(query=\"{}", entity));
            if let Some(t) = parsed_type {
                msg.push(' ');
                msg.push_str(t.tag());
            }
            msg.push_str("\") 搜索相关对话内容");
            return Ok(msg);
        }

        let mut lines = vec![format!("## 重大事件：{}", canonical)];
        if let Some(t) = parsed_type {
            lines.push(format!("(已过滤事件类型：{})", t.describe()));
        }
        lines.push(String::new());

        let mut current_chapter: Option<i64> = None;
        for event in &events {
            if event.chapter != current_chapter {
                if current_chapter.is_some() {
                    lines.push(String::new());
                }
                match event.chapter {
                    Some(ch) => lines.push(format!("### 第 {} 章", ch)),
                    None => lines.push("### 未知章节".to_string()),
                }
                current_chapter = event.chapter;
            }

            lines.push(format!(
                "\n**{}** [{}] ({})",
                event.name,
                event.event_type.label(),
                event.role.label()
            ));
            if let Some(summary) = &event.summary {
                lines.push(format!("  - 摘要: {}", summary));
            }
            if let Some(outcome) = &event.outcome {
                lines.push(format!("  - 结果: {}", outcome));
            }
            if let Some(evidence) = &event.evidence {
                lines.push(format!(
                    "  - 证据: \"{}\"",
                    truncate_chars(evidence, EVIDENCE_CHAR_BUDGET)
                ));
            }
        }

        lines.push(String::new());
        lines.push(format!("共找到 {} 个重大事件。", events.len()));
        lines.push(String::new());
        lines.push("**提示**: 如需详细剧情内容，请使用 search_memory 搜索特定事件。".to_string());
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl Tool for GetCharacterEvents {
    fn name(&self) -> &'static str {
        "get_character_events"
    }

    fn usage(&self) -> &'static str {
        "获取角色的重大事件和转折点（按章节排序），用于回答抽象的历程类问题。\n\
         适用：\"X经历了什么\"、\"X是如何重回世界的\"。\n\
         参数: {\"entity\": \"角色名称（支持别名）\", \"event_type\": \"可选过滤: sacrifice/transformation/acquisition/loss/encounter/conflict/revelation/milestone\"}"
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let entity = match require_str_arg(args, "entity") {
            Ok(e) => e,
            Err(msg) => return Ok(msg),
        };
        self.events(entity, optional_str_arg(args, "event_type"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::FakeGraph;
    use crate::model::{EventRole, MajorEventRecord};
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    fn record(name: &str, event_type: EventType, chapter: i64) -> MajorEventRecord {
        MajorEventRecord {
            name: name.to_string(),
            event_type,
            chapter: Some(chapter),
            task_id: Some("1601".to_string()),
            summary: Some("为了守护世界献出自己".to_string()),
            evidence: Some("少女：就让月光替我留在这里吧。".to_string()),
            role: EventRole::Subject,
            outcome: Some("化作月光".to_string()),
        }
    }

    fn tool_with(events: Vec<MajorEventRecord>) -> (GetCharacterEvents, Arc<FakeGraph>) {
        let mut graph = FakeGraph::new();
        graph.events.insert("少女".to_string(), events);
        let graph = Arc::new(graph);
        let resolver = Arc::new(AliasResolver::new(graph.clone(), HashMap::new()));
        (GetCharacterEvents::new(graph.clone(), resolver), graph)
    }

    #[tokio::test]
    async fn test_renders_events_sorted_by_chapter() {
        let (tool, _) = tool_with(vec![
            record("权能转交", EventType::Milestone, 3),
            record("献出身体", EventType::Sacrifice, 1),
        ]);
        let report = tool.events("少女", None).await.unwrap();
        let sacrifice = report.find("献出身体").unwrap();
        let milestone = report.find("权能转交").unwrap();
        assert!(sacrifice < milestone);
        assert!(report.contains("[牺牲] (主动)"));
        assert!(report.contains("摘要:"));
        assert!(report.contains("结果: 化作月光"));
    }

    #[tokio::test]
    async fn test_type_filter() {
        let (tool, _) = tool_with(vec![
            record("献出身体", EventType::Sacrifice, 1),
            record("权能转交", EventType::Milestone, 3),
        ]);
        let report = tool.events("少女", Some("sacrifice")).await.unwrap();
        assert!(report.contains("献出身体"));
        assert!(!report.contains("权能转交"));
    }

    #[tokio::test]
    async fn test_unknown_type_lists_taxonomy_without_store_call() {
        let (tool, graph) = tool_with(vec![record("献出身体", EventType::Sacrifice, 1)]);
        // Make the store unavailable: the taxonomy error must still render.
        graph.unavailable.store(true, Ordering::Relaxed);
        let report = tool.events("少女", Some("betrayal")).await.unwrap();
        assert!(report.contains("无效的事件类型 'betrayal'"));
        for t in EventType::ALL {
            assert!(report.contains(t.tag()));
        }
    }

    #[tokio::test]
    async fn test_empty_suggests_journey_then_memory() {
        let (tool, _) = tool_with(vec![]);
        let report = tool.events("少女", None).await.unwrap();
        assert!(report.contains("track_journey"));
        assert!(report.contains("search_memory"));
    }

    #[tokio::test]
    async fn test_evidence_quote_truncated_to_100() {
        let mut r = record("献出身体", EventType::Sacrifice, 1);
        r.evidence = Some("证".repeat(300));
        let (tool, _) = tool_with(vec![r]);
        let report = tool.events("少女", None).await.unwrap();
        let line = report.lines().find(|l| l.contains("证据:")).unwrap();
        assert!(line.chars().count() < 130);
    }
}
