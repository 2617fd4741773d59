//! `lookup_knowledge` — an entity's direct relationships and facts.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::alias::AliasResolver;
use crate::error::Result;
use crate::graph::GraphQuery;

use super::{optional_str_arg, require_str_arg, Tool};

/// Relation types commonly present in the graph, listed when the LLM
/// supplies a malformed filter.
const KNOWN_RELATIONS: &[&str] = &[
    "FRIEND_OF",
    "ENEMY_OF",
    "PARTNER_OF",
    "FAMILY_OF",
    "MEMBER_OF",
    "LEADER_OF",
    "PARTICIPATED_IN",
    "EXPERIENCES",
    "MENTIONED_IN",
    "INTERACTS_WITH",
];

const ADJACENCY_LIMIT: usize = 10;

pub struct LookupKnowledge {
    graph: Arc<dyn GraphQuery>,
    resolver: Arc<AliasResolver>,
}

impl LookupKnowledge {
    pub fn new(graph: Arc<dyn GraphQuery>, resolver: Arc<AliasResolver>) -> Self {
        Self { graph, resolver }
    }

    /// Look up an entity's adjacent edges, optionally filtered by relation
    /// type.
    pub async fn lookup(&self, entity: &str, relation: Option<&str>) -> Result<String> {
        if let Some(rel) = relation {
            if !crate::graph::is_valid_relation_ident(rel) {
                return Ok(format!(
                    "参数错误：关系类型 \"{}\" 不是有效的标识符。常见的关系类型：{}。",
                    rel,
                    KNOWN_RELATIONS.join("、")
                ));
            }
        }

        let canonical = self.resolver.resolve(entity).await;
        tracing::info!(entity, canonical = %canonical, ?relation, "lookup_knowledge");

        let rows = self
            .graph
            .relations_of(&canonical, relation, ADJACENCY_LIMIT)
            .await?;

        if rows.is_empty() {
            return Ok(format!(
                "在知识图谱中未找到 '{}' 的信息。建议使用 search_memory 搜索包含此实体的故事内容。",
                entity
            ));
        }

        let mut lines = vec![format!("## 实体信息：{}", canonical)];
        if let Some(rel) = relation {
            lines.push(format!("(已过滤关系类型：{})", rel));
        }
        lines.push(String::new());

        for row in &rows {
            let mut line = format!(
                "- [{}] → {} ({})",
                row.relation, row.target, row.target_type
            );
            if let Some(chapter) = row.chapter {
                line.push_str(&format!(" [第{}章", chapter));
                if let Some(task) = &row.task_id {
                    line.push_str(&format!(", 任务{}", task));
                }
                line.push(']');
            }
            if let Some(desc) = &row.description {
                line.push_str(&format!(": {}", super::truncate_chars(desc, 100)));
            }
            lines.push(line);
        }

        lines.push(String::new());
        lines.push(format!("共找到 {} 条关系。", rows.len()));
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl Tool for LookupKnowledge {
    fn name(&self) -> &'static str {
        "lookup_knowledge"
    }

    fn usage(&self) -> &'static str {
        "查询知识图谱获取实体（角色、组织、地点）的基本信息和直接关系。\n\
         适用：\"X是谁\"、\"X的称号\"、\"X的朋友有谁\"。不返回剧情原文。\n\
         参数: {\"entity\": \"实体名称（支持别名）\", \"relation\": \"可选关系类型过滤，如 FRIEND_OF、MEMBER_OF\"}"
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let entity = match require_str_arg(args, "entity") {
            Ok(e) => e,
            Err(msg) => return Ok(msg),
        };
        self.lookup(entity, optional_str_arg(args, "relation")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::FakeGraph;
    use crate::model::RelationRow;
    use std::collections::HashMap;

    fn row(relation: &str, target: &str) -> RelationRow {
        RelationRow {
            relation: relation.to_string(),
            target: target.to_string(),
            target_type: "Organization".to_string(),
            description: Some("纳塔的冒险家组织".to_string()),
            chapter: Some(1),
            task_id: Some("1103".to_string()),
        }
    }

    fn tool_with(relations: Vec<RelationRow>) -> LookupKnowledge {
        let mut graph = FakeGraph::new();
        graph.relations.insert("恰斯卡".to_string(), relations);
        let graph = Arc::new(graph);
        let resolver = Arc::new(AliasResolver::new(graph.clone(), HashMap::new()));
        LookupKnowledge::new(graph, resolver)
    }

    #[tokio::test]
    async fn test_reports_relations_with_citations() {
        let tool = tool_with(vec![row("MEMBER_OF", "花羽会")]);
        let report = tool.lookup("恰斯卡", None).await.unwrap();
        assert!(report.contains("## 实体信息：恰斯卡"));
        assert!(report.contains("[MEMBER_OF] → 花羽会 (Organization)"));
        assert!(report.contains("[第1章, 任务1103]"));
        assert!(report.contains("共找到 1 条关系。"));
    }

    #[tokio::test]
    async fn test_relation_filter_applies() {
        let tool = tool_with(vec![row("MEMBER_OF", "花羽会"), row("FRIEND_OF", "基尼奇")]);
        let report = tool.lookup("恰斯卡", Some("FRIEND_OF")).await.unwrap();
        assert!(report.contains("基尼奇"));
        assert!(!report.contains("花羽会"));
    }

    #[tokio::test]
    async fn test_empty_suggests_memory_tool() {
        let tool = tool_with(vec![]);
        let report = tool.lookup("无名氏", None).await.unwrap();
        assert!(report.contains("未找到"));
        assert!(report.contains("search_memory"));
    }

    #[tokio::test]
    async fn test_malformed_relation_names_option_set() {
        let tool = tool_with(vec![]);
        let report = tool.lookup("恰斯卡", Some("FRIEND OF")).await.unwrap();
        assert!(report.contains("参数错误"));
        assert!(report.contains("FRIEND_OF"));
    }

    #[tokio::test]
    async fn test_invoke_requires_entity() {
        let tool = tool_with(vec![]);
        let report = tool.invoke(&serde_json::json!({})).await.unwrap();
        assert!(report.contains("entity"));
    }

    #[tokio::test]
    async fn test_store_fault_propagates() {
        let graph = FakeGraph::new();
        graph
            .unavailable
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let graph = Arc::new(graph);
        let resolver = Arc::new(AliasResolver::new(graph.clone(), HashMap::new()));
        let tool = LookupKnowledge::new(graph, resolver);
        let err = tool.lookup("恰斯卡", None).await.unwrap_err();
        assert!(err.is_store_unavailable());
    }
}
