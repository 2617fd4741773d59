//! `track_journey` — chapter-ordered relationship timeline for an entity.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::alias::AliasResolver;
use crate::error::Result;
use crate::graph::GraphQuery;

use super::{optional_str_arg, require_str_arg, truncate_chars, Tool};

const EVIDENCE_CHAR_BUDGET: usize = 150;

pub struct TrackJourney {
    graph: Arc<dyn GraphQuery>,
    resolver: Arc<AliasResolver>,
}

impl TrackJourney {
    pub fn new(graph: Arc<dyn GraphQuery>, resolver: Arc<AliasResolver>) -> Self {
        Self { graph, resolver }
    }

    pub async fn track(&self, entity: &str, target: Option<&str>) -> Result<String> {
        let canonical = self.resolver.resolve(entity).await;
        let canonical_target = match target {
            Some(t) => Some(self.resolver.resolve(t).await),
            None => None,
        };
        tracing::info!(entity = %canonical, target = ?canonical_target, "track_journey");

        let history = self
            .graph
            .history_of(&canonical, canonical_target.as_deref())
            .await?;

        if history.is_empty() {
            let mut msg = format!("在知识图谱中未找到 '{}' 的时间历程", entity);
            if let Some(t) = target {
                msg.push_str(&format!("（与 '{}' 的关系）", t));
            }
            msg.push_str("。\n\n建议：\n- 使用 search_memory(query=\"");
            msg.push_str(entity);
            if let Some(t) = target {
                msg.push(' ');
                msg.push_str(t);
            }
            msg.push_str("\", sort_by=\"time\") 按时间顺序搜索故事内容。");
            return Ok(msg);
        }

        let mut lines = vec![format!("## 时间线：{}", canonical)];
        if let Some(t) = &canonical_target {
            lines.push(format!("（与 {} 的关系）", t));
        }
        lines.push(String::new());

        let mut current_chapter: Option<i64> = None;
        for edge in &history {
            if edge.chapter != current_chapter {
                if current_chapter.is_some() {
                    lines.push(String::new());
                }
                match edge.chapter {
                    Some(ch) => lines.push(format!("### 第 {} 章", ch)),
                    None => lines.push("### 未知章节".to_string()),
                }
                current_chapter = edge.chapter;
            }

            let mut line = format!("- [{}] → {}", edge.relation, edge.target);
            if let Some(task) = &edge.task_id {
                line.push_str(&format!(" (任务: {})", task));
            }
            lines.push(line);

            if let Some(evidence) = &edge.evidence {
                lines.push(format!(
                    "  > 证据: {}",
                    truncate_chars(evidence, EVIDENCE_CHAR_BUDGET)
                ));
            }
        }

        lines.push(String::new());
        lines.push(format!("共找到 {} 条关系事件。", history.len()));
        lines.push(String::new());
        lines.push("**提示**: 如需详细剧情内容，请使用 search_memory 搜索此时间线中的特定事件。".to_string());
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl Tool for TrackJourney {
    fn name(&self) -> &'static str {
        "track_journey"
    }

    fn usage(&self) -> &'static str {
        "追踪角色的历程或关系状态随章节的变化时间线。\n\
         适用：\"X的经历\"、\"X和Y的关系如何发展\"。返回状态变化，不含详细剧情。\n\
         参数: {\"entity\": \"要追踪的角色\", \"target\": \"可选，追踪与此角色的关系\"}"
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let entity = match require_str_arg(args, "entity") {
            Ok(e) => e,
            Err(msg) => return Ok(msg),
        };
        self.track(entity, optional_str_arg(args, "target")).await
    }
}
