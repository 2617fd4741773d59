//! `find_connection` — shortest relationship path between two entities.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::alias::AliasResolver;
use crate::error::Result;
use crate::graph::GraphQuery;

use super::{require_str_arg, Tool};

pub struct FindConnection {
    graph: Arc<dyn GraphQuery>,
    resolver: Arc<AliasResolver>,
}

impl FindConnection {
    pub fn new(graph: Arc<dyn GraphQuery>, resolver: Arc<AliasResolver>) -> Self {
        Self { graph, resolver }
    }

    pub async fn find(&self, entity1: &str, entity2: &str) -> Result<String> {
        let canonical1 = self.resolver.resolve(entity1).await;
        let canonical2 = self.resolver.resolve(entity2).await;
        tracing::info!(from = %canonical1, to = %canonical2, "find_connection");

        let Some(path) = self.graph.shortest_path(&canonical1, &canonical2).await? else {
            return Ok(format!(
                "在知识图谱中未找到 '{}' 和 '{}' 之间的直接连接（4步以内）。\n\n\
                 建议：\n\
                 - 使用 lookup_knowledge 分别查看每个实体的关系。\n\
                 - 使用 search_memory 搜索两者同时出现的故事内容。",
                entity1, entity2
            ));
        };

        let mut lines = vec![
            format!("## 关系路径：{} ↔ {}", canonical1, canonical2),
            String::new(),
            format!("**路径**（{} 步）：", path.length),
            path.render_chain(),
            String::new(),
            "**路径中的节点：**".to_string(),
        ];
        for node in &path.nodes {
            lines.push(format!("- {}", node));
        }
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl Tool for FindConnection {
    fn name(&self) -> &'static str {
        "find_connection"
    }

    fn usage(&self) -> &'static str {
        "查找知识图谱中两个实体之间的最短连接路径（不经过地区节点）。\n\
         适用：\"X和Y是什么关系\"、\"X怎么认识Y\"。只返回逻辑链，不含剧情细节。\n\
         参数: {\"entity1\": \"第一个实体\", \"entity2\": \"第二个实体\"}"
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let entity1 = match require_str_arg(args, "entity1") {
            Ok(e) => e,
            Err(msg) => return Ok(msg),
        };
        let entity2 = match require_str_arg(args, "entity2") {
            Ok(e) => e,
            Err(msg) => return Ok(msg),
        };
        self.find(entity1, entity2).await
    }
}
