//! The read-only graph query surface.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ChunkRef, EventType, MajorEventRecord, PathResult, RelationRow, TemporalEdge};

/// One hit from the fulltext `(name, aliases)` index.
#[derive(Debug, Clone, PartialEq)]
pub struct FulltextHit {
    pub name: String,
    pub aliases: Vec<String>,
    pub score: f64,
}

/// Read-only queries the loop issues against the knowledge graph.
///
/// Logical empties are `Ok` with empty collections; `Err` means the store
/// itself failed.
#[async_trait]
pub trait GraphQuery: Send + Sync {
    /// Top fulltext matches over Character/Organization names and aliases.
    async fn fulltext_lookup(&self, name: &str) -> Result<Vec<FulltextHit>>;

    /// Adjacent edges of an entity, optionally restricted to one relation
    /// type. `relation` must already be a validated identifier.
    async fn relations_of(
        &self,
        entity: &str,
        relation: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RelationRow>>;

    /// Shortest undirected path of length <= 4 between two entities,
    /// excluding paths through generic Region/Nation nodes.
    async fn shortest_path(&self, entity1: &str, entity2: &str) -> Result<Option<PathResult>>;

    /// Chapter-stamped outgoing edges, sorted by chapter then task id.
    async fn history_of(&self, entity: &str, target: Option<&str>) -> Result<Vec<TemporalEdge>>;

    /// Major events connected to a character via EXPERIENCES, sorted by
    /// chapter ascending.
    async fn major_events_of(
        &self,
        entity: &str,
        event_type: Option<EventType>,
        limit: usize,
    ) -> Result<Vec<MajorEventRecord>>;

    /// Graph-side chunk reference by its cross-store key.
    async fn chunk_by_key(&self, task_id: &str, event_ordinal: i64) -> Result<Option<ChunkRef>>;
}


#[cfg(test)]
mod tests {
    use super::testing::FakeGraph;
    use super::*;
    use crate::model::ChunkHit;
    use pretty_assertions::assert_eq;

    /// Every chunk surfaced by the vector side carries a `(task_id,
    /// event_ordinal)` key that resolves to the same chunk in the graph.
    #[tokio::test]
    async fn test_cross_store_chunk_alignment() {
        let graph = FakeGraph::new()
            .with_chunk("1601", 2, 14)
            .with_chunk("1601", 2, 15);

        let hits = vec![
            ChunkHit {
                id: "a".to_string(),
                score: 0.9,
                text: "……".to_string(),
                chapter: Some(2),
                task_id: Some("1601".to_string()),
                event_ordinal: Some(14),
                characters: vec![],
            },
            ChunkHit {
                id: "b".to_string(),
                score: 0.8,
                text: "……".to_string(),
                chapter: Some(2),
                task_id: Some("1601".to_string()),
                event_ordinal: Some(15),
                characters: vec![],
            },
        ];

        for hit in &hits {
            let chunk = graph
                .chunk_by_key(hit.task_id.as_deref().unwrap(), hit.event_ordinal.unwrap())
                .await
                .unwrap()
                .expect("aligned chunk");
            assert_eq!(chunk.chapter, hit.chapter.unwrap());
            assert_eq!(chunk.event_ordinal, hit.event_ordinal.unwrap());
        }
    }

    #[tokio::test]
    async fn test_unaligned_key_is_none() {
        let graph = FakeGraph::new().with_chunk("1601", 2, 14);
        assert_eq!(graph.chunk_by_key("9999", 1).await.unwrap(), None);
    }
}
