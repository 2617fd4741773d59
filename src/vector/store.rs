//! Qdrant-backed implementation of [`VectorSearch`].

use async_trait::async_trait;
use qdrant_client::prelude::*;
use qdrant_client::qdrant::{point_id::PointIdOptions, Condition, Filter, SearchPoints};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::model::ChunkHit;

/// Equality/set-membership filter over the chunk `characters` payload field.
///
/// The field records the *speakers* of a chunk, not every mentioned
/// character; the memory tool compensates with a semantic fallback when a
/// filter comes back empty.
#[derive(Debug, Clone, PartialEq)]
pub enum CharacterFilter {
    /// Exactly one resolved name
    Exact(String),
    /// Any of an alias-expanded name set
    AnyOf(Vec<String>),
}

impl CharacterFilter {
    /// Collapse an alias expansion into the narrowest filter shape.
    pub fn from_names(mut names: Vec<String>) -> Option<Self> {
        names.sort();
        names.dedup();
        match names.len() {
            0 => None,
            1 => Some(Self::Exact(names.remove(0))),
            _ => Some(Self::AnyOf(names)),
        }
    }

    /// The names this filter accepts.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Exact(name) => vec![name.as_str()],
            Self::AnyOf(names) => names.iter().map(|n| n.as_str()).collect(),
        }
    }
}

/// Filtered nearest-neighbor search over story chunks.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Top-`limit` hits for a query vector, most similar first.
    async fn search(
        &self,
        vector: Vec<f32>,
        filter: Option<&CharacterFilter>,
        limit: usize,
    ) -> Result<Vec<ChunkHit>>;
}

/// Vector store client for the story-chunk collection.
pub struct QdrantStore {
    client: QdrantClient,
    collection: String,
}

impl QdrantStore {
    pub fn new(settings: &Settings) -> Result<Self> {
        tracing::info!(url = %settings.qdrant_url, collection = %settings.qdrant_collection, "connecting to vector store");
        let client = QdrantClient::from_url(&settings.qdrant_url)
            .build()
            .map_err(|e| Error::vector(format!("failed to build client: {}", e)))?;
        Ok(Self {
            client,
            collection: settings.qdrant_collection.clone(),
        })
    }
}

fn build_filter(filter: &CharacterFilter) -> Filter {
    match filter {
        CharacterFilter::Exact(name) => {
            Filter::must([Condition::matches("characters", name.clone())])
        }
        CharacterFilter::AnyOf(names) => {
            Filter::must([Condition::matches("characters", names.clone())])
        }
    }
}

fn point_id_string(id: Option<qdrant_client::qdrant::PointId>) -> String {
    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Num(n)) => n.to_string(),
        Some(PointIdOptions::Uuid(u)) => u,
        None => String::new(),
    }
}

fn hit_from_payload(id: String, score: f32, payload: serde_json::Value) -> ChunkHit {
    ChunkHit {
        id,
        score,
        text: payload
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        chapter: payload.get("chapter_number").and_then(|v| v.as_i64()),
        task_id: payload
            .get("task_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        event_ordinal: payload.get("event_order").and_then(|v| v.as_i64()),
        characters: payload
            .get("characters")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

#[async_trait]
impl VectorSearch for QdrantStore {
    async fn search(
        &self,
        vector: Vec<f32>,
        filter: Option<&CharacterFilter>,
        limit: usize,
    ) -> Result<Vec<ChunkHit>> {
        let search = SearchPoints {
            collection_name: self.collection.clone(),
            vector,
            filter: filter.map(build_filter),
            limit: limit as u64,
            with_payload: Some(true.into()),
            ..Default::default()
        };

        let response = self
            .client
            .search_points(&search)
            .await
            .map_err(|e| Error::vector(format!("search failed: {}", e)))?;

        let hits = response
            .result
            .into_iter()
            .map(|point| {
                let payload =
                    serde_json::to_value(&point.payload).unwrap_or(serde_json::Value::Null);
                hit_from_payload(point_id_string(point.id), point.score, payload)
            })
            .collect();

        Ok(hits)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory vector fake with cosine-free "scripted similarity": hits
    //! are returned in insertion-score order, filters apply to the
    //! `characters` field like the real store.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeVector {
        pub hits: Mutex<Vec<ChunkHit>>,
        pub unavailable: AtomicBool,
        /// Number of search calls observed (for expanding-loop assertions)
        pub calls: AtomicUsize,
    }

    impl FakeVector {
        pub fn new(mut hits: Vec<ChunkHit>) -> Self {
            hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
            Self {
                hits: Mutex::new(hits),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl VectorSearch for FakeVector {
        async fn search(
            &self,
            _vector: Vec<f32>,
            filter: Option<&CharacterFilter>,
            limit: usize,
        ) -> Result<Vec<ChunkHit>> {
            if self.unavailable.load(Ordering::Relaxed) {
                return Err(Error::vector("connection refused"));
            }
            self.calls.fetch_add(1, Ordering::Relaxed);
            let hits = self.hits.lock().unwrap();
            Ok(hits
                .iter()
                .filter(|hit| match filter {
                    None => true,
                    Some(f) => {
                        let names = f.names();
                        hit.characters.iter().any(|c| names.contains(&c.as_str()))
                    }
                })
                .take(limit)
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_filter_from_names() {
        assert_eq!(CharacterFilter::from_names(vec![]), None);
        assert_eq!(
            CharacterFilter::from_names(vec!["少女".into(), "少女".into()]),
            Some(CharacterFilter::Exact("少女".into()))
        );
        let f = CharacterFilter::from_names(vec!["少女".into(), "露珠".into()]).unwrap();
        assert_eq!(f.names().len(), 2);
    }

    #[test]
    fn test_hit_from_payload_reads_store_fields() {
        let payload = serde_json::json!({
            "text": "……",
            "chapter_number": 2,
            "task_id": "1601",
            "event_order": 14,
            "characters": ["少女", "旅行者"],
        });
        let hit = hit_from_payload("7".into(), 0.83, payload);
        assert_eq!(hit.chapter, Some(2));
        assert_eq!(hit.task_id.as_deref(), Some("1601"));
        assert_eq!(hit.event_ordinal, Some(14));
        assert_eq!(hit.characters.len(), 2);
    }

    #[test]
    fn test_hit_from_payload_tolerates_missing_fields() {
        let hit = hit_from_payload("7".into(), 0.1, serde_json::json!({}));
        assert_eq!(hit.chapter, None);
        assert_eq!(hit.task_id, None);
        assert!(hit.characters.is_empty());
    }
}
