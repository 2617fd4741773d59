//! Bolt-backed implementation of [`GraphQuery`].

use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::model::{ChunkRef, EventType, MajorEventRecord, PathResult, RelationRow, TemporalEdge};

use super::query::{FulltextHit, GraphQuery};
use crate::model::EventRole;

/// Knowledge-graph client over a Cypher-capable store.
///
/// The underlying driver pools connections; cloning the handle is cheap and
/// concurrent readers are safe.
pub struct Neo4jGraph {
    graph: Graph,
}

impl Neo4jGraph {
    /// Connect and verify the endpoint answers.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        tracing::info!(uri = %settings.neo4j_uri, "connecting to graph store");

        let config = ConfigBuilder::default()
            .uri(&settings.neo4j_uri)
            .user(&settings.neo4j_user)
            .password(&settings.neo4j_password)
            .db("neo4j")
            .fetch_size(500)
            .max_connections(10)
            .build()
            .map_err(|e| Error::graph(format!("failed to build config: {}", e)))?;

        let graph = Graph::connect(config)
            .await
            .map_err(|e| Error::graph(format!("failed to connect: {}", e)))?;

        let mut rows = graph
            .execute(query("RETURN 1 AS ok"))
            .await
            .map_err(|e| Error::graph(format!("connection test failed: {}", e)))?;
        rows.next()
            .await
            .map_err(|e| Error::graph(e.to_string()))?;

        Ok(Self { graph })
    }
}

/// Relation types are interpolated into Cypher (the type position cannot be
/// parameterized), so only plain identifiers are accepted.
pub(crate) fn is_valid_relation_ident(relation: &str) -> bool {
    !relation.is_empty()
        && relation
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl GraphQuery for Neo4jGraph {
    async fn fulltext_lookup(&self, name: &str) -> Result<Vec<FulltextHit>> {
        let cypher = "CALL db.index.fulltext.queryNodes('entity_alias_index', $name) \
                      YIELD node, score \
                      RETURN node.name AS name, node.aliases AS aliases, score \
                      LIMIT 5";

        let mut rows = self
            .graph
            .execute(query(cypher).param("name", name))
            .await
            .map_err(|e| Error::graph(e.to_string()))?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| Error::graph(e.to_string()))? {
            let Ok(name) = row.get::<String>("name") else {
                continue;
            };
            hits.push(FulltextHit {
                name,
                aliases: row
                    .get::<Option<Vec<String>>>("aliases")
                    .ok()
                    .flatten()
                    .unwrap_or_default(),
                score: row.get::<f64>("score").unwrap_or(0.0),
            });
        }
        Ok(hits)
    }

    async fn relations_of(
        &self,
        entity: &str,
        relation: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RelationRow>> {
        let cypher = match relation {
            Some(rel) => {
                if !is_valid_relation_ident(rel) {
                    return Ok(Vec::new());
                }
                format!(
                    "MATCH (a {{name: $entity}})-[r:{}]-(b) \
                     RETURN type(r) AS relation, b.name AS target, \
                            labels(b)[0] AS target_type, b.description AS description, \
                            r.chapter AS chapter, r.task_id AS task_id \
                     LIMIT $limit",
                    rel
                )
            }
            None => "MATCH (a {name: $entity})-[r]-(b) \
                     RETURN type(r) AS relation, b.name AS target, \
                            labels(b)[0] AS target_type, b.description AS description, \
                            r.chapter AS chapter, r.task_id AS task_id \
                     LIMIT $limit"
                .to_string(),
        };

        let mut rows = self
            .graph
            .execute(
                query(&cypher)
                    .param("entity", entity)
                    .param("limit", limit as i64),
            )
            .await
            .map_err(|e| Error::graph(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| Error::graph(e.to_string()))? {
            let (Ok(relation), Ok(target)) =
                (row.get::<String>("relation"), row.get::<String>("target"))
            else {
                continue;
            };
            out.push(RelationRow {
                relation,
                target,
                target_type: row
                    .get::<Option<String>>("target_type")
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "Entity".to_string()),
                description: row.get::<Option<String>>("description").ok().flatten(),
                chapter: row.get::<Option<i64>>("chapter").ok().flatten(),
                task_id: row.get::<Option<String>>("task_id").ok().flatten(),
            });
        }
        Ok(out)
    }

    async fn shortest_path(&self, entity1: &str, entity2: &str) -> Result<Option<PathResult>> {
        // Region/Nation nodes are excluded: almost any two entities share a
        // region, which would make every path trivial.
        let cypher = "MATCH path = shortestPath((a {name: $entity1})-[*..4]-(b {name: $entity2})) \
                      WHERE none(n IN nodes(path) WHERE n:Region OR n:Nation) \
                      RETURN [n IN nodes(path) | n.name] AS path_nodes, \
                             [r IN relationships(path) | type(r)] AS path_relations, \
                             length(path) AS path_length";

        let mut rows = self
            .graph
            .execute(
                query(cypher)
                    .param("entity1", entity1)
                    .param("entity2", entity2),
            )
            .await
            .map_err(|e| Error::graph(e.to_string()))?;

        if let Some(row) = rows.next().await.map_err(|e| Error::graph(e.to_string()))? {
            let nodes: Vec<String> = row.get("path_nodes").unwrap_or_default();
            let relations: Vec<String> = row.get("path_relations").unwrap_or_default();
            let length = row.get::<i64>("path_length").unwrap_or(0) as usize;
            if nodes.is_empty() {
                return Ok(None);
            }
            return Ok(Some(PathResult {
                nodes,
                relations,
                length,
            }));
        }
        Ok(None)
    }

    async fn history_of(&self, entity: &str, target: Option<&str>) -> Result<Vec<TemporalEdge>> {
        let mut filters = String::from("WHERE a.name = $source AND r.chapter IS NOT NULL");
        if target.is_some() {
            filters.push_str(" AND b.name = $target");
        }

        let cypher = format!(
            "MATCH (a)-[r]->(b) {} \
             RETURN b.name AS target, type(r) AS relation, \
                    r.chapter AS chapter, r.task_id AS task_id, r.evidence AS evidence \
             ORDER BY r.chapter ASC, r.task_id ASC",
            filters
        );

        let mut q = query(&cypher).param("source", entity);
        if let Some(t) = target {
            q = q.param("target", t);
        }

        let mut rows = self
            .graph
            .execute(q)
            .await
            .map_err(|e| Error::graph(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| Error::graph(e.to_string()))? {
            let (Ok(relation), Ok(target)) =
                (row.get::<String>("relation"), row.get::<String>("target"))
            else {
                continue;
            };
            out.push(TemporalEdge {
                relation,
                target,
                chapter: row.get::<Option<i64>>("chapter").ok().flatten(),
                task_id: row.get::<Option<String>>("task_id").ok().flatten(),
                evidence: row.get::<Option<String>>("evidence").ok().flatten(),
            });
        }
        Ok(out)
    }

    async fn major_events_of(
        &self,
        entity: &str,
        event_type: Option<EventType>,
        limit: usize,
    ) -> Result<Vec<MajorEventRecord>> {
        let mut cypher = String::from(
            "MATCH (c:Character {name: $entity})-[r:EXPERIENCES]->(e:MajorEvent) ",
        );
        if event_type.is_some() {
            cypher.push_str("WHERE e.event_type = $event_type ");
        }
        cypher.push_str(
            "RETURN e.name AS event_name, e.event_type AS event_type, \
                    e.chapter AS chapter, e.task_id AS task_id, \
                    e.summary AS summary, e.evidence AS evidence, \
                    r.role AS role, r.outcome AS outcome \
             ORDER BY e.chapter ASC \
             LIMIT $limit",
        );

        let mut q = query(&cypher)
            .param("entity", entity)
            .param("limit", limit as i64);
        if let Some(t) = event_type {
            q = q.param("event_type", t.tag());
        }

        let mut rows = self
            .graph
            .execute(q)
            .await
            .map_err(|e| Error::graph(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| Error::graph(e.to_string()))? {
            let Ok(name) = row.get::<String>("event_name") else {
                continue;
            };
            let event_type = row
                .get::<Option<String>>("event_type")
                .ok()
                .flatten()
                .and_then(|t| t.parse().ok())
                .unwrap_or(EventType::Milestone);
            let role = row
                .get::<Option<String>>("role")
                .ok()
                .flatten()
                .map(|r| EventRole::from_tag(&r))
                .unwrap_or(EventRole::Witness);
            out.push(MajorEventRecord {
                name,
                event_type,
                chapter: row.get::<Option<i64>>("chapter").ok().flatten(),
                task_id: row.get::<Option<String>>("task_id").ok().flatten(),
                summary: row.get::<Option<String>>("summary").ok().flatten(),
                evidence: row.get::<Option<String>>("evidence").ok().flatten(),
                role,
                outcome: row.get::<Option<String>>("outcome").ok().flatten(),
            });
        }
        Ok(out)
    }

    async fn chunk_by_key(&self, task_id: &str, event_ordinal: i64) -> Result<Option<ChunkRef>> {
        let cypher = "MATCH (ch:Chunk {task_id: $task_id, event_order: $event_order}) \
                      RETURN ch.task_id AS task_id, ch.chapter_number AS chapter, \
                             ch.event_order AS event_order \
                      LIMIT 1";

        let mut rows = self
            .graph
            .execute(
                query(cypher)
                    .param("task_id", task_id)
                    .param("event_order", event_ordinal),
            )
            .await
            .map_err(|e| Error::graph(e.to_string()))?;

        if let Some(row) = rows.next().await.map_err(|e| Error::graph(e.to_string()))? {
            return Ok(Some(ChunkRef {
                task_id: row.get::<String>("task_id").unwrap_or_default(),
                chapter: row.get::<i64>("chapter").unwrap_or(0),
                event_ordinal: row.get::<i64>("event_order").unwrap_or(0),
            }));
        }
        Ok(None)
    }
}
