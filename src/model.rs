//! Domain records shared between the graph seam, the vector seam, and the
//! retrieval tools.

use serde::{Deserialize, Serialize};

/// Taxonomy of major plot events.
///
/// The set is closed: tool arguments naming anything else are rejected at
/// the tool boundary with a message listing the valid tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Sacrifice,
    Transformation,
    Acquisition,
    Loss,
    Encounter,
    Conflict,
    Revelation,
    Milestone,
}

impl EventType {
    /// All taxonomy members, in display order.
    pub const ALL: [EventType; 8] = [
        EventType::Sacrifice,
        EventType::Transformation,
        EventType::Acquisition,
        EventType::Loss,
        EventType::Encounter,
        EventType::Conflict,
        EventType::Revelation,
        EventType::Milestone,
    ];

    /// Lowercase tag used in store properties and tool arguments.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Sacrifice => "sacrifice",
            Self::Transformation => "transformation",
            Self::Acquisition => "acquisition",
            Self::Loss => "loss",
            Self::Encounter => "encounter",
            Self::Conflict => "conflict",
            Self::Revelation => "revelation",
            Self::Milestone => "milestone",
        }
    }

    /// Human label shown in tool reports (corpus is Chinese game text).
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sacrifice => "牺牲",
            Self::Transformation => "转变",
            Self::Acquisition => "获得",
            Self::Loss => "失去",
            Self::Encounter => "相遇",
            Self::Conflict => "冲突",
            Self::Revelation => "揭示",
            Self::Milestone => "里程碑",
        }
    }

    /// One-line description used when explaining the taxonomy to the LLM.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Sacrifice => "牺牲 - 角色付出重大代价",
            Self::Transformation => "转变 - 角色状态/形态改变",
            Self::Acquisition => "获得 - 角色获得力量/物品",
            Self::Loss => "失去 - 角色失去某物/某人",
            Self::Encounter => "相遇 - 重要人物相遇",
            Self::Conflict => "冲突 - 战斗/对抗",
            Self::Revelation => "揭示 - 真相/秘密揭露",
            Self::Milestone => "里程碑 - 重要转折点",
        }
    }

    /// Render the full taxonomy as a bullet list for error/help text.
    pub fn taxonomy_listing() -> String {
        Self::ALL
            .iter()
            .map(|t| format!("- {} ({})", t.tag(), t.label()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.tag() == s)
            .ok_or_else(|| {
                format!(
                    "unknown event type '{}'; valid types:\n{}",
                    s,
                    Self::taxonomy_listing()
                )
            })
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// A character's role in a major event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventRole {
    Subject,
    Object,
    Witness,
}

impl EventRole {
    /// Lenient parse matching store leniency: unknown tags read as Witness.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "subject" => Self::Subject,
            "object" => Self::Object,
            _ => Self::Witness,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Subject => "主动",
            Self::Object => "被动",
            Self::Witness => "见证",
        }
    }
}

/// One adjacency row returned by the graph for an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRow {
    /// Relation type, e.g. `FRIEND_OF`, `MEMBER_OF`
    pub relation: String,
    /// Target node's canonical name
    pub target: String,
    /// Target node's label, e.g. `Character`, `Organization`
    pub target_type: String,
    /// Target node description, if any
    pub description: Option<String>,
    /// Chapter the edge was observed in, if temporal
    pub chapter: Option<i64>,
    /// Task id the edge was observed in, if temporal
    pub task_id: Option<String>,
}

/// A shortest path between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathResult {
    /// Node names along the path, endpoints included
    pub nodes: Vec<String>,
    /// Relation types between consecutive nodes (`nodes.len() - 1` entries)
    pub relations: Vec<String>,
    /// Number of hops
    pub length: usize,
}

impl PathResult {
    /// Render as `A -[REL1]-> B -[REL2]-> C`.
    pub fn render_chain(&self) -> String {
        let mut chain = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                chain.push_str(&format!(" -[{}]-> ", self.relations[i - 1]));
            }
            chain.push_str(node);
        }
        chain
    }
}

/// A chapter-stamped edge in an entity's relationship timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalEdge {
    pub relation: String,
    pub target: String,
    pub chapter: Option<i64>,
    pub task_id: Option<String>,
    /// Original-text snippet supporting the edge
    pub evidence: Option<String>,
}

/// A major plot event experienced by a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MajorEventRecord {
    pub name: String,
    pub event_type: EventType,
    pub chapter: Option<i64>,
    pub task_id: Option<String>,
    pub summary: Option<String>,
    pub evidence: Option<String>,
    pub role: EventRole,
    pub outcome: Option<String>,
}

/// Graph-side reference to a story chunk, aligned with the vector store by
/// `(task_id, event_ordinal)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    pub task_id: String,
    pub chapter: i64,
    pub event_ordinal: i64,
}

/// One scored hit from the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHit {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub chapter: Option<i64>,
    pub task_id: Option<String>,
    pub event_ordinal: Option<i64>,
    /// Speakers recorded for the chunk (not every mentioned character)
    pub characters: Vec<String>,
}

impl ChunkHit {
    /// Dedup key: one story event may span several adjacent chunks.
    pub fn dedup_key(&self) -> (Option<&str>, Option<i64>) {
        (self.task_id.as_deref(), self.event_ordinal)
    }
}
