//! # lorekeeper
//!
//! A grounded retrieval-and-grading loop for answering natural-language
//! questions about a large corpus of narrative dialogue, combining a
//! property-graph knowledge base with a semantic vector index.
//!
//! ## Core components
//!
//! - **Alias resolution**: surface names map deterministically to canonical
//!   entities via a curated table plus the graph's fulltext index
//! - **Retrieval tools**: entity lookup, path finding, temporal journeys,
//!   major events, and deduplicated semantic chunk search
//! - **Reasoning controller**: a text-prompted Thought/Action/Observation
//!   loop over the reasoning model
//! - **Grader + retry loop**: a fast model scores every answer on four
//!   rubric axes; failing answers trigger query refinement and a wider
//!   retry, with structured history carried between attempts
//! - **Trace recording**: every query persists a full structured execution
//!   record as JSON
//!
//! ## Example
//!
//! ```rust,ignore
//! use lorekeeper::{RetrievalAgent, Settings};
//!
//! let settings = Settings::from_env();
//! let agent = RetrievalAgent::connect(settings).await?;
//!
//! let outcome = agent.ask("恰斯卡属于什么组织？").await?;
//! println!("{} (passed={})", outcome.answer, outcome.passed);
//! ```

pub mod agent;
pub mod alias;
pub mod config;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod llm;
pub mod model;
pub mod tools;
pub mod trajectory;
pub mod vector;

// Re-exports for convenience
pub use agent::{
    AnswerGrader, AttemptRecord, CancelToken, Controller, ControllerConfig, GradeScores,
    GradeVerdict, Humanizer, QueryOutcome, QueryRefiner, QuestionType, RetrievalAgent,
    RetryOrchestrator, Session, ToolCallRecord, TraceDoc, TraceRecorder,
};
pub use alias::AliasResolver;
pub use config::{GraderThresholds, Settings};
pub use embedding::{Embedder, HttpEmbedder};
pub use error::{Error, Result};
pub use graph::{GraphQuery, Neo4jGraph};
pub use llm::{ChatMessage, ClientConfig, CompletionRequest, GeminiClient, LlmClient};
pub use model::{ChunkHit, ChunkRef, EventRole, EventType, MajorEventRecord, PathResult};
pub use tools::{
    BreadthBudget, FindConnection, GetCharacterEvents, LookupKnowledge, SearchMemory, SortBy,
    ToolCatalog,
};
pub use trajectory::{AgentEvent, AgentEventKind, EventSink};
pub use vector::{CharacterFilter, QdrantStore, VectorSearch};
