//! Runtime configuration.
//!
//! Everything the core recognizes from the environment, with defaults that
//! match a local single-machine deployment. Construct with
//! [`Settings::from_env`] and override individual fields with the builder
//! methods when embedding the crate in tests or a CLI.

use crate::error::{Error, Result};

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// Hard floors applied by the answer grader after parsing a verdict.
///
/// Axes are scored 0-25; the stricter rubric folds the old "evidence" axis
/// into depth and citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraderThresholds {
    /// Minimum depth sub-score; low depth means the answer reads as a
    /// summary with no dialogue evidence
    pub depth_floor: u8,
    /// Minimum citation sub-score
    pub citation_floor: u8,
    /// Minimum total score (0-100)
    pub total_floor: u8,
}

impl Default for GraderThresholds {
    fn default() -> Self {
        Self {
            depth_floor: 15,
            citation_floor: 10,
            total_floor: 70,
        }
    }
}

/// Process-wide settings for the retrieval-and-grading loop.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Model driving the tool-calling reasoning loop
    pub reasoning_model: String,
    /// Fast model for grader, refiner, humanizer and the unknown-conclusion
    /// check
    pub fast_model: String,
    /// API key for the LLM provider
    pub api_key: Option<String>,
    /// Base URL override for the LLM provider
    pub llm_base_url: Option<String>,

    /// Embedding endpoint (OpenAI-compatible `/v1/embeddings`)
    pub embedding_endpoint: String,
    /// Embedding model name
    pub embedding_model: String,
    /// Fixed embedding dimension
    pub embedding_dim: usize,

    /// Vector store URL
    pub qdrant_url: String,
    /// Vector store collection holding story chunks
    pub qdrant_collection: String,

    /// Graph store Bolt URI
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    /// Optional path to a JSON `{alias: canonical}` override table
    pub alias_table_path: Option<String>,

    /// Maximum reasoning/grading attempts per query
    pub max_attempts: usize,
    /// Vector-tool breadth budget per attempt; the last entry is reused
    /// once attempts outnumber the table
    pub limit_progression: Vec<usize>,
    /// Grader hard floors
    pub thresholds: GraderThresholds,

    /// Directory receiving one JSON trace file per query
    pub trace_dir: String,
    /// Run the citation-stripping pass on answers that pass grading
    pub enable_humanizer: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reasoning_model: "gemini-2.5-pro".to_string(),
            fast_model: "gemini-2.5-flash".to_string(),
            api_key: None,
            llm_base_url: None,
            embedding_endpoint: "http://localhost:8080".to_string(),
            embedding_model: "BAAI/bge-base-zh-v1.5".to_string(),
            embedding_dim: 768,
            qdrant_url: "http://localhost:6334".to_string(),
            qdrant_collection: "story_chunks".to_string(),
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: "neo4j".to_string(),
            alias_table_path: None,
            max_attempts: 3,
            limit_progression: vec![3, 5, 8],
            thresholds: GraderThresholds::default(),
            trace_dir: "./traces".to_string(),
            enable_humanizer: true,
        }
    }
}

impl Settings {
    /// Read settings from the process environment, falling back to the
    /// defaults above for anything unset.
    pub fn from_env() -> Self {
        let mut s = Self::default();

        if let Some(v) = env_string("REASONING_MODEL") {
            s.reasoning_model = v;
        }
        if let Some(v) = env_string("FAST_MODEL") {
            s.fast_model = v;
        }
        // GEMINI_API_KEY is the documented name; GOOGLE_API_KEY is accepted
        // because the upstream SDKs look for it.
        s.api_key = env_string("GEMINI_API_KEY").or_else(|| env_string("GOOGLE_API_KEY"));
        s.llm_base_url = env_string("LLM_BASE_URL");

        if let Some(v) = env_string("EMBEDDING_ENDPOINT") {
            s.embedding_endpoint = v;
        }
        if let Some(v) = env_string("EMBEDDING_MODEL") {
            s.embedding_model = v;
        }
        if let Some(v) = env_parse("EMBEDDING_DIM") {
            s.embedding_dim = v;
        }

        if let Some(v) = env_string("QDRANT_URL") {
            s.qdrant_url = v;
        }
        if let Some(v) = env_string("QDRANT_COLLECTION") {
            s.qdrant_collection = v;
        }

        if let Some(v) = env_string("NEO4J_URI") {
            s.neo4j_uri = v;
        }
        if let Some(v) = env_string("NEO4J_USER") {
            s.neo4j_user = v;
        }
        if let Some(v) = env_string("NEO4J_PASSWORD") {
            s.neo4j_password = v;
        }

        s.alias_table_path = env_string("ALIAS_TABLE_PATH");

        if let Some(v) = env_parse("MAX_ATTEMPTS") {
            s.max_attempts = v;
        }
        if let Some(v) = env_string("LIMIT_PROGRESSION") {
            let parsed: Vec<usize> = v
                .split(',')
                .filter_map(|p| p.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                s.limit_progression = parsed;
            }
        }
        if let Some(v) = env_parse("GRADER_DEPTH_FLOOR") {
            s.thresholds.depth_floor = v;
        }
        if let Some(v) = env_parse("GRADER_CITATION_FLOOR") {
            s.thresholds.citation_floor = v;
        }
        if let Some(v) = env_parse("GRADER_TOTAL_FLOOR") {
            s.thresholds.total_floor = v;
        }

        if let Some(v) = env_string("TRACE_DIR") {
            s.trace_dir = v;
        }
        if let Some(v) = env_parse::<bool>("ENABLE_HUMANIZER") {
            s.enable_humanizer = v;
        }

        s.normalize();
        s
    }

    /// Clamp the breadth table so attempt k never searches narrower than
    /// attempt k-1, and make sure at least one attempt runs.
    pub fn normalize(&mut self) {
        if self.max_attempts == 0 {
            self.max_attempts = 1;
        }
        if self.limit_progression.is_empty() {
            self.limit_progression = vec![3, 5, 8];
        }
        let mut running_max = 0;
        for limit in self.limit_progression.iter_mut() {
            if *limit == 0 {
                *limit = 1;
            }
            running_max = running_max.max(*limit);
            *limit = running_max;
        }
    }

    /// Breadth budget for a 1-based attempt index.
    pub fn limit_for_attempt(&self, attempt: usize) -> usize {
        let idx = attempt.saturating_sub(1).min(self.limit_progression.len() - 1);
        self.limit_progression[idx]
    }

    /// Require an API key, failing with a configuration error otherwise.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| Error::Config("GEMINI_API_KEY is not set".to_string()))
    }

    pub fn with_reasoning_model(mut self, model: impl Into<String>) -> Self {
        self.reasoning_model = model.into();
        self
    }

    pub fn with_fast_model(mut self, model: impl Into<String>) -> Self {
        self.fast_model = model.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self.normalize();
        self
    }

    pub fn with_limit_progression(mut self, limits: Vec<usize>) -> Self {
        self.limit_progression = limits;
        self.normalize();
        self
    }

    pub fn with_thresholds(mut self, thresholds: GraderThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_trace_dir(mut self, dir: impl Into<String>) -> Self {
        self.trace_dir = dir.into();
        self
    }
}
