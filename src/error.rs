//! Error types for lorekeeper.

use thiserror::Error;

/// Result type alias using lorekeeper's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while answering a query.
///
/// Logical empties (a tool finding nothing) and malformed LLM output are
/// deliberately *not* represented here: the former become textual "not
/// found" observations, the latter degrade to default verdicts. Only
/// infrastructure-level faults surface as `Error`.
#[derive(Error, Debug)]
pub enum Error {
    /// Graph store (Bolt endpoint) unreachable or a query failed
    #[error("graph store error: {0}")]
    GraphStore(String),

    /// Vector store unreachable or a search failed
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// Embedder call failed or returned the wrong dimension
    #[error("embedding error: {0}")]
    Embedding(String),

    /// LLM API error after retries
    #[error("LLM error: {provider} - {message}")]
    Llm { provider: String, message: String },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A caller-supplied argument rejected at the API boundary (distinct
    /// from LLM-supplied tool arguments, which come back as observations)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Trace file could not be written
    #[error("trace error: {0}")]
    Trace(String),

    /// The session was cancelled mid-flight
    #[error("cancelled")]
    Cancelled,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an LLM error.
    pub fn llm(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Llm {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a graph store error.
    pub fn graph(message: impl Into<String>) -> Self {
        Self::GraphStore(message.into())
    }

    /// Create a vector store error.
    pub fn vector(message: impl Into<String>) -> Self {
        Self::VectorStore(message.into())
    }

    /// True for faults that should abort the whole query rather than just
    /// the current attempt.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::GraphStore(_) | Self::VectorStore(_))
    }
}
