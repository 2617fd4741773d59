//! LLM client abstraction.
//!
//! Two model roles share one trait: the reasoning model that drives the
//! tool-calling loop, and a fast model used for grading, query refinement
//! and answer post-processing. Function calling is text-prompted, never
//! provider-native, so the raw reasoning stream stays observable.

mod client;
mod types;

pub use client::{ClientConfig, GeminiClient, LlmClient};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, StopReason, TokenUsage,
};

#[cfg(test)]
pub(crate) use client::testing;
