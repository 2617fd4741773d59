//! Retrieval tools exposed to the reasoning LLM.
//!
//! Every tool shares one contract: `invoke(args) -> text report`. Logical
//! empties and bad LLM-supplied arguments come back as readable report
//! strings (the LLM decides what to try next); `Err` is reserved for
//! infrastructure faults. The catalog renders each tool's usage guide into
//! the system prompt and dispatches by name at run time.

mod connection;
mod events;
mod journey;
mod lookup;
mod memory;

pub use connection::FindConnection;
pub use events::GetCharacterEvents;
pub use journey::TrackJourney;
pub use lookup::LookupKnowledge;
pub use memory::{BreadthBudget, SearchMemory, SortBy};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

/// Character budget for a tool observation entering the conversation and
/// the grader transcript.
pub const OBSERVATION_CHAR_BUDGET: usize = 2000;

/// Larger budget used when capturing raw tool output for traces.
pub const TRACE_CHAR_BUDGET: usize = 6000;

/// A retrieval tool callable from the reasoning loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the LLM uses in `Action:` lines.
    fn name(&self) -> &'static str;

    /// Usage guide injected into the system prompt: what the tool is for
    /// and its JSON argument schema.
    fn usage(&self) -> &'static str;

    /// Run the tool. The result is a text report either way; `Err` means
    /// the backing store or embedder failed.
    async fn invoke(&self, args: &Value) -> Result<String>;
}

/// Name-indexed tool set.
#[derive(Default)]
pub struct ToolCatalog {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<&'static str, usize>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.by_name.insert(tool.name(), self.tools.len());
        self.tools.push(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Render the catalog for the system prompt, in registration order.
    pub fn render_usage(&self) -> String {
        self.tools
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}. {}\n{}", i + 1, t.name(), t.usage()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// End-truncate to a character budget, appending an ellipsis when content
/// was dropped. Operates on characters, not bytes: the corpus is Chinese.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Extract a required string argument, or describe what was missing.
pub(crate) fn require_str_arg<'a>(
    args: &'a Value,
    key: &str,
) -> std::result::Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("参数错误：缺少必需参数 \"{}\"（字符串）。", key))
}

pub(crate) fn optional_str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}
