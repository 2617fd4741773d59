//! Parsing of the Thought/Action/Answer text protocol.
//!
//! The reasoning model emits free text; these helpers pull out the pieces
//! the controller acts on and the tracer archives. `Action Input` is a
//! single-line flat JSON object (the tool schemas are flat, so un-nested
//! brace matching is enough).

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static ACTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Action:\s*([A-Za-z_][A-Za-z0-9_]*)").expect("Invalid regex")
});

static ACTION_INPUT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Action Input:\s*(\{[^}]*\})").expect("Invalid regex"));

static ANSWER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(?:^|\n)\s*Answer:\s*(.*)\z").expect("Invalid regex"));

/// One parsed `Action` + `Action Input` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAction {
    pub tool: String,
    /// Parsed JSON arguments; `Null` when the input did not parse
    pub args: Value,
    /// The raw `Action Input` text as emitted
    pub raw_input: String,
}

/// First action in a reasoning turn, if any.
///
/// An `Answer:` appearing before the first `Action:` wins: the model has
/// decided it is done and trailing action echoes are noise.
pub fn parse_action(text: &str) -> Option<ParsedAction> {
    let action = ACTION_PATTERN.captures(text)?;
    if let Some(answer) = ANSWER_PATTERN.find(text) {
        if answer.start() < action.get(0).unwrap().start() {
            return None;
        }
    }

    let tool = action[1].to_string();
    let raw_input = ACTION_INPUT_PATTERN
        .captures(&text[action.get(0).unwrap().end()..])
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let args = serde_json::from_str(&raw_input).unwrap_or(Value::Null);

    Some(ParsedAction {
        tool,
        args,
        raw_input,
    })
}

/// Final answer in a reasoning turn, if any.
pub fn parse_answer(text: &str) -> Option<String> {
    ANSWER_PATTERN
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|a| !a.is_empty())
}

/// All `Thought:` blocks in a raw stream, in order. A thought runs until
/// the next protocol keyword line.
pub fn parse_thoughts(text: &str) -> Vec<String> {
    let mut thoughts = Vec::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("Thought:") {
            if let Some(done) = current.take() {
                push_trimmed(&mut thoughts, done);
            }
            current = Some(rest.trim_start().to_string());
        } else if trimmed.starts_with("Action:")
            || trimmed.starts_with("Action Input:")
            || trimmed.starts_with("Observation:")
            || trimmed.starts_with("Answer:")
        {
            if let Some(done) = current.take() {
                push_trimmed(&mut thoughts, done);
            }
        } else if let Some(buf) = current.as_mut() {
            buf.push('\n');
            buf.push_str(line);
        }
    }
    if let Some(done) = current {
        push_trimmed(&mut thoughts, done);
    }
    thoughts
}

fn push_trimmed(out: &mut Vec<String>, thought: String) {
    let trimmed = thought.trim().to_string();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
}

/// All `(action, raw input)` pairs in a raw stream, with *adjacent*
/// identical pairs collapsed — streaming models sometimes echo the same
/// action twice in a row.
pub fn parse_action_sequence(text: &str) -> Vec<(String, String)> {
    let actions: Vec<String> = ACTION_PATTERN
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();
    let inputs: Vec<String> = ACTION_INPUT_PATTERN
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();

    let mut out: Vec<(String, String)> = Vec::new();
    for (i, action) in actions.into_iter().enumerate() {
        let input = inputs.get(i).cloned().unwrap_or_default();
        if out.last() != Some(&(action.clone(), input.clone())) {
            out.push((action, input));
        }
    }
    out
}
