//! Tolerant parsing of model replies into [`Turn`]s.
//!
//! Models are asked for bare JSON but often wrap it in a markdown fence or a
//! sentence of prose. The reply is accepted when it is a JSON object (one
//! turn) or array (several turns, in order) as sent, after removing a fence,
//! or once such a value is cut out of the surrounding prose.

use crate::turn::Turn;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

/// A fence wrapping the whole reply; greedy so backticks inside the JSON stay put.
static SURROUNDING_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*)```\z").expect("fence pattern is valid")
});

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\r?\n?```").expect("fence pattern is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed model reply: {reason}")]
pub struct MalformedReply {
    pub reason: String,
    /// The reply exactly as the model sent it
    pub raw: String,
}

impl MalformedReply {
    fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

pub fn parse_reply(raw: &str) -> Result<Vec<Turn>, MalformedReply> {
    let value = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => value,
        Err(_) => {
            // Only a reply that is not JSON as sent may have its fence stripped
            let body = strip_fence(raw);
            match serde_json::from_str::<Value>(body) {
                Ok(value) => value,
                Err(err) => {
                    embedded_json(body).ok_or_else(|| MalformedReply::new(format!("not JSON: {err}"), raw))?
                }
            }
        }
    };

    let turns = match value {
        Value::Object(_) => vec![turn_from(value, raw)?],
        Value::Array(items) if items.is_empty() => {
            return Err(MalformedReply::new("empty array", raw));
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| turn_from(item, raw))
            .collect::<Result<_, _>>()?,
        other => {
            return Err(MalformedReply::new(
                format!("expected a JSON object or array, got {other}"),
                raw,
            ));
        }
    };

    debug!(turns = turns.len(), "Parsed model reply");
    Ok(turns)
}

fn turn_from(value: Value, raw: &str) -> Result<Turn, MalformedReply> {
    serde_json::from_value(value).map_err(|err| MalformedReply::new(format!("not a turn: {err}"), raw))
}

/// The contents of the fence around the reply, else of the first fenced block
/// in it, else the trimmed text.
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    SURROUNDING_FENCE
        .captures(trimmed)
        .or_else(|| FENCE.captures(trimmed))
        .and_then(|captures| captures.get(1))
        .map_or(trimmed, |body| body.as_str().trim())
}

/// Cuts the widest `{...}` or `[...]` span out of prose and parses it.
fn embedded_json(text: &str) -> Option<Value> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use yare::parameterized;

    fn output(text: &str) -> Turn {
        Turn::Output {
            output: text.to_string(),
        }
    }

    #[parameterized(
        bare = { r#"{"type":"output","output":"Added"}"# },
        padded = { "\n  {\"type\":\"output\",\"output\":\"Added\"}  \n" },
        json_fence = { "```json\n{\"type\":\"output\",\"output\":\"Added\"}\n```" },
        plain_fence = { "```\n{\"type\":\"output\",\"output\":\"Added\"}\n```" },
        crlf_fence = { "```json\r\n{\"type\":\"output\",\"output\":\"Added\"}\r\n```" },
        prose_around_fence = { "Sure!\n```json\n{\"type\":\"output\",\"output\":\"Added\"}\n```\nAnything else?" },
        prose_around_object = { "Here you go: {\"type\":\"output\",\"output\":\"Added\"} hope that helps" },
    )]
    fn tolerated_single_turn(raw: &str) {
        assert_eq!(parse_reply(raw).unwrap(), vec![output("Added")]);
    }

    #[parameterized(
        bare = { r#"{"type":"output","output":"Run ```cargo test``` first"}"# },
        fenced = { "```json\n{\"type\":\"output\",\"output\":\"Run ```cargo test``` first\"}\n```" },
    )]
    fn backticks_inside_strings_survive(raw: &str) {
        assert_eq!(parse_reply(raw).unwrap(), vec![output("Run ```cargo test``` first")]);
    }

    #[parameterized(
        plain_text = { "hi there" },
        empty = { "" },
        truncated = { r#"{"type":"output","output":"Add"# },
        unknown_type = { r#"{"type":"dance","dance":"now"}"# },
        missing_field = { r#"{"type":"plan"}"# },
        scalar = { "42" },
        string = { r#""just a string""# },
        empty_array = { "[]" },
        fenced_prose = { "```\nI could not decide\n```" },
    )]
    fn rejected(raw: &str) {
        let err = parse_reply(raw).unwrap_err();
        assert_eq!(err.raw, raw);
    }

    #[test]
    fn array_turns_keep_their_order() {
        let raw = r#"```json
[
  {"type": "plan", "plan": "create it"},
  {"type": "action", "function": "createTodo", "input": "Buy milk"}
]
```"#;

        assert_eq!(
            parse_reply(raw).unwrap(),
            vec![
                Turn::Plan {
                    plan: "create it".to_string()
                },
                Turn::Action {
                    function: "createTodo".to_string(),
                    input: json!("Buy milk"),
                },
            ]
        );
    }

    #[test]
    fn one_bad_element_rejects_the_whole_array() {
        let raw = r#"[{"type":"plan","plan":"x"},{"type":"nope"}]"#;
        assert!(parse_reply(raw).unwrap_err().reason.starts_with("not a turn"));
    }

    #[test]
    fn strip_fence_leaves_unfenced_text_alone() {
        assert_eq!(strip_fence("  hi there \n"), "hi there");
    }
}
