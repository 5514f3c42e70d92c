use ai::Message;
use config::PromptStyle;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One entry of the conversation, tagged by `type` on the wire:
/// `{"type":"action","function":"createTodo","input":"Buy milk"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Turn {
    User {
        user: String,
    },
    Plan {
        plan: String,
    },
    Action {
        function: String,
        #[serde(default)]
        input: Value,
    },
    Observation {
        observation: Value,
    },
    Output {
        output: String,
    },
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Turn::User { user: text.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Turn::User { .. } => "user",
            Turn::Plan { .. } => "plan",
            Turn::Action { .. } => "action",
            Turn::Observation { .. } => "observation",
            Turn::Output { .. } => "output",
        }
    }

    /// Turns the model writes, as opposed to ones the user or the registry supply.
    pub fn is_model_turn(&self) -> bool {
        matches!(self, Turn::Plan { .. } | Turn::Action { .. } | Turn::Output { .. })
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Ordered, append-only record of one request or one whole session.
///
/// Callers own the history and decide its scope: a fresh one per terminal
/// line, or a single one kept for the process lifetime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(user: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::user(user)],
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Drops every turn after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.turns.truncate(len);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn to_messages(&self, style: PromptStyle) -> Vec<Message> {
        match style {
            PromptStyle::Messages => self
                .turns
                .iter()
                .map(|turn| {
                    if turn.is_model_turn() {
                        Message::assistant(turn.to_string())
                    } else {
                        Message::user(turn.to_string())
                    }
                })
                .collect(),
            PromptStyle::Transcript => vec![Message::user(self.to_string())],
        }
    }
}

impl fmt::Display for History {
    /// The whole history as one JSON array.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&self.turns).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai::Role;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn wire_shape_matches_tagged_objects() {
        let action: Turn =
            serde_json::from_str(r#"{"type":"action","function":"createTodo","input":"Buy milk"}"#).unwrap();
        assert_eq!(
            action,
            Turn::Action {
                function: "createTodo".to_string(),
                input: json!("Buy milk"),
            }
        );

        let observation = Turn::Observation {
            observation: json!(2),
        };
        assert_eq!(observation.to_string(), r#"{"type":"observation","observation":2}"#);
    }

    #[test]
    fn action_input_defaults_to_null() {
        let action: Turn = serde_json::from_str(r#"{"type":"action","function":"getAllTodos"}"#).unwrap();
        assert_eq!(
            action,
            Turn::Action {
                function: "getAllTodos".to_string(),
                input: Value::Null,
            }
        );
    }

    #[test]
    fn messages_style_assigns_roles_by_author() {
        let mut history = History::seeded("add milk");
        history.push(Turn::Action {
            function: "createTodo".to_string(),
            input: json!("milk"),
        });
        history.push(Turn::Observation {
            observation: json!(1),
        });

        let roles: Vec<Role> = history
            .to_messages(PromptStyle::Messages)
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[test]
    fn transcript_style_is_one_json_array() {
        let mut history = History::seeded("hi");
        history.push(Turn::Output {
            output: "hello".to_string(),
        });

        let messages = history.to_messages(PromptStyle::Transcript);
        assert_eq!(messages.len(), 1);
        assert_eq!(
            serde_json::from_str::<Value>(&messages[0].content).unwrap(),
            json!([
                {"type": "user", "user": "hi"},
                {"type": "output", "output": "hello"},
            ])
        );
    }

    #[test]
    fn clear_resets_history() {
        let mut history = History::seeded("hi");
        assert_eq!(history.len(), 1);
        assert_eq!(history.last().map(Turn::kind), Some("user"));
        history.clear();
        assert!(history.is_empty());
    }
}
