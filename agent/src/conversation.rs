use crate::prompt::system_prompt;
use crate::registry::ToolRegistry;
use crate::reply::{MalformedReply, parse_reply};
use crate::turn::{History, Turn};
use ai::{AiError, ChatModel, ChatRequest};
use config::PromptStyle;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const DEFAULT_MAX_STEPS: usize = 25;

#[derive(Debug, Error)]
pub enum LoopError {
    #[error(transparent)]
    Malformed(#[from] MalformedReply),

    #[error("model call failed: {0}")]
    Model(#[from] AiError),

    #[error("no output after {0} model calls")]
    StepLimit(usize),
}

/// Receives what happens during a request, typically to print it.
pub trait Observer {
    fn on_plan(&mut self, _plan: &str) {}

    fn on_action(&mut self, _function: &str, _input: &Value) {}

    fn on_observation(&mut self, _function: &str, _observation: &Value) {}

    fn on_output(&mut self, _output: &str) {}

    fn on_failure(&mut self, _error: &LoopError) {}
}

/// Drives one request between the model and the tool registry until the model produces an output.
pub struct Conversation<'a> {
    model: &'a dyn ChatModel,
    registry: &'a mut ToolRegistry,
    system_prompt: String,
    style: PromptStyle,
    json_mode: bool,
    max_steps: usize,
}

impl fmt::Debug for Conversation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("model", &self.model.name())
            .field("registry", &self.registry)
            .field("style", &self.style)
            .field("json_mode", &self.json_mode)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

impl<'a> Conversation<'a> {
    pub fn new(model: &'a dyn ChatModel, registry: &'a mut ToolRegistry) -> Self {
        let system_prompt = system_prompt(registry.tools());
        Self {
            model,
            registry,
            system_prompt,
            style: PromptStyle::default(),
            json_mode: true,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    #[must_use]
    pub fn with_style(mut self, style: PromptStyle) -> Self {
        self.style = style;
        self
    }

    /// Whether to ask the provider to constrain replies to JSON
    #[must_use]
    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Runs the request whose turns so far are in `history` and returns the model's output.
    ///
    /// Tool failures never end the request; they come back to the model as
    /// sentinel observations. A reply that cannot be parsed, a failed model
    /// call, or running out of steps ends it without an output turn.
    pub async fn run(&mut self, history: &mut History, observer: &mut dyn Observer) -> Result<String, LoopError> {
        for step in 1..=self.max_steps {
            let mut request =
                ChatRequest::new(history.to_messages(self.style)).with_system(self.system_prompt.clone());
            if self.json_mode {
                request = request.json();
            }

            debug!(step, turns = history.len(), "Asking model");
            let reply = self.model.complete(request).await?;

            let turns = parse_reply(&reply.text).inspect_err(|err| {
                error!(reason = %err.reason, raw = %err.raw, "Could not parse model reply");
            })?;

            for turn in turns {
                if let Some(output) = self.apply(turn, history, observer).await {
                    return Ok(output);
                }
            }
        }

        Err(LoopError::StepLimit(self.max_steps))
    }

    /// Records one model turn. Returns the output text when the turn ends the request.
    async fn apply(&mut self, turn: Turn, history: &mut History, observer: &mut dyn Observer) -> Option<String> {
        match turn {
            Turn::Plan { plan } => {
                observer.on_plan(&plan);
                history.push(Turn::Plan { plan });
            }
            Turn::Action { function, input } => {
                observer.on_action(&function, &input);
                history.push(Turn::Action {
                    function: function.clone(),
                    input: input.clone(),
                });

                let observation = self
                    .registry
                    .invoke(&function, &input)
                    .await
                    .unwrap_or_else(|err| err.observation());
                observer.on_observation(&function, &observation);
                history.push(Turn::Observation { observation });
            }
            Turn::Output { output } => {
                observer.on_output(&output);
                history.push(Turn::Output {
                    output: output.clone(),
                });
                return Some(output);
            }
            other @ (Turn::User { .. } | Turn::Observation { .. }) => {
                warn!(kind = other.kind(), "Ignoring turn the model is not allowed to write");
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TOOL_FAILURE_OBSERVATION, UNKNOWN_TOOL_OBSERVATION};
    use ai::scripted::ScriptedModel;
    use async_trait::async_trait;
    use db::{StoreError, Todo, TodoStore, sqlite::SqliteTodoStore};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl Observer for Recorder {
        fn on_plan(&mut self, plan: &str) {
            self.events.push(format!("plan: {plan}"));
        }

        fn on_action(&mut self, function: &str, input: &Value) {
            self.events.push(format!("action: {function} {input}"));
        }

        fn on_observation(&mut self, function: &str, observation: &Value) {
            self.events.push(format!("observation: {function} {observation}"));
        }

        fn on_output(&mut self, output: &str) {
            self.events.push(format!("output: {output}"));
        }
    }

    /// Counts `create` calls and can be told to fail every call.
    struct SpyStore {
        inner: SqliteTodoStore,
        created: Arc<Mutex<Vec<String>>>,
        broken: bool,
    }

    impl SpyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.broken {
                Err(StoreError::UnsupportedUrl("offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TodoStore for SpyStore {
        async fn migrate(&mut self) -> Result<(), StoreError> {
            self.inner.migrate().await
        }

        async fn list_all(&mut self) -> Result<Vec<Todo>, StoreError> {
            self.check()?;
            self.inner.list_all().await
        }

        async fn create(&mut self, text: &str) -> Result<i64, StoreError> {
            self.check()?;
            self.created.lock().unwrap().push(text.to_string());
            self.inner.create(text).await
        }

        async fn delete_by_id(&mut self, id: i64) -> Result<(), StoreError> {
            self.check()?;
            self.inner.delete_by_id(id).await
        }

        async fn search(&mut self, query: &str) -> Result<Vec<Todo>, StoreError> {
            self.check()?;
            self.inner.search(query).await
        }
    }

    async fn spy_registry(broken: bool) -> (ToolRegistry, Arc<Mutex<Vec<String>>>) {
        let created = Arc::new(Mutex::new(vec![]));
        let store = SpyStore {
            inner: SqliteTodoStore::in_memory().await.unwrap(),
            created: created.clone(),
            broken,
        };
        (ToolRegistry::new(Box::new(store)), created)
    }

    #[tokio::test]
    async fn action_then_output_creates_once_and_prints_once() {
        let (mut registry, created) = spy_registry(false).await;
        let model = ScriptedModel::with_replies([
            r#"{"type":"action","function":"createTodo","input":"Buy milk"}"#,
            r#"{"type":"output","output":"Added"}"#,
        ]);
        let mut recorder = Recorder::default();
        let mut history = History::seeded("add buy milk");

        let output = Conversation::new(&model, &mut registry)
            .run(&mut history, &mut recorder)
            .await
            .unwrap();

        assert_eq!(output, "Added");
        assert_eq!(*created.lock().unwrap(), vec!["Buy milk".to_string()]);
        assert_eq!(
            recorder.events,
            vec![
                r#"action: createTodo "Buy milk""#.to_string(),
                "observation: createTodo 1".to_string(),
                "output: Added".to_string(),
            ]
        );
        assert_eq!(
            history.turns().iter().map(Turn::kind).collect::<Vec<_>>(),
            vec!["user", "action", "observation", "output"]
        );
    }

    #[tokio::test]
    async fn observation_is_sent_before_the_next_model_call() {
        let (mut registry, _) = spy_registry(false).await;
        let model = ScriptedModel::with_replies([
            r#"{"type":"plan","plan":"create it"}"#,
            r#"{"type":"action","function":"createTodo","input":"Buy milk"}"#,
            r#"{"type":"output","output":"Added"}"#,
        ]);
        let mut history = History::seeded("add buy milk");

        Conversation::new(&model, &mut registry)
            .run(&mut history, &mut Recorder::default())
            .await
            .unwrap();

        let requests = model.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[1].messages.len(), 2);
        let last = requests[2].messages.last().unwrap();
        assert_eq!(last.content, r#"{"type":"observation","observation":1}"#);
        assert!(requests.iter().all(|r| r.json_mode && r.system.is_some()));
    }

    #[tokio::test]
    async fn unknown_tool_gets_sentinel_and_loop_continues() {
        let (mut registry, created) = spy_registry(false).await;
        let model = ScriptedModel::with_replies([
            r#"{"type":"action","function":"dropAllTodos","input":null}"#,
            r#"{"type":"output","output":"I can't do that"}"#,
        ]);
        let mut history = History::seeded("delete everything");

        let output = Conversation::new(&model, &mut registry)
            .run(&mut history, &mut Recorder::default())
            .await
            .unwrap();

        assert_eq!(output, "I can't do that");
        assert_eq!(
            history.turns()[2],
            Turn::Observation {
                observation: json!(UNKNOWN_TOOL_OBSERVATION)
            }
        );
        assert!(created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_becomes_error_observation() {
        let (mut registry, _) = spy_registry(true).await;
        let model = ScriptedModel::with_replies([
            r#"{"type":"action","function":"getAllTodos"}"#,
            r#"{"type":"output","output":"Something went wrong"}"#,
        ]);
        let mut history = History::seeded("list");

        Conversation::new(&model, &mut registry)
            .run(&mut history, &mut Recorder::default())
            .await
            .unwrap();

        assert_eq!(
            history.turns()[2],
            Turn::Observation {
                observation: json!(TOOL_FAILURE_OBSERVATION)
            }
        );
    }

    #[tokio::test]
    async fn unparseable_reply_ends_request_without_tools_or_output() {
        let (mut registry, created) = spy_registry(false).await;
        let model = ScriptedModel::with_replies(["hi there", r#"{"type":"output","output":"late"}"#]);
        let mut recorder = Recorder::default();
        let mut history = History::seeded("hello");

        let err = Conversation::new(&model, &mut registry)
            .run(&mut history, &mut recorder)
            .await
            .unwrap_err();

        assert!(matches!(err, LoopError::Malformed(ref m) if m.raw == "hi there"));
        assert!(recorder.events.is_empty());
        assert!(created.lock().unwrap().is_empty());
        assert_eq!(history.len(), 1);
        assert_eq!(model.remaining(), 1);
    }

    #[tokio::test]
    async fn array_reply_is_processed_in_order_and_stops_at_output() {
        let (mut registry, created) = spy_registry(false).await;
        let model = ScriptedModel::with_replies([r#"```json
[
  {"type": "user", "user": "add two things"},
  {"type": "plan", "plan": "add both"},
  {"type": "action", "function": "createTodo", "input": "first"},
  {"type": "observation", "observation": 99},
  {"type": "action", "function": "createTodo", "input": "second"},
  {"type": "output", "output": "Both added"},
  {"type": "action", "function": "createTodo", "input": "never"}
]
```"#]);
        let mut history = History::seeded("add two things");

        let output = Conversation::new(&model, &mut registry)
            .with_style(PromptStyle::Transcript)
            .run(&mut history, &mut Recorder::default())
            .await
            .unwrap();

        assert_eq!(output, "Both added");
        assert_eq!(*created.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
        assert_eq!(
            history.turns().iter().map(Turn::kind).collect::<Vec<_>>(),
            vec!["user", "plan", "action", "observation", "action", "observation", "output"]
        );
        assert_eq!(history.turns()[3], Turn::Observation { observation: json!(1) });
    }

    #[tokio::test]
    async fn endless_planning_hits_step_limit() {
        let (mut registry, _) = spy_registry(false).await;
        let model = ScriptedModel::with_replies([r#"{"type":"plan","plan":"think"}"#; 5]);
        let mut history = History::seeded("?");

        let err = Conversation::new(&model, &mut registry)
            .with_max_steps(3)
            .run(&mut history, &mut Recorder::default())
            .await
            .unwrap_err();

        assert!(matches!(err, LoopError::StepLimit(3)));
        assert_eq!(model.remaining(), 2);
    }

    #[tokio::test]
    async fn model_failure_aborts_request() {
        let (mut registry, _) = spy_registry(false).await;
        let model = ScriptedModel::new();
        model.push_error(AiError::EmptyReply);

        let err = Conversation::new(&model, &mut registry)
            .with_json_mode(false)
            .run(&mut History::seeded("hi"), &mut Recorder::default())
            .await
            .unwrap_err();

        assert!(matches!(err, LoopError::Model(AiError::EmptyReply)));
        assert!(!model.requests()[0].json_mode);
    }
}
