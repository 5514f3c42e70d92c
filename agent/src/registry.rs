use ai::{ToolDeclaration, create_tool};
use db::{StoreError, TodoStore};
use serde_json::{Value, json};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Observation recorded when an action names a tool that is not registered.
pub const UNKNOWN_TOOL_OBSERVATION: &str = "Invalid function";
/// Observation recorded when a registered tool rejects its input or fails.
pub const TOOL_FAILURE_OBSERVATION: &str = "Error occurred";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    NotFound(String),

    #[error("invalid input for {tool}: {reason}")]
    InvalidInput { tool: TodoTool, reason: String },

    #[error("{tool} failed: {source}")]
    Execution {
        tool: TodoTool,
        #[source]
        source: StoreError,
    },
}

impl ToolError {
    /// The sentinel fed back to the model in place of a result.
    pub fn observation(&self) -> Value {
        match self {
            ToolError::NotFound(_) => json!(UNKNOWN_TOOL_OBSERVATION),
            ToolError::InvalidInput { .. } | ToolError::Execution { .. } => json!(TOOL_FAILURE_OBSERVATION),
        }
    }
}

/// The closed set of operations the model can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TodoTool {
    GetAllTodos,
    CreateTodo,
    DeleteTodoById,
    SearchTodo,
}

impl TodoTool {
    pub const ALL: [TodoTool; 4] = [
        TodoTool::GetAllTodos,
        TodoTool::CreateTodo,
        TodoTool::DeleteTodoById,
        TodoTool::SearchTodo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TodoTool::GetAllTodos => "getAllTodos",
            TodoTool::CreateTodo => "createTodo",
            TodoTool::DeleteTodoById => "deleteTodoById",
            TodoTool::SearchTodo => "searchTodo",
        }
    }

    /// Call shape shown to the model in the system prompt
    pub fn signature(self) -> &'static str {
        match self {
            TodoTool::GetAllTodos => "getAllTodos()",
            TodoTool::CreateTodo => "createTodo(todo: string)",
            TodoTool::DeleteTodoById => "deleteTodoById(id: number)",
            TodoTool::SearchTodo => "searchTodo(query: string)",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            TodoTool::GetAllTodos => "Returns every todo in the database.",
            TodoTool::CreateTodo => "Creates a todo from the given text and returns the id of the new todo.",
            TodoTool::DeleteTodoById => "Deletes the todo with the given id. Deleting a missing id is not an error.",
            TodoTool::SearchTodo => "Returns the todos whose text contains the query, ignoring case.",
        }
    }

    pub fn parameters(self) -> Value {
        match self {
            TodoTool::GetAllTodos => json!({"type": "object", "properties": {}}),
            TodoTool::CreateTodo => json!({
                "type": "object",
                "properties": {"todo": {"type": "string", "description": "Text of the todo"}},
                "required": ["todo"],
            }),
            TodoTool::DeleteTodoById => json!({
                "type": "object",
                "properties": {"id": {"type": "integer", "description": "Id of the todo to delete"}},
                "required": ["id"],
            }),
            TodoTool::SearchTodo => json!({
                "type": "object",
                "properties": {"query": {"type": "string", "description": "Text to look for"}},
                "required": ["query"],
            }),
        }
    }

    pub fn declaration(self) -> ToolDeclaration {
        create_tool(self.name(), self.description(), self.parameters())
    }
}

impl fmt::Display for TodoTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TodoTool {
    type Err = ToolError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        TodoTool::ALL
            .into_iter()
            .find(|tool| tool.name() == name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }
}

/// Maps tool names to operations on the todo store.
///
/// The tool set is fixed once the registry is built.
pub struct ToolRegistry {
    store: Box<dyn TodoStore>,
    tools: Vec<TodoTool>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.tools).finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    /// Registering the same tool twice keeps the first registration.
    #[must_use]
    pub fn register(mut self, tool: TodoTool) -> Self {
        if !self.registry.tools.contains(&tool) {
            self.registry.tools.push(tool);
        }
        self
    }

    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

impl ToolRegistry {
    /// A registry with every [`TodoTool`] registered
    pub fn new(store: Box<dyn TodoStore>) -> Self {
        TodoTool::ALL
            .into_iter()
            .fold(Self::builder(store), ToolRegistryBuilder::register)
            .build()
    }

    pub fn builder(store: Box<dyn TodoStore>) -> ToolRegistryBuilder {
        ToolRegistryBuilder {
            registry: Self { store, tools: vec![] },
        }
    }

    pub fn tools(&self) -> &[TodoTool] {
        &self.tools
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.iter().map(|tool| tool.declaration()).collect()
    }

    pub async fn invoke(&mut self, name: &str, input: &Value) -> Result<Value, ToolError> {
        let tool: TodoTool = name.parse()?;
        if !self.tools.contains(&tool) {
            return Err(ToolError::NotFound(name.to_string()));
        }

        info!(%tool, %input, "Invoking tool");
        let result = self.execute(tool, input).await;
        match &result {
            Ok(value) => debug!(%tool, %value, "Tool finished"),
            Err(err) => warn!(%tool, %err, "Tool failed"),
        }
        result
    }

    async fn execute(&mut self, tool: TodoTool, input: &Value) -> Result<Value, ToolError> {
        let failed = |source| ToolError::Execution { tool, source };

        match tool {
            TodoTool::GetAllTodos => {
                let todos = self.store.list_all().await.map_err(failed)?;
                Ok(json!(todos))
            }
            TodoTool::CreateTodo => {
                let text = text_input(tool, input, &["todo", "text"])?;
                let id = self.store.create(&text).await.map_err(failed)?;
                Ok(json!(id))
            }
            TodoTool::DeleteTodoById => {
                let id = id_input(tool, input)?;
                self.store.delete_by_id(id).await.map_err(failed)?;
                Ok(Value::Null)
            }
            TodoTool::SearchTodo => {
                let query = text_input(tool, input, &["query", "search"])?;
                let todos = self.store.search(&query).await.map_err(failed)?;
                Ok(json!(todos))
            }
        }
    }
}

/// Accepts a bare string or an object carrying the string under one of `keys`.
fn text_input(tool: TodoTool, input: &Value, keys: &[&str]) -> Result<String, ToolError> {
    match input {
        Value::String(text) => Ok(text.clone()),
        Value::Object(fields) => keys
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| ToolError::InvalidInput {
                tool,
                reason: format!("expected one of {keys:?}"),
            }),
        other => Err(ToolError::InvalidInput {
            tool,
            reason: format!("expected a string, got {other}"),
        }),
    }
}

/// Accepts an integer, a string holding one, or `{"id": ...}`.
fn id_input(tool: TodoTool, input: &Value) -> Result<i64, ToolError> {
    let invalid = || ToolError::InvalidInput {
        tool,
        reason: format!("expected an integer id, got {input}"),
    };

    match input {
        Value::Number(number) => number.as_i64().ok_or_else(invalid),
        Value::String(text) => text.trim().parse().map_err(|_| invalid()),
        Value::Object(fields) => fields.get("id").map_or_else(|| Err(invalid()), |id| id_input(tool, id)),
        _ => Err(invalid()),
    }
}
