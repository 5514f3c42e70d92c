pub mod gemini;
#[cfg(feature = "local")]
pub mod local;
pub mod openai;
pub mod scripted;

use async_trait::async_trait;
use config::{AIConfig, Provider};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

// Re-export types that consumers will need to declare tools
pub use serde_json::{Value, json};

#[derive(Debug, Error)]
pub enum AiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("provider reply had no content")]
    EmptyReply,

    #[error("could not decode provider reply: {0}")]
    InvalidReply(String),

    #[error("model unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A function the model may ask to call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Everything one completion call sends to the provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDeclaration>,
    /// Ask the provider to constrain the reply to a JSON value
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub function_calls: Vec<FunctionCall>,
}

impl ChatReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            function_calls: vec![],
        }
    }
}

/// A stateless request/response text generation service
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply, AiError>;

    fn name(&self) -> &str;
}

/// Helper function to create a tool declaration with the given name, description, and parameters
///
/// # Example
/// ```rust
/// use ai::{create_tool, json};
///
/// let tool = create_tool(
///     "searchTodo",
///     "Search todos by a case-insensitive substring",
///     json!({
///         "type": "object",
///         "properties": {
///             "query": { "type": "string" },
///         },
///         "required": ["query"],
///     }),
/// );
/// assert_eq!(tool.name, "searchTodo");
/// ```
pub fn create_tool(
    name: impl Into<String>,
    description: impl Into<String>,
    parameters: Value,
) -> ToolDeclaration {
    ToolDeclaration {
        name: name.into(),
        description: description.into(),
        parameters,
    }
}

/// Builds the client for the configured provider.
///
/// Only the local backend awaits anything (loading weights); the HTTP clients are built eagerly.
#[cfg_attr(not(feature = "local"), allow(clippy::unused_async))]
pub async fn connect(conf: &AIConfig, api_key: String) -> Result<Box<dyn ChatModel>, AiError> {
    info!(provider = %conf.provider, model = %conf.model, "Connecting to model");

    match conf.provider {
        Provider::Deepseek | Provider::Openai => Ok(Box::new(openai::OpenAiClient::new(
            &conf.url, &conf.model, api_key,
        ))),
        Provider::Gemini => Ok(Box::new(gemini::GeminiClient::new(
            &conf.url, &conf.model, api_key,
        ))),
        #[cfg(feature = "local")]
        Provider::Local => Ok(Box::new(local::LocalModel::new(&conf.model).await?)),
        #[cfg(not(feature = "local"))]
        Provider::Local => Err(AiError::Unavailable(
            "built without the `local` feature".to_string(),
        )),
    }
}

/// Error body for a non-success response, used by the HTTP backends.
pub(crate) async fn api_error(response: reqwest::Response) -> AiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    AiError::Api { status, body }
}
