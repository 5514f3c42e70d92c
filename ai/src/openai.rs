//! OpenAI-compatible chat completions client
//!
//! Works against any endpoint that speaks the `/chat/completions` shape,
//! which covers both DeepSeek and OpenAI.

use crate::{AiError, ChatModel, ChatReply, ChatRequest, FunctionCall, Role, ToolDeclaration, api_error};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct OpenAiClient {
    http_client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDeclaration,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

impl OpenAiClient {
    pub fn new(endpoint: &str, model: &str, api_key: String) -> Self {
        Self {
            http_client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }

    fn body<'a>(&'a self, request: &'a ChatRequest) -> CompletionRequest<'a> {
        let system = request.system.as_deref().map(|content| WireMessage {
            role: Role::System,
            content,
        });

        CompletionRequest {
            model: &self.model,
            messages: system
                .into_iter()
                .chain(request.messages.iter().map(|message| WireMessage {
                    role: message.role,
                    content: &message.content,
                }))
                .collect(),
            tools: request
                .tools
                .iter()
                .map(|function| WireTool {
                    kind: "function",
                    function,
                })
                .collect(),
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
            stream: false,
        }
    }
}

fn into_reply(response: CompletionResponse) -> Result<ChatReply, AiError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .ok_or(AiError::EmptyReply)?
        .message;

    let function_calls = message
        .tool_calls
        .into_iter()
        .map(|call| {
            // Arguments arrive as a JSON-encoded string
            let arguments = serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| {
                warn!(name = %call.function.name, "Tool call arguments were not JSON");
                Value::String(call.function.arguments)
            });
            FunctionCall {
                name: call.function.name,
                arguments,
            }
        })
        .collect::<Vec<_>>();

    let text = message.content.unwrap_or_default();
    if text.is_empty() && function_calls.is_empty() {
        return Err(AiError::EmptyReply);
    }

    Ok(ChatReply {
        text,
        function_calls,
    })
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply, AiError> {
        let url = format!("{}/chat/completions", self.endpoint);
        debug!(
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat completion to {url}"
        );

        let start = Instant::now();
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.body(&request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidReply(e.to_string()))?;

        info!("Chat completion finished in {:.2}s", start.elapsed().as_secs_f64());
        into_reply(completion)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
