//! Gemini `generateContent` client

use crate::{AiError, ChatModel, ChatReply, ChatRequest, FunctionCall, Role, ToolDeclaration, api_error};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct GeminiClient {
    http_client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolGroup<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolGroup<'a> {
    function_declarations: &'a [ToolDeclaration],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

fn text_content(role: Option<&str>, text: &str) -> Content {
    Content {
        role: role.map(str::to_string),
        parts: vec![Part {
            text: Some(text.to_string()),
            function_call: None,
        }],
    }
}

impl GeminiClient {
    pub fn new(endpoint: &str, model: &str, api_key: String) -> Self {
        Self {
            http_client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }

    fn body<'a>(&self, request: &'a ChatRequest) -> GenerateRequest<'a> {
        // Gemini has no system role in `contents`; system text goes to systemInstruction
        let mut system: Vec<&str> = request.system.as_deref().into_iter().collect();
        let mut contents = vec![];
        for message in &request.messages {
            match message.role {
                Role::System => system.push(&message.content),
                Role::User => contents.push(text_content(Some("user"), &message.content)),
                Role::Assistant => contents.push(text_content(Some("model"), &message.content)),
            }
        }

        GenerateRequest {
            contents,
            system_instruction: (!system.is_empty())
                .then(|| text_content(None, &system.join("\n\n"))),
            tools: if request.tools.is_empty() {
                vec![]
            } else {
                vec![ToolGroup {
                    function_declarations: &request.tools,
                }]
            },
            generation_config: request.json_mode.then_some(GenerationConfig {
                response_mime_type: "application/json",
            }),
        }
    }
}

fn into_reply(response: GenerateResponse) -> Result<ChatReply, AiError> {
    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .ok_or(AiError::EmptyReply)?;

    let mut reply = ChatReply::default();
    for part in parts {
        if let Some(text) = part.text {
            reply.text.push_str(&text);
        }
        if let Some(call) = part.function_call {
            reply.function_calls.push(FunctionCall {
                name: call.name,
                arguments: call.args,
            });
        }
    }

    if reply.text.is_empty() && reply.function_calls.is_empty() {
        return Err(AiError::EmptyReply);
    }
    Ok(reply)
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply, AiError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        debug!(
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending generateContent to {url}"
        );

        let start = Instant::now();
        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.body(&request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidReply(e.to_string()))?;

        info!("Gemini generation finished in {:.2}s", start.elapsed().as_secs_f64());
        into_reply(generated)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, create_tool, json};
    use pretty_assertions::assert_eq;

    #[test]
    fn body_maps_roles_and_declares_functions() {
        let client = GeminiClient::new("https://example.test/v1beta", "gemini-2.0-flash", String::new());
        let request = ChatRequest::new(vec![
            Message::user("post a tweet"),
            Message::assistant("What should it say?"),
        ])
        .with_system("Use the tools")
        .with_tools(vec![create_tool(
            "createPost",
            "Create a post on X",
            json!({"type": "object", "properties": {"status": {"type": "string"}}, "required": ["status"]}),
        )]);

        assert_eq!(
            serde_json::to_value(client.body(&request)).unwrap(),
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "post a tweet"}]},
                    {"role": "model", "parts": [{"text": "What should it say?"}]},
                ],
                "systemInstruction": {"parts": [{"text": "Use the tools"}]},
                "tools": [{
                    "functionDeclarations": [{
                        "name": "createPost",
                        "description": "Create a post on X",
                        "parameters": {
                            "type": "object",
                            "properties": {"status": {"type": "string"}},
                            "required": ["status"],
                        },
                    }],
                }],
            })
        );
    }

    #[test]
    fn json_mode_sets_mime_type() {
        let client = GeminiClient::new("https://example.test", "m", String::new());
        let body = serde_json::to_value(client.body(&ChatRequest::new(vec![Message::user("x")]).json())).unwrap();
        assert_eq!(body["generationConfig"], json!({"responseMimeType": "application/json"}));
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn reply_parts_are_split_into_text_and_calls() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"text": "Posting now."},
                        {"functionCall": {"name": "createPost", "args": {"status": "hello"}}},
                    ],
                },
            }],
        }))
        .unwrap();

        let reply = into_reply(response).unwrap();
        assert_eq!(reply.text, "Posting now.");
        assert_eq!(reply.function_calls[0].name, "createPost");
        assert_eq!(reply.function_calls[0].arguments, json!({"status": "hello"}));
    }

    #[test]
    fn missing_candidates_are_an_error() {
        let response: GenerateResponse = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(into_reply(response), Err(AiError::EmptyReply)));
    }
}
