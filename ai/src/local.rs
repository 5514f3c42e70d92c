//! In-process model through mistral.rs, enabled with the `local` feature

use crate::{AiError, ChatModel, ChatReply, ChatRequest, FunctionCall, Role, ToolDeclaration};
use async_trait::async_trait;
use mistralrs::{
    Function, Model, RequestBuilder, Response, TextMessageRole, TextModelBuilder, Tool, ToolChoice,
    ToolType,
};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

pub struct LocalModel {
    model: Model,
    name: String,
}

impl fmt::Debug for LocalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalModel").field("name", &self.name).finish()
    }
}

impl LocalModel {
    pub async fn new(model_id: &str) -> Result<Self, AiError> {
        info!("Loading local model {model_id}");
        let model = TextModelBuilder::new(model_id)
            .with_dtype(mistralrs::ModelDType::F16)
            .build()
            .await
            .map_err(|e| AiError::Unavailable(e.to_string()))?;

        Ok(Self {
            model,
            name: model_id.to_string(),
        })
    }
}

fn to_tool(declaration: &ToolDeclaration) -> Result<Tool, AiError> {
    let parameters: HashMap<String, Value> = serde_json::from_value(declaration.parameters.clone())
        .map_err(|e| AiError::InvalidReply(format!("tool `{}` parameters: {e}", declaration.name)))?;

    Ok(Tool {
        tp: ToolType::Function,
        function: Function {
            name: declaration.name.clone(),
            description: Some(declaration.description.clone()),
            parameters: Some(parameters),
        },
    })
}

#[async_trait]
impl ChatModel for LocalModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatReply, AiError> {
        if request.json_mode {
            debug!("JSON mode is not enforced for local models");
        }

        let mut request_builder = request
            .system
            .iter()
            .fold(RequestBuilder::new(), |builder, system| {
                builder.add_message(TextMessageRole::System, system.clone())
            });
        request_builder = request
            .messages
            .iter()
            .fold(request_builder, |builder, message| {
                let role = match message.role {
                    Role::System => TextMessageRole::System,
                    Role::User => TextMessageRole::User,
                    Role::Assistant => TextMessageRole::Assistant,
                };
                builder.add_message(role, message.content.clone())
            });

        if !request.tools.is_empty() {
            let tools = request
                .tools
                .iter()
                .map(to_tool)
                .collect::<Result<Vec<_>, _>>()?;
            request_builder = request_builder
                .set_tools(tools)
                .set_tool_choice(ToolChoice::Auto);
        }

        let mut stream = self
            .model
            .stream_chat_request(request_builder)
            .await
            .map_err(|e| AiError::Unavailable(e.to_string()))?;

        let mut reply = ChatReply::default();
        while let Some(chunk) = stream.next().await {
            let Response::Chunk(chunk_response) = chunk else {
                continue;
            };
            let Some(choice) = chunk_response.choices.first() else {
                continue;
            };

            if let Some(content) = &choice.delta.content {
                reply.text.push_str(content);
            }
            if let Some(calls) = &choice.delta.tool_calls {
                for call in calls {
                    let arguments = serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| {
                        warn!(name = %call.function.name, "Tool call arguments were not JSON");
                        Value::String(call.function.arguments.clone())
                    });
                    reply.function_calls.push(FunctionCall {
                        name: call.function.name.clone(),
                        arguments,
                    });
                }
            }
        }

        if reply.text.is_empty() && reply.function_calls.is_empty() {
            return Err(AiError::EmptyReply);
        }
        Ok(reply)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
