use agent::{LineSource, is_exit};
use ai::{ChatModel, ChatReply, ChatRequest, FunctionCall, Message, ToolDeclaration, create_tool, json};
use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use config::{AIConfig, AgentConfig, Provider};
use mcp::{McpClient, RemoteTool};
use std::path::PathBuf;
use tracing::{info, warn};
use ui::Terminal;

/// Chat with a model that can see the tools of a remote tool server.
#[derive(Parser, Debug)]
#[command(name = "chat", version, about)]
struct Args {
    /// Event stream URL of the tool server
    #[arg(long)]
    server: Option<String>,

    #[arg(long)]
    provider: Option<Provider>,

    #[arg(long)]
    model: Option<String>,
}

/// Declares a remote tool to the model with the parts of its input schema providers accept.
fn declaration(tool: &RemoteTool) -> ToolDeclaration {
    create_tool(
        tool.name.clone(),
        tool.description.clone().unwrap_or_default(),
        json!({
            "type": tool.input_schema.kind,
            "properties": tool.input_schema.properties,
            "required": tool.input_schema.required,
        }),
    )
}

fn describe_call(call: &FunctionCall) -> String {
    format!("{}({})", call.name, call.arguments)
}

/// What the model's turn is remembered as. Providers reject empty model
/// turns, so a reply with only function calls is kept as a description of
/// them, and an empty reply is not kept at all.
fn remembered(reply: &ChatReply) -> Option<Message> {
    let text = reply.text.trim();
    if !text.is_empty() {
        return Some(Message::assistant(text));
    }
    if reply.function_calls.is_empty() {
        return None;
    }
    let calls: Vec<String> = reply.function_calls.iter().map(describe_call).collect();
    Some(Message::assistant(format!("Requested (not run): {}", calls.join(", "))))
}

fn load_env_files() {
    let _ = dotenvy::from_filename(".env");
    if let Ok(home) = std::env::var("HOME") {
        let _ = dotenvy::from_path(PathBuf::from(home).join(".env"));
    }
}

async fn chat(
    model: &dyn ChatModel,
    tools: Vec<ToolDeclaration>,
    terminal: &mut Terminal,
    exit_sentinel: &str,
) -> anyhow::Result<()> {
    let mut history: Vec<Message> = vec![];

    while let Some(line) = terminal.read_line()? {
        if is_exit(&line, exit_sentinel) {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        history.push(Message::user(line));
        let request = ChatRequest::new(history.clone()).with_tools(tools.clone());

        let reply = match model.complete(request).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(%err, "Model call failed");
                terminal.error(format!("Request failed: {err}"));
                history.pop();
                continue;
            }
        };

        if !reply.text.trim().is_empty() {
            terminal.reply(reply.text.trim());
        }
        // Remote calls are shown but never sent to the server
        for call in &reply.function_calls {
            warn!(function = %call.name, "Model requested a remote tool call, not dispatching");
            println!("{} {}", "Requested (not run):".yellow(), describe_call(call));
        }

        match remembered(&reply) {
            Some(message) => history.push(message),
            None => {
                warn!("Model sent an empty reply");
                history.pop();
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env_files();
    ui::logging::init();

    let args = Args::parse();
    let conf = AgentConfig::get_or_default().apply_env(|key| std::env::var(key).ok())?;

    let server = args.server.unwrap_or(conf.remote.url);
    let client = McpClient::connect(&server)
        .await
        .with_context(|| format!("could not connect to tool server at {server}"))?;
    println!("Connected to MCP server");

    let remote_tools = client.list_tools().await.context("could not list remote tools")?;
    info!(tools = ?remote_tools.iter().map(|tool| &tool.name).collect::<Vec<_>>(), "Remote tools");
    let tools = remote_tools.iter().map(declaration).collect();

    let mut ai_conf = AIConfig::for_provider(args.provider.unwrap_or(conf.remote.provider));
    if args.provider.is_none() {
        ai_conf.model = conf.remote.model;
    }
    if let Some(model) = args.model {
        ai_conf.model = model;
    }
    let api_key = ai_conf.api_key(|key| std::env::var(key).ok())?;
    let model = ai::connect(&ai_conf, api_key)
        .await
        .context("could not set up the model")?;

    let mut terminal = Terminal::new();
    terminal.intro(&format!("Chat ({} {}, {server})", ai_conf.provider, ai_conf.model));
    chat(model.as_ref(), tools, &mut terminal, &conf.session.exit_sentinel).await?;
    terminal.outro("Bye!");

    Ok(())
}
