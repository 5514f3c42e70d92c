use agent::{Conversation, Driver, ToolRegistry};
use anyhow::Context;
use clap::Parser;
use config::{AgentConfig, PromptStyle, Provider, Scope};
use std::path::PathBuf;
use tracing::info;
use ui::Terminal;

/// A to-do list assistant that manages your todos through a language model.
#[derive(Parser, Debug)]
#[command(name = "todo-agent", version, about)]
struct Args {
    /// Keep history for the whole session instead of per request
    #[arg(long)]
    scope: Option<Scope>,

    /// deepseek, openai, gemini or local
    #[arg(long)]
    provider: Option<Provider>,

    #[arg(long)]
    model: Option<String>,

    /// Where todos are stored, e.g. sqlite://todos.db or postgres://...
    #[arg(long)]
    database_url: Option<String>,

    /// Send turns as chat messages or as one transcript message
    #[arg(long)]
    prompt_style: Option<PromptStyle>,

    /// Model calls allowed per request before giving up
    #[arg(long)]
    max_steps: Option<usize>,
}

impl Args {
    fn apply(self, mut conf: AgentConfig) -> AgentConfig {
        if let Some(provider) = self.provider {
            conf.ai.switch_provider(provider);
        }
        if let Some(model) = self.model {
            conf.ai.model = model;
        }
        if let Some(url) = self.database_url {
            conf.database.url = url;
        }
        if let Some(scope) = self.scope {
            conf.session.scope = scope;
        }
        if let Some(style) = self.prompt_style {
            conf.session.prompt_style = style;
        }
        if let Some(max_steps) = self.max_steps {
            conf.session.max_steps = max_steps;
        }
        conf
    }
}

fn load_env_files() {
    let _ = dotenvy::from_filename(".env");
    if let Ok(home) = std::env::var("HOME") {
        let _ = dotenvy::from_path(PathBuf::from(home).join(".env"));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env_files();
    ui::logging::init();

    let args = Args::parse();
    let conf = args.apply(AgentConfig::get_or_default().apply_env(|key| std::env::var(key).ok())?);
    info!(?conf, "Starting");

    let store = db::connect(&conf.database.url)
        .await
        .with_context(|| format!("could not open todo store at {}", conf.database.url))?;
    let mut registry = ToolRegistry::new(store);

    let api_key = conf.ai.api_key(|key| std::env::var(key).ok())?;
    let model = ai::connect(&conf.ai, api_key)
        .await
        .context("could not set up the model")?;

    let mut conversation = Conversation::new(model.as_ref(), &mut registry)
        .with_style(conf.session.prompt_style)
        .with_max_steps(conf.session.max_steps);

    let (mut input, mut output) = (Terminal::new(), Terminal::new());
    output.intro(&format!("Todo assistant ({} {})", conf.ai.provider, conf.ai.model));

    let driver = Driver::new(conf.session.scope, conf.session.exit_sentinel.clone());
    driver
        .run(&mut conversation, &mut input, &mut output)
        .await
        .context("reading input failed")?;

    output.outro("Bye!");
    Ok(())
}
