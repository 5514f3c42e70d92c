use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown provider `{0}` (expected deepseek, openai, gemini or local)")]
    UnknownProvider(String),

    #[error("unknown history scope `{0}` (expected per_request or session)")]
    UnknownScope(String),

    #[error("unknown prompt style `{0}` (expected messages or transcript)")]
    UnknownPromptStyle(String),

    #[error("{provider} needs an API key, set {var}")]
    MissingApiKey { provider: Provider, var: &'static str },
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub ai: AIConfig,
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    Deepseek,
    Openai,
    Gemini,
    Local,
}

impl Provider {
    /// Environment variable holding the API key, `None` for in-process models.
    pub fn api_key_var(self) -> Option<&'static str> {
        match self {
            Provider::Deepseek => Some("DEEPSEEK_API_KEY"),
            Provider::Openai => Some("OPENAI_API_KEY"),
            Provider::Gemini => Some("GEMINI_API_KEY"),
            Provider::Local => None,
        }
    }

    pub fn default_url(self) -> &'static str {
        match self {
            Provider::Deepseek => "https://api.deepseek.com",
            Provider::Openai => "https://api.openai.com/v1",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Provider::Local => "",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Deepseek => "deepseek-chat",
            Provider::Openai => "gpt-4o",
            Provider::Gemini => "gemini-1.5-flash",
            Provider::Local => "Qwen/Qwen3-4B",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Deepseek => "deepseek",
            Provider::Openai => "openai",
            Provider::Gemini => "gemini",
            Provider::Local => "local",
        };
        f.write_str(name)
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deepseek" => Ok(Provider::Deepseek),
            "openai" => Ok(Provider::Openai),
            "gemini" => Ok(Provider::Gemini),
            "local" => Ok(Provider::Local),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AIConfig {
    pub provider: Provider,
    pub model: String,
    pub url: String,
}

impl Default for AIConfig {
    fn default() -> Self {
        Self::for_provider(Provider::default())
    }
}

impl AIConfig {
    pub fn for_provider(provider: Provider) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            url: provider.default_url().to_string(),
        }
    }

    /// Switches provider, resetting model and url to that provider's defaults.
    pub fn switch_provider(&mut self, provider: Provider) {
        if provider != self.provider {
            *self = Self::for_provider(provider);
        }
    }

    /// Resolves the provider's API key through `lookup` (usually `std::env::var`).
    pub fn api_key(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<String, ConfigError> {
        let Some(var) = self.provider.api_key_var() else {
            return Ok(String::new());
        };

        lookup(var)
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey {
                provider: self.provider,
                var,
            })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://todos.db".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: String,
    pub provider: Provider,
    pub model: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3001/sse".to_string(),
            provider: Provider::Gemini,
            model: "gemini-2.0-flash".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Every terminal line starts a new history.
    #[default]
    PerRequest,
    /// One history grows for the lifetime of the process.
    Session,
}

impl FromStr for Scope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "per_request" | "request" => Ok(Scope::PerRequest),
            "session" => Ok(Scope::Session),
            other => Err(ConfigError::UnknownScope(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    /// One chat message per turn.
    #[default]
    Messages,
    /// A single message holding the whole transcript as a JSON array.
    Transcript,
}

impl FromStr for PromptStyle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "messages" => Ok(PromptStyle::Messages),
            "transcript" => Ok(PromptStyle::Transcript),
            other => Err(ConfigError::UnknownPromptStyle(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub scope: Scope,
    pub exit_sentinel: String,
    pub max_steps: usize,
    pub prompt_style: PromptStyle,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scope: Scope::default(),
            exit_sentinel: "exit".to_string(),
            max_steps: 25,
            prompt_style: PromptStyle::default(),
        }
    }
}

impl AgentConfig {
    pub fn get_or_default() -> Self {
        let Ok(home_dir) = std::env::var("HOME") else {
            return AgentConfig::default();
        };

        let path = format!("{home_dir}/.config/todo-agent/config.toml");
        let Ok(config_file) = std::fs::read_to_string(&path) else {
            return AgentConfig::default();
        };

        debug!("Loaded config from {path}");
        Self::from_toml(&config_file)
    }

    pub fn from_toml(contents: &str) -> Self {
        toml::from_str(contents).unwrap_or_default()
    }

    /// Overlays values from the environment. Unset variables leave the current value alone.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(provider) = lookup("TODO_AGENT_PROVIDER") {
            self.ai.switch_provider(provider.parse()?);
        }
        if let Some(model) = lookup("TODO_AGENT_MODEL") {
            self.ai.model = model;
        }
        if let Some(url) = lookup("TODO_AGENT_BASE_URL") {
            self.ai.url = url;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(url) = lookup("MCP_SERVER_URL") {
            self.remote.url = url;
        }
        Ok(self)
    }
}
