use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use inkling_core::models::AnalysisMode;

/// Top-level configuration loaded from `config/ink.toml`.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// OpenAI-compatible chat completion endpoint used for both analysis modes.
#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key. The key itself never
    /// lives in the config file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_simple_temperature")]
    pub simple_temperature: f32,
    #[serde(default = "default_relation_temperature")]
    pub relation_temperature: f32,
    /// Seconds allowed to establish the connection.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Seconds the stream may stay silent before the call is abandoned.
    /// The total duration of a streaming answer is not capped.
    #[serde(default = "default_idle_timeout_secs", alias = "timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            simple_temperature: default_simple_temperature(),
            relation_temperature: default_relation_temperature(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl CompletionConfig {
    pub fn temperature(&self, mode: AnalysisMode) -> f32 {
        match mode {
            AnalysisMode::Simple => self.simple_temperature,
            AnalysisMode::Relation => self.relation_temperature,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()
}
fn default_api_key_env() -> String {
    "DASHSCOPE_API_KEY".to_string()
}
fn default_model() -> String {
    "qwen3-vl-235b-a22b-thinking".to_string()
}
fn default_simple_temperature() -> f32 {
    AnalysisMode::Simple.default_temperature()
}
fn default_relation_temperature() -> f32 {
    AnalysisMode::Relation.default_temperature()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_idle_timeout_secs() -> u64 {
    120
}

/// Bearer tokens accepted by the server, mapped to the user id they act as.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

/// Where the CLI finds a running server.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_client_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_client_base_url(),
            token: None,
        }
    }
}

fn default_client_base_url() -> String {
    "http://127.0.0.1:7341".to_string()
}

impl Config {
    /// The user id the configured client token acts as, for commands that
    /// touch the database directly.
    pub fn local_owner(&self) -> Result<String> {
        let token = self
            .client
            .token
            .as_deref()
            .context("client.token is not set")?;
        self.auth
            .tokens
            .get(token)
            .cloned()
            .with_context(|| "client.token is not listed in [auth].tokens".to_string())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let completion = &config.completion;
    for (name, value) in [
        ("simple_temperature", completion.simple_temperature),
        ("relation_temperature", completion.relation_temperature),
    ] {
        if !(0.0..=2.0).contains(&value) {
            anyhow::bail!("completion.{} must be in [0.0, 2.0]", name);
        }
    }

    if completion.connect_timeout_secs == 0 {
        anyhow::bail!("completion.connect_timeout_secs must be > 0");
    }
    if completion.idle_timeout_secs == 0 {
        anyhow::bail!("completion.idle_timeout_secs must be > 0");
    }

    if completion.model.trim().is_empty() {
        anyhow::bail!("completion.model must not be empty");
    }

    if config.auth.tokens.values().any(|user| user.trim().is_empty()) {
        anyhow::bail!("auth.tokens must map every token to a non-empty user id");
    }

    Ok(())
}
