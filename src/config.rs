//! TOML configuration parsing and validation.
//!
//! MindFlow is configured with a single TOML file, passed via `--config`
//! (default `./config/mindflow.toml`). Every section except `[db]` is
//! optional and falls back to the defaults below.
//!
//! # Sections
//!
//! | Section | Keys |
//! |---------|------|
//! | `[db]` | `path` |
//! | `[server]` | `bind` |
//! | `[llm]` | `base_url`, `default_model`, `models`, `temperature`, `max_tokens`, `timeout_secs`, `api_key_env` |
//! | `[mail]` | `provider`, `endpoint`, `from`, `timeout_secs`, `api_key_env` |
//! | `[scheduler]` | `enabled`, `interval_secs`, `concurrency`, `claim_lease_secs`, `max_attempts` |
//! | `[organize]` | `summary_window`, `summary_max_chars`, `tag_input_chars`, `max_tags`, `max_key_points`, `title_max_chars` |
//! | `[auth]` | `token_ttl_secs`, `secret_env`, `password_iterations` |
//!
//! Secrets never live in the file: `api_key_env` and `secret_env` name the
//! environment variables that hold them.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub organize: OrganizeConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Generative text service settings.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Models offered to users. The default model is always included.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            default_model: default_model(),
            models: Vec::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            api_key_env: default_llm_api_key_env(),
        }
    }
}

impl LlmConfig {
    /// Configured models with the default first and duplicates removed.
    pub fn available_models(&self) -> Vec<String> {
        let mut out = vec![self.default_model.clone()];
        for m in &self.models {
            if !out.contains(m) {
                out.push(m.clone());
            }
        }
        out
    }
}

fn default_llm_base_url() -> String {
    "https://integrate.api.nvidia.com/v1".to_string()
}
fn default_model() -> String {
    "meta/llama-3.1-405b-instruct".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_llm_api_key_env() -> String {
    "MINDFLOW_LLM_API_KEY".to_string()
}

/// Outgoing mail settings.
#[derive(Debug, Deserialize, Clone)]
pub struct MailConfig {
    #[serde(default = "default_mail_provider")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default = "default_mail_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_mail_api_key_env")]
    pub api_key_env: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            provider: default_mail_provider(),
            endpoint: None,
            from: None,
            timeout_secs: default_mail_timeout_secs(),
            api_key_env: default_mail_api_key_env(),
        }
    }
}

impl MailConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_mail_provider() -> String {
    "disabled".to_string()
}
fn default_mail_timeout_secs() -> u64 {
    30
}
fn default_mail_api_key_env() -> String {
    "MINDFLOW_MAIL_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum reminders dispatched in parallel within one tick.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
    /// Stop retrying a task after this many failed attempts. Unset retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            concurrency: default_concurrency(),
            claim_lease_secs: default_claim_lease_secs(),
            max_attempts: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_interval_secs() -> u64 {
    300
}
fn default_concurrency() -> usize {
    4
}
fn default_claim_lease_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrganizeConfig {
    /// How many trailing messages feed the summary prompt.
    #[serde(default = "default_summary_window")]
    pub summary_window: usize,
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
    #[serde(default = "default_tag_input_chars")]
    pub tag_input_chars: usize,
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
    #[serde(default = "default_max_key_points")]
    pub max_key_points: usize,
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
}

impl Default for OrganizeConfig {
    fn default() -> Self {
        Self {
            summary_window: default_summary_window(),
            summary_max_chars: default_summary_max_chars(),
            tag_input_chars: default_tag_input_chars(),
            max_tags: default_max_tags(),
            max_key_points: default_max_key_points(),
            title_max_chars: default_title_max_chars(),
        }
    }
}

fn default_summary_window() -> usize {
    10
}
fn default_summary_max_chars() -> usize {
    200
}
fn default_tag_input_chars() -> usize {
    1000
}
fn default_max_tags() -> usize {
    5
}
fn default_max_key_points() -> usize {
    5
}
fn default_title_max_chars() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    /// PBKDF2 rounds for newly stored password hashes.
    #[serde(default = "default_password_iterations")]
    pub password_iterations: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl_secs(),
            secret_env: default_secret_env(),
            password_iterations: default_password_iterations(),
        }
    }
}

fn default_token_ttl_secs() -> u64 {
    3600
}
fn default_secret_env() -> String {
    "MINDFLOW_SECRET_KEY".to_string()
}
fn default_password_iterations() -> u32 {
    crate::auth::DEFAULT_PASSWORD_ITERATIONS
}

/// Read an environment variable named by a config key, treating blank as unset.
pub fn env_secret(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate scheduler
    if config.scheduler.interval_secs == 0 {
        anyhow::bail!("scheduler.interval_secs must be > 0");
    }
    if config.scheduler.concurrency == 0 {
        anyhow::bail!("scheduler.concurrency must be >= 1");
    }
    if config.scheduler.max_attempts == Some(0) {
        anyhow::bail!("scheduler.max_attempts must be >= 1 when set");
    }

    // Validate organize
    if !(1..=5).contains(&config.organize.max_tags) {
        anyhow::bail!("organize.max_tags must be in [1, 5]");
    }
    if config.organize.summary_window == 0 {
        anyhow::bail!("organize.summary_window must be > 0");
    }

    // Validate auth
    if !(1_000..=10_000_000).contains(&config.auth.password_iterations) {
        anyhow::bail!("auth.password_iterations must be in [1000, 10000000]");
    }

    // Validate llm
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.default_model.trim().is_empty() {
        anyhow::bail!("llm.default_model must not be empty");
    }

    // Validate mail
    match config.mail.provider.as_str() {
        "disabled" => {}
        "http" => {
            if config.mail.endpoint.is_none() {
                anyhow::bail!("mail.endpoint must be specified when provider is 'http'");
            }
            if config.mail.from.is_none() {
                anyhow::bail!("mail.from must be specified when provider is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown mail provider: '{}'. Must be disabled or http.",
            other
        ),
    }

    Ok(config)
}
