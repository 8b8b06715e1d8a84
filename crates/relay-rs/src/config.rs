//! Startup configuration: an optional JSON file, then environment overrides.
//!
//! Everything is resolved once by [`AppConfig::load`] and handed to the
//! client and tool constructors as plain structs. Nothing below this module
//! reads the process environment.
//!
//! ```json
//! {
//!   "client": { "model": "deepseek-chat", "max_tokens": 512 },
//!   "harness": { "max_turns": 4, "streaming": true },
//!   "tools": {
//!     "enabled": ["calculator", "date_time", "weather"],
//!     "email": { "templates": { "welcome": "Hello {{name}}!" } }
//!   }
//! }
//! ```
//!
//! Environment variables win over the file:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `DEEPSEEK_API_KEY` | `client.api_key` |
//! | `DEEPSEEK_BASE_URL` | `client.base_url` |
//! | `DEEPSEEK_MODEL` | `client.model` |
//! | `OPENWEATHERMAP_API_KEY` | `tools.weather.api_key` |
//! | `SEARCH_API_KEY` / `SEARCH_ENGINE_ID` | `tools.search.*` |
//! | `WOLFRAM_ALPHA_APP_ID` | `tools.knowledge.app_id` |
//! | `EMAIL_SMTP_SERVER`, `EMAIL_SMTP_PORT`, `EMAIL_USERNAME`, `EMAIL_PASSWORD`, `EMAIL_DEFAULT_SENDER`, `EMAIL_TEMPLATE_DIR`, `EMAIL_DRY_RUN` | `tools.email.*` |

use crate::agent::config::{DEFAULT_MAX_TOOLS_TO_USE, DEFAULT_MAX_TURNS, HarnessConfig};
use crate::api::retry::RetryConfig;
use crate::error::ConfigError;
use crate::tools::email::EmailConfig;
use crate::tools::knowledge::KnowledgeConfig;
use crate::tools::search::SearchConfig;
use crate::tools::weather::WeatherConfig;
use crate::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

// ── Sections ───────────────────────────────────────────────────────

/// Transport settings for [`ChatClient`](crate::ChatClient).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    /// Default: `https://api.deepseek.com/v1`.
    pub base_url: String,
    /// Default: `deepseek-chat`.
    pub model: String,
    /// Per-request timeout. Default: `30`.
    pub timeout_secs: u64,
    /// Default: `256`.
    pub max_tokens: u32,
    /// Default: `0.7`.
    pub temperature: f32,
    /// Attempts per completion, including the first. Default: `3`.
    pub max_attempts: u32,
    /// Default: `1.0`.
    pub retry_base_delay_secs: f64,
    /// Default: `2.0`.
    pub retry_backoff_factor: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 30,
            max_tokens: 256,
            temperature: 0.7,
            max_attempts: 3,
            retry_base_delay_secs: 1.0,
            retry_backoff_factor: 2.0,
        }
    }
}

impl ClientConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::try_from_secs_f64(self.retry_base_delay_secs)
                .unwrap_or(Duration::ZERO),
            backoff_factor: self.retry_backoff_factor,
        }
    }
}

/// Orchestration defaults, turned into a [`HarnessConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    pub max_turns: u32,
    pub max_tools_to_use: usize,
    pub streaming: bool,
    pub realtime_context: bool,
    pub extract_answer_only: bool,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            max_tools_to_use: DEFAULT_MAX_TOOLS_TO_USE,
            streaming: false,
            realtime_context: false,
            extract_answer_only: true,
        }
    }
}

/// Settings for the built-in tools.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Names of the built-ins to register. `None` registers all of them.
    pub enabled: Option<Vec<String>>,
    pub weather: WeatherConfig,
    pub search: SearchConfig,
    pub knowledge: KnowledgeConfig,
    pub email: EmailConfig,
}

impl ToolsConfig {
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == name))
    }
}

/// The full resolved configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub harness: HarnessSettings,
    pub tools: ToolsConfig,
}

// ── Environment ────────────────────────────────────────────────────

/// A snapshot of environment variables.
///
/// Loading goes through this type so tests can supply their own values
/// instead of mutating the process environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    vars: HashMap<String, String>,
}

impl ConfigSource {
    pub fn from_env() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Non-empty value of `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(String::from)
    }
}

// ── Loading ────────────────────────────────────────────────────────

impl AppConfig {
    /// Read `path` (if given), then apply the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, &ConfigSource::from_env())
    }

    /// Read `path` (if given), then apply `env`.
    pub fn load_with(path: Option<&Path>, env: &ConfigSource) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config file {} ({} bytes)", path.display(), text.len());
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay environment values onto the file values.
    pub fn apply_env(&mut self, env: &ConfigSource) -> Result<(), ConfigError> {
        let client = &mut self.client;
        if let Some(v) = env.get("DEEPSEEK_API_KEY") {
            client.api_key = Some(v);
        }
        if let Some(v) = env.get("DEEPSEEK_BASE_URL") {
            client.base_url = v;
        }
        if let Some(v) = env.get("DEEPSEEK_MODEL") {
            client.model = v;
        }

        let tools = &mut self.tools;
        if let Some(v) = env.get("OPENWEATHERMAP_API_KEY") {
            tools.weather.api_key = Some(v);
        }
        if let Some(v) = env.get("SEARCH_API_KEY") {
            tools.search.api_key = Some(v);
        }
        if let Some(v) = env.get("SEARCH_ENGINE_ID") {
            tools.search.engine_id = Some(v);
        }
        if let Some(v) = env.get("WOLFRAM_ALPHA_APP_ID") {
            tools.knowledge.app_id = Some(v);
        }

        let email = &mut tools.email;
        if let Some(v) = env.get("EMAIL_SMTP_SERVER") {
            email.smtp_server = v;
        }
        if let Some(v) = env.get("EMAIL_SMTP_PORT") {
            email.smtp_port = v
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("EMAIL_SMTP_PORT is not a port: {v}")))?;
        }
        if let Some(v) = env.get("EMAIL_USERNAME") {
            email.username = Some(v);
        }
        if let Some(v) = env.get("EMAIL_PASSWORD") {
            email.password = Some(v);
        }
        if let Some(v) = env.get("EMAIL_DEFAULT_SENDER") {
            email.default_sender = Some(v);
        }
        if let Some(v) = env.get("EMAIL_TEMPLATE_DIR") {
            email.template_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env.get("EMAIL_DRY_RUN") {
            email.dry_run = match v.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => {
                    warn!("Ignoring EMAIL_DRY_RUN={other}: expected true or false");
                    email.dry_run
                }
            };
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.client.timeout_secs == 0 {
            return Err(ConfigError::Invalid("client.timeout_secs must be positive".into()));
        }
        if self.client.retry_base_delay_secs < 0.0 || self.client.retry_backoff_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "retry delay must be non-negative and backoff factor at least 1".into(),
            ));
        }
        if self.harness.max_turns == 0 {
            return Err(ConfigError::Invalid("harness.max_turns must be at least 1".into()));
        }
        Ok(())
    }

    /// A [`HarnessConfig`] carrying these settings and the client's retry
    /// policy.
    pub fn build_harness_config(&self) -> HarnessConfig {
        HarnessConfig::new()
            .with_max_turns(self.harness.max_turns)
            .with_max_tools_to_use(self.harness.max_tools_to_use)
            .with_streaming(self.harness.streaming)
            .with_realtime_context(self.harness.realtime_context)
            .with_extract_answer_only(self.harness.extract_answer_only)
            .with_retry(self.client.retry_config())
    }
}
