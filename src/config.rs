//! Layered application configuration.
//!
//! Priority, lowest first:
//!
//! 1. built-in defaults (`ANTHROPIC_API_KEY` seeds `llm.api_key`)
//! 2. config file (`--config` / `CONFIG_FILE`, else `./config.{yaml,toml,json}` if present)
//! 3. `CHAT_RELAY_*` environment variables, `__` between sections
//!    (e.g. `CHAT_RELAY_SERVER__PORT=9000`, `CHAT_RELAY_LLM__MODEL=...`)
//! 4. CLI flags

use std::env;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::llm::{
    DEFAULT_API_URL, DEFAULT_API_VERSION, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
    DEFAULT_TIMEOUT, LlmSettings,
};
use crate::session::DEFAULT_SESSION_TIMEOUT;

const ENV_PREFIX: &str = "CHAT_RELAY";

/// Upper bound for every `*_secs` setting (one week).
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Directory served for static assets
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub sessions: SessionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: String,
    pub request_timeout_secs: u64,
}

#[derive(Deserialize, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub api_version: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Idle time after which a session is swept.
    pub timeout_secs: u64,
    /// How often the sweeper runs.
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;

        let api_key_default = env::var("ANTHROPIC_API_KEY").unwrap_or_default();

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.static_dir", "static")?
            .set_default("server.request_timeout_secs", 60)?
            .set_default("llm.api_url", DEFAULT_API_URL)?
            .set_default("llm.api_key", api_key_default)?
            .set_default("llm.api_version", DEFAULT_API_VERSION)?
            .set_default("llm.model", DEFAULT_MODEL)?
            .set_default("llm.max_tokens", i64::from(DEFAULT_MAX_TOKENS))?
            .set_default("llm.temperature", f64::from(DEFAULT_TEMPERATURE))?
            .set_default("llm.timeout_secs", DEFAULT_TIMEOUT.as_secs())?
            .set_default("sessions.timeout_secs", DEFAULT_SESSION_TIMEOUT.as_secs())?
            .set_default("sessions.sweep_interval_secs", 300)?
            .set_default("log.json", false)?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(host) = cli.host {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(dir) = cli.static_dir {
            builder = builder.set_override("server.static_dir", dir)?;
        }
        if let Some(json) = cli.log_json {
            builder = builder.set_override("log.json", json)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.api_key.trim().is_empty() {
            return Err(ConfigError::Message(
                "llm.api_key is required (set ANTHROPIC_API_KEY or CHAT_RELAY_LLM__API_KEY)"
                    .to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Message(format!(
                "llm.temperature must be between 0 and 1, got {}",
                self.llm.temperature
            )));
        }
        if self.llm.max_tokens == 0 {
            return Err(ConfigError::Message(
                "llm.max_tokens must be greater than 0".to_string(),
            ));
        }
        let durations = [
            ("llm.timeout_secs", self.llm.timeout_secs),
            ("server.request_timeout_secs", self.server.request_timeout_secs),
            ("sessions.timeout_secs", self.sessions.timeout_secs),
            ("sessions.sweep_interval_secs", self.sessions.sweep_interval_secs),
        ];
        for (key, secs) in durations {
            if secs == 0 {
                return Err(ConfigError::Message(format!("{key} must be greater than 0")));
            }
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::Message(format!(
                    "{key} must be at most {MAX_DURATION_SECS}"
                )));
            }
        }
        Ok(())
    }

    /// Address to bind, `host:port`.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl LlmConfig {
    /// Upstream client settings.
    #[must_use]
    pub fn settings(&self) -> LlmSettings {
        LlmSettings {
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            api_version: self.api_version.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SessionConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
