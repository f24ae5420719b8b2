use crate::hub::{DEFAULT_QUEUE_CAPACITY, HubSettings};
use crate::llm::LlmSettings;
use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// DeepSeek API key
    #[arg(long, env = "DEEPSEEK_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of the completion API
    #[arg(long, env = "LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// Model name sent with every completion request
    #[arg(long, env = "LLM_MODEL")]
    pub llm_model: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub hub: HubConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Candidate directories for frontend assets; the first existing one is served.
    pub static_dirs: Vec<String>,
    /// Deadline for plain HTTP requests. `0` disables it.
    pub request_timeout_secs: u64,
}

#[derive(Deserialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HubConfig {
    pub queue_capacity: usize,
    #[serde(default)]
    pub completion_timeout_secs: Option<u64>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 8080)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.static_dirs", vec!["./frontend/dist", "./dist"])?
            .set_default("server.request_timeout_secs", 30)?
            .set_default("llm.base_url", "https://api.deepseek.com")?
            .set_default("llm.model", "deepseek-chat")?
            .set_default("hub.queue_capacity", DEFAULT_QUEUE_CAPACITY as u64)?;

        // 2. Config file
        if let Some(path) = cli.config.as_deref() {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // 3. Environment variables prefixed with MEDSEEK_, e.g. MEDSEEK_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("MEDSEEK")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.static_dirs")
                .try_parsing(true),
        );

        // 4. CLI flags and their env shortcuts
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(key) = cli.api_key {
            builder = builder.set_override("llm.api_key", key)?;
        }
        if let Some(url) = cli.llm_base_url {
            builder = builder.set_override("llm.base_url", url)?;
        }
        if let Some(model) = cli.llm_model {
            builder = builder.set_override("llm.model", model)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Settings for the completion gateway. Fails without an API key.
    pub fn llm_settings(&self) -> Result<LlmSettings, ConfigError> {
        let base_url = self.llm.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::Message("llm.base_url cannot be empty".into()));
        }
        let model = self.llm.model.trim();
        if model.is_empty() {
            return Err(ConfigError::Message("llm.model cannot be empty".into()));
        }
        let api_key = self
            .llm
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ConfigError::Message(
                    "missing API key: set DEEPSEEK_API_KEY or pass --api-key".into(),
                )
            })?;

        Ok(LlmSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: Some(api_key.to_string()),
            model: model.to_string(),
        })
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            queue_capacity: self.hub.queue_capacity.max(1),
            completion_timeout: self
                .hub
                .completion_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.server.request_timeout_secs > 0)
            .then(|| Duration::from_secs(self.server.request_timeout_secs))
    }
}
