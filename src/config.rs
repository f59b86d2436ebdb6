//! Configuration
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. TOML file: `--config`, else `PROCFLOW_CONFIG_PATH`, else `./procflow.toml` if present
//! 3. `PROCFLOW_*` environment variables (a `.env` file is loaded first)
//! 4. Explicit overrides set on the builder, usually from CLI flags

use std::path::PathBuf;

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data.db";
pub const DEFAULT_CACHE_URL: &str = "sqlite://llm_data.db";
pub const DEFAULT_LLM_COMMAND: &str = "ollama";

const ENV_PREFIX: &str = "PROCFLOW";
const CONFIG_PATH_VAR: &str = "PROCFLOW_CONFIG_PATH";
const DEFAULT_FILE: &str = "procflow.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub llm: LlmConfig,
}

/// Database that `SQL` statements run against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Database holding cached model responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// ssh destination running the model; unset runs locally
    #[serde(default)]
    pub host: Option<String>,
    pub command: String,
}

impl Config {
    /// Load from the default sources with no overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    database_url: Option<String>,
    cache_url: Option<String>,
    llm_host: Option<String>,
    config_path: Option<PathBuf>,
}

impl ConfigBuilder {
    pub fn database_url(mut self, url: Option<String>) -> Self {
        self.database_url = url;
        self
    }

    pub fn cache_url(mut self, url: Option<String>) -> Self {
        self.cache_url = url;
        self
    }

    pub fn llm_host(mut self, host: Option<String>) -> Self {
        self.llm_host = host;
        self
    }

    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        // A missing .env is normal
        let _ = dotenvy::dotenv();

        let path = self
            .config_path
            .or_else(|| std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from));

        let mut builder = config::Config::builder()
            .set_default("database.url", DEFAULT_DATABASE_URL)?
            .set_default("cache.url", DEFAULT_CACHE_URL)?
            .set_default("llm.command", DEFAULT_LLM_COMMAND)?;

        builder = match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::MissingFile(path));
                }
                debug!(path = %path.display(), "loading config file");
                builder.add_source(File::from(path).format(FileFormat::Toml))
            }
            None => builder.add_source(File::new(DEFAULT_FILE, FileFormat::Toml).required(false)),
        };

        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("_"))
            .set_override_option("database.url", self.database_url)?
            .set_override_option("cache.url", self.cache_url)?
            .set_override_option("llm.host", self.llm_host)?
            .build()?
            .try_deserialize::<Config>()?;
        debug!(?config, "configuration loaded");
        Ok(config)
    }
}
