use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use weave_stream::{NeverReveal, RevealPolicy, ToolNamePrefix};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    pub logging: LoggingConfig,

    // Secrets (from ENV only)
    #[serde(default)]
    pub mongodb_uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    Memory,
    Mongodb,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    pub backend: PersistenceBackend,
    pub database: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamConfig {
    /// Tool-name prefixes whose in-flight calls are shown before finalization
    #[serde(default)]
    pub reveal_prefixes: Vec<String>,
}

impl StreamConfig {
    pub fn reveal_policy(&self) -> Arc<dyn RevealPolicy> {
        if self.reveal_prefixes.is_empty() {
            Arc::new(NeverReveal)
        } else {
            Arc::new(ToolNamePrefix::new(self.reveal_prefixes.iter().cloned()))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    /// Load configuration from TOML files and environment variables
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. config/default.toml
    /// 2. config/{ENV}.toml (if ENV is set)
    /// 3. Environment variables prefixed with `WEAVE__`, e.g. `WEAVE__LOGGING__LEVEL=debug`
    ///
    /// `MONGODB_URI` is read from the environment and is required for the `mongodb` backend.
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "dev".to_string());

        let builder = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("WEAVE")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("stream.reveal_prefixes")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        let mut cfg: Config = config.try_deserialize()?;

        cfg.mongodb_uri = std::env::var("MONGODB_URI").unwrap_or_default();
        cfg.validate()?;

        Ok(cfg)
    }

    /// Load config from a specific path (useful for testing)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = ConfigLoader::builder().add_source(File::from(path.as_ref()));

        let config = builder.build()?;
        config.try_deserialize()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.persistence.backend == PersistenceBackend::Mongodb && self.mongodb_uri.is_empty() {
            return Err(ConfigError::Message(
                "MONGODB_URI environment variable is required for the mongodb backend".to_string(),
            ));
        }
        Ok(())
    }
}
