use serde::{Deserialize, Serialize};

use crate::store::Dialect;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Primary backend location; the server boots against this.
    #[serde(default = "default_primary_url")]
    pub primary_url: String,
    /// Secondary backend connection string, consumed only by the
    /// orchestrator when a migration is requested.
    #[serde(default)]
    pub secondary_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            primary_url: default_primary_url(),
            secondary_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DemoConfig {
    #[serde(default)]
    pub enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_primary_url() -> String {
    "sqlite://spyglass.db".to_string()
}

/// Load configuration from an optional `spyglass.toml` next to the binary
/// plus `SPYGLASS__`-prefixed environment variables.
pub fn load_config() -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::with_name("spyglass").required(false))
        .add_source(config::Environment::with_prefix("SPYGLASS").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        anyhow::bail!("server port must be non-zero");
    }

    if cfg.storage.primary_url.trim().is_empty() {
        anyhow::bail!("primary storage url must not be empty");
    }

    if !cfg.storage.secondary_url.is_empty() {
        Dialect::from_url(&cfg.storage.secondary_url)
            .map_err(|err| anyhow::anyhow!("invalid secondary storage url: {}", err))?;
    }

    Ok(())
}
