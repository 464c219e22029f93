//! Application configuration.
//!
//! Layered: built-in defaults, an optional TOML file, then `PARLEY_*`
//! environment overrides (e.g. `PARLEY_SERVER__PORT=9000`). The provider
//! credential is read from `GEMINI_API_KEY` and never written to config
//! files.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider credential. Populated from `GEMINI_API_KEY`.
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    /// Override for the provider endpoint, mainly for tests.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Seconds the provider may go silent mid-stream before the relay
    /// terminates the stream as failed.
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the message log database and uploaded blobs.
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn log_db_path(&self) -> PathBuf {
        self.data_dir.join("parley.db")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub storage: StorageConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parley")
}

impl AppConfig {
    /// Load configuration, optionally from an explicit file.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8385)?
            .set_default("provider.model", "gemini-2.5-flash")?
            .set_default("provider.idle_timeout_secs", 120)?
            .set_default(
                "storage.data_dir",
                default_data_dir().to_string_lossy().to_string(),
            )?;

        if let Some(path) = config_path {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        let mut config: AppConfig = builder
            .add_source(Environment::with_prefix("PARLEY").separator("__"))
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;

        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config.provider.api_key = key;
        }

        Ok(config)
    }
}
