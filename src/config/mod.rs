//! Configuration for the dataset synchronizer.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (recon-sync.toml)
//! ```toml
//! window_size = 100
//!
//! [backend]
//! base_url = "https://recon.internal/api"
//! request_timeout_secs = 60
//!
//! [loader]
//! page_size = 10000
//! chunk_size = 1000
//! yield_every = 2000
//! ```
//!
//! Environment variables use the `RECON_SYNC_` prefix with `__` between
//! section and key, e.g. `RECON_SYNC_LOADER__PAGE_SIZE=2000`.

mod defaults;

pub use defaults::*;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub backend: BackendConfig,
    pub loader: LoaderConfig,
    /// Rows per [`crate::model::PageWindow`]
    pub window_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            loader: LoaderConfig::default(),
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl SyncConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    pub fn load(config_path: Option<&str>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(SyncConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("RECON_SYNC_").split("__"));
        figment = figment.merge(Serialized::defaults(overrides));

        let config: SyncConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("loader.page_size", self.loader.page_size),
            ("loader.chunk_size", self.loader.chunk_size),
            ("loader.yield_every", self.loader.yield_every),
            ("window_size", self.window_size),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);
        match zero {
            Some((key, _)) => Err(ConfigError {
                message: format!("{key} must be greater than zero"),
            }),
            None => Ok(()),
        }
    }
}

/// Backend connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL; `/jobs/{id}/{kind}` is appended to it
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Paging and cooperative scheduling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub page_size: usize,
    pub chunk_size: usize,
    pub yield_every: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            yield_every: DEFAULT_YIELD_EVERY,
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader: Option<LoaderOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yield_every: Option<usize>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
