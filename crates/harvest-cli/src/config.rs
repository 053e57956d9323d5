//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use harvest_http::ClientConfig;
use harvest_identity::ResolverConfig;
use harvest_store::WriterConfig;
use serde::Deserialize;

/// Environment variable overriding `client.requests_per_second`
pub const ENV_RPS: &str = "HARVEST_RPS";
/// Environment variable overriding `writer.fallback_dir`
pub const ENV_FALLBACK_DIR: &str = "HARVEST_FALLBACK_DIR";
/// API key used when the config file sets none
pub const ENV_API_KEY: &str = "HARVEST_API_KEY";

/// Global configuration for harvest
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub writer: WriterConfig,
    pub resolver: ResolverConfig,
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./harvest.toml (current directory)
    /// 2. ~/.config/harvest/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("harvest.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "harvest") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default().finish())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config.finish())
    }

    fn finish(mut self) -> Self {
        self.client.api_key = match self.client.api_key.take() {
            Some(key) => expand_env_var(&key),
            None => std::env::var(ENV_API_KEY).ok(),
        };
        self
    }

    /// Apply environment overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(rps) = lookup(ENV_RPS) {
            self.client.requests_per_second = rps
                .trim()
                .parse()
                .with_context(|| format!("{ENV_RPS}={rps:?} is not a number"))?;
        }
        if let Some(dir) = lookup(ENV_FALLBACK_DIR) {
            self.writer.fallback_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Reject impossible settings before anything runs.
    pub fn validate(&self) -> Result<()> {
        self.client.validate().context("[client]")?;
        self.writer.validate().context("[writer]")?;
        self.resolver.validate().context("[resolver]")?;
        Ok(())
    }
}
