use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::{client::ServiceId, model::WeatherQuery};

pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 1.0;

/// Credentials and endpoint for a single remote service.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub api_key: String,

    /// Overrides the service's public endpoint (proxies, local mocks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Parameters of every chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    pub model: String,
    pub temperature: f32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Example TOML:
    /// [services.openweather]
    /// api_key = "..."
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,

    /// Location used when the caller does not give one.
    #[serde(default)]
    pub location: WeatherQuery,

    #[serde(default)]
    pub chat: ChatSettings,
}

impl Config {
    pub fn service_config(&self, id: ServiceId) -> Option<&ServiceConfig> {
        self.services.get(id.as_str())
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// Like [`Config::load`], then applies API keys found in the process environment.
    pub fn load_with_env() -> Result<Self> {
        let mut cfg = Self::load()?;
        cfg.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "askgpt", "askgpt-cli")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Set or replace a service API key, keeping any endpoint override.
    pub fn upsert_service_api_key(&mut self, id: ServiceId, api_key: String) {
        match self.services.get_mut(id.as_str()) {
            Some(cfg) => cfg.api_key = api_key,
            None => {
                self.services.insert(
                    id.as_str().to_string(),
                    ServiceConfig {
                        api_key,
                        base_url: None,
                    },
                );
            }
        }
    }

    /// Returns API key for a service, if present.
    pub fn service_api_key(&self, id: ServiceId) -> Option<&str> {
        self.service_config(id).map(|cfg| cfg.api_key.as_str())
    }

    pub fn is_service_configured(&self, id: ServiceId) -> bool {
        self.service_api_key(id).is_some_and(|key| !key.is_empty())
    }

    pub fn set_location(&mut self, location: WeatherQuery) {
        self.location = location;
    }

    /// Takes each service's key from `<SERVICE>_API_KEY` when `lookup` yields a
    /// non-empty value. Environment wins over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for id in ServiceId::all() {
            let var = id.api_key_env();
            match lookup(var) {
                Some(key) if !key.trim().is_empty() => {
                    debug!(service = %id, var, "api key taken from environment");
                    self.upsert_service_api_key(*id, key.trim().to_string());
                }
                _ => {}
            }
        }
    }
}
