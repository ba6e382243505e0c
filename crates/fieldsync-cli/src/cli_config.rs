//! Persistent CLI configuration.

use std::path::{Path, PathBuf};

use fieldsync_core::util::{is_http_url, normalize_text_option};
use fieldsync_core::EngineConfig;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";

#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl std::fmt::Debug for CliConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CliConfig")
            .field("version", &self.version)
            .field("remote_url", &self.remote_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("engine", &self.engine)
            .finish()
    }
}

/// Remote endpoint resolved from the config file and environment
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub base_url: String,
    pub auth_token: Option<String>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldsync")
        .join(CONFIG_FILE_NAME)
}

pub fn normalize_remote_url(url: String) -> Result<String, String> {
    let normalized = normalize_text_option(Some(url))
        .ok_or_else(|| "remote_url must not be empty".to_string())?;
    if !is_http_url(&normalized) {
        return Err("remote_url must include http:// or https://".to_string());
    }
    Ok(normalized.trim_end_matches('/').to_string())
}

impl CliConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    /// Engine tunables with `FIELDSYNC_*` overrides applied
    pub fn engine_config(&self) -> Result<EngineConfig, String> {
        self.engine_config_with(|name| std::env::var(name).ok())
    }

    pub fn engine_config_with<F>(&self, lookup: F) -> Result<EngineConfig, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut engine = self.engine.clone();
        engine
            .apply_overrides(lookup)
            .map_err(|error| error.to_string())?;
        Ok(engine)
    }

    /// Remote endpoint, preferring `FIELDSYNC_REMOTE_URL`/`FIELDSYNC_AUTH_TOKEN`
    pub fn remote_settings(&self) -> Result<Option<RemoteSettings>, String> {
        self.remote_settings_with(|name| std::env::var(name).ok())
    }

    pub fn remote_settings_with<F>(&self, lookup: F) -> Result<Option<RemoteSettings>, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = normalize_text_option(lookup("FIELDSYNC_REMOTE_URL"))
            .or_else(|| normalize_text_option(self.remote_url.clone()));
        let Some(base_url) = base_url else {
            return Ok(None);
        };
        let auth_token = normalize_text_option(lookup("FIELDSYNC_AUTH_TOKEN"))
            .or_else(|| normalize_text_option(self.auth_token.clone()));

        Ok(Some(RemoteSettings {
            base_url: normalize_remote_url(base_url)?,
            auth_token,
        }))
    }

    fn normalize(&mut self) {
        self.remote_url = normalize_text_option(self.remote_url.clone())
            .map(|url| url.trim_end_matches('/').to_string());
        self.auth_token = normalize_text_option(self.auth_token.clone());
    }
}
