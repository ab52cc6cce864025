//! Server configuration: the core `WaConfig` plus bind address and database.

use serde::Deserialize;
use std::path::Path;
use wamux_whatsapp::{WaConfig, WaResult, WhatsAppError};

/// Environment variable naming the YAML config file.
pub const CONFIG_ENV: &str = "WAMUX_CONFIG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AppConfig {
    /// Socket address the webhook server listens on.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// SQLite URL. Without one, records are kept in memory only.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(flatten)]
    pub whatsapp: WaConfig,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            database_url: None,
            whatsapp: WaConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_yaml_str(s: &str) -> WaResult<Self> {
        serde_yaml::from_str(s).map_err(|e| WhatsAppError::config(format!("invalid config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> WaResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WhatsAppError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// File named by `WAMUX_CONFIG` (defaults when unset), then env overrides.
    pub fn load() -> WaResult<Self> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    pub fn load_from<F>(lookup: F) -> WaResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(v) = lookup("WAMUX_BIND") {
            config.bind = v;
        }
        if let Some(v) = lookup("WAMUX_DATABASE_URL") {
            config.database_url = Some(v);
        }
        config.whatsapp.apply_env_from(&lookup)?;
        config.whatsapp.validate()?;
        Ok(config)
    }
}
