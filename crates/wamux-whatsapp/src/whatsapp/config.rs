//! Configuration for the multiplexer: defaults, tenants, logging toggles.

use crate::whatsapp::error::{WaResult, WhatsAppError};
use crate::whatsapp::types::{Account, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Routes the server mounts next to the webhook.
pub const RESERVED_ROUTES: &[&str] = &["/health"];

/// Where tenant credentials come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountDriver {
    Config,
    Database,
}

impl Default for AccountDriver {
    fn default() -> Self {
        Self::Config
    }
}

/// Credentials for one tenant as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub phone_number_id: String,
    #[serde(default)]
    pub business_account_id: String,
    #[serde(default)]
    pub webhook_verify_token: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl AccountConfig {
    pub fn to_account(&self, name: &str) -> Account {
        Account {
            name: name.to_string(),
            access_token: self.access_token.clone(),
            phone_number_id: self.phone_number_id.clone(),
            business_account_id: self.business_account_id.clone(),
            webhook_verify_token: self.webhook_verify_token.clone(),
            webhook_secret: self.webhook_secret.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaConfig {
    /// Tenant used when the caller does not pick one.
    #[serde(default = "default_account_name")]
    pub default_account: String,
    /// Graph API version (e.g. "v24.0").
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Base URL override (default: `https://graph.facebook.com`).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub account_driver: AccountDriver,
    /// Path the webhook routes are mounted under, without leading slash.
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountConfig>,
}

fn default_account_name() -> String {
    "default".to_string()
}
fn default_api_version() -> String {
    "v24.0".to_string()
}
fn default_base_url() -> String {
    "https://graph.facebook.com".to_string()
}
fn default_webhook_path() -> String {
    "whatsapp/webhook".to_string()
}

impl Default for WaConfig {
    fn default() -> Self {
        Self {
            default_account: default_account_name(),
            api_version: default_api_version(),
            base_url: default_base_url(),
            account_driver: AccountDriver::default(),
            webhook_path: default_webhook_path(),
            logging: LoggingConfig::default(),
            accounts: BTreeMap::new(),
        }
    }
}

impl WaConfig {
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

    /// Apply `WHATSAPP_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> WaResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `WHATSAPP_*` overrides from an arbitrary lookup.
    ///
    /// Credential variables populate the tenant named `default`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> WaResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WHATSAPP_ACCOUNT") {
            self.default_account = v;
        }
        if let Some(v) = lookup("WHATSAPP_API_VERSION") {
            self.api_version = v;
        }
        if let Some(v) = lookup("WHATSAPP_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("WHATSAPP_WEBHOOK_PATH") {
            self.webhook_path = v;
        }
        if let Some(v) = lookup("WHATSAPP_ACCOUNT_DRIVER") {
            self.account_driver = match v.as_str() {
                "config" => AccountDriver::Config,
                "database" => AccountDriver::Database,
                other => {
                    return Err(WhatsAppError::config(format!(
                        "unknown account driver '{other}'"
                    )))
                }
            };
        }

        let token = lookup("WHATSAPP_ACCESS_TOKEN");
        let phone = lookup("WHATSAPP_PHONE_NUMBER_ID");
        let waba = lookup("WHATSAPP_BUSINESS_ACCOUNT_ID");
        let verify = lookup("WHATSAPP_WEBHOOK_VERIFY_TOKEN");
        let secret = lookup("WHATSAPP_WEBHOOK_SECRET");
        let any = [&token, &phone, &waba, &verify, &secret]
            .iter()
            .any(|v| v.is_some());
        if any {
            let entry = self.accounts.entry("default".to_string()).or_default();
            if let Some(v) = token {
                entry.access_token = v;
            }
            if let Some(v) = phone {
                entry.phone_number_id = v;
            }
            if let Some(v) = waba {
                entry.business_account_id = v;
            }
            if verify.is_some() {
                entry.webhook_verify_token = verify;
            }
            if secret.is_some() {
                entry.webhook_secret = secret;
            }
        }
        Ok(())
    }

    /// Route the webhook handlers are mounted on, with a leading slash.
    pub fn webhook_route(&self) -> String {
        format!("/{}", self.webhook_path.trim_matches('/'))
    }

    /// Base URL with any trailing slash removed.
    pub fn api_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Reject settings the server cannot be started with.
    pub fn validate(&self) -> WaResult<()> {
        let route = self.webhook_route();
        if route == "/" {
            return Err(WhatsAppError::config("webhook_path must not be empty"));
        }
        if RESERVED_ROUTES.contains(&route.as_str()) {
            return Err(WhatsAppError::config(format!(
                "webhook_path '{}' collides with a built-in route",
                self.webhook_path
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
default_account: sales
api_version: v21.0
logging:
  api_requests: false
accounts:
  sales:
    access_token: tok-sales
    phone_number_id: "1001"
    business_account_id: "2001"
    webhook_verify_token: verify-sales
    webhook_secret: secret-sales
  support:
    access_token: tok-support
    phone_number_id: "1002"
    business_account_id: "2002"
"#;

    #[test]
    fn test_defaults() {
        let cfg = WaConfig::from_yaml_str("{}").unwrap();
        assert_eq!(cfg.default_account, "default");
        assert_eq!(cfg.api_version, "v24.0");
        assert_eq!(cfg.base_url, "https://graph.facebook.com");
        assert_eq!(cfg.account_driver, AccountDriver::Config);
        assert_eq!(cfg.webhook_route(), "/whatsapp/webhook");
        assert!(cfg.logging.templates);
        assert!(cfg.accounts.is_empty());
    }

    #[test]
    fn test_parse_sample() {
        let cfg = WaConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(cfg.default_account, "sales");
        assert_eq!(cfg.api_version, "v21.0");
        assert!(!cfg.logging.api_requests);
        assert!(cfg.logging.messages);
        assert_eq!(cfg.accounts.len(), 2);
        let support = cfg.accounts["support"].to_account("support");
        assert_eq!(support.phone_number_id, "1002");
        assert_eq!(support.webhook_secret, None);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WHATSAPP_API_VERSION", "v25.0"),
            ("WHATSAPP_ACCOUNT_DRIVER", "database"),
            ("WHATSAPP_ACCESS_TOKEN", "env-token"),
            ("WHATSAPP_PHONE_NUMBER_ID", "999"),
        ]
        .into_iter()
        .collect();

        let mut cfg = WaConfig::from_yaml_str(SAMPLE).unwrap();
        cfg.apply_env_from(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.api_version, "v25.0");
        assert_eq!(cfg.account_driver, AccountDriver::Database);
        assert_eq!(cfg.default_account, "sales");
        let default = &cfg.accounts["default"];
        assert_eq!(default.access_token, "env-token");
        assert_eq!(default.phone_number_id, "999");
        assert_eq!(default.business_account_id, "");
    }

    #[test]
    fn test_env_rejects_unknown_driver() {
        let mut cfg = WaConfig::default();
        let err = cfg
            .apply_env_from(|k| (k == "WHATSAPP_ACCOUNT_DRIVER").then(|| "redis".to_string()))
            .unwrap_err();
        assert!(matches!(err, WhatsAppError::Config(_)));
    }

    #[test]
    fn test_validate_webhook_path() {
        assert!(WaConfig::default().validate().is_ok());
        for path in ["health", "/health/", "", "/"] {
            let cfg = WaConfig {
                webhook_path: path.into(),
                ..WaConfig::default()
            };
            let err = cfg.validate().unwrap_err();
            assert!(matches!(err, WhatsAppError::Config(_)), "{path:?}");
        }
        let nested = WaConfig {
            webhook_path: "health/whatsapp".into(),
            ..WaConfig::default()
        };
        assert!(nested.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wamux.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = WaConfig::from_file(&path).unwrap();
        assert_eq!(cfg.accounts.len(), 2);

        let missing = WaConfig::from_file(dir.path().join("nope.yaml"));
        assert!(missing.is_err());
    }
}
