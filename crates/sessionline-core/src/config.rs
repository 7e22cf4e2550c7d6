//! Deployment configuration.
//!
//! Configuration is stored at `~/.config/sessionline/config.json` and can be
//! overridden per process with `SESSIONLINE_*` environment variables.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::PayloadShape;
use crate::auth::{IdentityProfile, LoginExpiredMode};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "sessionline";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// File used by the file credential backend
const CREDENTIALS_FILE: &str = "credentials.json";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    Keyring,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub locale: String,
    pub refresh_enabled: bool,
    pub login_expired_mode: LoginExpiredMode,
    pub identity_profile: IdentityProfile,
    pub payload_shape: PayloadShape,
    pub login_path: String,
    pub default_home_path: String,
    /// Identity endpoint; `{user_id}` is replaced with the signed-in user's id.
    pub identity_path: String,
    /// Capability code endpoint. Capabilities stay unavailable when unset.
    pub access_codes_path: Option<String>,
    pub request_timeout_secs: u64,
    pub credential_backend: CredentialBackend,
    pub keyring_service: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080/api".to_string(),
            locale: "en-US".to_string(),
            refresh_enabled: true,
            login_expired_mode: LoginExpiredMode::default(),
            identity_profile: IdentityProfile::default(),
            payload_shape: PayloadShape::default(),
            login_path: "/auth/login".to_string(),
            default_home_path: "/analytics".to_string(),
            identity_path: "/users/{user_id}".to_string(),
            access_codes_path: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            credential_backend: CredentialBackend::default(),
            keyring_service: APP_NAME.to_string(),
        }
    }
}

impl Config {
    /// Load from disk (defaults when absent), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn credentials_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(CREDENTIALS_FILE))
    }

    /// Identity endpoint for a user id
    pub fn identity_path_for(&self, user_id: &str) -> String {
        self.identity_path
            .replace("{user_id}", &urlencoding::encode(user_id))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("SESSIONLINE_API_URL") {
            self.api_url = url;
        }
        if let Some(locale) = var("SESSIONLINE_LOCALE") {
            self.locale = locale;
        }
        if let Some(flag) = var("SESSIONLINE_REFRESH_ENABLED") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.refresh_enabled = true,
                "0" | "false" | "no" | "off" => self.refresh_enabled = false,
                other => warn!(value = other, "Ignoring invalid SESSIONLINE_REFRESH_ENABLED"),
            }
        }
        if let Some(mode) = var("SESSIONLINE_LOGIN_EXPIRED_MODE") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "modal" => self.login_expired_mode = LoginExpiredMode::Modal,
                "page" => self.login_expired_mode = LoginExpiredMode::Page,
                other => warn!(value = other, "Ignoring invalid SESSIONLINE_LOGIN_EXPIRED_MODE"),
            }
        }
    }
}
