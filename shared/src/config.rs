//! Static launch configuration.
//!
//! Hosts ship this as JSON next to the binary (or build it in code). Durations
//! are milliseconds on the wire.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BUNDLE_ID: &str = "com.eggcook.studio";
pub const DEFAULT_PLATFORM: &str = "iOS";
pub const DEFAULT_ORGANIC_VALIDATION_BASE: &str = "https://gcdsdk.appsflyer.com/install_data/v4.0/";
pub const ORGANIC_VALIDATION_DELAY: Duration = Duration::from_secs(5);
pub const DEEPLINK_MERGE_WINDOW: Duration = Duration::from_secs(5);
pub const ATTRIBUTION_TIMEOUT: Duration = Duration::from_secs(15);
pub const PERMISSION_COOLDOWN: Duration = Duration::from_secs(3 * 24 * 60 * 60);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid endpoint for '{field}': {reason}")]
    InvalidEndpoint { field: &'static str, reason: String },
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Store app id, digits only (`store_id` is `"id" + app_id`).
    pub app_id: String,
    pub dev_key: SecretString,
    pub bundle_id: String,
    pub platform: String,
    pub firebase_project_id: Option<String>,
    pub remote_config_url: String,
    pub organic_validation_base_url: String,

    #[serde(with = "duration_ms")]
    pub organic_validation_delay: Duration,
    #[serde(with = "duration_ms")]
    pub deeplink_merge_window: Duration,
    #[serde(with = "duration_ms")]
    pub attribution_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub permission_cooldown: Duration,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            dev_key: SecretString::new(String::new()),
            bundle_id: DEFAULT_BUNDLE_ID.to_string(),
            platform: DEFAULT_PLATFORM.to_string(),
            firebase_project_id: None,
            remote_config_url: String::new(),
            organic_validation_base_url: DEFAULT_ORGANIC_VALIDATION_BASE.to_string(),
            organic_validation_delay: ORGANIC_VALIDATION_DELAY,
            deeplink_merge_window: DEEPLINK_MERGE_WINDOW,
            attribution_timeout: ATTRIBUTION_TIMEOUT,
            permission_cooldown: PERMISSION_COOLDOWN,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

impl LaunchConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_id.trim().is_empty() {
            return Err(ConfigError::MissingField("app_id"));
        }
        if self.dev_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::MissingField("dev_key"));
        }
        if self.bundle_id.trim().is_empty() {
            return Err(ConfigError::MissingField("bundle_id"));
        }
        check_endpoint("remote_config_url", &self.remote_config_url)?;
        check_endpoint("organic_validation_base_url", &self.organic_validation_base_url)?;
        Ok(())
    }

    #[must_use]
    pub fn store_id(&self) -> String {
        format!("id{}", self.app_id)
    }
}

fn check_endpoint(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidEndpoint {
        field,
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEndpoint {
            field,
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
