//! Keys for the launch state kept in the shell's key-value store.
//!
//! The core reads and writes through `crux_kv::KeyValue`; every key it uses
//! is a [`LaunchKey`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_KEY_LENGTH: usize = 256;
pub const MAX_VALUE_SIZE: usize = 64 * 1024;
pub const MAX_PREFIX_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey {
    namespace: KeyNamespace,
    key: String,
}

impl KvKey {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self { namespace, key })
    }

    pub fn raw(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.key)
    }

    /// Inverse of [`KvKey::raw`]. The shell checks every key the core hands
    /// it before touching storage.
    pub fn parse(raw: &str) -> Result<Self, KvError> {
        let (prefix, key) = raw.split_once(':').ok_or_else(|| KvError::InvalidKey {
            key: raw.chars().take(50).collect(),
            reason: "key has no namespace".to_string(),
        })?;
        let namespace = match prefix {
            "launch" => KeyNamespace::Launch,
            "notifications" => KeyNamespace::Notifications,
            other => KeyNamespace::custom(other)?,
        };
        Self::new(namespace, key)
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        let invalid = |reason: &str| KvError::InvalidKey {
            key: key.chars().take(50).collect(),
            reason: reason.to_string(),
        };

        if key.trim().is_empty() {
            return Err(invalid("key cannot be empty"));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(invalid(&format!(
                "key exceeds maximum length of {MAX_KEY_LENGTH} bytes"
            )));
        }
        if key.contains("..") {
            return Err(invalid("key cannot contain path traversal sequences"));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(invalid("key cannot start with path separator"));
        }
        if key.chars().any(char::is_control) {
            return Err(invalid("key contains control characters"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyNamespace {
    Launch,
    Notifications,
    Custom(String),
}

impl KeyNamespace {
    pub fn prefix(&self) -> &str {
        match self {
            KeyNamespace::Launch => "launch",
            KeyNamespace::Notifications => "notifications",
            KeyNamespace::Custom(s) => s.as_str(),
        }
    }

    pub fn custom(prefix: impl Into<String>) -> Result<Self, KvError> {
        let prefix = prefix.into();
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LENGTH {
            return Err(KvError::InvalidKey {
                key: prefix,
                reason: format!("custom namespace must be 1..={MAX_PREFIX_LENGTH} bytes"),
            });
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(KvError::InvalidKey {
                key: prefix,
                reason: "custom namespace contains invalid characters".to_string(),
            });
        }
        Ok(KeyNamespace::Custom(prefix))
    }
}

/// Every durable entry the launch engine reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchKey {
    HasEverRunBefore,
    AppMode,
    SavedDestination,
    SavedExpiry,
    TempDestination,
    AcceptedNotifications,
    DeclinedNotificationsPermanently,
    LastNotificationAsk,
}

impl LaunchKey {
    pub const ALL: [Self; 8] = [
        Self::HasEverRunBefore,
        Self::AppMode,
        Self::SavedDestination,
        Self::SavedExpiry,
        Self::TempDestination,
        Self::AcceptedNotifications,
        Self::DeclinedNotificationsPermanently,
        Self::LastNotificationAsk,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::HasEverRunBefore => "has_ever_run_before",
            Self::AppMode => "app_mode",
            Self::SavedDestination => "saved_destination",
            Self::SavedExpiry => "saved_expiry",
            Self::TempDestination => "temp_destination",
            Self::AcceptedNotifications => "accepted",
            Self::DeclinedNotificationsPermanently => "declined_permanently",
            Self::LastNotificationAsk => "last_ask_ms",
        }
    }

    pub fn namespace(self) -> KeyNamespace {
        match self {
            Self::AcceptedNotifications
            | Self::DeclinedNotificationsPermanently
            | Self::LastNotificationAsk => KeyNamespace::Notifications,
            _ => KeyNamespace::Launch,
        }
    }

    pub fn key(self) -> KvKey {
        // Names are constants covered by `test_launch_keys_are_valid`.
        KvKey {
            namespace: self.namespace(),
            key: self.name().to_string(),
        }
    }

    /// The string the shell store sees, e.g. `launch:app_mode`.
    pub fn raw(self) -> String {
        self.key().raw()
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("serialization error for '{key}': {message}")]
    Serialization { message: String, key: String },
}

impl KvError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
