use thiserror::Error;

use crate::capabilities::{HttpError, KvError, PushError};
use crate::config::ConfigError;
use crate::model::ValidationError;
use crate::shell::AttributionError;

/// Coarse failure taxonomy. Every kind resolves to a fallback stage; none is
/// fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    AttributionUnavailable,
    OrganicValidation,
    RemoteConfig,
    ConnectivityLost,
    Permission,
    Storage,
    Configuration,
    Validation,
}

impl FailureKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::AttributionUnavailable => "ATTRIBUTION_UNAVAILABLE",
            Self::OrganicValidation => "ORGANIC_VALIDATION_FAILED",
            Self::RemoteConfig => "REMOTE_CONFIG_FAILED",
            Self::ConnectivityLost => "CONNECTIVITY_LOST",
            Self::Permission => "PERMISSION_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::Configuration => "CONFIG_ERROR",
            Self::Validation => "VALIDATION_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("attribution unavailable: {0}")]
    Attribution(#[from] AttributionError),

    #[error("organic validation failed: {0}")]
    OrganicValidation(HttpError),

    #[error("remote config failed: {0}")]
    RemoteConfig(HttpError),

    #[error("connectivity lost")]
    ConnectivityLost,

    #[error("push permission error: {0}")]
    Push(#[from] PushError),

    #[error("storage error: {0}")]
    Storage(#[from] KvError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl LaunchError {
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Attribution(_) => FailureKind::AttributionUnavailable,
            Self::OrganicValidation(_) => FailureKind::OrganicValidation,
            Self::RemoteConfig(_) => FailureKind::RemoteConfig,
            Self::ConnectivityLost => FailureKind::ConnectivityLost,
            Self::Push(_) => FailureKind::Permission,
            Self::Storage(_) => FailureKind::Storage,
            Self::Config(_) => FailureKind::Configuration,
            Self::Validation(_) => FailureKind::Validation,
        }
    }
}
