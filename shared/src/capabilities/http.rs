//! The two outbound calls as Crux capabilities: remote config and organic
//! install validation.
//!
//! The core only describes the request; the shell performs it (see
//! `crate::shell::http` for the reqwest adapters) and resolves with the
//! parsed outcome.

use crux_core::capability::{CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::AttributionPayload;
use crate::requests::{ConfigRequest, OrganicValidationRequest, RemoteGrant};

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP error {status}")]
    Status { status: u16 },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("response missing field '{0}'")]
    MissingField(String),

    #[error("server declined the request")]
    Rejected,

    #[error("device attribution id unavailable")]
    MissingDeviceId,

    #[error("client setup failed: {0}")]
    Client(String),
}

impl HttpError {
    /// Failures that happened before the server produced an answer.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

// --- remote config ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum RemoteConfigOperation {
    /// POST the merged attribution to the config endpoint.
    Fetch(ConfigRequest),
}

impl Operation for RemoteConfigOperation {
    type Output = Result<RemoteGrant, HttpError>;
}

#[derive(crux_core::macros::Capability)]
pub struct RemoteConfig<Ev> {
    context: CapabilityContext<RemoteConfigOperation, Ev>,
}

impl<Ev> Clone for RemoteConfig<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> RemoteConfig<Ev> {
    pub fn new(context: CapabilityContext<RemoteConfigOperation, Ev>) -> Self {
        Self { context }
    }
}

impl<Ev> RemoteConfig<Ev>
where
    Ev: 'static,
{
    pub fn fetch<F>(&self, request: ConfigRequest, make_event: F)
    where
        F: FnOnce(Result<RemoteGrant, HttpError>) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(RemoteConfigOperation::Fetch(request))
                .await;
            context.update_app(make_event(result));
        });
    }
}

// --- organic install validation ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum InstallValidationOperation {
    Validate(OrganicValidationRequest),
}

impl Operation for InstallValidationOperation {
    type Output = Result<AttributionPayload, HttpError>;
}

#[derive(crux_core::macros::Capability)]
pub struct InstallValidation<Ev> {
    context: CapabilityContext<InstallValidationOperation, Ev>,
}

impl<Ev> Clone for InstallValidation<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> InstallValidation<Ev> {
    pub fn new(context: CapabilityContext<InstallValidationOperation, Ev>) -> Self {
        Self { context }
    }
}

impl<Ev> InstallValidation<Ev>
where
    Ev: 'static,
{
    pub fn validate<F>(&self, request: OrganicValidationRequest, make_event: F)
    where
        F: FnOnce(Result<AttributionPayload, HttpError>) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(InstallValidationOperation::Validate(request))
                .await;
            context.update_app(make_event(result));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors() {
        assert!(HttpError::Timeout.is_transport());
        assert!(HttpError::Network("reset".into()).is_transport());
        assert!(!HttpError::Status { status: 500 }.is_transport());
        assert!(!HttpError::Rejected.is_transport());
    }

    #[test]
    fn test_error_crosses_the_bridge() {
        let error = HttpError::MissingField("expires".into());
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(serde_json::from_str::<HttpError>(&json).unwrap(), error);
        assert_eq!(error.to_string(), "response missing field 'expires'");
    }
}
