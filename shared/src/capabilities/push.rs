use crux_core::capability::{CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PermissionState {
    #[default]
    NotDetermined,
    Denied,
    Authorized,
    Provisional,
    Ephemeral,
}

impl PermissionState {
    #[must_use]
    pub const fn is_authorized(self) -> bool {
        matches!(self, Self::Authorized | Self::Provisional | Self::Ephemeral)
    }

    #[must_use]
    pub const fn is_denied(self) -> bool {
        matches!(self, Self::Denied)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", content = "data")]
pub enum PushOperation {
    /// Show the OS notification permission dialog.
    RequestAuthorization,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum PushError {
    #[error("push notifications not available on this platform")]
    NotAvailable,

    #[error("permission request failed: {message}")]
    RequestFailed { message: String },

    #[error("operation timed out")]
    Timeout,
}

impl PushError {
    #[must_use]
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::RequestFailed {
            message: message.into(),
        }
    }
}

#[must_use = "push operation results must be handled"]
pub type PushResult = Result<PermissionState, PushError>;

impl Operation for PushOperation {
    type Output = PushResult;
}

/// The OS notification permission dialog.
///
/// Registering for remote notifications on a grant is the shell's job; the
/// resulting token comes back as `Event::PushTokenReceived`.
#[derive(crux_core::macros::Capability)]
pub struct Push<Ev> {
    context: CapabilityContext<PushOperation, Ev>,
}

impl<Ev> Clone for Push<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Push<Ev> {
    pub fn new(context: CapabilityContext<PushOperation, Ev>) -> Self {
        Self { context }
    }
}

impl<Ev> Push<Ev>
where
    Ev: 'static,
{
    pub fn request_authorization<F>(&self, make_event: F)
    where
        F: FnOnce(PushResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(PushOperation::RequestAuthorization)
                .await;
            context.update_app(make_event(result));
        });
    }
}
