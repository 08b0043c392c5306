use crate::capabilities::{HttpError, LaunchKey, PermissionState, PushError, Timer, TimerId};
use crate::model::{ConnectivityStatus, LaunchContext};
use crate::payload::{AttributionPayload, DeeplinkPayload};
use crate::requests::RemoteGrant;

/// Everything that can move the launch engine. Inputs from the host and SDKs
/// plus completions of capability requests.
#[derive(Debug, Clone)]
pub enum Event {
    Noop,

    Started(LaunchContext),

    // persisted state
    StateLoaded {
        key: LaunchKey,
        result: Result<Option<Vec<u8>>, String>,
    },
    StateWritten {
        key: LaunchKey,
        error: Option<String>,
    },

    AttributionReceived(AttributionPayload),
    AttributionFailed {
        reason: String,
    },
    DeeplinkResolved(DeeplinkPayload),

    ConnectivityChanged(ConnectivityStatus),

    /// Answer from the in-app prompt shown before the OS dialog.
    PushPermissionAnswered {
        allowed: bool,
    },
    OsPermissionResolved(Result<PermissionState, PushError>),
    PushTokenReceived {
        token: String,
    },
    /// A notification tap carrying a destination url.
    PushDestinationReceived {
        url: String,
    },

    OrganicValidationCompleted(Result<AttributionPayload, HttpError>),
    RemoteConfigCompleted(Result<RemoteGrant, HttpError>),
    TimerElapsed {
        timer: Timer,
        id: TimerId,
    },

    ResetRequested,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Started(_) => "started",
            Self::StateLoaded { .. } => "state_loaded",
            Self::StateWritten { .. } => "state_written",
            Self::AttributionReceived(_) => "attribution_received",
            Self::AttributionFailed { .. } => "attribution_failed",
            Self::DeeplinkResolved(_) => "deeplink_resolved",
            Self::ConnectivityChanged(_) => "connectivity_changed",
            Self::PushPermissionAnswered { .. } => "push_permission_answered",
            Self::OsPermissionResolved(_) => "os_permission_resolved",
            Self::PushTokenReceived { .. } => "push_token_received",
            Self::PushDestinationReceived { .. } => "push_destination_received",
            Self::OrganicValidationCompleted(_) => "organic_validation_completed",
            Self::RemoteConfigCompleted(_) => "remote_config_completed",
            Self::TimerElapsed { .. } => "timer_elapsed",
            Self::ResetRequested => "reset_requested",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::PushPermissionAnswered { .. }
                | Self::PushDestinationReceived { .. }
                | Self::ResetRequested
        )
    }

    /// Events the engine handles before persisted state has loaded. Anything
    /// else waits until the snapshot is complete.
    #[must_use]
    pub const fn is_bootstrap(&self) -> bool {
        matches!(
            self,
            Self::Noop | Self::Started(_) | Self::StateLoaded { .. } | Self::StateWritten { .. }
        )
    }
}
