//! Persisted launch state.
//!
//! The core keeps a [`LaunchState`] snapshot in its model. It is filled from
//! the shell's key-value store once at start; every change updates the
//! snapshot and writes through with `crux_kv`. Reads of undecodable entries
//! degrade to "absent" and failed writes are logged with their key: a broken
//! store must never keep the engine from landing in a renderable stage.

use crux_kv::KeyValue;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::capabilities::kv::{KvError, LaunchKey};
use crate::error::LaunchError;
use crate::event::Event;
use crate::model::{AppMode, Destination, UnixTimeMs};

/// Snapshot of the notification-permission bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationPrefs {
    pub accepted: Option<bool>,
    pub declined_permanently: Option<bool>,
    pub last_asked_at: Option<UnixTimeMs>,
}

impl NotificationPrefs {
    /// Granted, or permanently declined: either way no prompt is shown again.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.accepted == Some(true) || self.declined_permanently == Some(true)
    }

    #[must_use]
    pub fn asked_within(&self, now: UnixTimeMs, cooldown: Duration) -> bool {
        let cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX);
        self.last_asked_at
            .is_some_and(|asked| now.elapsed_since(asked) < cooldown_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchState {
    has_ever_run_before: bool,
    app_mode: Option<AppMode>,
    saved_destination: Option<Destination>,
    saved_expiry: Option<f64>,
    temp_destination: Option<Destination>,
    /// A temp entry exists in the store, even if it did not decode.
    temp_entry_stored: bool,
    notifications: NotificationPrefs,
}

impl LaunchState {
    /// Folds one stored entry into the snapshot.
    pub fn load(&mut self, key: LaunchKey, bytes: &[u8]) {
        match key {
            LaunchKey::HasEverRunBefore => {
                self.has_ever_run_before = decode(key, bytes).unwrap_or(false);
            }
            LaunchKey::AppMode => self.app_mode = decode(key, bytes),
            LaunchKey::SavedDestination => self.saved_destination = decode(key, bytes),
            LaunchKey::SavedExpiry => self.saved_expiry = decode(key, bytes),
            LaunchKey::TempDestination => {
                self.temp_entry_stored = true;
                self.temp_destination = decode(key, bytes);
            }
            LaunchKey::AcceptedNotifications => self.notifications.accepted = decode(key, bytes),
            LaunchKey::DeclinedNotificationsPermanently => {
                self.notifications.declined_permanently = decode(key, bytes);
            }
            LaunchKey::LastNotificationAsk => {
                self.notifications.last_asked_at = decode(key, bytes);
            }
        }
    }

    // --- launch decision ---

    #[must_use]
    pub const fn has_ever_run_before(&self) -> bool {
        self.has_ever_run_before
    }

    #[must_use]
    pub const fn app_mode(&self) -> Option<AppMode> {
        self.app_mode
    }

    /// A stored destination that no longer validates counts as absent.
    pub fn saved_destination(&self) -> Option<&Destination> {
        self.saved_destination.as_ref()
    }

    #[must_use]
    pub const fn saved_expiry(&self) -> Option<f64> {
        self.saved_expiry
    }

    pub fn temp_destination(&self) -> Option<&Destination> {
        self.temp_destination.as_ref()
    }

    /// Success path of remote config: destination, expiry and sticky mode.
    pub fn record_remote_grant(
        &mut self,
        kv: &KeyValue<Event>,
        destination: &Destination,
        expires: f64,
    ) {
        self.saved_destination = Some(destination.clone());
        self.saved_expiry = Some(expires);
        persist(kv, LaunchKey::SavedDestination, destination);
        persist(kv, LaunchKey::SavedExpiry, &expires);
        self.set_app_mode(kv, AppMode::Remote);
        self.set_has_ever_run_before(kv);
    }

    pub fn record_classic_fallback(&mut self, kv: &KeyValue<Event>) {
        self.set_app_mode(kv, AppMode::Classic);
        self.set_has_ever_run_before(kv);
    }

    fn set_app_mode(&mut self, kv: &KeyValue<Event>, mode: AppMode) {
        self.app_mode = Some(mode);
        persist(kv, LaunchKey::AppMode, &mode);
    }

    fn set_has_ever_run_before(&mut self, kv: &KeyValue<Event>) {
        self.has_ever_run_before = true;
        persist(kv, LaunchKey::HasEverRunBefore, &true);
    }

    pub fn set_temp_destination(&mut self, kv: &KeyValue<Event>, destination: &Destination) {
        self.temp_destination = Some(destination.clone());
        self.temp_entry_stored = true;
        persist(kv, LaunchKey::TempDestination, destination);
    }

    /// Read-and-clear. The entry is removed even when it failed to decode.
    pub fn take_temp_destination(&mut self, kv: &KeyValue<Event>) -> Option<Destination> {
        if std::mem::take(&mut self.temp_entry_stored) {
            forget(kv, LaunchKey::TempDestination);
        }
        self.temp_destination.take()
    }

    /// Drops the sticky mode and the cached destination so the next launch
    /// re-runs attribution.
    pub fn reset(&mut self, kv: &KeyValue<Event>) {
        self.app_mode = None;
        self.saved_destination = None;
        self.saved_expiry = None;
        self.temp_destination = None;
        self.temp_entry_stored = false;
        for key in [
            LaunchKey::AppMode,
            LaunchKey::SavedDestination,
            LaunchKey::SavedExpiry,
            LaunchKey::TempDestination,
        ] {
            forget(kv, key);
        }
    }

    // --- notifications ---

    #[must_use]
    pub const fn notification_prefs(&self) -> NotificationPrefs {
        self.notifications
    }

    pub fn set_notifications_accepted(&mut self, kv: &KeyValue<Event>, accepted: bool) {
        self.notifications.accepted = Some(accepted);
        persist(kv, LaunchKey::AcceptedNotifications, &accepted);
    }

    pub fn set_notifications_declined_permanently(&mut self, kv: &KeyValue<Event>) {
        self.notifications.declined_permanently = Some(true);
        persist(kv, LaunchKey::DeclinedNotificationsPermanently, &true);
    }

    pub fn set_last_notification_ask(&mut self, kv: &KeyValue<Event>, at: UnixTimeMs) {
        self.notifications.last_asked_at = Some(at);
        persist(kv, LaunchKey::LastNotificationAsk, &at);
    }
}

/// Issues a read for every launch key. Each answer comes back as
/// `Event::StateLoaded`.
pub fn load_all(kv: &KeyValue<Event>) {
    for key in LaunchKey::ALL {
        kv.get(key.raw(), move |result| Event::StateLoaded {
            key,
            result: result.map_err(|e| format!("{e:?}")),
        });
    }
}

fn decode<T: DeserializeOwned>(key: LaunchKey, bytes: &[u8]) -> Option<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| {
            let e = KvError::Serialization {
                message: e.to_string(),
                key: key.name().to_string(),
            };
            report_failure(key, "read", e);
        })
        .ok()
}

fn persist<T: Serialize>(kv: &KeyValue<Event>, key: LaunchKey, value: &T) {
    match serde_json::to_vec(value) {
        Ok(bytes) => kv.set(key.raw(), bytes, move |result| Event::StateWritten {
            key,
            error: result.err().map(|e| format!("{e:?}")),
        }),
        Err(e) => report_failure(
            key,
            "write",
            KvError::Serialization {
                message: e.to_string(),
                key: key.name().to_string(),
            },
        ),
    }
}

fn forget(kv: &KeyValue<Event>, key: LaunchKey) {
    kv.delete(key.raw(), move |result| Event::StateWritten {
        key,
        error: result.err().map(|e| format!("{e:?}")),
    });
}

pub(crate) fn report_failure(key: LaunchKey, op: &'static str, e: KvError) {
    let err = LaunchError::from(e);
    warn!(
        key = key.name(),
        op,
        code = err.kind().code(),
        error = %err,
        "launch state store degraded"
    );
}
