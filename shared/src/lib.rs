// lib.rs - launch director shared core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]

pub mod capabilities;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod launch_store;
pub mod model;
pub mod payload;
pub mod requests;
pub mod shell;

pub use capabilities::{Capabilities, Effect, Timer, TimerId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, LaunchConfig};
pub use engine::LaunchEngine;
pub use error::{FailureKind, LaunchError};
pub use event::Event;
pub use launch_store::{LaunchState, NotificationPrefs};
pub use model::{
    AppMode, ConnectivityStatus, Destination, DeviceContext, LaunchContext, LaunchSessionId,
    LaunchStage, Model, Screen, UnixTimeMs, ViewModel,
};
pub use payload::{AttributionPayload, DeeplinkPayload};
pub use requests::{ConfigRequest, OrganicValidationRequest, RemoteGrant};
pub use shell::{HostServices, LaunchHandle, LaunchRuntime, RuntimeClosed};
