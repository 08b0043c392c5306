use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

use crate::capabilities::{LaunchKey, Timer, TimerId};
use crate::clock::{Clock, SystemClock};
use crate::config::LaunchConfig;
use crate::event::Event;
use crate::launch_store::LaunchState;
use crate::payload::{AttributionPayload, DeeplinkPayload};

pub const MAX_DESTINATION_LENGTH: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid destination '{url}': {reason}")]
    InvalidDestination { url: String, reason: String },
}

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(LaunchSessionId);

impl LaunchSessionId {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Explicit timestamp unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self(ms)
    }

    #[must_use]
    pub const fn elapsed_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    #[must_use]
    pub const fn add_millis(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

/// A web destination the engine can hand to the presentation host.
///
/// Only absolute http(s) URLs with a host are accepted; anything else coming
/// back from the network or the store is treated as absent.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Destination(String);

impl Destination {
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let invalid = |reason: &str| ValidationError::InvalidDestination {
            url: truncate(&raw),
            reason: reason.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(invalid("destination cannot be empty"));
        }
        if raw.len() > MAX_DESTINATION_LENGTH {
            return Err(invalid("destination is too long"));
        }

        let parsed = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
        }
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(invalid("destination must have a host"));
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(invalid("credentials in destination are not allowed"));
        }

        // Keep the caller's spelling; `Url` would append a trailing slash.
        Ok(Self(raw.trim().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Destination {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Destination> for String {
    fn from(value: Destination) -> Self {
        value.0
    }
}

fn truncate(url: &str) -> String {
    if url.len() <= 100 {
        url.to_string()
    } else {
        let mut end = 100;
        while !url.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &url[..end])
    }
}

/// Sticky launch mode persisted across cold starts.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    Classic,
    Remote,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub enum LaunchStage {
    #[default]
    Booting,
    WebExperience {
        destination: Destination,
    },
    ClassicFlow,
    OfflineScreen,
}

impl LaunchStage {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Booting => "booting",
            Self::WebExperience { .. } => "web_experience",
            Self::ClassicFlow => "classic_flow",
            Self::OfflineScreen => "offline_screen",
        }
    }

    #[must_use]
    pub const fn is_booting(&self) -> bool {
        matches!(self, Self::Booting)
    }

    /// Stages from which the decision procedure may still move.
    #[must_use]
    pub const fn is_deciding(&self) -> bool {
        matches!(self, Self::Booting | Self::OfflineScreen)
    }

    pub fn destination(&self) -> Option<&Destination> {
        match self {
            Self::WebExperience { destination } => Some(destination),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    #[default]
    Restored,
    Lost,
}

impl ConnectivityStatus {
    #[must_use]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Restored)
    }
}

/// Host facts the engine needs to build outbound requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceContext {
    pub attribution_id: Option<String>,
    pub locale: String,
}

impl DeviceContext {
    /// `locale` is whatever the platform reports (`en_US`, `pt-BR`, `fr`).
    pub fn new(attribution_id: Option<String>, locale: Option<&str>) -> Self {
        Self {
            attribution_id: attribution_id.filter(|id| !id.trim().is_empty()),
            locale: normalize_locale(locale),
        }
    }
}

impl Default for DeviceContext {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Upper-cased two letter language code, `EN` when unknown.
#[must_use]
pub fn normalize_locale(locale: Option<&str>) -> String {
    locale
        .map(str::trim)
        .and_then(|l| l.split(&['_', '-'][..]).next())
        .filter(|code| code.len() >= 2 && code.chars().take(2).all(|c| c.is_ascii_alphabetic()))
        .map(|code| code[..2].to_ascii_uppercase())
        .unwrap_or_else(|| "EN".to_string())
}

/// What the host hands the core with `Event::Started`.
#[derive(Clone)]
pub struct LaunchContext {
    pub config: Arc<LaunchConfig>,
    pub device: DeviceContext,
    pub clock: Arc<dyn Clock>,
}

impl LaunchContext {
    pub fn new(config: LaunchConfig, device: DeviceContext) -> Self {
        Self {
            config: Arc::new(config),
            device,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for LaunchContext {
    fn default() -> Self {
        Self::new(LaunchConfig::default(), DeviceContext::default())
    }
}

impl fmt::Debug for LaunchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchContext")
            .field("config", &self.config)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

/// In-memory state owned by a single engine instance.
#[derive(Debug)]
pub struct Model {
    pub session: LaunchSessionId,
    pub stage: LaunchStage,
    pub permission_prompt_visible: bool,
    pub push_token: Option<String>,

    pub(crate) context: LaunchContext,
    /// Mirror of the persisted launch state; writes go through to the store.
    pub(crate) state: LaunchState,
    pub(crate) started: bool,
    /// Keys still being read from the store after `Started`.
    pub(crate) pending_loads: HashSet<LaunchKey>,
    pub(crate) loaded: bool,
    /// Inputs that arrived before the store finished loading.
    pub(crate) deferred: Vec<Event>,

    /// Set once attribution is received, fails, times out, or is skipped
    /// by the sticky fast path.
    pub(crate) attribution_settled: bool,
    /// Accumulated attribution (with deeplink fields folded in).
    pub(crate) attribution: Option<AttributionPayload>,
    pub(crate) deeplink: Option<DeeplinkPayload>,
    /// The payload that will be sent to remote config.
    pub(crate) config_payload: AttributionPayload,

    pub(crate) armed_timers: HashMap<Timer, TimerId>,
    pub(crate) last_timer_id: u64,
    pub(crate) organic_validation_pending: bool,
    pub(crate) remote_config_in_flight: bool,
    pub(crate) permission_request_in_flight: bool,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            session: LaunchSessionId::generate(),
            stage: LaunchStage::Booting,
            permission_prompt_visible: false,
            push_token: None,
            context: LaunchContext::default(),
            state: LaunchState::default(),
            started: false,
            pending_loads: HashSet::new(),
            loaded: false,
            deferred: Vec::new(),
            attribution_settled: false,
            attribution: None,
            deeplink: None,
            config_payload: AttributionPayload::default(),
            armed_timers: HashMap::new(),
            last_timer_id: 0,
            organic_validation_pending: false,
            remote_config_in_flight: false,
            permission_request_in_flight: false,
        }
    }
}

impl Model {
    pub fn device(&self) -> &DeviceContext {
        &self.context.device
    }

    pub fn launch_state(&self) -> &LaunchState {
        &self.state
    }

    /// True once every persisted key has been read back.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn attribution(&self) -> Option<&AttributionPayload> {
        self.attribution.as_ref()
    }

    pub fn deeplink(&self) -> Option<&DeeplinkPayload> {
        self.deeplink.as_ref()
    }

    #[must_use]
    pub fn is_armed(&self, timer: Timer) -> bool {
        self.armed_timers.contains_key(&timer)
    }

    #[must_use]
    pub const fn is_remote_config_in_flight(&self) -> bool {
        self.remote_config_in_flight
    }

    #[must_use]
    pub const fn is_organic_validation_pending(&self) -> bool {
        self.organic_validation_pending
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Screen {
    Splash,
    /// Overlay drawn on top of the splash while booting.
    PermissionPrompt,
    WebExperience {
        url: String,
    },
    Classic,
    Offline,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewModel {
    pub screen: Screen,
    pub session_id: String,
}

impl ViewModel {
    /// True once the host has left the splash/prompt screens.
    #[must_use]
    pub const fn is_decided(&self) -> bool {
        !matches!(self.screen, Screen::Splash | Screen::PermissionPrompt)
    }
}

impl From<&Model> for ViewModel {
    fn from(model: &Model) -> Self {
        let screen = match &model.stage {
            LaunchStage::Booting if model.permission_prompt_visible => Screen::PermissionPrompt,
            LaunchStage::Booting => Screen::Splash,
            LaunchStage::WebExperience { destination } => Screen::WebExperience {
                url: destination.to_string(),
            },
            LaunchStage::ClassicFlow => Screen::Classic,
            LaunchStage::OfflineScreen => Screen::Offline,
        };
        Self {
            screen,
            session_id: model.session.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_accepts_https() {
        let dest = Destination::parse("https://x/y").unwrap();
        assert_eq!(dest.as_str(), "https://x/y");
    }

    #[test]
    fn destination_rejects_garbage() {
        assert!(Destination::parse("").is_err());
        assert!(Destination::parse("   ").is_err());
        assert!(Destination::parse("javascript:alert(1)").is_err());
        assert!(Destination::parse("ftp://files.com").is_err());
        assert!(Destination::parse("https://user:pw@host.com").is_err());
        assert!(Destination::parse("not a url").is_err());
    }

    #[test]
    fn destination_serde_validates() {
        let ok: Destination = serde_json::from_str("\"https://w\"").unwrap();
        assert_eq!(ok.as_str(), "https://w");
        assert!(serde_json::from_str::<Destination>("\"mailto:a@b.c\"").is_err());
    }

    #[test]
    fn locale_is_normalized() {
        assert_eq!(normalize_locale(Some("en_US")), "EN");
        assert_eq!(normalize_locale(Some("pt-BR")), "PT");
        assert_eq!(normalize_locale(Some("fr")), "FR");
        assert_eq!(normalize_locale(Some("")), "EN");
        assert_eq!(normalize_locale(Some("1x")), "EN");
        assert_eq!(normalize_locale(None), "EN");
    }

    #[test]
    fn blank_attribution_id_is_dropped() {
        let device = DeviceContext::new(Some("  ".into()), None);
        assert!(device.attribution_id.is_none());
        assert_eq!(DeviceContext::default().locale, "EN");
    }

    #[test]
    fn context_debug_skips_clock() {
        let rendered = format!("{:?}", LaunchContext::default());
        assert!(rendered.contains("DeviceContext"));
        assert!(!rendered.contains("clock"));
    }

    #[test]
    fn view_model_maps_every_stage() {
        let mut model = Model::default();
        assert_eq!(ViewModel::from(&model).screen, Screen::Splash);

        model.permission_prompt_visible = true;
        assert_eq!(ViewModel::from(&model).screen, Screen::PermissionPrompt);

        model.stage = LaunchStage::ClassicFlow;
        assert_eq!(ViewModel::from(&model).screen, Screen::Classic);
        assert!(ViewModel::from(&model).is_decided());

        model.stage = LaunchStage::OfflineScreen;
        assert_eq!(ViewModel::from(&model).screen, Screen::Offline);

        model.stage = LaunchStage::WebExperience {
            destination: Destination::parse("https://w").unwrap(),
        };
        assert_eq!(
            ViewModel::from(&model).screen,
            Screen::WebExperience {
                url: "https://w".into()
            }
        );
    }

    #[test]
    fn time_arithmetic_saturates() {
        let t = UnixTimeMs(10);
        assert_eq!(t.elapsed_since(UnixTimeMs(20)), 0);
        assert_eq!(UnixTimeMs(u64::MAX).add_millis(5), UnixTimeMs(u64::MAX));
    }
}
