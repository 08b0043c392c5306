//! The launch decision engine.
//!
//! `LaunchEngine` is a Crux app: `update` consumes one [`Event`], mutates the
//! model and the persisted launch state, and asks the shell for work through
//! [`Capabilities`]. It never awaits; every asynchronous step comes back in as
//! another event.

use tracing::{debug, info, instrument, warn};

use crate::capabilities::{
    Capabilities, HttpError, KvError, LaunchKey, PermissionState, PushError, Timer, TimerId,
    TimerOutput,
};
use crate::error::LaunchError;
use crate::event::Event;
use crate::launch_store::{load_all, report_failure};
use crate::model::{
    AppMode, ConnectivityStatus, Destination, LaunchContext, LaunchStage, Model, ViewModel,
};
use crate::payload::{AttributionPayload, DeeplinkPayload};
use crate::requests::{ConfigRequest, OrganicValidationRequest, RemoteGrant};

#[derive(Default)]
pub struct LaunchEngine;

impl crux_core::App for LaunchEngine {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    #[instrument(
        skip_all,
        fields(session = %model.session, event = event.name(), user = event.is_user_initiated())
    )]
    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        if !model.loaded && !event.is_bootstrap() {
            debug!("launch state still loading, deferring");
            model.deferred.push(event);
            return;
        }

        let before = ViewModel::from(&*model);
        Self::dispatch(event, model, caps);
        if ViewModel::from(&*model) != before {
            caps.render.render();
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        ViewModel::from(model)
    }
}

impl LaunchEngine {
    fn dispatch(event: Event, model: &mut Model, caps: &Capabilities) {
        match event {
            Event::Noop => {}
            Event::Started(context) => Self::on_started(context, model, caps),
            Event::StateLoaded { key, result } => Self::on_state_loaded(key, result, model, caps),
            Event::StateWritten { key, error } => {
                if let Some(error) = error {
                    report_failure(key, "write", KvError::storage(error));
                }
            }
            Event::AttributionReceived(payload) => Self::on_attribution(payload, model, caps),
            Event::AttributionFailed { reason } => {
                warn!(%reason, code = "ATTRIBUTION_UNAVAILABLE", "attribution failed");
                Self::on_attribution_missing(model, caps);
            }
            Event::DeeplinkResolved(deeplink) => Self::on_deeplink(deeplink, model, caps),
            Event::ConnectivityChanged(status) => Self::on_connectivity(status, model, caps),
            Event::PushPermissionAnswered { allowed } => {
                Self::on_prompt_answer(allowed, model, caps);
            }
            Event::OsPermissionResolved(result) => Self::on_os_permission(result, model, caps),
            Event::PushTokenReceived { token } => {
                let token = token.trim();
                if token.is_empty() {
                    debug!("ignoring blank push token");
                } else {
                    model.push_token = Some(token.to_string());
                }
            }
            Event::PushDestinationReceived { url } => Self::on_push_destination(url, model, caps),
            Event::OrganicValidationCompleted(result) => {
                Self::on_organic_result(result, model, caps);
            }
            Event::RemoteConfigCompleted(result) => Self::on_remote_config(result, model, caps),
            Event::TimerElapsed { timer, id } => Self::on_timer(timer, id, model, caps),
            Event::ResetRequested => {
                model.state.reset(&caps.key_value);
                info!("sticky launch mode reset");
            }
        }
    }

    fn on_started(context: LaunchContext, model: &mut Model, caps: &Capabilities) {
        if model.started {
            debug!("engine already started");
            return;
        }
        model.started = true;
        model.context = context;
        model.pending_loads = LaunchKey::ALL.into_iter().collect();
        load_all(&caps.key_value);
    }

    fn on_state_loaded(
        key: LaunchKey,
        result: Result<Option<Vec<u8>>, String>,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        if !model.pending_loads.remove(&key) {
            debug!(key = key.name(), "ignoring unrequested state load");
            return;
        }
        match result {
            Ok(Some(bytes)) => model.state.load(key, &bytes),
            Ok(None) => {}
            Err(e) => report_failure(key, "read", KvError::storage(e)),
        }
        if !model.pending_loads.is_empty() {
            return;
        }

        model.loaded = true;
        debug!(deferred = model.deferred.len(), "launch state loaded");
        Self::begin(model, caps);
        for event in std::mem::take(&mut model.deferred) {
            Self::dispatch(event, model, caps);
        }
    }

    /// Sticky fast path, or arm the attribution timeout.
    fn begin(model: &mut Model, caps: &Capabilities) {
        match model.state.app_mode() {
            Some(AppMode::Remote) => {
                model.attribution_settled = true;
                let destination = model
                    .state
                    .take_temp_destination(&caps.key_value)
                    .or_else(|| model.state.saved_destination().cloned());
                info!(
                    has_destination = destination.is_some(),
                    "remote mode persisted, skipping attribution"
                );
                match destination {
                    Some(destination) => {
                        Self::transition(model, LaunchStage::WebExperience { destination });
                    }
                    None => Self::transition(model, LaunchStage::ClassicFlow),
                }
            }
            Some(AppMode::Classic) => {
                model.attribution_settled = true;
                info!("classic mode persisted, skipping attribution");
                Self::transition(model, LaunchStage::ClassicFlow);
            }
            None => Self::start_timer(Timer::AttributionTimeout, model, caps),
        }
    }

    // --- timers ---

    fn start_timer(timer: Timer, model: &mut Model, caps: &Capabilities) {
        let config = &model.context.config;
        let after = match timer {
            Timer::AttributionTimeout => config.attribution_timeout,
            Timer::DeeplinkMerge => config.deeplink_merge_window,
            Timer::OrganicValidation => config.organic_validation_delay,
        };
        model.last_timer_id += 1;
        let id = TimerId(model.last_timer_id);
        if let Some(previous) = model.armed_timers.insert(timer, id) {
            caps.timers.cancel(previous);
        }
        caps.timers.start(id, timer, after, move |output| match output {
            TimerOutput::Elapsed => Event::TimerElapsed { timer, id },
            TimerOutput::Cancelled => Event::Noop,
        });
    }

    fn cancel_timer(timer: Timer, model: &mut Model, caps: &Capabilities) {
        if let Some(id) = model.armed_timers.remove(&timer) {
            caps.timers.cancel(id);
        }
    }

    fn on_timer(timer: Timer, id: TimerId, model: &mut Model, caps: &Capabilities) {
        if model.armed_timers.get(&timer) != Some(&id) {
            debug!(timer = timer.name(), id = id.0, "ignoring stale timer");
            return;
        }
        model.armed_timers.remove(&timer);
        debug!(timer = timer.name(), "timer elapsed");

        match timer {
            Timer::AttributionTimeout => {
                if model.attribution_settled {
                    return;
                }
                warn!(
                    after_ms = model.context.config.attribution_timeout.as_millis() as u64,
                    code = "ATTRIBUTION_UNAVAILABLE",
                    "attribution timed out"
                );
                Self::on_attribution_missing(model, caps);
            }
            Timer::DeeplinkMerge => {
                // Cache only; a deeplink on its own never decides the stage.
                if !model.attribution_settled {
                    if let Some(deeplink) = &model.deeplink {
                        model.attribution = Some(AttributionPayload::from(deeplink.clone()));
                    }
                }
            }
            Timer::OrganicValidation => Self::start_organic_validation(model, caps),
        }
    }

    // --- attribution ---

    /// Marks attribution as settled. Returns false when it already was.
    fn settle_attribution(model: &mut Model, caps: &Capabilities) -> bool {
        if model.attribution_settled {
            return false;
        }
        model.attribution_settled = true;
        Self::cancel_timer(Timer::AttributionTimeout, model, caps);
        Self::cancel_timer(Timer::DeeplinkMerge, model, caps);
        true
    }

    fn on_attribution(payload: AttributionPayload, model: &mut Model, caps: &Capabilities) {
        if !Self::settle_attribution(model, caps) {
            debug!("attribution already settled, ignoring payload");
            return;
        }
        let merged = payload.merged_with(model.deeplink.as_ref());
        info!(
            fields = merged.len(),
            af_status = merged.af_status().unwrap_or("unknown"),
            "attribution received"
        );
        model.attribution = Some(merged.clone());
        Self::evaluate(merged, model, caps);
    }

    /// Failure and timeout both evaluate an empty payload, even when the
    /// merge window already cached a deeplink.
    fn on_attribution_missing(model: &mut Model, caps: &Capabilities) {
        if !Self::settle_attribution(model, caps) {
            debug!("attribution already settled");
            return;
        }
        Self::evaluate(AttributionPayload::default(), model, caps);
    }

    fn on_deeplink(deeplink: DeeplinkPayload, model: &mut Model, caps: &Capabilities) {
        debug!(fields = deeplink.len(), "deeplink resolved");
        Self::cancel_timer(Timer::DeeplinkMerge, model, caps);

        if model.attribution_settled {
            if let Some(attribution) = model.attribution.take() {
                model.attribution = Some(attribution.merged_with(Some(&deeplink)));
            }
        } else {
            Self::start_timer(Timer::DeeplinkMerge, model, caps);
        }
        model.deeplink = Some(deeplink);
    }

    // --- decision ---

    fn evaluate(payload: AttributionPayload, model: &mut Model, caps: &Capabilities) {
        if !model.stage.is_deciding() {
            debug!(stage = model.stage.name(), "stage already decided");
            return;
        }

        if payload.is_empty() {
            match model.state.saved_destination().cloned() {
                Some(destination) => {
                    info!("no attribution, using saved destination");
                    Self::transition(model, LaunchStage::WebExperience { destination });
                }
                None => {
                    info!("no attribution and no saved destination");
                    Self::transition(model, LaunchStage::ClassicFlow);
                }
            }
            return;
        }

        if model.state.app_mode() == Some(AppMode::Classic) {
            Self::transition(model, LaunchStage::ClassicFlow);
            return;
        }

        if !model.state.has_ever_run_before() && payload.is_organic() {
            if !model.organic_validation_pending {
                info!(
                    delay_ms = model.context.config.organic_validation_delay.as_millis() as u64,
                    "organic first run, scheduling validation"
                );
                model.organic_validation_pending = true;
                Self::start_timer(Timer::OrganicValidation, model, caps);
            }
            return;
        }

        Self::resolve_destination(payload, model, caps);
    }

    /// Rules after the organic check: one-shot destination, then the
    /// permission prompt or remote config.
    fn resolve_destination(payload: AttributionPayload, model: &mut Model, caps: &Capabilities) {
        if let Some(destination) = model.state.take_temp_destination(&caps.key_value) {
            info!("consuming one-shot destination");
            Self::transition(model, LaunchStage::WebExperience { destination });
            return;
        }

        model.config_payload = payload;

        let prefs = model.state.notification_prefs();
        let now = model.context.clock.now();
        if !model.stage.is_booting()
            || prefs.is_resolved()
            || prefs.asked_within(now, model.context.config.permission_cooldown)
        {
            Self::request_remote_config(model, caps);
        } else {
            debug!("showing push permission prompt");
            model.permission_prompt_visible = true;
        }
    }

    fn start_organic_validation(model: &mut Model, caps: &Capabilities) {
        if !model.organic_validation_pending {
            return;
        }
        let request = match model.context.device.attribution_id.as_deref() {
            Some(device_id) => OrganicValidationRequest::build(&model.context.config, device_id),
            None => Err(HttpError::MissingDeviceId),
        };
        match request {
            Ok(request) => caps
                .install_validation
                .validate(request, Event::OrganicValidationCompleted),
            Err(e) => Self::on_organic_result(Err(e), model, caps),
        }
    }

    fn on_organic_result(
        result: Result<AttributionPayload, HttpError>,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        model.organic_validation_pending = false;
        match result {
            Ok(response) => {
                let merged = response.merged_with(model.deeplink.as_ref());
                info!(fields = merged.len(), "organic install validated");
                model.attribution = Some(merged.clone());
                if model.stage.is_deciding() {
                    Self::resolve_destination(merged, model, caps);
                }
            }
            Err(e) => {
                let err = LaunchError::OrganicValidation(e);
                warn!(code = err.kind().code(), error = %err, "falling back to classic");
                if model.stage.is_deciding() {
                    Self::transition(model, LaunchStage::ClassicFlow);
                }
            }
        }
    }

    // --- remote config ---

    fn request_remote_config(model: &mut Model, caps: &Capabilities) {
        if !model.stage.is_deciding() {
            debug!(stage = model.stage.name(), "skipping remote config");
            return;
        }
        if model.remote_config_in_flight {
            debug!("remote config already in flight");
            return;
        }
        model.remote_config_in_flight = true;
        let request = ConfigRequest::build(
            &model.config_payload,
            &model.context.device,
            model.push_token.as_deref(),
            &model.context.config,
        );
        debug!(fields = request.body().len(), "requesting remote config");
        caps.remote_config
            .fetch(request, Event::RemoteConfigCompleted);
    }

    fn on_remote_config(
        result: Result<RemoteGrant, HttpError>,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        model.remote_config_in_flight = false;
        match result {
            Ok(grant) => {
                info!(expires = grant.expires, "remote config granted");
                model
                    .state
                    .record_remote_grant(&caps.key_value, &grant.destination, grant.expires);
                if model.stage.is_deciding() {
                    Self::transition(
                        model,
                        LaunchStage::WebExperience {
                            destination: grant.destination,
                        },
                    );
                }
            }
            Err(e) => {
                let err = LaunchError::RemoteConfig(e);
                warn!(code = err.kind().code(), error = %err, "remote config failed");
                match model.state.saved_destination().cloned() {
                    Some(_) if model.stage == LaunchStage::OfflineScreen => {
                        debug!("staying offline");
                    }
                    Some(destination) => {
                        if model.stage.is_deciding() {
                            Self::transition(model, LaunchStage::WebExperience { destination });
                        }
                    }
                    None => {
                        model.state.record_classic_fallback(&caps.key_value);
                        Self::transition(model, LaunchStage::ClassicFlow);
                    }
                }
            }
        }
    }

    fn on_connectivity(status: ConnectivityStatus, model: &mut Model, caps: &Capabilities) {
        match status {
            ConnectivityStatus::Lost => {
                if model.stage == LaunchStage::OfflineScreen {
                    debug!("already offline");
                    return;
                }
                if model.state.app_mode() == Some(AppMode::Remote) {
                    let err = LaunchError::ConnectivityLost;
                    warn!(code = err.kind().code(), "connectivity lost in remote mode");
                    Self::transition(model, LaunchStage::OfflineScreen);
                } else {
                    Self::transition(model, LaunchStage::ClassicFlow);
                }
            }
            ConnectivityStatus::Restored => {
                if model.stage != LaunchStage::OfflineScreen {
                    return;
                }
                info!("connectivity restored, re-evaluating");
                let payload = model.attribution.clone().unwrap_or_default();
                Self::evaluate(payload, model, caps);
            }
        }
    }

    // --- notifications ---

    fn on_prompt_answer(allowed: bool, model: &mut Model, caps: &Capabilities) {
        if !model.permission_prompt_visible {
            debug!("no permission prompt showing");
            return;
        }
        if !allowed {
            let now = model.context.clock.now();
            model.state.set_last_notification_ask(&caps.key_value, now);
            model.permission_prompt_visible = false;
            Self::request_remote_config(model, caps);
            return;
        }
        if model.permission_request_in_flight {
            debug!("os permission dialog already requested");
            return;
        }
        model.permission_request_in_flight = true;
        caps.push.request_authorization(Event::OsPermissionResolved);
    }

    fn on_os_permission(
        result: Result<PermissionState, PushError>,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        model.permission_request_in_flight = false;
        let kv = &caps.key_value;
        match result {
            Ok(state) => {
                let granted = state.is_authorized();
                info!(granted, "os notification permission resolved");
                model.state.set_notifications_accepted(kv, granted);
                if !granted {
                    model.state.set_notifications_declined_permanently(kv);
                }
            }
            Err(e) => {
                let err = LaunchError::from(e);
                warn!(code = err.kind().code(), error = %err, "permission request failed");
                let now = model.context.clock.now();
                model.state.set_notifications_accepted(kv, false);
                model.state.set_last_notification_ask(kv, now);
            }
        }
        model.permission_prompt_visible = false;
        Self::request_remote_config(model, caps);
    }

    fn on_push_destination(url: String, model: &mut Model, caps: &Capabilities) {
        let destination = match Destination::parse(url) {
            Ok(destination) => destination,
            Err(e) => {
                let err = LaunchError::from(e);
                warn!(code = err.kind().code(), error = %err, "ignoring push destination");
                return;
            }
        };
        model.state.set_temp_destination(&caps.key_value, &destination);

        if matches!(model.stage, LaunchStage::WebExperience { .. }) {
            if let Some(destination) = model.state.take_temp_destination(&caps.key_value) {
                info!("switching to push destination");
                Self::transition(model, LaunchStage::WebExperience { destination });
            }
        }
    }

    fn transition(model: &mut Model, next: LaunchStage) {
        if model.stage == next {
            return;
        }
        info!(from = model.stage.name(), to = next.name(), "launch stage changed");
        model.permission_prompt_visible = false;
        model.stage = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Effect;
    use crux_core::testing::AppTester;

    fn loaded_model() -> Model {
        Model {
            loaded: true,
            started: true,
            ..Model::default()
        }
    }

    #[test]
    fn test_started_reads_every_launch_key() {
        let app = AppTester::<LaunchEngine, Effect>::default();
        let mut model = Model::default();

        let update = app.update(Event::Started(LaunchContext::default()), &mut model);
        let reads = update
            .effects
            .iter()
            .filter(|e| matches!(e, Effect::KeyValue(_)))
            .count();
        assert_eq!(reads, LaunchKey::ALL.len());
        assert!(!model.is_loaded());

        let again = app.update(Event::Started(LaunchContext::default()), &mut model);
        assert!(again.effects.is_empty());
    }

    #[test]
    fn test_inputs_wait_for_loaded_state() {
        let app = AppTester::<LaunchEngine, Effect>::default();
        let mut model = Model::default();

        let update = app.update(Event::AttributionFailed { reason: "early".into() }, &mut model);
        assert!(update.effects.is_empty());
        assert_eq!(model.deferred.len(), 1);
        assert_eq!(model.stage, LaunchStage::Booting);
    }

    #[test]
    fn test_render_only_on_view_change() {
        let app = AppTester::<LaunchEngine, Effect>::default();
        let mut model = loaded_model();

        let update = app.update(Event::PushTokenReceived { token: "t".into() }, &mut model);
        assert!(!update.effects.iter().any(|e| matches!(e, Effect::Render(_))));

        let update = app.update(Event::AttributionFailed { reason: "sdk down".into() }, &mut model);
        assert!(update.effects.iter().any(|e| matches!(e, Effect::Render(_))));
        assert_eq!(model.stage, LaunchStage::ClassicFlow);
    }

    #[test]
    fn test_blank_push_token_ignored() {
        let app = AppTester::<LaunchEngine, Effect>::default();
        let mut model = loaded_model();
        app.update(Event::PushTokenReceived { token: "  ".into() }, &mut model);
        assert_eq!(model.push_token, None);
    }

    #[test]
    fn test_stale_merge_timer_is_ignored() {
        let app = AppTester::<LaunchEngine, Effect>::default();
        let mut model = loaded_model();
        model.deeplink = Some(DeeplinkPayload::default());

        app.update(
            Event::TimerElapsed {
                timer: Timer::DeeplinkMerge,
                id: TimerId(42),
            },
            &mut model,
        );
        assert!(model.attribution().is_none());
    }
}
