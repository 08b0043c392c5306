use crux_core::capability::{CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timers the engine can arm. At most one of each kind is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timer {
    AttributionTimeout,
    DeeplinkMerge,
    OrganicValidation,
}

impl Timer {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AttributionTimeout => "attribution_timeout",
            Self::DeeplinkMerge => "deeplink_merge",
            Self::OrganicValidation => "organic_validation",
        }
    }
}

/// Identifies one arming of a timer. A re-armed timer gets a fresh id, so a
/// late completion of the old one can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum TimerOperation {
    Start {
        id: TimerId,
        timer: Timer,
        after_ms: u64,
    },
    Cancel {
        id: TimerId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerOutput {
    Elapsed,
    Cancelled,
}

impl Operation for TimerOperation {
    type Output = TimerOutput;
}

#[derive(crux_core::macros::Capability)]
pub struct Timers<Ev> {
    context: CapabilityContext<TimerOperation, Ev>,
}

impl<Ev> Clone for Timers<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Timers<Ev> {
    pub fn new(context: CapabilityContext<TimerOperation, Ev>) -> Self {
        Self { context }
    }
}

impl<Ev> Timers<Ev>
where
    Ev: 'static,
{
    /// Asks the shell to wait `after`, then calls `make_event` with the
    /// outcome. A cancelled timer resolves with [`TimerOutput::Cancelled`].
    pub fn start<F>(&self, id: TimerId, timer: Timer, after: Duration, make_event: F)
    where
        F: FnOnce(TimerOutput) -> Ev + Send + 'static,
    {
        let after_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX);
        let context = self.context.clone();
        self.context.spawn(async move {
            let output = context
                .request_from_shell(TimerOperation::Start {
                    id,
                    timer,
                    after_ms,
                })
                .await;
            context.update_app(make_event(output));
        });
    }

    pub fn cancel(&self, id: TimerId) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context.notify_shell(TimerOperation::Cancel { id }).await;
        });
    }
}
