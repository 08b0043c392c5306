//! Async shell around the launch core.
//!
//! One driver task owns the Crux [`Core`] and consumes messages from an
//! unbounded channel: host events, and resolutions of capability requests.
//! Key-value requests are answered inline against the host store; everything
//! else runs in its own task and reports back through the same channel, so
//! the core is only ever touched by the driver.

use crux_core::capability::Operation;
use crux_core::{Core, Request};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

use super::store::resolve_kv;
use super::HostServices;
use crate::capabilities::{
    Effect, InstallValidationOperation, RemoteConfigOperation, TimerId, TimerOperation,
    TimerOutput,
};
use crate::engine::LaunchEngine;
use crate::event::Event;
use crate::model::{ConnectivityStatus, LaunchContext, ViewModel};

type LaunchCore = Core<Effect, LaunchEngine>;
type Resolution = Box<dyn FnOnce(&LaunchCore) -> Vec<Effect> + Send>;

enum Message {
    Event(Event),
    Resolve(Resolution),
}

fn resolution<Op>(mut request: Request<Op>, output: Op::Output) -> Message
where
    Op: Operation,
    Request<Op>: Send + 'static,
{
    Message::Resolve(Box::new(move |core: &LaunchCore| {
        core.resolve(&mut request, output)
    }))
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("launch runtime has shut down")]
pub struct RuntimeClosed;

/// Cloneable event sender for host callbacks (push opens, prompt answers).
#[derive(Clone)]
pub struct LaunchHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl std::fmt::Debug for LaunchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl LaunchHandle {
    pub fn send(&self, event: Event) -> Result<(), RuntimeClosed> {
        self.tx
            .send(Message::Event(event))
            .map_err(|_| RuntimeClosed)
    }
}

pub struct LaunchRuntime {
    handle: LaunchHandle,
    view: watch::Receiver<ViewModel>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for LaunchRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchRuntime")
            .field("view", &*self.view.borrow())
            .finish_non_exhaustive()
    }
}

impl LaunchRuntime {
    /// Wires the host services to a fresh core and sends `Event::Started`.
    /// Must be called from within a tokio runtime.
    pub fn spawn(mut context: LaunchContext, host: HostServices) -> Self {
        if context.device.attribution_id.is_none() {
            context.device.attribution_id = host
                .attribution
                .device_id()
                .filter(|id| !id.trim().is_empty());
        }

        let core = LaunchCore::new();
        let initial = core.view();
        let span = info_span!("launch_runtime", session = %initial.session_id);
        let (tx, rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(initial);

        // Unbounded send only fails once the receiver is gone; it is alive here.
        let _ = tx.send(Message::Event(Event::Started(context)));

        let mut tasks = Vec::with_capacity(4);
        tasks.push(tokio::spawn(
            watch_attribution(host.clone(), tx.clone()).instrument(span.clone()),
        ));
        tasks.push(tokio::spawn(
            watch_deeplink(host.clone(), tx.clone()).instrument(span.clone()),
        ));
        tasks.push(tokio::spawn(
            watch_connectivity(host.connectivity.subscribe(), tx.clone()).instrument(span.clone()),
        ));

        let driver = Driver {
            core,
            host,
            tx: tx.clone(),
            view: view_tx,
            timers: HashMap::new(),
        };
        tasks.push(tokio::spawn(driver.run(rx).instrument(span)));

        Self {
            handle: LaunchHandle { tx },
            view: view_rx,
            tasks,
        }
    }

    pub fn handle(&self) -> LaunchHandle {
        self.handle.clone()
    }

    pub fn send(&self, event: Event) -> Result<(), RuntimeClosed> {
        self.handle.send(event)
    }

    pub fn view(&self) -> ViewModel {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.view.clone()
    }

    /// Resolves once the host has something other than the splash or the
    /// permission prompt to show.
    pub async fn wait_for_decision(&self) -> ViewModel {
        let mut rx = self.view.clone();
        let decided = rx
            .wait_for(ViewModel::is_decided)
            .await
            .map(|view| ViewModel::clone(&view));
        decided.unwrap_or_else(|_| self.view())
    }

    /// Stops watchers, pending timers and the driver. In-flight requests
    /// finish on their own and their results are dropped.
    pub fn shutdown(self) {
        info!("launch runtime shutting down");
    }
}

impl Drop for LaunchRuntime {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn watch_attribution(host: HostServices, tx: mpsc::UnboundedSender<Message>) {
    let result = host.attribution.conversion_data().await;
    let _ = tx.send(Message::Event(Event::from(result)));
}

async fn watch_deeplink(host: HostServices, tx: mpsc::UnboundedSender<Message>) {
    if let Some(deeplink) = host.attribution.deeplink().await {
        let _ = tx.send(Message::Event(Event::DeeplinkResolved(deeplink)));
    }
}

/// Forwards an initial `Lost`, then every change.
async fn watch_connectivity(
    mut status: watch::Receiver<ConnectivityStatus>,
    tx: mpsc::UnboundedSender<Message>,
) {
    let mut last = *status.borrow_and_update();
    if !last.is_online() {
        debug!("starting without connectivity");
        if tx
            .send(Message::Event(Event::ConnectivityChanged(last)))
            .is_err()
        {
            return;
        }
    }
    while status.changed().await.is_ok() {
        let current = *status.borrow_and_update();
        if current == last {
            continue;
        }
        last = current;
        debug!(?current, "connectivity changed");
        if tx
            .send(Message::Event(Event::ConnectivityChanged(current)))
            .is_err()
        {
            break;
        }
    }
}

struct Driver {
    core: LaunchCore,
    host: HostServices,
    tx: mpsc::UnboundedSender<Message>,
    view: watch::Sender<ViewModel>,
    /// Cancel switches for running timers.
    timers: HashMap<TimerId, oneshot::Sender<()>>,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            let effects = match message {
                Message::Event(event) => self.core.process_event(event),
                Message::Resolve(resolve) => resolve(&self.core),
            };
            self.process(effects);
        }
    }

    fn process(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Render(_) => {
                    self.view.send_replace(self.core.view());
                }
                Effect::KeyValue(mut request) => {
                    let output = resolve_kv(self.host.store.as_ref(), &request.operation);
                    queue.extend(self.core.resolve(&mut request, output));
                }
                Effect::Push(request) => {
                    let push = Arc::clone(&self.host.push);
                    self.spawn_reply(async move {
                        let result = push.request_authorization().await;
                        resolution(request, result)
                    });
                }
                Effect::RemoteConfig(request) => {
                    let RemoteConfigOperation::Fetch(body) = request.operation.clone();
                    let remote = Arc::clone(&self.host.remote_config);
                    self.spawn_reply(async move {
                        let result = remote.fetch_config(body).await;
                        resolution(request, result)
                    });
                }
                Effect::InstallValidation(request) => {
                    let InstallValidationOperation::Validate(query) = request.operation.clone();
                    let organic = Arc::clone(&self.host.organic);
                    self.spawn_reply(async move {
                        let result = organic.validate_install(query).await;
                        resolution(request, result)
                    });
                }
                Effect::Timers(request) => self.on_timer(request),
            }
        }
    }

    fn on_timer(&mut self, request: Request<TimerOperation>) {
        match request.operation.clone() {
            TimerOperation::Start {
                id,
                timer,
                after_ms,
            } => {
                debug!(timer = timer.name(), after_ms, "timer started");
                self.timers.retain(|_, cancel| !cancel.is_closed());
                let (cancel_tx, cancel_rx) = oneshot::channel();
                self.timers.insert(id, cancel_tx);
                self.spawn_reply(async move {
                    let output = tokio::select! {
                        () = tokio::time::sleep(Duration::from_millis(after_ms)) => TimerOutput::Elapsed,
                        _ = cancel_rx => TimerOutput::Cancelled,
                    };
                    resolution(request, output)
                });
            }
            TimerOperation::Cancel { id } => {
                if let Some(cancel) = self.timers.remove(&id) {
                    let _ = cancel.send(());
                }
            }
        }
    }

    fn spawn_reply<F>(&self, work: F)
    where
        F: std::future::Future<Output = Message> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(
            async move {
                let _ = tx.send(work.await);
            }
            .in_current_span(),
        );
    }
}
