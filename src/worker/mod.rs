//! # Worker Node
//!
//! Hosts runnables, keeps one connection to the index and talks to sibling
//! workers directly over the peer request channel.
//!
//! ```text
//!             ┌────────── IndexLink (Channel) ──────────┐
//!             │                                         │
//!   runnables ─► event queue ─► WorkerRegistry::route_outbound
//!                                    │         │
//!                                    │         └─► PeerClient POST {addr}/api/messages
//!                                    └─► local inbox ─► Dispatcher ─► handlers
//! ```
//!
//! Directory updates from the index (siblings, UI interest) are applied on the
//! [`IndexLink`] in arrival order before the message is dispatched. Runnable
//! start/stop commands and listenable registrations are applied the same way
//! on every inbound path (index link, sibling requests, local inbox), so a
//! stop never overtakes the start sent before it.
//!
//! Abilities call [`Worker::add_runnable`] before [`Worker::connect`] so the
//! registration advertises every runnable.

use crate::config::{DispatcherConfig, FleetConfig, WorkerConfig};
use crate::constants::message_names;
use crate::dispatch::{DispatchCondition, Dispatcher, MessageHandler, OnDone};
use crate::error::{FleetError, Result};
use crate::logging::log_error;
use crate::messaging::{ErrorBody, Identifier, IdentifierType, Message, RunnableInfo, WorkerInfo};
use crate::registry::{RouteReport, WorkerRegistry};
use crate::state_machine::{DoneTarget, Runnable, RunnableHost};
use crate::transport::{Channel, Method, Outbox, PeerClient, PeerEndpoint, PeerResponse};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A worker process
#[derive(Debug)]
pub struct Worker {
    config: WorkerConfig,
    dispatcher: Dispatcher,
    registry: Arc<WorkerRegistry>,
    events: mpsc::UnboundedSender<Message>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        dispatcher_config: DispatcherConfig,
        peers: Arc<dyn PeerClient>,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.name.clone(), dispatcher_config);

        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(WorkerRegistry::new(&config, peers, local_tx));

        let (events, events_rx) = mpsc::unbounded_channel();
        spawn_local_inbox(&dispatcher, registry.clone(), local_rx);
        spawn_event_pump(&dispatcher, registry.clone(), events_rx);

        let worker = Self {
            config,
            dispatcher,
            registry,
            events,
        };
        worker.register_handlers();
        info!(worker = %worker.config.name, addr = %worker.config.addr, "Worker started");
        worker
    }

    pub fn from_config(config: &FleetConfig, peers: Arc<dyn PeerClient>) -> Self {
        Self::new(config.worker.clone(), config.dispatcher.clone(), peers)
    }

    fn register_handlers(&self) {
        let d = &self.dispatcher;

        let done = self.dispatcher.done_registry().clone();
        d.on_fn(
            DispatchCondition::name(message_names::EVENT_RUNNABLE_DONE),
            move |message| {
                let done = done.clone();
                async move {
                    match message.id {
                        Some(id) => {
                            done.complete(id, message);
                        }
                        None => warn!(from = %message.from, "Done event without correlation id"),
                    }
                    Ok(())
                }
            },
        );
    }

    /// Host a runnable on this worker
    pub fn add_runnable(&self, runnable: Arc<dyn Runnable>) -> Result<Arc<RunnableHost>> {
        let host = Arc::new(RunnableHost::new(
            runnable,
            &self.config.name,
            self.events.clone(),
            self.dispatcher.tracker().clone(),
            self.dispatcher.token().clone(),
        ));
        self.registry.add_runnable(host.clone())?;
        debug!(worker = %self.config.name, runnable = %host.name(), "Runnable added");
        Ok(host)
    }

    /// Register an ability's own handler on the worker dispatcher
    pub fn on(&self, condition: DispatchCondition, handler: Arc<dyn MessageHandler>) {
        self.dispatcher.on(condition, handler);
    }

    /// Attach the index connection and send the registration
    pub fn connect(&self, channel: Arc<dyn Channel>) -> Result<IndexLink> {
        let outbox = Outbox::spawn(
            channel,
            self.dispatcher.tracker(),
            self.dispatcher.token().clone(),
        );
        self.registry.set_index(outbox.clone());

        let register = Message::cmd_worker_register(self.identifier(), &self.registry.info())?;
        outbox.send(register)?;
        info!(worker = %self.config.name, "Registration sent to index");

        Ok(IndexLink {
            worker: self.config.name.clone(),
            outbox,
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            events: self.events.clone(),
        })
    }

    /// Route a message produced by this worker and report where it went
    pub async fn send(&self, message: Message) -> Result<RouteReport> {
        self.registry.route_outbound(message).await
    }

    /// Send a command whose `done` event fires `on_done` exactly once
    pub async fn command(&self, message: Message, on_done: OnDone) -> Result<RouteReport> {
        let message = self.dispatcher.command(message, on_done);
        let id = message.id;
        let routed = self.send(message).await;
        if routed.is_err() {
            if let Some(id) = id {
                self.dispatcher.done_registry().forget(id);
            }
        }
        routed
    }

    /// Enqueue a message on the event path; failures are only logged
    pub fn emit(&self, message: Message) {
        if self.events.send(message).is_err() {
            debug!(worker = %self.config.name, "Event queue closed, dropping message");
        }
    }

    pub async fn start_runnable(&self, target: Identifier) -> Result<RouteReport> {
        self.send(Message::cmd_runnable_start(self.identifier(), target))
            .await
    }

    /// Start a runnable and get called back with its `done` event
    pub async fn start_runnable_with_done(
        &self,
        target: Identifier,
        on_done: OnDone,
    ) -> Result<RouteReport> {
        self.command(Message::cmd_runnable_start(self.identifier(), target), on_done)
            .await
    }

    pub async fn stop_runnable(&self, target: Identifier) -> Result<RouteReport> {
        self.send(Message::cmd_runnable_stop(self.identifier(), target))
            .await
    }

    /// Ask sibling `worker` to send us `names` emitted by its runnable `runnable`.
    ///
    /// The registration goes out now if the sibling is known, otherwise once
    /// the index announces it.
    pub fn listen(&self, worker: &str, runnable: &str, names: &[String]) -> Result<()> {
        let added = self.registry.add_listenables(worker, runnable, names)?;
        if !added || self.registry.sibling(worker).is_none() {
            return Ok(());
        }
        if let Some(registration) = self.registry.listenables_registration(worker)? {
            self.emit(registration);
        }
        Ok(())
    }

    /// Answer a sibling's message delivery
    pub fn handle_peer_request(&self, method: Method, path: &str, body: &[u8]) -> PeerResponse {
        if method != Method::Post || path != self.config.messages_path {
            return error_response(404, format!("no route for {method} {path}"));
        }

        match Message::from_bytes(body) {
            Ok(message) => {
                debug!(worker = %self.config.name, message = %message.name, from = %message.from, "Peer message received");
                deliver_inbound(&self.registry, &self.dispatcher, message);
                PeerResponse::ok()
            }
            Err(e) => {
                warn!(worker = %self.config.name, error = %e, "Rejecting malformed peer message");
                error_response(400, e.to_string())
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn identifier(&self) -> Identifier {
        self.registry.identifier()
    }

    pub fn info(&self) -> WorkerInfo {
        self.registry.info()
    }

    pub fn runnables(&self) -> Vec<RunnableInfo> {
        self.registry.runnables()
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop every runnable, close the index connection and wait for in-flight work
    pub async fn close(&self) {
        info!(worker = %self.config.name, "Worker shutting down");
        self.dispatcher.close().await;
    }
}

#[async_trait]
impl PeerEndpoint for Worker {
    async fn handle_request(&self, method: Method, path: &str, body: &[u8]) -> PeerResponse {
        self.handle_peer_request(method, path, body)
    }
}

/// Worker side of the index connection
#[derive(Debug)]
pub struct IndexLink {
    worker: String,
    outbox: Outbox,
    registry: Arc<WorkerRegistry>,
    dispatcher: Dispatcher,
    events: mpsc::UnboundedSender<Message>,
}

impl IndexLink {
    pub fn on_message(&self, bytes: &[u8]) -> Result<()> {
        let message = Message::from_bytes(bytes).inspect_err(|e| {
            warn!(worker = %self.worker, error = %e, "Dropping malformed message from index");
        })?;
        if message.from.kind == Some(IdentifierType::Index) {
            for registration in apply_index_update(&self.registry, &message)? {
                if self.events.send(registration).is_err() {
                    debug!(worker = %self.worker, "Event queue closed, dropping listenables registration");
                }
            }
        }
        deliver_inbound(&self.registry, &self.dispatcher, message);
        Ok(())
    }

    pub fn on_keep_alive(&self) -> Result<()> {
        self.outbox.extend()?;
        Ok(())
    }

    /// The transport reports the index connection closed
    pub fn on_disconnect(&self) {
        if self.registry.clear_index(&self.outbox) {
            self.registry.clear_ui_names();
            warn!(worker = %self.worker, "Lost index connection");
        }
        self.outbox.close();
    }
}

/// Apply directory updates from the index in arrival order.
///
/// Returns the listenable registrations owed to newly known siblings.
fn apply_index_update(registry: &WorkerRegistry, message: &Message) -> Result<Vec<Message>> {
    match message.name.as_str() {
        message_names::EVENT_WORKER_WELCOME => {
            registry.replace_siblings(message.parse_worker_list()?);
            return registry.listenables_registrations();
        }
        message_names::EVENT_WORKER_REGISTERED => {
            let info = message.parse_worker_info()?;
            let name = info.name.clone();
            if registry.add_sibling(info) {
                return Ok(registry.listenables_registration(&name)?.into_iter().collect());
            }
        }
        message_names::EVENT_WORKER_DISCONNECTED => {
            registry.remove_sibling(&message.parse_name()?);
        }
        message_names::UI_MESSAGE_NAMES_ADD => {
            registry.add_ui_names(&message.parse_message_names()?);
        }
        message_names::UI_MESSAGE_NAMES_DELETE => {
            registry.delete_ui_names(&message.parse_message_names()?);
        }
        _ => {}
    }
    Ok(Vec::new())
}

/// Apply runnable commands and listenable registrations, then dispatch
fn deliver_inbound(registry: &WorkerRegistry, dispatcher: &Dispatcher, message: Message) {
    if let Err(e) = apply_inbound(registry, &message) {
        warn!(
            worker = %registry.name(),
            message = %message.name,
            from = %message.from,
            error = %e,
            "Inbound message not applied"
        );
    }
    dispatcher.dispatch(message);
}

fn apply_inbound(registry: &WorkerRegistry, message: &Message) -> Result<()> {
    let Some(to) = message.to.as_ref() else {
        return Ok(());
    };
    let to_runnable = Identifier::of_type(IdentifierType::Runnable)
        .on_worker(registry.name())
        .matches(to);

    match message.name.as_str() {
        message_names::CMD_RUNNABLE_START if to_runnable => {
            let done = message.id.map(|id| DoneTarget {
                to: message.from.clone(),
                id,
            });
            target_runnable(registry, message)?.start(done)
        }
        message_names::CMD_RUNNABLE_STOP if to_runnable => target_runnable(registry, message)?.stop(),
        message_names::LISTENABLES_REGISTER if to.worker_name() == Some(registry.name()) => {
            let worker = message
                .from
                .worker_name()
                .ok_or_else(|| FleetError::UnknownDestination(format!("listener {}", message.from)))?;
            registry.register_sibling_listenables(worker, message.parse_listenables()?);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn target_runnable(registry: &WorkerRegistry, message: &Message) -> Result<Arc<RunnableHost>> {
    let name = message
        .to
        .as_ref()
        .and_then(|to| to.name.as_deref())
        .ok_or_else(|| FleetError::MissingDestination(message.name.clone()))?;
    registry
        .runnable(name)
        .ok_or_else(|| FleetError::UnknownDestination(format!("runnable {name}@{}", registry.name())))
}

fn error_response(status: u16, message: String) -> PeerResponse {
    let body = serde_json::to_vec(&ErrorBody { message }).unwrap_or_default();
    PeerResponse::with_status(status, body)
}

/// Feed self-addressed messages back into the dispatcher
fn spawn_local_inbox(
    dispatcher: &Dispatcher,
    registry: Arc<WorkerRegistry>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    let token: CancellationToken = dispatcher.token().clone();
    let local = dispatcher.clone();
    dispatcher.tracker().spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(message) => deliver_inbound(&registry, &local, message),
                    None => break,
                },
            }
        }
    });
}

/// Route lifecycle and ability events; failures are logged, never returned
fn spawn_event_pump(
    dispatcher: &Dispatcher,
    registry: Arc<WorkerRegistry>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    let token = dispatcher.token().clone();
    dispatcher.tracker().spawn(async move {
        loop {
            let message = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(message) => message,
                    None => break,
                },
            };
            let name = message.name.clone();
            if let Err(e) = registry.route_outbound(message).await {
                log_error(
                    "worker",
                    &format!("route {name}"),
                    &e.to_string(),
                    Some(registry.name()),
                );
            }
        }
    });
}
