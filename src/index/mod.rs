//! # Index Node
//!
//! The rendezvous hub. Workers and UI sessions connect to it over
//! [`Channel`]s; the transport hands every accepted connection to
//! [`Index::accept_worker`] or [`Index::accept_ui`] and then pushes inbound
//! bytes, keep-alives and the final disconnect into the returned handle.
//!
//! Connection handles apply directory changes (registration, runnable status,
//! UI subscriptions) and forward messages inline, so everything takes effect
//! in arrival order: UI-bound messages are fanned out to subscribed sessions,
//! worker/runnable-bound messages are forwarded to their worker, and runnable
//! status events are forwarded to interested UIs. The message is then handed
//! to the index's [`Dispatcher`] for handlers registered through
//! [`Index::dispatcher`].

use crate::config::{DispatcherConfig, FleetConfig, IndexConfig};
use crate::constants::message_names;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::logging::log_error;
use crate::messaging::{Identifier, IdentifierType, Message};
use crate::registry::IndexRegistry;
use crate::state_machine::RunnableStatus;
use crate::transport::{Channel, Outbox};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The index process
#[derive(Debug)]
pub struct Index {
    config: IndexConfig,
    dispatcher: Dispatcher,
    registry: Arc<IndexRegistry>,
    next_connection: AtomicU64,
}

impl Index {
    pub fn new(config: IndexConfig, dispatcher_config: DispatcherConfig) -> Self {
        let index = Self {
            registry: Arc::new(IndexRegistry::new(config.clone())),
            dispatcher: Dispatcher::new("index", dispatcher_config),
            next_connection: AtomicU64::new(1),
            config,
        };
        info!(addr = %index.config.addr, "Index started");
        index
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(config.index.clone(), config.dispatcher.clone())
    }

    /// Adopt an accepted worker connection
    pub fn accept_worker(&self, channel: Arc<dyn Channel>) -> WorkerConnection {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        debug!(connection_id = id, channel = %channel.name(), "Worker connection accepted");
        WorkerConnection {
            id,
            outbox: self.outbox(channel),
            worker: Mutex::new(None),
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }

    /// Adopt an accepted UI connection and welcome the new session
    pub fn accept_ui(&self, channel: Arc<dyn Channel>) -> Result<UiConnection> {
        let outbox = self.outbox(channel);
        let name = self.registry.register_ui(outbox.clone()).inspect_err(|_| outbox.close())?;
        Ok(UiConnection {
            identifier: Identifier::ui(&name),
            name,
            outbox,
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
        })
    }

    fn outbox(&self, channel: Arc<dyn Channel>) -> Outbox {
        Outbox::spawn(
            channel,
            self.dispatcher.tracker(),
            self.dispatcher.token().clone(),
        )
    }

    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Close every connection and wait for in-flight work
    pub async fn close(&self) {
        self.registry.close_all();
        self.dispatcher.close().await;
    }
}

/// Directory status carried by a runnable lifecycle event
fn runnable_status_event(message: &Message) -> Option<RunnableStatus> {
    if message.from.kind != Some(IdentifierType::Runnable) {
        return None;
    }
    match message.name.as_str() {
        message_names::EVENT_RUNNABLE_STARTED => Some(RunnableStatus::Running),
        message_names::EVENT_RUNNABLE_STOPPED => Some(RunnableStatus::Stopped),
        message_names::EVENT_RUNNABLE_CRASHED => Some(RunnableStatus::Crashed),
        _ => None,
    }
}

/// Forward a message to the UI sessions and workers its destination admits.
///
/// Runnable status events addressed to the index also go to interested UIs.
/// Failures are logged per destination class.
fn forward(registry: &IndexRegistry, message: &Message) {
    let to = message.to.as_ref();
    let ui_bound = to.is_some_and(|to| to.admits(IdentifierType::Ui));
    let worker_bound = to.is_some_and(|to| {
        to.admits(IdentifierType::Worker) || to.admits(IdentifierType::Runnable)
    });

    let to_ui = if ui_bound {
        Some(registry.route_to_ui(message))
    } else if runnable_status_event(message).is_some() {
        Some(registry.route_to_ui(
            &message.readdressed(Identifier::of_type(IdentifierType::Ui)),
        ))
    } else {
        None
    };
    if let Some(Err(e)) = to_ui {
        log_error("index", &format!("forward {} to ui", message.name), &e.to_string(), None);
    }

    if worker_bound {
        if let Err(e) = registry.route_to_worker(message) {
            log_error("index", &format!("forward {} to worker", message.name), &e.to_string(), None);
        }
    }
}

/// Index side of one worker connection
#[derive(Debug)]
pub struct WorkerConnection {
    id: u64,
    outbox: Outbox,
    worker: Mutex<Option<String>>,
    registry: Arc<IndexRegistry>,
    dispatcher: Dispatcher,
}

impl WorkerConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name the worker registered under, once it has
    pub fn worker_name(&self) -> Option<String> {
        self.worker.lock().clone()
    }

    /// Handle one inbound message.
    ///
    /// Registration is answered on this connection. Runnable status events
    /// update the directory, then the message is forwarded and dispatched.
    pub fn on_message(&self, bytes: &[u8]) -> Result<()> {
        let message = Message::from_bytes(bytes).inspect_err(|e| {
            warn!(connection_id = self.id, error = %e, "Dropping malformed message from worker");
        })?;

        if message.name == message_names::CMD_WORKER_REGISTER {
            let info = message.parse_worker_info()?;
            let name = info.name.clone();
            let mut worker = self.worker.lock();
            if let Some(previous) = worker.as_ref().filter(|previous| **previous != name).cloned() {
                debug!(connection_id = self.id, %previous, %name, "Worker renamed on its connection");
                self.registry.unregister_worker(&previous, self.id);
                *worker = None;
            }
            self.registry
                .register_worker(info, self.outbox.clone(), self.id)?;
            *worker = Some(name);
            return Ok(());
        }

        if let Some(status) = runnable_status_event(&message) {
            let worker = message.from.worker.as_deref().unwrap_or_default();
            let runnable = message.from.name.as_deref().unwrap_or_default();
            if !self.registry.update_runnable_status(worker, runnable, status) {
                debug!(worker, runnable, %status, "Status event for an unknown runnable");
            }
        }

        forward(&self.registry, &message);
        self.dispatcher.dispatch(message);
        Ok(())
    }

    pub fn on_keep_alive(&self) -> Result<()> {
        self.outbox.extend()?;
        Ok(())
    }

    /// The transport reports the connection closed
    pub fn on_disconnect(&self) {
        if let Some(name) = self.worker.lock().take() {
            self.registry.unregister_worker(&name, self.id);
        }
        self.outbox.close();
    }
}

/// Index side of one UI session
#[derive(Debug)]
pub struct UiConnection {
    name: String,
    identifier: Identifier,
    outbox: Outbox,
    registry: Arc<IndexRegistry>,
    dispatcher: Dispatcher,
}

impl UiConnection {
    /// Opaque session name generated on connect
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Handle one inbound message; the sender is always this session.
    ///
    /// Subscription changes and keep-alives are applied in arrival order;
    /// everything else is forwarded and dispatched.
    pub fn on_message(&self, bytes: &[u8]) -> Result<()> {
        let mut message = Message::from_bytes(bytes).inspect_err(|e| {
            warn!(ui = %self.name, error = %e, "Dropping malformed message from UI");
        })?;
        message.from = self.identifier.clone();

        match message.name.as_str() {
            message_names::UI_MESSAGE_NAMES_ADD => {
                self.registry
                    .subscribe_ui(&self.name, &message.parse_message_names()?)?;
            }
            message_names::UI_MESSAGE_NAMES_DELETE => {
                self.registry
                    .unsubscribe_ui(&self.name, &message.parse_message_names()?)?;
            }
            message_names::CMD_UI_PING => self.registry.extend_ui_connection(&self.name)?,
            _ => {
                forward(&self.registry, &message);
                self.dispatcher.dispatch(message);
            }
        }
        Ok(())
    }

    pub fn on_keep_alive(&self) -> Result<()> {
        self.registry.extend_ui_connection(&self.name)
    }

    pub fn on_disconnect(&self) {
        self.registry.unregister_ui(&self.name);
        self.outbox.close();
    }
}
