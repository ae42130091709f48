//! # Dispatcher
//!
//! Process-wide publish/subscribe router. Handlers are registered once at
//! start-up against a [`DispatchCondition`]; every dispatched message runs each
//! matching handler as its own task on the process task tracker, in
//! registration order of spawning. Delivery is fire-and-forget: handler
//! failures are logged and counted, never returned to the publisher.
//!
//! A handler may dispatch again. That only spawns more tasks, so chained
//! causation never re-enters the registration list synchronously.

use super::correlation::{Completion, DoneRegistry, OnDone};
use crate::config::DispatcherConfig;
use crate::error::Result;
use crate::messaging::{Identifier, Message};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Declarative interest in a class of messages. Unset fields are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchCondition {
    pub name: Option<String>,
    pub from: Option<Identifier>,
    pub to: Option<Identifier>,
}

impl DispatchCondition {
    /// Condition matching every message
    pub fn any() -> Self {
        Self::default()
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn to(to: Identifier) -> Self {
        Self {
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn with_from(mut self, from: Identifier) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_to(mut self, to: Identifier) -> Self {
        self.to = Some(to);
        self
    }

    /// Whether the message satisfies every set field of the condition
    pub fn matches(&self, message: &Message) -> bool {
        if let Some(name) = &self.name {
            if *name != message.name {
                return false;
            }
        }

        if let Some(from) = &self.from {
            if !from.matches(&message.from) {
                return false;
            }
        }

        if let Some(to) = &self.to {
            match &message.to {
                Some(message_to) if to.matches(message_to) => {}
                _ => return false,
            }
        }

        true
    }
}

/// Trait for message handlers
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<()>;
}

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Result<()> {
        (self.f)(message).await
    }
}

struct Registration {
    condition: DispatchCondition,
    handler: Arc<dyn MessageHandler>,
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub registered_handlers: usize,
    pub dispatched_messages: u64,
    pub handler_invocations: u64,
    pub handler_failures: u64,
    pub dropped_messages: u64,
    pub pending_callbacks: usize,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    invocations: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
}

/// In-memory router shared by every component of one process
#[derive(Clone)]
pub struct Dispatcher {
    label: Arc<str>,
    handlers: Arc<RwLock<Vec<Registration>>>,
    done: Arc<DoneRegistry>,
    counters: Arc<Counters>,
    tracker: TaskTracker,
    token: CancellationToken,
    config: DispatcherConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("label", &self.label)
            .field("handlers", &self.handlers.read().len())
            .field("closed", &self.token.is_cancelled())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher owning a fresh root cancellation scope.
    ///
    /// `label` identifies the process in logs (`index`, or the worker name).
    pub fn new(label: impl Into<String>, config: DispatcherConfig) -> Self {
        let label: String = label.into();
        Self {
            label: Arc::from(label),
            handlers: Arc::new(RwLock::new(Vec::new())),
            done: Arc::new(DoneRegistry::new()),
            counters: Arc::new(Counters::default()),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
            config,
        }
    }

    /// Register a handler. Registration order defines spawn order.
    pub fn on(&self, condition: DispatchCondition, handler: Arc<dyn MessageHandler>) {
        debug!(
            dispatcher = %self.label,
            condition = ?condition,
            "Registered message handler"
        );
        self.handlers.write().push(Registration { condition, handler });
    }

    /// Register an async closure as a handler
    pub fn on_fn<F, Fut>(&self, condition: DispatchCondition, f: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on(condition, Arc::new(FnHandler { f }));
    }

    /// Publish a message to every matching handler
    pub fn dispatch(&self, message: Message) {
        if self.token.is_cancelled() || self.tracker.is_closed() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                dispatcher = %self.label,
                message = %message.name,
                "Dispatcher closed, dropping message"
            );
            return;
        }
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        let matched: Vec<Arc<dyn MessageHandler>> = {
            let handlers = self.handlers.read();
            handlers
                .iter()
                .filter(|r| r.condition.matches(&message))
                .map(|r| r.handler.clone())
                .collect()
        };

        if matched.is_empty() {
            debug!(
                dispatcher = %self.label,
                message = %message.name,
                from = %message.from,
                "No handler matched message"
            );
            return;
        }

        debug!(
            dispatcher = %self.label,
            message = %message.name,
            handlers = matched.len(),
            "Dispatching message"
        );

        for handler in matched {
            let message = message.clone();
            let token = self.token.clone();
            let counters = self.counters.clone();
            let label = self.label.clone();
            self.tracker.spawn(async move {
                counters.invocations.fetch_add(1, Ordering::Relaxed);
                let name = message.name.clone();
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(dispatcher = %label, message = %name, "Handler cancelled");
                    }
                    result = handler.handle(message) => {
                        if let Err(e) = result {
                            counters.failures.fetch_add(1, Ordering::Relaxed);
                            error!(
                                dispatcher = %label,
                                message = %name,
                                error = %e,
                                "Message handler failed"
                            );
                        }
                    }
                }
            });
        }
    }

    /// Stamp a command with a fresh correlation id and store its callback
    pub fn command(&self, message: Message, on_done: OnDone) -> Message {
        let id = self.done.register(on_done);
        message.with_id(id)
    }

    /// Resolve the callback correlated with a `done` message
    pub fn complete(&self, message: Message) -> Completion {
        match message.id {
            Some(id) => self.done.complete(id, message),
            None => {
                warn!(
                    dispatcher = %self.label,
                    message = %message.name,
                    "Done message without correlation id"
                );
                Completion::Unknown
            }
        }
    }

    pub fn done_registry(&self) -> &Arc<DoneRegistry> {
        &self.done
    }

    /// Task tracker shared by every task of this process
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Root cancellation scope of this process
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            registered_handlers: self.handlers.read().len(),
            dispatched_messages: self.counters.dispatched.load(Ordering::Relaxed),
            handler_invocations: self.counters.invocations.load(Ordering::Relaxed),
            handler_failures: self.counters.failures.load(Ordering::Relaxed),
            dropped_messages: self.counters.dropped.load(Ordering::Relaxed),
            pending_callbacks: self.done.pending_count(),
        }
    }

    /// Stop accepting work, cancel the root scope and wait for in-flight tasks
    pub async fn close(&self) {
        self.token.cancel();
        self.tracker.close();

        let timeout = Duration::from_millis(self.config.shutdown_timeout_ms);
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => info!(dispatcher = %self.label, "Dispatcher closed"),
            Err(_) => warn!(
                dispatcher = %self.label,
                in_flight = self.tracker.len(),
                timeout_ms = self.config.shutdown_timeout_ms,
                "Timed out waiting for in-flight tasks"
            ),
        }
    }
}
