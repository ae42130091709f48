//! # Runnable Lifecycle
//!
//! Drives one runnable through Stopped → Running → {Stopped, Crashed}. The
//! procedure runs as a background task on the worker's tracker with a child of
//! the worker's root cancellation token, so shutting the worker down stops it
//! like an explicit stop command would.
//!
//! Every transition is emitted as a message on the worker's event queue:
//! status events go to the index, progress goes to the UI filter, and a
//! correlated start additionally produces one `done` event for its requester.

use super::events::RunnableEvent;
use super::runnable::{HostState, RunContext, Runnable, RunnableError};
use super::states::{Progress, RunnableStatus};
use crate::error::Result;
use crate::logging::log_runnable_operation;
use crate::messaging::{Identifier, Message, RunnableInfo};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Where to send the `done` event of a correlated start command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoneTarget {
    pub to: Identifier,
    pub id: u64,
}

enum Outcome {
    Finished(Option<Value>),
    Failed(String),
}

/// Owner of one runnable's canonical state on its worker
pub struct RunnableHost {
    runnable: Arc<dyn Runnable>,
    identifier: Identifier,
    state: Arc<Mutex<HostState>>,
    events: mpsc::UnboundedSender<Message>,
    tracker: TaskTracker,
    root: CancellationToken,
}

impl std::fmt::Debug for RunnableHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableHost")
            .field("identifier", &self.identifier)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl RunnableHost {
    pub fn new(
        runnable: Arc<dyn Runnable>,
        worker: &str,
        events: mpsc::UnboundedSender<Message>,
        tracker: TaskTracker,
        root: CancellationToken,
    ) -> Self {
        let identifier = Identifier::runnable(runnable.name(), worker);
        Self {
            runnable,
            identifier,
            state: Arc::new(Mutex::new(HostState::default())),
            events,
            tracker,
            root,
        }
    }

    pub fn name(&self) -> &str {
        self.runnable.name()
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn status(&self) -> RunnableStatus {
        self.state.lock().status
    }

    pub fn progress(&self) -> Option<Progress> {
        self.state.lock().progress.clone()
    }

    /// Summary advertised to the index and siblings
    pub fn info(&self) -> RunnableInfo {
        RunnableInfo {
            name: self.runnable.name().to_string(),
            description: self.runnable.description().to_string(),
            status: self.status(),
            ui_homepage: self.runnable.ui_homepage(),
        }
    }

    /// Move to Running and launch the procedure in the background
    pub fn start(&self, done: Option<DoneTarget>) -> Result<()> {
        let (token, generation) = {
            let mut state = self.state.lock();
            state.status = state.status.transition(&RunnableEvent::Start)?;
            state.progress = None;
            state.generation += 1;
            let token = self.root.child_token();
            state.token = Some(token.clone());
            (token, state.generation)
        };

        log_runnable_operation("start", &self.identifier, RunnableStatus::Running, None);
        self.emit(Message::event_runnable_started(
            self.identifier.clone(),
            Some(Identifier::index()),
        ));

        let ctx = RunContext::new(
            self.identifier.clone(),
            token.clone(),
            generation,
            self.state.clone(),
            self.events.clone(),
        );
        let runnable = self.runnable.clone();
        let mut procedure = self.tracker.spawn(async move { runnable.run(ctx).await });

        let identifier = self.identifier.clone();
        let state = self.state.clone();
        let events = self.events.clone();
        self.tracker.spawn(async move {
            let outcome = tokio::select! {
                joined = &mut procedure => match joined {
                    Ok(Ok(output)) => Outcome::Finished(output),
                    Ok(Err(RunnableError::Failed(reason))) => Outcome::Failed(reason),
                    Ok(Err(RunnableError::Other(e))) => Outcome::Failed(format!("{e:#}")),
                    Err(e) if e.is_panic() => Outcome::Failed("procedure panicked".to_string()),
                    Err(_) => Outcome::Finished(None),
                },
                _ = token.cancelled() => {
                    procedure.abort();
                    Outcome::Finished(None)
                }
            };
            finish(&identifier, &state, &events, generation, outcome, done);
        });

        Ok(())
    }

    /// Signal cancellation to the running procedure
    pub fn stop(&self) -> Result<()> {
        let token = {
            let mut state = self.state.lock();
            state.status = state.status.transition(&RunnableEvent::Stop)?;
            state.token.clone()
        };
        if let Some(token) = token {
            token.cancel();
        }
        log_runnable_operation("stop", &self.identifier, RunnableStatus::Running, None);
        Ok(())
    }

    fn emit(&self, message: Message) {
        send_event(&self.identifier, &self.events, message);
    }
}

fn send_event(identifier: &Identifier, events: &mpsc::UnboundedSender<Message>, message: Message) {
    if events.send(message).is_err() {
        debug!(runnable = %identifier, "Event queue closed, dropping lifecycle event");
    }
}

fn finish(
    identifier: &Identifier,
    state: &Mutex<HostState>,
    events: &mpsc::UnboundedSender<Message>,
    generation: u64,
    outcome: Outcome,
    done: Option<DoneTarget>,
) {
    let event = match &outcome {
        Outcome::Finished(_) => RunnableEvent::Finish,
        Outcome::Failed(reason) => RunnableEvent::fail_with_error(reason.clone()),
    };

    let status = {
        let mut state = state.lock();
        if state.generation != generation {
            return;
        }
        match state.status.transition(&event) {
            Ok(status) => {
                state.status = status;
                state.progress = None;
                state.token = None;
                status
            }
            Err(e) => {
                warn!(runnable = %identifier, error = %e, "Ignoring lifecycle event");
                return;
            }
        }
    };

    log_runnable_operation(
        event.event_type(),
        identifier,
        status,
        event.error_message(),
    );

    let from = identifier.clone();
    let message = match status {
        RunnableStatus::Crashed => Message::event_runnable_crashed(from, Some(Identifier::index())),
        _ => Message::event_runnable_stopped(from, Some(Identifier::index())),
    };
    send_event(identifier, events, message);

    if let Some(done) = done {
        let output = match &outcome {
            Outcome::Finished(output) => output.as_ref(),
            Outcome::Failed(_) => None,
        };
        match Message::event_runnable_done(identifier.clone(), Some(done.to), done.id, output) {
            Ok(message) => send_event(identifier, events, message),
            Err(e) => warn!(runnable = %identifier, error = %e, "Done event not encodable"),
        }
    }
}
