//! # Runnables
//!
//! The contract abilities implement to expose startable/stoppable units of
//! work. A runnable only ever sees a [`RunContext`]; the hosting worker owns
//! its state and reports every transition as an event.

use super::states::{Progress, RunnableStatus};
use crate::messaging::{Identifier, IdentifierType, Message};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Failure of a runnable procedure; surfaces only as a `crashed` event
#[derive(Error, Debug)]
pub enum RunnableError {
    #[error("Runnable failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A startable/stoppable unit of work exposed by an ability
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Unique name within the hosting worker
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Path of the runnable's web page, if it has one
    fn ui_homepage(&self) -> Option<String> {
        None
    }

    /// Run until done, failed or cancelled.
    ///
    /// Implementations should watch [`RunContext::cancelled`]; a stop or a
    /// process shutdown cancels the context and is reported as `stopped`.
    async fn run(&self, ctx: RunContext) -> Result<Option<Value>, RunnableError>;
}

/// Mutable lifecycle state shared between the host and the running procedure
#[derive(Debug, Default)]
pub(crate) struct HostState {
    pub status: RunnableStatus,
    pub progress: Option<Progress>,
    pub token: Option<CancellationToken>,
    pub generation: u64,
}

/// Handle given to a running procedure
#[derive(Clone)]
pub struct RunContext {
    identifier: Identifier,
    token: CancellationToken,
    generation: u64,
    state: Arc<Mutex<HostState>>,
    events: mpsc::UnboundedSender<Message>,
}

impl RunContext {
    pub(crate) fn new(
        identifier: Identifier,
        token: CancellationToken,
        generation: u64,
        state: Arc<Mutex<HostState>>,
        events: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            identifier,
            token,
            generation,
            state,
            events,
        }
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Resolves once a stop was requested or the process is shutting down
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Send a message on behalf of this runnable; `from` is overwritten
    pub fn emit(&self, mut message: Message) {
        message.from = self.identifier.clone();
        if self.events.send(message).is_err() {
            debug!(runnable = %self.identifier, "Event queue closed, dropping message");
        }
    }

    /// Report advisory progress to interested UI sessions.
    ///
    /// Ignored once this run is no longer the current one.
    pub fn report_progress(&self, current_step: impl Into<String>, progress: u32) {
        let progress = Progress::new(current_step, progress);
        {
            let mut state = self.state.lock();
            if state.generation != self.generation || !state.status.is_active() {
                return;
            }
            state.progress = Some(progress.clone());
        }

        match Message::event_runnable_progress(
            self.identifier.clone(),
            Some(Identifier::of_type(IdentifierType::Ui)),
            &progress,
        ) {
            Ok(message) => {
                if self.events.send(message).is_err() {
                    debug!(runnable = %self.identifier, "Event queue closed, dropping progress");
                }
            }
            Err(e) => debug!(runnable = %self.identifier, error = %e, "Progress not encodable"),
        }
    }
}
