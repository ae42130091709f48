//! Runnables used across the integration tests

use async_trait::async_trait;
use fleetlink_core::{Identifier, IdentifierType, Message, RunContext, Runnable, RunnableError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Runs until stopped, reporting one progress step on start
pub struct Echo {
    pub runs: Arc<AtomicUsize>,
}

impl Echo {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Runnable for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes until stopped"
    }

    async fn run(&self, ctx: RunContext) -> Result<Option<Value>, RunnableError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ctx.report_progress("listening", 10);
        ctx.cancelled().await;
        Ok(None)
    }
}

/// Completes immediately with a fixed output
pub struct Answer;

#[async_trait]
impl Runnable for Answer {
    fn name(&self) -> &str {
        "answer"
    }

    async fn run(&self, _ctx: RunContext) -> Result<Option<Value>, RunnableError> {
        Ok(Some(json!({"answer": 42})))
    }
}

/// Fails immediately
pub struct Faulty;

#[async_trait]
impl Runnable for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn run(&self, _ctx: RunContext) -> Result<Option<Value>, RunnableError> {
        Err(RunnableError::Failed("microphone unplugged".to_string()))
    }
}

/// Announces one `samples` message to sibling workers, then runs until stopped
pub struct Mic;

#[async_trait]
impl Runnable for Mic {
    fn name(&self) -> &str {
        "mic"
    }

    async fn run(&self, ctx: RunContext) -> Result<Option<Value>, RunnableError> {
        ctx.emit(Message::new(
            ctx.identifier().clone(),
            Some(Identifier::of_type(IdentifierType::Worker)),
            "samples",
        ));
        ctx.cancelled().await;
        Ok(None)
    }
}
