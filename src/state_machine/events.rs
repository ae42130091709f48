use super::states::RunnableStatus;
use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};

/// Events that drive runnable state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RunnableEvent {
    /// Start command accepted
    Start,
    /// Stop command accepted; the state changes once the procedure exits
    Stop,
    /// Procedure exited normally or was cancelled
    Finish,
    /// Procedure exited with an error or panicked
    Fail(String),
}

impl RunnableEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Finish => "finish",
            Self::Fail(_) => "fail",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}

impl RunnableStatus {
    /// Apply an event, returning the resulting status or rejecting the move
    pub fn transition(self, event: &RunnableEvent) -> Result<RunnableStatus> {
        match (self, event) {
            (Self::Stopped | Self::Crashed, RunnableEvent::Start) => Ok(Self::Running),
            (Self::Running, RunnableEvent::Stop) => Ok(Self::Running),
            (Self::Running, RunnableEvent::Finish) => Ok(Self::Stopped),
            (Self::Running, RunnableEvent::Fail(_)) => Ok(Self::Crashed),
            (from, event) => Err(FleetError::StateTransition(format!(
                "cannot apply {} to a {} runnable",
                event.event_type(),
                from
            ))),
        }
    }
}
