//! # Error Types
//!
//! Structured error handling for the routing core using thiserror.
//!
//! Nothing in here is process-fatal: command-path errors are returned to the
//! immediate caller, event-path errors are logged by whoever produced them.

use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced by the routing, registry and lifecycle layers
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Malformed payload for message {name}: {reason}")]
    MalformedPayload { name: String, reason: String },

    #[error("Message {0} has no destination")]
    MissingDestination(String),

    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Peer {peer} responded with status {status}: {message}")]
    PeerResponse {
        peer: String,
        status: u16,
        message: String,
    },

    #[error("Partial delivery: {delivered} delivered, {} failed", failures.len())]
    PartialDelivery {
        delivered: usize,
        failures: Vec<DeliveryFailure>,
    },

    #[error("State transition error: {0}")]
    StateTransition(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Dispatcher is closed")]
    DispatcherClosed,

    #[error("Handler error: {0}")]
    Handler(String),
}

impl FleetError {
    /// Wrap a payload (de)serialization failure for the named message
    pub fn malformed_payload(name: impl Into<String>, error: impl fmt::Display) -> Self {
        Self::MalformedPayload {
            name: name.into(),
            reason: error.to_string(),
        }
    }

    /// Failures collected during a broadcast, empty for every other variant
    pub fn failures(&self) -> &[DeliveryFailure] {
        match self {
            Self::PartialDelivery { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// One destination that could not be reached during a fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub destination: String,
    pub error: String,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.destination, self.error)
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
