//! # Transport Boundary
//!
//! The routing core never opens sockets. It consumes two abstractions provided
//! by a transport collaborator:
//!
//! - [`Channel`]: a named, bidirectional, already-accepted connection used for
//!   Index↔Worker and Index↔UI traffic. Inbound bytes, disconnects and
//!   keep-alives are pushed by the transport into the connection handles the
//!   index and worker hand out.
//! - [`PeerClient`]: a point-to-point request/response channel used for
//!   Worker↔Worker delivery, answered on the other side by a [`PeerEndpoint`].
//!
//! [`memory`] provides in-process implementations of both.

pub mod memory;
pub mod outbox;

pub use outbox::Outbox;

use crate::messaging::Message;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Failures of the underlying transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Channel closed: {0}")]
    Closed(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

/// Named bidirectional channel to an index, worker or UI session
#[async_trait]
pub trait Channel: Send + Sync {
    /// Name of the remote end, used for logging
    fn name(&self) -> &str;

    /// Write one structured message
    async fn send(&self, message: &Message) -> Result<(), TransportError>;

    /// Extend the connection's keep-alive deadline
    async fn extend(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Close the connection; the transport reports the disconnect afterwards
    async fn close(&self) -> Result<(), TransportError>;
}

/// Request methods used between workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// Response to a peer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl PeerResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            body: Vec::new(),
        }
    }

    pub fn with_status(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Client side of the worker-to-worker request/response channel
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Vec<u8>,
    ) -> Result<PeerResponse, TransportError>;
}

/// Server side of the worker-to-worker request/response channel
#[async_trait]
pub trait PeerEndpoint: Send + Sync {
    async fn handle_request(&self, method: Method, path: &str, body: &[u8]) -> PeerResponse;
}
