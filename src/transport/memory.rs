//! In-process transport implementations.
//!
//! [`MemoryChannel`] hands every written message to a byte receiver, which is
//! enough to wire an index and its workers together inside one process.
//! [`MemoryPeerNetwork`] resolves worker addresses to registered
//! [`PeerEndpoint`]s.

use super::{Channel, Method, PeerClient, PeerEndpoint, PeerResponse, TransportError};
use crate::messaging::Message;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Channel writing encoded messages to an in-process receiver
pub struct MemoryChannel {
    name: String,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    extensions: AtomicUsize,
}

impl MemoryChannel {
    /// Create a channel and the receiver its writes arrive on.
    ///
    /// The receiver yields `None` once the channel is closed.
    pub fn new(name: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            name: name.into(),
            tx: Mutex::new(Some(tx)),
            extensions: AtomicUsize::new(0),
        });
        (channel, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Number of keep-alive extensions requested so far
    pub fn extensions(&self) -> usize {
        self.extensions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let bytes = message
            .to_bytes()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let guard = self.tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| TransportError::Closed(self.name.clone()))?;
        tx.send(bytes)
            .map_err(|_| TransportError::Closed(self.name.clone()))
    }

    async fn extend(&self) -> Result<(), TransportError> {
        self.extensions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.tx.lock().take();
        Ok(())
    }
}

/// Address book of in-process worker endpoints
#[derive(Clone, Default)]
pub struct MemoryPeerNetwork {
    endpoints: Arc<DashMap<String, Arc<dyn PeerEndpoint>>>,
}

impl MemoryPeerNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `endpoint` reachable under the base address `addr`
    pub fn register(&self, addr: impl Into<String>, endpoint: Arc<dyn PeerEndpoint>) {
        self.endpoints.insert(addr.into(), endpoint);
    }

    /// Make an address unreachable
    pub fn unregister(&self, addr: &str) -> bool {
        self.endpoints.remove(addr).is_some()
    }

    fn resolve(&self, url: &str) -> Option<(Arc<dyn PeerEndpoint>, String)> {
        self.endpoints.iter().find_map(|entry| {
            url.strip_prefix(entry.key().as_str())
                .filter(|path| path.is_empty() || path.starts_with('/'))
                .map(|path| (entry.value().clone(), path.to_string()))
        })
    }
}

#[async_trait]
impl PeerClient for MemoryPeerNetwork {
    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Vec<u8>,
    ) -> Result<PeerResponse, TransportError> {
        let (endpoint, path) = self
            .resolve(url)
            .ok_or_else(|| TransportError::Unreachable(url.to_string()))?;
        debug!(%method, url, "In-memory peer request");
        Ok(endpoint.handle_request(method, &path, &body).await)
    }
}
