//! Ordered, non-blocking write queue in front of a [`Channel`].
//!
//! Registries enqueue onto an outbox while holding their locks; the actual
//! write happens on a dedicated writer task, so no lock is ever held across
//! network I/O and per-connection ordering is preserved.

use super::{Channel, TransportError};
use crate::messaging::Message;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

enum Outbound {
    Message(Message),
    Extend,
    Close,
}

/// Sending half of a channel's writer task
#[derive(Clone)]
pub struct Outbox {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Outbox {
    /// Start a writer task for `channel` on the process tracker.
    ///
    /// The writer stops, closing the channel, when the outbox is closed or the
    /// process scope is cancelled. On cancellation the queue is sealed and what
    /// was already enqueued, up to a pending close, is still written.
    pub fn spawn(
        channel: Arc<dyn Channel>,
        tracker: &TaskTracker,
        token: CancellationToken,
    ) -> Self {
        let name: Arc<str> = Arc::from(channel.name());
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

        let writer_name = name.clone();
        tracker.spawn(async move {
            let mut draining = false;
            loop {
                let next = if draining {
                    rx.recv().await
                } else {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            debug!(channel = %writer_name, "Outbox cancelled, draining queue");
                            rx.close();
                            draining = true;
                            continue;
                        }
                        next = rx.recv() => next,
                    }
                };

                match next {
                    Some(Outbound::Message(message)) => {
                        if let Err(e) = channel.send(&message).await {
                            warn!(
                                channel = %writer_name,
                                message = %message.name,
                                error = %e,
                                "Writing message failed"
                            );
                        }
                    }
                    Some(Outbound::Extend) => {
                        if let Err(e) = channel.extend().await {
                            warn!(channel = %writer_name, error = %e, "Extending connection failed");
                        }
                    }
                    Some(Outbound::Close) | None => break,
                }
            }

            rx.close();
            if let Err(e) = channel.close().await {
                debug!(channel = %writer_name, error = %e, "Closing channel failed");
            }
            debug!(channel = %writer_name, "Outbox writer stopped");
        });

        Self { name, tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a message for writing
    pub fn send(&self, message: Message) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Message(message))
            .map_err(|_| TransportError::Closed(self.name.to_string()))
    }

    /// Enqueue a keep-alive extension
    pub fn extend(&self) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Extend)
            .map_err(|_| TransportError::Closed(self.name.to_string()))
    }

    /// Close the channel once everything enqueued so far is written
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether both handles feed the same writer
    pub fn same_writer(&self, other: &Outbox) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Identifier;
    use crate::transport::memory::MemoryChannel;
    use std::time::Duration;

    #[tokio::test]
    async fn test_messages_written_in_order_then_closed() {
        let (channel, mut rx) = MemoryChannel::new("w1");
        let tracker = TaskTracker::new();
        let outbox = Outbox::spawn(channel.clone(), &tracker, CancellationToken::new());

        for name in ["a", "b", "c"] {
            outbox.send(Message::new(Identifier::index(), None, name)).unwrap();
        }
        outbox.extend().unwrap();
        outbox.close();

        let mut names = Vec::new();
        while let Some(bytes) = rx.recv().await {
            names.push(Message::from_bytes(&bytes).unwrap().name);
        }
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(channel.extensions(), 1);
        assert!(channel.is_closed());

        tracker.close();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait())
            .await
            .unwrap();
        assert!(outbox.is_closed());
        assert!(outbox.send(Message::new(Identifier::index(), None, "late")).is_err());
    }

    #[tokio::test]
    async fn test_cancellation_drains_queue_before_closing() {
        let (channel, mut rx) = MemoryChannel::new("w1");
        let token = CancellationToken::new();
        let outbox = Outbox::spawn(channel.clone(), &TaskTracker::new(), token.clone());

        for name in ["a", "b"] {
            outbox.send(Message::new(Identifier::index(), None, name)).unwrap();
        }
        outbox.close();
        token.cancel();

        let mut names = Vec::new();
        while let Some(bytes) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
        {
            names.push(Message::from_bytes(&bytes).unwrap().name);
        }
        assert_eq!(names, vec!["a", "b"]);
        assert!(channel.is_closed());
        assert!(outbox.send(Message::new(Identifier::index(), None, "late")).is_err());
    }

    #[tokio::test]
    async fn test_cancellation_stops_writer() {
        let (channel, mut rx) = MemoryChannel::new("w1");
        let token = CancellationToken::new();
        let _outbox = Outbox::spawn(channel.clone(), &TaskTracker::new(), token.clone());

        token.cancel();
        assert!(tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .is_none());
        assert!(channel.is_closed());
    }
}
