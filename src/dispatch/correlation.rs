//! # Done Correlation
//!
//! Promise registry pairing commands with their `done` events. Each command
//! that wants a one-shot result gets a fresh, monotonically increasing id; the
//! matching `done` message removes the entry and fires its callback exactly
//! once. Unknown and already-completed ids are explicit [`Completion::Unknown`]
//! outcomes rather than errors.

use crate::messaging::Message;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::debug;

/// Callback fired with the `done` message of a command
pub type OnDone = Box<dyn FnOnce(Message) + Send + Sync + 'static>;

/// Result of looking up a `done` message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A pending callback was found, removed and invoked
    Completed,
    /// No callback is pending under this id
    Unknown,
}

/// Guarded id → callback table
pub struct DoneRegistry {
    next_id: AtomicU64,
    pending: DashMap<u64, OnDone>,
}

impl std::fmt::Debug for DoneRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoneRegistry")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl DoneRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }

    /// Store a callback and return the id it is keyed by
    pub fn register(&self, callback: OnDone) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(id, callback);
        id
    }

    /// Register a receiver instead of a callback
    pub fn register_oneshot(&self) -> (u64, oneshot::Receiver<Message>) {
        let (tx, rx) = oneshot::channel();
        let id = self.register(Box::new(move |message| {
            let _ = tx.send(message);
        }));
        (id, rx)
    }

    /// Fire and forget the callback stored under `id`
    pub fn complete(&self, id: u64, message: Message) -> Completion {
        match self.pending.remove(&id) {
            Some((_, callback)) => {
                callback(message);
                Completion::Completed
            }
            None => {
                debug!(id, "No pending callback for done message");
                Completion::Unknown
            }
        }
    }

    /// Drop a pending callback without firing it
    pub fn forget(&self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for DoneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Identifier;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn done(id: u64) -> Message {
        Message::event_runnable_done(Identifier::runnable("echo", "micro"), None, id, None).unwrap()
    }

    #[test]
    fn test_ids_are_monotonic() {
        let registry = DoneRegistry::new();
        let a = registry.register(Box::new(|_| {}));
        let b = registry.register(Box::new(|_| {}));
        assert!(b > a);
        assert_eq!(registry.pending_count(), 2);
    }

    #[test]
    fn test_callback_fires_exactly_once() {
        let registry = DoneRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = registry.register(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(registry.complete(id, done(id)), Completion::Completed);
        assert_eq!(registry.complete(id, done(id)), Completion::Unknown);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let registry = DoneRegistry::new();
        assert_eq!(registry.complete(404, done(404)), Completion::Unknown);
        assert!(!registry.forget(404));
    }

    #[tokio::test]
    async fn test_concurrent_completion_is_exclusive() {
        let registry = Arc::new(DoneRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = registry.register(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { registry.complete(id, done(id)) }));
        }
        let outcomes = futures::future::join_all(tasks).await;
        let completed = outcomes
            .into_iter()
            .filter(|o| matches!(o, Ok(Completion::Completed)))
            .count();

        assert_eq!(completed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oneshot_registration() {
        let registry = DoneRegistry::new();
        let (id, rx) = registry.register_oneshot();
        registry.complete(id, done(id));
        assert_eq!(rx.await.unwrap().id, Some(id));
    }
}
