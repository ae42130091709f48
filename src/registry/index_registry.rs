//! # Index Registry
//!
//! Canonical directory of connected workers and UI sessions, their
//! subscriptions, and the routes between them.
//!
//! ## Locking
//!
//! The worker directory and the UI directory each sit behind their own lock.
//! When both are needed the worker lock is taken first. Locks are only held to
//! read, copy or mutate; the only "send" performed under a lock is enqueueing
//! onto an [`Outbox`], which never blocks. That is what makes registration
//! atomic: the joiner's record is inserted and its welcome snapshot enqueued
//! under the same write lock, so any event produced afterwards is queued
//! behind the welcome on the joiner's connection.
//!
//! ## Subscriptions
//!
//! UI interest is reference counted per message name. Workers are told when a
//! name becomes wanted (0→1) and when it stops being wanted (1→0), so they only
//! emit UI-bound messages somebody is listening to.

use crate::config::IndexConfig;
use crate::constants::message_names;
use crate::error::{FleetError, Result};
use crate::logging::{log_registry_operation, log_routing_operation};
use crate::messaging::{Identifier, IdentifierType, Message, UiWelcome, WorkerInfo};
use crate::state_machine::RunnableStatus;
use crate::transport::Outbox;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

struct WorkerEntry {
    info: WorkerInfo,
    outbox: Outbox,
    connection_id: u64,
}

struct UiEntry {
    outbox: Outbox,
    subscriptions: HashSet<String>,
}

#[derive(Default)]
struct UiDirectory {
    sessions: HashMap<String, UiEntry>,
    /// Message name → sessions subscribed to it. Keys never map to empty sets.
    subscribers: HashMap<String, HashSet<String>>,
}

/// Outcome of a worker registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRegistration {
    /// Workers known at registration time, the joiner included
    pub snapshot: Vec<WorkerInfo>,
    /// Whether a live record under the same name was taken over
    pub took_over: bool,
}

/// Directory statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRegistryStats {
    pub workers: usize,
    pub ui_sessions: usize,
    pub wanted_message_names: usize,
}

/// Worker/UI directory owned by the index
pub struct IndexRegistry {
    workers: RwLock<HashMap<String, WorkerEntry>>,
    ui: RwLock<UiDirectory>,
    config: IndexConfig,
}

impl std::fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRegistry")
            .field("stats", &self.stats())
            .field("config", &self.config)
            .finish()
    }
}

impl IndexRegistry {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            ui: RwLock::new(UiDirectory::default()),
            config,
        }
    }

    fn identifier() -> Identifier {
        Identifier::index()
    }

    /// Store a worker record, reply with the welcome snapshot and announce it.
    ///
    /// A live record under the same name is evicted first, exactly as if it
    /// had disconnected; its connection is closed when
    /// `close_evicted_connections` is set. A record owned by the same
    /// connection is refreshed in place instead.
    pub fn register_worker(
        &self,
        info: WorkerInfo,
        outbox: Outbox,
        connection_id: u64,
    ) -> Result<WorkerRegistration> {
        let name = info.name.clone();
        if name.is_empty() {
            return Err(FleetError::malformed_payload(
                message_names::CMD_WORKER_REGISTER,
                "worker name is empty",
            ));
        }

        let registered =
            Message::event_worker_registered(Self::identifier(), None, &info)?;

        let (evicted, others, snapshot) = {
            let mut workers = self.workers.write();
            let evicted = workers.remove(&name);

            let mut snapshot: Vec<WorkerInfo> =
                workers.values().map(|entry| entry.info.clone()).collect();
            snapshot.push(info.clone());
            snapshot.sort_by(|a, b| a.name.cmp(&b.name));

            let welcome = Message::event_worker_welcome(
                Self::identifier(),
                Some(Identifier::worker(&name)),
                &snapshot,
            )?;
            if let Err(e) = outbox.send(welcome) {
                warn!(worker = %name, error = %e, "Enqueueing welcome failed");
            }

            let wanted = self.wanted_message_names();
            if !wanted.is_empty() {
                let add = Message::ui_message_names_add(
                    Self::identifier(),
                    Some(Identifier::worker(&name)),
                    &wanted,
                )?;
                if let Err(e) = outbox.send(add) {
                    warn!(worker = %name, error = %e, "Enqueueing wanted message names failed");
                }
            }

            workers.insert(
                name.clone(),
                WorkerEntry {
                    info,
                    outbox,
                    connection_id,
                },
            );

            let others: Vec<Outbox> = workers
                .iter()
                .filter(|(other, _)| **other != name)
                .map(|(_, entry)| entry.outbox.clone())
                .collect();

            (evicted, others, snapshot)
        };

        let refreshed = evicted
            .as_ref()
            .is_some_and(|old| old.connection_id == connection_id);
        let evicted = evicted.filter(|_| !refreshed);
        let took_over = evicted.is_some();
        if let Some(old) = evicted {
            warn!(
                worker = %name,
                old_connection = old.connection_id,
                new_connection = connection_id,
                close_evicted = self.config.close_evicted_connections,
                "Worker re-registered under a live name, taking over"
            );
            if self.config.close_evicted_connections {
                old.outbox.close();
            }
            let disconnected =
                Message::event_worker_disconnected(Self::identifier(), None, &name)?;
            self.announce(&disconnected, &others);
        }

        self.announce(&registered, &others);

        log_registry_operation(
            "register",
            "worker",
            &name,
            if refreshed { "refreshed" } else { "registered" },
            took_over.then_some("takeover"),
        );

        Ok(WorkerRegistration {
            snapshot,
            took_over,
        })
    }

    /// Remove a worker record if it still belongs to `connection_id`.
    ///
    /// A close reported by a connection that was already taken over is a no-op.
    pub fn unregister_worker(&self, name: &str, connection_id: u64) -> bool {
        let (removed, others) = {
            let mut workers = self.workers.write();
            match workers.get(name) {
                Some(entry) if entry.connection_id == connection_id => {}
                Some(_) => {
                    debug!(worker = %name, connection_id, "Ignoring close of a superseded connection");
                    return false;
                }
                None => return false,
            }
            let removed = workers.remove(name);
            let others: Vec<Outbox> = workers.values().map(|e| e.outbox.clone()).collect();
            (removed, others)
        };

        if removed.is_none() {
            return false;
        }

        match Message::event_worker_disconnected(Self::identifier(), None, name) {
            Ok(message) => self.announce(&message, &others),
            Err(e) => warn!(worker = %name, error = %e, "Building disconnected event failed"),
        }
        log_registry_operation("unregister", "worker", name, "disconnected", None);
        true
    }

    /// Create a UI session with a fresh opaque name and welcome it
    pub fn register_ui(&self, outbox: Outbox) -> Result<String> {
        let name = Uuid::new_v4().simple().to_string();

        {
            let workers = self.workers.read();
            let mut snapshot: Vec<WorkerInfo> = workers.values().map(|e| e.info.clone()).collect();
            snapshot.sort_by(|a, b| a.name.cmp(&b.name));

            let welcome = Message::event_ui_welcome(
                Self::identifier(),
                Some(Identifier::ui(&name)),
                &UiWelcome {
                    name: name.clone(),
                    workers: snapshot,
                },
            )?;
            outbox.send(welcome)?;

            self.ui.write().sessions.insert(
                name.clone(),
                UiEntry {
                    outbox,
                    subscriptions: HashSet::new(),
                },
            );
        }

        log_registry_operation("register", "ui", &name, "connected", None);
        Ok(name)
    }

    /// Drop a UI session and every subscription it held
    pub fn unregister_ui(&self, name: &str) -> bool {
        let no_longer_wanted = {
            let mut ui = self.ui.write();
            let Some(entry) = ui.sessions.remove(name) else {
                return false;
            };

            let mut emptied = Vec::new();
            for message_name in entry.subscriptions {
                if let Some(sessions) = ui.subscribers.get_mut(&message_name) {
                    sessions.remove(name);
                    if sessions.is_empty() {
                        ui.subscribers.remove(&message_name);
                        emptied.push(message_name);
                    }
                }
            }
            emptied.sort();
            emptied
        };

        if !no_longer_wanted.is_empty() {
            self.notify_workers_of_names(message_names::UI_MESSAGE_NAMES_DELETE, &no_longer_wanted);
        }

        match Message::event_ui_disconnected(
            Self::identifier(),
            Some(Identifier::of_type(IdentifierType::Ui)),
            name,
        ) {
            Ok(message) => {
                self.fan_out_to_ui(&message);
            }
            Err(e) => warn!(ui = %name, error = %e, "Building ui disconnected event failed"),
        }

        log_registry_operation("unregister", "ui", name, "disconnected", None);
        true
    }

    /// Subscribe a session to message names; returns names that became wanted
    pub fn subscribe_ui(&self, session: &str, names: &[String]) -> Result<Vec<String>> {
        let newly_wanted = {
            let mut ui = self.ui.write();
            let UiDirectory {
                sessions,
                subscribers,
            } = &mut *ui;
            let entry = sessions
                .get_mut(session)
                .ok_or_else(|| FleetError::UnknownDestination(format!("ui {session}")))?;

            let mut added = Vec::new();
            for name in names {
                if !entry.subscriptions.insert(name.clone()) {
                    continue;
                }
                let subscribed = subscribers.entry(name.clone()).or_default();
                if subscribed.is_empty() {
                    added.push(name.clone());
                }
                subscribed.insert(session.to_string());
            }
            added
        };

        if !newly_wanted.is_empty() {
            self.notify_workers_of_names(message_names::UI_MESSAGE_NAMES_ADD, &newly_wanted);
        }
        debug!(ui = %session, names = ?names, newly_wanted = ?newly_wanted, "UI subscribed");
        Ok(newly_wanted)
    }

    /// Unsubscribe a session; returns names nobody wants anymore
    pub fn unsubscribe_ui(&self, session: &str, names: &[String]) -> Result<Vec<String>> {
        let no_longer_wanted = {
            let mut ui = self.ui.write();
            let UiDirectory {
                sessions,
                subscribers,
            } = &mut *ui;
            let entry = sessions
                .get_mut(session)
                .ok_or_else(|| FleetError::UnknownDestination(format!("ui {session}")))?;

            let mut removed = Vec::new();
            for name in names {
                if !entry.subscriptions.remove(name) {
                    continue;
                }
                if let Some(subscribed) = subscribers.get_mut(name) {
                    subscribed.remove(session);
                    if subscribed.is_empty() {
                        subscribers.remove(name);
                        removed.push(name.clone());
                    }
                }
            }
            removed
        };

        if !no_longer_wanted.is_empty() {
            self.notify_workers_of_names(message_names::UI_MESSAGE_NAMES_DELETE, &no_longer_wanted);
        }
        debug!(ui = %session, names = ?names, "UI unsubscribed");
        Ok(no_longer_wanted)
    }

    /// Deliver a UI-bound message; returns the number of recipients.
    ///
    /// A concrete target gets it only if that session exists. A UI filter
    /// resolves to the sessions subscribed to the message name, possibly none.
    pub fn route_to_ui(&self, message: &Message) -> Result<usize> {
        let to = message
            .to
            .as_ref()
            .ok_or_else(|| FleetError::MissingDestination(message.name.clone()))?;

        if let Some(name) = &to.name {
            let outbox = self
                .ui
                .read()
                .sessions
                .get(name)
                .map(|entry| entry.outbox.clone())
                .ok_or_else(|| FleetError::UnknownDestination(format!("ui {name}")))?;
            outbox.send(message.clone())?;
            log_routing_operation("route_to_ui", &message.name, &message.from, name, "sent", None);
            return Ok(1);
        }

        Ok(self.fan_out_to_ui(message))
    }

    /// Deliver a worker- or runnable-bound message; returns the number of recipients.
    ///
    /// A message naming a worker goes only there; otherwise it is broadcast to
    /// every worker except the sender.
    pub fn route_to_worker(&self, message: &Message) -> Result<usize> {
        let to = message
            .to
            .as_ref()
            .ok_or_else(|| FleetError::MissingDestination(message.name.clone()))?;

        if let Some(worker) = to.worker_name() {
            let outbox = self
                .workers
                .read()
                .get(worker)
                .map(|entry| entry.outbox.clone())
                .ok_or_else(|| FleetError::UnknownDestination(format!("worker {worker}")))?;
            outbox.send(message.clone())?;
            log_routing_operation(
                "route_to_worker",
                &message.name,
                &message.from,
                worker,
                "sent",
                None,
            );
            return Ok(1);
        }

        let sender = message.from.worker_name();
        let outboxes: Vec<(String, Outbox)> = self
            .workers
            .read()
            .iter()
            .filter(|(name, _)| Some(name.as_str()) != sender)
            .map(|(name, entry)| (name.clone(), entry.outbox.clone()))
            .collect();

        let mut delivered = 0;
        for (name, outbox) in outboxes {
            match outbox.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(worker = %name, message = %message.name, error = %e, "Broadcast to worker failed"),
            }
        }
        Ok(delivered)
    }

    /// Keep a worker record in step with its runnable status events
    pub fn update_runnable_status(&self, worker: &str, runnable: &str, status: RunnableStatus) -> bool {
        let mut workers = self.workers.write();
        let Some(entry) = workers.get_mut(worker) else {
            return false;
        };
        match entry.info.runnables.iter_mut().find(|r| r.name == runnable) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    /// Forward a keep-alive to a UI session's connection
    pub fn extend_ui_connection(&self, session: &str) -> Result<()> {
        let outbox = self
            .ui
            .read()
            .sessions
            .get(session)
            .map(|entry| entry.outbox.clone())
            .ok_or_else(|| FleetError::UnknownDestination(format!("ui {session}")))?;
        outbox.extend()?;
        Ok(())
    }

    pub fn workers(&self) -> Vec<WorkerInfo> {
        let mut workers: Vec<WorkerInfo> =
            self.workers.read().values().map(|e| e.info.clone()).collect();
        workers.sort_by(|a, b| a.name.cmp(&b.name));
        workers
    }

    pub fn worker(&self, name: &str) -> Option<WorkerInfo> {
        self.workers.read().get(name).map(|e| e.info.clone())
    }

    pub fn ui_sessions(&self) -> Vec<String> {
        let mut sessions: Vec<String> = self.ui.read().sessions.keys().cloned().collect();
        sessions.sort();
        sessions
    }

    pub fn subscribers(&self, message_name: &str) -> Vec<String> {
        let mut sessions: Vec<String> = self
            .ui
            .read()
            .subscribers
            .get(message_name)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        sessions.sort();
        sessions
    }

    /// Message names at least one UI session is subscribed to
    pub fn wanted_message_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ui.read().subscribers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> IndexRegistryStats {
        let workers = self.workers.read().len();
        let ui = self.ui.read();
        IndexRegistryStats {
            workers,
            ui_sessions: ui.sessions.len(),
            wanted_message_names: ui.subscribers.len(),
        }
    }

    /// Close every connection, used on shutdown
    pub fn close_all(&self) {
        for entry in self.workers.read().values() {
            entry.outbox.close();
        }
        for entry in self.ui.read().sessions.values() {
            entry.outbox.close();
        }
        info!("Closed all index connections");
    }

    /// Send a membership event to the given workers and to subscribed UIs
    fn announce(&self, message: &Message, workers: &[Outbox]) {
        let to_workers = message.readdressed(Identifier::of_type(IdentifierType::Worker));
        for outbox in workers {
            if let Err(e) = outbox.send(to_workers.clone()) {
                debug!(worker = %outbox.name(), message = %message.name, error = %e, "Announcement dropped");
            }
        }
        self.fan_out_to_ui(&message.readdressed(Identifier::of_type(IdentifierType::Ui)));
    }

    fn notify_workers_of_names(&self, message_name: &str, names: &[String]) {
        let message = match Message::new(
            Self::identifier(),
            Some(Identifier::of_type(IdentifierType::Worker)),
            message_name,
        )
        .with_payload(names)
        {
            Ok(message) => message,
            Err(e) => {
                warn!(message = %message_name, error = %e, "Building message names update failed");
                return;
            }
        };

        let outboxes: Vec<Outbox> = self.workers.read().values().map(|e| e.outbox.clone()).collect();
        for outbox in outboxes {
            if let Err(e) = outbox.send(message.clone()) {
                debug!(worker = %outbox.name(), error = %e, "Message names update dropped");
            }
        }
    }

    /// Deliver to every session subscribed to the message name
    fn fan_out_to_ui(&self, message: &Message) -> usize {
        let outboxes: Vec<(String, Outbox)> = {
            let ui = self.ui.read();
            match ui.subscribers.get(&message.name) {
                Some(sessions) => sessions
                    .iter()
                    .filter_map(|s| ui.sessions.get(s).map(|e| (s.clone(), e.outbox.clone())))
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut delivered = 0;
        for (session, outbox) in outboxes {
            match outbox.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(ui = %session, message = %message.name, error = %e, "UI delivery dropped"),
            }
        }
        if delivered > 0 {
            log_routing_operation(
                "fan_out_to_ui",
                &message.name,
                &message.from,
                "ui",
                "sent",
                Some(&format!("{delivered} sessions")),
            );
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::RunnableInfo;
    use crate::transport::memory::MemoryChannel;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    struct Peer {
        outbox: Outbox,
        channel: std::sync::Arc<MemoryChannel>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    impl Peer {
        fn new(name: &str) -> Self {
            let (channel, rx) = MemoryChannel::new(name);
            let outbox = Outbox::spawn(channel.clone(), &TaskTracker::new(), CancellationToken::new());
            Self { outbox, channel, rx }
        }

        async fn next(&mut self) -> Message {
            let bytes = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            Message::from_bytes(&bytes).unwrap()
        }

        async fn nothing_more(&mut self) {
            assert!(
                tokio::time::timeout(Duration::from_millis(50), self.rx.recv())
                    .await
                    .is_err(),
                "unexpected message"
            );
        }
    }

    fn info(name: &str) -> WorkerInfo {
        WorkerInfo::new(name, format!("mem://{name}")).with_runnable(RunnableInfo {
            name: "echo".to_string(),
            description: String::new(),
            status: RunnableStatus::Stopped,
            ui_homepage: None,
        })
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_register_then_disconnect_leaves_no_trace() {
        let registry = IndexRegistry::new(IndexConfig::default());
        let mut w = Peer::new("w");

        let registration = registry.register_worker(info("w"), w.outbox.clone(), 1).unwrap();
        assert!(!registration.took_over);
        assert_eq!(registration.snapshot.len(), 1);

        let welcome = w.next().await;
        assert_eq!(welcome.name, message_names::EVENT_WORKER_WELCOME);
        assert_eq!(welcome.parse_worker_list().unwrap(), vec![info("w")]);

        assert!(registry.unregister_worker("w", 1));
        assert!(registry.workers().is_empty());
        assert!(registry.worker("w").is_none());
        assert!(!registry.unregister_worker("w", 1));
    }

    #[tokio::test]
    async fn test_registration_is_announced_to_others() {
        let registry = IndexRegistry::new(IndexConfig::default());
        let mut a = Peer::new("a");
        let mut b = Peer::new("b");

        registry.register_worker(info("a"), a.outbox.clone(), 1).unwrap();
        assert_eq!(a.next().await.name, message_names::EVENT_WORKER_WELCOME);

        registry.register_worker(info("b"), b.outbox.clone(), 2).unwrap();
        let welcome = b.next().await;
        assert_eq!(welcome.parse_worker_list().unwrap().len(), 2);
        b.nothing_more().await;

        let registered = a.next().await;
        assert_eq!(registered.name, message_names::EVENT_WORKER_REGISTERED);
        assert_eq!(registered.parse_worker_info().unwrap().name, "b");

        registry.unregister_worker("b", 2);
        let disconnected = a.next().await;
        assert_eq!(disconnected.name, message_names::EVENT_WORKER_DISCONNECTED);
        assert_eq!(disconnected.parse_name().unwrap(), "b");
    }

    #[tokio::test]
    async fn test_takeover_closes_evicted_connection() {
        let registry = IndexRegistry::new(IndexConfig::default());
        let mut old = Peer::new("w-old");
        let mut new = Peer::new("w-new");

        registry.register_worker(info("w"), old.outbox.clone(), 1).unwrap();
        old.next().await;

        let registration = registry.register_worker(info("w"), new.outbox.clone(), 2).unwrap();
        assert!(registration.took_over);
        assert_eq!(new.next().await.name, message_names::EVENT_WORKER_WELCOME);

        // The evicted connection is closed once its queue drains
        assert!(tokio::time::timeout(Duration::from_secs(2), old.rx.recv())
            .await
            .unwrap()
            .is_none());
        assert!(old.channel.is_closed());

        // A late close from the evicted connection must not remove the new record
        assert!(!registry.unregister_worker("w", 1));
        assert!(registry.worker("w").is_some());
        assert!(registry.unregister_worker("w", 2));
    }

    #[tokio::test]
    async fn test_same_connection_reregistration_is_a_refresh() {
        let registry = IndexRegistry::new(IndexConfig::default());
        let mut w = Peer::new("w");
        let mut other = Peer::new("other");

        registry.register_worker(info("other"), other.outbox.clone(), 1).unwrap();
        other.next().await;
        registry.register_worker(info("w"), w.outbox.clone(), 2).unwrap();
        w.next().await;
        assert_eq!(other.next().await.name, message_names::EVENT_WORKER_REGISTERED);

        let registration = registry.register_worker(info("w"), w.outbox.clone(), 2).unwrap();
        assert!(!registration.took_over);
        assert_eq!(w.next().await.name, message_names::EVENT_WORKER_WELCOME);
        assert!(!w.channel.is_closed());

        // Siblings see a fresh registration, never a disconnect
        assert_eq!(other.next().await.name, message_names::EVENT_WORKER_REGISTERED);
        other.nothing_more().await;
        assert!(registry.unregister_worker("w", 2));
    }

    #[tokio::test]
    async fn test_takeover_can_leave_evicted_connection_open() {
        let registry = IndexRegistry::new(IndexConfig {
            close_evicted_connections: false,
            ..Default::default()
        });
        let mut old = Peer::new("w-old");
        let new = Peer::new("w-new");

        registry.register_worker(info("w"), old.outbox.clone(), 1).unwrap();
        old.next().await;
        registry.register_worker(info("w"), new.outbox.clone(), 2).unwrap();

        old.nothing_more().await;
        assert!(!old.channel.is_closed());
        assert_eq!(registry.workers().len(), 1);
    }

    #[tokio::test]
    async fn test_ui_subscription_routing() {
        let registry = IndexRegistry::new(IndexConfig::default());
        let mut u1 = Peer::new("u1");
        let mut u2 = Peer::new("u2");
        let s1 = registry.register_ui(u1.outbox.clone()).unwrap();
        let s2 = registry.register_ui(u2.outbox.clone()).unwrap();
        assert_ne!(s1, s2);

        let welcome = u1.next().await.parse_ui_welcome().unwrap();
        assert_eq!(welcome.name, s1);
        u2.next().await;

        assert_eq!(
            registry.subscribe_ui(&s1, &names(&["samples"])).unwrap(),
            names(&["samples"])
        );

        let samples = Message::new(
            Identifier::runnable("mic", "w"),
            Some(Identifier::of_type(IdentifierType::Ui)),
            "samples",
        );
        assert_eq!(registry.route_to_ui(&samples).unwrap(), 1);
        assert_eq!(u1.next().await.name, "samples");
        u2.nothing_more().await;

        assert_eq!(
            registry.unsubscribe_ui(&s1, &names(&["samples"])).unwrap(),
            names(&["samples"])
        );
        assert_eq!(registry.route_to_ui(&samples).unwrap(), 0);
        u1.nothing_more().await;
    }

    #[tokio::test]
    async fn test_concrete_ui_target() {
        let registry = IndexRegistry::new(IndexConfig::default());
        let mut u1 = Peer::new("u1");
        let s1 = registry.register_ui(u1.outbox.clone()).unwrap();
        u1.next().await;

        let direct = Message::new(Identifier::index(), Some(Identifier::ui(&s1)), "hello");
        assert_eq!(registry.route_to_ui(&direct).unwrap(), 1);
        assert_eq!(u1.next().await.name, "hello");

        let stale = Message::new(Identifier::index(), Some(Identifier::ui("gone")), "hello");
        assert!(matches!(
            registry.route_to_ui(&stale),
            Err(FleetError::UnknownDestination(_))
        ));
    }

    #[tokio::test]
    async fn test_reference_counted_worker_notifications() {
        let registry = IndexRegistry::new(IndexConfig::default());
        let mut w = Peer::new("w");
        registry.register_worker(info("w"), w.outbox.clone(), 1).unwrap();
        w.next().await;

        let a = registry.register_ui(Peer::new("a").outbox).unwrap();
        let b = registry.register_ui(Peer::new("b").outbox).unwrap();

        registry.subscribe_ui(&a, &names(&["samples"])).unwrap();
        let add = w.next().await;
        assert_eq!(add.name, message_names::UI_MESSAGE_NAMES_ADD);
        assert_eq!(add.parse_message_names().unwrap(), names(&["samples"]));

        // Second subscriber: no 0→1 transition, workers are not told again
        assert!(registry.subscribe_ui(&b, &names(&["samples"])).unwrap().is_empty());
        w.nothing_more().await;

        assert!(registry.unsubscribe_ui(&a, &names(&["samples"])).unwrap().is_empty());
        w.nothing_more().await;

        // Last subscriber leaves by disconnecting
        assert!(registry.unregister_ui(&b));
        let delete = w.next().await;
        assert_eq!(delete.name, message_names::UI_MESSAGE_NAMES_DELETE);
        assert_eq!(delete.parse_message_names().unwrap(), names(&["samples"]));
        assert!(registry.wanted_message_names().is_empty());
    }

    #[tokio::test]
    async fn test_late_worker_learns_wanted_names() {
        let registry = IndexRegistry::new(IndexConfig::default());
        let ui = registry.register_ui(Peer::new("u").outbox).unwrap();
        registry.subscribe_ui(&ui, &names(&["samples", "analysis"])).unwrap();

        let mut w = Peer::new("w");
        registry.register_worker(info("w"), w.outbox.clone(), 1).unwrap();
        assert_eq!(w.next().await.name, message_names::EVENT_WORKER_WELCOME);
        let add = w.next().await;
        assert_eq!(add.name, message_names::UI_MESSAGE_NAMES_ADD);
        assert_eq!(add.parse_message_names().unwrap(), names(&["analysis", "samples"]));
    }

    #[tokio::test]
    async fn test_unknown_ui_session_is_rejected() {
        let registry = IndexRegistry::new(IndexConfig::default());
        assert!(matches!(
            registry.subscribe_ui("ghost", &names(&["samples"])),
            Err(FleetError::UnknownDestination(_))
        ));
        assert!(registry.extend_ui_connection("ghost").is_err());
        assert!(!registry.unregister_ui("ghost"));
    }

    #[tokio::test]
    async fn test_route_to_worker_and_status_update() {
        let registry = IndexRegistry::new(IndexConfig::default());
        let mut a = Peer::new("a");
        let mut b = Peer::new("b");
        registry.register_worker(info("a"), a.outbox.clone(), 1).unwrap();
        registry.register_worker(info("b"), b.outbox.clone(), 2).unwrap();
        a.next().await;
        a.next().await;
        b.next().await;

        let start = Message::cmd_runnable_start(Identifier::ui("u"), Identifier::runnable("echo", "b"));
        assert_eq!(registry.route_to_worker(&start).unwrap(), 1);
        assert_eq!(b.next().await.name, message_names::CMD_RUNNABLE_START);
        a.nothing_more().await;

        let missing = Message::cmd_runnable_start(Identifier::ui("u"), Identifier::runnable("echo", "z"));
        assert!(matches!(
            registry.route_to_worker(&missing),
            Err(FleetError::UnknownDestination(_))
        ));

        let broadcast = Message::new(
            Identifier::worker("a"),
            Some(Identifier::of_type(IdentifierType::Worker)),
            "hello",
        );
        assert_eq!(registry.route_to_worker(&broadcast).unwrap(), 1);
        assert_eq!(b.next().await.name, "hello");
        a.nothing_more().await;

        assert!(registry.update_runnable_status("b", "echo", RunnableStatus::Running));
        assert_eq!(
            registry.worker("b").unwrap().runnable("echo").unwrap().status,
            RunnableStatus::Running
        );
        assert!(!registry.update_runnable_status("b", "nope", RunnableStatus::Running));
    }
}
