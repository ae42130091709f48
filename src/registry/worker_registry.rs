//! # Worker Registry
//!
//! A worker's local view of the fleet and its outbound routing table:
//!
//! - the runnables it hosts,
//! - a best-effort mirror of its siblings, kept current from the index's
//!   welcome/registered/disconnected events,
//! - the set of message names some UI currently wants,
//! - listenables: which runnable messages this worker wants from each sibling,
//!   and which siblings want messages from its own runnables,
//! - the outbox of its index connection.
//!
//! [`WorkerRegistry::route_outbound`] decides, per destination class, whether
//! a message goes to the index, to a sibling over the peer channel, or back
//! into the local dispatcher.

use crate::config::WorkerConfig;
use crate::error::{DeliveryFailure, FleetError, Result};
use crate::logging::{log_registry_operation, log_routing_operation};
use crate::messaging::{
    ErrorBody, Identifier, IdentifierType, Listenables, Message, RunnableInfo, TypeSet, WorkerInfo,
};
use crate::state_machine::RunnableHost;
use crate::transport::{Method, Outbox, PeerClient, TransportError};
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Where an outbound message ended up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Destinations that accepted the message: `index`, `ui`, `local` or a sibling name
    pub delivered: Vec<String>,
}

impl RouteReport {
    /// True when no class of the destination resolved to a recipient
    pub fn is_dropped(&self) -> bool {
        self.delivered.is_empty()
    }
}

/// Worker-side directory and outbound router
pub struct WorkerRegistry {
    name: String,
    addr: String,
    messages_path: String,
    peer_timeout: Duration,
    runnables: RwLock<BTreeMap<String, Arc<RunnableHost>>>,
    siblings: RwLock<HashMap<String, WorkerInfo>>,
    ui_names: RwLock<HashSet<String>>,
    /// Our interest, keyed by the sibling hosting the emitting runnables
    listenables: RwLock<HashMap<String, Listenables>>,
    /// Siblings' interest in our runnables, keyed by the listening sibling
    sibling_listenables: RwLock<HashMap<String, Listenables>>,
    index: RwLock<Option<Outbox>>,
    peers: Arc<dyn PeerClient>,
    local: mpsc::UnboundedSender<Message>,
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("name", &self.name)
            .field("runnables", &self.runnables.read().len())
            .field("siblings", &self.siblings.read().len())
            .field("ui_names", &self.ui_names.read().len())
            .field("connected", &self.index.read().is_some())
            .finish()
    }
}

impl WorkerRegistry {
    /// `local` receives every message addressed to this worker or its runnables
    pub fn new(
        config: &WorkerConfig,
        peers: Arc<dyn PeerClient>,
        local: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            addr: config.addr.clone(),
            messages_path: config.messages_path.clone(),
            peer_timeout: Duration::from_millis(config.peer_timeout_ms),
            runnables: RwLock::new(BTreeMap::new()),
            siblings: RwLock::new(HashMap::new()),
            ui_names: RwLock::new(HashSet::new()),
            listenables: RwLock::new(HashMap::new()),
            sibling_listenables: RwLock::new(HashMap::new()),
            index: RwLock::new(None),
            peers,
            local,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identifier(&self) -> Identifier {
        Identifier::worker(&self.name)
    }

    // Runnables

    pub fn add_runnable(&self, host: Arc<RunnableHost>) -> Result<()> {
        let mut runnables = self.runnables.write();
        if runnables.contains_key(host.name()) {
            return Err(FleetError::Configuration(format!(
                "runnable {} is already registered on worker {}",
                host.name(),
                self.name
            )));
        }
        runnables.insert(host.name().to_string(), host);
        Ok(())
    }

    pub fn runnable(&self, name: &str) -> Option<Arc<RunnableHost>> {
        self.runnables.read().get(name).cloned()
    }

    pub fn runnables(&self) -> Vec<RunnableInfo> {
        self.runnables.read().values().map(|host| host.info()).collect()
    }

    /// Record advertised to the index on registration
    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            name: self.name.clone(),
            addr: self.addr.clone(),
            runnables: self.runnables(),
        }
    }

    // Index connection

    /// Install the index connection, closing a previous one
    pub fn set_index(&self, outbox: Outbox) {
        if let Some(previous) = self.index.write().replace(outbox) {
            previous.close();
        }
    }

    /// Forget the index connection if `outbox` is still the installed one
    pub fn clear_index(&self, outbox: &Outbox) -> bool {
        let mut index = self.index.write();
        if index.as_ref().is_some_and(|current| current.same_writer(outbox)) {
            *index = None;
            return true;
        }
        false
    }

    pub fn is_connected(&self) -> bool {
        self.index.read().is_some()
    }

    // Sibling mirror

    /// Replace the sibling table with a welcome snapshot, excluding self
    pub fn replace_siblings(&self, workers: Vec<WorkerInfo>) {
        let mut siblings = self.siblings.write();
        siblings.clear();
        for worker in workers.into_iter().filter(|w| w.name != self.name) {
            siblings.insert(worker.name.clone(), worker);
        }
        self.sibling_listenables
            .write()
            .retain(|worker, _| siblings.contains_key(worker));
        debug!(worker = %self.name, siblings = siblings.len(), "Sibling table replaced");
    }

    pub fn add_sibling(&self, info: WorkerInfo) -> bool {
        if info.name == self.name {
            return false;
        }
        log_registry_operation("add_sibling", "worker", &info.name, "known", Some(&self.name));
        self.siblings.write().insert(info.name.clone(), info);
        true
    }

    pub fn remove_sibling(&self, name: &str) -> bool {
        let removed = self.siblings.write().remove(name).is_some();
        self.sibling_listenables.write().remove(name);
        if removed {
            log_registry_operation("remove_sibling", "worker", name, "forgotten", Some(&self.name));
        }
        removed
    }

    pub fn sibling(&self, name: &str) -> Option<WorkerInfo> {
        self.siblings.read().get(name).cloned()
    }

    pub fn siblings(&self) -> Vec<WorkerInfo> {
        let mut siblings: Vec<WorkerInfo> = self.siblings.read().values().cloned().collect();
        siblings.sort_by(|a, b| a.name.cmp(&b.name));
        siblings
    }

    // UI interest

    pub fn add_ui_names(&self, names: &[String]) {
        self.ui_names.write().extend(names.iter().cloned());
    }

    pub fn delete_ui_names(&self, names: &[String]) {
        let mut ui_names = self.ui_names.write();
        for name in names {
            ui_names.remove(name);
        }
    }

    /// Whether some UI session is subscribed to `message_name`
    pub fn ui_wants(&self, message_name: &str) -> bool {
        self.ui_names.read().contains(message_name)
    }

    pub fn ui_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ui_names.read().iter().cloned().collect();
        names.sort();
        names
    }

    /// Forget every UI subscription, used when the index connection is lost
    pub fn clear_ui_names(&self) {
        self.ui_names.write().clear();
    }

    // Listenables

    /// Record interest in `names` emitted by `runnable` on sibling `worker`.
    ///
    /// Returns false when every name was already recorded.
    pub fn add_listenables(&self, worker: &str, runnable: &str, names: &[String]) -> Result<bool> {
        if worker == self.name {
            return Err(FleetError::Configuration(format!(
                "worker {worker} cannot listen to its own runnables"
            )));
        }
        let mut listenables = self.listenables.write();
        let wanted = listenables
            .entry(worker.to_string())
            .or_default()
            .runnables
            .entry(runnable.to_string())
            .or_default();
        let before = wanted.len();
        wanted.extend(names.iter().cloned());
        Ok(wanted.len() > before)
    }

    /// Our interest in `worker`'s runnables, if any
    pub fn listenables(&self, worker: &str) -> Option<Listenables> {
        self.listenables
            .read()
            .get(worker)
            .filter(|listenables| !listenables.is_empty())
            .cloned()
    }

    /// The `listenables.register` message telling `worker` what we want from it
    pub fn listenables_registration(&self, worker: &str) -> Result<Option<Message>> {
        match self.listenables(worker) {
            Some(listenables) => Ok(Some(Message::listenables_register(
                self.identifier(),
                Identifier::worker(worker),
                &listenables,
            )?)),
            None => Ok(None),
        }
    }

    /// Registrations for every known sibling we listen to
    pub fn listenables_registrations(&self) -> Result<Vec<Message>> {
        let mut registrations = Vec::new();
        for sibling in self.siblings() {
            if let Some(message) = self.listenables_registration(&sibling.name)? {
                registrations.push(message);
            }
        }
        Ok(registrations)
    }

    /// Replace what sibling `worker` wants from our runnables
    pub fn register_sibling_listenables(&self, worker: &str, listenables: Listenables) {
        log_registry_operation(
            "register_listenables",
            "worker",
            worker,
            &format!("{} runnables", listenables.runnables.len()),
            Some(&self.name),
        );
        let mut table = self.sibling_listenables.write();
        if listenables.is_empty() {
            table.remove(worker);
        } else {
            table.insert(worker.to_string(), listenables);
        }
    }

    /// Siblings that want `message_name` from our runnable `runnable`
    pub fn listeners(&self, runnable: &str, message_name: &str) -> Vec<String> {
        let mut listeners: Vec<String> = self
            .sibling_listenables
            .read()
            .iter()
            .filter(|(_, listenables)| {
                listenables
                    .runnables
                    .get(runnable)
                    .is_some_and(|names| names.contains(message_name))
            })
            .map(|(worker, _)| worker.clone())
            .collect();
        listeners.sort();
        listeners
    }

    // Routing

    /// Route a message produced on this worker.
    ///
    /// Each type class admitted by the destination is handled independently.
    /// The first failing class aborts the rest and its error is returned.
    pub async fn route_outbound(&self, message: Message) -> Result<RouteReport> {
        let to = message
            .to
            .clone()
            .ok_or_else(|| FleetError::MissingDestination(message.name.clone()))?;

        let routed_class = [
            IdentifierType::Index,
            IdentifierType::Ui,
            IdentifierType::Worker,
            IdentifierType::Runnable,
        ]
        .iter()
        .any(|kind| to.admits(*kind));
        if !routed_class {
            return Err(FleetError::UnknownDestination(format!("untyped destination {to}")));
        }

        let mut report = RouteReport::default();

        if let Some(index_bound) = self.index_bound(&message, &to) {
            let delivered: Vec<String> = [IdentifierType::Index, IdentifierType::Ui]
                .into_iter()
                .filter(|kind| index_bound.admits(*kind))
                .map(|kind| kind.to_string())
                .collect();
            self.send_to_index(message.readdressed(index_bound))?;
            report.delivered.extend(delivered);
        }

        if to.admits(IdentifierType::Worker) || to.admits(IdentifierType::Runnable) {
            let delivered = self.send_to_workers(&message, &to).await?;
            report.delivered.extend(delivered);
        }

        Ok(report)
    }

    /// The index and UI classes of `to`, the only part the index gets to see.
    ///
    /// UI is kept only when some session wants the message. Worker classes are
    /// stripped since siblings are reached directly.
    fn index_bound(&self, message: &Message, to: &Identifier) -> Option<Identifier> {
        let index = to.admits(IdentifierType::Index);
        let mut ui = to.admits(IdentifierType::Ui);
        if ui && !self.ui_wants(&message.name) {
            debug!(worker = %self.name, message = %message.name, "No UI wants message, dropping");
            ui = false;
        }

        let kinds: TypeSet = [(IdentifierType::Index, index), (IdentifierType::Ui, ui)]
            .into_iter()
            .filter_map(|(kind, keep)| keep.then_some(kind))
            .collect();
        let mut narrowed = Identifier {
            kind: None,
            types: None,
            ..to.clone()
        };
        match kinds.len() {
            0 => return None,
            1 => narrowed.kind = kinds.iter().next(),
            _ => narrowed.types = Some(kinds),
        }
        Some(narrowed)
    }

    fn send_to_index(&self, message: Message) -> Result<()> {
        let outbox = self
            .index
            .read()
            .clone()
            .ok_or_else(|| TransportError::Closed("index".to_string()))?;
        log_routing_operation("send_to_index", &message.name, &message.from, "index", "sent", None);
        outbox.send(message)?;
        Ok(())
    }

    async fn send_to_workers(&self, message: &Message, to: &Identifier) -> Result<Vec<String>> {
        match to.worker_name() {
            Some(worker) if worker == self.name => {
                self.local
                    .send(message.clone())
                    .map_err(|_| FleetError::DispatcherClosed)?;
                Ok(vec!["local".to_string()])
            }
            Some(worker) => {
                let sibling = self
                    .sibling(worker)
                    .ok_or_else(|| FleetError::UnknownDestination(format!("worker {worker}")))?;
                let body = message.to_bytes()?;
                self.post_to_sibling(&sibling, body).await?;
                log_routing_operation("send_to_worker", &message.name, &message.from, worker, "sent", None);
                Ok(vec![sibling.name])
            }
            None => self.broadcast_to_siblings(message).await,
        }
    }

    /// Fan out to siblings. Messages from our own runnables only reach the
    /// siblings that registered a listenable for them.
    async fn broadcast_to_siblings(&self, message: &Message) -> Result<Vec<String>> {
        let mut siblings = self.siblings();
        if let Some(runnable) = self.local_runnable(&message.from) {
            let listeners = self.listeners(runnable, &message.name);
            siblings.retain(|sibling| listeners.contains(&sibling.name));
            if siblings.is_empty() {
                debug!(worker = %self.name, runnable, message = %message.name, "No sibling listens, dropping");
            }
        }
        if siblings.is_empty() {
            return Ok(Vec::new());
        }
        let body = message.to_bytes()?;

        let results = join_all(siblings.iter().map(|sibling| {
            let body = body.clone();
            async move { (sibling.name.clone(), self.post_to_sibling(sibling, body).await) }
        }))
        .await;

        let mut delivered = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in results {
            match result {
                Ok(()) => delivered.push(name),
                Err(e) => {
                    warn!(worker = %self.name, sibling = %name, message = %message.name, error = %e, "Broadcast to sibling failed");
                    failures.push(DeliveryFailure {
                        destination: name,
                        error: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(FleetError::PartialDelivery {
                delivered: delivered.len(),
                failures,
            })
        }
    }

    fn local_runnable<'a>(&self, from: &'a Identifier) -> Option<&'a str> {
        if from.kind != Some(IdentifierType::Runnable) || from.worker_name() != Some(self.name.as_str()) {
            return None;
        }
        from.name.as_deref()
    }

    /// POST one message to a sibling's messages endpoint
    async fn post_to_sibling(&self, sibling: &WorkerInfo, body: Vec<u8>) -> Result<()> {
        let url = format!("{}{}", sibling.addr.trim_end_matches('/'), self.messages_path);
        let timeout_ms = u64::try_from(self.peer_timeout.as_millis()).unwrap_or(u64::MAX);

        let response = tokio::time::timeout(
            self.peer_timeout,
            self.peers.request(Method::Post, &url, body),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            operation: format!("POST {url}"),
            timeout_ms,
        })??;

        if response.is_success() {
            return Ok(());
        }

        let message = serde_json::from_slice::<ErrorBody>(&response.body)
            .map(|body| body.message)
            .unwrap_or_else(|_| format!("response status code is {}", response.status));
        Err(FleetError::PeerResponse {
            peer: sibling.name.clone(),
            status: response.status,
            message,
        })
    }
}
