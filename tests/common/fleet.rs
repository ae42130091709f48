//! In-process fleet wiring: an index, workers and UI sessions connected with
//! memory channels, with one pump task per direction standing in for the
//! transport.

use fleetlink_core::config::{DispatcherConfig, IndexConfig, WorkerConfig};
use fleetlink_core::transport::memory::{MemoryChannel, MemoryPeerNetwork};
use fleetlink_core::{Index, IndexLink, Message, Runnable, UiConnection, Worker, WorkerConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestFleet {
    pub index: Arc<Index>,
    pub network: MemoryPeerNetwork,
}

impl TestFleet {
    pub fn new() -> Self {
        Self::with_config(IndexConfig::default())
    }

    pub fn with_config(config: IndexConfig) -> Self {
        Self {
            index: Arc::new(Index::new(config, DispatcherConfig::default())),
            network: MemoryPeerNetwork::new(),
        }
    }

    /// Create a worker hosting `runnables`, reachable on the peer network
    pub fn worker(&self, name: &str, runnables: Vec<Arc<dyn Runnable>>) -> Arc<Worker> {
        let addr = format!("mem://{name}");
        let worker = Arc::new(Worker::new(
            WorkerConfig::named(name, addr.clone()),
            DispatcherConfig::default(),
            Arc::new(self.network.clone()),
        ));
        for runnable in runnables {
            worker.add_runnable(runnable).expect("add runnable");
        }
        self.network.register(addr, worker.clone());
        worker
    }

    /// Connect a worker to the index and pump traffic both ways
    pub fn connect(&self, worker: &Arc<Worker>) -> ConnectedWorker {
        let (to_index, from_worker) = MemoryChannel::new("index");
        let (to_worker, from_index) = MemoryChannel::new(worker.name());

        let connection = Arc::new(self.index.accept_worker(to_worker.clone()));
        let link = Arc::new(worker.connect(to_index.clone()).expect("connect worker"));

        let inbound = {
            let on_message = connection.clone();
            let on_close = connection.clone();
            pump(
                from_worker,
                move |bytes| {
                    let _ = on_message.on_message(&bytes);
                },
                move || on_close.on_disconnect(),
            )
        };
        let outbound = {
            let on_message = link.clone();
            let on_close = link.clone();
            pump(
                from_index,
                move |bytes| {
                    let _ = on_message.on_message(&bytes);
                },
                move || on_close.on_disconnect(),
            )
        };

        ConnectedWorker {
            worker: worker.clone(),
            connection,
            link,
            to_worker,
            pumps: vec![inbound, outbound],
        }
    }

    /// Open a UI session; its inbound traffic is kept for assertions
    pub fn ui(&self) -> TestUi {
        let (channel, rx) = MemoryChannel::new("ui");
        let connection = self
            .index
            .accept_ui(channel.clone())
            .expect("accept ui");
        TestUi {
            connection,
            channel,
            rx,
        }
    }
}

pub struct ConnectedWorker {
    pub worker: Arc<Worker>,
    pub connection: Arc<WorkerConnection>,
    pub link: Arc<IndexLink>,
    pub to_worker: Arc<MemoryChannel>,
    pumps: Vec<JoinHandle<()>>,
}

impl ConnectedWorker {
    /// Simulate the transport dropping the connection on the index side
    pub fn disconnect(&self) {
        self.connection.on_disconnect();
    }
}

impl Drop for ConnectedWorker {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

pub struct TestUi {
    pub connection: UiConnection,
    pub channel: Arc<MemoryChannel>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl TestUi {
    pub fn name(&self) -> &str {
        self.connection.name()
    }

    pub fn send(&self, message: &Message) {
        self.connection
            .on_message(&message.to_bytes().expect("encode"))
            .expect("ui message");
    }

    pub async fn next(&mut self) -> Message {
        let bytes = tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for ui message")
            .expect("ui channel closed");
        Message::from_bytes(&bytes).expect("decode")
    }

    /// Skip messages until one named `name` arrives
    pub async fn next_named(&mut self, name: &str) -> Message {
        loop {
            let message = self.next().await;
            if message.name == name {
                return message;
            }
        }
    }

    /// Assert nothing arrives within a short grace period
    pub async fn expect_silence(&mut self) {
        let received = tokio::time::timeout(Duration::from_millis(100), self.rx.recv()).await;
        if let Ok(Some(bytes)) = received {
            let message = Message::from_bytes(&bytes).expect("decode");
            panic!("unexpected ui message: {}", message.name);
        }
    }
}

fn pump<M, D>(mut rx: mpsc::UnboundedReceiver<Vec<u8>>, on_message: M, on_close: D) -> JoinHandle<()>
where
    M: Fn(Vec<u8>) + Send + 'static,
    D: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            on_message(bytes);
        }
        on_close();
    })
}
