#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Fleetlink Core
//!
//! Routing, registry and runnable lifecycle core of a distributed automation
//! fleet.
//!
//! ## Overview
//!
//! A single **index** is the rendezvous hub. **Workers** register with it and
//! host **runnables**, startable/stoppable units of work. **UI sessions**
//! connect to the index to observe and command the fleet. Every node exchanges
//! typed [`Message`]s whose delivery is governed by declarative
//! [`DispatchCondition`]s over [`Identifier`] filters.
//!
//! ## Module Organization
//!
//! - [`messaging`] - Identifiers, filters and the message envelope
//! - [`dispatch`] - In-process pub/sub and done correlation
//! - [`registry`] - Index directory and worker routing tables
//! - [`state_machine`] - Runnable lifecycle
//! - [`transport`] - Abstract channels and in-memory implementations
//! - [`index`] / [`worker`] - The two node kinds
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fleetlink_core::config::{DispatcherConfig, IndexConfig, WorkerConfig};
//! use fleetlink_core::transport::memory::{MemoryChannel, MemoryPeerNetwork};
//! use fleetlink_core::{Index, Worker};
//! use std::sync::Arc;
//!
//! # async fn example() -> fleetlink_core::Result<()> {
//! let index = Index::new(IndexConfig::default(), DispatcherConfig::default());
//! let network = MemoryPeerNetwork::new();
//! let worker = Worker::new(
//!     WorkerConfig::named("micro", "mem://micro"),
//!     DispatcherConfig::default(),
//!     Arc::new(network.clone()),
//! );
//!
//! // The transport pumps bytes between the two handles
//! let (to_index, _index_rx) = MemoryChannel::new("index");
//! let (to_worker, _worker_rx) = MemoryChannel::new("micro");
//! let _link = worker.connect(to_index)?;
//! let _connection = index.accept_worker(to_worker);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod index;
pub mod logging;
pub mod messaging;
pub mod registry;
pub mod state_machine;
pub mod transport;
pub mod worker;

pub use config::{DispatcherConfig, FleetConfig, IndexConfig, WorkerConfig};
pub use constants::message_names;
pub use dispatch::{Completion, DispatchCondition, Dispatcher, DoneRegistry, MessageHandler, OnDone};
pub use error::{DeliveryFailure, FleetError, Result};
pub use index::{Index, UiConnection, WorkerConnection};
pub use messaging::{
    Identifier, IdentifierType, Listenables, Message, RunnableInfo, TypeSet, WorkerInfo,
};
pub use registry::{IndexRegistry, RouteReport, WorkerRegistry};
pub use state_machine::{Progress, RunContext, Runnable, RunnableError, RunnableStatus};
pub use transport::{Channel, PeerClient, PeerEndpoint, TransportError};
pub use worker::{IndexLink, Worker};
