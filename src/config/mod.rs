//! # Configuration
//!
//! Typed configuration for the index, workers and the dispatcher. Values come
//! from an optional file layered under `FLEET__*` environment variables (see
//! [`loader`]); every field has a default so an empty source is valid.

pub mod loader;

pub use loader::ConfigLoader;

use crate::constants::{
    DEFAULT_MESSAGES_PATH, DEFAULT_PEER_TIMEOUT_MS, DEFAULT_PING_PERIOD_MS,
    DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub index: IndexConfig,
    pub worker: WorkerConfig,
    pub dispatcher: DispatcherConfig,
}

/// Index process settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Address the index is reachable at, advertised to UI sessions
    pub addr: String,
    /// Keep-alive period advertised to UI sessions
    pub ping_period_ms: u64,
    /// Close the previous connection when a worker re-registers under a live name
    pub close_evicted_connections: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4000".to_string(),
            ping_period_ms: DEFAULT_PING_PERIOD_MS,
            close_evicted_connections: true,
        }
    }
}

/// Worker process settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Unique worker name
    pub name: String,
    /// Base address siblings reach this worker at
    pub addr: String,
    /// Path siblings post messages to
    pub messages_path: String,
    /// Upper bound on one sibling request
    pub peer_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            addr: "http://127.0.0.1:4001".to_string(),
            messages_path: DEFAULT_MESSAGES_PATH.to_string(),
            peer_timeout_ms: DEFAULT_PEER_TIMEOUT_MS,
        }
    }
}

impl WorkerConfig {
    pub fn named(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            ..Default::default()
        }
    }
}

/// Dispatcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Upper bound on how long shutdown waits for in-flight tasks
    pub shutdown_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl FleetConfig {
    /// Load from an optional file plus `FLEET__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        ConfigLoader::new().with_file(path).load()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.name.trim().is_empty() {
            return Err(FleetError::Configuration(
                "worker.name must not be empty".to_string(),
            ));
        }
        if self.worker.addr.trim().is_empty() {
            return Err(FleetError::Configuration(
                "worker.addr must not be empty".to_string(),
            ));
        }
        if !self.worker.messages_path.starts_with('/') {
            return Err(FleetError::Configuration(format!(
                "worker.messages_path must start with '/': {}",
                self.worker.messages_path
            )));
        }
        if self.worker.peer_timeout_ms == 0 {
            return Err(FleetError::Configuration(
                "worker.peer_timeout_ms must be positive".to_string(),
            ));
        }
        if self.index.ping_period_ms == 0 {
            return Err(FleetError::Configuration(
                "index.ping_period_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
