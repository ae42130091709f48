//! Payload shapes carried by catalog messages.

use crate::state_machine::RunnableStatus;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A worker as advertised to the index and mirrored by its siblings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub addr: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runnables: Vec<RunnableInfo>,
}

impl WorkerInfo {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            runnables: Vec::new(),
        }
    }

    pub fn with_runnable(mut self, runnable: RunnableInfo) -> Self {
        self.runnables.push(runnable);
        self
    }

    pub fn runnable(&self, name: &str) -> Option<&RunnableInfo> {
        self.runnables.iter().find(|r| r.name == name)
    }
}

/// Summary of a runnable exposed by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnableInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: RunnableStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_homepage: Option<String>,
}

/// Payload of `event.ui.welcome`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiWelcome {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workers: Vec<WorkerInfo>,
}

/// Body returned by a worker's message endpoint when it rejects a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Payload of `listenables.register`: message names the sender's runnables
/// want to hear from the receiver's runnables, keyed by emitting runnable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listenables {
    #[serde(default)]
    pub runnables: BTreeMap<String, BTreeSet<String>>,
}

impl Listenables {
    /// Builder-style insert of names emitted by `runnable`
    pub fn with<I, S>(mut self, runnable: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runnables
            .entry(runnable.into())
            .or_default()
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.runnables.values().all(BTreeSet::is_empty)
    }
}
