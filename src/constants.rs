//! # System Constants
//!
//! The fixed message catalog exchanged between the Index, Workers and UI
//! sessions, plus the default endpoints peers expose to each other.

/// Message names understood by every node kind
pub mod message_names {
    // Commands
    pub const CMD_WORKER_REGISTER: &str = "cmd.worker.register";
    pub const CMD_RUNNABLE_START: &str = "cmd.runnable.start";
    pub const CMD_RUNNABLE_STOP: &str = "cmd.runnable.stop";
    pub const CMD_UI_PING: &str = "cmd.ui.ping";

    // Worker membership events
    pub const EVENT_WORKER_REGISTERED: &str = "event.worker.registered";
    pub const EVENT_WORKER_WELCOME: &str = "event.worker.welcome";
    pub const EVENT_WORKER_DISCONNECTED: &str = "event.worker.disconnected";

    // Runnable lifecycle events
    pub const EVENT_RUNNABLE_STARTED: &str = "event.runnable.started";
    pub const EVENT_RUNNABLE_STOPPED: &str = "event.runnable.stopped";
    pub const EVENT_RUNNABLE_CRASHED: &str = "event.runnable.crashed";
    pub const EVENT_RUNNABLE_PROGRESS: &str = "event.runnable.progress";
    pub const EVENT_RUNNABLE_DONE: &str = "event.runnable.done";

    // UI session events
    pub const EVENT_UI_WELCOME: &str = "event.ui.welcome";
    pub const EVENT_UI_DISCONNECTED: &str = "event.ui.disconnected";

    // UI subscriptions
    pub const UI_MESSAGE_NAMES_ADD: &str = "ui.message_names.add";
    pub const UI_MESSAGE_NAMES_DELETE: &str = "ui.message_names.delete";

    // Sibling runnable subscriptions
    pub const LISTENABLES_REGISTER: &str = "listenables.register";

    /// Every catalog entry, in declaration order
    pub const ALL: &[&str] = &[
        CMD_WORKER_REGISTER,
        CMD_RUNNABLE_START,
        CMD_RUNNABLE_STOP,
        CMD_UI_PING,
        EVENT_WORKER_REGISTERED,
        EVENT_WORKER_WELCOME,
        EVENT_WORKER_DISCONNECTED,
        EVENT_RUNNABLE_STARTED,
        EVENT_RUNNABLE_STOPPED,
        EVENT_RUNNABLE_CRASHED,
        EVENT_RUNNABLE_PROGRESS,
        EVENT_RUNNABLE_DONE,
        EVENT_UI_WELCOME,
        EVENT_UI_DISCONNECTED,
        UI_MESSAGE_NAMES_ADD,
        UI_MESSAGE_NAMES_DELETE,
        LISTENABLES_REGISTER,
    ];

    /// Whether the name belongs to the catalog
    pub fn is_known(name: &str) -> bool {
        ALL.contains(&name)
    }
}

/// Path siblings POST messages to, relative to a worker's advertised address
pub const DEFAULT_MESSAGES_PATH: &str = "/api/messages";

/// Keep-alive period advertised to UI sessions
pub const DEFAULT_PING_PERIOD_MS: u64 = 30_000;

/// Upper bound on how long shutdown waits for in-flight handlers
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Upper bound on a single sibling request
pub const DEFAULT_PEER_TIMEOUT_MS: u64 = 10_000;
