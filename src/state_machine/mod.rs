//! # Runnable State Machine
//!
//! Start/stop/progress/done lifecycle of runnables, independent of what the
//! runnables actually do.

pub mod events;
pub mod lifecycle;
pub mod runnable;
pub mod states;

pub use events::RunnableEvent;
pub use lifecycle::{DoneTarget, RunnableHost};
pub use runnable::{RunContext, Runnable, RunnableError};
pub use states::{Progress, RunnableStatus};
