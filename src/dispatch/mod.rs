//! # Dispatch
//!
//! In-process publish/subscribe routing with asynchronous handler execution
//! and request/response correlation.

pub mod correlation;
pub mod dispatcher;

pub use correlation::{Completion, DoneRegistry, OnDone};
pub use dispatcher::{
    DispatchCondition, Dispatcher, DispatcherStats, FnHandler, MessageHandler,
};
