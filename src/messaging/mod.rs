//! # Messaging
//!
//! Addressing and envelope value types shared by every node kind. Pure data,
//! no I/O.

pub mod identifier;
pub mod message;
pub mod payloads;

pub use identifier::{Identifier, IdentifierType, TypeSet};
pub use message::Message;
pub use payloads::{ErrorBody, Listenables, RunnableInfo, UiWelcome, WorkerInfo};
