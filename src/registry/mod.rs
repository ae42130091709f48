//! # Registries
//!
//! Membership and routing tables for both sides of the fleet.
//!
//! ```text
//! Registries
//! ├── IndexRegistry   (canonical worker/UI directory, UI subscriptions)
//! └── WorkerRegistry  (hosted runnables, sibling mirror, outbound routing)
//! ```

pub mod index_registry;
pub mod worker_registry;

pub use index_registry::{IndexRegistry, IndexRegistryStats, WorkerRegistration};
pub use worker_registry::{RouteReport, WorkerRegistry};
