//! # Codehive Queue
//!
//! Durable work queue and the background loops that drain and feed it.
//!
//! ## Architecture
//! ```text
//! Producers (API, PeriodicSync)
//!   └── Queue::enqueue_operations([clone, sync], base, payload)
//!         └── TaskStore (upsert by dedup key, priority = base + 10×(N-i))
//!
//! Engine (one config → Worker + PeriodicSync + Cooldown, ordered shutdown)
//!
//! Worker (tokio interval, one task at a time)
//!   ├── TaskStore::dequeue → highest priority unclaimed task
//!   ├── Registry::handler(operation) → Handler::execute (panics recovered)
//!   ├── Tracker → complete / fail
//!   └── TaskStore::delete (always; failures are never retried)
//! ```

pub mod engine;
pub mod persistence;
pub mod queue;
pub mod registry;
pub mod repository;
pub mod store;
pub mod sync;
pub mod task;
pub mod worker;

pub use engine::Engine;
pub use persistence::{SqliteRepositoryStore, SqliteTaskStore};
pub use queue::{ListParams, Queue};
pub use registry::{Handler, Registry, Typed, TypedHandler};
pub use repository::{MemoryRepositoryStore, Repository, RepositoryStore};
pub use store::{MemoryTaskStore, TaskStore};
pub use sync::PeriodicSync;
pub use task::{CommitPayload, Payload, PrescribedOperations, Priority, RepositoryPayload, Task};
pub use worker::Worker;
