//! In-memory adapters.
//!
//! Used by tests and by embedders that keep lifecycle state in-process.

pub mod lease_registry;
pub mod process_table;
pub mod stores;

pub use lease_registry::LeaseRegistry;
pub use process_table::{FakeBehavior, FakeProcessTable};
pub use stores::{
    InMemoryBreakerStore, InMemoryEventStore, InMemoryLedgerStore, InMemoryRestartQueue,
    InMemoryWorkerStore,
};
