//! Persistence boundary for ledger entries, reservations and orders.
//!
//! The services in this crate only talk to [`InventoryStore`]; the in-memory
//! adapter backs tests and single-process use, the Postgres adapter production.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{DEFAULT_RESOLVED_RETENTION_SECS, InMemoryInventoryStore};
pub use postgres::PostgresInventoryStore;
pub use r#trait::{InventoryStore, OrderWrite, StoreError};
