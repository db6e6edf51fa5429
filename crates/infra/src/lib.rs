//! Infrastructure layer: persistence adapters, the inventory services, retry,
//! configuration and the reservation sweeper.

pub mod allocation;
pub mod catalog;
pub mod config;
pub mod ledger;
mod notify;
pub mod reservations;
pub mod retry;
pub mod store;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use allocation::{NewCurtainOrder, OrderAllocationCoordinator};
pub use catalog::{InMemoryCatalog, PostgresCatalog};
pub use config::InventoryConfig;
pub use ledger::StockLedger;
pub use reservations::{DEFAULT_RESERVATION_TTL_SECS, ReservationManager};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{
    InMemoryInventoryStore, InventoryStore, OrderWrite, PostgresInventoryStore, StoreError,
};
pub use workers::{ReservationSweeper, WorkerHandle};
