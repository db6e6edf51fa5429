//! Inventory domain module.
//!
//! Business rules for stock ledger entries, reservations and stock alerts,
//! implemented as deterministic domain logic (no IO, no locking, no storage).
//! Stores call into these types while holding whatever locks they use.

pub mod alert;
pub mod events;
pub mod ledger;
pub mod reservation;

pub use alert::{AlertPolicy, AlertReason, StockAlert, evaluate_alerts};
pub use events::{LedgerEntryCreated, StockAdjusted, StockLow};
pub use ledger::{
    AdjustOutcome, LedgerEntry, LedgerEntryParts, LedgerEntryPatch, LedgerFilter, Movement,
    MovementKind, NewLedgerEntry,
};
pub use reservation::{
    Reservation, ReservationState, available, held_quantity, normalize_request,
};
