//! `curtainworks-core` : domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the shared error taxonomy, versioning and the clock port.

pub mod aggregate;
pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, Shortfall};
pub use id::{
    ColorId, DesignId, LedgerEntryId, MaterialTypeId, OrderId, ReferenceId, ReservationToken,
};
pub use value_object::ValueObject;
