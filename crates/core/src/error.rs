//! Domain error model.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{LedgerEntryId, ReservationToken};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// A single line that could not be covered by the stock available for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub entry_id: LedgerEntryId,
    pub available: Decimal,
    pub requested: Decimal,
}

impl Shortfall {
    pub fn new(entry_id: LedgerEntryId, available: Decimal, requested: Decimal) -> Self {
        Self {
            entry_id,
            available,
            requested,
        }
    }

    /// How much is missing to satisfy the request.
    pub fn deficit(&self) -> Decimal {
        (self.requested - self.available).max(Decimal::ZERO)
    }
}

impl core::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "entry {}: available {}, requested {}",
            self.entry_id, self.available, self.requested
        )
    }
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, stock admission, state machine). Infrastructure errors are mapped
/// onto `Conflict`/`Unavailable` at the service boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness constraint would be broken (e.g. second ledger entry for a pair).
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    /// A single ledger entry cannot cover the requested quantity.
    #[error("insufficient stock: {0}")]
    InsufficientStock(Shortfall),

    /// One or more order lines cannot be covered; every shortfall is listed.
    #[error("insufficient materials for {} line(s)", .0.len())]
    InsufficientMaterials(Vec<Shortfall>),

    /// A ledger entry still holds stock and cannot be removed.
    #[error("ledger entry {entry_id} still holds {quantity} units")]
    NonZeroStock {
        entry_id: LedgerEntryId,
        quantity: Decimal,
    },

    /// The operation is not legal in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No active reservation exists for the token.
    #[error("no active reservation for token {0}")]
    ReservationNotFound(ReservationToken),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage could not complete the operation after bounded retries.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::DuplicateEntry(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
