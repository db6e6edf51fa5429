use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use curtainworks_core::{
    ColorId, DomainError, ExpectedVersion, LedgerEntryId, OrderId, ReferenceId, ReservationToken,
};
use curtainworks_inventory::{AdjustOutcome, LedgerEntry, LedgerEntryPatch, Movement, Reservation};
use curtainworks_orders::CurtainOrder;

/// Store operation error.
///
/// `Rejected` carries a deterministic domain refusal (insufficient stock, duplicate
/// pair, unknown token...). The other variants are infrastructure failures;
/// `Concurrency` and `Unavailable` are transient and worth retrying.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error(transparent)]
    Rejected(#[from] DomainError),

    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage integrity error: {0}")]
    Integrity(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Concurrency(_) | StoreError::Unavailable(_))
    }
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(e) => e,
            StoreError::Concurrency(msg) => DomainError::Conflict(msg),
            StoreError::Unavailable(msg) | StoreError::Integrity(msg) => {
                DomainError::Unavailable(msg)
            }
        }
    }
}

/// The order half of an allocation commit.
#[derive(Debug, Clone)]
pub enum OrderWrite {
    Insert(CurtainOrder),
    /// `order` carries the new state; `expected` is the version it was derived from.
    Update {
        order: CurtainOrder,
        expected: ExpectedVersion,
    },
    Delete {
        order_id: OrderId,
        expected: ExpectedVersion,
    },
}

impl OrderWrite {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderWrite::Insert(order) | OrderWrite::Update { order, .. } => order.id_typed(),
            OrderWrite::Delete { order_id, .. } => *order_id,
        }
    }
}

/// Persistence port for ledger entries, reservations and orders.
///
/// Every method is atomic: it either commits all of its effects or none.
///
/// ## Admission rule
///
/// A debit against an entry is admitted only if
/// `quantity_on_hand − Σ(active, unexpired holds) ≥ requested`, so holds never
/// exceed stock. Implementations evaluate this while holding the entry's lock
/// (row mutex in memory, `FOR UPDATE` in Postgres).
///
/// ## Locking
///
/// Operations that touch several entries lock them in ascending id order; an
/// order's own lock is taken before any ledger lock.
pub trait InventoryStore: Send + Sync {
    /// Fails with `DuplicateEntry` if the (reference, color) pair already exists.
    fn insert_entry(&self, entry: LedgerEntry) -> Result<LedgerEntry, StoreError>;

    fn entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError>;

    fn entry_by_pair(
        &self,
        reference_id: ReferenceId,
        color_id: ColorId,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    fn entries(&self) -> Result<Vec<LedgerEntry>, StoreError>;

    fn update_entry(
        &self,
        id: LedgerEntryId,
        patch: &LedgerEntryPatch,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError>;

    /// Fails with `NonZeroStock` unless the entry is empty.
    fn remove_entry(&self, id: LedgerEntryId) -> Result<LedgerEntry, StoreError>;

    /// Single-entry movement under the admission rule.
    fn adjust(&self, movement: &Movement, now: DateTime<Utc>) -> Result<AdjustOutcome, StoreError>;

    /// On-hand minus holds that count at `now`.
    fn available(&self, id: LedgerEntryId, now: DateTime<Utc>) -> Result<Decimal, StoreError>;

    /// Place one active hold per item, all sharing `token`. All-or-nothing; the
    /// first item (in request order) that cannot be covered fails the call with
    /// `InsufficientStock`.
    fn place_holds(
        &self,
        token: ReservationToken,
        items: &[(LedgerEntryId, Decimal)],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Turn the token's live holds into ledger debits and mark them used.
    /// Fails with `ReservationNotFound` if none are live.
    fn consume_holds(
        &self,
        token: ReservationToken,
        now: DateTime<Utc>,
    ) -> Result<Vec<AdjustOutcome>, StoreError>;

    /// Expire the token's active holds. Returns how many changed.
    fn release_holds(&self, token: ReservationToken) -> Result<usize, StoreError>;

    /// Expire every active hold with `expires_at ≤ now`. Returns how many changed.
    fn expire_holds(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    fn holds(&self, token: ReservationToken) -> Result<Vec<Reservation>, StoreError>;

    fn order(&self, id: OrderId) -> Result<Option<CurtainOrder>, StoreError>;

    fn orders(&self) -> Result<Vec<CurtainOrder>, StoreError>;

    /// Write an order and apply its ledger movements in one unit. Every debit that
    /// cannot be covered is collected into `InsufficientMaterials`; a version
    /// mismatch is a `Concurrency` error.
    fn commit_order(
        &self,
        write: OrderWrite,
        movements: &[Movement],
        now: DateTime<Utc>,
    ) -> Result<Vec<AdjustOutcome>, StoreError>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn insert_entry(&self, entry: LedgerEntry) -> Result<LedgerEntry, StoreError> {
        (**self).insert_entry(entry)
    }

    fn entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        (**self).entry(id)
    }

    fn entry_by_pair(
        &self,
        reference_id: ReferenceId,
        color_id: ColorId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        (**self).entry_by_pair(reference_id, color_id)
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).entries()
    }

    fn update_entry(
        &self,
        id: LedgerEntryId,
        patch: &LedgerEntryPatch,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        (**self).update_entry(id, patch, now)
    }

    fn remove_entry(&self, id: LedgerEntryId) -> Result<LedgerEntry, StoreError> {
        (**self).remove_entry(id)
    }

    fn adjust(&self, movement: &Movement, now: DateTime<Utc>) -> Result<AdjustOutcome, StoreError> {
        (**self).adjust(movement, now)
    }

    fn available(&self, id: LedgerEntryId, now: DateTime<Utc>) -> Result<Decimal, StoreError> {
        (**self).available(id, now)
    }

    fn place_holds(
        &self,
        token: ReservationToken,
        items: &[(LedgerEntryId, Decimal)],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError> {
        (**self).place_holds(token, items, now, expires_at)
    }

    fn consume_holds(
        &self,
        token: ReservationToken,
        now: DateTime<Utc>,
    ) -> Result<Vec<AdjustOutcome>, StoreError> {
        (**self).consume_holds(token, now)
    }

    fn release_holds(&self, token: ReservationToken) -> Result<usize, StoreError> {
        (**self).release_holds(token)
    }

    fn expire_holds(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        (**self).expire_holds(now)
    }

    fn holds(&self, token: ReservationToken) -> Result<Vec<Reservation>, StoreError> {
        (**self).holds(token)
    }

    fn order(&self, id: OrderId) -> Result<Option<CurtainOrder>, StoreError> {
        (**self).order(id)
    }

    fn orders(&self) -> Result<Vec<CurtainOrder>, StoreError> {
        (**self).orders()
    }

    fn commit_order(
        &self,
        write: OrderWrite,
        movements: &[Movement],
        now: DateTime<Utc>,
    ) -> Result<Vec<AdjustOutcome>, StoreError> {
        (**self).commit_order(write, movements, now)
    }
}
