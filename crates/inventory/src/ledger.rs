use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use curtainworks_core::{
    AggregateRoot, ColorId, DomainError, DomainResult, LedgerEntryId, ReferenceId, Shortfall,
};

/// Why stock moved. Recorded on every adjustment and carried by `StockAdjusted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Goods received from a supplier.
    Receipt,
    /// Manual issue out of the warehouse.
    Issue,
    /// Stock count correction, either direction.
    Correction,
    /// Material drawn by an order.
    OrderAllocation,
    /// Material returned by an order that shrank or was deleted.
    OrderReversal,
    /// A confirmed reservation turned into a real draw-down.
    ReservationConfirmed,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Receipt => "receipt",
            MovementKind::Issue => "issue",
            MovementKind::Correction => "correction",
            MovementKind::OrderAllocation => "order_allocation",
            MovementKind::OrderReversal => "order_reversal",
            MovementKind::ReservationConfirmed => "reservation_confirmed",
        }
    }
}

/// A signed quantity change against one ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub entry_id: LedgerEntryId,
    pub delta: Decimal,
    pub kind: MovementKind,
}

impl Movement {
    pub fn new(entry_id: LedgerEntryId, delta: Decimal, kind: MovementKind) -> Self {
        Self {
            entry_id,
            delta,
            kind,
        }
    }
}

/// Input for opening a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub reference_id: ReferenceId,
    pub color_id: ColorId,
    pub initial_quantity: Decimal,
    pub minimum_threshold: Decimal,
    pub location: Option<String>,
}

/// Editable, non-quantity fields. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntryPatch {
    pub minimum_threshold: Option<Decimal>,
    pub location: Option<String>,
}

/// Raw stored state, used by stores to rebuild an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntryParts {
    pub id: LedgerEntryId,
    pub reference_id: ReferenceId,
    pub color_id: ColorId,
    pub quantity_on_hand: Decimal,
    pub minimum_threshold: Decimal,
    pub location: Option<String>,
    pub last_in: Option<DateTime<Utc>>,
    pub last_out: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Stock record for one (reference, color) pair.
///
/// `quantity_on_hand` never goes below zero and only changes through
/// [`LedgerEntry::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    id: LedgerEntryId,
    reference_id: ReferenceId,
    color_id: ColorId,
    quantity_on_hand: Decimal,
    minimum_threshold: Decimal,
    location: Option<String>,
    last_in: Option<DateTime<Utc>>,
    last_out: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

/// Result of a committed adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustOutcome {
    pub entry: LedgerEntry,
    pub previous_quantity: Decimal,
    pub delta: Decimal,
    pub kind: MovementKind,
}

impl AdjustOutcome {
    /// Resulting quantity is at or below the entry's minimum.
    pub fn below_minimum(&self) -> bool {
        self.entry.is_below_minimum()
    }

    /// This adjustment took the entry from above its minimum to at/below it.
    pub fn crossed_minimum(&self) -> bool {
        self.previous_quantity > self.entry.minimum_threshold && self.entry.is_below_minimum()
    }
}

/// Ledger listing filter. The default lists everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFilter {
    /// Only entries at or below their minimum.
    pub below_minimum_only: bool,
    pub reference_id: Option<ReferenceId>,
}

impl LedgerFilter {
    pub fn below_minimum() -> Self {
        Self {
            below_minimum_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        (!self.below_minimum_only || entry.is_below_minimum())
            && self.reference_id.is_none_or(|r| entry.reference_id() == r)
    }
}

impl LedgerEntry {
    /// Open a new entry. `last_in` is stamped when it starts with stock.
    pub fn open(id: LedgerEntryId, new: NewLedgerEntry, at: DateTime<Utc>) -> DomainResult<Self> {
        if new.initial_quantity < Decimal::ZERO {
            return Err(DomainError::validation("initial quantity cannot be negative"));
        }
        ensure_threshold(new.minimum_threshold)?;

        Ok(Self {
            id,
            reference_id: new.reference_id,
            color_id: new.color_id,
            quantity_on_hand: new.initial_quantity,
            minimum_threshold: new.minimum_threshold,
            location: new.location,
            last_in: (new.initial_quantity > Decimal::ZERO).then_some(at),
            last_out: None,
            created_at: at,
            updated_at: at,
            version: 1,
        })
    }

    pub fn restore(parts: LedgerEntryParts) -> Self {
        Self {
            id: parts.id,
            reference_id: parts.reference_id,
            color_id: parts.color_id,
            quantity_on_hand: parts.quantity_on_hand,
            minimum_threshold: parts.minimum_threshold,
            location: parts.location,
            last_in: parts.last_in,
            last_out: parts.last_out,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            version: parts.version,
        }
    }

    pub fn id_typed(&self) -> LedgerEntryId {
        self.id
    }

    pub fn reference_id(&self) -> ReferenceId {
        self.reference_id
    }

    pub fn color_id(&self) -> ColorId {
        self.color_id
    }

    pub fn pair(&self) -> (ReferenceId, ColorId) {
        (self.reference_id, self.color_id)
    }

    pub fn quantity_on_hand(&self) -> Decimal {
        self.quantity_on_hand
    }

    pub fn minimum_threshold(&self) -> Decimal {
        self.minimum_threshold
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn last_in(&self) -> Option<DateTime<Utc>> {
        self.last_in
    }

    pub fn last_out(&self) -> Option<DateTime<Utc>> {
        self.last_out
    }

    /// Most recent movement in either direction.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_in.max(self.last_out)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_below_minimum(&self) -> bool {
        self.quantity_on_hand <= self.minimum_threshold
    }

    /// Shortfall a debit of `delta` would cause when `held` units are already
    /// promised to reservations. Credits never fall short.
    pub fn shortfall_for(&self, delta: Decimal, held: Decimal) -> Option<Shortfall> {
        if delta >= Decimal::ZERO {
            return None;
        }
        let available = self.quantity_on_hand - held;
        let requested = -delta;
        (available < requested).then(|| Shortfall::new(self.id, available, requested))
    }

    /// Apply a signed movement. On error the entry is left untouched.
    pub fn apply(
        &mut self,
        delta: Decimal,
        kind: MovementKind,
        at: DateTime<Utc>,
    ) -> DomainResult<AdjustOutcome> {
        if delta.is_zero() {
            return Err(DomainError::validation("delta cannot be zero"));
        }
        if let Some(shortfall) = self.shortfall_for(delta, Decimal::ZERO) {
            return Err(DomainError::InsufficientStock(shortfall));
        }

        let previous_quantity = self.quantity_on_hand;
        self.quantity_on_hand += delta;
        if delta > Decimal::ZERO {
            self.last_in = Some(at);
        } else {
            self.last_out = Some(at);
        }
        self.updated_at = at;
        self.version += 1;

        Ok(AdjustOutcome {
            entry: self.clone(),
            previous_quantity,
            delta,
            kind,
        })
    }

    /// Edit metadata. Quantity is not editable here.
    pub fn update(&mut self, patch: &LedgerEntryPatch, at: DateTime<Utc>) -> DomainResult<()> {
        if let Some(minimum) = patch.minimum_threshold {
            ensure_threshold(minimum)?;
            self.minimum_threshold = minimum;
        }
        if let Some(location) = &patch.location {
            self.location = (!location.trim().is_empty()).then(|| location.clone());
        }
        self.updated_at = at;
        self.version += 1;
        Ok(())
    }

    /// Only empty entries may be removed.
    pub fn ensure_removable(&self) -> DomainResult<()> {
        if self.quantity_on_hand.is_zero() {
            Ok(())
        } else {
            Err(DomainError::NonZeroStock {
                entry_id: self.id,
                quantity: self.quantity_on_hand,
            })
        }
    }
}

impl AggregateRoot for LedgerEntry {
    type Id = LedgerEntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn ensure_threshold(minimum: Decimal) -> DomainResult<()> {
    if minimum < Decimal::ZERO {
        return Err(DomainError::validation("minimum threshold cannot be negative"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 8, 30, 0).unwrap()
    }

    fn entry(quantity: i64, minimum: i64) -> LedgerEntry {
        LedgerEntry::open(
            LedgerEntryId::new(),
            NewLedgerEntry {
                reference_id: ReferenceId::new(),
                color_id: ColorId::new(),
                initial_quantity: Decimal::from(quantity),
                minimum_threshold: Decimal::from(minimum),
                location: Some("A-3".to_string()),
            },
            test_time(),
        )
        .unwrap()
    }

    #[test]
    fn filter_by_minimum_and_reference() {
        let low = entry(5, 20);
        let healthy = entry(50, 20);

        assert!(LedgerFilter::default().matches(&healthy));
        assert!(LedgerFilter::below_minimum().matches(&low));
        assert!(!LedgerFilter::below_minimum().matches(&healthy));

        let only_low_ref = LedgerFilter {
            reference_id: Some(low.reference_id()),
            ..LedgerFilter::default()
        };
        assert!(only_low_ref.matches(&low));
        assert!(!only_low_ref.matches(&healthy));
    }

    #[test]
    fn open_stamps_last_in_only_with_stock() {
        assert_eq!(entry(10, 0).last_in(), Some(test_time()));
        assert_eq!(entry(0, 0).last_in(), None);
    }

    #[test]
    fn open_rejects_negative_values() {
        let err = LedgerEntry::open(
            LedgerEntryId::new(),
            NewLedgerEntry {
                reference_id: ReferenceId::new(),
                color_id: ColorId::new(),
                initial_quantity: Decimal::from(-1),
                minimum_threshold: Decimal::ZERO,
                location: None,
            },
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn outbound_movement_updates_quantity_and_last_out() {
        let mut e = entry(100, 20);
        let later = test_time() + chrono::Duration::hours(1);

        let outcome = e
            .apply(Decimal::new(-33, 1), MovementKind::OrderAllocation, later)
            .unwrap();

        assert_eq!(e.quantity_on_hand(), Decimal::new(967, 1));
        assert_eq!(e.last_out(), Some(later));
        assert_eq!(outcome.previous_quantity, Decimal::from(100));
        assert!(!outcome.below_minimum());
        assert_eq!(e.version(), 2);
    }

    #[test]
    fn overdraw_is_rejected_and_leaves_entry_unchanged() {
        let mut e = entry(5, 0);
        let before = e.clone();

        let err = e
            .apply(Decimal::from(-6), MovementKind::Issue, test_time())
            .unwrap_err();

        match err {
            DomainError::InsufficientStock(s) => {
                assert_eq!(s.available, Decimal::from(5));
                assert_eq!(s.requested, Decimal::from(6));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(e, before);
    }

    #[test]
    fn zero_delta_is_invalid() {
        let mut e = entry(5, 0);
        assert!(matches!(
            e.apply(Decimal::ZERO, MovementKind::Correction, test_time()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn crossing_the_minimum_is_detected_once() {
        let mut e = entry(25, 20);

        let first = e.apply(Decimal::from(-5), MovementKind::Issue, test_time()).unwrap();
        assert!(first.below_minimum());
        assert!(first.crossed_minimum());

        let second = e.apply(Decimal::from(-1), MovementKind::Issue, test_time()).unwrap();
        assert!(second.below_minimum());
        assert!(!second.crossed_minimum());
    }

    #[test]
    fn shortfall_accounts_for_held_stock() {
        let e = entry(100, 0);
        assert!(e.shortfall_for(Decimal::from(-40), Decimal::from(60)).is_none());

        let short = e.shortfall_for(Decimal::from(-41), Decimal::from(60)).unwrap();
        assert_eq!(short.available, Decimal::from(40));
        assert_eq!(short.deficit(), Decimal::ONE);

        assert!(e.shortfall_for(Decimal::from(5), Decimal::from(500)).is_none());
    }

    #[test]
    fn update_edits_metadata_only() {
        let mut e = entry(10, 2);
        e.update(
            &LedgerEntryPatch {
                minimum_threshold: Some(Decimal::from(4)),
                location: Some("B-1".to_string()),
            },
            test_time(),
        )
        .unwrap();

        assert_eq!(e.minimum_threshold(), Decimal::from(4));
        assert_eq!(e.location(), Some("B-1"));
        assert_eq!(e.quantity_on_hand(), Decimal::from(10));

        let err = e
            .update(
                &LedgerEntryPatch {
                    minimum_threshold: Some(Decimal::from(-1)),
                    location: None,
                },
                test_time(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(e.minimum_threshold(), Decimal::from(4));
    }

    #[test]
    fn only_empty_entries_are_removable() {
        assert!(entry(0, 0).ensure_removable().is_ok());
        assert!(matches!(
            entry(3, 0).ensure_removable(),
            Err(DomainError::NonZeroStock { .. })
        ));
    }

    mod properties {
        use super::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: no sequence of movements drives stock below zero, and
            /// the final quantity equals the sum of accepted deltas.
            #[test]
            fn quantity_never_negative(
                start in 0i64..1_000,
                deltas in proptest::collection::vec(-300i64..300, 1..40)
            ) {
                let mut e = entry(start, 10);
                let mut expected = Decimal::from(start);

                for d in deltas {
                    let delta = Decimal::new(d, 1);
                    match e.apply(delta, MovementKind::Correction, test_time()) {
                        Ok(_) => expected += delta,
                        Err(DomainError::InsufficientStock(_)) => {
                            prop_assert!(expected + delta < Decimal::ZERO);
                        }
                        Err(DomainError::Validation(_)) => prop_assert!(delta.is_zero()),
                        Err(other) => prop_assert!(false, "unexpected error: {:?}", other),
                    }
                    prop_assert!(e.quantity_on_hand() >= Decimal::ZERO);
                    prop_assert_eq!(e.quantity_on_hand(), expected);
                }
            }
        }
    }
}
