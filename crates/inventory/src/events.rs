use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use curtainworks_core::{ColorId, LedgerEntryId, ReferenceId};
use curtainworks_events::Event;

use crate::ledger::{AdjustOutcome, LedgerEntry, MovementKind};

/// Event: LedgerEntryCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntryCreated {
    pub entry_id: LedgerEntryId,
    pub reference_id: ReferenceId,
    pub color_id: ColorId,
    pub initial_quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub entry_id: LedgerEntryId,
    pub kind: MovementKind,
    pub delta: Decimal,
    pub previous_quantity: Decimal,
    pub current_quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockLow. Raised when an adjustment takes an entry to or below its minimum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLow {
    pub entry_id: LedgerEntryId,
    pub current_quantity: Decimal,
    pub minimum_threshold: Decimal,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerEntryCreated {
    pub fn from_entry(entry: &LedgerEntry) -> Self {
        Self {
            entry_id: entry.id_typed(),
            reference_id: entry.reference_id(),
            color_id: entry.color_id(),
            initial_quantity: entry.quantity_on_hand(),
            occurred_at: entry.created_at(),
        }
    }
}

impl AdjustOutcome {
    pub fn stock_adjusted(&self) -> StockAdjusted {
        StockAdjusted {
            entry_id: self.entry.id_typed(),
            kind: self.kind,
            delta: self.delta,
            previous_quantity: self.previous_quantity,
            current_quantity: self.entry.quantity_on_hand(),
            occurred_at: self.entry.updated_at(),
        }
    }

    /// `Some` only for the adjustment that crossed the minimum.
    pub fn stock_low(&self) -> Option<StockLow> {
        self.crossed_minimum().then(|| StockLow {
            entry_id: self.entry.id_typed(),
            current_quantity: self.entry.quantity_on_hand(),
            minimum_threshold: self.entry.minimum_threshold(),
            occurred_at: self.entry.updated_at(),
        })
    }
}

impl Event for LedgerEntryCreated {
    fn event_type(&self) -> &'static str {
        "inventory.ledger.created"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn subject(&self) -> String {
        self.entry_id.to_string()
    }
}

impl Event for StockAdjusted {
    fn event_type(&self) -> &'static str {
        "inventory.stock.adjusted"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn subject(&self) -> String {
        self.entry_id.to_string()
    }
}

impl Event for StockLow {
    fn event_type(&self) -> &'static str {
        "inventory.stock.low"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn subject(&self) -> String {
        self.entry_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NewLedgerEntry;

    #[test]
    fn stock_low_only_on_crossing() {
        let mut entry = LedgerEntry::open(
            LedgerEntryId::new(),
            NewLedgerEntry {
                reference_id: ReferenceId::new(),
                color_id: ColorId::new(),
                initial_quantity: Decimal::from(30),
                minimum_threshold: Decimal::from(20),
                location: None,
            },
            Utc::now(),
        )
        .unwrap();

        let stays_above = entry
            .apply(Decimal::from(-5), MovementKind::Issue, Utc::now())
            .unwrap();
        assert!(stays_above.stock_low().is_none());

        let crosses = entry
            .apply(Decimal::from(-6), MovementKind::Issue, Utc::now())
            .unwrap();
        let low = crosses.stock_low().unwrap();
        assert_eq!(low.current_quantity, Decimal::from(19));
        assert_eq!(low.minimum_threshold, Decimal::from(20));
        assert_eq!(low.event_type(), "inventory.stock.low");

        let adjusted = crosses.stock_adjusted();
        assert_eq!(adjusted.previous_quantity, Decimal::from(25));
        assert_eq!(adjusted.delta, Decimal::from(-6));
    }
}
