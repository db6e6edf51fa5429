//! Stock alerts: low stock and inactivity.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use curtainworks_core::{ColorId, LedgerEntryId, ReferenceId};

use crate::ledger::LedgerEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertReason {
    LowStock,
    Inactive,
}

impl AlertReason {
    pub fn code(self) -> &'static str {
        match self {
            AlertReason::LowStock => "LOW_STOCK",
            AlertReason::Inactive => "INACTIVE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub entry_id: LedgerEntryId,
    pub reference_id: ReferenceId,
    pub color_id: ColorId,
    pub reason: AlertReason,
    pub message: String,
    pub current_quantity: Decimal,
    pub minimum_threshold: Decimal,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    /// Entries without a movement for this long are reported as inactive.
    pub inactivity_window: Duration,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            inactivity_window: Duration::days(30),
        }
    }
}

/// One `LOW_STOCK` alert per entry at or below its minimum and one `INACTIVE`
/// alert per entry whose last movement is older than the window. An entry that
/// never moved is inactive.
pub fn evaluate_alerts<'a, I>(entries: I, now: DateTime<Utc>, policy: &AlertPolicy) -> Vec<StockAlert>
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    let cutoff = now - policy.inactivity_window;
    let mut alerts = Vec::new();

    for entry in entries {
        let alert = |reason: AlertReason, message: String| StockAlert {
            entry_id: entry.id_typed(),
            reference_id: entry.reference_id(),
            color_id: entry.color_id(),
            reason,
            message,
            current_quantity: entry.quantity_on_hand(),
            minimum_threshold: entry.minimum_threshold(),
            last_activity: entry.last_activity(),
        };

        if entry.is_below_minimum() {
            alerts.push(alert(
                AlertReason::LowStock,
                format!(
                    "stock at {} is at or below the minimum of {}",
                    entry.quantity_on_hand(),
                    entry.minimum_threshold()
                ),
            ));
        }

        let stale = entry.last_activity().is_none_or(|last| last < cutoff);
        if stale {
            let message = match entry.last_activity() {
                Some(last) => format!(
                    "no movement since {} ({} days)",
                    last.format("%Y-%m-%d"),
                    (now - last).num_days()
                ),
                None => "no movement recorded".to_string(),
            };
            alerts.push(alert(AlertReason::Inactive, message));
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MovementKind, NewLedgerEntry};
    use chrono::TimeZone;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn entry(quantity: i64, minimum: i64, opened: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry::open(
            LedgerEntryId::new(),
            NewLedgerEntry {
                reference_id: ReferenceId::new(),
                color_id: ColorId::new(),
                initial_quantity: Decimal::from(quantity),
                minimum_threshold: Decimal::from(minimum),
                location: None,
            },
            opened,
        )
        .unwrap()
    }

    #[test]
    fn low_stock_includes_the_threshold_itself() {
        let at_min = entry(20, 20, test_time());
        let above = entry(21, 20, test_time());

        let alerts = evaluate_alerts([&at_min, &above], test_time(), &AlertPolicy::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].entry_id, at_min.id_typed());
        assert_eq!(alerts[0].reason, AlertReason::LowStock);
    }

    #[test]
    fn inactivity_uses_latest_movement() {
        let old = test_time() - Duration::days(45);
        let mut moved_recently = entry(50, 0, old);
        moved_recently
            .apply(Decimal::from(-1), MovementKind::Issue, test_time() - Duration::days(2))
            .unwrap();
        let idle = entry(50, 0, old);

        let alerts = evaluate_alerts([&moved_recently, &idle], test_time(), &AlertPolicy::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].entry_id, idle.id_typed());
        assert_eq!(alerts[0].reason, AlertReason::Inactive);
        assert_eq!(alerts[0].last_activity, Some(old));
    }

    #[test]
    fn never_moved_entry_is_inactive_and_low() {
        let empty = entry(0, 5, test_time());
        let alerts = evaluate_alerts([&empty], test_time(), &AlertPolicy::default());

        let reasons: Vec<_> = alerts.iter().map(|a| a.reason).collect();
        assert_eq!(reasons, vec![AlertReason::LowStock, AlertReason::Inactive]);
    }

    #[test]
    fn window_is_configurable() {
        let e = entry(50, 0, test_time() - Duration::days(8));
        let policy = AlertPolicy {
            inactivity_window: Duration::days(7),
        };
        assert_eq!(evaluate_alerts([&e], test_time(), &policy).len(), 1);
        assert!(evaluate_alerts([&e], test_time(), &AlertPolicy::default()).is_empty());
    }
}
