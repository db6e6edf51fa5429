//! Read-side views over stored orders: filtering and material consumption.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use curtainworks_core::{ColorId, DesignId, LedgerEntryId, OrderId, ReferenceId};

use crate::order::{CurtainOrder, OrderStatus};

/// Order selection. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub design_id: Option<DesignId>,
    /// Inclusive.
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive.
    pub created_until: Option<DateTime<Utc>>,
}

impl OrderFilter {
    pub fn with_status(status: Option<OrderStatus>) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn created_between(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            created_from: Some(from),
            created_until: Some(until),
            ..Self::default()
        }
    }

    pub fn matches(&self, order: &CurtainOrder) -> bool {
        self.status.is_none_or(|s| order.status() == s)
            && self.design_id.is_none_or(|d| order.design_id() == d)
            && self.created_from.is_none_or(|from| order.created_at() >= from)
            && self.created_until.is_none_or(|until| order.created_at() < until)
    }
}

/// Total drawn from one (reference, color) by a set of orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialConsumption {
    pub reference_id: ReferenceId,
    pub color_id: ColorId,
    pub entry_id: LedgerEntryId,
    pub quantity: Decimal,
    pub orders: usize,
}

/// Sum the allocation records of `orders` per (reference, color), largest first.
pub fn summarize_consumption<'a, I>(orders: I) -> Vec<MaterialConsumption>
where
    I: IntoIterator<Item = &'a CurtainOrder>,
{
    let mut totals: Vec<(MaterialConsumption, Option<OrderId>)> = Vec::new();
    for order in orders {
        for line in order.allocation() {
            let slot = match totals
                .iter()
                .position(|(c, _)| c.reference_id == line.reference_id && c.color_id == line.color_id)
            {
                Some(idx) => &mut totals[idx],
                None => {
                    totals.push((
                        MaterialConsumption {
                            reference_id: line.reference_id,
                            color_id: line.color_id,
                            entry_id: line.entry_id,
                            quantity: Decimal::ZERO,
                            orders: 0,
                        },
                        None,
                    ));
                    let last = totals.len() - 1;
                    &mut totals[last]
                }
            };
            slot.0.quantity += line.quantity;
            if slot.1 != Some(order.id_typed()) {
                slot.0.orders += 1;
                slot.1 = Some(order.id_typed());
            }
        }
    }

    let mut summary: Vec<MaterialConsumption> = totals.into_iter().map(|(c, _)| c).collect();
    summary.sort_by(|a, b| {
        b.quantity
            .cmp(&a.quantity)
            .then_with(|| a.reference_id.cmp(&b.reference_id))
            .then_with(|| a.color_id.cmp(&b.color_id))
    });
    summary
}
