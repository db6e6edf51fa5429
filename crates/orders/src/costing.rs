//! Order cost computation.
//!
//! `total = round((materials + labor) × PROFITABILITY_FACTOR, 2)` where materials
//! are priced line by line. Rounding is banker's rounding on exact decimals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use curtainworks_core::{DomainError, DomainResult, ReferenceId};

/// 1.30
pub const PROFITABILITY_FACTOR: Decimal = Decimal::from_parts(130, 0, 0, false, 2);

/// A resolved material quantity with the unit price of its reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub reference_id: ReferenceId,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl PricedLine {
    pub fn cost(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub materials: Decimal,
    pub labor: Decimal,
    pub total: Decimal,
}

impl CostBreakdown {
    pub fn compute(lines: &[PricedLine], labor_cost: Decimal) -> DomainResult<Self> {
        if lines.iter().any(|l| l.unit_price < Decimal::ZERO) {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        let materials: Decimal = lines.iter().map(PricedLine::cost).sum();
        let total = ((materials + labor_cost) * PROFITABILITY_FACTOR).round_dp(2);
        Ok(Self {
            materials,
            labor: labor_cost,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: Decimal, unit_price: Decimal) -> PricedLine {
        PricedLine {
            reference_id: ReferenceId::new(),
            quantity,
            unit_price,
        }
    }

    #[test]
    fn factor_is_one_point_three() {
        assert_eq!(PROFITABILITY_FACTOR, Decimal::new(13, 1));
    }

    #[test]
    fn prices_each_line_separately() {
        // 3.3 m of fabric at 12.50 and 1.5 m of rail at 8.00
        let lines = [
            line(Decimal::new(33, 1), Decimal::new(1250, 2)),
            line(Decimal::new(15, 1), Decimal::new(800, 2)),
        ];
        let costs = CostBreakdown::compute(&lines, Decimal::from(45)).unwrap();

        assert_eq!(costs.materials, Decimal::new(5325, 2));
        assert_eq!(costs.labor, Decimal::from(45));
        // (53.25 + 45) × 1.30 = 127.725 → 127.72 (half to even)
        assert_eq!(costs.total, Decimal::new(12772, 2));
    }

    #[test]
    fn labor_only_when_no_lines() {
        let costs = CostBreakdown::compute(&[], Decimal::from(10)).unwrap();
        assert_eq!(costs.materials, Decimal::ZERO);
        assert_eq!(costs.total, Decimal::from(13));
    }
}
