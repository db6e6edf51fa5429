use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use curtainworks_core::{DomainError, DomainResult, ValueObject};

pub const MIN_SIZE_CM: i64 = 20;
pub const MAX_SIZE_CM: i64 = 500;
pub const MIN_MULTIPLIER: u32 = 1;
pub const MAX_MULTIPLIER: u32 = 10;

/// Validated curtain size. `multiplier` is the fullness factor applied to width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurtainDimensions {
    width_cm: Decimal,
    height_cm: Decimal,
    multiplier: u32,
}

impl CurtainDimensions {
    pub fn new(width_cm: Decimal, height_cm: Decimal, multiplier: u32) -> DomainResult<Self> {
        ensure_size("width", width_cm)?;
        ensure_size("height", height_cm)?;
        if !(MIN_MULTIPLIER..=MAX_MULTIPLIER).contains(&multiplier) {
            return Err(DomainError::validation(format!(
                "multiplier must be between {MIN_MULTIPLIER} and {MAX_MULTIPLIER}, got {multiplier}"
            )));
        }
        Ok(Self {
            width_cm,
            height_cm,
            multiplier,
        })
    }

    pub fn width_cm(&self) -> Decimal {
        self.width_cm
    }

    pub fn height_cm(&self) -> Decimal {
        self.height_cm
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Same size with some fields replaced, validated again.
    pub fn with_changes(
        &self,
        width_cm: Option<Decimal>,
        height_cm: Option<Decimal>,
        multiplier: Option<u32>,
    ) -> DomainResult<Self> {
        Self::new(
            width_cm.unwrap_or(self.width_cm),
            height_cm.unwrap_or(self.height_cm),
            multiplier.unwrap_or(self.multiplier),
        )
    }

    /// Width or multiplier differ, so material requirements differ.
    pub fn changes_materials(&self, other: &CurtainDimensions) -> bool {
        self.width_cm != other.width_cm || self.multiplier != other.multiplier
    }
}

impl ValueObject for CurtainDimensions {}

fn ensure_size(field: &str, value: Decimal) -> DomainResult<()> {
    if value < Decimal::from(MIN_SIZE_CM) || value > Decimal::from(MAX_SIZE_CM) {
        return Err(DomainError::validation(format!(
            "{field} must be between {MIN_SIZE_CM} and {MAX_SIZE_CM} cm, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_inclusive() {
        assert!(CurtainDimensions::new(Decimal::from(20), Decimal::from(500), 1).is_ok());
        assert!(CurtainDimensions::new(Decimal::from(500), Decimal::from(20), 10).is_ok());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            (Decimal::new(199, 1), Decimal::from(100), 1),
            (Decimal::from(100), Decimal::new(5001, 1), 1),
            (Decimal::from(100), Decimal::from(100), 0),
            (Decimal::from(100), Decimal::from(100), 11),
        ];
        for (w, h, m) in cases {
            match CurtainDimensions::new(w, h, m) {
                Err(DomainError::Validation(_)) => {}
                other => panic!("expected validation error for {w}x{h}x{m}, got {other:?}"),
            }
        }
    }

    #[test]
    fn height_change_does_not_touch_materials() {
        let d = CurtainDimensions::new(Decimal::from(150), Decimal::from(200), 1).unwrap();
        let taller = d.with_changes(None, Some(Decimal::from(250)), None).unwrap();
        let wider = d.with_changes(Some(Decimal::from(300)), None, None).unwrap();

        assert!(!d.changes_materials(&taller));
        assert!(d.changes_materials(&wider));
    }
}
