//! Bill-of-materials resolution: design + curtain size → material quantities.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use curtainworks_core::{ColorId, MaterialTypeId, ReferenceId, ValueObject};

use crate::design::Design;

/// Quantity of one bound design line needed for a curtain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRequirement {
    pub material_type_id: MaterialTypeId,
    pub reference_id: ReferenceId,
    pub color_id: ColorId,
    pub quantity_per_meter: Decimal,
    pub quantity: Decimal,
}

impl ValueObject for MaterialRequirement {}

/// Signed change of one line's requirement when a curtain is resized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDelta {
    pub material_type_id: MaterialTypeId,
    pub reference_id: ReferenceId,
    pub color_id: ColorId,
    pub delta: Decimal,
}

impl ValueObject for LineDelta {}

/// Stateless resolver. Lines without a reference and color are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct BillOfMaterialsResolver;

impl BillOfMaterialsResolver {
    /// `quantity_per_meter × (width_cm / 100) × multiplier` for each bound line.
    pub fn resolve(design: &Design, width_cm: Decimal, multiplier: u32) -> Vec<MaterialRequirement> {
        design
            .lines()
            .iter()
            .filter_map(|line| {
                let (reference_id, color_id) = line.binding()?;
                Some(MaterialRequirement {
                    material_type_id: line.material_type_id,
                    reference_id,
                    color_id,
                    quantity_per_meter: line.quantity_per_meter,
                    quantity: required_quantity(line.quantity_per_meter, width_cm, multiplier),
                })
            })
            .collect()
    }

    /// Per-line `new − old` requirement. Zero deltas are included.
    pub fn diff(
        old_width_cm: Decimal,
        old_multiplier: u32,
        new_width_cm: Decimal,
        new_multiplier: u32,
        design: &Design,
    ) -> Vec<LineDelta> {
        design
            .lines()
            .iter()
            .filter_map(|line| {
                let (reference_id, color_id) = line.binding()?;
                let old = required_quantity(line.quantity_per_meter, old_width_cm, old_multiplier);
                let new = required_quantity(line.quantity_per_meter, new_width_cm, new_multiplier);
                Some(LineDelta {
                    material_type_id: line.material_type_id,
                    reference_id,
                    color_id,
                    delta: new - old,
                })
            })
            .collect()
    }
}

pub fn required_quantity(quantity_per_meter: Decimal, width_cm: Decimal, multiplier: u32) -> Decimal {
    quantity_per_meter * width_cm / Decimal::ONE_HUNDRED * Decimal::from(multiplier)
}
