use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;

use curtainworks_catalog::{CatalogReader, Design, MaterialColor, MaterialReference, MaterialType};
use curtainworks_core::{
    ColorId, DesignId, DomainError, DomainResult, Entity, MaterialTypeId, ReferenceId,
};

#[derive(Debug, Default)]
struct CatalogState {
    types: HashMap<MaterialTypeId, MaterialType>,
    references: HashMap<ReferenceId, MaterialReference>,
    colors: HashMap<ColorId, MaterialColor>,
    designs: HashMap<DesignId, Design>,
}

/// In-memory catalog.
///
/// Intended for tests/dev. Enforces the same uniqueness and reference rules as the
/// relational schema.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

fn poisoned<T>(_: T) -> DomainError {
    DomainError::unavailable("catalog lock poisoned")
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_material_type(&self, material_type: MaterialType) -> DomainResult<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        if state.types.values().any(|t| t.name == material_type.name) {
            return Err(DomainError::duplicate(format!(
                "material type {} already exists",
                material_type.name
            )));
        }
        state.types.insert(material_type.id, material_type);
        Ok(())
    }

    pub fn add_reference(&self, reference: MaterialReference) -> DomainResult<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        if !state.types.contains_key(&reference.material_type_id) {
            return Err(DomainError::not_found(
                "material type",
                reference.material_type_id,
            ));
        }
        if state.references.values().any(|r| r.code == reference.code) {
            return Err(DomainError::duplicate(format!(
                "{}: code {} is already taken",
                reference.describe("reference"),
                reference.code
            )));
        }
        state.references.insert(reference.id, reference);
        Ok(())
    }

    pub fn add_color(&self, color: MaterialColor) -> DomainResult<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        if !state.references.contains_key(&color.reference_id) {
            return Err(DomainError::not_found("material reference", color.reference_id));
        }
        if state
            .colors
            .values()
            .any(|c| c.reference_id == color.reference_id && c.code == color.code)
        {
            return Err(DomainError::duplicate(format!(
                "color code {} already exists for reference {}",
                color.code, color.reference_id
            )));
        }
        state.colors.insert(color.id, color);
        Ok(())
    }

    /// Every line must name a known material type; fixed bindings must be a
    /// reference of that type and one of its colors.
    pub fn add_design(&self, design: Design) -> DomainResult<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        if state.designs.contains_key(&design.id_typed()) {
            return Err(DomainError::duplicate(format!(
                "{} already exists",
                design.describe("design")
            )));
        }
        state.check_design(&design)?;
        state.designs.insert(design.id_typed(), design);
        Ok(())
    }

    /// Edit a stored design in place. Orders placed earlier keep their allocation
    /// record; only later resizes see the new lines.
    pub fn replace_design(&self, design: Design) -> DomainResult<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        if !state.designs.contains_key(&design.id_typed()) {
            return Err(DomainError::not_found("design", design.id_typed()));
        }
        state.check_design(&design)?;
        state.designs.insert(design.id_typed(), design);
        Ok(())
    }
}

impl CatalogState {
    fn check_design(&self, design: &Design) -> DomainResult<()> {
        if self
            .designs
            .values()
            .any(|d| d.id_typed() != design.id_typed() && d.code() == design.code())
        {
            return Err(DomainError::duplicate(format!(
                "{}: code {} is already taken",
                design.describe("design"),
                design.code()
            )));
        }

        for line in design.lines() {
            if !self.types.contains_key(&line.material_type_id) {
                return Err(DomainError::not_found("material type", line.material_type_id));
            }
            if let Some(reference_id) = line.reference_id {
                let reference = self
                    .references
                    .get(&reference_id)
                    .ok_or_else(|| DomainError::not_found("material reference", reference_id))?;
                if reference.material_type_id != line.material_type_id {
                    return Err(DomainError::validation(format!(
                        "reference {} is not a {}",
                        reference.code, line.material_type_id
                    )));
                }
            }
            if let Some(color_id) = line.color_id {
                let color = self
                    .colors
                    .get(&color_id)
                    .ok_or_else(|| DomainError::not_found("material color", color_id))?;
                if Some(color.reference_id) != line.reference_id {
                    return Err(DomainError::validation(format!(
                        "color {} does not belong to the line's reference",
                        color.code
                    )));
                }
            }
        }
        Ok(())
    }
}

impl CatalogReader for InMemoryCatalog {
    fn get_design(&self, id: DesignId) -> DomainResult<Option<Design>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.designs.get(&id).cloned())
    }

    fn reference_price(&self, reference_id: ReferenceId) -> DomainResult<Option<Decimal>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.references.get(&reference_id).map(|r| r.unit_price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curtainworks_catalog::DesignMaterialLine;

    fn seeded() -> (InMemoryCatalog, MaterialType, MaterialReference) {
        let catalog = InMemoryCatalog::new();
        let fabric = MaterialType::new(MaterialTypeId::new(), "Fabric").unwrap();
        let linen = MaterialReference::new(
            ReferenceId::new(),
            fabric.id,
            "LIN-01",
            "Linen",
            Decimal::new(1250, 2),
        )
        .unwrap();
        catalog.add_material_type(fabric.clone()).unwrap();
        catalog.add_reference(linen.clone()).unwrap();
        (catalog, fabric, linen)
    }

    #[test]
    fn prices_known_references_only() {
        let (catalog, _, linen) = seeded();
        assert_eq!(
            catalog.reference_price(linen.id).unwrap(),
            Some(Decimal::new(1250, 2))
        );
        assert_eq!(catalog.reference_price(ReferenceId::new()).unwrap(), None);
    }

    #[test]
    fn reference_codes_are_unique() {
        let (catalog, fabric, _) = seeded();
        let twin =
            MaterialReference::new(ReferenceId::new(), fabric.id, "LIN-01", "Other", Decimal::ONE)
                .unwrap();
        assert!(matches!(
            catalog.add_reference(twin),
            Err(DomainError::DuplicateEntry(_))
        ));
    }

    #[test]
    fn design_color_must_belong_to_reference() {
        let (catalog, fabric, linen) = seeded();
        let other = MaterialReference::new(
            ReferenceId::new(),
            fabric.id,
            "VEL-01",
            "Velvet",
            Decimal::from(20),
        )
        .unwrap();
        catalog.add_reference(other.clone()).unwrap();
        let velvet_red = MaterialColor::new(ColorId::new(), other.id, "RED", "Red").unwrap();
        catalog.add_color(velvet_red.clone()).unwrap();

        let design = Design::new(DesignId::new(), "D-1", "Plain", Decimal::from(40))
            .unwrap()
            .with_line(
                DesignMaterialLine::new(fabric.id, Decimal::new(22, 1)).bound_to(linen.id, velvet_red.id),
            )
            .unwrap();

        assert!(matches!(
            catalog.add_design(design),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn stores_and_returns_designs() {
        let (catalog, fabric, _) = seeded();
        let design = Design::new(DesignId::new(), "D-2", "Pleated", Decimal::from(45))
            .unwrap()
            .with_line(DesignMaterialLine::new(fabric.id, Decimal::new(22, 1)))
            .unwrap();
        catalog.add_design(design.clone()).unwrap();

        assert_eq!(catalog.get_design(design.id_typed()).unwrap(), Some(design));
        assert_eq!(catalog.get_design(DesignId::new()).unwrap(), None);
    }

    #[test]
    fn designs_are_edited_in_place_by_id() {
        let (catalog, fabric, _) = seeded();
        let id = DesignId::new();
        let draft = |per_meter| {
            Design::new(id, "D-3", "Wave", Decimal::from(45))
                .unwrap()
                .with_line(DesignMaterialLine::new(fabric.id, per_meter))
                .unwrap()
        };

        assert!(matches!(
            catalog.replace_design(draft(Decimal::ONE)),
            Err(DomainError::NotFound { entity: "design", .. })
        ));
        catalog.add_design(draft(Decimal::ONE)).unwrap();
        assert!(matches!(
            catalog.add_design(draft(Decimal::ONE)),
            Err(DomainError::DuplicateEntry(_))
        ));

        catalog.replace_design(draft(Decimal::from(3))).unwrap();
        let stored = catalog.get_design(id).unwrap().unwrap();
        assert_eq!(stored.lines()[0].quantity_per_meter, Decimal::from(3));
    }
}
