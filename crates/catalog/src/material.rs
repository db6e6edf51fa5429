use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use curtainworks_core::{ColorId, DomainError, DomainResult, Entity, MaterialTypeId, ReferenceId};

/// Category of supply (fabric, rail, hooks, lining...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialType {
    pub id: MaterialTypeId,
    pub name: String,
    pub description: Option<String>,
}

impl MaterialType {
    pub fn new(id: MaterialTypeId, name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("material type name cannot be empty"));
        }
        Ok(Self {
            id,
            name,
            description: None,
        })
    }
}

impl Entity for MaterialType {
    type Id = MaterialTypeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Purchasable item within a material type. `code` is unique system-wide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialReference {
    pub id: ReferenceId,
    pub material_type_id: MaterialTypeId,
    pub code: String,
    pub name: String,
    /// Price per unit of stock (meter, piece...).
    pub unit_price: Decimal,
}

impl MaterialReference {
    pub fn new(
        id: ReferenceId,
        material_type_id: MaterialTypeId,
        code: impl Into<String>,
        name: impl Into<String>,
        unit_price: Decimal,
    ) -> DomainResult<Self> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(DomainError::validation("reference code cannot be empty"));
        }
        if unit_price.is_sign_negative() {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        Ok(Self {
            id,
            material_type_id,
            code,
            name: name.into(),
            unit_price,
        })
    }
}

impl Entity for MaterialReference {
    type Id = ReferenceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Color variant of a reference. `code` is unique per reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialColor {
    pub id: ColorId,
    pub reference_id: ReferenceId,
    pub code: String,
    pub name: String,
}

impl MaterialColor {
    pub fn new(
        id: ColorId,
        reference_id: ReferenceId,
        code: impl Into<String>,
        name: impl Into<String>,
    ) -> DomainResult<Self> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(DomainError::validation("color code cannot be empty"));
        }
        Ok(Self {
            id,
            reference_id,
            code,
            name: name.into(),
        })
    }
}

impl Entity for MaterialColor {
    type Id = ColorId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
