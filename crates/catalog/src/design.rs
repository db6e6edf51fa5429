use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use curtainworks_core::{
    ColorId, DesignId, DomainError, DomainResult, Entity, MaterialTypeId, ReferenceId,
};

/// Workshop complexity rating of a design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
        }
    }
}

impl core::str::FromStr for Complexity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Complexity::Low),
            "medium" => Ok(Complexity::Medium),
            "high" => Ok(Complexity::High),
            other => Err(DomainError::validation(format!("unknown complexity: {other}"))),
        }
    }
}

/// One material requirement of a design, expressed per linear meter of width.
///
/// `reference_id`/`color_id` are optional: a line without them is chosen when the
/// order is placed (see [`Design::bind`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignMaterialLine {
    pub material_type_id: MaterialTypeId,
    pub quantity_per_meter: Decimal,
    pub reference_id: Option<ReferenceId>,
    pub color_id: Option<ColorId>,
    pub description: Option<String>,
}

impl DesignMaterialLine {
    pub fn new(material_type_id: MaterialTypeId, quantity_per_meter: Decimal) -> Self {
        Self {
            material_type_id,
            quantity_per_meter,
            reference_id: None,
            color_id: None,
            description: None,
        }
    }

    pub fn bound_to(mut self, reference_id: ReferenceId, color_id: ColorId) -> Self {
        self.reference_id = Some(reference_id);
        self.color_id = Some(color_id);
        self
    }

    /// Both reference and color are known.
    pub fn binding(&self) -> Option<(ReferenceId, ColorId)> {
        self.reference_id.zip(self.color_id)
    }
}

/// Caller's choice of reference/color for a design line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialSelection {
    pub material_type_id: MaterialTypeId,
    pub reference_id: ReferenceId,
    pub color_id: ColorId,
}

/// Bill-of-materials template. At most one line per material type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Design {
    id: DesignId,
    code: String,
    name: String,
    description: Option<String>,
    labor_cost: Decimal,
    complexity: Complexity,
    lines: Vec<DesignMaterialLine>,
}

impl Design {
    pub fn new(
        id: DesignId,
        code: impl Into<String>,
        name: impl Into<String>,
        labor_cost: Decimal,
    ) -> DomainResult<Self> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(DomainError::validation("design code cannot be empty"));
        }
        if labor_cost.is_sign_negative() {
            return Err(DomainError::validation("labor cost cannot be negative"));
        }
        Ok(Self {
            id,
            code,
            name: name.into(),
            description: None,
            labor_cost,
            complexity: Complexity::default(),
            lines: Vec::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    /// Append a material line.
    pub fn add_line(&mut self, line: DesignMaterialLine) -> DomainResult<()> {
        if line.quantity_per_meter <= Decimal::ZERO {
            return Err(DomainError::validation(
                "quantity per meter must be positive",
            ));
        }
        if self.line_for(line.material_type_id).is_some() {
            return Err(DomainError::duplicate(format!(
                "design {} already has a line for material type {}",
                self.code, line.material_type_id
            )));
        }
        if line.reference_id.is_none() && line.color_id.is_some() {
            return Err(DomainError::validation(
                "a line cannot fix a color without its reference",
            ));
        }
        self.lines.push(line);
        Ok(())
    }

    pub fn with_line(mut self, line: DesignMaterialLine) -> DomainResult<Self> {
        self.add_line(line)?;
        Ok(self)
    }

    pub fn id_typed(&self) -> DesignId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn labor_cost(&self) -> Decimal {
        self.labor_cost
    }

    pub fn complexity(&self) -> Complexity {
        self.complexity
    }

    pub fn lines(&self) -> &[DesignMaterialLine] {
        &self.lines
    }

    pub fn line_for(&self, material_type_id: MaterialTypeId) -> Option<&DesignMaterialLine> {
        self.lines
            .iter()
            .find(|line| line.material_type_id == material_type_id)
    }

    /// Return a copy of the design with the caller's selections applied to lines that
    /// are not fully bound yet. Fixed bindings win over selections.
    pub fn bind(&self, selections: &[MaterialSelection]) -> DomainResult<Design> {
        let mut bound = self.clone();
        for (i, selection) in selections.iter().enumerate() {
            if selections[..i]
                .iter()
                .any(|s| s.material_type_id == selection.material_type_id)
            {
                return Err(DomainError::validation(format!(
                    "material type {} selected more than once",
                    selection.material_type_id
                )));
            }

            let line = bound
                .lines
                .iter_mut()
                .find(|line| line.material_type_id == selection.material_type_id)
                .ok_or_else(|| {
                    DomainError::validation(format!(
                        "design {} has no line for material type {}",
                        self.code, selection.material_type_id
                    ))
                })?;

            match (line.reference_id, line.color_id) {
                (Some(_), Some(_)) => {}
                (Some(reference_id), None) => {
                    if reference_id != selection.reference_id {
                        return Err(DomainError::validation(format!(
                            "material type {} is fixed to reference {}",
                            selection.material_type_id, reference_id
                        )));
                    }
                    line.color_id = Some(selection.color_id);
                }
                (None, _) => {
                    line.reference_id = Some(selection.reference_id);
                    line.color_id = Some(selection.color_id);
                }
            }
        }
        Ok(bound)
    }
}

impl Entity for Design {
    type Id = DesignId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn design() -> Design {
        Design::new(DesignId::new(), "PLW-01", "Pleated wave", Decimal::new(45, 0)).unwrap()
    }

    #[test]
    fn one_line_per_material_type() {
        let fabric = MaterialTypeId::new();
        let mut d = design();
        d.add_line(DesignMaterialLine::new(fabric, Decimal::new(22, 1)))
            .unwrap();

        let err = d
            .add_line(DesignMaterialLine::new(fabric, Decimal::ONE))
            .unwrap_err();
        assert!(matches!(err, DomainError::DuplicateEntry(_)));
        assert_eq!(d.lines().len(), 1);
    }

    #[test]
    fn rejects_non_positive_quantity_per_meter() {
        let mut d = design();
        let err = d
            .add_line(DesignMaterialLine::new(MaterialTypeId::new(), Decimal::ZERO))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn bind_fills_open_lines_and_keeps_fixed_ones() {
        let fabric = MaterialTypeId::new();
        let rail = MaterialTypeId::new();
        let fixed_ref = ReferenceId::new();
        let fixed_color = ColorId::new();
        let d = design()
            .with_line(DesignMaterialLine::new(fabric, Decimal::new(22, 1)))
            .unwrap()
            .with_line(DesignMaterialLine::new(rail, Decimal::ONE).bound_to(fixed_ref, fixed_color))
            .unwrap();

        let chosen_ref = ReferenceId::new();
        let chosen_color = ColorId::new();
        let bound = d
            .bind(&[
                MaterialSelection {
                    material_type_id: fabric,
                    reference_id: chosen_ref,
                    color_id: chosen_color,
                },
                MaterialSelection {
                    material_type_id: rail,
                    reference_id: ReferenceId::new(),
                    color_id: ColorId::new(),
                },
            ])
            .unwrap();

        assert_eq!(bound.line_for(fabric).unwrap().binding(), Some((chosen_ref, chosen_color)));
        assert_eq!(bound.line_for(rail).unwrap().binding(), Some((fixed_ref, fixed_color)));
        // the template itself is untouched
        assert_eq!(d.line_for(fabric).unwrap().binding(), None);
    }

    #[test]
    fn bind_rejects_unknown_material_type() {
        let d = design();
        let err = d
            .bind(&[MaterialSelection {
                material_type_id: MaterialTypeId::new(),
                reference_id: ReferenceId::new(),
                color_id: ColorId::new(),
            }])
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn complexity_round_trips_through_text() {
        for c in [Complexity::Low, Complexity::Medium, Complexity::High] {
            assert_eq!(c.as_str().parse::<Complexity>().unwrap(), c);
        }
    }
}
