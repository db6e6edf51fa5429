use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use curtainworks_catalog::MaterialSelection;
use curtainworks_core::{
    AggregateRoot, ColorId, DesignId, DomainError, DomainResult, LedgerEntryId, MaterialTypeId,
    OrderId, ReferenceId,
};

use crate::costing::CostBreakdown;
use crate::dimensions::CurtainDimensions;

/// Order status lifecycle: `pending ⇄ in_process ⇄ completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    InProcess,
    Completed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::InProcess => "in_process",
            OrderStatus::Completed => "completed",
        }
    }

    /// Only adjacent steps are legal; staying put is always allowed.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (InProcess, InProcess)
                | (Completed, Completed)
                | (Pending, InProcess)
                | (InProcess, Pending)
                | (InProcess, Completed)
                | (Completed, InProcess)
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "in_process" => Ok(OrderStatus::InProcess),
            "completed" => Ok(OrderStatus::Completed),
            other => Err(DomainError::validation(format!("unknown order status: {other}"))),
        }
    }
}

/// What an order currently has drawn from one ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedLine {
    pub material_type_id: MaterialTypeId,
    pub entry_id: LedgerEntryId,
    pub reference_id: ReferenceId,
    pub color_id: ColorId,
    pub quantity: Decimal,
}

/// Partial update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPatch {
    pub width_cm: Option<Decimal>,
    pub height_cm: Option<Decimal>,
    pub multiplier: Option<u32>,
    pub split: Option<bool>,
    pub notes: Option<String>,
    pub status: Option<OrderStatus>,
}

impl OrderPatch {
    pub fn is_empty(&self) -> bool {
        self == &OrderPatch::default()
    }
}

/// Raw stored state, used by stores to rebuild an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurtainOrderParts {
    pub id: OrderId,
    pub design_id: DesignId,
    pub dimensions: CurtainDimensions,
    pub split: bool,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub selections: Vec<MaterialSelection>,
    pub allocation: Vec<AllocatedLine>,
    pub costs: CostBreakdown,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: CurtainOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurtainOrder {
    id: OrderId,
    design_id: DesignId,
    dimensions: CurtainDimensions,
    split: bool,
    status: OrderStatus,
    notes: Option<String>,
    selections: Vec<MaterialSelection>,
    allocation: Vec<AllocatedLine>,
    costs: CostBreakdown,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl CurtainOrder {
    /// A freshly placed order: pending, version 1.
    #[allow(clippy::too_many_arguments)]
    pub fn place(
        id: OrderId,
        design_id: DesignId,
        dimensions: CurtainDimensions,
        split: bool,
        notes: Option<String>,
        selections: Vec<MaterialSelection>,
        allocation: Vec<AllocatedLine>,
        costs: CostBreakdown,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            design_id,
            dimensions,
            split,
            status: OrderStatus::Pending,
            notes,
            selections,
            allocation,
            costs,
            created_at: at,
            updated_at: at,
            version: 1,
        }
    }

    pub fn restore(parts: CurtainOrderParts) -> Self {
        Self {
            id: parts.id,
            design_id: parts.design_id,
            dimensions: parts.dimensions,
            split: parts.split,
            status: parts.status,
            notes: parts.notes,
            selections: parts.selections,
            allocation: parts.allocation,
            costs: parts.costs,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            version: parts.version,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn design_id(&self) -> DesignId {
        self.design_id
    }

    pub fn dimensions(&self) -> &CurtainDimensions {
        &self.dimensions
    }

    pub fn split(&self) -> bool {
        self.split
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn selections(&self) -> &[MaterialSelection] {
        &self.selections
    }

    pub fn allocation(&self) -> &[AllocatedLine] {
        &self.allocation
    }

    pub fn costs(&self) -> &CostBreakdown {
        &self.costs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Quantity currently drawn from `entry_id` (zero if none).
    pub fn allocated_from(&self, entry_id: LedgerEntryId) -> Decimal {
        self.allocation
            .iter()
            .filter(|line| line.entry_id == entry_id)
            .map(|line| line.quantity)
            .sum()
    }

    /// Quantity recorded for one material line drawn from `entry_id`.
    pub fn allocated_line(&self, material_type_id: MaterialTypeId, entry_id: LedgerEntryId) -> Decimal {
        self.allocation
            .iter()
            .find(|line| line.material_type_id == material_type_id && line.entry_id == entry_id)
            .map_or(Decimal::ZERO, |line| line.quantity)
    }

    pub fn is_deletable(&self) -> bool {
        matches!(self.status, OrderStatus::Pending)
    }

    pub fn ensure_deletable(&self) -> DomainResult<()> {
        if self.is_deletable() {
            Ok(())
        } else {
            Err(DomainError::invalid_state(format!(
                "order {} is {}; only pending orders can be deleted",
                self.id, self.status
            )))
        }
    }

    pub fn transition_to(&mut self, next: OrderStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_state(format!(
                "order {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Height, split flag and notes. None of them affect stock.
    pub fn update_details(
        &mut self,
        height_cm: Option<Decimal>,
        split: Option<bool>,
        notes: Option<String>,
    ) -> DomainResult<()> {
        if let Some(height) = height_cm {
            self.dimensions = self.dimensions.with_changes(None, Some(height), None)?;
        }
        if let Some(split) = split {
            self.split = split;
        }
        if let Some(notes) = notes {
            self.notes = (!notes.trim().is_empty()).then_some(notes);
        }
        Ok(())
    }

    /// New size plus the costs recomputed for it.
    pub fn resize(&mut self, dimensions: CurtainDimensions, costs: CostBreakdown) {
        self.dimensions = dimensions;
        self.costs = costs;
    }

    /// Add a signed quantity to the allocation record of one material line.
    /// Lines that drop to zero are removed.
    pub fn record_allocation(&mut self, line: AllocatedLine) {
        match self
            .allocation
            .iter_mut()
            .find(|l| l.material_type_id == line.material_type_id && l.entry_id == line.entry_id)
        {
            Some(existing) => existing.quantity += line.quantity,
            None => self.allocation.push(line),
        }
        self.allocation.retain(|l| !l.quantity.is_zero());
    }

    /// Mark a committed modification: bump version and timestamp.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
        self.version += 1;
    }
}

impl AggregateRoot for CurtainOrder {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
