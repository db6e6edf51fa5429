//! OrderAllocationCoordinator: keeps order material draw-down and the ledger in step.
//!
//! Every order mutation is a single `commit_order` call, so the order row and all
//! of its ledger movements land together or not at all. Order updates are guarded
//! by the order's version; a conflicting writer makes the whole update re-run from
//! a fresh read, bounded by the retry policy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use curtainworks_catalog::{
    BillOfMaterialsResolver, CatalogReader, Design, MaterialRequirement, MaterialSelection,
};
use curtainworks_core::{
    AggregateRoot, Clock, ColorId, DesignId, DomainError, DomainResult, ExpectedVersion,
    LedgerEntryId, OrderId, ReferenceId,
};
use curtainworks_events::{EventBus, NotificationEnvelope};
use curtainworks_inventory::{AdjustOutcome, Movement, MovementKind};
use curtainworks_orders::{
    AllocatedLine, CostBreakdown, CurtainDimensions, CurtainOrder, MaterialConsumption,
    OrderCreated, OrderDeleted, OrderFilter, OrderPatch, OrderStatus, OrderUpdated, PricedLine,
    summarize_consumption,
};

use crate::notify::{publish, publish_adjustments};
use crate::retry::RetryPolicy;
use crate::store::{InventoryStore, OrderWrite, StoreError};

/// Input for `create_order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCurtainOrder {
    pub design_id: DesignId,
    pub width_cm: Decimal,
    pub height_cm: Decimal,
    pub multiplier: u32,
    pub split: bool,
    pub notes: Option<String>,
    /// Reference/color choices for design lines without a fixed binding.
    pub selections: Vec<MaterialSelection>,
}

pub struct OrderAllocationCoordinator<S, C, B> {
    store: S,
    catalog: C,
    bus: B,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl<S, C, B> OrderAllocationCoordinator<S, C, B>
where
    S: InventoryStore,
    C: CatalogReader,
    B: EventBus<NotificationEnvelope>,
{
    pub fn new(store: S, catalog: C, bus: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            catalog,
            bus,
            clock,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resolve the design for the requested size, debit every material line and
    /// persist the order in one unit.
    #[instrument(
        skip(self, request),
        fields(design_id = %request.design_id, width_cm = %request.width_cm),
        err
    )]
    pub fn create_order(&self, request: NewCurtainOrder) -> DomainResult<CurtainOrder> {
        let dimensions =
            CurtainDimensions::new(request.width_cm, request.height_cm, request.multiplier)?;
        let design = self.design(request.design_id)?;
        let bound = design.bind(&request.selections)?;
        let requirements = BillOfMaterialsResolver::resolve(
            &bound,
            dimensions.width_cm(),
            dimensions.multiplier(),
        );

        let mut movements = Vec::with_capacity(requirements.len());
        let mut allocation = Vec::with_capacity(requirements.len());
        for requirement in &requirements {
            let entry_id = self.entry_for(requirement.reference_id, requirement.color_id)?;
            movements.push(Movement::new(
                entry_id,
                -requirement.quantity,
                MovementKind::OrderAllocation,
            ));
            allocation.push(AllocatedLine {
                material_type_id: requirement.material_type_id,
                entry_id,
                reference_id: requirement.reference_id,
                color_id: requirement.color_id,
                quantity: requirement.quantity,
            });
        }
        let costs = self.costs(&requirements, design.labor_cost())?;

        let now = self.clock.now();
        let order = CurtainOrder::place(
            OrderId::new(),
            design.id_typed(),
            dimensions,
            request.split,
            request.notes.filter(|n| !n.trim().is_empty()),
            request.selections,
            allocation,
            costs,
            now,
        );

        let outcomes = self.retry.run("orders.create", || {
            self.store
                .commit_order(OrderWrite::Insert(order.clone()), &movements, now)
        })?;

        info!(
            order_id = %order.id_typed(),
            lines = movements.len(),
            total = %order.costs().total,
            "order created"
        );
        publish_adjustments(&self.bus, &outcomes);
        publish(&self.bus, &OrderCreated::from_order(&order));
        Ok(order)
    }

    /// Apply a partial update. Width or multiplier changes move stock by the
    /// per-line difference and recompute costs; everything else is metadata.
    #[instrument(skip(self, patch), err)]
    pub fn update_order(&self, order_id: OrderId, patch: OrderPatch) -> DomainResult<CurtainOrder> {
        if patch.is_empty() {
            return self.get_order(order_id);
        }

        let (order, outcomes) = self
            .retry
            .run("orders.update", || self.try_update(order_id, &patch))?;

        info!(
            %order_id,
            status = %order.status(),
            version = order.version(),
            movements = outcomes.len(),
            "order updated"
        );
        publish_adjustments(&self.bus, &outcomes);
        publish(&self.bus, &OrderUpdated::from_order(&order));
        Ok(order)
    }

    /// Credit every allocated line back and remove the order. Pending orders only.
    #[instrument(skip(self), err)]
    pub fn delete_order(&self, order_id: OrderId) -> DomainResult<CurtainOrder> {
        let now = self.clock.now();
        let (order, outcomes) = self.retry.run("orders.delete", || {
            let order = self.load_order(order_id)?;
            order.ensure_deletable()?;

            let movements: Vec<Movement> = order
                .allocation()
                .iter()
                .map(|line| Movement::new(line.entry_id, line.quantity, MovementKind::OrderReversal))
                .collect();
            let outcomes = self.store.commit_order(
                OrderWrite::Delete {
                    order_id,
                    expected: ExpectedVersion::read_at(&order),
                },
                &movements,
                now,
            )?;
            Ok((order, outcomes))
        })?;

        info!(%order_id, credited = outcomes.len(), "order deleted");
        publish_adjustments(&self.bus, &outcomes);
        publish(
            &self.bus,
            &OrderDeleted {
                order_id,
                occurred_at: now,
            },
        );
        Ok(order)
    }

    pub fn get_order(&self, order_id: OrderId) -> DomainResult<CurtainOrder> {
        Ok(self
            .retry
            .run("orders.get", || self.load_order(order_id))?)
    }

    pub fn list_orders(&self, status: Option<OrderStatus>) -> DomainResult<Vec<CurtainOrder>> {
        self.find_orders(&OrderFilter::with_status(status))
    }

    /// Orders matching every set field of `filter`: status, design, creation window.
    pub fn find_orders(&self, filter: &OrderFilter) -> DomainResult<Vec<CurtainOrder>> {
        let mut orders = self.retry.run("orders.list", || self.store.orders())?;
        orders.retain(|order| filter.matches(order));
        Ok(orders)
    }

    /// What orders created in `[from, until)` currently hold, per reference and color.
    pub fn material_consumption(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> DomainResult<Vec<MaterialConsumption>> {
        if until <= from {
            return Err(DomainError::validation("consumption window is empty"));
        }
        let orders = self.find_orders(&OrderFilter::created_between(from, until))?;
        Ok(summarize_consumption(&orders))
    }

    fn try_update(
        &self,
        order_id: OrderId,
        patch: &OrderPatch,
    ) -> Result<(CurtainOrder, Vec<AdjustOutcome>), StoreError> {
        let current = self.load_order(order_id)?;
        let expected = ExpectedVersion::read_at(&current);
        let mut order = current.clone();

        if let Some(status) = patch.status {
            order.transition_to(status)?;
        }
        order.update_details(patch.height_cm, patch.split, patch.notes.clone())?;

        let old_dims = *current.dimensions();
        let new_dims = order
            .dimensions()
            .with_changes(patch.width_cm, None, patch.multiplier)?;

        let mut movements = Vec::new();
        if old_dims.changes_materials(&new_dims) {
            let design = self.design(order.design_id())?;
            let bound = design.bind(order.selections())?;
            let requirements = BillOfMaterialsResolver::resolve(
                &bound,
                new_dims.width_cm(),
                new_dims.multiplier(),
            );

            // Each line moves from what the order holds to what the design
            // resolves now; lines it no longer resolves go back in full.
            let mut targets = Vec::with_capacity(requirements.len());
            for requirement in &requirements {
                let entry_id = match current.allocation().iter().find(|a| {
                    a.material_type_id == requirement.material_type_id
                        && a.reference_id == requirement.reference_id
                        && a.color_id == requirement.color_id
                }) {
                    Some(allocated) => allocated.entry_id,
                    None => self.entry_for(requirement.reference_id, requirement.color_id)?,
                };
                targets.push(AllocatedLine {
                    material_type_id: requirement.material_type_id,
                    entry_id,
                    reference_id: requirement.reference_id,
                    color_id: requirement.color_id,
                    quantity: requirement.quantity,
                });
            }
            let dropped: Vec<AllocatedLine> = current
                .allocation()
                .iter()
                .filter(|a| {
                    !targets
                        .iter()
                        .any(|t| t.material_type_id == a.material_type_id && t.entry_id == a.entry_id)
                })
                .map(|a| AllocatedLine {
                    quantity: Decimal::ZERO,
                    ..a.clone()
                })
                .collect();

            for target in targets.into_iter().chain(dropped) {
                let delta =
                    target.quantity - current.allocated_line(target.material_type_id, target.entry_id);
                if delta.is_zero() {
                    continue;
                }
                let kind = if delta > Decimal::ZERO {
                    MovementKind::OrderAllocation
                } else {
                    MovementKind::OrderReversal
                };
                movements.push(Movement::new(target.entry_id, -delta, kind));
                order.record_allocation(AllocatedLine {
                    quantity: delta,
                    ..target
                });
            }
            if let Some(line) = order.allocation().iter().find(|l| l.quantity < Decimal::ZERO) {
                return Err(DomainError::invariant(format!(
                    "order {order_id} would hold {} of entry {}",
                    line.quantity, line.entry_id
                ))
                .into());
            }

            let costs = self.costs(&requirements, design.labor_cost())?;
            order.resize(new_dims, costs);
        }

        let now = self.clock.now();
        order.touch(now);
        let outcomes = self.store.commit_order(
            OrderWrite::Update {
                order: order.clone(),
                expected,
            },
            &movements,
            now,
        )?;
        Ok((order, outcomes))
    }

    fn load_order(&self, order_id: OrderId) -> Result<CurtainOrder, StoreError> {
        self.store
            .order(order_id)?
            .ok_or_else(|| DomainError::not_found("order", order_id).into())
    }

    fn design(&self, design_id: DesignId) -> DomainResult<Design> {
        self.catalog
            .get_design(design_id)?
            .ok_or_else(|| DomainError::not_found("design", design_id))
    }

    fn entry_for(
        &self,
        reference_id: ReferenceId,
        color_id: ColorId,
    ) -> DomainResult<LedgerEntryId> {
        self.store
            .entry_by_pair(reference_id, color_id)?
            .map(|entry| entry.id_typed())
            .ok_or_else(|| {
                DomainError::not_found("ledger entry", format!("{reference_id}/{color_id}"))
            })
    }

    /// Price each resolved line at its reference's current unit price.
    fn costs(
        &self,
        requirements: &[MaterialRequirement],
        labor_cost: Decimal,
    ) -> DomainResult<CostBreakdown> {
        let lines = requirements
            .iter()
            .map(|r| -> DomainResult<PricedLine> {
                let unit_price = self
                    .catalog
                    .reference_price(r.reference_id)?
                    .ok_or_else(|| DomainError::not_found("material reference", r.reference_id))?;
                Ok(PricedLine {
                    reference_id: r.reference_id,
                    quantity: r.quantity,
                    unit_price,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;
        CostBreakdown::compute(&lines, labor_cost)
    }
}
