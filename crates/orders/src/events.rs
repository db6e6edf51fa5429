use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use curtainworks_core::{AggregateRoot, DesignId, OrderId};
use curtainworks_events::Event;

use crate::order::{CurtainOrder, OrderStatus};

/// Event: OrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub design_id: DesignId,
    pub width_cm: Decimal,
    pub multiplier: u32,
    pub total_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdated {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub total_cost: Decimal,
    pub version: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDeleted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

impl OrderCreated {
    pub fn from_order(order: &CurtainOrder) -> Self {
        Self {
            order_id: order.id_typed(),
            design_id: order.design_id(),
            width_cm: order.dimensions().width_cm(),
            multiplier: order.dimensions().multiplier(),
            total_cost: order.costs().total,
            occurred_at: order.created_at(),
        }
    }
}

impl OrderUpdated {
    pub fn from_order(order: &CurtainOrder) -> Self {
        Self {
            order_id: order.id_typed(),
            status: order.status(),
            total_cost: order.costs().total,
            version: order.version(),
            occurred_at: order.updated_at(),
        }
    }
}

impl Event for OrderCreated {
    fn event_type(&self) -> &'static str {
        "orders.order.created"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn subject(&self) -> String {
        self.order_id.to_string()
    }
}

impl Event for OrderUpdated {
    fn event_type(&self) -> &'static str {
        "orders.order.updated"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn subject(&self) -> String {
        self.order_id.to_string()
    }
}

impl Event for OrderDeleted {
    fn event_type(&self) -> &'static str {
        "orders.order.deleted"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn subject(&self) -> String {
        self.order_id.to_string()
    }
}
