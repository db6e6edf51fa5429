//! Curtain manufacturing orders.
//!
//! Pure order rules: dimension limits, the status state machine, cost
//! computation and the allocation record an order keeps of what it drew from
//! stock. Stock itself is moved by the allocation coordinator in `infra`.

pub mod costing;
pub mod dimensions;
pub mod events;
pub mod order;
pub mod query;

pub use costing::{CostBreakdown, PROFITABILITY_FACTOR, PricedLine};
pub use dimensions::CurtainDimensions;
pub use events::{OrderCreated, OrderDeleted, OrderUpdated};
pub use order::{AllocatedLine, CurtainOrder, CurtainOrderParts, OrderPatch, OrderStatus};
pub use query::{MaterialConsumption, OrderFilter, summarize_consumption};
