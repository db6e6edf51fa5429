//! Post-commit notification publishing.
//!
//! Publishing happens only after the store call committed. A failure here is
//! logged and never undoes the committed change.

use serde::Serialize;
use tracing::{debug, warn};

use curtainworks_events::{Event, EventBus, NotificationEnvelope};
use curtainworks_inventory::AdjustOutcome;

pub(crate) fn publish<B, E>(bus: &B, event: &E)
where
    B: EventBus<NotificationEnvelope>,
    E: Event + Serialize,
{
    let envelope = match NotificationEnvelope::from_event(event) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(event_type = event.event_type(), error = %err, "failed to encode notification");
            return;
        }
    };

    let event_id = envelope.event_id();
    match bus.publish(envelope) {
        Ok(()) => debug!(event_type = event.event_type(), %event_id, "notification published"),
        Err(err) => warn!(
            event_type = event.event_type(),
            %event_id,
            error = ?err,
            "failed to publish notification"
        ),
    }
}

/// `inventory.stock.adjusted` for every outcome, plus `inventory.stock.low` for
/// the ones that crossed their minimum.
pub(crate) fn publish_adjustments<B>(bus: &B, outcomes: &[AdjustOutcome])
where
    B: EventBus<NotificationEnvelope>,
{
    for outcome in outcomes {
        publish(bus, &outcome.stock_adjusted());
        if let Some(low) = outcome.stock_low() {
            warn!(
                entry_id = %low.entry_id,
                current_quantity = %low.current_quantity,
                minimum_threshold = %low.minimum_threshold,
                "stock fell to or below minimum"
            );
            publish(bus, &low);
        }
    }
}
