use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use curtainworks_core::Clock;
use curtainworks_events::{EventBus, NotificationEnvelope};

use crate::reservations::ReservationManager;
use crate::store::InventoryStore;
use crate::workers::WorkerHandle;

/// Periodic `sweep_expired` driver.
///
/// Sweeping is idempotent, so a missed or doubled tick only changes when a lapsed
/// hold is marked expired, never whether it counts against availability.
#[derive(Debug)]
pub struct ReservationSweeper;

impl ReservationSweeper {
    /// Spawn a thread that sweeps once per `interval` until shut down.
    pub fn spawn<S, B>(
        name: &'static str,
        manager: Arc<ReservationManager<S, B>>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> WorkerHandle
    where
        S: InventoryStore + 'static,
        B: EventBus<NotificationEnvelope> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || sweep_loop(name, &manager, clock.as_ref(), shutdown_rx, interval))
            .expect("failed to spawn reservation sweeper thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn sweep_loop<S, B>(
    name: &'static str,
    manager: &ReservationManager<S, B>,
    clock: &dyn Clock,
    shutdown_rx: mpsc::Receiver<()>,
    interval: Duration,
) where
    S: InventoryStore,
    B: EventBus<NotificationEnvelope>,
{
    info!(worker = name, interval_ms = interval.as_millis() as u64, "reservation sweeper started");

    loop {
        match manager.sweep_expired(clock.now()) {
            Ok(0) => {}
            Ok(expired) => debug!(worker = name, expired, "sweep tick"),
            Err(err) => warn!(worker = name, error = %err, "reservation sweep failed"),
        }

        match shutdown_rx.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = name, "reservation sweeper stopped");
}
