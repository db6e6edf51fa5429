//! `curtainworks-sweeper`: expires lapsed reservations on a fixed interval.
//!
//! Reads `InventoryConfig` (see `config/` and `CURTAINWORKS__*`), connects to
//! Postgres, installs the schema if missing and sweeps until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tokio::time::MissedTickBehavior;

use curtainworks_core::{Clock, SystemClock};
use curtainworks_events::{InMemoryEventBus, NotificationEnvelope};
use curtainworks_infra::{InventoryConfig, PostgresInventoryStore, ReservationManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    curtainworks_observability::init();

    let config = InventoryConfig::load().context("failed to load configuration")?;
    let url = config
        .database
        .url
        .clone()
        .context("CURTAINWORKS__DATABASE__URL must be set for the sweeper")?;

    let store = PostgresInventoryStore::connect(&url, config.database.max_connections)
        .await
        .context("failed to connect to Postgres")?;
    store
        .ensure_schema()
        .await
        .context("failed to install schema")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let manager = ReservationManager::new(
        store,
        Arc::new(InMemoryEventBus::<NotificationEnvelope>::new()),
        clock.clone(),
    )
    .with_retry(config.retry_policy())
    .with_default_ttl(config.reservation_ttl());

    let mut ticker = tokio::time::interval(config.sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(
        environment = %config.environment,
        interval_secs = config.reservations.sweep_interval_secs,
        "reservation sweeper running"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = manager.sweep_expired(clock.now()) {
                    tracing::warn!(error = %err, "reservation sweep failed");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}
