//! ReservationManager service: time-boxed holds against available stock.
//!
//! A hold counts against availability while it is active and unexpired. Expiry is
//! evaluated on read, so a lapsed hold stops counting at once; `sweep_expired`
//! only makes the state explicit.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use curtainworks_core::{Clock, DomainError, DomainResult, LedgerEntryId, ReservationToken};
use curtainworks_events::{EventBus, NotificationEnvelope};
use curtainworks_inventory::{AdjustOutcome, Reservation};

use crate::notify::publish_adjustments;
use crate::retry::RetryPolicy;
use crate::store::InventoryStore;

pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 15 * 60;

pub struct ReservationManager<S, B> {
    store: S,
    bus: B,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    default_ttl: Duration,
}

impl<S, B> ReservationManager<S, B>
where
    S: InventoryStore,
    B: EventBus<NotificationEnvelope>,
{
    pub fn new(store: S, bus: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            bus,
            clock,
            retry: RetryPolicy::default(),
            default_ttl: Duration::seconds(DEFAULT_RESERVATION_TTL_SECS),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Hold every item or nothing. Repeated entries are merged; the first item
    /// that cannot be covered fails the whole call with `InsufficientStock`.
    #[instrument(skip(self, items), fields(items = items.len()), err)]
    pub fn reserve(
        &self,
        items: &[(LedgerEntryId, Decimal)],
        ttl: Option<Duration>,
    ) -> DomainResult<ReservationToken> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl <= Duration::zero() {
            return Err(DomainError::validation("reservation ttl must be positive"));
        }

        let token = ReservationToken::new();
        let now = self.clock.now();
        let expires_at = now + ttl;
        let holds = self.retry.run("reservations.reserve", || {
            self.store.place_holds(token, items, now, expires_at)
        })?;

        info!(%token, holds = holds.len(), %expires_at, "stock reserved");
        Ok(token)
    }

    /// Turn the token's live holds into ledger debits. Fails with
    /// `ReservationNotFound` once the token is used, released or lapsed.
    #[instrument(skip(self), err)]
    pub fn confirm(&self, token: ReservationToken) -> DomainResult<Vec<AdjustOutcome>> {
        let now = self.clock.now();
        let outcomes = self
            .retry
            .run("reservations.confirm", || self.store.consume_holds(token, now))?;

        info!(%token, entries = outcomes.len(), "reservation confirmed");
        publish_adjustments(&self.bus, &outcomes);
        Ok(outcomes)
    }

    /// Expire the token's active holds. Returns how many were released; 0 on repeat.
    #[instrument(skip(self), err)]
    pub fn release(&self, token: ReservationToken) -> DomainResult<usize> {
        let released = self
            .retry
            .run("reservations.release", || self.store.release_holds(token))?;
        info!(%token, released, "reservation released");
        Ok(released)
    }

    /// Mark every active hold with `expires_at ≤ now` as expired.
    #[instrument(skip(self), err)]
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> DomainResult<usize> {
        let expired = self
            .retry
            .run("reservations.sweep", || self.store.expire_holds(now))?;
        if expired > 0 {
            info!(expired, "expired reservations swept");
        } else {
            debug!("no reservations to sweep");
        }
        Ok(expired)
    }

    pub fn holds(&self, token: ReservationToken) -> DomainResult<Vec<Reservation>> {
        Ok(self
            .retry
            .run("reservations.holds", || self.store.holds(token))?)
    }

    /// On-hand minus holds that count right now.
    pub fn available(&self, entry_id: LedgerEntryId) -> DomainResult<Decimal> {
        let now = self.clock.now();
        Ok(self
            .retry
            .run("reservations.available", || self.store.available(entry_id, now))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use curtainworks_core::{ColorId, ManualClock, ReferenceId};
    use curtainworks_events::InMemoryEventBus;
    use curtainworks_inventory::{LedgerEntry, NewLedgerEntry, ReservationState};

    use crate::store::InMemoryInventoryStore;

    type Bus = Arc<InMemoryEventBus<NotificationEnvelope>>;
    type Manager = ReservationManager<Arc<InMemoryInventoryStore>, Bus>;

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()
    }

    fn setup(quantities: &[i64]) -> (Manager, Arc<InMemoryInventoryStore>, Arc<ManualClock>, Vec<LedgerEntryId>) {
        let store = Arc::new(InMemoryInventoryStore::new());
        let clock = Arc::new(ManualClock::new(test_time()));
        let ids = quantities
            .iter()
            .map(|q| {
                let entry = LedgerEntry::open(
                    LedgerEntryId::new(),
                    NewLedgerEntry {
                        reference_id: ReferenceId::new(),
                        color_id: ColorId::new(),
                        initial_quantity: Decimal::from(*q),
                        minimum_threshold: Decimal::ZERO,
                        location: None,
                    },
                    test_time(),
                )
                .unwrap();
                store.insert_entry(entry).unwrap().id_typed()
            })
            .collect();
        let manager = ReservationManager::new(store.clone(), Arc::new(InMemoryEventBus::new()), clock.clone())
            .with_retry(RetryPolicy::no_retry());
        (manager, store, clock, ids)
    }

    #[test]
    fn reserve_is_all_or_nothing() {
        let (manager, _, _, ids) = setup(&[10, 5]);

        let err = manager
            .reserve(
                &[(ids[0], Decimal::from(4)), (ids[1], Decimal::from(6))],
                None,
            )
            .unwrap_err();
        match err {
            DomainError::InsufficientStock(s) => assert_eq!(s.entry_id, ids[1]),
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(manager.available(ids[0]).unwrap(), Decimal::from(10));
        assert_eq!(manager.available(ids[1]).unwrap(), Decimal::from(5));
    }

    #[test]
    fn first_offending_item_in_request_order_is_reported() {
        let (manager, _, _, ids) = setup(&[1, 1]);
        let err = manager
            .reserve(
                &[(ids[1], Decimal::from(2)), (ids[0], Decimal::from(2))],
                None,
            )
            .unwrap_err();
        match err {
            DomainError::InsufficientStock(s) => assert_eq!(s.entry_id, ids[1]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn request_validation() {
        let (manager, _, _, ids) = setup(&[10]);
        assert!(matches!(
            manager.reserve(&[], None),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            manager.reserve(&[(ids[0], Decimal::ZERO)], None),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            manager.reserve(&[(ids[0], Decimal::ONE)], Some(Duration::zero())),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn repeated_entries_are_merged() {
        let (manager, _, _, ids) = setup(&[10]);
        let token = manager
            .reserve(
                &[(ids[0], Decimal::from(3)), (ids[0], Decimal::from(4))],
                None,
            )
            .unwrap();

        let holds = manager.holds(token).unwrap();
        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].quantity, Decimal::from(7));
        assert_eq!(manager.available(ids[0]).unwrap(), Decimal::from(3));
    }

    #[test]
    fn confirm_twice_debits_once() {
        let (manager, store, _, ids) = setup(&[50]);
        let token = manager.reserve(&[(ids[0], Decimal::from(20))], None).unwrap();

        manager.confirm(token).unwrap();
        assert!(matches!(
            manager.confirm(token),
            Err(DomainError::ReservationNotFound(t)) if t == token
        ));
        assert_eq!(
            store.entry(ids[0]).unwrap().unwrap().quantity_on_hand(),
            Decimal::from(30)
        );
    }

    #[test]
    fn release_is_idempotent_and_frees_stock() {
        let (manager, _, _, ids) = setup(&[10]);
        let token = manager.reserve(&[(ids[0], Decimal::from(8))], None).unwrap();
        assert_eq!(manager.available(ids[0]).unwrap(), Decimal::from(2));

        assert_eq!(manager.release(token).unwrap(), 1);
        assert_eq!(manager.release(token).unwrap(), 0);
        assert_eq!(manager.available(ids[0]).unwrap(), Decimal::from(10));
        assert!(matches!(
            manager.confirm(token),
            Err(DomainError::ReservationNotFound(_))
        ));
    }

    #[test]
    fn lapsed_holds_stop_counting_before_the_sweep() {
        let (manager, _, clock, ids) = setup(&[100]);
        let token = manager
            .reserve(&[(ids[0], Decimal::from(90))], Some(Duration::seconds(1)))
            .unwrap();

        clock.advance(Duration::seconds(1));
        assert_eq!(manager.available(ids[0]).unwrap(), Decimal::from(100));

        assert_eq!(manager.sweep_expired(clock.now()).unwrap(), 1);
        assert_eq!(manager.sweep_expired(clock.now()).unwrap(), 0);
        assert_eq!(manager.holds(token).unwrap()[0].state, ReservationState::Expired);
    }
}
