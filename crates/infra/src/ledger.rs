//! StockLedger service: ledger entry lifecycle, stock movements and alerts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument};

use curtainworks_core::{
    Clock, ColorId, DomainError, DomainResult, LedgerEntryId, ReferenceId,
};
use curtainworks_events::{EventBus, NotificationEnvelope};
use curtainworks_inventory::{
    AdjustOutcome, AlertPolicy, LedgerEntry, LedgerEntryCreated, LedgerEntryPatch, LedgerFilter,
    Movement, MovementKind, NewLedgerEntry, StockAlert, evaluate_alerts,
};

use crate::notify::{publish, publish_adjustments};
use crate::retry::RetryPolicy;
use crate::store::InventoryStore;

pub struct StockLedger<S, B> {
    store: S,
    bus: B,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    alerts: AlertPolicy,
}

impl<S, B> StockLedger<S, B>
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
            alerts: AlertPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_alert_policy(mut self, alerts: AlertPolicy) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn get(&self, entry_id: LedgerEntryId) -> DomainResult<LedgerEntry> {
        self.retry
            .run("ledger.get", || self.store.entry(entry_id))?
            .ok_or_else(|| DomainError::not_found("ledger entry", entry_id))
    }

    pub fn get_by_pair(
        &self,
        reference_id: ReferenceId,
        color_id: ColorId,
    ) -> DomainResult<LedgerEntry> {
        self.retry
            .run("ledger.get_by_pair", || {
                self.store.entry_by_pair(reference_id, color_id)
            })?
            .ok_or_else(|| {
                DomainError::not_found("ledger entry", format!("{reference_id}/{color_id}"))
            })
    }

    pub fn list(&self) -> DomainResult<Vec<LedgerEntry>> {
        Ok(self.retry.run("ledger.list", || self.store.entries())?)
    }

    pub fn list_filtered(&self, filter: LedgerFilter) -> DomainResult<Vec<LedgerEntry>> {
        let mut entries = self.list()?;
        entries.retain(|entry| filter.matches(entry));
        Ok(entries)
    }

    /// Open a ledger entry for a (reference, color) pair.
    #[instrument(
        skip(self, new),
        fields(reference_id = %new.reference_id, color_id = %new.color_id),
        err
    )]
    pub fn create(&self, new: NewLedgerEntry) -> DomainResult<LedgerEntry> {
        let entry = LedgerEntry::open(LedgerEntryId::new(), new, self.clock.now())?;
        let entry = self
            .retry
            .run("ledger.create", || self.store.insert_entry(entry.clone()))?;

        info!(entry_id = %entry.id_typed(), quantity = %entry.quantity_on_hand(), "ledger entry created");
        publish(&self.bus, &LedgerEntryCreated::from_entry(&entry));
        Ok(entry)
    }

    /// Apply a signed movement. Debits must fit within on-hand minus active holds;
    /// on refusal the entry is unchanged.
    #[instrument(skip(self), err)]
    pub fn adjust(
        &self,
        entry_id: LedgerEntryId,
        delta: Decimal,
        kind: MovementKind,
    ) -> DomainResult<AdjustOutcome> {
        if delta.is_zero() {
            return Err(DomainError::validation("delta cannot be zero"));
        }
        let movement = Movement::new(entry_id, delta, kind);
        let now = self.clock.now();
        let outcome = self
            .retry
            .run("ledger.adjust", || self.store.adjust(&movement, now))?;

        info!(
            %entry_id,
            quantity = %outcome.entry.quantity_on_hand(),
            below_minimum = outcome.below_minimum(),
            "stock adjusted"
        );
        publish_adjustments(&self.bus, std::slice::from_ref(&outcome));
        Ok(outcome)
    }

    /// Edit minimum threshold and/or location. Quantity is untouched.
    #[instrument(skip(self, patch), err)]
    pub fn update_metadata(
        &self,
        entry_id: LedgerEntryId,
        patch: LedgerEntryPatch,
    ) -> DomainResult<LedgerEntry> {
        let now = self.clock.now();
        Ok(self.retry.run("ledger.update_metadata", || {
            self.store.update_entry(entry_id, &patch, now)
        })?)
    }

    /// Remove an empty entry.
    #[instrument(skip(self), err)]
    pub fn delete(&self, entry_id: LedgerEntryId) -> DomainResult<LedgerEntry> {
        let removed = self
            .retry
            .run("ledger.delete", || self.store.remove_entry(entry_id))?;
        info!(%entry_id, "ledger entry removed");
        Ok(removed)
    }

    pub fn list_alerts(&self, now: DateTime<Utc>) -> DomainResult<Vec<StockAlert>> {
        let entries = self.list()?;
        Ok(evaluate_alerts(&entries, now, &self.alerts))
    }
}
