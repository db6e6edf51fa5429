use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use curtainworks_core::{
    ColorId, DomainError, LedgerEntryId, OrderId, ReferenceId, ReservationToken, Shortfall,
};
use curtainworks_inventory::{
    AdjustOutcome, LedgerEntry, LedgerEntryPatch, Movement, Reservation, ReservationState,
    held_quantity, normalize_request,
};
use curtainworks_orders::CurtainOrder;

use super::r#trait::{InventoryStore, OrderWrite, StoreError};

#[derive(Debug)]
struct LedgerRow {
    entry: LedgerEntry,
    holds: Vec<Reservation>,
    removed: bool,
}

type RowHandle = Arc<Mutex<LedgerRow>>;
type OrderHandle = Arc<Mutex<Option<CurtainOrder>>>;

/// Locked ledger rows, kept in ascending id order.
struct LockedRows<'a> {
    ids: Vec<LedgerEntryId>,
    guards: Vec<MutexGuard<'a, LedgerRow>>,
}

impl LockedRows<'_> {
    fn get_mut(&mut self, id: LedgerEntryId) -> Result<&mut LedgerRow, StoreError> {
        let idx = self
            .ids
            .binary_search(&id)
            .map_err(|_| StoreError::Integrity(format!("ledger entry {id} was not locked")))?;
        Ok(&mut *self.guards[idx])
    }
}

/// How long used or expired holds stay visible after their expiry.
pub const DEFAULT_RESOLVED_RETENTION_SECS: i64 = 60 * 60;

/// In-memory inventory store with one mutex per ledger row and per order.
///
/// Intended for tests/dev. Used and expired holds stay inspectable until
/// `expire_holds` runs past their expiry plus the retention window, which drops
/// them together with their token index.
#[derive(Debug)]
pub struct InMemoryInventoryStore {
    rows: RwLock<HashMap<LedgerEntryId, RowHandle>>,
    pairs: Mutex<HashMap<(ReferenceId, ColorId), LedgerEntryId>>,
    tokens: RwLock<HashMap<ReservationToken, Vec<LedgerEntryId>>>,
    orders: RwLock<HashMap<OrderId, OrderHandle>>,
    resolved_retention: Duration,
}

impl Default for InMemoryInventoryStore {
    fn default() -> Self {
        Self {
            rows: RwLock::default(),
            pairs: Mutex::default(),
            tokens: RwLock::default(),
            orders: RwLock::default(),
            resolved_retention: Duration::seconds(DEFAULT_RESOLVED_RETENTION_SECS),
        }
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Integrity("in-memory store lock poisoned".to_string())
}

fn entry_not_found(id: LedgerEntryId) -> StoreError {
    StoreError::Rejected(DomainError::not_found("ledger entry", id))
}

fn order_not_found(id: OrderId) -> StoreError {
    StoreError::Rejected(DomainError::not_found("order", id))
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolved_retention(mut self, retention: Duration) -> Self {
        self.resolved_retention = retention;
        self
    }

    /// Holds currently stored on one row, resolved ones included.
    pub fn stored_holds(&self, id: LedgerEntryId) -> Result<usize, StoreError> {
        let handle = self.row_handle(id)?;
        let row = handle.lock().map_err(poisoned)?;
        Ok(row.holds.len())
    }

    /// Like `row_handle`, but a missing row is `None`; every other failure
    /// propagates.
    fn existing_row_handle(&self, id: LedgerEntryId) -> Result<Option<RowHandle>, StoreError> {
        match self.row_handle(id) {
            Ok(handle) => Ok(Some(handle)),
            Err(StoreError::Rejected(DomainError::NotFound { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Handles for `ids`, sorted and deduplicated. The map lock is released before
    /// any row is locked.
    fn row_handles(
        &self,
        ids: impl IntoIterator<Item = LedgerEntryId>,
    ) -> Result<(Vec<LedgerEntryId>, Vec<RowHandle>), StoreError> {
        let mut ids: Vec<LedgerEntryId> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();

        let rows = self.rows.read().map_err(poisoned)?;
        let handles = ids
            .iter()
            .map(|id| rows.get(id).cloned().ok_or_else(|| entry_not_found(*id)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((ids, handles))
    }

    fn lock_rows(ids: Vec<LedgerEntryId>, handles: &[RowHandle]) -> Result<LockedRows<'_>, StoreError> {
        let mut guards = Vec::with_capacity(handles.len());
        for (id, handle) in ids.iter().zip(handles) {
            let guard = handle.lock().map_err(poisoned)?;
            if guard.removed {
                return Err(entry_not_found(*id));
            }
            guards.push(guard);
        }
        Ok(LockedRows { ids, guards })
    }

    fn row_handle(&self, id: LedgerEntryId) -> Result<RowHandle, StoreError> {
        let rows = self.rows.read().map_err(poisoned)?;
        rows.get(&id).cloned().ok_or_else(|| entry_not_found(id))
    }

    fn order_handle(&self, id: OrderId) -> Result<OrderHandle, StoreError> {
        let orders = self.orders.read().map_err(poisoned)?;
        orders.get(&id).cloned().ok_or_else(|| order_not_found(id))
    }

    fn token_entries(&self, token: ReservationToken) -> Result<Option<Vec<LedgerEntryId>>, StoreError> {
        let tokens = self.tokens.read().map_err(poisoned)?;
        Ok(tokens.get(&token).cloned())
    }

    /// Net delta per entry, in first-seen order, skipping zero movements.
    fn net_deltas(movements: &[Movement]) -> Vec<(LedgerEntryId, Decimal)> {
        let mut net: Vec<(LedgerEntryId, Decimal)> = Vec::new();
        for m in movements.iter().filter(|m| !m.delta.is_zero()) {
            match net.iter_mut().find(|(id, _)| *id == m.entry_id) {
                Some((_, total)) => *total += m.delta,
                None => net.push((m.entry_id, m.delta)),
            }
        }
        net
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn insert_entry(&self, entry: LedgerEntry) -> Result<LedgerEntry, StoreError> {
        let mut pairs = self.pairs.lock().map_err(poisoned)?;
        if pairs.contains_key(&entry.pair()) {
            return Err(StoreError::Rejected(DomainError::duplicate(format!(
                "ledger entry for reference {} / color {} already exists",
                entry.reference_id(),
                entry.color_id()
            ))));
        }

        let mut rows = self.rows.write().map_err(poisoned)?;
        match rows.entry(entry.id_typed()) {
            Entry::Occupied(_) => {
                return Err(StoreError::Rejected(DomainError::duplicate(format!(
                    "ledger entry {} already exists",
                    entry.id_typed()
                ))));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(LedgerRow {
                    entry: entry.clone(),
                    holds: Vec::new(),
                    removed: false,
                })));
            }
        }
        pairs.insert(entry.pair(), entry.id_typed());
        Ok(entry)
    }

    fn entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        let Some(handle) = self.existing_row_handle(id)? else {
            return Ok(None);
        };
        let row = handle.lock().map_err(poisoned)?;
        Ok((!row.removed).then(|| row.entry.clone()))
    }

    fn entry_by_pair(
        &self,
        reference_id: ReferenceId,
        color_id: ColorId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let id = {
            let pairs = self.pairs.lock().map_err(poisoned)?;
            pairs.get(&(reference_id, color_id)).copied()
        };
        match id {
            Some(id) => self.entry(id),
            None => Ok(None),
        }
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let handles: Vec<RowHandle> = {
            let rows = self.rows.read().map_err(poisoned)?;
            rows.values().cloned().collect()
        };
        let mut entries = Vec::with_capacity(handles.len());
        for handle in handles {
            let row = handle.lock().map_err(poisoned)?;
            if !row.removed {
                entries.push(row.entry.clone());
            }
        }
        entries.sort_by_key(|e| e.id_typed());
        Ok(entries)
    }

    fn update_entry(
        &self,
        id: LedgerEntryId,
        patch: &LedgerEntryPatch,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        let handle = self.row_handle(id)?;
        let mut row = handle.lock().map_err(poisoned)?;
        if row.removed {
            return Err(entry_not_found(id));
        }
        let mut staged = row.entry.clone();
        staged.update(patch, now)?;
        row.entry = staged.clone();
        Ok(staged)
    }

    fn remove_entry(&self, id: LedgerEntryId) -> Result<LedgerEntry, StoreError> {
        let mut pairs = self.pairs.lock().map_err(poisoned)?;
        let handle = self.row_handle(id)?;
        let mut row = handle.lock().map_err(poisoned)?;
        if row.removed {
            return Err(entry_not_found(id));
        }
        row.entry.ensure_removable()?;

        row.removed = true;
        pairs.remove(&row.entry.pair());
        self.rows.write().map_err(poisoned)?.remove(&id);
        Ok(row.entry.clone())
    }

    fn adjust(&self, movement: &Movement, now: DateTime<Utc>) -> Result<AdjustOutcome, StoreError> {
        let handle = self.row_handle(movement.entry_id)?;
        let mut row = handle.lock().map_err(poisoned)?;
        if row.removed {
            return Err(entry_not_found(movement.entry_id));
        }

        let held = held_quantity(&row.holds, now);
        if let Some(shortfall) = row.entry.shortfall_for(movement.delta, held) {
            return Err(DomainError::InsufficientStock(shortfall).into());
        }

        let mut staged = row.entry.clone();
        let outcome = staged.apply(movement.delta, movement.kind, now)?;
        row.entry = staged;
        Ok(outcome)
    }

    fn available(&self, id: LedgerEntryId, now: DateTime<Utc>) -> Result<Decimal, StoreError> {
        let handle = self.row_handle(id)?;
        let row = handle.lock().map_err(poisoned)?;
        if row.removed {
            return Err(entry_not_found(id));
        }
        Ok(curtainworks_inventory::available(
            row.entry.quantity_on_hand(),
            &row.holds,
            now,
        ))
    }

    fn place_holds(
        &self,
        token: ReservationToken,
        items: &[(LedgerEntryId, Decimal)],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let items = normalize_request(items)?;
        let (ids, handles) = self.row_handles(items.iter().map(|(id, _)| *id))?;
        let mut rows = Self::lock_rows(ids.clone(), &handles)?;

        for &(entry_id, quantity) in &items {
            let row = rows.get_mut(entry_id)?;
            let held = held_quantity(&row.holds, now);
            if let Some(shortfall) = row.entry.shortfall_for(-quantity, held) {
                return Err(DomainError::InsufficientStock(shortfall).into());
            }
        }

        let mut placed = Vec::with_capacity(items.len());
        for &(entry_id, quantity) in &items {
            let hold = Reservation::new(token, entry_id, quantity, now, expires_at);
            rows.get_mut(entry_id)?.holds.push(hold.clone());
            placed.push(hold);
        }

        self.tokens.write().map_err(poisoned)?.insert(token, ids);
        Ok(placed)
    }

    fn consume_holds(
        &self,
        token: ReservationToken,
        now: DateTime<Utc>,
    ) -> Result<Vec<AdjustOutcome>, StoreError> {
        let not_found = || StoreError::Rejected(DomainError::ReservationNotFound(token));
        let ids = self.token_entries(token)?.ok_or_else(not_found)?;
        let (ids, handles) = self.row_handles(ids)?;
        let mut rows = Self::lock_rows(ids.clone(), &handles)?;

        let mut staged: Vec<(LedgerEntryId, AdjustOutcome)> = Vec::new();
        for &entry_id in &ids {
            let row = rows.get_mut(entry_id)?;
            for hold in row.holds.iter_mut().filter(|h| h.token == token) {
                if hold.is_lapsed(now) {
                    hold.expire();
                }
            }

            let mine: Decimal = row
                .holds
                .iter()
                .filter(|h| h.token == token && h.is_holding(now))
                .map(|h| h.quantity)
                .sum();
            if mine.is_zero() {
                continue;
            }

            let others = held_quantity(row.holds.iter().filter(|h| h.token != token), now);
            if let Some(shortfall) = row.entry.shortfall_for(-mine, others) {
                return Err(DomainError::InsufficientStock(shortfall).into());
            }
            let mut entry = row.entry.clone();
            let outcome = entry.apply(
                -mine,
                curtainworks_inventory::MovementKind::ReservationConfirmed,
                now,
            )?;
            staged.push((entry_id, outcome));
        }

        if staged.is_empty() {
            return Err(not_found());
        }

        let mut outcomes = Vec::with_capacity(staged.len());
        for (entry_id, outcome) in staged {
            let row = rows.get_mut(entry_id)?;
            for hold in row
                .holds
                .iter_mut()
                .filter(|h| h.token == token && h.is_holding(now))
            {
                hold.mark_used(now)?;
            }
            row.entry = outcome.entry.clone();
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn release_holds(&self, token: ReservationToken) -> Result<usize, StoreError> {
        let Some(ids) = self.token_entries(token)? else {
            return Ok(0);
        };
        let mut released = 0;
        for id in ids {
            let Some(handle) = self.existing_row_handle(id)? else {
                continue;
            };
            let mut row = handle.lock().map_err(poisoned)?;
            released += row
                .holds
                .iter_mut()
                .filter(|h| h.token == token)
                .map(|h| h.expire())
                .filter(|changed| *changed)
                .count();
        }
        Ok(released)
    }

    fn expire_holds(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let handles: Vec<RowHandle> = {
            let rows = self.rows.read().map_err(poisoned)?;
            rows.values().cloned().collect()
        };

        let mut expired = 0;
        let mut dropped: Vec<(ReservationToken, LedgerEntryId)> = Vec::new();
        for handle in handles {
            let mut row = handle.lock().map_err(poisoned)?;
            for hold in row.holds.iter_mut().filter(|h| h.is_lapsed(now)) {
                if hold.expire() {
                    expired += 1;
                }
            }

            let cutoff = now - self.resolved_retention;
            row.holds.retain(|h| {
                let stale = h.state != ReservationState::Active && h.expires_at <= cutoff;
                if stale {
                    dropped.push((h.token, h.entry_id));
                }
                !stale
            });
        }

        if !dropped.is_empty() {
            let mut tokens = self.tokens.write().map_err(poisoned)?;
            for (token, entry_id) in dropped {
                if let Entry::Occupied(mut slot) = tokens.entry(token) {
                    slot.get_mut().retain(|id| *id != entry_id);
                    if slot.get().is_empty() {
                        slot.remove();
                    }
                }
            }
        }
        Ok(expired)
    }

    fn holds(&self, token: ReservationToken) -> Result<Vec<Reservation>, StoreError> {
        let Some(ids) = self.token_entries(token)? else {
            return Ok(Vec::new());
        };
        let mut holds = Vec::new();
        for id in ids {
            let Some(handle) = self.existing_row_handle(id)? else {
                continue;
            };
            let row = handle.lock().map_err(poisoned)?;
            holds.extend(row.holds.iter().filter(|h| h.token == token).cloned());
        }
        Ok(holds)
    }

    fn order(&self, id: OrderId) -> Result<Option<CurtainOrder>, StoreError> {
        let handle = match self.order_handle(id) {
            Ok(handle) => handle,
            Err(StoreError::Rejected(DomainError::NotFound { .. })) => return Ok(None),
            Err(e) => return Err(e),
        };
        let slot = handle.lock().map_err(poisoned)?;
        Ok(slot.clone())
    }

    fn orders(&self) -> Result<Vec<CurtainOrder>, StoreError> {
        let handles: Vec<OrderHandle> = {
            let orders = self.orders.read().map_err(poisoned)?;
            orders.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(order) = handle.lock().map_err(poisoned)?.as_ref() {
                out.push(order.clone());
            }
        }
        out.sort_by_key(|o| o.id_typed());
        Ok(out)
    }

    fn commit_order(
        &self,
        write: OrderWrite,
        movements: &[Movement],
        now: DateTime<Utc>,
    ) -> Result<Vec<AdjustOutcome>, StoreError> {
        // Order lock first, then ledger rows.
        let order_handle = match &write {
            OrderWrite::Insert(_) => None,
            OrderWrite::Update { order, .. } => Some(self.order_handle(order.id_typed())?),
            OrderWrite::Delete { order_id, .. } => Some(self.order_handle(*order_id)?),
        };
        let mut order_slot = match &order_handle {
            Some(handle) => Some(handle.lock().map_err(poisoned)?),
            None => None,
        };

        let expected = match &write {
            OrderWrite::Update { expected, .. } | OrderWrite::Delete { expected, .. } => Some(*expected),
            OrderWrite::Insert(_) => None,
        };
        if let (Some(slot), Some(expected)) = (order_slot.as_deref(), expected) {
            let current = slot.as_ref().ok_or_else(|| order_not_found(write.order_id()))?;
            expected
                .check(curtainworks_core::AggregateRoot::version(current))
                .map_err(|e| StoreError::Concurrency(e.to_string()))?;
        }

        let net = Self::net_deltas(movements);
        let (ids, handles) = self.row_handles(net.iter().map(|(id, _)| *id))?;
        let mut rows = Self::lock_rows(ids, &handles)?;

        let mut shortfalls: Vec<Shortfall> = Vec::new();
        for &(entry_id, delta) in &net {
            let row = rows.get_mut(entry_id)?;
            let held = held_quantity(&row.holds, now);
            if let Some(shortfall) = row.entry.shortfall_for(delta, held) {
                shortfalls.push(shortfall);
            }
        }
        if !shortfalls.is_empty() {
            return Err(DomainError::InsufficientMaterials(shortfalls).into());
        }

        let mut staged: HashMap<LedgerEntryId, LedgerEntry> = HashMap::new();
        let mut outcomes = Vec::with_capacity(movements.len());
        for m in movements.iter().filter(|m| !m.delta.is_zero()) {
            let entry = match staged.entry(m.entry_id) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => slot.insert(rows.get_mut(m.entry_id)?.entry.clone()),
            };
            outcomes.push(entry.apply(m.delta, m.kind, now)?);
        }

        match write {
            OrderWrite::Insert(order) => {
                let mut orders = self.orders.write().map_err(poisoned)?;
                match orders.entry(order.id_typed()) {
                    Entry::Occupied(_) => {
                        return Err(StoreError::Rejected(DomainError::duplicate(format!(
                            "order {} already exists",
                            order.id_typed()
                        ))));
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(Arc::new(Mutex::new(Some(order))));
                    }
                }
            }
            OrderWrite::Update { order, .. } => {
                if let Some(slot) = order_slot.as_deref_mut() {
                    *slot = Some(order);
                }
            }
            OrderWrite::Delete { order_id, .. } => {
                if let Some(slot) = order_slot.as_deref_mut() {
                    *slot = None;
                }
                self.orders.write().map_err(poisoned)?.remove(&order_id);
            }
        }

        for (entry_id, entry) in staged {
            rows.get_mut(entry_id)?.entry = entry;
        }
        Ok(outcomes)
    }
}
