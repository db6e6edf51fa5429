//! Postgres-backed inventory store.
//!
//! Ledger entries, reservations and orders live in the tables created by
//! `migrations/0001_inventory.sql`. Every port operation runs in one transaction;
//! ledger rows are locked with `SELECT … FOR UPDATE ORDER BY id` before holds are
//! summed, so the admission rule is evaluated against committed state.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Rejected(DuplicateEntry)` |
//! | Database (foreign key / check violation) | `23503` / `23514` | `Integrity` |
//! | Database (serialization failure / deadlock) | `40001` / `40P01` | `Concurrency` |
//! | Database (other) | Any other | `Integrity` |
//! | PoolTimedOut / PoolClosed / Io | N/A | `Unavailable` |
//! | Other | N/A | `Integrity` |
//!
//! ## Runtime
//!
//! The `InventoryStore` port is synchronous. Calls are bridged with
//! `tokio::task::block_in_place`, which requires a multi-threaded tokio runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use curtainworks_core::{
    AggregateRoot, ColorId, DomainError, ExpectedVersion, LedgerEntryId, OrderId, ReferenceId,
    ReservationToken, Shortfall,
};
use curtainworks_inventory::{
    AdjustOutcome, LedgerEntry, LedgerEntryParts, LedgerEntryPatch, Movement, MovementKind,
    Reservation, ReservationState, normalize_request,
};
use curtainworks_orders::{CurtainDimensions, CostBreakdown, CurtainOrder, CurtainOrderParts};

use super::r#trait::{InventoryStore, OrderWrite, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_inventory.sql");

/// Postgres implementation of [`InventoryStore`].
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create every table and index if missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.id_typed()), err)]
    pub async fn insert_entry(&self, entry: LedgerEntry) -> Result<LedgerEntry, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock_ledger (
                id, reference_id, color_id, quantity_on_hand, minimum_threshold, location,
                last_in, last_out, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id_typed().as_uuid())
        .bind(entry.reference_id().as_uuid())
        .bind(entry.color_id().as_uuid())
        .bind(entry.quantity_on_hand())
        .bind(entry.minimum_threshold())
        .bind(entry.location())
        .bind(entry.last_in())
        .bind(entry.last_out())
        .bind(entry.created_at())
        .bind(entry.updated_at())
        .bind(entry.version() as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Rejected(DomainError::duplicate(format!(
                    "ledger entry for reference {} / color {} already exists",
                    entry.reference_id(),
                    entry.color_id()
                )))
            } else {
                map_sqlx_error("insert_entry", e)
            }
        })?;
        Ok(entry)
    }

    #[instrument(skip(self), err)]
    pub async fn entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, reference_id, color_id, quantity_on_hand, minimum_threshold, location,
                   last_in, last_out, created_at, updated_at, version
            FROM stock_ledger
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("entry", e))?;

        row.map(|r| decode::<LedgerEntryRow>(&r).map(LedgerEntry::from))
            .transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn entry_by_pair(
        &self,
        reference_id: ReferenceId,
        color_id: ColorId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, reference_id, color_id, quantity_on_hand, minimum_threshold, location,
                   last_in, last_out, created_at, updated_at, version
            FROM stock_ledger
            WHERE reference_id = $1 AND color_id = $2
            "#,
        )
        .bind(reference_id.as_uuid())
        .bind(color_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("entry_by_pair", e))?;

        row.map(|r| decode::<LedgerEntryRow>(&r).map(LedgerEntry::from))
            .transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, reference_id, color_id, quantity_on_hand, minimum_threshold, location,
                   last_in, last_out, created_at, updated_at, version
            FROM stock_ledger
            ORDER BY id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("entries", e))?;

        rows.iter()
            .map(|r| decode::<LedgerEntryRow>(r).map(LedgerEntry::from))
            .collect()
    }

    #[instrument(skip(self, patch), err)]
    pub async fn update_entry(
        &self,
        id: LedgerEntryId,
        patch: &LedgerEntryPatch,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        let mut tx = self.begin().await?;
        let mut entry = lock_entry(&mut tx, id).await?;
        entry.update(patch, now)?;
        write_entry(&mut tx, &entry).await?;
        commit(tx).await?;
        Ok(entry)
    }

    #[instrument(skip(self), err)]
    pub async fn remove_entry(&self, id: LedgerEntryId) -> Result<LedgerEntry, StoreError> {
        let mut tx = self.begin().await?;
        let entry = lock_entry(&mut tx, id).await?;
        entry.ensure_removable()?;

        sqlx::query("DELETE FROM stock_ledger WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("remove_entry", e))?;
        commit(tx).await?;
        Ok(entry)
    }

    #[instrument(
        skip(self, movement),
        fields(entry_id = %movement.entry_id, delta = %movement.delta, kind = movement.kind.as_str()),
        err
    )]
    pub async fn adjust(
        &self,
        movement: &Movement,
        now: DateTime<Utc>,
    ) -> Result<AdjustOutcome, StoreError> {
        if movement.delta.is_zero() {
            return Err(DomainError::validation("delta cannot be zero").into());
        }

        let mut tx = self.begin().await?;
        let mut entry = lock_entry(&mut tx, movement.entry_id).await?;
        let held = held_by_entry(&mut tx, &[movement.entry_id], now, None)
            .await?
            .remove(&movement.entry_id)
            .unwrap_or_default();
        if let Some(shortfall) = entry.shortfall_for(movement.delta, held) {
            return Err(DomainError::InsufficientStock(shortfall).into());
        }

        let outcome = entry.apply(movement.delta, movement.kind, now)?;
        write_entry(&mut tx, &outcome.entry).await?;
        commit(tx).await?;
        Ok(outcome)
    }

    #[instrument(skip(self), err)]
    pub async fn available(
        &self,
        id: LedgerEntryId,
        now: DateTime<Utc>,
    ) -> Result<Decimal, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT l.quantity_on_hand - COALESCE((
                SELECT SUM(r.quantity)
                FROM reservations r
                WHERE r.ledger_entry_id = l.id AND r.state = 'active' AND r.expires_at > $2
            ), 0) AS available
            FROM stock_ledger l
            WHERE l.id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("available", e))?
        .ok_or_else(|| StoreError::Rejected(DomainError::not_found("ledger entry", id)))?;

        row.try_get("available")
            .map_err(|e| StoreError::Integrity(format!("failed to read available: {e}")))
    }

    #[instrument(skip(self, items), fields(token = %token, items = items.len()), err)]
    pub async fn place_holds(
        &self,
        token: ReservationToken,
        items: &[(LedgerEntryId, Decimal)],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let items = normalize_request(items)?;
        let ids: Vec<LedgerEntryId> = items.iter().map(|(id, _)| *id).collect();

        let mut tx = self.begin().await?;
        let entries = lock_entries(&mut tx, &ids).await?;
        let held = held_by_entry(&mut tx, &ids, now, None).await?;

        for &(entry_id, quantity) in &items {
            let entry = locked(&entries, entry_id)?;
            let held = held.get(&entry_id).copied().unwrap_or_default();
            if let Some(shortfall) = entry.shortfall_for(-quantity, held) {
                return Err(DomainError::InsufficientStock(shortfall).into());
            }
        }

        let mut placed = Vec::with_capacity(items.len());
        for &(entry_id, quantity) in &items {
            let hold = Reservation::new(token, entry_id, quantity, now, expires_at);
            sqlx::query(
                r#"
                INSERT INTO reservations (token, ledger_entry_id, quantity, state, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(token.as_uuid())
            .bind(entry_id.as_uuid())
            .bind(quantity)
            .bind(hold.state.as_str())
            .bind(now)
            .bind(expires_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_reservation", e))?;
            placed.push(hold);
        }

        commit(tx).await?;
        Ok(placed)
    }

    #[instrument(skip(self), fields(token = %token), err)]
    pub async fn consume_holds(
        &self,
        token: ReservationToken,
        now: DateTime<Utc>,
    ) -> Result<Vec<AdjustOutcome>, StoreError> {
        let not_found = || StoreError::Rejected(DomainError::ReservationNotFound(token));
        let mut tx = self.begin().await?;

        let ids: Vec<LedgerEntryId> = sqlx::query(
            "SELECT ledger_entry_id FROM reservations WHERE token = $1 ORDER BY ledger_entry_id",
        )
        .bind(token.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("token_entries", e))?
        .iter()
        .map(|r| r.try_get::<Uuid, _>("ledger_entry_id").map(LedgerEntryId::from_uuid))
        .collect::<Result<_, _>>()
        .map_err(|e| StoreError::Integrity(format!("failed to read reservation row: {e}")))?;
        if ids.is_empty() {
            return Err(not_found());
        }

        let mut entries = lock_entries(&mut tx, &ids).await?;

        // Release and sweep only touch reservation rows, so those are locked too
        // before the live set is read.
        sqlx::query(LOCK_TOKEN_HOLDS)
            .bind(token.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_token_holds", e))?;

        sqlx::query(
            r#"
            UPDATE reservations SET state = 'expired'
            WHERE token = $1 AND state = 'active' AND expires_at <= $2
            "#,
        )
        .bind(token.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("expire_lapsed", e))?;

        let live = load_holds(&mut tx, token, Some(now)).await?;
        if live.is_empty() {
            commit(tx).await?;
            return Err(not_found());
        }

        let others = held_by_entry(&mut tx, &ids, now, Some(token)).await?;
        let mut outcomes = Vec::with_capacity(live.len());
        for hold in &live {
            let entry = entries
                .get_mut(&hold.entry_id)
                .ok_or_else(|| StoreError::Integrity(format!("ledger entry {} was not locked", hold.entry_id)))?;
            let held = others.get(&hold.entry_id).copied().unwrap_or_default();
            if let Some(shortfall) = entry.shortfall_for(-hold.quantity, held) {
                return Err(DomainError::InsufficientStock(shortfall).into());
            }
            let outcome = entry.apply(-hold.quantity, MovementKind::ReservationConfirmed, now)?;
            write_entry(&mut tx, &outcome.entry).await?;
            outcomes.push(outcome);
        }

        let marked = sqlx::query(
            r#"
            UPDATE reservations SET state = 'used'
            WHERE token = $1 AND state = 'active' AND expires_at > $2
            "#,
        )
        .bind(token.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("mark_used", e))?;
        ensure_all_marked(token, live.len(), marked.rows_affected())?;

        commit(tx).await?;
        Ok(outcomes)
    }

    #[instrument(skip(self), fields(token = %token), err)]
    pub async fn release_holds(&self, token: ReservationToken) -> Result<usize, StoreError> {
        let result = sqlx::query(
            "UPDATE reservations SET state = 'expired' WHERE token = $1 AND state = 'active'",
        )
        .bind(token.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_holds", e))?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self), err)]
    pub async fn expire_holds(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query(
            "UPDATE reservations SET state = 'expired' WHERE state = 'active' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("expire_holds", e))?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self), fields(token = %token), err)]
    pub async fn holds(&self, token: ReservationToken) -> Result<Vec<Reservation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT token, ledger_entry_id, quantity, state, created_at, expires_at
            FROM reservations
            WHERE token = $1
            ORDER BY ledger_entry_id
            "#,
        )
        .bind(token.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("holds", e))?;

        rows.iter()
            .map(|r| decode::<ReservationRow>(r).and_then(Reservation::try_from))
            .collect()
    }

    #[instrument(skip(self), err)]
    pub async fn order(&self, id: OrderId) -> Result<Option<CurtainOrder>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, design_id, width_cm, height_cm, multiplier, split, status, notes,
                   selections, allocation, materials_cost, labor_cost, total_cost,
                   created_at, updated_at, version
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("order", e))?;

        row.map(|r| decode::<OrderRow>(&r).and_then(CurtainOrder::try_from))
            .transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn orders(&self) -> Result<Vec<CurtainOrder>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, design_id, width_cm, height_cm, multiplier, split, status, notes,
                   selections, allocation, materials_cost, labor_cost, total_cost,
                   created_at, updated_at, version
            FROM orders
            ORDER BY id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("orders", e))?;

        rows.iter()
            .map(|r| decode::<OrderRow>(r).and_then(CurtainOrder::try_from))
            .collect()
    }

    /// Order write plus ledger movements in one transaction.
    ///
    /// 1. Lock the order row and check its version (update/delete)
    /// 2. Lock every touched ledger row in id order
    /// 3. Check each net debit against on-hand minus holds, collecting shortfalls
    /// 4. Apply movements, write ledger rows, write the order
    #[instrument(
        skip(self, write, movements),
        fields(order_id = %write.order_id(), movements = movements.len()),
        err
    )]
    pub async fn commit_order(
        &self,
        write: OrderWrite,
        movements: &[Movement],
        now: DateTime<Utc>,
    ) -> Result<Vec<AdjustOutcome>, StoreError> {
        let mut tx = self.begin().await?;

        match &write {
            OrderWrite::Insert(_) => {}
            OrderWrite::Update { expected, .. } | OrderWrite::Delete { expected, .. } => {
                let order_id = write.order_id();
                let current = lock_order_version(&mut tx, order_id).await?;
                check_version(*expected, current)?;
            }
        }

        let net = net_deltas(movements);
        let ids: Vec<LedgerEntryId> = net.iter().map(|(id, _)| *id).collect();
        let mut entries = lock_entries(&mut tx, &ids).await?;
        let held = held_by_entry(&mut tx, &ids, now, None).await?;

        let mut shortfalls: Vec<Shortfall> = Vec::new();
        for &(entry_id, delta) in &net {
            let entry = locked(&entries, entry_id)?;
            let held = held.get(&entry_id).copied().unwrap_or_default();
            if let Some(shortfall) = entry.shortfall_for(delta, held) {
                shortfalls.push(shortfall);
            }
        }
        if !shortfalls.is_empty() {
            return Err(DomainError::InsufficientMaterials(shortfalls).into());
        }

        let mut outcomes = Vec::with_capacity(movements.len());
        for m in movements.iter().filter(|m| !m.delta.is_zero()) {
            let entry = entries
                .get_mut(&m.entry_id)
                .ok_or_else(|| StoreError::Integrity(format!("ledger entry {} was not locked", m.entry_id)))?;
            outcomes.push(entry.apply(m.delta, m.kind, now)?);
        }
        for entry in entries.values() {
            write_entry(&mut tx, entry).await?;
        }

        match write {
            OrderWrite::Insert(order) => insert_order(&mut tx, &order).await?,
            OrderWrite::Update { order, .. } => update_order(&mut tx, &order).await?,
            OrderWrite::Delete { order_id, .. } => {
                sqlx::query("DELETE FROM orders WHERE id = $1")
                    .bind(order_id.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("delete_order", e))?;
            }
        }

        commit(tx).await?;
        Ok(outcomes)
    }
}

/// Run an async store call from the synchronous port.
pub(crate) fn run_blocking<F, T>(fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let handle = tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::Unavailable(
            "Postgres adapters require a multi-threaded tokio runtime".to_string(),
        )
    })?;
    tokio::task::block_in_place(|| handle.block_on(fut))
}

async fn commit(tx: Transaction<'_, Postgres>) -> Result<(), StoreError> {
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}

fn decode<'r, T>(row: &'r PgRow) -> Result<T, StoreError>
where
    T: FromRow<'r, PgRow>,
{
    T::from_row(row).map_err(|e| StoreError::Integrity(format!("failed to decode row: {e}")))
}

fn locked(
    entries: &HashMap<LedgerEntryId, LedgerEntry>,
    id: LedgerEntryId,
) -> Result<&LedgerEntry, StoreError> {
    entries
        .get(&id)
        .ok_or_else(|| StoreError::Integrity(format!("ledger entry {id} was not locked")))
}

fn check_version(expected: ExpectedVersion, current: u64) -> Result<(), StoreError> {
    expected
        .check(current)
        .map_err(|e| StoreError::Concurrency(e.to_string()))
}

/// Net delta per entry in first-seen order, zero movements skipped.
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

async fn lock_entry(
    tx: &mut Transaction<'_, Postgres>,
    id: LedgerEntryId,
) -> Result<LedgerEntry, StoreError> {
    lock_entries(tx, &[id])
        .await?
        .remove(&id)
        .ok_or_else(|| StoreError::Rejected(DomainError::not_found("ledger entry", id)))
}

/// `FOR UPDATE` every entry in `ids`, in id order. Fails with `NotFound` for the
/// first id without a row.
async fn lock_entries(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[LedgerEntryId],
) -> Result<HashMap<LedgerEntryId, LedgerEntry>, StoreError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
    let rows = sqlx::query(
        r#"
        SELECT id, reference_id, color_id, quantity_on_hand, minimum_threshold, location,
               last_in, last_out, created_at, updated_at, version
        FROM stock_ledger
        WHERE id = ANY($1)
        ORDER BY id
        FOR UPDATE
        "#,
    )
    .bind(&uuids)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_entries", e))?;

    let mut entries = HashMap::with_capacity(rows.len());
    for row in &rows {
        let entry = LedgerEntry::from(decode::<LedgerEntryRow>(row)?);
        entries.insert(entry.id_typed(), entry);
    }
    if let Some(missing) = ids.iter().find(|id| !entries.contains_key(id)) {
        return Err(StoreError::Rejected(DomainError::not_found(
            "ledger entry",
            missing,
        )));
    }
    Ok(entries)
}

/// Σ holding quantity per entry, optionally leaving out one token's holds.
async fn held_by_entry(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[LedgerEntryId],
    now: DateTime<Utc>,
    except: Option<ReservationToken>,
) -> Result<HashMap<LedgerEntryId, Decimal>, StoreError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
    let rows = sqlx::query(
        r#"
        SELECT ledger_entry_id, SUM(quantity) AS held
        FROM reservations
        WHERE ledger_entry_id = ANY($1)
            AND state = 'active'
            AND expires_at > $2
            AND ($3::uuid IS NULL OR token <> $3)
        GROUP BY ledger_entry_id
        "#,
    )
    .bind(&uuids)
    .bind(now)
    .bind(except.map(|t| *t.as_uuid()))
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("held_by_entry", e))?;

    rows.iter()
        .map(|row| {
            let id: Uuid = row.try_get("ledger_entry_id")?;
            let held: Decimal = row.try_get("held")?;
            Ok((LedgerEntryId::from_uuid(id), held))
        })
        .collect::<Result<_, sqlx::Error>>()
        .map_err(|e| StoreError::Integrity(format!("failed to read held quantity: {e}")))
}

/// Holds of `token`; with `holding_at`, only those still counting at that time.
const LOCK_TOKEN_HOLDS: &str =
    "SELECT ledger_entry_id FROM reservations WHERE token = $1 ORDER BY ledger_entry_id FOR UPDATE";

/// Every debited hold must flip to `used`; anything less means another writer
/// resolved one of them and the transaction has to roll back.
fn ensure_all_marked(
    token: ReservationToken,
    debited: usize,
    marked: u64,
) -> Result<(), StoreError> {
    if marked == debited as u64 {
        Ok(())
    } else {
        Err(StoreError::Concurrency(format!(
            "reservation {token}: debited {debited} holds but marked {marked} as used"
        )))
    }
}

async fn load_holds(
    tx: &mut Transaction<'_, Postgres>,
    token: ReservationToken,
    holding_at: Option<DateTime<Utc>>,
) -> Result<Vec<Reservation>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT token, ledger_entry_id, quantity, state, created_at, expires_at
        FROM reservations
        WHERE token = $1
            AND ($2::timestamptz IS NULL OR (state = 'active' AND expires_at > $2))
        ORDER BY ledger_entry_id
        "#,
    )
    .bind(token.as_uuid())
    .bind(holding_at)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("load_holds", e))?;

    rows.iter()
        .map(|r| decode::<ReservationRow>(r).and_then(Reservation::try_from))
        .collect()
}

async fn write_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry: &LedgerEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE stock_ledger
        SET quantity_on_hand = $2,
            minimum_threshold = $3,
            location = $4,
            last_in = $5,
            last_out = $6,
            updated_at = $7,
            version = $8
        WHERE id = $1
        "#,
    )
    .bind(entry.id_typed().as_uuid())
    .bind(entry.quantity_on_hand())
    .bind(entry.minimum_threshold())
    .bind(entry.location())
    .bind(entry.last_in())
    .bind(entry.last_out())
    .bind(entry.updated_at())
    .bind(entry.version() as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_entry", e))?;
    Ok(())
}

async fn lock_order_version(
    tx: &mut Transaction<'_, Postgres>,
    id: OrderId,
) -> Result<u64, StoreError> {
    let row = sqlx::query("SELECT version FROM orders WHERE id = $1 FOR UPDATE")
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_order", e))?
        .ok_or_else(|| StoreError::Rejected(DomainError::not_found("order", id)))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| StoreError::Integrity(format!("failed to read order version: {e}")))?;
    Ok(version as u64)
}

fn order_json(order: &CurtainOrder) -> Result<(serde_json::Value, serde_json::Value), StoreError> {
    let encode = |e: serde_json::Error| StoreError::Integrity(format!("failed to encode order: {e}"));
    Ok((
        serde_json::to_value(order.selections()).map_err(encode)?,
        serde_json::to_value(order.allocation()).map_err(encode)?,
    ))
}

async fn insert_order(
    tx: &mut Transaction<'_, Postgres>,
    order: &CurtainOrder,
) -> Result<(), StoreError> {
    let (selections, allocation) = order_json(order)?;
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, design_id, width_cm, height_cm, multiplier, split, status, notes,
            selections, allocation, materials_cost, labor_cost, total_cost,
            created_at, updated_at, version
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(order.id_typed().as_uuid())
    .bind(order.design_id().as_uuid())
    .bind(order.dimensions().width_cm())
    .bind(order.dimensions().height_cm())
    .bind(order.dimensions().multiplier() as i32)
    .bind(order.split())
    .bind(order.status().as_str())
    .bind(order.notes())
    .bind(selections)
    .bind(allocation)
    .bind(order.costs().materials)
    .bind(order.costs().labor)
    .bind(order.costs().total)
    .bind(order.created_at())
    .bind(order.updated_at())
    .bind(order.version() as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_order", e))?;
    Ok(())
}

async fn update_order(
    tx: &mut Transaction<'_, Postgres>,
    order: &CurtainOrder,
) -> Result<(), StoreError> {
    let (selections, allocation) = order_json(order)?;
    sqlx::query(
        r#"
        UPDATE orders
        SET width_cm = $2,
            height_cm = $3,
            multiplier = $4,
            split = $5,
            status = $6,
            notes = $7,
            selections = $8,
            allocation = $9,
            materials_cost = $10,
            labor_cost = $11,
            total_cost = $12,
            updated_at = $13,
            version = $14
        WHERE id = $1
        "#,
    )
    .bind(order.id_typed().as_uuid())
    .bind(order.dimensions().width_cm())
    .bind(order.dimensions().height_cm())
    .bind(order.dimensions().multiplier() as i32)
    .bind(order.split())
    .bind(order.status().as_str())
    .bind(order.notes())
    .bind(selections)
    .bind(allocation)
    .bind(order.costs().materials)
    .bind(order.costs().labor)
    .bind(order.costs().total)
    .bind(order.updated_at())
    .bind(order.version() as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_order", e))?;
    Ok(())
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Rejected(DomainError::duplicate(msg)),
                Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                _ => StoreError::Integrity(msg),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("database unavailable in {operation}: {err}"))
        }
        _ => StoreError::Integrity(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct LedgerEntryRow {
    id: Uuid,
    reference_id: Uuid,
    color_id: Uuid,
    quantity_on_hand: Decimal,
    minimum_threshold: Decimal,
    location: Option<String>,
    last_in: Option<DateTime<Utc>>,
    last_out: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for LedgerEntryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LedgerEntryRow {
            id: row.try_get("id")?,
            reference_id: row.try_get("reference_id")?,
            color_id: row.try_get("color_id")?,
            quantity_on_hand: row.try_get("quantity_on_hand")?,
            minimum_threshold: row.try_get("minimum_threshold")?,
            location: row.try_get("location")?,
            last_in: row.try_get("last_in")?,
            last_out: row.try_get("last_out")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl From<LedgerEntryRow> for LedgerEntry {
    fn from(row: LedgerEntryRow) -> Self {
        LedgerEntry::restore(LedgerEntryParts {
            id: LedgerEntryId::from_uuid(row.id),
            reference_id: ReferenceId::from_uuid(row.reference_id),
            color_id: ColorId::from_uuid(row.color_id),
            quantity_on_hand: row.quantity_on_hand,
            minimum_threshold: row.minimum_threshold,
            location: row.location,
            last_in: row.last_in,
            last_out: row.last_out,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version as u64,
        })
    }
}

#[derive(Debug)]
struct ReservationRow {
    token: Uuid,
    ledger_entry_id: Uuid,
    quantity: Decimal,
    state: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ReservationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ReservationRow {
            token: row.try_get("token")?,
            ledger_entry_id: row.try_get("ledger_entry_id")?,
            quantity: row.try_get("quantity")?,
            state: row.try_get("state")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let state: ReservationState = row
            .state
            .parse()
            .map_err(|e: DomainError| StoreError::Integrity(e.to_string()))?;
        Ok(Reservation {
            token: ReservationToken::from_uuid(row.token),
            entry_id: LedgerEntryId::from_uuid(row.ledger_entry_id),
            quantity: row.quantity,
            state,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Debug)]
struct OrderRow {
    id: Uuid,
    design_id: Uuid,
    width_cm: Decimal,
    height_cm: Decimal,
    multiplier: i32,
    split: bool,
    status: String,
    notes: Option<String>,
    selections: serde_json::Value,
    allocation: serde_json::Value,
    materials_cost: Decimal,
    labor_cost: Decimal,
    total_cost: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for OrderRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderRow {
            id: row.try_get("id")?,
            design_id: row.try_get("design_id")?,
            width_cm: row.try_get("width_cm")?,
            height_cm: row.try_get("height_cm")?,
            multiplier: row.try_get("multiplier")?,
            split: row.try_get("split")?,
            status: row.try_get("status")?,
            notes: row.try_get("notes")?,
            selections: row.try_get("selections")?,
            allocation: row.try_get("allocation")?,
            materials_cost: row.try_get("materials_cost")?,
            labor_cost: row.try_get("labor_cost")?,
            total_cost: row.try_get("total_cost")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<OrderRow> for CurtainOrder {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            StoreError::Integrity(format!("order {} has invalid {what}: {e}", row.id))
        };
        let multiplier = u32::try_from(row.multiplier).map_err(|e| corrupt("multiplier", &e))?;
        let dimensions = CurtainDimensions::new(row.width_cm, row.height_cm, multiplier)
            .map_err(|e| corrupt("dimensions", &e))?;
        let status = row.status.parse().map_err(|e| corrupt("status", &e))?;
        let selections =
            serde_json::from_value(row.selections.clone()).map_err(|e| corrupt("selections", &e))?;
        let allocation =
            serde_json::from_value(row.allocation.clone()).map_err(|e| corrupt("allocation", &e))?;

        Ok(CurtainOrder::restore(CurtainOrderParts {
            id: OrderId::from_uuid(row.id),
            design_id: curtainworks_core::DesignId::from_uuid(row.design_id),
            dimensions,
            split: row.split,
            status,
            notes: row.notes,
            selections,
            allocation,
            costs: CostBreakdown {
                materials: row.materials_cost,
                labor: row.labor_cost,
                total: row.total_cost,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version as u64,
        }))
    }
}

// Implement InventoryStore trait

impl InventoryStore for PostgresInventoryStore {
    fn insert_entry(&self, entry: LedgerEntry) -> Result<LedgerEntry, StoreError> {
        run_blocking(self.insert_entry(entry))
    }

    fn entry(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        run_blocking(self.entry(id))
    }

    fn entry_by_pair(
        &self,
        reference_id: ReferenceId,
        color_id: ColorId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        run_blocking(self.entry_by_pair(reference_id, color_id))
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        run_blocking(self.entries())
    }

    fn update_entry(
        &self,
        id: LedgerEntryId,
        patch: &LedgerEntryPatch,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        run_blocking(self.update_entry(id, patch, now))
    }

    fn remove_entry(&self, id: LedgerEntryId) -> Result<LedgerEntry, StoreError> {
        run_blocking(self.remove_entry(id))
    }

    fn adjust(&self, movement: &Movement, now: DateTime<Utc>) -> Result<AdjustOutcome, StoreError> {
        run_blocking(self.adjust(movement, now))
    }

    fn available(&self, id: LedgerEntryId, now: DateTime<Utc>) -> Result<Decimal, StoreError> {
        run_blocking(self.available(id, now))
    }

    fn place_holds(
        &self,
        token: ReservationToken,
        items: &[(LedgerEntryId, Decimal)],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError> {
        run_blocking(self.place_holds(token, items, now, expires_at))
    }

    fn consume_holds(
        &self,
        token: ReservationToken,
        now: DateTime<Utc>,
    ) -> Result<Vec<AdjustOutcome>, StoreError> {
        run_blocking(self.consume_holds(token, now))
    }

    fn release_holds(&self, token: ReservationToken) -> Result<usize, StoreError> {
        run_blocking(self.release_holds(token))
    }

    fn expire_holds(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        run_blocking(self.expire_holds(now))
    }

    fn holds(&self, token: ReservationToken) -> Result<Vec<Reservation>, StoreError> {
        run_blocking(self.holds(token))
    }

    fn order(&self, id: OrderId) -> Result<Option<CurtainOrder>, StoreError> {
        run_blocking(self.order(id))
    }

    fn orders(&self) -> Result<Vec<CurtainOrder>, StoreError> {
        run_blocking(self.orders())
    }

    fn commit_order(
        &self,
        write: OrderWrite,
        movements: &[Movement],
        now: DateTime<Utc>,
    ) -> Result<Vec<AdjustOutcome>, StoreError> {
        run_blocking(self.commit_order(write, movements, now))
    }
}
