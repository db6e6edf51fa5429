//! Time-boxed holds against ledger stock.
//!
//! A hold counts against availability while it is `Active` and its expiry lies in
//! the future. Holds past their expiry stop counting immediately, even before a
//! sweep flips their state to `Expired`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use curtainworks_core::{DomainError, DomainResult, LedgerEntryId, ReservationToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Active,
    Used,
    Expired,
}

impl ReservationState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationState::Active => "active",
            ReservationState::Used => "used",
            ReservationState::Expired => "expired",
        }
    }
}

impl core::str::FromStr for ReservationState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationState::Active),
            "used" => Ok(ReservationState::Used),
            "expired" => Ok(ReservationState::Expired),
            other => Err(DomainError::validation(format!(
                "unknown reservation state: {other}"
            ))),
        }
    }
}

/// One held quantity against one ledger entry. Every hold of a `reserve` call
/// shares the same token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub token: ReservationToken,
    pub entry_id: LedgerEntryId,
    pub quantity: Decimal,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        token: ReservationToken,
        entry_id: LedgerEntryId,
        quantity: Decimal,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token,
            entry_id,
            quantity,
            state: ReservationState::Active,
            created_at,
            expires_at,
        }
    }

    /// Counts against availability at `now`.
    pub fn is_holding(&self, now: DateTime<Utc>) -> bool {
        self.state == ReservationState::Active && self.expires_at > now
    }

    /// Still marked active but its time is up.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.state == ReservationState::Active && self.expires_at <= now
    }

    /// Active → Used.
    pub fn mark_used(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.is_holding(now) {
            return Err(DomainError::ReservationNotFound(self.token));
        }
        self.state = ReservationState::Used;
        Ok(())
    }

    /// Active → Expired. Returns whether the state changed.
    pub fn expire(&mut self) -> bool {
        if self.state == ReservationState::Active {
            self.state = ReservationState::Expired;
            true
        } else {
            false
        }
    }
}

/// Σ quantity of holds that count at `now`.
pub fn held_quantity<'a, I>(holds: I, now: DateTime<Utc>) -> Decimal
where
    I: IntoIterator<Item = &'a Reservation>,
{
    holds
        .into_iter()
        .filter(|hold| hold.is_holding(now))
        .map(|hold| hold.quantity)
        .sum()
}

/// `on_hand − Σ(active, unexpired holds)`.
pub fn available<'a, I>(on_hand: Decimal, holds: I, now: DateTime<Utc>) -> Decimal
where
    I: IntoIterator<Item = &'a Reservation>,
{
    on_hand - held_quantity(holds, now)
}

/// Validate a reserve request and merge repeated entries, keeping first-seen order.
pub fn normalize_request(
    items: &[(LedgerEntryId, Decimal)],
) -> DomainResult<Vec<(LedgerEntryId, Decimal)>> {
    if items.is_empty() {
        return Err(DomainError::validation("a reservation needs at least one item"));
    }

    let mut merged: Vec<(LedgerEntryId, Decimal)> = Vec::with_capacity(items.len());
    for &(entry_id, quantity) in items {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "reserved quantity for entry {entry_id} must be positive"
            )));
        }
        match merged.iter_mut().find(|(id, _)| *id == entry_id) {
            Some((_, total)) => *total += quantity,
            None => merged.push((entry_id, quantity)),
        }
    }
    Ok(merged)
}
