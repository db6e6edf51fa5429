//! Aggregate roots and optimistic concurrency.

use crate::error::{DomainError, DomainResult};

/// Ledger entries and orders are the two aggregates of the inventory domain; each
/// is mutated as a unit and carries a version bumped on every committed change.
pub trait AggregateRoot {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Display;

    fn id(&self) -> &Self::Id;

    /// Starts at 1 and grows by one per committed change.
    fn version(&self) -> u64;
}

/// What a writer believes the stored version to be.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Last writer wins.
    Any,
    Exact(u64),
}

impl ExpectedVersion {
    /// Expect the version `aggregate` was read at.
    pub fn read_at<A: AggregateRoot>(aggregate: &A) -> Self {
        ExpectedVersion::Exact(aggregate.version())
    }

    pub fn matches(self, stored: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == stored,
        }
    }

    /// `Conflict` when another writer committed in between.
    pub fn check(self, stored: u64) -> DomainResult<()> {
        match self {
            _ if self.matches(stored) => Ok(()),
            ExpectedVersion::Exact(v) => Err(DomainError::conflict(format!(
                "stale write: read at version {v}, stored version is {stored}"
            ))),
            ExpectedVersion::Any => Ok(()),
        }
    }
}
