use std::sync::Arc;

use rust_decimal::Decimal;

use curtainworks_core::{DesignId, DomainResult, ReferenceId};

use crate::design::Design;

/// Read-only catalog lookups the inventory core depends on.
///
/// `Ok(None)` means "does not exist"; errors are reserved for lookups that could
/// not be performed at all.
pub trait CatalogReader: Send + Sync {
    fn get_design(&self, id: DesignId) -> DomainResult<Option<Design>>;

    /// Unit price of a material reference.
    fn reference_price(&self, reference_id: ReferenceId) -> DomainResult<Option<Decimal>>;
}

impl<C> CatalogReader for Arc<C>
where
    C: CatalogReader + ?Sized,
{
    fn get_design(&self, id: DesignId) -> DomainResult<Option<Design>> {
        (**self).get_design(id)
    }

    fn reference_price(&self, reference_id: ReferenceId) -> DomainResult<Option<Decimal>> {
        (**self).reference_price(reference_id)
    }
}
