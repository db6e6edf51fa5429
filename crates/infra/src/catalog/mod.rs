//! `CatalogReader` adapters.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryCatalog;
pub use postgres::PostgresCatalog;
