//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attributes. Curtain
/// dimensions and resolved material requirements are value objects; ledger
/// entries and orders are not (they carry identity and a version).
///
/// To "modify" a value object, build a new one. Constructors are the place to
/// validate, so an instance that exists is always well-formed.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
