//! Value object trait: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. Two value objects with the same values are considered equal.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// create a new one with the new values (see `DimensionSpacePoint::vary`).
///
/// ```ignore
/// let a = DimensionSpacePoint::new([("language", "de")])?;
/// let b = DimensionSpacePoint::new([("language", "de")])?;
/// assert_eq!(a, b); // Equal by value, not identity
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
