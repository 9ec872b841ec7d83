//! Values compared by their attributes: money, currencies, time windows.

/// Marker for types with no identity of their own.
///
/// `Money` is the canonical example: two amounts with the same decimal value
/// and the same currency code are the same money, wherever they came from.
/// Implementors are cloned freely and compared with `==`.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
