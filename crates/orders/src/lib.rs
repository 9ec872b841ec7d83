//! Orders domain module.
//!
//! This crate contains the order and cart models plus the search filter
//! contract, implemented purely as deterministic domain logic (no IO, no
//! storage).

pub mod cart;
pub mod filter;
pub mod order;
pub mod status;

pub use cart::{Cart, CartItem};
pub use filter::{OrderFilter, TimeRange};
pub use order::{Order, OrderItem};
pub use status::OrderStatus;
