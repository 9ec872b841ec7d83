//! Order and cart repositories.
//!
//! Callers program against [`OrderRepository`] / [`CartRepository`]; the
//! `Db*` implementations run every call through [`crate::db::with_tx`], so
//! the same code serves a pooled handle (one transaction per call) and a
//! caller-owned [`crate::db::SharedTx`].

use async_trait::async_trait;

use ordertx_core::{OrderId, ProductId};
use ordertx_orders::{Cart, CartItem, Order, OrderFilter, OrderStatus};

use crate::error::RepositoryResult;

pub mod cart;
pub mod mapping;
pub mod order;

pub use cart::DbCartRepository;
pub use order::DbOrderRepository;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Fetch header and items with separate statements.
    async fn get_order(&self, order_id: OrderId) -> RepositoryResult<Order>;

    /// Fetch header and items with one joined statement.
    async fn get_order_join(&self, order_id: OrderId) -> RepositoryResult<Order>;

    /// Persist a new order with its items and return the generated id.
    async fn insert_order(&self, order: &Order) -> RepositoryResult<OrderId>;

    /// Orders matching the filter. The order of the returned orders is unspecified.
    async fn search_orders(&self, filter: &OrderFilter) -> RepositoryResult<Vec<Order>>;

    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> RepositoryResult<()>;

    async fn soft_delete_order(&self, order_id: OrderId) -> RepositoryResult<()>;

    /// Remove the order and its items permanently.
    async fn delete_order(&self, order_id: OrderId) -> RepositoryResult<()>;

    /// Soft-delete one item and recompute the order price.
    async fn soft_delete_order_item(&self, order_id: OrderId, product_id: ProductId) -> RepositoryResult<()>;
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn get_cart(&self, owner_id: &str) -> RepositoryResult<Cart>;

    /// Add an item, replacing the price of an existing entry for the same product.
    async fn add_item(&self, owner_id: &str, item: &CartItem) -> RepositoryResult<()>;

    /// Returns whether an entry was removed.
    async fn delete_item(&self, owner_id: &str, product_id: ProductId) -> RepositoryResult<bool>;
}
