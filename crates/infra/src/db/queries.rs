//! Typed statements: the query executor capability.
//!
//! Each method is one statement. Writes return affected-row counts; reads
//! return decoded rows. Implementations never map "no rows" to an error, the
//! repository does that.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

use super::DbError;

/// Order header as stored. Payloads are JSON rendered to text.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OrderRow {
    pub id: Uuid,
    pub owner_id: String,
    pub url: Option<String>,
    pub status: String,
    pub tags: Option<Vec<String>>,
    pub payload: String,
    pub payload_secondary: String,
    pub price_amount: Decimal,
    pub price_currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OrderItemRow {
    pub product_id: Uuid,
    pub price_amount: Decimal,
    pub price_currency: String,
    pub created_at: DateTime<Utc>,
}

/// One row of the order/item left join. Item columns are null when the order
/// has no live items.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OrderJoinRow {
    #[sqlx(flatten)]
    pub order: OrderRow,
    pub item_product_id: Option<Uuid>,
    pub item_price_amount: Option<Decimal>,
    pub item_price_currency: Option<String>,
    pub item_created_at: Option<DateTime<Utc>>,
}

impl OrderJoinRow {
    pub fn item(&self) -> Option<OrderItemRow> {
        Some(OrderItemRow {
            product_id: self.item_product_id?,
            price_amount: self.item_price_amount?,
            price_currency: self.item_price_currency.clone()?,
            created_at: self.item_created_at?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CartItemRow {
    pub product_id: Uuid,
    pub price_amount: Decimal,
    pub price_currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOrderParams {
    pub owner_id: String,
    pub url: Option<String>,
    pub status: String,
    pub tags: Option<Vec<String>>,
    pub payload: String,
    pub payload_secondary: String,
    pub price_amount: Decimal,
    pub price_currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOrderItemParams {
    pub product_id: Uuid,
    pub price_amount: Decimal,
    pub price_currency: String,
}

/// Search predicate. `None` disables a clause; list clauses match any element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOrdersParams {
    pub ids: Option<Vec<Uuid>>,
    pub owner_ids: Option<Vec<String>>,
    /// `LIKE` patterns, already wrapped in `%`.
    pub url_patterns: Option<Vec<String>>,
    pub statuses: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddCartItemParams {
    pub owner_id: String,
    pub product_id: Uuid,
    pub price_amount: Decimal,
    pub price_currency: String,
}

/// Statements over `orders` and `order_items`.
///
/// Reads exclude soft-deleted orders and items.
#[async_trait]
pub trait OrderQueries {
    /// Insert a header and return its generated id.
    async fn insert_order(&mut self, params: InsertOrderParams) -> Result<Uuid, DbError>;

    /// Insert all items of one order as a single statement, in the given order.
    async fn insert_order_items(
        &mut self,
        order_id: Uuid,
        items: Vec<InsertOrderItemParams>,
    ) -> Result<u64, DbError>;

    async fn get_order(&mut self, order_id: Uuid) -> Result<Option<OrderRow>, DbError>;

    async fn get_order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItemRow>, DbError>;

    async fn get_order_join_items(&mut self, order_id: Uuid) -> Result<Vec<OrderJoinRow>, DbError>;

    /// Rows ordered by order creation, order id, then item position.
    async fn search_orders(&mut self, params: SearchOrdersParams) -> Result<Vec<OrderJoinRow>, DbError>;

    /// Set status and bump `updated_at` on a live order.
    async fn update_order_status(&mut self, order_id: Uuid, status: &str) -> Result<u64, DbError>;

    async fn soft_delete_order(&mut self, order_id: Uuid) -> Result<u64, DbError>;

    /// Remove every item row of the order, soft-deleted ones included.
    async fn delete_order_items(&mut self, order_id: Uuid) -> Result<u64, DbError>;

    async fn delete_order(&mut self, order_id: Uuid) -> Result<u64, DbError>;

    /// Soft-delete one live item of a live order.
    async fn soft_delete_order_item(&mut self, order_id: Uuid, product_id: Uuid) -> Result<u64, DbError>;

    /// Recompute the header price from the live items and bump `updated_at`.
    async fn refresh_order_price(&mut self, order_id: Uuid) -> Result<u64, DbError>;
}

/// Statements over `cart_items`.
#[async_trait]
pub trait CartQueries {
    async fn get_cart(&mut self, owner_id: &str) -> Result<Vec<CartItemRow>, DbError>;

    /// Insert, or overwrite the price of an existing (owner, product) entry.
    async fn add_cart_item(&mut self, params: AddCartItemParams) -> Result<(), DbError>;

    async fn delete_cart_item(&mut self, owner_id: &str, product_id: Uuid) -> Result<u64, DbError>;
}
