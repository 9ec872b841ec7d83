//! Order aggregate: an order header plus its owned line items.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use ordertx_core::{Currency, DomainError, DomainResult, Money, OrderId, ProductId};

use crate::status::OrderStatus;

/// Order line item. Owned by exactly one order and keyed by `product_id` within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub price: Money,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl OrderItem {
    pub fn new(product_id: ProductId, price: Money) -> Self {
        Self {
            product_id,
            price,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Aggregate root: Order.
///
/// `price` is a denormalised total of the non-deleted items. The repository
/// computes it on insert and recomputes it when an item is soft-deleted; a
/// caller-supplied value is never persisted as-is.
///
/// `payload` and `payload_secondary` are JSON documents carried as opaque
/// bytes. An empty blob is stored as `{}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner_id: String,
    pub price: Money,
    pub items: Vec<OrderItem>,
    pub url: Option<Url>,
    pub status: OrderStatus,
    pub tags: Vec<String>,
    pub payload: Vec<u8>,
    pub payload_secondary: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Start a new, empty, pending order. The id is assigned by the store.
    pub fn new(owner_id: impl Into<String>, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::nil(),
            owner_id: owner_id.into(),
            price: Money::zero(currency),
            items: Vec::new(),
            url: None,
            status: OrderStatus::Pending,
            tags: Vec::new(),
            payload: Vec::new(),
            payload_secondary: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Append an item and refresh `price` to the new total.
    ///
    /// When the items no longer share one currency there is no total, so
    /// `price` keeps the last consistent value; `validate_new` rejects such an
    /// order and the store computes the price on insert anyway.
    pub fn with_item(mut self, item: OrderItem) -> Self {
        self.items.push(item);
        if let Ok(total) = self.total() {
            self.price = total;
        }
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_payload_secondary(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload_secondary = payload.into();
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Items that have not been soft-deleted, in order.
    pub fn active_items(&self) -> impl Iterator<Item = &OrderItem> {
        self.items.iter().filter(|item| !item.is_deleted())
    }

    /// Sum of the active item prices.
    ///
    /// All active items must share one currency. With no active items the
    /// total is zero in the currency of the current `price`.
    pub fn total(&self) -> DomainResult<Money> {
        let currency = self
            .active_items()
            .next()
            .map(|item| item.price.currency())
            .unwrap_or_else(|| self.price.currency());

        Money::sum(currency, self.active_items().map(|item| &item.price))
    }

    /// Checks applied before a new order is written.
    pub fn validate_new(&self) -> DomainResult<()> {
        if self.items.is_empty() {
            return Err(DomainError::validation("no items in order"));
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if item.product_id.is_nil() {
                return Err(DomainError::validation("item productID is empty"));
            }
            if !seen.insert(item.product_id) {
                return Err(DomainError::validation(format!(
                    "duplicate product {} in order items",
                    item.product_id
                )));
            }
        }

        self.total().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn usd(cents: i64) -> Money {
        Money::new(Decimal::new(cents, 2), Currency::USD)
    }

    fn item(cents: i64) -> OrderItem {
        OrderItem::new(ProductId::new(), usd(cents))
    }

    #[test]
    fn new_order_is_pending_and_unassigned() {
        let order = Order::new("u1", Currency::USD);
        assert!(order.id.is_nil());
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.price, Money::zero(Currency::USD));
        assert!(order.items.is_empty());
    }

    #[test]
    fn with_item_keeps_price_in_step_with_items() {
        let order = Order::new("u1", Currency::USD)
            .with_item(item(1050))
            .with_item(item(250));
        assert_eq!(order.price, usd(1300));
        assert_eq!(order.total().unwrap(), usd(1300));
    }

    #[test]
    fn mixed_currency_item_leaves_price_at_last_total() {
        let order = Order::new("u1", Currency::USD)
            .with_item(item(300))
            .with_item(OrderItem::new(ProductId::new(), Money::new(Decimal::ONE, Currency::EUR)));
        assert_eq!(order.price, usd(300));
        assert!(order.total().is_err());
        assert!(order.validate_new().is_err());
    }

    #[test]
    fn total_skips_soft_deleted_items() {
        let mut order = Order::new("u1", Currency::USD)
            .with_item(item(1000))
            .with_item(item(500));
        order.items[0].deleted_at = Some(Utc::now());

        assert_eq!(order.total().unwrap(), usd(500));
        assert_eq!(order.active_items().count(), 1);
    }

    #[test]
    fn total_uses_item_currency_over_header_currency() {
        let order = Order::new("u1", Currency::USD)
            .with_item(OrderItem::new(ProductId::new(), Money::new(Decimal::ONE, Currency::EUR)));
        assert_eq!(order.total().unwrap().currency(), Currency::EUR);
    }

    #[test]
    fn validate_new_rejects_empty_orders() {
        let order = Order::new("u1", Currency::USD);
        assert_eq!(
            order.validate_new(),
            Err(DomainError::validation("no items in order"))
        );
    }

    #[test]
    fn validate_new_rejects_mixed_currencies() {
        let order = Order::new("u1", Currency::USD)
            .with_item(item(100))
            .with_item(OrderItem::new(ProductId::new(), Money::new(Decimal::ONE, Currency::EUR)));
        assert!(matches!(order.validate_new(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn validate_new_rejects_duplicate_products() {
        let product_id = ProductId::new();
        let order = Order::new("u1", Currency::USD)
            .with_item(OrderItem::new(product_id, usd(100)))
            .with_item(OrderItem::new(product_id, usd(200)));
        assert!(matches!(
            order.validate_new(),
            Err(DomainError::Validation(msg)) if msg.starts_with("duplicate product")
        ));
    }

    #[test]
    fn validate_new_rejects_nil_products() {
        let order = Order::new("u1", Currency::USD).with_item(OrderItem::new(ProductId::nil(), usd(1)));
        assert_eq!(
            order.validate_new(),
            Err(DomainError::validation("item productID is empty"))
        );
    }

    #[test]
    fn builder_sets_optional_fields() {
        let url = Url::parse("https://shop.example.com/orders?ref=mail").unwrap();
        let order = Order::new("u1", Currency::USD)
            .with_item(item(1))
            .with_url(url.clone())
            .with_tags(["x", "y"])
            .with_payload(br#"{"gift":true}"#.to_vec())
            .with_payload_secondary(b"{}".to_vec());

        assert_eq!(order.url, Some(url));
        assert_eq!(order.tags, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(order.payload, br#"{"gift":true}"#.to_vec());
        assert!(order.validate_new().is_ok());
    }
}
