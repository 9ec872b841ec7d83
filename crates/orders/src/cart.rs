//! Shopping cart: one priced entry per product for an owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ordertx_core::{DomainResult, Money, ProductId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub price: Money,
    pub created_at: DateTime<Utc>,
}

impl CartItem {
    pub fn new(product_id: ProductId, price: Money) -> Self {
        Self {
            product_id,
            price,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub owner_id: String,
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn empty(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            items: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    /// Sum of all item prices; `None` for an empty cart.
    pub fn total(&self) -> Option<DomainResult<Money>> {
        let currency = self.items.first()?.price.currency();
        Some(Money::sum(currency, self.items.iter().map(|item| &item.price)))
    }
}
