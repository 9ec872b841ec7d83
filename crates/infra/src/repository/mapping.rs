//! Conversions between executor rows/params and the order and cart models.

use std::collections::HashMap;
use std::str::FromStr;

use url::Url;
use uuid::Uuid;

use ordertx_core::{Currency, DomainError, DomainResult, Money, ProductId};
use ordertx_orders::{CartItem, Order, OrderFilter, OrderItem, OrderStatus};

use crate::db::{
    CartItemRow, InsertOrderItemParams, InsertOrderParams, OrderItemRow, OrderJoinRow, OrderRow,
    SearchOrdersParams,
};
use crate::error::{RepositoryError, RepositoryResult};

const EMPTY_JSON: &str = "{}";

fn money(op: &'static str, amount: rust_decimal::Decimal, currency: &str) -> RepositoryResult<Money> {
    let currency = Currency::parse(currency).map_err(|e| RepositoryError::mapping(op, e.to_string()))?;
    Ok(Money::new(amount, currency))
}

/// Order header without items.
pub fn order_from_row(op: &'static str, row: OrderRow) -> RepositoryResult<Order> {
    let price = money(op, row.price_amount, &row.price_currency)?;

    let url = match row.url.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            Url::parse(raw).map_err(|e| RepositoryError::mapping(op, format!("url[{raw}]: {e}")))?,
        ),
    };

    let status = OrderStatus::from_str(&row.status)
        .map_err(|e| RepositoryError::mapping(op, format!("status[{}]: {e}", row.status)))?;

    Ok(Order {
        id: row.id.into(),
        owner_id: row.owner_id,
        price,
        items: Vec::new(),
        url,
        status,
        tags: row.tags.unwrap_or_default(),
        payload: row.payload.into_bytes(),
        payload_secondary: row.payload_secondary.into_bytes(),
        created_at: row.created_at,
        updated_at: row.updated_at,
        deleted_at: None,
    })
}

pub fn item_from_row(op: &'static str, row: OrderItemRow) -> RepositoryResult<OrderItem> {
    Ok(OrderItem {
        product_id: row.product_id.into(),
        price: money(op, row.price_amount, &row.price_currency)?,
        created_at: row.created_at,
        deleted_at: None,
    })
}

/// Header row plus item rows fetched separately.
pub fn assemble_order(op: &'static str, row: OrderRow, items: Vec<OrderItemRow>) -> RepositoryResult<Order> {
    let mut order = order_from_row(op, row)?;
    order.items = items
        .into_iter()
        .map(|item| item_from_row(op, item))
        .collect::<RepositoryResult<_>>()?;
    Ok(order)
}

/// Fold join rows into orders.
///
/// An order is created the first time its id is seen and every later row
/// appends its item. Orders come out in first-seen order, items in row order.
/// Rows without item columns contribute only the header.
pub fn group_order_rows(op: &'static str, rows: Vec<OrderJoinRow>) -> RepositoryResult<Vec<Order>> {
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut orders: Vec<Order> = Vec::new();

    for row in rows {
        let item = row.item();
        let slot = match index.get(&row.order.id) {
            Some(&slot) => slot,
            None => {
                let id = row.order.id;
                orders.push(order_from_row(op, row.order)?);
                index.insert(id, orders.len() - 1);
                orders.len() - 1
            }
        };

        if let Some(item) = item {
            orders[slot].items.push(item_from_row(op, item)?);
        }
    }

    Ok(orders)
}

pub fn cart_item_from_row(op: &'static str, row: CartItemRow) -> RepositoryResult<CartItem> {
    Ok(CartItem {
        product_id: ProductId::from_uuid(row.product_id),
        price: money(op, row.price_amount, &row.price_currency)?,
        created_at: row.created_at,
    })
}

fn payload_text(field: &str, bytes: &[u8]) -> DomainResult<String> {
    if bytes.is_empty() {
        return Ok(EMPTY_JSON.to_string());
    }
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| DomainError::validation(format!("{field} is not valid UTF-8: {e}")))
}

/// Header and item params for a new order.
///
/// The stored price is the sum of the item prices; `order.price` is ignored.
pub fn insert_params(order: &Order) -> DomainResult<(InsertOrderParams, Vec<InsertOrderItemParams>)> {
    let first = order
        .items
        .first()
        .ok_or_else(|| DomainError::validation("no items in order"))?;
    let total = Money::sum(first.price.currency(), order.items.iter().map(|item| &item.price))?;

    let header = InsertOrderParams {
        owner_id: order.owner_id.clone(),
        url: order.url.as_ref().map(Url::to_string),
        status: OrderStatus::Pending.as_str().to_string(),
        tags: (!order.tags.is_empty()).then(|| order.tags.clone()),
        payload: payload_text("payload", &order.payload)?,
        payload_secondary: payload_text("payload_secondary", &order.payload_secondary)?,
        price_amount: total.amount(),
        price_currency: total.currency().to_string(),
    };

    let items = order
        .items
        .iter()
        .map(|item| InsertOrderItemParams {
            product_id: item.product_id.into_uuid(),
            price_amount: item.price.amount(),
            price_currency: item.price.currency().to_string(),
        })
        .collect();

    Ok((header, items))
}

fn non_empty<T>(values: Vec<T>) -> Option<Vec<T>> {
    (!values.is_empty()).then_some(values)
}

/// Search predicate for a validated filter. URL patterns match as substrings.
pub fn search_params(filter: &OrderFilter) -> SearchOrdersParams {
    let created = filter.created_at.unwrap_or_default();
    let updated = filter.updated_at.unwrap_or_default();

    SearchOrdersParams {
        ids: non_empty(filter.ids.iter().map(|id| id.into_uuid()).collect()),
        owner_ids: non_empty(filter.owner_ids.clone()),
        url_patterns: non_empty(filter.url_patterns.iter().map(|p| format!("%{p}%")).collect()),
        statuses: non_empty(filter.statuses.iter().map(|s| s.as_str().to_string()).collect()),
        tags: non_empty(filter.tags.clone()),
        created_after: created.after,
        created_before: created.before,
        updated_after: updated.after,
        updated_before: updated.before,
    }
}
