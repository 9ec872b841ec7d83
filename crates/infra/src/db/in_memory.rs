use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use ordertx_orders::OrderStatus;

use super::queries::{
    AddCartItemParams, CartItemRow, CartQueries, InsertOrderItemParams, InsertOrderParams,
    OrderItemRow, OrderJoinRow, OrderQueries, OrderRow, SearchOrdersParams,
};
use super::{Database, DbError, DbTransaction};

/// Statements whose next execution can be made to fail.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Statement {
    Begin,
    Commit,
    Rollback,
    InsertOrder,
    InsertOrderItems,
    GetOrder,
    GetOrderItems,
    GetOrderJoinItems,
    SearchOrders,
    UpdateOrderStatus,
    SoftDeleteOrder,
    DeleteOrderItems,
    DeleteOrder,
    SoftDeleteOrderItem,
    RefreshOrderPrice,
    GetCart,
    AddCartItem,
    DeleteCartItem,
}

#[derive(Debug, Default)]
struct Faults {
    fail_once: HashSet<Statement>,
    close_on_rollback: bool,
}

#[derive(Debug, Clone)]
struct StoredOrder {
    id: Uuid,
    owner_id: String,
    url: Option<String>,
    status: String,
    tags: Option<Vec<String>>,
    payload: Value,
    payload_secondary: Value,
    price_amount: Decimal,
    price_currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl StoredOrder {
    fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    fn row(&self) -> OrderRow {
        OrderRow {
            id: self.id,
            owner_id: self.owner_id.clone(),
            url: self.url.clone(),
            status: self.status.clone(),
            tags: self.tags.clone(),
            payload: self.payload.to_string(),
            payload_secondary: self.payload_secondary.to_string(),
            price_amount: self.price_amount,
            price_currency: self.price_currency.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredItem {
    order_id: Uuid,
    product_id: Uuid,
    line_no: u64,
    price_amount: Decimal,
    price_currency: String,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl StoredItem {
    fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    fn row(&self) -> OrderItemRow {
        OrderItemRow {
            product_id: self.product_id,
            price_amount: self.price_amount,
            price_currency: self.price_currency.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredCartItem {
    owner_id: String,
    product_id: Uuid,
    price_amount: Decimal,
    price_currency: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    orders: Vec<StoredOrder>,
    items: Vec<StoredItem>,
    cart: Vec<StoredCartItem>,
    next_line_no: u64,
}

impl Tables {
    fn live_order(&self, order_id: Uuid) -> Option<&StoredOrder> {
        self.orders.iter().find(|o| o.id == order_id && o.is_live())
    }

    fn live_order_mut(&mut self, order_id: Uuid) -> Option<&mut StoredOrder> {
        self.orders.iter_mut().find(|o| o.id == order_id && o.is_live())
    }

    fn live_items(&self, order_id: Uuid) -> Vec<&StoredItem> {
        let mut items: Vec<_> = self
            .items
            .iter()
            .filter(|i| i.order_id == order_id && i.is_live())
            .collect();
        items.sort_by_key(|i| i.line_no);
        items
    }

    fn join_rows(&self, order: &StoredOrder) -> Vec<OrderJoinRow> {
        let items = self.live_items(order.id);
        if items.is_empty() {
            return vec![OrderJoinRow {
                order: order.row(),
                item_product_id: None,
                item_price_amount: None,
                item_price_currency: None,
                item_created_at: None,
            }];
        }

        items
            .into_iter()
            .map(|item| OrderJoinRow {
                order: order.row(),
                item_product_id: Some(item.product_id),
                item_price_amount: Some(item.price_amount),
                item_price_currency: Some(item.price_currency.clone()),
                item_created_at: Some(item.created_at),
            })
            .collect()
    }
}

/// In-memory store with the same observable semantics as the Postgres schema.
///
/// Intended for tests/dev. A transaction reads from a copy of the committed
/// tables taken at begin. Its first write waits for the single writer slot,
/// refreshes the copy, and keeps the slot until the transaction finishes;
/// commit publishes the copy. Readers never wait on an open transaction.
/// Dropping a transaction discards the copy and frees the slot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    tables: Arc<StdMutex<Tables>>,
    writer: Arc<Mutex<()>>,
    faults: Arc<StdMutex<Faults>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next execution of `statement` fail with a backend error.
    pub fn fail_on(&self, statement: Statement) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_once
            .insert(statement);
    }

    /// Make every rollback report that the transaction was already closed.
    pub fn close_on_rollback(&self) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close_on_rollback = true;
    }

    /// Physical `orders` rows with this id, soft-deleted ones included.
    pub async fn order_row_count(&self, order_id: Uuid) -> usize {
        let tables = committed(&self.tables);
        tables.orders.iter().filter(|o| o.id == order_id).count()
    }

    /// Physical `order_items` rows of this order, soft-deleted ones included.
    pub async fn order_item_row_count(&self, order_id: Uuid) -> usize {
        let tables = committed(&self.tables);
        tables.items.iter().filter(|i| i.order_id == order_id).count()
    }
}

fn committed(tables: &StdMutex<Tables>) -> MutexGuard<'_, Tables> {
    tables.lock().unwrap_or_else(PoisonError::into_inner)
}

fn check(faults: &StdMutex<Faults>, statement: Statement) -> Result<(), DbError> {
    let mut faults = faults.lock().unwrap_or_else(PoisonError::into_inner);
    if faults.fail_once.remove(&statement) {
        return Err(DbError::Backend(format!("injected failure on {statement:?}")));
    }
    Ok(())
}

#[async_trait]
impl Database for InMemoryDatabase {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, DbError> {
        check(&self.faults, Statement::Begin)?;
        let staged = committed(&self.tables).clone();
        Ok(InMemoryTransaction {
            tables: Arc::clone(&self.tables),
            writer: Arc::clone(&self.writer),
            write_slot: None,
            staged,
            now: Utc::now(),
            faults: Arc::clone(&self.faults),
        })
    }
}

/// Open in-memory transaction.
#[derive(Debug)]
pub struct InMemoryTransaction {
    tables: Arc<StdMutex<Tables>>,
    writer: Arc<Mutex<()>>,
    write_slot: Option<OwnedMutexGuard<()>>,
    staged: Tables,
    now: DateTime<Utc>,
    faults: Arc<StdMutex<Faults>>,
}

impl InMemoryTransaction {
    fn check(&self, statement: Statement) -> Result<(), DbError> {
        check(&self.faults, statement)
    }

    /// Take the writer slot before the first write. Nothing is staged yet at
    /// that point, so the copy is refreshed from the committed tables.
    async fn for_write(&mut self) {
        if self.write_slot.is_none() {
            let slot = Arc::clone(&self.writer).lock_owned().await;
            self.staged = committed(&self.tables).clone();
            self.write_slot = Some(slot);
        }
    }
}

#[async_trait]
impl DbTransaction for InMemoryTransaction {
    async fn commit(self) -> Result<(), DbError> {
        self.check(Statement::Commit)?;
        let Self {
            tables,
            write_slot,
            staged,
            ..
        } = self;
        if write_slot.is_some() {
            *committed(&tables) = staged;
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), DbError> {
        self.check(Statement::Rollback)?;
        let closed = self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close_on_rollback;
        if closed {
            return Err(DbError::TxClosed);
        }
        Ok(())
    }
}

fn check_status(status: &str) -> Result<(), DbError> {
    if OrderStatus::ALL.iter().any(|s| s.as_str() == status) {
        Ok(())
    } else {
        Err(DbError::Constraint(format!(
            "orders_status_check: invalid status {status:?}"
        )))
    }
}

fn parse_json(column: &str, text: &str) -> Result<Value, DbError> {
    serde_json::from_str(text)
        .map_err(|e| DbError::Backend(format!("invalid input syntax for type json ({column}): {e}")))
}

fn matches_search(order: &StoredOrder, p: &SearchOrdersParams) -> bool {
    let ids_ok = p.ids.as_ref().is_none_or(|ids| ids.contains(&order.id));
    let owners_ok = p
        .owner_ids
        .as_ref()
        .is_none_or(|owners| owners.contains(&order.owner_id));
    let urls_ok = p.url_patterns.as_ref().is_none_or(|patterns| {
        order
            .url
            .as_deref()
            .is_some_and(|url| patterns.iter().any(|pattern| like(url, pattern)))
    });
    let statuses_ok = p
        .statuses
        .as_ref()
        .is_none_or(|statuses| statuses.contains(&order.status));
    // `tags && $tags`: any shared element.
    let tags_ok = p.tags.as_ref().is_none_or(|wanted| {
        order
            .tags
            .as_ref()
            .is_some_and(|tags| tags.iter().any(|tag| wanted.contains(tag)))
    });

    ids_ok
        && owners_ok
        && urls_ok
        && statuses_ok
        && tags_ok
        && p.created_after.is_none_or(|at| order.created_at >= at)
        && p.created_before.is_none_or(|at| order.created_at < at)
        && p.updated_after.is_none_or(|at| order.updated_at >= at)
        && p.updated_before.is_none_or(|at| order.updated_at < at)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    AnyRun,
    AnyOne,
    Literal(char),
}

fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::AnyRun,
            '_' => LikeToken::AnyOne,
            '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
            other => LikeToken::Literal(other),
        });
    }
    tokens
}

/// SQL `LIKE`: `%` matches any run, `_` one character, `\` escapes.
fn like(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let n = value.len();

    // reachable[i]: the pattern prefix consumed so far can match value[..i].
    let mut reachable = vec![false; n + 1];
    reachable[0] = true;

    for token in like_tokens(pattern) {
        let mut next = vec![false; n + 1];
        match token {
            LikeToken::AnyRun => {
                let mut seen = false;
                for i in 0..=n {
                    seen |= reachable[i];
                    next[i] = seen;
                }
            }
            LikeToken::AnyOne => {
                for i in 1..=n {
                    next[i] = reachable[i - 1];
                }
            }
            LikeToken::Literal(c) => {
                for i in 1..=n {
                    next[i] = reachable[i - 1] && value[i - 1] == c;
                }
            }
        }
        reachable = next;
    }

    reachable[n]
}

#[async_trait]
impl OrderQueries for InMemoryTransaction {
    async fn insert_order(&mut self, params: InsertOrderParams) -> Result<Uuid, DbError> {
        self.check(Statement::InsertOrder)?;
        self.for_write().await;
        check_status(&params.status)?;
        let payload = parse_json("payload", &params.payload)?;
        let payload_secondary = parse_json("payload_secondary", &params.payload_secondary)?;

        let id = Uuid::now_v7();
        self.staged.orders.push(StoredOrder {
            id,
            owner_id: params.owner_id,
            url: params.url,
            status: params.status,
            tags: params.tags,
            payload,
            payload_secondary,
            price_amount: params.price_amount,
            price_currency: params.price_currency,
            created_at: self.now,
            updated_at: self.now,
            deleted_at: None,
        });
        Ok(id)
    }

    async fn insert_order_items(
        &mut self,
        order_id: Uuid,
        items: Vec<InsertOrderItemParams>,
    ) -> Result<u64, DbError> {
        self.check(Statement::InsertOrderItems)?;
        self.for_write().await;

        if !self.staged.orders.iter().any(|o| o.id == order_id) {
            return Err(DbError::Constraint(format!(
                "order_items_order_id_fkey: order {order_id} does not exist"
            )));
        }

        let mut keys: HashSet<Uuid> = self
            .staged
            .items
            .iter()
            .filter(|i| i.order_id == order_id)
            .map(|i| i.product_id)
            .collect();
        for item in &items {
            if !keys.insert(item.product_id) {
                return Err(DbError::Constraint(format!(
                    "order_items_pkey: duplicate key ({order_id}, {})",
                    item.product_id
                )));
            }
        }

        let inserted = items.len() as u64;
        for item in items {
            self.staged.next_line_no += 1;
            self.staged.items.push(StoredItem {
                order_id,
                product_id: item.product_id,
                line_no: self.staged.next_line_no,
                price_amount: item.price_amount,
                price_currency: item.price_currency,
                created_at: self.now,
                deleted_at: None,
            });
        }
        Ok(inserted)
    }

    async fn get_order(&mut self, order_id: Uuid) -> Result<Option<OrderRow>, DbError> {
        self.check(Statement::GetOrder)?;
        Ok(self.staged.live_order(order_id).map(StoredOrder::row))
    }

    async fn get_order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItemRow>, DbError> {
        self.check(Statement::GetOrderItems)?;
        Ok(self
            .staged
            .live_items(order_id)
            .into_iter()
            .map(StoredItem::row)
            .collect())
    }

    async fn get_order_join_items(&mut self, order_id: Uuid) -> Result<Vec<OrderJoinRow>, DbError> {
        self.check(Statement::GetOrderJoinItems)?;
        Ok(self
            .staged
            .live_order(order_id)
            .map(|order| self.staged.join_rows(order))
            .unwrap_or_default())
    }

    async fn search_orders(&mut self, params: SearchOrdersParams) -> Result<Vec<OrderJoinRow>, DbError> {
        self.check(Statement::SearchOrders)?;

        let mut orders: Vec<&StoredOrder> = self
            .staged
            .orders
            .iter()
            .filter(|o| o.is_live() && matches_search(o, &params))
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));

        Ok(orders
            .into_iter()
            .flat_map(|order| self.staged.join_rows(order))
            .collect())
    }

    async fn update_order_status(&mut self, order_id: Uuid, status: &str) -> Result<u64, DbError> {
        self.check(Statement::UpdateOrderStatus)?;
        self.for_write().await;
        check_status(status)?;

        let now = self.now;
        Ok(match self.staged.live_order_mut(order_id) {
            Some(order) => {
                order.status = status.to_string();
                order.updated_at = now;
                1
            }
            None => 0,
        })
    }

    async fn soft_delete_order(&mut self, order_id: Uuid) -> Result<u64, DbError> {
        self.check(Statement::SoftDeleteOrder)?;
        self.for_write().await;

        let now = self.now;
        Ok(match self.staged.live_order_mut(order_id) {
            Some(order) => {
                order.deleted_at = Some(now);
                1
            }
            None => 0,
        })
    }

    async fn delete_order_items(&mut self, order_id: Uuid) -> Result<u64, DbError> {
        self.check(Statement::DeleteOrderItems)?;
        self.for_write().await;

        let before = self.staged.items.len();
        self.staged.items.retain(|i| i.order_id != order_id);
        Ok((before - self.staged.items.len()) as u64)
    }

    async fn delete_order(&mut self, order_id: Uuid) -> Result<u64, DbError> {
        self.check(Statement::DeleteOrder)?;
        self.for_write().await;

        if self.staged.items.iter().any(|i| i.order_id == order_id) {
            return Err(DbError::Constraint(format!(
                "order_items_order_id_fkey: order {order_id} is still referenced"
            )));
        }

        let before = self.staged.orders.len();
        self.staged.orders.retain(|o| o.id != order_id);
        Ok((before - self.staged.orders.len()) as u64)
    }

    async fn soft_delete_order_item(&mut self, order_id: Uuid, product_id: Uuid) -> Result<u64, DbError> {
        self.check(Statement::SoftDeleteOrderItem)?;
        self.for_write().await;

        if self.staged.live_order(order_id).is_none() {
            return Ok(0);
        }

        let now = self.now;
        Ok(match self
            .staged
            .items
            .iter_mut()
            .find(|i| i.order_id == order_id && i.product_id == product_id && i.is_live())
        {
            Some(item) => {
                item.deleted_at = Some(now);
                1
            }
            None => 0,
        })
    }

    async fn refresh_order_price(&mut self, order_id: Uuid) -> Result<u64, DbError> {
        self.check(Statement::RefreshOrderPrice)?;
        self.for_write().await;

        let total: Decimal = self
            .staged
            .live_items(order_id)
            .iter()
            .map(|i| i.price_amount)
            .sum();

        let now = self.now;
        Ok(match self.staged.live_order_mut(order_id) {
            Some(order) => {
                order.price_amount = total;
                order.updated_at = now;
                1
            }
            None => 0,
        })
    }
}

#[async_trait]
impl CartQueries for InMemoryTransaction {
    async fn get_cart(&mut self, owner_id: &str) -> Result<Vec<CartItemRow>, DbError> {
        self.check(Statement::GetCart)?;

        let mut items: Vec<&StoredCartItem> = self
            .staged
            .cart
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .collect();
        items.sort_by_key(|c| (c.created_at, c.product_id));

        Ok(items
            .into_iter()
            .map(|c| CartItemRow {
                product_id: c.product_id,
                price_amount: c.price_amount,
                price_currency: c.price_currency.clone(),
                created_at: c.created_at,
            })
            .collect())
    }

    async fn add_cart_item(&mut self, params: AddCartItemParams) -> Result<(), DbError> {
        self.check(Statement::AddCartItem)?;
        self.for_write().await;

        match self
            .staged
            .cart
            .iter_mut()
            .find(|c| c.owner_id == params.owner_id && c.product_id == params.product_id)
        {
            Some(existing) => {
                existing.price_amount = params.price_amount;
                existing.price_currency = params.price_currency;
            }
            None => self.staged.cart.push(StoredCartItem {
                owner_id: params.owner_id,
                product_id: params.product_id,
                price_amount: params.price_amount,
                price_currency: params.price_currency,
                created_at: self.now,
            }),
        }
        Ok(())
    }

    async fn delete_cart_item(&mut self, owner_id: &str, product_id: Uuid) -> Result<u64, DbError> {
        self.check(Statement::DeleteCartItem)?;
        self.for_write().await;

        let before = self.staged.cart.len();
        self.staged
            .cart
            .retain(|c| !(c.owner_id == owner_id && c.product_id == product_id));
        Ok((before - self.staged.cart.len()) as u64)
    }
}
