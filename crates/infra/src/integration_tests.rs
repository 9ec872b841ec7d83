//! Repository scenarios against the in-memory store.
//!
//! Verifies:
//! - Inserts are atomic across header and item rows
//! - Both fetch strategies agree and hide soft-deleted rows
//! - Soft/hard delete, status update and item soft delete report not-found uniformly
//! - Search combines fields with AND and values within a field with OR
//! - Repositories compose inside a caller-owned transaction
//! - A cancelled unit of work leaves no writes behind

use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use url::Url;

use ordertx_core::{Currency, Money, OrderId, ProductId};
use ordertx_orders::{CartItem, Order, OrderFilter, OrderItem, OrderStatus, TimeRange};

use crate::db::{with_tx, DbHandle, InMemoryDatabase, OrderQueries, SharedTx, Statement};
use crate::error::RepositoryError;
use crate::repository::{CartRepository, DbCartRepository, DbOrderRepository, OrderRepository};

fn usd(cents: i64) -> Money {
    Money::new(Decimal::new(cents, 2), Currency::USD)
}

fn order_with(owner: &str, prices: &[i64]) -> Order {
    prices.iter().fold(Order::new(owner, Currency::USD), |order, &cents| {
        order.with_item(OrderItem::new(ProductId::new(), usd(cents)))
    })
}

fn setup() -> (InMemoryDatabase, DbOrderRepository<InMemoryDatabase>) {
    ordertx_observability::init_for_tests();
    let db = InMemoryDatabase::new();
    (db.clone(), DbOrderRepository::new(db))
}

fn by_ids(ids: &[OrderId]) -> OrderFilter {
    OrderFilter {
        ids: ids.to_vec(),
        ..Default::default()
    }
}

fn sorted_ids(orders: &[Order]) -> Vec<OrderId> {
    let mut ids: Vec<OrderId> = orders.iter().map(|o| o.id).collect();
    ids.sort_by_key(|id| id.into_uuid());
    ids
}

#[tokio::test]
async fn zero_item_insert_persists_nothing() {
    let (_db, repo) = setup();

    let err = repo.insert_order(&Order::new("u1", Currency::USD)).await.unwrap_err();
    assert!(err.is_validation());

    let found = repo
        .search_orders(&OrderFilter {
            owner_ids: vec!["u1".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn both_fetch_strategies_agree_and_hide_soft_deleted_items() {
    let (db, repo) = setup();
    let order = order_with("u1", &[1000, 500, 250]);
    let removed = order.items[1].product_id;

    let id = repo.insert_order(&order).await.unwrap();
    assert!(!id.is_nil());

    repo.soft_delete_order_item(id, removed).await.unwrap();

    let multi = repo.get_order(id).await.unwrap();
    let joined = repo.get_order_join(id).await.unwrap();
    assert_eq!(multi, joined);

    let products: Vec<ProductId> = multi.items.iter().map(|i| i.product_id).collect();
    assert_eq!(products, vec![order.items[0].product_id, order.items[2].product_id]);

    // The item row is still there, only marked.
    assert_eq!(db.order_item_row_count(id.into_uuid()).await, 3);
}

#[tokio::test]
async fn soft_deleting_an_item_reduces_price_by_its_amount() {
    let (_db, repo) = setup();
    let order = order_with("u1", &[1999, 501, 1000]);
    let id = repo.insert_order(&order).await.unwrap();
    assert_eq!(repo.get_order(id).await.unwrap().price, usd(3500));

    repo.soft_delete_order_item(id, order.items[0].product_id).await.unwrap();

    let fetched = repo.get_order(id).await.unwrap();
    assert_eq!(fetched.price, usd(1501));
    assert_eq!(fetched.total().unwrap(), fetched.price);

    // Deleting the same item again finds nothing to delete.
    let err = repo
        .soft_delete_order_item(id, order.items[0].product_id)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { op: "soft_delete_order_item" }));
}

#[tokio::test]
async fn deleting_every_item_leaves_a_zero_priced_order() {
    let (_db, repo) = setup();
    let order = order_with("u1", &[700]);
    let id = repo.insert_order(&order).await.unwrap();

    repo.soft_delete_order_item(id, order.items[0].product_id).await.unwrap();

    let multi = repo.get_order(id).await.unwrap();
    let joined = repo.get_order_join(id).await.unwrap();
    assert!(multi.items.is_empty());
    assert_eq!(multi, joined);
    assert_eq!(multi.price, usd(0));
}

#[tokio::test]
async fn failed_price_refresh_rolls_back_item_soft_delete() {
    let (db, repo) = setup();
    let order = order_with("u1", &[100, 200]);
    let id = repo.insert_order(&order).await.unwrap();

    db.fail_on(Statement::RefreshOrderPrice);
    let err = repo
        .soft_delete_order_item(id, order.items[0].product_id)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Store { op: "refresh_order_price", .. }));

    let fetched = repo.get_order(id).await.unwrap();
    assert_eq!(fetched.items.len(), 2);
    assert_eq!(fetched.price, usd(300));
}

#[tokio::test]
async fn hard_delete_removes_rows_and_hides_the_order() {
    let (db, repo) = setup();
    let id = repo.insert_order(&order_with("u1", &[100, 200])).await.unwrap();

    repo.delete_order(id).await.unwrap();

    assert!(repo.get_order(id).await.unwrap_err().is_not_found());
    assert!(repo.get_order_join(id).await.unwrap_err().is_not_found());
    assert!(repo.search_orders(&by_ids(&[id])).await.unwrap().is_empty());
    assert_eq!(db.order_row_count(id.into_uuid()).await, 0);
    assert_eq!(db.order_item_row_count(id.into_uuid()).await, 0);

    let err = repo.delete_order(id).await.unwrap_err();
    assert!(matches!(err, RepositoryError::NotFound { op: "delete_order_items" }));
}

#[tokio::test]
async fn failed_header_delete_keeps_the_items() {
    let (db, repo) = setup();
    let id = repo.insert_order(&order_with("u1", &[100, 200])).await.unwrap();

    db.fail_on(Statement::DeleteOrder);
    let err = repo.delete_order(id).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Store { op: "delete_order", .. }));

    assert_eq!(repo.get_order(id).await.unwrap().items.len(), 2);
    assert_eq!(db.order_item_row_count(id.into_uuid()).await, 2);
}

#[tokio::test]
async fn soft_delete_hides_the_order_but_keeps_the_row() {
    let (db, repo) = setup();
    let id = repo.insert_order(&order_with("u1", &[100])).await.unwrap();

    repo.soft_delete_order(id).await.unwrap();

    assert!(repo.get_order(id).await.unwrap_err().is_not_found());
    assert!(repo.get_order_join(id).await.unwrap_err().is_not_found());
    assert!(repo.search_orders(&by_ids(&[id])).await.unwrap().is_empty());
    assert_eq!(db.order_row_count(id.into_uuid()).await, 1);

    assert!(repo.soft_delete_order(id).await.unwrap_err().is_not_found());

    // A soft-deleted order can still be removed for good.
    repo.delete_order(id).await.unwrap();
    assert_eq!(db.order_row_count(id.into_uuid()).await, 0);
}

#[tokio::test]
async fn status_update_on_unreachable_orders_is_not_found() {
    let (_db, repo) = setup();

    let missing = OrderId::new();
    assert!(repo
        .update_order_status(missing, OrderStatus::Shipped)
        .await
        .unwrap_err()
        .is_not_found());

    let soft = repo.insert_order(&order_with("u1", &[100])).await.unwrap();
    repo.soft_delete_order(soft).await.unwrap();
    assert!(repo
        .update_order_status(soft, OrderStatus::Shipped)
        .await
        .unwrap_err()
        .is_not_found());

    let hard = repo.insert_order(&order_with("u1", &[100])).await.unwrap();
    repo.delete_order(hard).await.unwrap();
    assert!(repo
        .update_order_status(hard, OrderStatus::Shipped)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn status_update_is_idempotent_and_visible() {
    let (_db, repo) = setup();
    let id = repo.insert_order(&order_with("u1", &[100])).await.unwrap();

    repo.update_order_status(id, OrderStatus::Shipped).await.unwrap();
    repo.update_order_status(id, OrderStatus::Shipped).await.unwrap();

    assert_eq!(repo.get_order(id).await.unwrap().status, OrderStatus::Shipped);
    assert_eq!(repo.get_order_join(id).await.unwrap().status, OrderStatus::Shipped);
}

#[tokio::test]
async fn empty_filter_fails_without_querying() {
    let (db, repo) = setup();
    db.fail_on(Statement::SearchOrders);

    let err = repo.search_orders(&OrderFilter::default()).await.unwrap_err();
    assert!(err.is_validation());

    // The injected fault was not consumed.
    let err = repo.search_orders(&by_ids(&[OrderId::new()])).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Store { op: "search_orders", .. }));
}

#[tokio::test]
async fn search_ands_fields_and_ors_values() {
    let (_db, repo) = setup();
    let a = repo
        .insert_order(&order_with("u1", &[100, 200]).with_tags(["x", "y"]))
        .await
        .unwrap();
    let b = repo
        .insert_order(&order_with("u2", &[300]).with_tags(["y"]))
        .await
        .unwrap();

    let tags = |values: &[&str]| values.iter().map(|t| t.to_string()).collect::<Vec<_>>();

    let both = repo
        .search_orders(&OrderFilter {
            tags: tags(&["y"]),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut expected = vec![a, b];
    expected.sort_by_key(|id| id.into_uuid());
    assert_eq!(sorted_ids(&both), expected);

    let only_a = repo
        .search_orders(&OrderFilter {
            owner_ids: vec!["u1".to_string()],
            tags: tags(&["x"]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(sorted_ids(&only_a), vec![a]);
    assert_eq!(only_a[0].items.len(), 2);

    let none = repo
        .search_orders(&OrderFilter {
            tags: tags(&["z"]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(none.is_empty());

    let either_tag = repo
        .search_orders(&OrderFilter {
            owner_ids: vec!["u2".to_string()],
            tags: tags(&["x", "y"]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(sorted_ids(&either_tag), vec![b]);
}

#[tokio::test]
async fn search_by_status_url_and_time() {
    let (_db, repo) = setup();
    let shipped = repo
        .insert_order(
            &order_with("u1", &[100]).with_url(Url::parse("https://shop.example.com/orders/1").unwrap()),
        )
        .await
        .unwrap();
    let pending = repo
        .insert_order(&order_with("u1", &[100]).with_url(Url::parse("https://other.test/o").unwrap()))
        .await
        .unwrap();
    repo.update_order_status(shipped, OrderStatus::Shipped).await.unwrap();

    let by_status = repo
        .search_orders(&OrderFilter {
            statuses: vec![OrderStatus::Shipped, OrderStatus::Cancelled],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(sorted_ids(&by_status), vec![shipped]);

    let by_url = repo
        .search_orders(&OrderFilter {
            url_patterns: vec!["example.com".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(sorted_ids(&by_url), vec![shipped]);

    let by_wildcard = repo
        .search_orders(&OrderFilter {
            url_patterns: vec!["other.t_st".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(sorted_ids(&by_wildcard), vec![pending]);

    let later = Utc::now() + chrono::Duration::minutes(1);
    let created_before_later = repo
        .search_orders(&OrderFilter {
            owner_ids: vec!["u1".to_string()],
            created_at: Some(TimeRange::before(later)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(created_before_later.len(), 2);

    let updated_after_later = repo
        .search_orders(&OrderFilter {
            updated_at: Some(TimeRange::after(later)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(updated_after_later.is_empty());
}

#[tokio::test]
async fn url_tags_and_payload_round_trip() {
    let (_db, repo) = setup();
    let url = Url::parse("https://shop.example.com/orders?ref=mail&lang=en#summary").unwrap();
    let payload = json!({"gift": true, "note": "ring twice", "lines": [1, 2]});
    let order = order_with("u1", &[100])
        .with_url(url.clone())
        .with_tags(["x", "priority"])
        .with_payload(serde_json::to_vec(&payload).unwrap());

    let id = repo.insert_order(&order).await.unwrap();
    let fetched = repo.get_order(id).await.unwrap();

    assert_eq!(fetched.url, Some(url));
    assert_eq!(fetched.tags, vec!["x".to_string(), "priority".to_string()]);

    let stored: serde_json::Value = serde_json::from_slice(&fetched.payload).unwrap();
    assert_eq!(stored, payload);

    let secondary: serde_json::Value = serde_json::from_slice(&fetched.payload_secondary).unwrap();
    assert_eq!(secondary, json!({}));
}

#[tokio::test]
async fn repositories_compose_inside_a_caller_transaction() {
    let (db, _repo) = setup();
    let item = CartItem::new(ProductId::new(), usd(100));

    // Rolled back: nothing from either repository survives.
    let tx = SharedTx::begin(&db).await.unwrap();
    let orders = DbOrderRepository::<InMemoryDatabase>::in_tx(tx.clone());
    let carts = DbCartRepository::<InMemoryDatabase>::in_tx(tx.clone());
    let discarded = orders.insert_order(&order_with("u1", &[100])).await.unwrap();
    carts.add_item("u1", &item).await.unwrap();
    assert_eq!(orders.get_order(discarded).await.unwrap().owner_id, "u1");
    tx.rollback().await.unwrap();

    let pooled_orders = DbOrderRepository::new(db.clone());
    let pooled_carts = DbCartRepository::new(db.clone());
    assert!(pooled_orders.get_order(discarded).await.unwrap_err().is_not_found());
    assert!(pooled_carts.get_cart("u1").await.unwrap().is_empty());

    // Committed: both writes become visible together.
    let tx = SharedTx::begin(&db).await.unwrap();
    let orders = DbOrderRepository::<InMemoryDatabase>::in_tx(tx.clone());
    let carts = DbCartRepository::<InMemoryDatabase>::in_tx(tx.clone());
    let kept = orders.insert_order(&order_with("u1", &[100])).await.unwrap();
    carts.add_item("u1", &item).await.unwrap();

    // A failing call does not end the caller's transaction.
    assert!(orders.soft_delete_order(OrderId::new()).await.unwrap_err().is_not_found());
    tx.commit().await.unwrap();

    assert_eq!(pooled_orders.get_order(kept).await.unwrap().id, kept);
    assert_eq!(pooled_carts.get_cart("u1").await.unwrap().items.len(), 1);

    // The finished transaction can no longer serve repositories.
    let err = orders.get_order(kept).await.unwrap_err();
    assert!(matches!(err, RepositoryError::HandleMisuse(_)));
}

#[tokio::test]
async fn pooled_calls_proceed_while_a_caller_transaction_is_open() {
    let (db, pooled) = setup();
    let committed = pooled.insert_order(&order_with("u1", &[100])).await.unwrap();

    let tx = SharedTx::begin(&db).await.unwrap();
    let in_tx = DbOrderRepository::<InMemoryDatabase>::in_tx(tx.clone());
    let pending = in_tx.insert_order(&order_with("u1", &[200])).await.unwrap();

    let read = tokio::time::timeout(Duration::from_secs(2), pooled.get_order(committed))
        .await
        .expect("pooled read waited on the open transaction");
    assert_eq!(read.unwrap().id, committed);

    // Uncommitted writes stay invisible outside the transaction.
    assert!(pooled.get_order(pending).await.unwrap_err().is_not_found());
    assert_eq!(db.order_row_count(pending.into_uuid()).await, 0);

    tx.commit().await.unwrap();
    assert_eq!(pooled.get_order(pending).await.unwrap().id, pending);
}

#[tokio::test]
async fn cancelled_unit_of_work_is_rolled_back() {
    let (db, repo) = setup();
    let handle = DbHandle::Pool(db.clone());
    let order = order_with("u1", &[100]);
    let (header, items) = crate::repository::mapping::insert_params(&order).unwrap();

    let attempt = with_tx(&handle, move |q| {
        Box::pin(async move {
            let id = q
                .insert_order(header)
                .await
                .map_err(RepositoryError::store("insert_order"))?;
            q.insert_order_items(id, items)
                .await
                .map_err(RepositoryError::store("insert_order_items"))?;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(id)
        })
    });
    assert!(tokio::time::timeout(Duration::from_millis(20), attempt).await.is_err());

    // The store is usable again and holds nothing from the cancelled attempt.
    let found = repo
        .search_orders(&OrderFilter {
            owner_ids: vec!["u1".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_through_one_pool() {
    let (_db, repo) = setup();

    let mut handles = Vec::new();
    for n in 0..16 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.insert_order(&order_with(&format!("owner-{}", n % 2), &[100 + n]))
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }

    let found = repo.search_orders(&by_ids(&ids)).await.unwrap();
    assert_eq!(found.len(), 16);

    let owner_0 = repo
        .search_orders(&OrderFilter {
            owner_ids: vec!["owner-0".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(owner_0.len(), 8);
}
