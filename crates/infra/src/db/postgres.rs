//! PostgreSQL executor.
//!
//! Schema: `migrations/0001_orders.sql` (exported as [`SCHEMA`]).
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | DbError |
//! |------------|----------------------|---------|
//! | Database (unique violation) | `23505` | `Constraint` |
//! | Database (foreign key violation) | `23503` | `Constraint` |
//! | Database (check constraint violation) | `23514` | `Constraint` |
//! | anything else | - | `Sqlx` |
//!
//! Payload columns are `JSONB`; they are bound as text and cast, and read back
//! with `::text`, so the executor never parses JSON itself.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::queries::{
    AddCartItemParams, CartItemRow, CartQueries, InsertOrderItemParams, InsertOrderParams,
    OrderItemRow, OrderJoinRow, OrderQueries, OrderRow, SearchOrdersParams,
};
use super::{Database, DbError, DbTransaction};

/// DDL for the tables this executor reads and writes.
pub const SCHEMA: &str = include_str!("../../migrations/0001_orders.sql");

const ORDER_COLUMNS: &str = r#"
    o.id,
    o.owner_id,
    o.url,
    o.status,
    o.tags,
    o.payload::text AS payload,
    o.payload_secondary::text AS payload_secondary,
    o.price_amount,
    o.price_currency,
    o.created_at,
    o.updated_at
"#;

const ITEM_JOIN_COLUMNS: &str = r#"
    i.product_id AS item_product_id,
    i.price_amount AS item_price_amount,
    i.price_currency AS item_price_currency,
    i.created_at AS item_created_at
"#;

/// Pooled PostgreSQL connection source.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables if they do not exist yet.
    pub async fn apply_schema(&self) -> Result<(), DbError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl Database for PgDatabase {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<Self::Tx, DbError> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(PgTransaction { tx })
    }
}

/// Open PostgreSQL transaction. Rolled back by the driver if dropped unfinished.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl DbTransaction for PgTransaction {
    async fn commit(self) -> Result<(), DbError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self) -> Result<(), DbError> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl OrderQueries for PgTransaction {
    async fn insert_order(&mut self, params: InsertOrderParams) -> Result<Uuid, DbError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO orders (
                owner_id, url, status, tags, payload, payload_secondary, price_amount, price_currency
            )
            VALUES ($1, $2, $3, $4, $5::text::jsonb, $6::text::jsonb, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&params.owner_id)
        .bind(&params.url)
        .bind(&params.status)
        .bind(&params.tags)
        .bind(&params.payload)
        .bind(&params.payload_secondary)
        .bind(params.price_amount)
        .bind(&params.price_currency)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }

    async fn insert_order_items(
        &mut self,
        order_id: Uuid,
        items: Vec<InsertOrderItemParams>,
    ) -> Result<u64, DbError> {
        let mut product_ids = Vec::with_capacity(items.len());
        let mut amounts = Vec::with_capacity(items.len());
        let mut currencies = Vec::with_capacity(items.len());
        for item in items {
            product_ids.push(item.product_id);
            amounts.push(item.price_amount);
            currencies.push(item.price_currency);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO order_items (order_id, product_id, price_amount, price_currency)
            SELECT $1, t.product_id, t.price_amount, t.price_currency
            FROM UNNEST($2::uuid[], $3::numeric[], $4::text[])
                WITH ORDINALITY AS t(product_id, price_amount, price_currency, ord)
            ORDER BY t.ord
            "#,
        )
        .bind(order_id)
        .bind(&product_ids)
        .bind(&amounts)
        .bind(&currencies)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn get_order(&mut self, order_id: Uuid) -> Result<Option<OrderRow>, DbError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders o WHERE o.id = $1 AND o.deleted_at IS NULL"
        );
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)
    }

    async fn get_order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItemRow>, DbError> {
        sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT product_id, price_amount, price_currency, created_at
            FROM order_items
            WHERE order_id = $1 AND deleted_at IS NULL
            ORDER BY line_no
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)
    }

    async fn get_order_join_items(&mut self, order_id: Uuid) -> Result<Vec<OrderJoinRow>, DbError> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}, {ITEM_JOIN_COLUMNS}
            FROM orders o
            LEFT JOIN order_items i ON i.order_id = o.id AND i.deleted_at IS NULL
            WHERE o.id = $1 AND o.deleted_at IS NULL
            ORDER BY i.line_no
            "#
        );
        sqlx::query_as::<_, OrderJoinRow>(&sql)
            .bind(order_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)
    }

    async fn search_orders(&mut self, params: SearchOrdersParams) -> Result<Vec<OrderJoinRow>, DbError> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}, {ITEM_JOIN_COLUMNS}
            FROM orders o
            LEFT JOIN order_items i ON i.order_id = o.id AND i.deleted_at IS NULL
            WHERE o.deleted_at IS NULL
              AND ($1::uuid[] IS NULL OR o.id = ANY($1))
              AND ($2::text[] IS NULL OR o.owner_id = ANY($2))
              AND ($3::text[] IS NULL OR o.url LIKE ANY($3))
              AND ($4::text[] IS NULL OR o.status = ANY($4))
              AND ($5::text[] IS NULL OR o.tags && $5)
              AND ($6::timestamptz IS NULL OR o.created_at >= $6)
              AND ($7::timestamptz IS NULL OR o.created_at < $7)
              AND ($8::timestamptz IS NULL OR o.updated_at >= $8)
              AND ($9::timestamptz IS NULL OR o.updated_at < $9)
            ORDER BY o.created_at, o.id, i.line_no
            "#
        );
        sqlx::query_as::<_, OrderJoinRow>(&sql)
            .bind(&params.ids)
            .bind(&params.owner_ids)
            .bind(&params.url_patterns)
            .bind(&params.statuses)
            .bind(&params.tags)
            .bind(params.created_after)
            .bind(params.created_before)
            .bind(params.updated_after)
            .bind(params.updated_before)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)
    }

    async fn update_order_status(&mut self, order_id: Uuid, status: &str) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(order_id)
        .bind(status)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn soft_delete_order(&mut self, order_id: Uuid) -> Result<u64, DbError> {
        let result = sqlx::query(
            "UPDATE orders SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(order_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_order_items(&mut self, order_id: Uuid) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_order(&mut self, order_id: Uuid) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn soft_delete_order_item(&mut self, order_id: Uuid, product_id: Uuid) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE order_items i
            SET deleted_at = NOW()
            WHERE i.order_id = $1
              AND i.product_id = $2
              AND i.deleted_at IS NULL
              AND EXISTS (
                  SELECT 1 FROM orders o WHERE o.id = i.order_id AND o.deleted_at IS NULL
              )
            "#,
        )
        .bind(order_id)
        .bind(product_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn refresh_order_price(&mut self, order_id: Uuid) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE orders o
            SET price_amount = COALESCE(
                    (SELECT SUM(i.price_amount)
                     FROM order_items i
                     WHERE i.order_id = o.id AND i.deleted_at IS NULL),
                    0
                ),
                updated_at = NOW()
            WHERE o.id = $1 AND o.deleted_at IS NULL
            "#,
        )
        .bind(order_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CartQueries for PgTransaction {
    async fn get_cart(&mut self, owner_id: &str) -> Result<Vec<CartItemRow>, DbError> {
        sqlx::query_as::<_, CartItemRow>(
            r#"
            SELECT product_id, price_amount, price_currency, created_at
            FROM cart_items
            WHERE owner_id = $1
            ORDER BY created_at, product_id
            "#,
        )
        .bind(owner_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)
    }

    async fn add_cart_item(&mut self, params: AddCartItemParams) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO cart_items (owner_id, product_id, price_amount, price_currency)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (owner_id, product_id) DO UPDATE
                SET price_amount = EXCLUDED.price_amount,
                    price_currency = EXCLUDED.price_currency
            "#,
        )
        .bind(&params.owner_id)
        .bind(params.product_id)
        .bind(params.price_amount)
        .bind(&params.price_currency)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn delete_cart_item(&mut self, owner_id: &str, product_id: Uuid) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE owner_id = $1 AND product_id = $2")
            .bind(owner_id)
            .bind(product_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

fn map_sqlx_error(err: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code() {
            if matches!(code.as_ref(), "23505" | "23503" | "23514") {
                let constraint = db_err.constraint().unwrap_or("unnamed");
                return DbError::Constraint(format!("{constraint}: {}", db_err.message()));
            }
        }
    }
    DbError::Sqlx(err)
}
