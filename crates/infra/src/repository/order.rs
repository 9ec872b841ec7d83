use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

use ordertx_core::{DomainError, DomainResult, OrderId, ProductId};
use ordertx_orders::{Order, OrderFilter, OrderStatus};

use super::mapping;
use super::OrderRepository;
use crate::db::{with_tx, Database, DbHandle, OrderQueries, SharedTx};
use crate::error::{expect_rows, RepositoryError, RepositoryResult};

/// Order repository over any [`Database`].
#[derive(Debug, Clone)]
pub struct DbOrderRepository<D: Database> {
    handle: DbHandle<D>,
}

impl<D: Database> DbOrderRepository<D> {
    /// Each call opens and finishes its own transaction.
    pub fn new(db: D) -> Self {
        Self {
            handle: DbHandle::Pool(db),
        }
    }

    /// Each call runs inside `tx`; the caller commits or rolls back.
    pub fn in_tx(tx: SharedTx<D::Tx>) -> Self {
        Self {
            handle: DbHandle::Tx(tx),
        }
    }

    pub fn from_handle(handle: DbHandle<D>) -> Self {
        Self { handle }
    }
}

fn require_order_id(order_id: OrderId) -> DomainResult<Uuid> {
    if order_id.is_nil() {
        return Err(DomainError::validation("orderID is empty"));
    }
    Ok(order_id.into_uuid())
}

fn require_product_id(product_id: ProductId) -> DomainResult<Uuid> {
    if product_id.is_nil() {
        return Err(DomainError::validation("productID is empty"));
    }
    Ok(product_id.into_uuid())
}

#[async_trait]
impl<D: Database> OrderRepository for DbOrderRepository<D> {
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn get_order(&self, order_id: OrderId) -> RepositoryResult<Order> {
        let id = order_id.into_uuid();
        with_tx(&self.handle, move |q| {
            Box::pin(async move {
                let row = q
                    .get_order(id)
                    .await
                    .map_err(RepositoryError::store("get_order"))?
                    .ok_or_else(|| RepositoryError::not_found("get_order"))?;

                let items = q
                    .get_order_items(id)
                    .await
                    .map_err(RepositoryError::store("get_order_items"))?;

                mapping::assemble_order("get_order", row, items)
            })
        })
        .await
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn get_order_join(&self, order_id: OrderId) -> RepositoryResult<Order> {
        let id = order_id.into_uuid();
        let rows = with_tx(&self.handle, move |q| {
            Box::pin(async move {
                q.get_order_join_items(id)
                    .await
                    .map_err(RepositoryError::store("get_order_join_items"))
            })
        })
        .await?;

        mapping::group_order_rows("get_order_join_items", rows)?
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::not_found("get_order_join_items"))
    }

    #[instrument(
        skip(self, order),
        fields(owner_id = %order.owner_id, item_count = order.items.len()),
        err
    )]
    async fn insert_order(&self, order: &Order) -> RepositoryResult<OrderId> {
        order.validate_new()?;
        let (header, items) = mapping::insert_params(order)?;

        let id = with_tx(&self.handle, move |q| {
            Box::pin(async move {
                let id = q
                    .insert_order(header)
                    .await
                    .map_err(RepositoryError::store("insert_order"))?;

                q.insert_order_items(id, items)
                    .await
                    .map_err(RepositoryError::store("insert_order_items"))?;

                Ok(id)
            })
        })
        .await?;

        Ok(OrderId::from_uuid(id))
    }

    #[instrument(skip(self, filter), err)]
    async fn search_orders(&self, filter: &OrderFilter) -> RepositoryResult<Vec<Order>> {
        filter.validate()?;
        let params = mapping::search_params(filter);

        let rows = with_tx(&self.handle, move |q| {
            Box::pin(async move {
                q.search_orders(params)
                    .await
                    .map_err(RepositoryError::store("search_orders"))
            })
        })
        .await?;

        let orders = mapping::group_order_rows("search_orders", rows)?;
        tracing::debug!(order_count = orders.len(), "search complete");
        Ok(orders)
    }

    #[instrument(skip(self), fields(order_id = %order_id, status = %status), err)]
    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> RepositoryResult<()> {
        let id = require_order_id(order_id)?;

        with_tx(&self.handle, move |q| {
            Box::pin(async move {
                let affected = q
                    .update_order_status(id, status.as_str())
                    .await
                    .map_err(RepositoryError::store("update_order_status"))?;
                expect_rows("update_order_status", affected)?;
                Ok(())
            })
        })
        .await
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn soft_delete_order(&self, order_id: OrderId) -> RepositoryResult<()> {
        let id = require_order_id(order_id)?;

        with_tx(&self.handle, move |q| {
            Box::pin(async move {
                let affected = q
                    .soft_delete_order(id)
                    .await
                    .map_err(RepositoryError::store("soft_delete_order"))?;
                expect_rows("soft_delete_order", affected)?;
                Ok(())
            })
        })
        .await
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn delete_order(&self, order_id: OrderId) -> RepositoryResult<()> {
        let id = require_order_id(order_id)?;

        with_tx(&self.handle, move |q| {
            Box::pin(async move {
                let affected = q
                    .delete_order_items(id)
                    .await
                    .map_err(RepositoryError::store("delete_order_items"))?;
                expect_rows("delete_order_items", affected)?;

                let affected = q
                    .delete_order(id)
                    .await
                    .map_err(RepositoryError::store("delete_order"))?;
                expect_rows("delete_order", affected)?;
                Ok(())
            })
        })
        .await
    }

    #[instrument(skip(self), fields(order_id = %order_id, product_id = %product_id), err)]
    async fn soft_delete_order_item(&self, order_id: OrderId, product_id: ProductId) -> RepositoryResult<()> {
        let id = require_order_id(order_id)?;
        let product = require_product_id(product_id)?;

        with_tx(&self.handle, move |q| {
            Box::pin(async move {
                let affected = q
                    .soft_delete_order_item(id, product)
                    .await
                    .map_err(RepositoryError::store("soft_delete_order_item"))?;
                expect_rows("soft_delete_order_item", affected)?;

                let affected = q
                    .refresh_order_price(id)
                    .await
                    .map_err(RepositoryError::store("refresh_order_price"))?;
                expect_rows("refresh_order_price", affected)?;
                Ok(())
            })
        })
        .await
    }
}
