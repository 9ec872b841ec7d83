use async_trait::async_trait;
use tracing::instrument;

use ordertx_core::{DomainError, DomainResult, ProductId};
use ordertx_orders::{Cart, CartItem};

use super::mapping;
use super::CartRepository;
use crate::db::{with_tx, AddCartItemParams, CartQueries, Database, DbHandle, SharedTx};
use crate::error::{RepositoryError, RepositoryResult};

/// Cart repository over any [`Database`].
#[derive(Debug, Clone)]
pub struct DbCartRepository<D: Database> {
    handle: DbHandle<D>,
}

impl<D: Database> DbCartRepository<D> {
    pub fn new(db: D) -> Self {
        Self {
            handle: DbHandle::Pool(db),
        }
    }

    pub fn in_tx(tx: SharedTx<D::Tx>) -> Self {
        Self {
            handle: DbHandle::Tx(tx),
        }
    }

    pub fn from_handle(handle: DbHandle<D>) -> Self {
        Self { handle }
    }
}

fn require_owner(owner_id: &str) -> DomainResult<String> {
    if owner_id.trim().is_empty() {
        return Err(DomainError::validation("ownerID is empty"));
    }
    Ok(owner_id.to_string())
}

fn require_product(product_id: ProductId) -> DomainResult<uuid::Uuid> {
    if product_id.is_nil() {
        return Err(DomainError::validation("productID is empty"));
    }
    Ok(product_id.into_uuid())
}

#[async_trait]
impl<D: Database> CartRepository for DbCartRepository<D> {
    #[instrument(skip(self), err)]
    async fn get_cart(&self, owner_id: &str) -> RepositoryResult<Cart> {
        let owner = require_owner(owner_id)?;

        let key = owner.clone();
        let rows = with_tx(&self.handle, move |q| {
            Box::pin(async move {
                q.get_cart(&key)
                    .await
                    .map_err(RepositoryError::store("get_cart"))
            })
        })
        .await?;

        let items = rows
            .into_iter()
            .map(|row| mapping::cart_item_from_row("get_cart", row))
            .collect::<RepositoryResult<_>>()?;

        Ok(Cart {
            owner_id: owner,
            items,
        })
    }

    #[instrument(skip(self, item), fields(product_id = %item.product_id), err)]
    async fn add_item(&self, owner_id: &str, item: &CartItem) -> RepositoryResult<()> {
        let owner = require_owner(owner_id)?;
        let product = require_product(item.product_id)?;

        let params = AddCartItemParams {
            owner_id: owner,
            product_id: product,
            price_amount: item.price.amount(),
            price_currency: item.price.currency().to_string(),
        };

        with_tx(&self.handle, move |q| {
            Box::pin(async move {
                q.add_cart_item(params)
                    .await
                    .map_err(RepositoryError::store("add_cart_item"))
            })
        })
        .await
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn delete_item(&self, owner_id: &str, product_id: ProductId) -> RepositoryResult<bool> {
        let owner = require_owner(owner_id)?;
        let product = require_product(product_id)?;

        let affected = with_tx(&self.handle, move |q| {
            Box::pin(async move {
                q.delete_cart_item(&owner, product)
                    .await
                    .map_err(RepositoryError::store("delete_cart_item"))
            })
        })
        .await?;

        Ok(affected > 0)
    }
}
