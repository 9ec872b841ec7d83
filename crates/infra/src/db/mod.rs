//! Store handle, transactions, and query executors.
//!
//! A repository is built over a [`DbHandle`]: either a pooled [`Database`] that
//! opens one transaction per call, or a [`SharedTx`] owned by the caller so
//! several repository calls can be composed into one unit of work.
//!
//! Two executors implement the capability traits:
//! - [`postgres::PgDatabase`] (`sqlx`, PostgreSQL)
//! - [`in_memory::InMemoryDatabase`] (tests/dev, same observable semantics)

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

pub mod in_memory;
pub mod postgres;
pub mod queries;
pub mod tx;

pub use in_memory::{InMemoryDatabase, InMemoryTransaction, Statement};
pub use postgres::{PgDatabase, PgTransaction};
pub use queries::{
    AddCartItemParams, CartItemRow, CartQueries, InsertOrderItemParams, InsertOrderParams,
    OrderItemRow, OrderJoinRow, OrderQueries, OrderRow, SearchOrdersParams,
};
pub use tx::with_tx;

/// Failure reported by a query executor.
///
/// The repository wraps these with the statement name and never interprets
/// them beyond "already closed" on rollback.
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("{0}")]
    Backend(String),

    #[error("transaction already closed")]
    TxClosed,
}

/// A pooled connection source.
#[async_trait]
pub trait Database: Clone + Send + Sync + 'static {
    type Tx: DbTransaction;

    async fn begin(&self) -> Result<Self::Tx, DbError>;
}

/// An open transaction able to run every statement the repositories need.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait DbTransaction: OrderQueries + CartQueries + Send + 'static {
    async fn commit(self) -> Result<(), DbError>;

    async fn rollback(self) -> Result<(), DbError>;
}

/// A transaction owned by the caller and lent to repositories.
///
/// Repositories built over a shared transaction never commit or roll it back;
/// the owner finishes it with [`SharedTx::commit`] or [`SharedTx::rollback`].
/// Calls through clones serialise on an async mutex.
pub struct SharedTx<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for SharedTx<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for SharedTx<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTx").finish_non_exhaustive()
    }
}

impl<T: DbTransaction> SharedTx<T> {
    pub fn new(tx: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Open a transaction on `db` and wrap it for sharing.
    pub async fn begin<D>(db: &D) -> Result<Self, DbError>
    where
        D: Database<Tx = T>,
    {
        Ok(Self::new(db.begin().await?))
    }

    pub async fn commit(&self) -> Result<(), DbError> {
        let tx = self.inner.lock().await.take().ok_or(DbError::TxClosed)?;
        tx.commit().await
    }

    pub async fn rollback(&self) -> Result<(), DbError> {
        let tx = self.inner.lock().await.take().ok_or(DbError::TxClosed)?;
        tx.rollback().await
    }

    pub async fn is_finished(&self) -> bool {
        self.inner.lock().await.is_none()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.inner.lock().await
    }
}

/// Dual-mode store handle.
pub enum DbHandle<D: Database> {
    /// Open (and finish) a transaction per repository call.
    Pool(D),
    /// Run inside a transaction owned by the caller.
    Tx(SharedTx<D::Tx>),
}

impl<D: Database> Clone for DbHandle<D> {
    fn clone(&self) -> Self {
        match self {
            Self::Pool(db) => Self::Pool(db.clone()),
            Self::Tx(tx) => Self::Tx(tx.clone()),
        }
    }
}

impl<D: Database> std::fmt::Debug for DbHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pool(_) => f.write_str("DbHandle::Pool"),
            Self::Tx(_) => f.write_str("DbHandle::Tx"),
        }
    }
}
