//! Run a unit of work inside a transaction.

use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::{Database, DbError, DbHandle, DbTransaction};
use crate::error::{RepositoryError, RepositoryResult};

/// Run `work` against the transaction behind `handle` and return its result.
///
/// - `DbHandle::Tx`: `work` runs inside the caller's transaction, which is
///   neither committed nor rolled back here. A transaction its owner already
///   finished yields `HandleMisuse`.
/// - `DbHandle::Pool`: a transaction is opened, committed when `work`
///   succeeds and rolled back when it fails. The error from `work` is returned
///   as-is; a rollback that fails because the transaction is already closed is
///   ignored, any other rollback failure is joined to it.
///
/// Dropping the returned future drops the open transaction, which discards
/// its writes.
///
/// `work` borrows the transaction only for the duration of its future, so it
/// must capture owned data:
///
/// ```ignore
/// with_tx(&handle, move |q| Box::pin(async move {
///     q.soft_delete_order(id).await.map_err(RepositoryError::store("soft_delete_order"))
/// })).await
/// ```
pub async fn with_tx<D, T, F>(handle: &DbHandle<D>, work: F) -> RepositoryResult<T>
where
    D: Database,
    T: Send,
    F: for<'t> FnOnce(&'t mut D::Tx) -> BoxFuture<'t, RepositoryResult<T>> + Send,
{
    match handle {
        DbHandle::Tx(shared) => {
            let mut guard = shared.lock().await;
            let tx = guard.as_mut().ok_or_else(|| {
                RepositoryError::HandleMisuse("shared transaction was already finished".to_string())
            })?;
            work(tx).await
        }
        DbHandle::Pool(db) => {
            let mut tx = db.begin().await.map_err(RepositoryError::Begin)?;
            debug!("transaction started");

            match work(&mut tx).await {
                Ok(value) => {
                    tx.commit().await.map_err(RepositoryError::Commit)?;
                    debug!("transaction committed");
                    Ok(value)
                }
                Err(err) => match tx.rollback().await {
                    // Only the in-memory executor reports TxClosed; sqlx owns its transaction state.
                    Ok(()) | Err(DbError::TxClosed) => {
                        debug!(error = %err, "transaction rolled back");
                        Err(err)
                    }
                    Err(rollback) => {
                        warn!(error = %err, rollback_error = %rollback, "rollback failed");
                        Err(RepositoryError::RollbackFailed {
                            source: Box::new(err),
                            rollback,
                        })
                    }
                },
            }
        }
    }
}
