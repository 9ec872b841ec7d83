//! Repository error taxonomy.
//!
//! | kind | raised when | retried here |
//! |------|-------------|--------------|
//! | `Validation` | bad input detected before any store access | never |
//! | `NotFound` | an expected row is absent or already soft/hard-deleted | never |
//! | `Store` / `Mapping` | executor failure or undecodable row, tagged with the statement | never |
//! | `Begin` / `Commit` / `RollbackFailed` | transaction management failed | never |
//! | `HandleMisuse` | the store handle cannot serve the call (programming error) | never |

use ordertx_core::DomainError;
use thiserror::Error;

use crate::db::DbError;

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    /// The targeted entity does not exist in an operable state.
    ///
    /// `op` names the statement that came back empty; every operation maps
    /// "zero rows" to this one variant.
    #[error("{op}: order not found")]
    NotFound { op: &'static str },

    #[error("{op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: DbError,
    },

    #[error("{op}: {message}")]
    Mapping { op: &'static str, message: String },

    #[error("begin transaction: {0}")]
    Begin(#[source] DbError),

    #[error("commit transaction: {0}")]
    Commit(#[source] DbError),

    /// The unit of work failed and so did the rollback that followed it.
    #[error("{source}; rollback: {rollback}")]
    RollbackFailed {
        source: Box<RepositoryError>,
        rollback: DbError,
    },

    #[error("store handle misuse: {0}")]
    HandleMisuse(String),
}

impl RepositoryError {
    pub fn not_found(op: &'static str) -> Self {
        Self::NotFound { op }
    }

    /// Closure adapter for `map_err` on executor results.
    pub fn store(op: &'static str) -> impl FnOnce(DbError) -> Self {
        move |source| Self::Store { op, source }
    }

    pub fn mapping(op: &'static str, message: impl Into<String>) -> Self {
        Self::Mapping {
            op,
            message: message.into(),
        }
    }

    /// True for not-found, including when it is joined with a rollback failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::RollbackFailed { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True for input validation failures, including when joined with a rollback failure.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation(_) => true,
            Self::RollbackFailed { source, .. } => source.is_validation(),
            _ => false,
        }
    }
}

/// Turn an affected-row count into not-found when nothing was touched.
pub(crate) fn expect_rows(op: &'static str, affected: u64) -> RepositoryResult<u64> {
    if affected == 0 {
        Err(RepositoryError::not_found(op))
    } else {
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_statement() {
        let err = RepositoryError::not_found("update_order_status");
        assert_eq!(err.to_string(), "update_order_status: order not found");
        assert!(err.is_not_found());
        assert!(!err.is_validation());
    }

    #[test]
    fn joined_rollback_failure_keeps_original_kind_visible() {
        let err = RepositoryError::RollbackFailed {
            source: Box::new(RepositoryError::not_found("delete_order_items")),
            rollback: DbError::Backend("connection reset".into()),
        };
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "delete_order_items: order not found; rollback: connection reset"
        );
    }

    #[test]
    fn validation_errors_are_reported_verbatim() {
        let err: RepositoryError = DomainError::validation("no items in order").into();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "validation failed: no items in order");
    }

    #[test]
    fn expect_rows_maps_zero_to_not_found() {
        assert_eq!(expect_rows("soft_delete_order", 1).unwrap(), 1);
        assert!(expect_rows("soft_delete_order", 0).unwrap_err().is_not_found());
    }
}
