//! Infrastructure layer: store handle, transactions, executors, repositories, config.

pub mod config;
pub mod db;
pub mod error;
pub mod repository;

pub use config::{ConfigError, DatabaseConfig};
pub use db::{Database, DbError, DbHandle, DbTransaction, SharedTx, with_tx};
pub use error::{RepositoryError, RepositoryResult};
pub use repository::{CartRepository, DbCartRepository, DbOrderRepository, OrderRepository};

#[cfg(test)]
mod integration_tests;
