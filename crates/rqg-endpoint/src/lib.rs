//! Thin endpoint adapters for SQL execution.
//!
//! The execution coordinator talks to the target database only through the
//! [`Endpoint`] trait: `exec`, `ping`, `close`. SQL-level failures come back
//! as [`ExecOutcome::SqlError`] with their SQLSTATE; transport failures come
//! back as [`EndpointError`] and are the retryable class.

pub mod dryrun;
pub mod postgres;
pub mod testing;

use async_trait::async_trait;

pub use dryrun::DryRunConnector;
pub use postgres::PgConnector;

/// Transport-level failure; subject to reconnect-and-retry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EndpointError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport failed: {0}")]
    Transport(String),
}

/// Result of executing one statement.
#[derive(Debug, Clone)]
pub enum ExecOutcome {
    Ok {
        rows_affected: u64,
    },
    /// The endpoint reported a SQL error; never retried.
    SqlError {
        sqlstate: String,
        message: String,
    },
}

/// One live connection to a SQL target.
#[async_trait]
pub trait Endpoint: Send {
    async fn exec(&mut self, sql: &str) -> Result<ExecOutcome, EndpointError>;
    async fn ping(&mut self) -> Result<(), EndpointError>;
    async fn close(&mut self);
}

/// Opens connections; one per worker plus one dedicated DDL connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Endpoint>, EndpointError>;
}
