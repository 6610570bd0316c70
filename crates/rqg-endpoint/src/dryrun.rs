//! Dry-run endpoint: no database, keyword-level validation only.

use async_trait::async_trait;

use crate::{Connector, Endpoint, EndpointError, ExecOutcome};

const VALID_STARTS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TRUNCATE", "WITH",
    "BEGIN", "START", "COMMIT", "ROLLBACK", "SAVEPOINT", "SET", "GRANT", "REVOKE", "EXPLAIN",
    "VACUUM", "ANALYZE", "COMMENT", "REINDEX", "CLUSTER", "CALL",
];

/// Produces [`DryRunEndpoint`]s.
#[derive(Debug, Clone, Default)]
pub struct DryRunConnector;

#[async_trait]
impl Connector for DryRunConnector {
    async fn connect(&self) -> Result<Box<dyn Endpoint>, EndpointError> {
        Ok(Box::new(DryRunEndpoint))
    }
}

/// Accepts every statement that begins with a known SQL keyword and
/// reports success without touching a database.
pub struct DryRunEndpoint;

#[async_trait]
impl Endpoint for DryRunEndpoint {
    async fn exec(&mut self, sql: &str) -> Result<ExecOutcome, EndpointError> {
        let first_word = sql
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        if VALID_STARTS.contains(&first_word.as_str()) {
            Ok(ExecOutcome::Ok { rows_affected: 0 })
        } else {
            Ok(ExecOutcome::SqlError {
                sqlstate: "42601".to_string(),
                message: format!("statement does not begin with a SQL keyword: {first_word:?}"),
            })
        }
    }

    async fn ping(&mut self) -> Result<(), EndpointError> {
        Ok(())
    }

    async fn close(&mut self) {}
}
