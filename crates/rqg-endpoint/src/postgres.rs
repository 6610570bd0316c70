//! PostgreSQL endpoint over the v3 wire protocol.

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};

use crate::{Connector, Endpoint, EndpointError, ExecOutcome};

/// Connects to a PostgreSQL-compatible endpoint.
#[derive(Debug, Clone)]
pub struct PgConnector {
    dsn: String,
    /// Session `statement_timeout` in milliseconds, when set.
    statement_timeout_ms: Option<u64>,
}

impl PgConnector {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            statement_timeout_ms: None,
        }
    }

    pub fn with_statement_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.statement_timeout_ms = Some(timeout_ms);
        self
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn Endpoint>, EndpointError> {
        let (client, connection) = tokio_postgres::connect(&self.dsn, NoTls)
            .await
            .map_err(|e| EndpointError::Connect(e.to_string()))?;

        // The connection object drives the socket until the client drops.
        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("postgres connection terminated: {e}");
            }
        });

        if let Some(timeout_ms) = self.statement_timeout_ms {
            client
                .simple_query(&format!("SET statement_timeout = {timeout_ms}"))
                .await
                .map_err(|e| EndpointError::Connect(e.to_string()))?;
        }

        Ok(Box::new(PgEndpoint { client, task }))
    }
}

/// One PostgreSQL connection.
pub struct PgEndpoint {
    client: Client,
    task: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl Endpoint for PgEndpoint {
    async fn exec(&mut self, sql: &str) -> Result<ExecOutcome, EndpointError> {
        match self.client.simple_query(sql).await {
            Ok(messages) => {
                let rows_affected = messages
                    .iter()
                    .map(|message| match message {
                        SimpleQueryMessage::CommandComplete(rows) => *rows,
                        SimpleQueryMessage::Row(_) => 1,
                        _ => 0,
                    })
                    .sum();
                Ok(ExecOutcome::Ok { rows_affected })
            }
            Err(e) => match e.as_db_error() {
                Some(db_error) => Ok(ExecOutcome::SqlError {
                    sqlstate: db_error.code().code().to_string(),
                    message: db_error.message().to_string(),
                }),
                None => Err(EndpointError::Transport(e.to_string())),
            },
        }
    }

    async fn ping(&mut self) -> Result<(), EndpointError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| EndpointError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        self.task.abort();
    }
}
