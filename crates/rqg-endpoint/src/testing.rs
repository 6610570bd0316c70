//! Recording endpoint for execution tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{Connector, Endpoint, EndpointError, ExecOutcome};

/// One executed statement with its execution interval.
#[derive(Debug, Clone)]
pub struct ExecSpan {
    pub sql: String,
    pub started: Instant,
    pub finished: Instant,
}

impl ExecSpan {
    /// Whether two execution intervals overlap in time.
    pub fn overlaps(&self, other: &ExecSpan) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

/// Shared log of every statement executed through recording endpoints.
pub type ExecLog = Arc<Mutex<Vec<ExecSpan>>>;

/// Connector whose endpoints append every execution to a shared log.
///
/// A configurable per-statement latency widens the execution window so that
/// overlap assertions in concurrency tests are meaningful.
#[derive(Clone)]
pub struct RecordingConnector {
    log: ExecLog,
    latency: Duration,
}

impl RecordingConnector {
    pub fn new(latency: Duration) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            latency,
        }
    }

    pub fn log(&self) -> ExecLog {
        Arc::clone(&self.log)
    }

    /// Snapshot of the spans recorded so far.
    pub fn spans(&self) -> Vec<ExecSpan> {
        self.log.lock().expect("exec log lock").clone()
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn connect(&self) -> Result<Box<dyn Endpoint>, EndpointError> {
        Ok(Box::new(RecordingEndpoint {
            log: Arc::clone(&self.log),
            latency: self.latency,
        }))
    }
}

pub struct RecordingEndpoint {
    log: ExecLog,
    latency: Duration,
}

#[async_trait]
impl Endpoint for RecordingEndpoint {
    async fn exec(&mut self, sql: &str) -> Result<ExecOutcome, EndpointError> {
        let started = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let finished = Instant::now();
        self.log.lock().expect("exec log lock").push(ExecSpan {
            sql: sql.to_string(),
            started,
            finished,
        });
        Ok(ExecOutcome::Ok { rows_affected: 0 })
    }

    async fn ping(&mut self) -> Result<(), EndpointError> {
        Ok(())
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_execution_spans() {
        let connector = RecordingConnector::new(Duration::from_millis(1));
        let mut endpoint = connector.connect().await.unwrap();
        endpoint.exec("SELECT 1").await.unwrap();
        endpoint.exec("SELECT 2").await.unwrap();
        let spans = connector.spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].sql, "SELECT 1");
        assert!(spans[0].finished <= spans[1].started || !spans[0].overlaps(&spans[1]));
    }
}
