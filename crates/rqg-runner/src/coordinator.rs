//! Execution coordinator: per-worker executor connections, the DDL
//! barrier, transport retry with backoff, and error classification.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rqg_endpoint::{Connector, Endpoint, EndpointError, ExecOutcome};
use rqg_schema::{SchemaError, SchemaView};
use tokio::sync::{mpsc, watch};

use crate::error::RunnerError;
use crate::pool::QueryRecord;
use crate::stats::{ErrorKind, RunStats};

const BACKOFF_INITIAL: Duration = Duration::from_millis(50);
const BACKOFF_MAX: Duration = Duration::from_secs(2);
const RECONNECT_ATTEMPTS: u32 = 8;

/// Statements that must run serially with every DML drained.
const DDL_KEYWORDS: &[&str] = &[
    "CREATE", "ALTER", "DROP", "TRUNCATE", "COMMENT", "GRANT", "REVOKE", "REINDEX", "CLUSTER",
];

/// Whether a statement is DDL: its first keyword (after whitespace and
/// comments) is schema-changing. `VACUUM` counts only as `VACUUM FULL`.
pub fn is_ddl(sql: &str) -> bool {
    let stripped = strip_leading_trivia(sql);
    let mut words = stripped.split_whitespace();
    let Some(first) = words.next() else {
        return false;
    };
    let first = first.to_ascii_uppercase();
    if DDL_KEYWORDS.contains(&first.as_str()) {
        return true;
    }
    if first == "VACUUM" {
        return words
            .next()
            .is_some_and(|word| word.eq_ignore_ascii_case("FULL"));
    }
    false
}

/// Skip leading whitespace and `--` / `/* */` comments.
fn strip_leading_trivia(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = match after.find('\n') {
                Some(newline) => &after[newline + 1..],
                None => "",
            };
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = match after.find("*/") {
                Some(close) => &after[close + 2..],
                None => "",
            };
        } else {
            return trimmed;
        }
    }
}

/// Rebuilds the schema snapshot after a successful DDL.
#[async_trait]
pub trait SchemaReloader: Send + Sync {
    async fn reload(&self) -> Result<SchemaView, SchemaError>;
}

/// DDL barrier states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BarrierState {
    Running,
    Draining,
    Ddl,
    Resuming,
}

#[derive(Clone)]
pub struct CoordinatorConfig {
    /// Executor connections; one per generation worker.
    pub executors: u32,
    /// When false, the first SQL error raises the stop flag.
    pub continue_on_error: bool,
}

struct ExecAck {
    fatal: Option<String>,
}

/// Consume records, execute DML through the executor pool and DDL through a
/// dedicated connection, never letting the two overlap.
#[allow(clippy::too_many_arguments)]
pub async fn run_coordinator(
    mut rx: mpsc::Receiver<QueryRecord>,
    connector: Arc<dyn Connector>,
    config: CoordinatorConfig,
    stats: Arc<RunStats>,
    stop: Arc<AtomicBool>,
    hard_stop: Arc<AtomicBool>,
    schema: Option<(watch::Sender<Arc<SchemaView>>, Arc<dyn SchemaReloader>)>,
    mut output: Option<Box<dyn Write + Send>>,
) -> Result<(), RunnerError> {
    let executors = config.executors.max(1) as usize;
    // In-flight work is bounded by the executor queues, so the ack channel
    // can be unbounded without risking growth; a bounded one could deadlock
    // against a blocked dispatch.
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<ExecAck>();
    let mut exec_txs = Vec::with_capacity(executors);
    for executor in 0..executors {
        let (tx, rx) = mpsc::channel::<QueryRecord>(4);
        exec_txs.push(tx);
        tokio::spawn(executor_task(
            executor as u32,
            Arc::clone(&connector),
            rx,
            ack_tx.clone(),
            Arc::clone(&stats),
            Arc::clone(&stop),
            config.continue_on_error,
        ));
    }
    drop(ack_tx);

    // Dedicated DDL connection, opened up front so an unreachable endpoint
    // fails the run before any generation is wasted.
    let mut ddl_endpoint = connect_with_backoff(connector.as_ref()).await?;

    let mut state = BarrierState::Running;
    let mut in_flight = 0u64;
    let mut fatal: Option<RunnerError> = None;

    while let Some(record) = rx.recv().await {
        // Collect any acks that are already waiting.
        while let Ok(ack) = ack_rx.try_recv() {
            in_flight -= 1;
            if let Some(message) = ack.fatal {
                fatal = Some(RunnerError::Unreachable(message));
            }
        }
        if fatal.is_some() || hard_stop.load(Ordering::Relaxed) {
            break;
        }

        if let Some(out) = output.as_mut() {
            writeln!(out, "{}", record.text)?;
        }

        if is_ddl(&record.text) {
            state = BarrierState::Draining;
            tracing::debug!(?state, in_flight, "barrier: DDL dequeued");
            while in_flight > 0 {
                match ack_rx.recv().await {
                    Some(ack) => {
                        in_flight -= 1;
                        if let Some(message) = ack.fatal {
                            fatal = Some(RunnerError::Unreachable(message));
                        }
                    }
                    None => break,
                }
            }
            if fatal.is_some() {
                break;
            }

            state = BarrierState::Ddl;
            tracing::debug!(?state, "barrier: executing DDL serially");
            match execute_with_reconnect(connector.as_ref(), &mut ddl_endpoint, &record.text).await
            {
                Ok(outcome) => {
                    record_outcome(&stats, &record, &outcome, config.continue_on_error, &stop);
                    if let (ExecOutcome::Ok { .. }, Some((schema_tx, reloader))) =
                        (&outcome, &schema)
                    {
                        match reloader.reload().await {
                            Ok(view) => {
                                schema_tx.send_replace(Arc::new(view));
                                tracing::debug!("schema snapshot rebuilt after DDL");
                            }
                            Err(e) => {
                                stats.record_error(&ErrorKind::Schema, &e.to_string());
                                schema_tx.send_replace(Arc::new(SchemaView::empty()));
                                tracing::warn!("schema rebuild failed, degrading to an empty snapshot: {e}");
                            }
                        }
                    }
                }
                Err(e) => {
                    fatal = Some(RunnerError::Unreachable(e.to_string()));
                    break;
                }
            }
            state = BarrierState::Resuming;
            tracing::trace!(?state, "barrier: releasing workers");
            state = BarrierState::Running;
        } else {
            debug_assert_eq!(state, BarrierState::Running);
            let slot = record.worker_id as usize % exec_txs.len();
            if exec_txs[slot].send(record).await.is_err() {
                fatal = Some(RunnerError::Unreachable("executor exited".to_string()));
                break;
            }
            in_flight += 1;
        }
    }

    // Let executors finish what they hold, then wait for their acks.
    drop(exec_txs);
    if !hard_stop.load(Ordering::Relaxed) {
        while in_flight > 0 {
            match ack_rx.recv().await {
                Some(ack) => {
                    in_flight -= 1;
                    if let Some(message) = ack.fatal {
                        fatal = Some(RunnerError::Unreachable(message));
                    }
                }
                None => break,
            }
        }
    }
    ddl_endpoint.close().await;

    match fatal {
        Some(error) => Err(error),
        None if hard_stop.load(Ordering::Relaxed) => Err(RunnerError::Cancelled),
        None => Ok(()),
    }
}

/// Drain records without executing them: dry-run and generate-only modes.
/// Returns the number of records consumed.
pub async fn drain_records(
    mut rx: mpsc::Receiver<QueryRecord>,
    mut output: Option<Box<dyn Write + Send>>,
) -> Result<u64, RunnerError> {
    let mut consumed = 0u64;
    while let Some(record) = rx.recv().await {
        if let Some(out) = output.as_mut() {
            writeln!(out, "{}", record.text)?;
        }
        consumed += 1;
    }
    if let Some(out) = output.as_mut() {
        out.flush()?;
    }
    Ok(consumed)
}

async fn executor_task(
    executor: u32,
    connector: Arc<dyn Connector>,
    mut rx: mpsc::Receiver<QueryRecord>,
    ack_tx: mpsc::UnboundedSender<ExecAck>,
    stats: Arc<RunStats>,
    stop: Arc<AtomicBool>,
    continue_on_error: bool,
) {
    let mut endpoint: Option<Box<dyn Endpoint>> = None;
    while let Some(record) = rx.recv().await {
        let first_try = match endpoint.as_mut() {
            Some(open) => Some(open.exec(&record.text).await),
            None => None,
        };
        let result = match first_try {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(first_error)) => {
                // The connection died mid-statement; rebuild and retry
                // transparently.
                tracing::warn!(executor, "connection lost, reconnecting: {first_error}");
                endpoint = None;
                execute_with_fresh_connection(connector.as_ref(), &mut endpoint, &record.text)
                    .await
            }
            None => {
                execute_with_fresh_connection(connector.as_ref(), &mut endpoint, &record.text)
                    .await
            }
        };

        let fatal = match result {
            Ok(outcome) => {
                record_outcome(&stats, &record, &outcome, continue_on_error, &stop);
                None
            }
            Err(e) => {
                stats.record_error(&ErrorKind::Conn, &e.to_string());
                stop.store(true, Ordering::Relaxed);
                Some(e.to_string())
            }
        };
        let is_fatal = fatal.is_some();
        if ack_tx.send(ExecAck { fatal }).is_err() || is_fatal {
            break;
        }
    }
    if let Some(mut open) = endpoint {
        open.close().await;
    }
}

fn record_outcome(
    stats: &RunStats,
    record: &QueryRecord,
    outcome: &ExecOutcome,
    continue_on_error: bool,
    stop: &AtomicBool,
) {
    stats.executed.fetch_add(1, Ordering::Relaxed);
    stats
        .bytes_out
        .fetch_add(record.text.len() as u64, Ordering::Relaxed);
    match outcome {
        ExecOutcome::Ok { .. } => {
            stats.ok.fetch_add(1, Ordering::Relaxed);
        }
        ExecOutcome::SqlError { sqlstate, message } => {
            stats.record_error(&ErrorKind::from_sqlstate(sqlstate), message);
            if !continue_on_error {
                tracing::error!(sqlstate, "SQL error with continue_on_error=false, stopping");
                stop.store(true, Ordering::Relaxed);
            }
        }
    }
}

async fn connect_with_backoff(
    connector: &dyn Connector,
) -> Result<Box<dyn Endpoint>, RunnerError> {
    let mut delay = BACKOFF_INITIAL;
    let mut last_error = String::new();
    for attempt in 0..RECONNECT_ATTEMPTS {
        match connector.connect().await {
            Ok(endpoint) => return Ok(endpoint),
            Err(e) => {
                last_error = e.to_string();
                tracing::warn!(attempt, "connect failed, backing off {delay:?}: {e}");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(BACKOFF_MAX);
            }
        }
    }
    Err(RunnerError::Unreachable(last_error))
}

/// Reconnect (with capped exponential backoff) and execute one statement.
async fn execute_with_fresh_connection(
    connector: &dyn Connector,
    endpoint: &mut Option<Box<dyn Endpoint>>,
    sql: &str,
) -> Result<ExecOutcome, EndpointError> {
    let mut delay = BACKOFF_INITIAL;
    let mut last_error = EndpointError::Connect("no attempt made".to_string());
    for _ in 0..RECONNECT_ATTEMPTS {
        if endpoint.is_none() {
            match connector.connect().await {
                Ok(open) => *endpoint = Some(open),
                Err(e) => {
                    last_error = e;
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(BACKOFF_MAX);
                    continue;
                }
            }
        }
        if let Some(open) = endpoint.as_mut() {
            match open.exec(sql).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    last_error = e;
                    *endpoint = None;
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(BACKOFF_MAX);
                }
            }
        }
    }
    Err(last_error)
}

/// Reuse an open endpoint, reconnecting on transport failure.
async fn execute_with_reconnect(
    connector: &dyn Connector,
    endpoint: &mut Box<dyn Endpoint>,
    sql: &str,
) -> Result<ExecOutcome, EndpointError> {
    match endpoint.exec(sql).await {
        Ok(outcome) => Ok(outcome),
        Err(first_error) => {
            tracing::warn!("DDL connection lost, reconnecting: {first_error}");
            let mut replacement = None;
            let outcome = execute_with_fresh_connection(connector, &mut replacement, sql).await?;
            if let Some(open) = replacement {
                *endpoint = open;
            }
            Ok(outcome)
        }
    }
}
