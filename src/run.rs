//! Run orchestration: wire the schema, workers, coordinator, checkpointing
//! and reporting together for one run.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_postgres::NoTls;
use tracing::{info, warn};

use rqg_endpoint::{Connector, DryRunConnector, PgConnector};
use rqg_grammar::{ExpandConfig, Grammar};
use rqg_runner::checkpoint::spawn_checkpoint_writer;
use rqg_runner::report::StdoutSink;
use rqg_runner::{
    drain_records, partition, run_coordinator, spawn_workers, Checkpoint, CoordinatorConfig,
    FixupHook, PoolConfig, QueryRecord, ReportSink, Reporter, RunStats, RunSummary,
    SchemaReloader,
};
use rqg_schema::{introspect_schema, parse_ddl, SchemaError, SchemaView};
use rqg_unique::{RotatingFilter, UniquenessConfig};

use crate::config::{OutputSinkKind, RunConfig, SchemaMode, UniquenessMode};
use crate::error::RunError;

/// Execute one run of `grammar` under `config`.
///
/// With a DSN the generated stream is executed through the coordinator;
/// without one this is a dry run that only generates (and optionally writes)
/// queries. Returns the final summary, which is also emitted through the
/// report sink.
pub async fn run(
    config: &RunConfig,
    grammar: Grammar,
    fixup: Option<FixupHook>,
) -> Result<RunSummary, RunError> {
    config.validate()?;

    let grammar = match &config.entry_rule {
        Some(entry) => grammar.with_entry(entry.clone())?,
        None => grammar,
    };
    let seed = match config.seed {
        Some(seed) => seed,
        None => {
            let seed: u64 = rand::random();
            info!(seed, "no seed configured; drew one at random");
            seed
        }
    };
    let workers = config.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4)
    });

    let (schema_view, reloader) = load_schema(config).await?;
    let schema_fingerprint = schema_view.fingerprint();
    info!(
        grammar = grammar.name(),
        workers,
        seed,
        tables = schema_view.len(),
        "starting run"
    );

    // Resume state.
    let mut resume_done = vec![0u64; workers as usize];
    let mut started_checkpoint =
        Checkpoint::new(seed, config.count, workers, schema_fingerprint.clone());
    if let Some(path) = &config.checkpoint.path {
        if path.exists() {
            let previous = Checkpoint::load(path).map_err(|e| RunError::Checkpoint(e.to_string()))?;
            if previous.master_seed != seed
                || previous.workers != workers
                || previous.total != config.count
            {
                return Err(RunError::Checkpoint(format!(
                    "checkpoint at {} was written by a different run configuration",
                    path.display()
                )));
            }
            if previous.schema_fingerprint != schema_fingerprint {
                warn!("schema changed since the checkpoint was written; resuming anyway");
            }
            let total_done: u64 = previous.done.iter().sum();
            info!(total_done, "resuming from checkpoint");
            resume_done = previous.done.clone();
            started_checkpoint = previous;
        }
    }

    let (schema_tx, schema_rx) = watch::channel(Arc::new(schema_view));
    let unique = match config.uniqueness.mode {
        UniquenessMode::Off => None,
        UniquenessMode::Probabilistic => Some(Arc::new(RotatingFilter::new(UniquenessConfig {
            capacity: config.uniqueness.capacity,
            target_fpr: config.uniqueness.fpr,
            ..UniquenessConfig::default()
        }))),
    };
    let stats = Arc::new(RunStats::default());
    let stop = Arc::new(AtomicBool::new(false));
    let hard_stop = Arc::new(AtomicBool::new(false));
    let user_cancelled = Arc::new(AtomicBool::new(false));
    let done: Arc<Vec<AtomicU64>> =
        Arc::new(resume_done.iter().map(|d| AtomicU64::new(*d)).collect());

    let signal_task = spawn_signal_handler(
        Arc::clone(&stop),
        Arc::clone(&hard_stop),
        Arc::clone(&user_cancelled),
    );

    let deadline = config
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let retry_cap = unique
        .as_ref()
        .map(|filter| filter.config().retry_cap)
        .unwrap_or(0);
    let channel_capacity = (config.batch * 2).clamp(1024, 65_536) as usize;
    let (tx, rx) = mpsc::channel::<QueryRecord>(channel_capacity);

    let worker_handles = spawn_workers(
        Arc::new(grammar),
        partition(config.count, workers),
        resume_done,
        schema_rx,
        unique.clone(),
        tx,
        Arc::clone(&stop),
        Arc::clone(&done),
        Arc::clone(&stats),
        PoolConfig {
            master_seed: seed,
            batch: config.batch,
            expand: ExpandConfig {
                max_depth: config.max_depth,
                repeat_cap: config.repeat_cap,
            },
            retry_cap,
            deadline,
            fixup,
        },
    );

    let checkpoint_task = config.checkpoint.path.as_ref().map(|path| {
        spawn_checkpoint_writer(
            path.clone(),
            config.checkpoint.every,
            started_checkpoint,
            Arc::clone(&done),
            Arc::clone(&stop),
        )
    });
    let reporter = Reporter::spawn(
        Arc::clone(&stats),
        unique.clone(),
        Box::new(StdoutSink),
        Duration::from_secs(config.report_interval_secs.max(1)),
        Arc::clone(&stop),
    );

    let output = open_output(config)?;
    let consumer_result: Result<(), RunError> = match &config.dsn {
        Some(dsn) => {
            let mut pg = PgConnector::new(dsn.clone());
            if let Some(timeout_ms) = config.statement_timeout_ms {
                pg = pg.with_statement_timeout_ms(timeout_ms);
            }
            let connector: Arc<dyn Connector> = Arc::new(pg);
            let schema_pair = reloader.map(|reloader| (schema_tx, reloader));
            run_coordinator(
                rx,
                connector,
                CoordinatorConfig {
                    executors: workers,
                    continue_on_error: config.continue_on_error,
                },
                Arc::clone(&stats),
                Arc::clone(&stop),
                Arc::clone(&hard_stop),
                schema_pair,
                output,
            )
            .await
            .map_err(RunError::from)
        }
        None => drain_records(rx, output)
            .await
            .map(|consumed| {
                info!(consumed, "dry run complete");
            })
            .map_err(RunError::from),
    };

    // Workers end once the channel is gone or their ranges are exhausted.
    let _ = tokio::task::spawn_blocking(move || {
        for handle in worker_handles {
            let _ = handle.join();
        }
    })
    .await;

    stop.store(true, Ordering::Relaxed);
    if let Some(task) = checkpoint_task {
        let _ = task.await;
    }
    let mut sink: Box<dyn ReportSink> = match reporter.await {
        Ok(sink) => sink,
        Err(_) => Box::new(StdoutSink),
    };
    signal_task.abort();

    let summary = RunSummary::from_stats(&stats);
    sink.summary(&summary);

    consumer_result?;
    if user_cancelled.load(Ordering::Relaxed) {
        return Err(RunError::Cancelled);
    }
    Ok(summary)
}

async fn load_schema(
    config: &RunConfig,
) -> Result<(SchemaView, Option<Arc<dyn SchemaReloader>>), RunError> {
    match config.schema.mode {
        SchemaMode::None => Ok((SchemaView::empty(), None)),
        SchemaMode::DdlFile => {
            let source = config
                .schema
                .source
                .as_ref()
                .ok_or_else(|| RunError::Config("schema.source not set".to_string()))?;
            let script = std::fs::read_to_string(Path::new(source))?;
            Ok((parse_ddl(&script)?, None))
        }
        SchemaMode::Introspect => {
            let dsn = config
                .schema
                .source
                .clone()
                .or_else(|| config.dsn.clone())
                .ok_or_else(|| RunError::Config("schema.source not set".to_string()))?;
            let reloader = PgSchemaReloader { dsn };
            let view = reloader.reload().await?;
            Ok((view, Some(Arc::new(reloader))))
        }
    }
}

/// Reconnects and re-introspects; used at startup and after each DDL.
struct PgSchemaReloader {
    dsn: String,
}

#[async_trait]
impl SchemaReloader for PgSchemaReloader {
    async fn reload(&self) -> Result<SchemaView, SchemaError> {
        let (client, connection) = tokio_postgres::connect(&self.dsn, NoTls)
            .await
            .map_err(|e| SchemaError::Introspection(e.to_string()))?;
        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("introspection connection terminated: {e}");
            }
        });
        let view = introspect_schema(&client).await;
        drop(client);
        task.abort();
        view
    }
}

fn open_output(config: &RunConfig) -> Result<Option<Box<dyn Write + Send>>, RunError> {
    match config.output.sink {
        OutputSinkKind::None => Ok(None),
        OutputSinkKind::Stdout => Ok(Some(Box::new(std::io::stdout()))),
        OutputSinkKind::File => {
            let path = config
                .output
                .path
                .as_ref()
                .ok_or_else(|| RunError::Config("output.path not set".to_string()))?;
            Ok(Some(Box::new(std::fs::File::create(path)?)))
        }
    }
}

/// First signal stops at the next batch boundary; a second one abandons
/// in-flight work and closes connections.
fn spawn_signal_handler(
    stop: Arc<AtomicBool>,
    hard_stop: Arc<AtomicBool>,
    user_cancelled: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested; finishing the current batches");
            user_cancelled.store(true, Ordering::Relaxed);
            stop.store(true, Ordering::Relaxed);
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second signal; closing connections now");
            hard_stop.store(true, Ordering::Relaxed);
        }
    })
}

/// A dry-run connector for pipelines that want execution plumbing without a
/// database.
pub fn dry_run_connector() -> Arc<dyn Connector> {
    Arc::new(DryRunConnector)
}
