//! Generation workers: one OS thread per worker, bounded-channel
//! backpressure, cooperative cancellation at batch boundaries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rqg_grammar::rng::retry_seed;
use rqg_grammar::{derive_seed, Context, ExpandConfig, Grammar};
use rqg_schema::SchemaView;
use rqg_unique::{fingerprint, query_shape, RotatingFilter, Verdict};
use tokio::sync::{mpsc, watch};
use xxhash_rust::xxh3::xxh3_64;

use crate::partition::WorkerAssignment;
use crate::stats::{ErrorKind, LatencyHistogram, RunStats};

/// One generated query on its way downstream.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub text: String,
    pub fingerprint: u128,
    pub worker_id: u32,
    pub global_index: u64,
}

/// Optional post-expansion fixup hook; returning `None` drops the query.
pub type FixupHook = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Worker pool configuration.
#[derive(Clone)]
pub struct PoolConfig {
    pub master_seed: u64,
    /// Queries per batch between stop-flag polls and stat flushes.
    pub batch: u64,
    pub expand: ExpandConfig,
    /// Duplicate-retry cap when a uniqueness filter is attached.
    pub retry_cap: u32,
    /// Wall-clock cutoff, honored at batch boundaries.
    pub deadline: Option<Instant>,
    pub fixup: Option<FixupHook>,
}

/// Everything a worker thread shares with the rest of the run.
#[derive(Clone)]
struct WorkerShared {
    grammar: Arc<Grammar>,
    schema: watch::Receiver<Arc<SchemaView>>,
    unique: Option<Arc<RotatingFilter>>,
    tx: mpsc::Sender<QueryRecord>,
    stop: Arc<AtomicBool>,
    done: Arc<Vec<AtomicU64>>,
    stats: Arc<RunStats>,
    config: PoolConfig,
}

/// Spawn one named OS thread per assignment.
///
/// `resume_done[w]` indices are skipped at the front of worker `w`'s
/// assignment, which is how a checkpointed run resumes. Threads exit when
/// their assignment is exhausted, the stop flag rises, the deadline passes,
/// or the downstream channel closes.
#[allow(clippy::too_many_arguments)]
pub fn spawn_workers(
    grammar: Arc<Grammar>,
    assignments: Vec<WorkerAssignment>,
    resume_done: Vec<u64>,
    schema: watch::Receiver<Arc<SchemaView>>,
    unique: Option<Arc<RotatingFilter>>,
    tx: mpsc::Sender<QueryRecord>,
    stop: Arc<AtomicBool>,
    done: Arc<Vec<AtomicU64>>,
    stats: Arc<RunStats>,
    config: PoolConfig,
) -> Vec<std::thread::JoinHandle<()>> {
    let shared = WorkerShared {
        grammar,
        schema,
        unique,
        tx,
        stop,
        done,
        stats,
        config,
    };
    assignments
        .into_iter()
        .enumerate()
        .map(|(worker, assignment)| {
            let shared = shared.clone();
            let skip = resume_done.get(worker).copied().unwrap_or(0);
            std::thread::Builder::new()
                .name(format!("rqg-worker-{worker}"))
                .spawn(move || worker_loop(worker as u32, assignment, skip, shared))
                .expect("spawn worker thread")
        })
        .collect()
}

/// Worker-local tallies, flushed into the shared stats at batch
/// boundaries to keep shared-counter traffic off the per-query path.
#[derive(Default)]
struct WorkerLocal {
    generated: u64,
    submitted: u64,
    duplicate_collisions: u64,
    dropped: u64,
    depth_truncations: u64,
    schema_fallbacks: u64,
    histogram: LatencyHistogram,
}

impl WorkerLocal {
    fn flush(&mut self, stats: &RunStats) {
        stats.generated.fetch_add(self.generated, Ordering::Relaxed);
        stats.submitted.fetch_add(self.submitted, Ordering::Relaxed);
        stats
            .duplicate_collisions
            .fetch_add(self.duplicate_collisions, Ordering::Relaxed);
        stats.dropped.fetch_add(self.dropped, Ordering::Relaxed);
        stats
            .depth_truncations
            .fetch_add(self.depth_truncations, Ordering::Relaxed);
        stats
            .schema_fallbacks
            .fetch_add(self.schema_fallbacks, Ordering::Relaxed);
        if !self.histogram.is_empty() {
            stats.merge_latency(&self.histogram);
        }
        self.histogram.clear();
        self.generated = 0;
        self.submitted = 0;
        self.duplicate_collisions = 0;
        self.dropped = 0;
        self.depth_truncations = 0;
        self.schema_fallbacks = 0;
    }
}

fn worker_loop(worker: u32, assignment: WorkerAssignment, skip: u64, shared: WorkerShared) {
    let mut local = WorkerLocal::default();
    let mut completed = skip;
    let mut in_batch = 0u64;
    shared.done[worker as usize].store(completed, Ordering::Relaxed);

    for index in assignment.indices().skip(skip as usize) {
        if let Some(record) = produce_one(worker, index, &shared, &mut local) {
            if shared.tx.blocking_send(record).is_err() {
                // Downstream is gone; nothing more to produce.
                break;
            }
            local.submitted += 1;
        }
        completed += 1;
        in_batch += 1;

        if in_batch >= shared.config.batch {
            in_batch = 0;
            local.flush(&shared.stats);
            shared.done[worker as usize].store(completed, Ordering::Relaxed);
            if shared.stop.load(Ordering::Relaxed) {
                break;
            }
            if shared
                .config
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
            {
                tracing::debug!(worker, "deadline reached");
                break;
            }
        }
    }

    local.flush(&shared.stats);
    shared.done[worker as usize].store(completed, Ordering::Relaxed);
    tracing::debug!(worker, completed, "worker finished");
}

/// Expand one global index into a record, applying the fixup hook and the
/// uniqueness filter with its retry cap.
fn produce_one(
    worker: u32,
    index: u64,
    shared: &WorkerShared,
    local: &mut WorkerLocal,
) -> Option<QueryRecord> {
    let schema = shared.schema.borrow().clone();
    let base_seed = derive_seed(shared.config.master_seed, u64::from(worker), index);

    let mut attempt = 0u32;
    loop {
        let mut ctx = Context::new(
            retry_seed(base_seed, attempt),
            Arc::clone(&schema),
            shared.config.expand,
        );
        let generation_started = Instant::now();
        let text = match shared.grammar.generate(&mut ctx) {
            Ok(text) => text,
            Err(e) => {
                shared
                    .stats
                    .record_error(&ErrorKind::Expansion, &e.to_string());
                return None;
            }
        };
        local.histogram.record(generation_started.elapsed());
        local.generated += 1;
        local.depth_truncations += ctx.warnings.depth_truncations;
        local.schema_fallbacks += ctx.warnings.schema_fallbacks;

        let text = match &shared.config.fixup {
            Some(hook) => match hook(&text) {
                Some(fixed) => fixed,
                None => {
                    local.dropped += 1;
                    return None;
                }
            },
            None => text,
        };

        let fp = fingerprint(&text);
        if let Some(filter) = &shared.unique {
            if filter.check_and_add(fp) == Verdict::Duplicate {
                if attempt < shared.config.retry_cap {
                    attempt += 1;
                    continue;
                }
                // Retries exhausted: pass the query through, but count it.
                local.duplicate_collisions += 1;
            }
        }

        shared.stats.record_shape(xxh3_64(query_shape(&text).as_bytes()));
        return Some(QueryRecord {
            text,
            fingerprint: fp,
            worker_id: worker,
            global_index: index,
        });
    }
}
