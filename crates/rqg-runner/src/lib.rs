//! Run machinery: deterministic work partitioning, generation workers with
//! backpressure, the DDL-serializing execution coordinator, checkpointing
//! and metrics reporting.

pub mod checkpoint;
pub mod coordinator;
pub mod partition;
pub mod pool;
pub mod report;
pub mod stats;

mod error;

pub use checkpoint::{Checkpoint, CheckpointCadence, CheckpointError};
pub use coordinator::{drain_records, is_ddl, run_coordinator, CoordinatorConfig, SchemaReloader};
pub use error::RunnerError;
pub use partition::{partition, WorkerAssignment};
pub use pool::{spawn_workers, FixupHook, PoolConfig, QueryRecord};
pub use report::{ReportSink, Reporter, RunSummary, Snapshot};
pub use stats::{ErrorKind, LatencyHistogram, RunStats};
