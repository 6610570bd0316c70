//! Rolling metrics snapshots and the end-of-run summary.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use rqg_unique::RotatingFilter;

use crate::stats::RunStats;

/// One periodic metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub elapsed_secs: f64,
    pub generated: u64,
    pub submitted: u64,
    pub executed: u64,
    pub ok: u64,
    /// Generation throughput over the last interval.
    pub qps: f64,
    pub gen_p50_us: u64,
    pub gen_p95_us: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub duplicate_collisions: u64,
    pub dropped: u64,
    /// Load factor of the uniqueness filter, when one is attached.
    pub uniqueness_load: Option<f64>,
}

/// Final run summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub generated: u64,
    pub submitted: u64,
    pub executed: u64,
    pub ok: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub error_samples: BTreeMap<String, Vec<String>>,
    pub duplicate_collisions: u64,
    pub dropped: u64,
    pub depth_truncations: u64,
    pub schema_fallbacks: u64,
    pub distinct_shapes: u64,
    pub bytes_out: u64,
    pub wall_secs: f64,
    pub qps: f64,
}

impl RunSummary {
    pub fn from_stats(stats: &RunStats) -> Self {
        let wall = stats.elapsed().as_secs_f64();
        let generated = stats.generated.load(Ordering::Relaxed);
        Self {
            generated,
            submitted: stats.submitted.load(Ordering::Relaxed),
            executed: stats.executed.load(Ordering::Relaxed),
            ok: stats.ok.load(Ordering::Relaxed),
            errors_by_kind: stats.errors_by_kind(),
            error_samples: stats.error_samples(),
            duplicate_collisions: stats.duplicate_collisions.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
            depth_truncations: stats.depth_truncations.load(Ordering::Relaxed),
            schema_fallbacks: stats.schema_fallbacks.load(Ordering::Relaxed),
            distinct_shapes: stats.distinct_shapes(),
            bytes_out: stats.bytes_out.load(Ordering::Relaxed),
            wall_secs: wall,
            qps: if wall > 0.0 {
                generated as f64 / wall
            } else {
                0.0
            },
        }
    }

    /// Human-readable multi-line rendering.
    pub fn render(&self) -> String {
        let mut out = format!(
            "Run summary\n\
             ===========\n\
             Generated:  {}\n\
             Submitted:  {}\n\
             Executed:   {} ({} ok)\n\
             Duplicates: {} collisions\n\
             Dropped:    {}\n\
             Shapes:     {} distinct\n\
             Wall time:  {:.1}s ({:.1} q/s)\n",
            self.generated,
            self.submitted,
            self.executed,
            self.ok,
            self.duplicate_collisions,
            self.dropped,
            self.distinct_shapes,
            self.wall_secs,
            self.qps,
        );
        if !self.errors_by_kind.is_empty() {
            out.push_str("Errors by kind:\n");
            for (kind, count) in &self.errors_by_kind {
                out.push_str(&format!("  {kind}: {count}\n"));
                if let Some(samples) = self.error_samples.get(kind) {
                    if let Some(first) = samples.first() {
                        out.push_str(&format!("    e.g. {first}\n"));
                    }
                }
            }
        }
        out
    }
}

/// Where snapshots and the summary go.
pub trait ReportSink: Send {
    fn snapshot(&mut self, snapshot: &Snapshot);
    fn summary(&mut self, summary: &RunSummary);
}

/// Logs one line per snapshot and prints the summary to stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl ReportSink for StdoutSink {
    fn snapshot(&mut self, snapshot: &Snapshot) {
        tracing::info!(
            generated = snapshot.generated,
            executed = snapshot.executed,
            qps = format!("{:.1}", snapshot.qps),
            p50_us = snapshot.gen_p50_us,
            p95_us = snapshot.gen_p95_us,
            duplicates = snapshot.duplicate_collisions,
            errors = snapshot.errors_by_kind.values().sum::<u64>(),
            "progress"
        );
    }

    fn summary(&mut self, summary: &RunSummary) {
        println!("{}", summary.render());
    }
}

/// Appends JSON lines to a file.
pub struct JsonlSink {
    file: std::fs::File,
}

impl JsonlSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            file: std::fs::File::create(path)?,
        })
    }
}

impl ReportSink for JsonlSink {
    fn snapshot(&mut self, snapshot: &Snapshot) {
        if let Ok(json) = serde_json::to_string(snapshot) {
            let _ = writeln!(self.file, "{json}");
        }
    }

    fn summary(&mut self, summary: &RunSummary) {
        if let Ok(json) = serde_json::to_string(summary) {
            let _ = writeln!(self.file, "{json}");
        }
    }
}

/// Invokes a callback per snapshot; the summary is rendered through the
/// same callback.
pub struct CallbackSink(pub Box<dyn FnMut(&Snapshot) + Send>);

impl ReportSink for CallbackSink {
    fn snapshot(&mut self, snapshot: &Snapshot) {
        (self.0)(snapshot)
    }

    fn summary(&mut self, _summary: &RunSummary) {}
}

/// Periodic reporter task.
pub struct Reporter;

impl Reporter {
    /// Emit a snapshot every `interval` until the stop flag rises; the sink
    /// is handed back so the caller can emit the final summary once all
    /// counters have settled.
    pub fn spawn(
        stats: Arc<RunStats>,
        unique: Option<Arc<RotatingFilter>>,
        mut sink: Box<dyn ReportSink>,
        interval: Duration,
        stop: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<Box<dyn ReportSink>> {
        tokio::spawn(async move {
            let mut last_generated = 0u64;
            loop {
                tokio::time::sleep(interval).await;
                if stop.load(Ordering::Relaxed) {
                    return sink;
                }
                let generated = stats.generated.load(Ordering::Relaxed);
                let qps = (generated - last_generated) as f64 / interval.as_secs_f64();
                last_generated = generated;
                let snapshot = Snapshot {
                    elapsed_secs: stats.elapsed().as_secs_f64(),
                    generated,
                    submitted: stats.submitted.load(Ordering::Relaxed),
                    executed: stats.executed.load(Ordering::Relaxed),
                    ok: stats.ok.load(Ordering::Relaxed),
                    qps,
                    gen_p50_us: stats.latency_quantile_micros(0.50),
                    gen_p95_us: stats.latency_quantile_micros(0.95),
                    errors_by_kind: stats.errors_by_kind(),
                    duplicate_collisions: stats.duplicate_collisions.load(Ordering::Relaxed),
                    dropped: stats.dropped.load(Ordering::Relaxed),
                    uniqueness_load: unique.as_ref().map(|filter| filter.load_factor()),
                };
                sink.snapshot(&snapshot);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ErrorKind;

    #[test]
    fn test_summary_from_stats() {
        let stats = RunStats::default();
        stats.generated.store(100, Ordering::Relaxed);
        stats.ok.store(90, Ordering::Relaxed);
        stats.record_error(&ErrorKind::from_sqlstate("42703"), "column does not exist");
        let summary = RunSummary::from_stats(&stats);
        assert_eq!(summary.generated, 100);
        assert_eq!(summary.ok, 90);
        assert_eq!(summary.errors_by_kind.get("sql:42"), Some(&1));
        let rendered = summary.render();
        assert!(rendered.contains("sql:42"));
        assert!(rendered.contains("column does not exist"));
    }

    #[test]
    fn test_jsonl_sink_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let mut sink = JsonlSink::create(&path).unwrap();
        let stats = RunStats::default();
        sink.summary(&RunSummary::from_stats(&stats));
        drop(sink);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["generated"], 0);
    }
}
