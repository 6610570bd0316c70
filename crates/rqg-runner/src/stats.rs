//! Run statistics: atomic counters on the hot path, mutex-guarded
//! aggregates that workers flush into at batch boundaries.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cap on retained example messages per error kind.
pub const ERROR_SAMPLE_CAP: usize = 10;

/// Cap on the distinct-shape tracking set.
const SHAPE_TRACKING_CAP: usize = 65_536;

/// Classification of a failure, by kind rather than type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A lambda element failed during expansion; the query was skipped.
    Expansion,
    /// Schema load or rebuild failed.
    Schema,
    /// Uniqueness retries exhausted; the query passed through anyway.
    Uniqueness,
    /// The endpoint returned a SQL error, keyed by SQLSTATE class.
    Sql { class: String },
    /// Statement timeout (SQLSTATE 57014).
    Timeout,
    /// Transport failure.
    Conn,
    /// The run was cancelled.
    Cancelled,
}

impl ErrorKind {
    /// Kind from a SQLSTATE code.
    pub fn from_sqlstate(sqlstate: &str) -> Self {
        if sqlstate == "57014" {
            ErrorKind::Timeout
        } else {
            ErrorKind::Sql {
                class: sqlstate.chars().take(2).collect(),
            }
        }
    }

    pub fn label(&self) -> String {
        match self {
            ErrorKind::Expansion => "expansion".to_string(),
            ErrorKind::Schema => "schema".to_string(),
            ErrorKind::Uniqueness => "uniqueness".to_string(),
            ErrorKind::Sql { class } => format!("sql:{class}"),
            ErrorKind::Timeout => "timeout".to_string(),
            ErrorKind::Conn => "conn".to_string(),
            ErrorKind::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Log2-bucketed latency histogram (microsecond resolution).
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    buckets: [u64; 40],
    count: u64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            buckets: [0; 40],
            count: 0,
        }
    }
}

impl LatencyHistogram {
    pub fn record(&mut self, elapsed: Duration) {
        let micros = elapsed.as_micros().max(1) as u64;
        let bucket = (63 - micros.leading_zeros() as usize).min(self.buckets.len() - 1);
        self.buckets[bucket] += 1;
        self.count += 1;
    }

    pub fn merge(&mut self, other: &LatencyHistogram) {
        for (mine, theirs) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            *mine += theirs;
        }
        self.count += other.count;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn clear(&mut self) {
        self.buckets = [0; 40];
        self.count = 0;
    }

    /// Upper bound (in microseconds) of the bucket containing quantile `q`.
    pub fn quantile_micros(&self, q: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }
        let rank = ((self.count as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut cumulative = 0u64;
        for (bucket, count) in self.buckets.iter().enumerate() {
            cumulative += count;
            if cumulative >= rank {
                return 1u64 << (bucket + 1);
            }
        }
        1u64 << self.buckets.len()
    }
}

/// Shared run counters.
///
/// The atomic fields are the only state touched per query; everything else
/// is updated at batch boundaries through [`RunStats::flush`]-style
/// helpers.
#[derive(Debug)]
pub struct RunStats {
    started: Instant,
    pub generated: AtomicU64,
    pub submitted: AtomicU64,
    pub executed: AtomicU64,
    pub ok: AtomicU64,
    pub duplicate_collisions: AtomicU64,
    pub dropped: AtomicU64,
    pub depth_truncations: AtomicU64,
    pub schema_fallbacks: AtomicU64,
    pub bytes_out: AtomicU64,
    errors: Mutex<BTreeMap<String, u64>>,
    samples: Mutex<BTreeMap<String, Vec<String>>>,
    gen_latency: Mutex<LatencyHistogram>,
    shapes: Mutex<HashSet<u64>>,
}

impl Default for RunStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            generated: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            ok: AtomicU64::new(0),
            duplicate_collisions: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            depth_truncations: AtomicU64::new(0),
            schema_fallbacks: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            errors: Mutex::new(BTreeMap::new()),
            samples: Mutex::new(BTreeMap::new()),
            gen_latency: Mutex::new(LatencyHistogram::default()),
            shapes: Mutex::new(HashSet::new()),
        }
    }
}

impl RunStats {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Count an error and retain a bounded sample of its message.
    pub fn record_error(&self, kind: &ErrorKind, message: &str) {
        let label = kind.label();
        {
            let mut errors = self.errors.lock().expect("stats lock");
            *errors.entry(label.clone()).or_insert(0) += 1;
        }
        let mut samples = self.samples.lock().expect("stats lock");
        let entry = samples.entry(label).or_default();
        if entry.len() < ERROR_SAMPLE_CAP {
            entry.push(message.to_string());
        }
    }

    pub fn errors_by_kind(&self) -> BTreeMap<String, u64> {
        self.errors.lock().expect("stats lock").clone()
    }

    pub fn error_samples(&self) -> BTreeMap<String, Vec<String>> {
        self.samples.lock().expect("stats lock").clone()
    }

    pub fn total_errors(&self) -> u64 {
        self.errors.lock().expect("stats lock").values().sum()
    }

    /// Merge a worker-local latency histogram.
    pub fn merge_latency(&self, histogram: &LatencyHistogram) {
        self.gen_latency.lock().expect("stats lock").merge(histogram);
    }

    pub fn latency_quantile_micros(&self, q: f64) -> u64 {
        self.gen_latency.lock().expect("stats lock").quantile_micros(q)
    }

    /// Track a query-shape hash; the set is bounded, after which new shapes
    /// are no longer distinguished.
    pub fn record_shape(&self, shape_hash: u64) {
        let mut shapes = self.shapes.lock().expect("stats lock");
        if shapes.len() < SHAPE_TRACKING_CAP {
            shapes.insert(shape_hash);
        }
    }

    pub fn distinct_shapes(&self) -> u64 {
        self.shapes.lock().expect("stats lock").len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ErrorKind::Expansion.label(), "expansion");
        assert_eq!(ErrorKind::from_sqlstate("42601").label(), "sql:42");
        assert_eq!(ErrorKind::from_sqlstate("23505").label(), "sql:23");
        assert_eq!(ErrorKind::from_sqlstate("57014").label(), "timeout");
    }

    #[test]
    fn test_error_samples_are_bounded() {
        let stats = RunStats::default();
        for i in 0..100 {
            stats.record_error(&ErrorKind::Conn, &format!("failure {i}"));
        }
        assert_eq!(stats.errors_by_kind().get("conn"), Some(&100));
        assert_eq!(stats.error_samples().get("conn").unwrap().len(), ERROR_SAMPLE_CAP);
    }

    #[test]
    fn test_histogram_quantiles() {
        let mut histogram = LatencyHistogram::default();
        for _ in 0..90 {
            histogram.record(Duration::from_micros(10));
        }
        for _ in 0..10 {
            histogram.record(Duration::from_micros(5000));
        }
        let p50 = histogram.quantile_micros(0.5);
        let p95 = histogram.quantile_micros(0.95);
        assert!(p50 <= 16, "p50 {p50}");
        assert!(p95 >= 4096, "p95 {p95}");
        assert!(p95 <= 8192, "p95 {p95}");
    }

    #[test]
    fn test_histogram_merge() {
        let mut a = LatencyHistogram::default();
        let mut b = LatencyHistogram::default();
        a.record(Duration::from_micros(100));
        b.record(Duration::from_micros(100));
        a.merge(&b);
        assert_eq!(a.count, 2);
    }

    #[test]
    fn test_shape_tracking() {
        let stats = RunStats::default();
        stats.record_shape(1);
        stats.record_shape(1);
        stats.record_shape(2);
        assert_eq!(stats.distinct_shapes(), 2);
    }
}
