//! Per-expansion state: the seeded stream, scratch state, and depth tracking.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rqg_schema::SchemaView;
use serde_json::Value;

use crate::rng::derive_seed;

/// Limits applied during expansion.
#[derive(Debug, Clone, Copy)]
pub struct ExpandConfig {
    /// Maximum rule/choice/repeat nesting depth before recursive branches
    /// are pruned.
    pub max_depth: usize,
    /// Upper bound applied to every `Repeat` draw.
    pub repeat_cap: u32,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            repeat_cap: 64,
        }
    }
}

/// Non-fatal conditions observed while expanding.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpandWarnings {
    /// Expansions that hit the depth cap and emitted an empty string.
    pub depth_truncations: u64,
    /// Field/Table picks that fell back to a default because the schema
    /// had no matching entry.
    pub schema_fallbacks: u64,
}

/// Execution context for a single top-level expansion.
///
/// Holds the worker's seeded random stream, a scratch `state` map that
/// lambda elements may use to coordinate within one query (for example
/// picking a table once and reusing it), the shared schema snapshot, and the
/// depth counter. `state` is cleared at the start of every top-level
/// expansion.
pub struct Context {
    /// Scratch state shared by lambda elements within one expansion.
    pub state: BTreeMap<String, Value>,
    /// Read-only schema snapshot for schema-aware elements.
    pub schema: Arc<SchemaView>,
    /// Warning counters, reset per top-level expansion.
    pub warnings: ExpandWarnings,
    pub(crate) depth: usize,
    pub(crate) config: ExpandConfig,
    rng: ChaCha8Rng,
}

impl Context {
    /// Create a context from an explicit stream seed.
    pub fn new(seed: u64, schema: Arc<SchemaView>, config: ExpandConfig) -> Self {
        Self {
            state: BTreeMap::new(),
            schema,
            warnings: ExpandWarnings::default(),
            depth: 0,
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Create the context for query `index` on worker `worker`.
    pub fn for_query(
        master_seed: u64,
        worker: u64,
        index: u64,
        schema: Arc<SchemaView>,
        config: ExpandConfig,
    ) -> Self {
        Self::new(derive_seed(master_seed, worker, index), schema, config)
    }

    /// Re-seed and clear the context for another expansion attempt.
    pub fn reset(&mut self, seed: u64) {
        self.state.clear();
        self.warnings = ExpandWarnings::default();
        self.depth = 0;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    pub fn config(&self) -> ExpandConfig {
        self.config
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Next uniform `u64` from the stream.
    pub fn next_u64(&mut self) -> u64 {
        self.rng.random()
    }

    /// Next uniform `f64` in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Uniform integer in `[lo, hi]` (inclusive).
    pub fn int_in(&mut self, lo: i64, hi: i64) -> i64 {
        if lo >= hi {
            return lo;
        }
        self.rng.random_range(lo..=hi)
    }

    /// Uniform index in `[0, len)`.
    pub(crate) fn pick_index(&mut self, len: usize) -> usize {
        (self.next_u64() % len as u64) as usize
    }

    /// Whether depth pruning is active.
    pub(crate) fn at_cap(&self) -> bool {
        self.depth >= self.config.max_depth
    }

    /// Enter a depth-counted element. Returns whether the counter moved;
    /// pass the result to [`Context::exit`].
    pub(crate) fn enter(&mut self) -> bool {
        if self.depth < self.config.max_depth {
            self.depth += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn exit(&mut self, entered: bool) {
        if entered {
            self.depth -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(seed: u64) -> Context {
        Context::new(seed, Arc::new(SchemaView::empty()), ExpandConfig::default())
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = ctx(9);
        let mut b = ctx(9);
        for _ in 0..32 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_reset_replays_stream() {
        let mut c = ctx(5);
        let first: Vec<u64> = (0..8).map(|_| c.next_u64()).collect();
        c.reset(5);
        let second: Vec<u64> = (0..8).map(|_| c.next_u64()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_int_in_bounds() {
        let mut c = ctx(1);
        for _ in 0..1000 {
            let n = c.int_in(-3, 7);
            assert!((-3..=7).contains(&n));
        }
        assert_eq!(c.int_in(4, 4), 4);
    }

    #[test]
    fn test_depth_never_exceeds_cap() {
        let mut c = ctx(1);
        let mut entered = Vec::new();
        for _ in 0..100 {
            entered.push(c.enter());
            assert!(c.depth() <= c.config.max_depth);
        }
        for e in entered.into_iter().rev() {
            c.exit(e);
        }
        assert_eq!(c.depth(), 0);
    }
}
