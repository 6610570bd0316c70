//! Filter rotation: bounded memory over an unbounded stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::bloom::BloomFilter;

/// Result of a duplicate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Definitely not seen within the current window.
    Fresh,
    /// Seen before, or a false positive at the configured rate.
    Duplicate,
}

/// Configuration for the uniqueness filter.
#[derive(Debug, Clone, Copy)]
pub struct UniquenessConfig {
    /// Expected elements per filter generation.
    pub capacity: u64,
    /// Target false-positive rate.
    pub target_fpr: f64,
    /// Load factor at which the active filter is sealed.
    pub rotate_at: f64,
    /// Duplicate-retry cap applied by producers.
    pub retry_cap: u32,
}

impl Default for UniquenessConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            target_fpr: 0.01,
            rotate_at: 0.5,
            retry_cap: 4,
        }
    }
}

struct Generations {
    active: Arc<BloomFilter>,
    sealed: Option<Arc<BloomFilter>>,
}

/// A Bloom filter pair with rotation.
///
/// Inserts go to the active filter; lookups consult the union of the active
/// filter and its sealed predecessor. When the active filter's load factor
/// crosses `rotate_at` it becomes the sealed filter and a fresh one takes
/// over, discarding the previous sealed filter. Memory is bounded to two
/// filters; duplicate detection covers a sliding window of roughly twice
/// the configured capacity.
pub struct RotatingFilter {
    config: UniquenessConfig,
    generations: RwLock<Generations>,
    seals: AtomicU64,
}

impl RotatingFilter {
    pub fn new(config: UniquenessConfig) -> Self {
        Self {
            config,
            generations: RwLock::new(Generations {
                active: Arc::new(BloomFilter::with_capacity(
                    config.capacity,
                    config.target_fpr,
                )),
                sealed: None,
            }),
            seals: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> UniquenessConfig {
        self.config
    }

    /// How many times the active filter has been sealed.
    pub fn seals(&self) -> u64 {
        self.seals.load(Ordering::Relaxed)
    }

    /// Load factor of the active filter.
    pub fn load_factor(&self) -> f64 {
        let generations = self.generations.read().expect("filter lock");
        generations.active.load_factor()
    }

    /// Check a fingerprint against the window and record it.
    ///
    /// Never returns `Fresh` for a fingerprint inserted within the window;
    /// returns `Duplicate` spuriously at most at the configured
    /// false-positive rate.
    pub fn check_and_add(&self, fingerprint: u128) -> Verdict {
        let (verdict, needs_rotation) = {
            let generations = self.generations.read().expect("filter lock");
            let sealed_hit = generations
                .sealed
                .as_ref()
                .is_some_and(|sealed| sealed.contains(fingerprint));
            let newly_inserted = generations.active.insert(fingerprint);
            let verdict = if sealed_hit || !newly_inserted {
                Verdict::Duplicate
            } else {
                Verdict::Fresh
            };
            (
                verdict,
                generations.active.load_factor() > self.config.rotate_at,
            )
        };
        if needs_rotation {
            self.rotate();
        }
        verdict
    }

    fn rotate(&self) {
        let mut generations = self.generations.write().expect("filter lock");
        // Another thread may have rotated while this one waited.
        if generations.active.load_factor() <= self.config.rotate_at {
            return;
        }
        let retired = std::mem::replace(
            &mut generations.active,
            Arc::new(BloomFilter::with_capacity(
                self.config.capacity,
                self.config.target_fpr,
            )),
        );
        generations.sealed = Some(retired);
        let seals = self.seals.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(seals, "rotated uniqueness filter");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;

    fn small_config() -> UniquenessConfig {
        UniquenessConfig {
            capacity: 16,
            target_fpr: 0.01,
            rotate_at: 0.5,
            retry_cap: 4,
        }
    }

    #[test]
    fn test_distinct_queries_are_fresh() {
        let filter = RotatingFilter::new(small_config());
        for n in 0..10 {
            let fp = fingerprint(&format!("SELECT {n}"));
            assert_eq!(filter.check_and_add(fp), Verdict::Fresh);
        }
    }

    #[test]
    fn test_no_false_negatives_under_load() {
        // 1000 draws over a population of 10: everything after the first
        // sighting of each value must be reported duplicate.
        let filter = RotatingFilter::new(UniquenessConfig {
            capacity: 1024,
            ..small_config()
        });
        let mut fresh = 0;
        for i in 0..1000 {
            let fp = fingerprint(&format!("SELECT {}", i % 10));
            if filter.check_and_add(fp) == Verdict::Fresh {
                fresh += 1;
            }
        }
        assert!(fresh <= 10, "{fresh} fresh verdicts for 10 distinct queries");
        assert!(fresh >= 1);
    }

    #[test]
    fn test_rotation_bounds_generations() {
        let filter = RotatingFilter::new(small_config());
        for i in 0..10_000u64 {
            filter.check_and_add(u128::from(i).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        }
        assert!(filter.seals() > 0, "small filter never rotated");
        // The active filter was just rotated or is below the threshold; in
        // either case memory is bounded to two generations.
        let generations = filter.generations.read().unwrap();
        assert!(generations.sealed.is_some());
    }

    #[test]
    fn test_duplicates_survive_one_rotation() {
        let filter = RotatingFilter::new(small_config());
        let needle = fingerprint("SELECT needle");
        assert_eq!(filter.check_and_add(needle), Verdict::Fresh);
        // Fill until exactly one rotation has happened.
        let mut i = 0u64;
        while filter.seals() == 0 && i < 10_000 {
            filter.check_and_add(u128::from(i).wrapping_mul(0x0123_4567_89ab_cdf1));
            i += 1;
        }
        assert_eq!(filter.seals(), 1);
        // The needle sits in the sealed filter and is still detected.
        assert_eq!(filter.check_and_add(needle), Verdict::Duplicate);
    }
}
