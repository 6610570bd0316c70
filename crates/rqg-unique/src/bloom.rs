//! A Bloom filter over 128-bit fingerprints with a lock-free bit array.

use std::sync::atomic::{AtomicU64, Ordering};

const LN2: f64 = std::f64::consts::LN_2;

/// Space-efficient probabilistic set.
///
/// Sized from an expected element count and a target false-positive rate:
/// `m = ceil(-n·ln(p) / ln²2)` bits and `k = round(m/n · ln 2)` probes.
/// The k probe positions are derived from the two 64-bit halves of the
/// fingerprint by double hashing. All operations are `&self`; concurrent
/// inserts use atomic or-ing on the bit words.
pub struct BloomFilter {
    bits: Vec<AtomicU64>,
    bit_len: u64,
    hashes: u32,
    capacity: u64,
    set_bits: AtomicU64,
}

impl BloomFilter {
    /// Create a filter sized for `capacity` elements at `target_fpr`.
    pub fn with_capacity(capacity: u64, target_fpr: f64) -> Self {
        let capacity = capacity.max(1);
        let fpr = target_fpr.clamp(1e-9, 0.5);
        let bit_len = (-(capacity as f64) * fpr.ln() / (LN2 * LN2)).ceil() as u64;
        let bit_len = bit_len.max(64).div_ceil(64) * 64;
        let hashes = ((bit_len as f64 / capacity as f64) * LN2).round().max(1.0) as u32;
        let words = (bit_len / 64) as usize;
        let mut bits = Vec::with_capacity(words);
        bits.resize_with(words, AtomicU64::default);
        Self {
            bits,
            bit_len,
            hashes,
            capacity,
            set_bits: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn bit_len(&self) -> u64 {
        self.bit_len
    }

    pub fn hash_count(&self) -> u32 {
        self.hashes
    }

    /// Fraction of bits set.
    pub fn load_factor(&self) -> f64 {
        self.set_bits.load(Ordering::Relaxed) as f64 / self.bit_len as f64
    }

    /// Insert a fingerprint. Returns `true` when at least one bit was newly
    /// set, i.e. the fingerprint was definitely absent before.
    pub fn insert(&self, fingerprint: u128) -> bool {
        let mut newly_set = 0u64;
        for position in self.probes(fingerprint) {
            let word = (position / 64) as usize;
            let mask = 1u64 << (position % 64);
            let previous = self.bits[word].fetch_or(mask, Ordering::Relaxed);
            if previous & mask == 0 {
                newly_set += 1;
            }
        }
        if newly_set > 0 {
            self.set_bits.fetch_add(newly_set, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Whether the fingerprint might have been inserted. False positives
    /// occur at the configured rate; false negatives never.
    pub fn contains(&self, fingerprint: u128) -> bool {
        for position in self.probes(fingerprint) {
            let word = (position / 64) as usize;
            let mask = 1u64 << (position % 64);
            if self.bits[word].load(Ordering::Relaxed) & mask == 0 {
                return false;
            }
        }
        true
    }

    /// Double-hashed probe positions `h1 + i·h2 mod m`.
    fn probes(&self, fingerprint: u128) -> impl Iterator<Item = u64> + '_ {
        let h1 = fingerprint as u64;
        let h2 = (fingerprint >> 64) as u64 | 1;
        (0..self.hashes as u64)
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.bit_len)
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("bit_len", &self.bit_len)
            .field("hashes", &self.hashes)
            .field("capacity", &self.capacity)
            .field("load_factor", &self.load_factor())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizing_formulas() {
        let filter = BloomFilter::with_capacity(1000, 0.01);
        // m = -1000 * ln(0.01) / ln(2)^2 = 9585.06 -> rounded up to words.
        assert!(filter.bit_len() >= 9586);
        assert!(filter.bit_len() <= 9586 + 64);
        // k = m/n * ln 2 = ~6.6 -> 7.
        assert_eq!(filter.hash_count(), 7);
    }

    #[test]
    fn test_no_false_negatives() {
        let filter = BloomFilter::with_capacity(1000, 0.01);
        for i in 0..1000u128 {
            filter.insert(i.wrapping_mul(0x1234_5678_9abc_def1));
        }
        for i in 0..1000u128 {
            assert!(filter.contains(i.wrapping_mul(0x1234_5678_9abc_def1)));
        }
    }

    #[test]
    fn test_insert_reports_new_elements() {
        let filter = BloomFilter::with_capacity(16, 0.01);
        assert!(filter.insert(42));
        assert!(!filter.insert(42));
    }

    // Spread a counter over both 64-bit halves, as real fingerprints are.
    fn fp(i: u128) -> u128 {
        i.wrapping_mul(0x0123_4567_89ab_cdef_fedc_ba98_7654_3211)
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let filter = BloomFilter::with_capacity(1000, 0.01);
        for i in 0..1000 {
            filter.insert(fp(i));
        }
        let mut false_positives = 0;
        let probes = 10_000u128;
        for i in 0..probes {
            if filter.contains(fp(i + 1_000_000)) {
                false_positives += 1;
            }
        }
        let rate = false_positives as f64 / probes as f64;
        assert!(rate < 0.05, "false positive rate {rate} is too high");
    }

    #[test]
    fn test_load_factor_grows() {
        let filter = BloomFilter::with_capacity(100, 0.01);
        assert_eq!(filter.load_factor(), 0.0);
        for i in 0..100u128 {
            filter.insert(i.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        }
        let load = filter.load_factor();
        assert!(load > 0.2 && load < 0.8, "unexpected load {load}");
    }
}
