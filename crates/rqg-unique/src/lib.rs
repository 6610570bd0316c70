//! Probabilistic duplicate detection over a growing stream of queries.
//!
//! Queries are reduced to 128-bit fingerprints of their normalized text and
//! tracked in a Bloom filter with a configured false-positive rate. When the
//! filter fills past a rotation threshold it is sealed and a fresh filter
//! takes over; lookups consult the union of both, bounding memory to two
//! filters while preserving duplicate detection over a sliding window.

pub mod bloom;
pub mod fingerprint;
pub mod rotate;

pub use bloom::BloomFilter;
pub use fingerprint::{fingerprint, fingerprint_with, query_shape, NormalizeOptions};
pub use rotate::{RotatingFilter, UniquenessConfig, Verdict};
