//! Deterministic assignment of global query indices to workers.

/// The set of global indices one worker owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAssignment {
    /// Contiguous `[start, start + len)`, used for bounded runs.
    Range { start: u64, len: u64 },
    /// `first, first + stride, ...`, used for unbounded runs.
    Strided { first: u64, stride: u64 },
}

impl WorkerAssignment {
    /// The indices of this assignment, in increasing order.
    pub fn indices(&self) -> Box<dyn Iterator<Item = u64> + Send> {
        match *self {
            WorkerAssignment::Range { start, len } => Box::new(start..start + len),
            WorkerAssignment::Strided { first, stride } => {
                Box::new((0u64..).map(move |step| first + step * stride))
            }
        }
    }

    /// Number of indices, `None` when unbounded.
    pub fn len(&self) -> Option<u64> {
        match *self {
            WorkerAssignment::Range { len, .. } => Some(len),
            WorkerAssignment::Strided { .. } => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// Partition `total` indices across `workers`.
///
/// Bounded totals get contiguous ranges of `floor(N/W)` with the remainder
/// spread over the first `N mod W` workers. Unbounded runs get strided
/// assignments (`worker, worker + W, ...`) so the index → worker mapping
/// stays a pure function of the configuration.
pub fn partition(total: Option<u64>, workers: u32) -> Vec<WorkerAssignment> {
    let workers = workers.max(1);
    match total {
        None => (0..workers)
            .map(|w| WorkerAssignment::Strided {
                first: u64::from(w),
                stride: u64::from(workers),
            })
            .collect(),
        Some(total) => {
            let base = total / u64::from(workers);
            let remainder = total % u64::from(workers);
            let mut start = 0u64;
            (0..workers)
                .map(|w| {
                    let len = base + u64::from(u64::from(w) < remainder);
                    let assignment = WorkerAssignment::Range { start, len };
                    start += len;
                    assignment
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split() {
        let parts = partition(Some(100), 4);
        assert_eq!(
            parts,
            vec![
                WorkerAssignment::Range { start: 0, len: 25 },
                WorkerAssignment::Range { start: 25, len: 25 },
                WorkerAssignment::Range { start: 50, len: 25 },
                WorkerAssignment::Range { start: 75, len: 25 },
            ]
        );
    }

    #[test]
    fn test_remainder_goes_to_first_workers() {
        let parts = partition(Some(10), 3);
        assert_eq!(
            parts,
            vec![
                WorkerAssignment::Range { start: 0, len: 4 },
                WorkerAssignment::Range { start: 4, len: 3 },
                WorkerAssignment::Range { start: 7, len: 3 },
            ]
        );
    }

    #[test]
    fn test_partition_covers_every_index_once() {
        for (total, workers) in [(1u64, 1u32), (7, 3), (100, 7), (5, 8)] {
            let mut seen: Vec<u64> = partition(Some(total), workers)
                .iter()
                .flat_map(|assignment| assignment.indices())
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..total).collect::<Vec<_>>(), "{total}/{workers}");
        }
    }

    #[test]
    fn test_more_workers_than_queries() {
        let parts = partition(Some(2), 4);
        assert_eq!(parts[0].len(), Some(1));
        assert_eq!(parts[1].len(), Some(1));
        assert!(parts[2].is_empty());
        assert!(parts[3].is_empty());
    }

    #[test]
    fn test_strided_assignments_interleave() {
        let parts = partition(None, 3);
        let first_of_each: Vec<u64> = parts
            .iter()
            .map(|assignment| assignment.indices().next().unwrap())
            .collect();
        assert_eq!(first_of_each, vec![0, 1, 2]);
        let from_one: Vec<u64> = parts[1].indices().take(3).collect();
        assert_eq!(from_one, vec![1, 4, 7]);
    }
}
