//! In-memory run sorting.

use std::any::Any;
use std::cmp::Ordering;
use std::convert::Infallible;
use std::mem;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};

use crate::merger::BinaryHeapMerger;
use crate::sort::SortError;

/// Run sorting strategy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExecutionPolicy {
    /// Sub-ranges of a run are sorted by a pool of worker threads and merged afterwards.
    Parallel,
    /// A run is sorted by the calling thread.
    Synchronous,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        ExecutionPolicy::Parallel
    }
}

/// Splits `len` items into at most `parts` contiguous ranges. Every range but the last holds
/// `len / parts` items, the last one takes the remainder.
pub fn partition_bounds(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.min(len).max(1);
    let chunk = len / parts;

    return (0..parts)
        .map(|i| {
            let start = i * chunk;
            let end = if i == parts - 1 { len } else { start + chunk };
            start..end
        })
        .collect();
}

/// Sorts run batches in memory according to the execution policy.
pub struct RunSorter {
    threads_number: usize,
    /// Worker pool. Absent for the synchronous policy.
    thread_pool: Option<rayon::ThreadPool>,
}

impl RunSorter {
    /// Creates a run sorter. The worker pool is built only for the parallel policy.
    pub fn new(policy: ExecutionPolicy, threads_number: usize) -> Result<Self, SortError> {
        let thread_pool = match policy {
            ExecutionPolicy::Parallel => Some(Self::init_thread_pool(threads_number)?),
            ExecutionPolicy::Synchronous => None,
        };

        return Ok(RunSorter {
            threads_number,
            thread_pool,
        });
    }

    fn init_thread_pool(threads_number: usize) -> Result<rayon::ThreadPool, SortError> {
        log::info!("initializing thread-pool (threads: {})", threads_number);

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .thread_name(|idx| format!("run-sorter-{}", idx))
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    /// Sorts the batch in place.
    pub fn sort_by<T, F>(&self, batch: &mut Vec<T>, compare: F) -> Result<(), SortError>
    where
        T: Copy + Send,
        F: Fn(&T, &T) -> Ordering + Copy + Send + Sync,
    {
        match &self.thread_pool {
            Some(thread_pool) => self.par_sort_by(thread_pool, batch, compare),
            None => {
                batch.sort_unstable_by(compare);
                Ok(())
            }
        }
    }

    fn par_sort_by<T, F>(&self, thread_pool: &rayon::ThreadPool, batch: &mut Vec<T>, compare: F) -> Result<(), SortError>
    where
        T: Copy + Send,
        F: Fn(&T, &T) -> Ordering + Copy + Send + Sync,
    {
        if batch.len() < 2 {
            return Ok(());
        }

        let bounds = partition_bounds(batch.len(), self.threads_number);

        let mut parts: Vec<&mut [T]> = Vec::with_capacity(bounds.len());
        let mut rest = batch.as_mut_slice();
        for range in &bounds {
            let (part, tail) = mem::take(&mut rest).split_at_mut(range.len());
            parts.push(part);
            rest = tail;
        }

        // every worker owns its sub-range and its outcome slot, slots are inspected after the join
        let mut outcomes: Vec<Option<Result<(), String>>> = vec![None; parts.len()];
        thread_pool.scope(|scope| {
            for (worker, (part, outcome)) in parts.into_iter().zip(outcomes.iter_mut()).enumerate() {
                scope.spawn(move |_| {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| part.sort_unstable_by(compare)));
                    *outcome = Some(result.map_err(|payload| {
                        format!("sorting worker {} panicked: {}", worker, panic_message(&*payload))
                    }));
                });
            }
        });

        for (worker, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Some(Ok(())) => {}
                Some(Err(message)) => return Err(SortError::Synchronization(message)),
                None => {
                    return Err(SortError::Synchronization(format!(
                        "sorting worker {} did not report completion",
                        worker
                    )))
                }
            }
        }

        log::debug!("{} sorted sub-ranges joined, merging", bounds.len());

        let sorted_parts = bounds.iter().map(|range| batch[range.clone()].iter().copied().map(Ok::<T, Infallible>));
        let mut merged = Vec::with_capacity(batch.len());
        merged.extend(BinaryHeapMerger::new(sorted_parts, compare).map(|item| match item {
            Ok(item) => item,
            Err(never) => match never {},
        }));
        *batch = merged;

        return Ok(());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::ops::Range;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Barrier;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::*;

    use super::{partition_bounds, ExecutionPolicy, RunSorter};
    use crate::sort::SortError;

    #[rstest]
    #[case(10, 3, vec![0..3, 3..6, 6..10])]
    #[case(9, 3, vec![0..3, 3..6, 6..9])]
    #[case(2, 4, vec![0..1, 1..2])]
    #[case(5, 1, vec![0..5])]
    #[case(0, 4, vec![0..0])]
    fn test_partition_bounds(#[case] len: usize, #[case] parts: usize, #[case] expected: Vec<Range<usize>>) {
        assert_eq!(partition_bounds(len, parts), expected);
    }

    #[rstest]
    fn test_run_sorter(
        #[values(ExecutionPolicy::Parallel, ExecutionPolicy::Synchronous)] policy: ExecutionPolicy,
        #[values(1, 3, 8)] threads_number: usize,
        #[values(0, 1, 2, 17, 1000)] len: usize,
    ) {
        let mut rng = StdRng::seed_from_u64(len as u64);
        let mut batch: Vec<i64> = (0..len).map(|_| rng.gen_range(-100..100)).collect();
        let mut expected = batch.clone();
        expected.sort();

        let sorter = RunSorter::new(policy, threads_number).unwrap();
        sorter.sort_by(&mut batch, i64::cmp).unwrap();

        assert_eq!(batch, expected);
    }

    #[test]
    fn test_run_sorter_policies_agree_descending() {
        let mut rng = StdRng::seed_from_u64(11);
        let input: Vec<u32> = (0..5000).map(|_| rng.gen_range(0..300)).collect();
        let compare = |a: &u32, b: &u32| b.cmp(a);

        let mut parallel = input.clone();
        RunSorter::new(ExecutionPolicy::Parallel, 4)
            .unwrap()
            .sort_by(&mut parallel, compare)
            .unwrap();

        let mut synchronous = input.clone();
        RunSorter::new(ExecutionPolicy::Synchronous, 4)
            .unwrap()
            .sort_by(&mut synchronous, compare)
            .unwrap();

        assert_eq!(parallel, synchronous);
    }

    #[rstest]
    fn test_run_sorter_sorted_input_unchanged(
        #[values(ExecutionPolicy::Parallel, ExecutionPolicy::Synchronous)] policy: ExecutionPolicy,
    ) {
        let sorted: Vec<i32> = vec![-3, -3, 0, 1, 1, 1, 5, 8, 13, 21];
        let mut batch = sorted.clone();

        RunSorter::new(policy, 3).unwrap().sort_by(&mut batch, i32::cmp).unwrap();

        assert_eq!(batch, sorted);
    }

    #[test]
    fn test_run_sorter_worker_failure() {
        let mut batch: Vec<i32> = (0..100).rev().collect();
        let compare = |a: &i32, b: &i32| {
            if *a == 13 || *b == 13 {
                panic!("poisoned record");
            }
            a.cmp(b)
        };

        let sorter = RunSorter::new(ExecutionPolicy::Parallel, 4).unwrap();
        match sorter.sort_by(&mut batch, compare) {
            Err(SortError::Synchronization(message)) => assert!(message.contains("poisoned record"), "{}", message),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_run_sorter_workers_run_concurrently() {
        thread_local! {
            static MET: Cell<bool> = Cell::new(false);
        }

        let threads_number = 4;
        let barrier = Barrier::new(threads_number);
        let arrived = AtomicUsize::new(0);
        // every pool worker blocks once until all of them are sorting, which never happens if workers run in turn
        let compare = |a: &i32, b: &i32| {
            if rayon::current_thread_index().is_some() && !MET.with(|met| met.replace(true)) {
                arrived.fetch_add(1, AtomicOrdering::SeqCst);
                barrier.wait();
            }
            a.cmp(b)
        };

        let mut batch: Vec<i32> = (0..400).rev().collect();
        let sorter = RunSorter::new(ExecutionPolicy::Parallel, threads_number).unwrap();
        sorter.sort_by(&mut batch, compare).unwrap();

        assert_eq!(arrived.load(AtomicOrdering::SeqCst), threads_number);
        assert_eq!(batch, (0..400).collect::<Vec<_>>());
    }
}
