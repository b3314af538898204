//! K-way mergers.
//!
//! Both mergers take a list of sorted inputs and yield the globally next item across all of them. Equal items are
//! yielded in input order, that is, the input with the lowest index wins a tie. Once an input yields an error the
//! merger returns it and yields nothing afterwards.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::error::Error;
use std::fs;
use std::io::{self, prelude::*};
use std::mem;
use std::path::Path;

use crate::record::Record;
use crate::run::{ExternalRun, ExternalRunError, RunId};
use crate::sort::SortError;

/// K-way merge implementation selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Scans every live input head for each item. Time complexity is *m* \* *n*.
    LinearScan,
    /// Keeps input heads in a binary heap. Time complexity is *m* \* log(*n*).
    BinaryHeap,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::BinaryHeap
    }
}

/// Heap entry ordered by the user-provided compare function.
struct OrderedWrapper<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    value: T,
    compare: F,
}

impl<T, F> OrderedWrapper<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn wrap(value: T, compare: F) -> Self {
        OrderedWrapper { value, compare }
    }

    fn unwrap(self) -> T {
        self.value
    }
}

impl<T, F> PartialEq for OrderedWrapper<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T, F> Eq for OrderedWrapper<T, F> where F: Fn(&T, &T) -> Ordering {}

impl<T, F> PartialOrd for OrderedWrapper<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, F> Ord for OrderedWrapper<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn cmp(&self, other: &Self) -> Ordering {
        (self.compare)(&self.value, &other.value)
    }
}

/// Binary heap merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of items,
/// *n* is the number of chunks (inputs).
pub struct BinaryHeapMerger<T, E, F, C>
where
    E: Error,
    F: Fn(&T, &T) -> Ordering + Copy,
    C: IntoIterator<Item = Result<T, E>>,
{
    // binary heap is max-heap by default so both the value and the input index are reversed
    items: BinaryHeap<(std::cmp::Reverse<OrderedWrapper<T, F>>, std::cmp::Reverse<usize>)>,
    chunks: Vec<C::IntoIter>,
    compare: F,
    initiated: bool,
    failed: bool,
}

impl<T, E, F, C> BinaryHeapMerger<T, E, F, C>
where
    E: Error,
    F: Fn(&T, &T) -> Ordering + Copy,
    C: IntoIterator<Item = Result<T, E>>,
{
    /// Creates an instance of a binary heap merger using chunks as inputs.
    /// Chunk items should be sorted by `compare` otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `chunks` - Chunks to be merged in a single sorted one
    /// * `compare` - Function used to compare items
    pub fn new<I>(chunks: I, compare: F) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| c.into_iter()));
        let items = BinaryHeap::with_capacity(chunks.len());

        return BinaryHeapMerger {
            chunks,
            items,
            compare,
            initiated: false,
            failed: false,
        };
    }

    fn push_next(&mut self, idx: usize) -> Result<(), E> {
        if let Some(item) = self.chunks[idx].next() {
            let item = item?;
            self.items.push((
                std::cmp::Reverse(OrderedWrapper::wrap(item, self.compare)),
                std::cmp::Reverse(idx),
            ));
        }

        return Ok(());
    }
}

impl<T, E, F, C> Iterator for BinaryHeapMerger<T, E, F, C>
where
    E: Error,
    F: Fn(&T, &T) -> Ordering + Copy,
    C: IntoIterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in the compare function order.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if !self.initiated {
            self.initiated = true;
            for idx in 0..self.chunks.len() {
                if let Err(err) = self.push_next(idx) {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }

        let (result, idx) = self.items.pop()?;
        if let Err(err) = self.push_next(idx.0) {
            self.failed = true;
            return Some(Err(err));
        }

        return Some(Ok(result.0.unwrap()));
    }
}

/// Linear scan merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Time complexity is *m* \* *n* where *m* is the number of items, *n* is the number of chunks (inputs).
pub struct LinearScanMerger<T, E, F, C>
where
    E: Error,
    F: Fn(&T, &T) -> Ordering,
    C: IntoIterator<Item = Result<T, E>>,
{
    // current head of every live chunk ordered by chunk index
    heads: Vec<(T, usize)>,
    chunks: Vec<C::IntoIter>,
    compare: F,
    initiated: bool,
    failed: bool,
}

impl<T, E, F, C> LinearScanMerger<T, E, F, C>
where
    E: Error,
    F: Fn(&T, &T) -> Ordering,
    C: IntoIterator<Item = Result<T, E>>,
{
    /// Creates an instance of a linear scan merger using chunks as inputs.
    /// Chunk items should be sorted by `compare` otherwise the result is undefined.
    pub fn new<I>(chunks: I, compare: F) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| c.into_iter()));
        let heads = Vec::with_capacity(chunks.len());

        return LinearScanMerger {
            heads,
            chunks,
            compare,
            initiated: false,
            failed: false,
        };
    }

    fn init(&mut self) -> Result<(), E> {
        for (idx, chunk) in self.chunks.iter_mut().enumerate() {
            if let Some(item) = chunk.next() {
                self.heads.push((item?, idx));
            }
        }

        return Ok(());
    }

    /// Position of the extremal head. The first one wins among equal heads.
    fn select(&self) -> Option<usize> {
        let mut selected: Option<usize> = None;
        for (pos, (value, _)) in self.heads.iter().enumerate() {
            match selected {
                Some(best) if (self.compare)(value, &self.heads[best].0) != Ordering::Less => {}
                _ => selected = Some(pos),
            }
        }

        return selected;
    }
}

impl<T, E, F, C> Iterator for LinearScanMerger<T, E, F, C>
where
    E: Error,
    F: Fn(&T, &T) -> Ordering,
    C: IntoIterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in the compare function order.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if !self.initiated {
            self.initiated = true;
            if let Err(err) = self.init() {
                self.failed = true;
                return Some(Err(err));
            }
        }

        let pos = self.select()?;
        let idx = self.heads[pos].1;
        match self.chunks[idx].next() {
            Some(Ok(item)) => Some(Ok(mem::replace(&mut self.heads[pos].0, item))),
            Some(Err(err)) => {
                self.failed = true;
                Some(Err(err))
            }
            None => Some(Ok(self.heads.remove(pos).0)),
        }
    }
}

/// Merges persisted runs into `output` using the selected strategy.
/// The output file is created or truncated. Returns the number of records written.
pub fn merge_runs<T, C, F>(
    runs: &[RunId],
    output: &Path,
    strategy: MergeStrategy,
    compare: F,
    rw_buf_size: Option<usize>,
) -> Result<u64, SortError>
where
    T: Record,
    C: ExternalRun<T>,
    F: Fn(&T, &T) -> Ordering + Copy,
{
    let mut cursors = Vec::with_capacity(runs.len());
    for run in runs {
        let cursor = C::open(run, rw_buf_size).map_err(|err| {
            SortError::IO(io::Error::new(
                err.kind(),
                format!("run {} not readable: {}", run.path().display(), err),
            ))
        })?;
        cursors.push(cursor);
    }

    let output_file = fs::File::create(output).map_err(SortError::Output)?;
    let mut output_writer = match rw_buf_size {
        Some(buf_size) => io::BufWriter::with_capacity(buf_size, output_file),
        None => io::BufWriter::new(output_file),
    };

    log::info!("merging {} runs into {}", runs.len(), output.display());

    let written = match strategy {
        MergeStrategy::BinaryHeap => {
            write_merged(BinaryHeapMerger::new(cursors, compare), &mut output_writer, cursor_error::<T, C>)?
        }
        MergeStrategy::LinearScan => {
            write_merged(LinearScanMerger::new(cursors, compare), &mut output_writer, cursor_error::<T, C>)?
        }
    };
    output_writer.flush().map_err(SortError::Output)?;

    return Ok(written);
}

fn cursor_error<T, C: ExternalRun<T>>(err: C::DeserializationError) -> SortError {
    match C::read_error(err) {
        ExternalRunError::IO(err) => SortError::IO(err),
        ExternalRunError::SerializationError(err) => SortError::DeserializationError(Box::new(err)),
    }
}

fn write_merged<T, E, W>(
    merged: impl Iterator<Item = Result<T, E>>,
    writer: &mut W,
    on_error: impl Fn(E) -> SortError,
) -> Result<u64, SortError>
where
    T: Record,
    W: Write,
{
    let mut written = 0;
    for item in merged {
        let item = item.map_err(&on_error)?;
        writeln!(writer, "{}", item).map_err(SortError::Output)?;
        written += 1;
    }

    return Ok(written);
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;
    use std::error::Error;
    use std::fs;
    use std::io::{self, ErrorKind};

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::*;

    use super::{cursor_error, merge_runs, write_merged, BinaryHeapMerger, LinearScanMerger, MergeStrategy};
    use crate::input::ReadError;
    use crate::run::{ExternalRun, TextRun};
    use crate::sort::SortError;

    fn merge(
        strategy: MergeStrategy,
        chunks: Vec<Vec<Result<i32, io::Error>>>,
        compare: impl Fn(&i32, &i32) -> Ordering + Copy,
    ) -> Vec<Result<i32, io::Error>> {
        match strategy {
            MergeStrategy::BinaryHeap => BinaryHeapMerger::new(chunks, compare).collect(),
            MergeStrategy::LinearScan => LinearScanMerger::new(chunks, compare).collect(),
        }
    }

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![Ok(1), Ok(4), Ok(7)],
            vec![Ok(2), Ok(5), Ok(8)],
            vec![Ok(3), Ok(6), Ok(9)],
        ],
        vec![Ok(1), Ok(2), Ok(3), Ok(4), Ok(5), Ok(6), Ok(7), Ok(8), Ok(9)],
    )]
    #[case(
        vec![
            vec![Ok(4), Ok(5), Ok(7)],
            vec![Ok(1), Ok(6)],
            vec![Ok(3)],
            vec![],
        ],
        vec![Ok(1), Ok(3), Ok(4), Ok(5), Ok(6), Ok(7)],
    )]
    #[case(
        vec![
            vec![Result::Err(io::Error::new(ErrorKind::Other, "test error"))]
        ],
        vec![
            Result::Err(io::Error::new(ErrorKind::Other, "test error"))
        ],
    )]
    #[case(
        vec![
            vec![Ok(3), Result::Err(io::Error::new(ErrorKind::Other, "test error")), Ok(4)],
            vec![Ok(1), Ok(2)],
        ],
        vec![
            Ok(1),
            Ok(2),
            Result::Err(io::Error::new(ErrorKind::Other, "test error")),
        ],
    )]
    fn test_merger(
        #[values(MergeStrategy::BinaryHeap, MergeStrategy::LinearScan)] strategy: MergeStrategy,
        #[case] chunks: Vec<Vec<Result<i32, io::Error>>>,
        #[case] expected_result: Vec<Result<i32, io::Error>>,
    ) {
        let actual_result = merge(strategy, chunks, i32::cmp);
        assert!(
            compare_vectors_of_result::<_, io::Error>(&actual_result, &expected_result),
            "actual={:?}, expected={:?}",
            actual_result,
            expected_result
        );
    }

    #[rstest]
    fn test_merger_descending(#[values(MergeStrategy::BinaryHeap, MergeStrategy::LinearScan)] strategy: MergeStrategy) {
        let chunks = vec![vec![Ok(9), Ok(3)], vec![Ok(8), Ok(8), Ok(1)], vec![Ok(10)]];

        let actual: Vec<i32> = merge(strategy, chunks, |a, b| b.cmp(a))
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(actual, vec![10, 9, 8, 8, 3, 1]);
    }

    #[test]
    fn test_merger_ties_prefer_lowest_chunk() {
        // items are compared by the first field only, the second one tracks the source chunk
        let chunks: Vec<Vec<Result<(i32, usize), io::Error>>> = vec![
            vec![Ok((1, 0)), Ok((2, 0))],
            vec![Ok((1, 1)), Ok((2, 1))],
            vec![Ok((0, 2)), Ok((1, 2)), Ok((2, 2))],
        ];
        let compare = |a: &(i32, usize), b: &(i32, usize)| a.0.cmp(&b.0);
        let expected = vec![(0, 2), (1, 0), (1, 1), (1, 2), (2, 0), (2, 1), (2, 2)];

        let heap: Vec<_> = BinaryHeapMerger::new(chunks.iter().map(clone_chunk), compare)
            .map(Result::unwrap)
            .collect();
        let linear: Vec<_> = LinearScanMerger::new(chunks.iter().map(clone_chunk), compare)
            .map(Result::unwrap)
            .collect();

        assert_eq!(heap, expected);
        assert_eq!(linear, expected);
    }

    #[test]
    fn test_merger_strategies_equivalence() {
        let mut rng = StdRng::seed_from_u64(7);
        let chunks: Vec<Vec<i32>> = (0..12)
            .map(|_| {
                let len = rng.gen_range(0..50);
                let mut chunk: Vec<i32> = (0..len).map(|_| rng.gen_range(-20..20)).collect();
                chunk.sort();
                chunk
            })
            .collect();
        let as_input = |chunk: &Vec<i32>| chunk.iter().copied().map(Ok::<i32, io::Error>).collect::<Vec<_>>();

        let heap: Vec<i32> = BinaryHeapMerger::new(chunks.iter().map(as_input), i32::cmp)
            .map(Result::unwrap)
            .collect();
        let linear: Vec<i32> = LinearScanMerger::new(chunks.iter().map(as_input), i32::cmp)
            .map(Result::unwrap)
            .collect();

        let mut expected: Vec<i32> = chunks.concat();
        expected.sort();

        assert_eq!(heap, expected);
        assert_eq!(linear, expected);
    }

    #[rstest]
    fn test_merge_runs(#[values(MergeStrategy::BinaryHeap, MergeStrategy::LinearScan)] strategy: MergeStrategy) {
        let tmp_dir = tempfile::tempdir().unwrap();
        let runs = vec![
            TextRun::<i32>::persist(tmp_dir.path(), 0, vec![1, 4, 7], None).unwrap(),
            TextRun::<i32>::persist(tmp_dir.path(), 1, vec![], None).unwrap(),
            TextRun::<i32>::persist(tmp_dir.path(), 2, vec![2, 5, 8], None).unwrap(),
            TextRun::<i32>::persist(tmp_dir.path(), 3, vec![3, 6, 9], None).unwrap(),
        ];
        let output = tmp_dir.path().join("output.txt");
        fs::write(&output, "stale content that must be truncated\n").unwrap();

        let written = merge_runs::<i32, TextRun<i32>, _>(&runs, &output, strategy, i32::cmp, None).unwrap();

        assert_eq!(written, 9);
        assert_eq!(fs::read_to_string(&output).unwrap(), "1\n2\n3\n4\n5\n6\n7\n8\n9\n");
    }

    #[test]
    fn test_merge_runs_empty() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let output = tmp_dir.path().join("output.txt");

        let written =
            merge_runs::<i32, TextRun<i32>, _>(&[], &output, MergeStrategy::default(), i32::cmp, None).unwrap();

        assert_eq!(written, 0);
        assert_eq!(fs::read_to_string(&output).unwrap(), "");
    }

    #[test]
    fn test_merge_runs_missing_run() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let runs = vec![
            TextRun::<i32>::persist(tmp_dir.path(), 0, vec![1, 2], None).unwrap(),
            TextRun::<i32>::persist(tmp_dir.path(), 1, vec![3, 4], None).unwrap(),
        ];
        fs::remove_file(runs[1].path()).unwrap();
        let output = tmp_dir.path().join("output.txt");

        let result = merge_runs::<i32, TextRun<i32>, _>(&runs, &output, MergeStrategy::default(), i32::cmp, None);

        match result {
            Err(SortError::IO(err)) => assert_eq!(err.kind(), ErrorKind::NotFound),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_merge_runs_corrupted_run() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let runs = vec![
            TextRun::<i32>::persist(tmp_dir.path(), 0, vec![1, 2], None).unwrap(),
            TextRun::<i32>::persist(tmp_dir.path(), 1, vec![3, 4], None).unwrap(),
        ];
        fs::write(runs[1].path(), "3\nnot-a-number\n").unwrap();
        let output = tmp_dir.path().join("output.txt");

        let result = merge_runs::<i32, TextRun<i32>, _>(&runs, &output, MergeStrategy::default(), i32::cmp, None);

        assert!(matches!(result, Err(SortError::DeserializationError(_))));
    }

    #[test]
    fn test_merge_run_read_failure() {
        let cursors = vec![
            vec![Ok(1), Ok(4)],
            vec![Ok(2), Err(ReadError::IO(io::Error::new(ErrorKind::Other, "device detached")))],
        ];
        let mut output = Vec::new();

        let result = write_merged(
            BinaryHeapMerger::new(cursors, i32::cmp),
            &mut output,
            cursor_error::<i32, TextRun<i32>>,
        );

        match result {
            Err(SortError::IO(err)) => assert_eq!(err.kind(), ErrorKind::Other),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(output, b"1\n");
    }

    fn clone_chunk<T: Clone>(chunk: &Vec<Result<T, io::Error>>) -> Vec<Result<T, io::Error>> {
        chunk
            .iter()
            .map(|item| match item {
                Ok(item) => Ok(item.clone()),
                Err(err) => Err(io::Error::new(err.kind(), err.to_string())),
            })
            .collect()
    }

    fn compare_vectors_of_result<T: PartialEq, E: Error + 'static>(
        actual: &Vec<Result<T, E>>,
        expected: &Vec<Result<T, E>>,
    ) -> bool {
        actual.len() == expected.len()
            && actual
                .into_iter()
                .zip(expected)
                .all(
                    |(actual_result, expected_result)| match (actual_result, expected_result) {
                        (Ok(actual_result), Ok(expected_result)) if actual_result == expected_result => true,
                        (Err(actual_err), Err(expected_err)) => actual_err.to_string() == expected_err.to_string(),
                        _ => false,
                    },
                )
    }
}
