//! Run generation.

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use crate::input::{count_records, ReadError, RecordReader};
use crate::record::Record;
use crate::run::{ExternalRun, ExternalRunError, RunSet};
use crate::sort::SortError;
use crate::sorter::RunSorter;

/// Slicing of an input into runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RunPlan {
    pub total_records: u64,
    pub records_per_run: usize,
}

impl RunPlan {
    /// Number of runs needed to hold every record. The last run holds the remainder.
    pub fn run_count(&self) -> usize {
        if self.records_per_run == 0 {
            return 0;
        }
        let per_run = self.records_per_run as u64;
        ((self.total_records + per_run - 1) / per_run) as usize
    }

    /// Number of records the `index`-th run holds.
    pub fn run_len(&self, index: usize) -> usize {
        let start = index as u64 * self.records_per_run as u64;
        let remaining = self.total_records.saturating_sub(start);

        return remaining.min(self.records_per_run as u64) as usize;
    }
}

/// Splits an input file into sorted runs persisted inside a temporary directory.
pub struct RunGenerator<'a, T, C>
where
    T: Record,
    C: ExternalRun<T>,
{
    sorter: &'a RunSorter,
    records_per_run: usize,
    tmp_dir: &'a Path,
    rw_buf_size: Option<usize>,

    external_run_type: PhantomData<C>,
    item_type: PhantomData<T>,
}

impl<'a, T, C> RunGenerator<'a, T, C>
where
    T: Record,
    C: ExternalRun<T>,
{
    /// Creates a run generator.
    ///
    /// # Arguments
    /// * `sorter` - Sorter used to sort every run before it is persisted
    /// * `records_per_run` - Maximum number of records a run holds, must be positive
    /// * `tmp_dir` - Directory the runs are persisted in
    /// * `rw_buf_size` - Run file write buffer size
    pub fn new(sorter: &'a RunSorter, records_per_run: usize, tmp_dir: &'a Path, rw_buf_size: Option<usize>) -> Self {
        RunGenerator {
            sorter,
            records_per_run,
            tmp_dir,
            rw_buf_size,
            external_run_type: PhantomData,
            item_type: PhantomData,
        }
    }

    /// Counts the input records and plans the runs.
    pub fn plan(&self, input: &Path) -> Result<RunPlan, SortError> {
        let total_records = count_records(self.open_input(input)?).map_err(|source| SortError::Input {
            path: input.to_owned(),
            source,
        })?;

        return Ok(RunPlan {
            total_records,
            records_per_run: self.records_per_run,
        });
    }

    /// Reads the input, sorts it run by run and persists every run.
    /// Returns persisted runs in input order.
    pub fn generate<F>(&self, input: &Path, compare: F) -> Result<RunSet, SortError>
    where
        F: Fn(&T, &T) -> Ordering + Copy + Send + Sync,
    {
        let plan = self.plan(input)?;
        let run_count = plan.run_count();
        log::info!(
            "generating {} runs from {} records ({} records per run)",
            run_count,
            plan.total_records,
            plan.records_per_run
        );

        let runs = self.generate_runs(input, &plan, self.open_input(input)?, compare)?;
        log::debug!("run generation done");

        return Ok(runs);
    }

    /// Slices the records of an opened input into runs following the plan.
    fn generate_runs<R, F>(&self, input: &Path, plan: &RunPlan, reader: R, compare: F) -> Result<RunSet, SortError>
    where
        R: io::BufRead,
        F: Fn(&T, &T) -> Ordering + Copy + Send + Sync,
    {
        let mut records = RecordReader::<_, T>::new(reader);
        let run_count = plan.run_count();
        let mut runs = RunSet::with_capacity(run_count);

        for index in 0..run_count {
            let run_len = plan.run_len(index);
            let mut batch = Vec::with_capacity(run_len);
            while batch.len() < run_len {
                match records.next() {
                    Some(record) => batch.push(record.map_err(|err| read_failed(input, err))?),
                    None => return Err(input_changed(plan, index, batch.len())),
                }
            }

            log::debug!("sorting run {} ({} records) ...", index, batch.len());
            self.sorter.sort_by(&mut batch, compare)?;

            log::debug!("saving run {}", index);
            let run = C::persist(self.tmp_dir, index, batch, self.rw_buf_size).map_err(|err| match err {
                ExternalRunError::IO(err) => SortError::IO(err),
                ExternalRunError::SerializationError(err) => SortError::SerializationError(Box::new(err)),
            })?;
            runs.push(run);
        }

        if let Some(record) = records.next() {
            record.map_err(|err| read_failed(input, err))?;
            return Err(SortError::InputChanged {
                expected: plan.total_records,
                actual: plan.total_records + 1,
            });
        }

        return Ok(runs);
    }

    fn open_input(&self, input: &Path) -> Result<io::BufReader<fs::File>, SortError> {
        let input_file = fs::File::open(input).map_err(|source| SortError::Input {
            path: input.to_owned(),
            source,
        })?;

        return Ok(match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, input_file),
            None => io::BufReader::new(input_file),
        });
    }
}

fn input_changed(plan: &RunPlan, index: usize, read: usize) -> SortError {
    let consumed = (0..index).map(|i| plan.run_len(i) as u64).sum::<u64>();

    return SortError::InputChanged {
        expected: plan.total_records,
        actual: consumed + read as u64,
    };
}

fn read_failed(input: &Path, err: ReadError) -> SortError {
    match err {
        ReadError::IO(source) => SortError::Input {
            path: input.to_owned(),
            source,
        },
        ReadError::Parse(err) => SortError::Parse(err),
    }
}
