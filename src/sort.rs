//! External sorter.

use log;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::thread;

use crate::buffer::MemoryBudget;
use crate::generator::RunGenerator;
use crate::merger::{merge_runs, MergeStrategy};
use crate::record::{ParseRecordError, Record};
use crate::run::{ExternalRun, TextRun};
use crate::sorter::{ExecutionPolicy, RunSorter};

/// Sorter configuration error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Memory budget was not provided.
    MissingMemoryBudget,
    /// Memory budget cannot hold a single record.
    MemoryBudgetTooSmall { budget: u64, record_width: usize },
    /// Zero worker threads requested.
    ZeroThreads,
}

impl Error for ConfigError {}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ConfigError::MissingMemoryBudget => write!(f, "memory budget is required"),
            ConfigError::MemoryBudgetTooSmall { budget, record_width } => write!(
                f,
                "memory budget of {} bytes cannot hold a single {}-byte record",
                budget, record_width
            ),
            ConfigError::ZeroThreads => write!(f, "threads number must be positive"),
        }
    }
}

/// Broad class of a [`SortError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid sorter configuration, reported before any I/O.
    Configuration,
    /// Infrastructure failure: unreadable input, unwritable output or temporary data.
    Io,
    /// Parallel sorting worker failure.
    Synchronization,
}

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Invalid sorter configuration.
    Config(ConfigError),
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Input file opening or reading error.
    Input { path: PathBuf, source: io::Error },
    /// Malformed input record.
    Parse(ParseRecordError),
    /// Input records number changed between the counting and the reading passes.
    InputChanged { expected: u64, actual: u64 },
    /// Run file I/O error.
    IO(io::Error),
    /// Run serialization error.
    SerializationError(Box<dyn Error + Send + Sync>),
    /// Run deserialization error.
    DeserializationError(Box<dyn Error + Send + Sync>),
    /// Output file creation or writing error.
    Output(io::Error),
    /// Parallel sorting worker failure.
    Synchronization(String),
}

impl SortError {
    pub fn category(&self) -> ErrorCategory {
        match &self {
            SortError::Config(_) => ErrorCategory::Configuration,
            SortError::Synchronization(_) => ErrorCategory::Synchronization,
            _ => ErrorCategory::Io,
        }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            SortError::Config(err) => err,
            SortError::TempDir(err) => err,
            SortError::ThreadPoolBuildError(err) => err,
            SortError::Input { source, .. } => source,
            SortError::Parse(err) => err,
            SortError::IO(err) => err,
            SortError::SerializationError(err) => err.as_ref(),
            SortError::DeserializationError(err) => err.as_ref(),
            SortError::Output(err) => err,
            SortError::InputChanged { .. } | SortError::Synchronization(_) => return None,
        })
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::Config(err) => write!(f, "invalid configuration: {}", err),
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Input { path, source } => write!(f, "input {} not readable: {}", path.display(), source),
            SortError::Parse(err) => write!(f, "input data error: {}", err),
            SortError::InputChanged { expected, actual } => write!(
                f,
                "input changed while sorting (expected {} records, found {})",
                expected, actual
            ),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::SerializationError(err) => write!(f, "data serialization error: {}", err),
            SortError::DeserializationError(err) => write!(f, "data deserialization error: {}", err),
            SortError::Output(err) => write!(f, "output not written: {}", err),
            SortError::Synchronization(msg) => write!(f, "parallel sorting failed: {}", msg),
        }
    }
}

impl From<ConfigError> for SortError {
    fn from(err: ConfigError) -> Self {
        SortError::Config(err)
    }
}

/// Outcome of a successful sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSummary {
    /// Number of records found in the input.
    pub total_records: u64,
    /// Maximum number of records a single run holds.
    pub records_per_run: usize,
    /// Number of runs generated.
    pub runs: usize,
    /// Number of records written to the output.
    pub written: u64,
}

/// Number of sorting threads used when none is configured: all available cores but one, which is left for I/O.
pub fn default_threads_number() -> usize {
    thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<T, C = TextRun<T>>
where
    T: Record,
    C: ExternalRun<T>,
{
    /// Memory available to a single run.
    memory_budget: Option<MemoryBudget>,
    /// Number of threads to be used to sort data in parallel.
    threads_number: Option<usize>,
    /// Run sorting strategy.
    execution_policy: ExecutionPolicy,
    /// Run merging strategy.
    merge_strategy: MergeStrategy,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,

    /// External run type.
    external_run_type: PhantomData<C>,
    /// Record type.
    item_type: PhantomData<T>,
}

impl<T, C> ExternalSorterBuilder<T, C>
where
    T: Record,
    C: ExternalRun<T>,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    /// The configuration is validated before any file system access.
    pub fn build(self) -> Result<ExternalSorter<T, C>, SortError> {
        ExternalSorter::new(
            self.memory_budget,
            self.threads_number,
            self.execution_policy,
            self.merge_strategy,
            self.tmp_dir.as_deref(),
            self.rw_buf_size,
        )
    }

    /// Sets memory budget in bytes. Required.
    pub fn with_memory_budget(mut self, bytes: u64) -> ExternalSorterBuilder<T, C> {
        self.memory_budget = Some(MemoryBudget::new(bytes));
        return self;
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<T, C> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets run sorting strategy.
    pub fn with_execution_policy(mut self, execution_policy: ExecutionPolicy) -> ExternalSorterBuilder<T, C> {
        self.execution_policy = execution_policy;
        return self;
    }

    /// Sets run merging strategy.
    pub fn with_merge_strategy(mut self, merge_strategy: MergeStrategy) -> ExternalSorterBuilder<T, C> {
        self.merge_strategy = merge_strategy;
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<T, C> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets run read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<T, C> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }
}

impl<T, C> Default for ExternalSorterBuilder<T, C>
where
    T: Record,
    C: ExternalRun<T>,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            memory_budget: None,
            threads_number: None,
            execution_policy: ExecutionPolicy::default(),
            merge_strategy: MergeStrategy::default(),
            tmp_dir: None,
            rw_buf_size: None,
            external_run_type: PhantomData,
            item_type: PhantomData,
        }
    }
}

/// External sorter.
pub struct ExternalSorter<T, C = TextRun<T>>
where
    T: Record,
    C: ExternalRun<T>,
{
    /// Memory available to a single run.
    memory_budget: MemoryBudget,
    /// Maximum number of records a single run holds.
    records_per_run: usize,
    /// Run sorter.
    sorter: RunSorter,
    /// Run merging strategy.
    merge_strategy: MergeStrategy,
    /// Root directory for per-sort temporary directories.
    tmp_root: Option<PathBuf>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,

    /// External run type.
    external_run_type: PhantomData<C>,
    /// Record type.
    item_type: PhantomData<T>,
}

impl<T, C> ExternalSorter<T, C>
where
    T: Record,
    C: ExternalRun<T>,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `memory_budget` - Memory available to a single run. Required.
    /// * `threads_number` - Number of threads to be used to sort data in parallel. If the parameter is [`None`]
    ///   all available CPU cores but one will be used.
    /// * `execution_policy` - Run sorting strategy.
    /// * `merge_strategy` - Run merging strategy.
    /// * `tmp_path` - Directory to be used to store temporary data. If parameter is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Run files read/write buffer size.
    pub fn new(
        memory_budget: Option<MemoryBudget>,
        threads_number: Option<usize>,
        execution_policy: ExecutionPolicy,
        merge_strategy: MergeStrategy,
        tmp_path: Option<&Path>,
        rw_buf_size: Option<usize>,
    ) -> Result<Self, SortError> {
        let memory_budget = memory_budget.ok_or(ConfigError::MissingMemoryBudget)?;
        let records_per_run = memory_budget.records_per_run::<T>();
        if records_per_run == 0 {
            return Err(ConfigError::MemoryBudgetTooSmall {
                budget: memory_budget.bytes(),
                record_width: T::width(),
            }
            .into());
        }

        let threads_number = threads_number.unwrap_or_else(default_threads_number);
        if threads_number == 0 {
            return Err(ConfigError::ZeroThreads.into());
        }

        log::info!(
            "memory budget {} ({} records per run), {:?} run sorting, {:?} merging",
            memory_budget,
            records_per_run,
            execution_policy,
            merge_strategy
        );

        return Ok(ExternalSorter {
            memory_budget,
            records_per_run,
            sorter: RunSorter::new(execution_policy, threads_number)?,
            merge_strategy,
            tmp_root: tmp_path.map(Path::to_path_buf),
            rw_buf_size,
            external_run_type: PhantomData,
            item_type: PhantomData,
        });
    }

    pub fn memory_budget(&self) -> MemoryBudget {
        self.memory_budget
    }

    pub fn records_per_run(&self) -> usize {
        self.records_per_run
    }

    fn init_tmp_directory(&self) -> Result<tempfile::TempDir, SortError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ext-run-sort-");

        let tmp_dir = if let Some(tmp_root) = &self.tmp_root {
            builder.tempdir_in(tmp_root)
        } else {
            builder.tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Sorts records of the `input` file in ascending order and writes them to the `output` file.
    ///
    /// # Arguments
    /// * `input` - File of whitespace delimited records
    /// * `output` - File to be created (or truncated) for the sorted records, one per line
    pub fn sort(&self, input: &Path, output: &Path) -> Result<SortSummary, SortError>
    where
        T: Ord,
    {
        self.sort_by(input, output, T::cmp)
    }

    /// Sorts records of the `input` file using a custom compare function and writes them to the `output` file.
    ///
    /// # Arguments
    /// * `input` - File of whitespace delimited records
    /// * `output` - File to be created (or truncated) for the sorted records, one per line
    /// * `compare` - Function be be used to compare records
    pub fn sort_by<F>(&self, input: &Path, output: &Path, compare: F) -> Result<SortSummary, SortError>
    where
        F: Fn(&T, &T) -> Ordering + Sync + Send + Copy,
    {
        // each sort call owns a uniquely named directory, removed on drop if the sort fails
        let tmp_dir = self.init_tmp_directory()?;

        let generator: RunGenerator<T, C> =
            RunGenerator::new(&self.sorter, self.records_per_run, tmp_dir.path(), self.rw_buf_size);
        let runs = generator.generate(input, compare)?;
        let total_records: u64 = runs.iter().map(|run| run.len()).sum();

        log::debug!("external sort preparation done");

        let written = merge_runs::<T, C, F>(&runs, output, self.merge_strategy, compare, self.rw_buf_size)?;

        log::info!("{} records sorted into {} using {} runs", written, output.display(), runs.len());

        let tmp_path = tmp_dir.path().to_path_buf();
        if let Err(err) = tmp_dir.close() {
            log::warn!("temporary directory {} not removed: {}", tmp_path.display(), err);
        }

        return Ok(SortSummary {
            total_records,
            records_per_run: self.records_per_run,
            runs: runs.len(),
            written,
        });
    }
}
