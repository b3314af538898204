//! `ext-run-sort` is a bounded-memory external merge sort for files of fixed-width numeric records.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. Sorting is achieved in two passes. During the
//! first pass it sorts runs of data that each fit in the memory budget, during the second pass it merges the
//! sorted runs together. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   the number of records held in memory is derived from a byte budget, accounting for the transient copy
//!   made by the parallel run sort.
//! * **Multithreading support:**
//!   every run is split between a fixed pool of worker threads, sorted in parallel and merged back.
//! * **Custom ordering:**
//!   any comparator can be used, the same one drives run sorting and merging.
//! * **Pluggable run format:**
//!   runs are stored as text by default, `MessagePack` is available as well.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use bytesize::MB;
//!
//! use ext_run_sort::{ExternalSorter, ExternalSorterBuilder, Order};
//!
//! fn main() {
//!     let sorter: ExternalSorter<i64> = ExternalSorterBuilder::new()
//!         .with_memory_budget(50 * MB)
//!         .with_tmp_dir(Path::new("./"))
//!         .build()
//!         .unwrap();
//!
//!     sorter
//!         .sort_by(Path::new("input.txt"), Path::new("output.txt"), Order::Desc.comparator())
//!         .unwrap();
//! }
//! ```

pub mod buffer;
pub mod generator;
pub mod input;
pub mod merger;
pub mod order;
pub mod record;
pub mod run;
pub mod sort;
pub mod sorter;

pub use buffer::{MemoryBudget, AMPLIFICATION_FACTOR};
pub use generator::{RunGenerator, RunPlan};
pub use merger::{merge_runs, BinaryHeapMerger, LinearScanMerger, MergeStrategy};
pub use order::Order;
pub use record::{ParseRecordError, Record};
pub use run::{ExternalRun, ExternalRunError, RmpRun, RunId, RunSet, TextRun};
pub use sort::{ConfigError, ErrorCategory, ExternalSorter, ExternalSorterBuilder, SortError, SortSummary};
pub use sorter::{ExecutionPolicy, RunSorter};
