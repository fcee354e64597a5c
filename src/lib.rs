//! `record-sort` sorts files of fixed-width records that may not fit in memory.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. Sorting is achieved in two passes. During the
//! first pass it sorts chunks of data that each fit in RAM, during the second pass it merges the sorted chunks
//! together. For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `record-sort` supports the following features:
//!
//! * **Bounded memory:**
//!   record data held in memory never exceeds the configured budget. Inputs fitting in the budget are sorted
//!   in memory without touching the disk, larger ones are split into sorted spill files merged in rounds.
//! * **Pluggable in-memory sort:**
//!   chunks are sorted by an interchangeable [`SortStrategy`] (quick sort variants, merge sort, counting sort,
//!   multi-threaded sort). The strategy never changes the output bytes.
//! * **Custom ordering:**
//!   records are compared by a [`RecordCodec`], raw bytes by default, optionally by a key range or reversed.
//! * **No leftovers:**
//!   spill files live in a directory owned by the run and are removed however the run ends.
//!   The destination file is replaced only after a fully successful sort.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use record_sort::{ExternalSorterBuilder, RawCodec, StrategyKind};
//!
//! fn main() {
//!     let sorter = ExternalSorterBuilder::new(RawCodec::new(100).unwrap())
//!         .with_memory_budget(50 * 1024 * 1024)
//!         .with_strategy(StrategyKind::Parallel)
//!         .with_tmp_dir(Path::new("./"))
//!         .with_output(Path::new("output.bin"))
//!         .build()
//!         .unwrap();
//!
//!     let output = sorter.sort_file(Path::new("input.bin")).unwrap();
//!     println!("sorted {} records into {}", output.records(), output.path().display());
//! }
//! ```

pub mod block;
pub mod chunk;
pub mod codec;
pub mod merger;
pub mod sort;
pub mod spill;
pub mod strategy;

pub use block::RecordBlock;
pub use codec::{KeyedCodec, RawCodec, RecordCodec, Reversed};
pub use merger::{BinaryHeapMerger, MergePlan};
pub use sort::{sort_file, ExternalSorter, ExternalSorterBuilder, SortError, SortOutput};
pub use strategy::{
    CountingSort, IterativeQuickSort, MergeSort, ParallelSort, QuickSort, SortStrategy, StrategyKind,
};
