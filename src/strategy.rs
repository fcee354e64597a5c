//! In-memory sort strategies.
//!
//! Every strategy sorts a [`RecordBlock`] in non-decreasing order according to a [`RecordCodec`].
//! Strategies are interchangeable: they differ only in CPU and memory characteristics, never in
//! the resulting order of distinguishable records.

use std::cmp::Ordering;
use std::fmt;
use std::slice;
use std::str::FromStr;

use log;
use rayon::prelude::*;

use crate::{RecordBlock, RecordCodec};

/// Ranges shorter than this are finished with insertion sort.
const INSERTION_SORT_THRESHOLD: usize = 16;

/// In-memory sort strategy interface.
pub trait SortStrategy: Send + Sync {
    /// Returns strategy name.
    fn name(&self) -> &'static str;

    /// Sorts the block in place.
    fn sort<C: RecordCodec>(&self, block: &mut RecordBlock, codec: &C);
}

/// Recursive partition-exchange sort (Hoare partitioning, median-of-three pivot).
/// Not stable. Recursion depth is bounded by *log(n)* since only the smaller part is recursed into.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickSort;

impl SortStrategy for QuickSort {
    fn name(&self) -> &'static str {
        "quick"
    }

    fn sort<C: RecordCodec>(&self, block: &mut RecordBlock, codec: &C) {
        let mut pivot = vec![0; block.width()];
        let len = block.len();
        quick_sort_range(block, 0, len, codec, &mut pivot);
    }
}

fn quick_sort_range<C: RecordCodec>(
    block: &mut RecordBlock,
    mut lo: usize,
    mut hi: usize,
    codec: &C,
    pivot: &mut [u8],
) {
    while hi - lo > INSERTION_SORT_THRESHOLD {
        let mid = median_of_three(block, lo, hi, codec);
        block.copy_record_to(mid, pivot);

        let mut i = lo;
        let mut j = hi - 1;
        let split = loop {
            while codec.compare(block.record(i), pivot) == Ordering::Less {
                i += 1;
            }
            while codec.compare(block.record(j), pivot) == Ordering::Greater {
                j -= 1;
            }
            if i >= j {
                break j + 1;
            }
            block.swap(i, j);
            i += 1;
            j -= 1;
        };

        if split - lo < hi - split {
            quick_sort_range(block, lo, split, codec, pivot);
            lo = split;
        } else {
            quick_sort_range(block, split, hi, codec, pivot);
            hi = split;
        }
    }

    insertion_sort(block, lo, hi, codec);
}

/// Iterative partition-exchange sort with an explicit range stack and three-way partitioning.
/// Runs of equal records are settled in a single pass, so inputs with few distinct values stay fast.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterativeQuickSort;

impl SortStrategy for IterativeQuickSort {
    fn name(&self) -> &'static str {
        "iterative-quick"
    }

    fn sort<C: RecordCodec>(&self, block: &mut RecordBlock, codec: &C) {
        let mut pivot = vec![0; block.width()];
        let mut stack = vec![(0, block.len())];

        while let Some((lo, hi)) = stack.pop() {
            if hi - lo <= INSERTION_SORT_THRESHOLD {
                insertion_sort(block, lo, hi, codec);
                continue;
            }

            let mid = median_of_three(block, lo, hi, codec);
            block.copy_record_to(mid, &mut pivot);

            // [lo, lt) < pivot, [lt, i) == pivot, [gt, hi) > pivot
            let (mut lt, mut i, mut gt) = (lo, lo, hi);
            while i < gt {
                match codec.compare(block.record(i), &pivot) {
                    Ordering::Less => {
                        block.swap(lt, i);
                        lt += 1;
                        i += 1;
                    }
                    Ordering::Greater => {
                        gt -= 1;
                        block.swap(i, gt);
                    }
                    Ordering::Equal => i += 1,
                }
            }

            // smaller range goes on top so the stack stays logarithmic
            if lt - lo < hi - gt {
                stack.push((gt, hi));
                stack.push((lo, lt));
            } else {
                stack.push((lo, lt));
                stack.push((gt, hi));
            }
        }
    }
}

/// Bottom-up merge sort. Stable, uses one auxiliary buffer of the block size.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeSort;

impl SortStrategy for MergeSort {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn sort<C: RecordCodec>(&self, block: &mut RecordBlock, codec: &C) {
        let len = block.len();
        let width = block.width();
        if len < 2 {
            return;
        }

        let mut aux = vec![0; block.as_bytes().len()];
        let mut in_aux = false;
        let mut run = 1;
        while run < len {
            if in_aux {
                merge_pass(&aux, block.as_bytes_mut(), run * width, width, codec);
            } else {
                merge_pass(block.as_bytes(), &mut aux, run * width, width, codec);
            }
            in_aux = !in_aux;
            run *= 2;
        }

        if in_aux {
            block.replace_bytes(aux);
        }
    }
}

/// Merges neighbouring sorted runs of `run` bytes from `src` into `dst`.
fn merge_pass<C: RecordCodec>(src: &[u8], dst: &mut [u8], run: usize, width: usize, codec: &C) {
    let total = src.len();
    for start in (0..total).step_by(2 * run) {
        let mid = usize::min(start + run, total);
        let end = usize::min(start + 2 * run, total);

        let (mut i, mut j, mut k) = (start, mid, start);
        while i < mid && j < end {
            if codec.compare(&src[j..j + width], &src[i..i + width]) == Ordering::Less {
                dst[k..k + width].copy_from_slice(&src[j..j + width]);
                j += width;
            } else {
                dst[k..k + width].copy_from_slice(&src[i..i + width]);
                i += width;
            }
            k += width;
        }

        dst[k..k + (mid - i)].copy_from_slice(&src[i..mid]);
        k += mid - i;
        dst[k..k + (end - j)].copy_from_slice(&src[j..end]);
    }
}

/// Counting sort for single-byte records: 256 buckets visited in codec order.
/// Wider records are sorted with [`MergeSort`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CountingSort;

impl SortStrategy for CountingSort {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn sort<C: RecordCodec>(&self, block: &mut RecordBlock, codec: &C) {
        if block.width() != 1 {
            log::debug!(
                "counting sort needs 1-byte records, got {} bytes; using merge sort",
                block.width()
            );
            return MergeSort.sort(block, codec);
        }

        let mut counts = [0usize; 256];
        for &value in block.as_bytes() {
            counts[value as usize] += 1;
        }

        let mut values = Vec::from_iter((0..=u8::MAX).filter(|value| counts[*value as usize] > 0));
        values.sort_by(|a, b| codec.compare(slice::from_ref(a), slice::from_ref(b)));

        let data = block.as_bytes_mut();
        let mut pos = 0;
        for value in values {
            let count = counts[value as usize];
            data[pos..pos + count].fill(value);
            pos += count;
        }
    }
}

/// Multi-threaded sort built on rayon's parallel merge sort.
/// Runs on the current rayon thread pool, which the sorter sets up. Needs a pointer per record
/// plus a second copy of the block.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelSort;

impl SortStrategy for ParallelSort {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn sort<C: RecordCodec>(&self, block: &mut RecordBlock, codec: &C) {
        let sorted = {
            let mut records = Vec::from_iter(block.records());
            records.par_sort_by(|a, b| codec.compare(a, b));

            let mut sorted = Vec::with_capacity(block.as_bytes().len());
            for record in records {
                sorted.extend_from_slice(record);
            }
            sorted
        };
        block.replace_bytes(sorted);
    }
}

/// Orders the first, middle and last record of `[lo, hi)` and returns the middle index.
fn median_of_three<C: RecordCodec>(block: &mut RecordBlock, lo: usize, hi: usize, codec: &C) -> usize {
    let mid = lo + (hi - lo) / 2;
    let last = hi - 1;

    if codec.compare(block.record(mid), block.record(lo)) == Ordering::Less {
        block.swap(mid, lo);
    }
    if codec.compare(block.record(last), block.record(mid)) == Ordering::Less {
        block.swap(last, mid);
        if codec.compare(block.record(mid), block.record(lo)) == Ordering::Less {
            block.swap(mid, lo);
        }
    }

    return mid;
}

fn insertion_sort<C: RecordCodec>(block: &mut RecordBlock, lo: usize, hi: usize, codec: &C) {
    for i in lo + 1..hi {
        let mut j = i;
        while j > lo && codec.compare(block.record(j - 1), block.record(j)) == Ordering::Greater {
            block.swap(j - 1, j);
            j -= 1;
        }
    }
}

/// Run-time selection among the available strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Quick,
    IterativeQuick,
    Merge,
    Counting,
    Parallel,
}

impl StrategyKind {
    /// All strategy kinds.
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Quick,
        StrategyKind::IterativeQuick,
        StrategyKind::Merge,
        StrategyKind::Counting,
        StrategyKind::Parallel,
    ];
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::Merge
    }
}

impl SortStrategy for StrategyKind {
    fn name(&self) -> &'static str {
        match self {
            StrategyKind::Quick => QuickSort.name(),
            StrategyKind::IterativeQuick => IterativeQuickSort.name(),
            StrategyKind::Merge => MergeSort.name(),
            StrategyKind::Counting => CountingSort.name(),
            StrategyKind::Parallel => ParallelSort.name(),
        }
    }

    fn sort<C: RecordCodec>(&self, block: &mut RecordBlock, codec: &C) {
        match self {
            StrategyKind::Quick => QuickSort.sort(block, codec),
            StrategyKind::IterativeQuick => IterativeQuickSort.sort(block, codec),
            StrategyKind::Merge => MergeSort.sort(block, codec),
            StrategyKind::Counting => CountingSort.sort(block, codec),
            StrategyKind::Parallel => ParallelSort.sort(block, codec),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown sort strategy: {}", s))
    }
}
