//! Binary heap merger and merge rounds.

use std::cmp::Ordering;
use std::collections::binary_heap::{BinaryHeap, PeekMut};
use std::fs;
use std::io;
use std::io::prelude::*;
use std::sync::atomic::{self, AtomicBool};

use log;

use crate::chunk::{RecordWriter, SpillFile, SpillReader};
use crate::spill::SpillDir;
use crate::{RecordCodec, SortError};

/// Upper bound on files merged at once, keeps open descriptors well below common limits.
pub const MAX_FAN_IN: usize = 512;

/// Buffer sizes and fan-in derived from the memory budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePlan {
    /// Read buffer size of every merge input and size of the output write buffer.
    pub stream_buf_size: usize,
    /// Maximum number of files merged in one group.
    pub fan_in: usize,
}

impl MergePlan {
    /// Computes a plan where `fan_in` read buffers and one write buffer fit in `memory_budget`.
    ///
    /// The stream buffer is capped by `rw_buf_size` and by a third of the budget, so at least two
    /// inputs and the output fit, and is never smaller than one record.
    pub fn new(memory_budget: usize, width: usize, rw_buf_size: usize) -> Self {
        let cap = usize::min(rw_buf_size, memory_budget / 3);
        let stream_buf_size = usize::max(width, cap / width * width);
        let fan_in = (memory_budget / stream_buf_size).saturating_sub(1).clamp(2, MAX_FAN_IN);

        MergePlan {
            stream_buf_size,
            fan_in,
        }
    }
}

struct HeapItem<'c, C> {
    record: Vec<u8>,
    source: usize,
    codec: &'c C,
}

// binary heap is max-heap so the order is reversed to pop the smallest record first
impl<C: RecordCodec> Ord for HeapItem<'_, C> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.codec
            .compare(&other.record, &self.record)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl<C: RecordCodec> PartialOrd for HeapItem<'_, C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C: RecordCodec> PartialEq for HeapItem<'_, C> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<C: RecordCodec> Eq for HeapItem<'_, C> {}

/// Binary heap merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Time complexity is *m* \* log(*n*) where *m* is the number of records,
/// *n* is the number of inputs. Holds one record per input in memory.
pub struct BinaryHeapMerger<'c, C, R: BufRead> {
    items: BinaryHeap<HeapItem<'c, C>>,
    sources: Vec<SpillReader<R>>,
}

impl<'c, C, R> BinaryHeapMerger<'c, C, R>
where
    C: RecordCodec,
    R: BufRead,
{
    /// Creates a merger reading the first record of every input.
    /// Inputs should be sorted according to `codec`, otherwise the result is undefined.
    pub fn new(sources: Vec<SpillReader<R>>, codec: &'c C) -> io::Result<Self> {
        let mut sources = sources;
        let mut items = BinaryHeap::with_capacity(sources.len());

        for (source, reader) in sources.iter_mut().enumerate() {
            let mut record = vec![0; codec.width()];
            if reader.read_next(&mut record)? {
                items.push(HeapItem { record, source, codec });
            }
        }

        return Ok(BinaryHeapMerger { items, sources });
    }

    /// Writes all records of the inputs in sorted order. Returns number of written records.
    pub fn write_into<W: Write>(mut self, writer: &mut RecordWriter<W>) -> io::Result<u64> {
        let mut written = 0;

        while let Some(mut head) = self.items.peek_mut() {
            writer.push(&head.record)?;
            written += 1;

            let source = head.source;
            if !self.sources[source].read_next(&mut head.record)? {
                PeekMut::pop(head);
            }
        }

        return Ok(written);
    }
}

/// Merges sorted spill files round by round until one sorted output remains.
///
/// While more than `fan_in` files are left, consecutive groups of `fan_in` files are merged into
/// new spill files; a single leftover file is carried into the next round as is. The last round
/// writes into `output`. Merged inputs are removed as soon as their group is written.
/// Returns the number of merge rounds.
pub fn merge_all<C: RecordCodec>(
    mut files: Vec<SpillFile>,
    plan: &MergePlan,
    codec: &C,
    spill_dir: &mut SpillDir,
    output: fs::File,
    canceled: &AtomicBool,
) -> Result<usize, SortError> {
    let mut rounds = 0;

    while files.len() > plan.fan_in {
        rounds += 1;
        log::info!("merge round {}: {} files, fan-in {}", rounds, files.len(), plan.fan_in);
        files = merge_round(files, plan, codec, spill_dir, canceled)?;
    }

    rounds += 1;
    log::info!("merge round {} (final): {} files", rounds, files.len());
    check_canceled(canceled)?;
    let records = merge_group(files, plan, codec, output).map_err(SortError::IO)?;
    log::debug!("final merge wrote {} records", records);

    return Ok(rounds);
}

fn merge_round<C: RecordCodec>(
    files: Vec<SpillFile>,
    plan: &MergePlan,
    codec: &C,
    spill_dir: &mut SpillDir,
    canceled: &AtomicBool,
) -> Result<Vec<SpillFile>, SortError> {
    let mut merged = Vec::with_capacity(files.len() / plan.fan_in + 1);
    let mut pending = files.into_iter();

    loop {
        let group = Vec::from_iter(pending.by_ref().take(plan.fan_in));
        if group.len() <= 1 {
            merged.extend(group);
            break;
        }

        check_canceled(canceled)?;
        let (path, file) = spill_dir.create().map_err(SortError::IO)?;
        let records = merge_group(group, plan, codec, file).map_err(SortError::IO)?;
        log::debug!("merged group into {} ({} records)", path.display(), records);
        merged.push(SpillFile::new(path, codec.width(), records));
    }

    return Ok(merged);
}

/// Merges a group of files into `output` and removes the group files.
fn merge_group<C: RecordCodec>(
    group: Vec<SpillFile>,
    plan: &MergePlan,
    codec: &C,
    output: fs::File,
) -> io::Result<u64> {
    let readers = group
        .iter()
        .map(|file| file.open(plan.stream_buf_size))
        .collect::<io::Result<Vec<_>>>()?;

    let mut writer = RecordWriter::new(output, codec.width(), plan.stream_buf_size);
    BinaryHeapMerger::new(readers, codec)?.write_into(&mut writer)?;
    let records = writer.finish()?;
    debug_assert_eq!(records, group.iter().map(SpillFile::len).sum::<u64>());

    for file in group {
        file.remove()?;
    }

    return Ok(records);
}

fn check_canceled(canceled: &AtomicBool) -> Result<(), SortError> {
    if canceled.load(atomic::Ordering::Relaxed) {
        return Err(SortError::Canceled);
    }
    return Ok(());
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;
    use std::sync::atomic::AtomicBool;

    use rstest::*;

    use super::{merge_all, BinaryHeapMerger, MergePlan, MAX_FAN_IN};
    use crate::chunk::{RecordWriter, SpillFile, SpillReader};
    use crate::spill::SpillDir;
    use crate::{RawCodec, RecordBlock, Reversed};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    #[case(2, 1, 65536, 1, 2)]
    #[case(300, 1, 65536, 100, 2)]
    #[case(1024, 4, 64, 64, 15)]
    #[case(1000, 8, 65536, 328, 2)]
    #[case(1 << 30, 100, 65536, 65500, MAX_FAN_IN)]
    fn test_merge_plan(
        #[case] budget: usize,
        #[case] width: usize,
        #[case] rw_buf_size: usize,
        #[case] stream_buf_size: usize,
        #[case] fan_in: usize,
    ) {
        let plan = MergePlan::new(budget, width, rw_buf_size);
        assert_eq!(plan, MergePlan { stream_buf_size, fan_in });
        assert_eq!(plan.stream_buf_size % width, 0);
    }

    #[rstest]
    #[case(vec![], b"")]
    #[case(vec![&b""[..], &b""[..]], b"")]
    #[case(vec![&b"457"[..], &b"16"[..], &b"3"[..], &b""[..]], b"134567")]
    #[case(vec![&b"1335"[..], &b"35"[..]], b"133355")]
    fn test_merger(#[case] inputs: Vec<&[u8]>, #[case] expected: &[u8]) {
        let codec = RawCodec::new(1).unwrap();
        let readers = Vec::from_iter(inputs.into_iter().map(|input| SpillReader::new(io::Cursor::new(input), 1)));

        let mut out = Vec::new();
        let mut writer = RecordWriter::new(&mut out, 1, 4);
        let written = BinaryHeapMerger::new(readers, &codec)
            .unwrap()
            .write_into(&mut writer)
            .unwrap();
        writer.finish().unwrap();

        assert_eq!(written, expected.len() as u64);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_merger_reversed() {
        let codec = Reversed(RawCodec::new(2).unwrap());
        let readers = vec![
            SpillReader::new(io::Cursor::new(&b"zzbbaa"[..]), 2),
            SpillReader::new(io::Cursor::new(&b"yycc"[..]), 2),
        ];

        let mut out = Vec::new();
        let mut writer = RecordWriter::new(&mut out, 2, 4);
        BinaryHeapMerger::new(readers, &codec).unwrap().write_into(&mut writer).unwrap();
        writer.finish().unwrap();

        assert_eq!(out, b"zzyyccbbaa");
    }

    #[test]
    fn test_merger_truncated_input() {
        let codec = RawCodec::new(2).unwrap();
        let readers = vec![
            SpillReader::new(io::Cursor::new(&b"aac"[..]), 2),
            SpillReader::new(io::Cursor::new(&b"bb"[..]), 2),
        ];

        let mut out = Vec::new();
        let mut writer = RecordWriter::new(&mut out, 2, 4);
        let err = BinaryHeapMerger::new(readers, &codec)
            .unwrap()
            .write_into(&mut writer)
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    fn spill(dir: &mut SpillDir, data: &[u8]) -> SpillFile {
        SpillFile::build(dir, &RecordBlock::from_bytes(1, data.to_vec()), 16).unwrap()
    }

    #[rstest]
    #[case(2, 2)]
    #[case(3, 1)]
    #[case(4, 1)]
    fn test_merge_all(tmp_dir: tempfile::TempDir, #[case] fan_in: usize, #[case] expected_rounds: usize) {
        let codec = RawCodec::new(1).unwrap();
        let mut dir = SpillDir::new(Some(tmp_dir.path())).unwrap();
        let files = vec![spill(&mut dir, b"35"), spill(&mut dir, b"15"), spill(&mut dir, b"24")];
        let plan = MergePlan {
            stream_buf_size: 1,
            fan_in,
        };

        let output_path = tmp_dir.path().join("output");
        let output = fs::File::create(&output_path).unwrap();
        let rounds = merge_all(files, &plan, &codec, &mut dir, output, &AtomicBool::new(false)).unwrap();

        assert_eq!(rounds, expected_rounds);
        assert_eq!(fs::read(&output_path).unwrap(), b"123455");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_merge_all_canceled(tmp_dir: tempfile::TempDir) {
        let codec = RawCodec::new(1).unwrap();
        let mut dir = SpillDir::new(Some(tmp_dir.path())).unwrap();
        let files = vec![spill(&mut dir, b"1"), spill(&mut dir, b"2")];
        let plan = MergePlan {
            stream_buf_size: 1,
            fan_in: 2,
        };

        let output = fs::File::create(tmp_dir.path().join("output")).unwrap();
        let result = merge_all(files, &plan, &codec, &mut dir, output, &AtomicBool::new(true));

        assert!(matches!(result, Err(crate::SortError::Canceled)));
    }
}
