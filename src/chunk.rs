//! Input chunking and sorted runs stored on disk.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::spill::SpillDir;
use crate::RecordBlock;

/// Splits an input stream into record-aligned blocks of at most `chunk_records` records.
pub struct InputChunks<R> {
    reader: R,
    width: usize,
    chunk_records: usize,
    remaining: u64,
}

impl<R: Read> InputChunks<R> {
    /// Creates a chunk iterator over `records` records of `width` bytes.
    pub fn new(reader: R, width: usize, chunk_records: usize, records: u64) -> Self {
        assert!(chunk_records > 0, "chunk must hold at least one record");
        InputChunks {
            reader,
            width,
            chunk_records,
            remaining: records,
        }
    }
}

impl<R: Read> Iterator for InputChunks<R> {
    type Item = io::Result<RecordBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let count = u64::min(self.remaining, self.chunk_records as u64) as usize;
        self.remaining -= count as u64;

        let block = RecordBlock::read_from(&mut self.reader, self.width, count);
        if block.is_err() {
            self.remaining = 0;
        }
        Some(block)
    }
}

/// Buffered record writer. Counts written records.
pub struct RecordWriter<W: Write = fs::File> {
    writer: io::BufWriter<W>,
    width: usize,
    records: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W, width: usize, buf_size: usize) -> Self {
        RecordWriter {
            writer: io::BufWriter::with_capacity(buf_size, inner),
            width,
            records: 0,
        }
    }

    /// Writes all records of the block.
    pub fn write_block(&mut self, block: &RecordBlock) -> io::Result<()> {
        debug_assert_eq!(block.width(), self.width);
        self.writer.write_all(block.as_bytes())?;
        self.records += block.len() as u64;
        return Ok(());
    }

    /// Writes a single record.
    pub fn push(&mut self, record: &[u8]) -> io::Result<()> {
        debug_assert_eq!(record.len(), self.width);
        #[cfg(test)]
        fault::check()?;

        self.writer.write_all(record)?;
        self.records += 1;
        return Ok(());
    }

    /// Returns the number of records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flushes buffered data and returns the number of records written.
    pub fn finish(self) -> io::Result<u64> {
        let mut inner = self.writer.into_inner().map_err(|err| err.into_error())?;
        inner.flush()?;
        return Ok(self.records);
    }
}

/// Sequential reader over a file of sorted records.
pub struct SpillReader<R: BufRead = io::BufReader<fs::File>> {
    reader: R,
    width: usize,
}

impl<R: BufRead> SpillReader<R> {
    pub fn new(reader: R, width: usize) -> Self {
        SpillReader { reader, width }
    }

    /// Reads the next record into `out`. Returns `false` once the reader is exhausted.
    /// A truncated trailing record is reported as [`io::ErrorKind::UnexpectedEof`].
    pub fn read_next(&mut self, out: &mut [u8]) -> io::Result<bool> {
        debug_assert_eq!(out.len(), self.width);
        if self.reader.fill_buf()?.is_empty() {
            return Ok(false);
        }
        self.reader.read_exact(out)?;
        return Ok(true);
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

/// Sorted run stored in a spill directory.
#[derive(Debug)]
pub struct SpillFile {
    path: PathBuf,
    width: usize,
    records: u64,
}

impl SpillFile {
    pub fn new(path: PathBuf, width: usize, records: u64) -> Self {
        SpillFile { path, width, records }
    }

    /// Writes a sorted block into a new file of the spill directory.
    pub fn build(dir: &mut SpillDir, block: &RecordBlock, buf_size: usize) -> io::Result<Self> {
        let (path, file) = dir.create()?;

        let mut writer = RecordWriter::new(file, block.width(), buf_size);
        writer.write_block(block)?;
        let records = writer.finish()?;

        return Ok(SpillFile::new(path, block.width(), records));
    }

    /// Opens the run for sequential reading with a read buffer of `buf_size` bytes.
    pub fn open(&self, buf_size: usize) -> io::Result<SpillReader> {
        let file = fs::File::open(&self.path)?;
        return Ok(SpillReader::new(io::BufReader::with_capacity(buf_size, file), self.width));
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns number of records in the run.
    pub fn len(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Deletes the run from disk.
    pub fn remove(self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }
}


#[cfg(test)]
mod test {
    use std::fs;
    use std::io;

    use rstest::*;

    use super::{InputChunks, RecordWriter, SpillFile, SpillReader};
    use crate::spill::SpillDir;
    use crate::RecordBlock;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    #[case(6, 2, vec![2, 2, 2])]
    #[case(7, 3, vec![3, 3, 1])]
    #[case(2, 5, vec![2])]
    #[case(0, 5, vec![])]
    fn test_input_chunks(#[case] records: u64, #[case] chunk_records: usize, #[case] expected: Vec<usize>) {
        let data = Vec::from_iter(0..records as u8 * 2);
        let chunks = InputChunks::new(io::Cursor::new(data.clone()), 2, chunk_records, records);

        let blocks: Vec<RecordBlock> = chunks.collect::<io::Result<_>>().unwrap();

        assert_eq!(Vec::from_iter(blocks.iter().map(RecordBlock::len)), expected);
        assert_eq!(blocks.into_iter().flat_map(RecordBlock::into_bytes).collect::<Vec<_>>(), data);
    }

    #[test]
    fn test_input_chunks_short_input() {
        let mut chunks = InputChunks::new(io::Cursor::new(b"abc".to_vec()), 2, 1, 2);

        assert_eq!(chunks.next().unwrap().unwrap().as_bytes(), b"ab");
        assert_eq!(chunks.next().unwrap().unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
        assert!(chunks.next().is_none());
    }

    #[test]
    fn test_spill_reader() {
        let mut reader = SpillReader::new(io::Cursor::new(b"aabbc".to_vec()), 2);
        let mut record = [0u8; 2];

        assert!(reader.read_next(&mut record).unwrap());
        assert_eq!(&record, b"aa");
        assert!(reader.read_next(&mut record).unwrap());
        assert_eq!(&record, b"bb");
        let err = reader.read_next(&mut record).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_record_writer() {
        let mut out = Vec::new();
        let mut writer = RecordWriter::new(&mut out, 2, 4);
        writer.write_block(&RecordBlock::from_bytes(2, b"aabb".to_vec())).unwrap();
        writer.push(b"cc").unwrap();
        assert_eq!(writer.records(), 3);
        assert_eq!(writer.finish().unwrap(), 3);

        assert_eq!(out, b"aabbcc");
    }

    #[rstest]
    fn test_spill_file(tmp_dir: tempfile::TempDir) {
        let mut dir = SpillDir::new(Some(tmp_dir.path())).unwrap();
        let block = RecordBlock::from_bytes(3, b"abcdefghi".to_vec());

        let spill = SpillFile::build(&mut dir, &block, 16).unwrap();
        assert_eq!(spill.len(), 3);
        assert_eq!(fs::read(spill.path()).unwrap(), b"abcdefghi");

        let mut reader = spill.open(4).unwrap();
        let mut record = [0u8; 3];
        let mut restored = Vec::new();
        while reader.read_next(&mut record).unwrap() {
            restored.extend_from_slice(&record);
        }
        assert_eq!(restored, block.as_bytes());

        let path = spill.path().to_owned();
        spill.remove().unwrap();
        assert!(!path.exists());
    }
}
