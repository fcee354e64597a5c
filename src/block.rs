//! In-memory record block.

use std::io;
use std::io::prelude::*;
use std::slice;

/// Contiguous block of fixed-width records held in memory.
///
/// A block never splits a record: its byte length is always a multiple of the record width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBlock {
    width: usize,
    data: Vec<u8>,
}

impl RecordBlock {
    /// Creates an empty block for records of `width` bytes.
    pub fn new(width: usize) -> Self {
        assert!(width > 0, "record width must be positive");
        RecordBlock { width, data: Vec::new() }
    }

    /// Creates a block from raw bytes.
    ///
    /// # Panics
    /// Panics if the data length is not a multiple of `width`.
    pub fn from_bytes(width: usize, data: Vec<u8>) -> Self {
        assert!(width > 0, "record width must be positive");
        assert_eq!(data.len() % width, 0, "block must hold whole records");
        RecordBlock { width, data }
    }

    /// Reads exactly `records` records from the reader into a new block.
    pub fn read_from<R: Read>(reader: &mut R, width: usize, records: usize) -> io::Result<Self> {
        let mut data = vec![0; records * width];
        reader.read_exact(&mut data)?;
        return Ok(RecordBlock::from_bytes(width, data));
    }

    /// Returns record width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns number of records in the block.
    pub fn len(&self) -> usize {
        self.data.len() / self.width
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the record at `idx`.
    pub fn record(&self, idx: usize) -> &[u8] {
        &self.data[idx * self.width..(idx + 1) * self.width]
    }

    /// Returns an iterator over the records.
    pub fn records(&self) -> slice::ChunksExact<'_, u8> {
        self.data.chunks_exact(self.width)
    }

    /// Swaps two records.
    pub fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.data.split_at_mut(hi * self.width);
        head[lo * self.width..(lo + 1) * self.width].swap_with_slice(&mut tail[..self.width]);
    }

    /// Copies the record at `idx` into `out`.
    pub fn copy_record_to(&self, idx: usize, out: &mut [u8]) {
        out.copy_from_slice(self.record(idx));
    }

    /// Overwrites the record at `idx`.
    pub fn set_record(&mut self, idx: usize, record: &[u8]) {
        self.data[idx * self.width..(idx + 1) * self.width].copy_from_slice(record);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Replaces block contents with `data` holding the same number of records.
    pub(crate) fn replace_bytes(&mut self, data: Vec<u8>) {
        debug_assert_eq!(data.len(), self.data.len());
        self.data = data;
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::RecordBlock;

    #[test]
    fn test_record_access() {
        let block = RecordBlock::from_bytes(2, b"abcdef".to_vec());

        assert_eq!(block.len(), 3);
        assert_eq!(block.record(1), b"cd");
        assert_eq!(Vec::from_iter(block.records()), vec![&b"ab"[..], &b"cd"[..], &b"ef"[..]]);
    }

    #[rstest]
    #[case(0, 2, b"efcdab")]
    #[case(2, 0, b"efcdab")]
    #[case(1, 2, b"abefcd")]
    #[case(1, 1, b"abcdef")]
    fn test_swap(#[case] a: usize, #[case] b: usize, #[case] expected: &[u8]) {
        let mut block = RecordBlock::from_bytes(2, b"abcdef".to_vec());
        block.swap(a, b);
        assert_eq!(block.as_bytes(), expected);
    }

    #[test]
    fn test_set_record() {
        let mut block = RecordBlock::from_bytes(2, b"abcd".to_vec());
        let mut tmp = [0u8; 2];
        block.copy_record_to(0, &mut tmp);
        block.set_record(1, &tmp);
        assert_eq!(block.into_bytes(), b"abab");
    }

    #[test]
    fn test_read_from() {
        let mut reader = io::Cursor::new(b"abcdefg".to_vec());

        let block = RecordBlock::read_from(&mut reader, 3, 2).unwrap();
        assert_eq!(block.as_bytes(), b"abcdef");

        let err = RecordBlock::read_from(&mut reader, 3, 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    #[should_panic(expected = "whole records")]
    fn test_partial_record_rejected() {
        RecordBlock::from_bytes(2, b"abc".to_vec());
    }
}
