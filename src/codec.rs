//! Record codecs.
//!
//! A codec fixes the record width for a sort run and defines the total order over raw records.

use std::cmp::Ordering;

use crate::SortError;

/// Record codec interface. Defines record width and record comparison.
///
/// The comparison must be a total order. Records comparing as [`Ordering::Equal`] are treated as
/// indistinguishable, so the relative order of equal records in the output is not guaranteed.
pub trait RecordCodec: Send + Sync {
    /// Returns record width in bytes.
    fn width(&self) -> usize;

    /// Compares two records. Both slices are exactly [`RecordCodec::width`] bytes long.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

impl<C: RecordCodec + ?Sized> RecordCodec for &C {
    fn width(&self) -> usize {
        (**self).width()
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (**self).compare(a, b)
    }
}

/// Compares records as unsigned byte strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCodec {
    width: usize,
}

impl RawCodec {
    /// Creates a codec for records of `width` bytes.
    pub fn new(width: usize) -> Result<Self, SortError> {
        if width == 0 {
            return Err(SortError::ZeroWidth);
        }
        return Ok(RawCodec { width });
    }
}

impl RecordCodec for RawCodec {
    fn width(&self) -> usize {
        self.width
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Compares records by a key byte range first and by the whole record after that.
///
/// The whole-record tie-break keeps equal records byte-identical, so every sort strategy
/// produces the same output bytes. Callers needing stability can store the original position
/// inside the record, right after the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyedCodec {
    width: usize,
    offset: usize,
    len: usize,
}

impl KeyedCodec {
    /// Creates a codec for records of `width` bytes keyed by `len` bytes starting at `offset`.
    pub fn new(width: usize, offset: usize, len: usize) -> Result<Self, SortError> {
        if width == 0 {
            return Err(SortError::ZeroWidth);
        }
        match offset.checked_add(len) {
            Some(end) if len > 0 && end <= width => Ok(KeyedCodec { width, offset, len }),
            _ => Err(SortError::InvalidKey { offset, len, width }),
        }
    }

    fn key<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        &record[self.offset..self.offset + self.len]
    }
}

impl RecordCodec for KeyedCodec {
    fn width(&self) -> usize {
        self.width
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.key(a).cmp(self.key(b)).then_with(|| a.cmp(b))
    }
}

/// Reverses the order defined by the inner codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reversed<C>(pub C);

impl<C: RecordCodec> RecordCodec for Reversed<C> {
    fn width(&self) -> usize {
        self.0.width()
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.0.compare(a, b).reverse()
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;

    use rstest::*;

    use super::{KeyedCodec, RawCodec, RecordCodec, Reversed};
    use crate::SortError;

    #[rstest]
    #[case(b"ab", b"ab", Ordering::Equal)]
    #[case(b"ab", b"ac", Ordering::Less)]
    #[case(b"\xffa", b"\x00z", Ordering::Greater)]
    fn test_raw_codec(#[case] a: &[u8], #[case] b: &[u8], #[case] expected: Ordering) {
        let codec = RawCodec::new(2).unwrap();
        assert_eq!(codec.compare(a, b), expected);
        assert_eq!(codec.compare(b, a), expected.reverse());
    }

    #[test]
    fn test_zero_width_rejected() {
        assert!(matches!(RawCodec::new(0), Err(SortError::ZeroWidth)));
        assert!(matches!(KeyedCodec::new(0, 0, 1), Err(SortError::ZeroWidth)));
    }

    #[rstest]
    #[case(4, 0, 0)]
    #[case(4, 2, 3)]
    #[case(4, usize::MAX, 2)]
    fn test_invalid_key_rejected(#[case] width: usize, #[case] offset: usize, #[case] len: usize) {
        assert!(matches!(
            KeyedCodec::new(width, offset, len),
            Err(SortError::InvalidKey { .. })
        ));
    }

    #[rstest]
    // key decides
    #[case(b"z1a", b"a2a", Ordering::Less)]
    // equal keys fall back to the whole record
    #[case(b"b1a", b"a1a", Ordering::Greater)]
    #[case(b"a1a", b"a1a", Ordering::Equal)]
    fn test_keyed_codec(#[case] a: &[u8], #[case] b: &[u8], #[case] expected: Ordering) {
        let codec = KeyedCodec::new(3, 1, 1).unwrap();
        assert_eq!(codec.compare(a, b), expected);
    }

    #[test]
    fn test_reversed_codec() {
        let codec = Reversed(RawCodec::new(1).unwrap());
        assert_eq!(codec.width(), 1);
        assert_eq!(codec.compare(b"a", b"b"), Ordering::Greater);
        assert_eq!(codec.compare(b"a", b"a"), Ordering::Equal);
    }
}
