use std::ops::Range;

/// A column of a [`CompactHeightfield`](crate::CompactHeightfield): a contiguous run of
/// [`CompactSpan`](crate::CompactSpan)s, ordered bottom to top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactCell {
    first_span: u32,
    span_count: u8,
}

impl CompactCell {
    #[inline]
    pub(crate) fn new(first_span: u32, span_count: u8) -> Self {
        Self {
            first_span,
            span_count,
        }
    }

    /// Index of the lowest span of the column.
    #[inline]
    pub fn index(&self) -> u32 {
        self.first_span
    }

    /// Number of spans in the column.
    #[inline]
    pub fn count(&self) -> u8 {
        self.span_count
    }

    /// Indices of all spans in the column.
    #[inline]
    pub fn index_range(&self) -> Range<usize> {
        let first = self.first_span as usize;
        first..first + self.span_count as usize
    }
}
