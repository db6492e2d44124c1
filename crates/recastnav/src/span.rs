//! Spans of solid space stored in a [`Heightfield`](crate::Heightfield) column.

use std::ops::{Deref, DerefMut};

use slotmap::SlotMap;

slotmap::new_key_type! {
    /// A key for a span in [`Spans`].
    pub struct SpanKey;
}

/// Slot storage for all spans of a [`Heightfield`](crate::Heightfield).
#[derive(Debug, Clone, Default)]
pub struct Spans(SlotMap<SpanKey, Span>);

impl Deref for Spans {
    type Target = SlotMap<SpanKey, Span>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Spans {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Spans {
    const DEFAULT_CAPACITY: usize = 1024;

    pub(crate) fn with_min_capacity(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(Self::DEFAULT_CAPACITY);
        Self(SlotMap::with_capacity_and_key(capacity))
    }
}

/// Builder for [`Span`]s, mostly useful for tests and manual heightfield construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanBuilder {
    /// Height of the floor.
    pub min: u16,
    /// Height of the ceiling.
    pub max: u16,
    /// Area type ID.
    pub area: AreaType,
    /// The key of the next-higher span in the column
    pub next: Option<SpanKey>,
}

impl SpanBuilder {
    /// Builds the span.
    pub fn build(self) -> Span {
        Span {
            min: self.min,
            max: self.max,
            area: self.area,
            next: self.next,
        }
    }
}

impl From<SpanBuilder> for Span {
    fn from(builder: SpanBuilder) -> Self {
        builder.build()
    }
}

/// A contiguous interval of solid voxels in a heightfield column.
/// Build with [`SpanBuilder`]
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Span {
    /// Height of the floor. Only the lower [`Span::MAX_HEIGHT_BITS`] bits are used.
    min: u16,
    /// Height of the ceiling. Only the lower [`Span::MAX_HEIGHT_BITS`] bits are used.
    max: u16,
    /// Area type ID.
    area: AreaType,
    /// The key of the next-higher span in the column
    next: Option<SpanKey>,
}

impl Span {
    /// Number of bits used for span heights.
    pub const MAX_HEIGHT_BITS: u32 = 13;
    /// The largest height representable by a span.
    pub const MAX_HEIGHT: u16 = (1 << Self::MAX_HEIGHT_BITS) - 1;

    /// Height of the floor
    #[inline]
    pub fn min(&self) -> u16 {
        self.min
    }

    /// Height of the ceiling
    #[inline]
    pub fn max(&self) -> u16 {
        self.max
    }

    /// Area type of the span
    #[inline]
    pub fn area(&self) -> AreaType {
        self.area
    }

    #[inline]
    pub(crate) fn set_area(&mut self, area: impl Into<AreaType>) {
        self.area = area.into();
    }

    /// The key of the next-higher span in the column
    #[inline]
    pub fn next(&self) -> Option<SpanKey> {
        self.next
    }

    #[inline]
    pub(crate) fn set_next(&mut self, next: impl Into<Option<SpanKey>>) {
        self.next = next.into();
    }

    /// Grows the span to cover `other` as well.
    ///
    /// If the merged ceiling lies within `flag_merge_threshold` voxels of the ceiling of `other`,
    /// the higher area id wins. Otherwise the area of this span is kept.
    pub(crate) fn absorb(&mut self, other: &Span, flag_merge_threshold: u16) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        if self.max.abs_diff(other.max) <= flag_merge_threshold {
            self.area = self.area.max(other.area);
        }
    }
}

/// The area type of a span or triangle.
/// Area ids are ordered: on merges and [`AreaModification::Max`](crate::AreaModification::Max) the higher id wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct AreaType(pub u8);

impl From<u8> for AreaType {
    fn from(value: u8) -> Self {
        AreaType(value)
    }
}

impl From<AreaType> for u8 {
    fn from(value: AreaType) -> Self {
        value.0
    }
}

impl AreaType {
    /// The area type 0. Triangles with this area type are not walkable.
    pub const NOT_WALKABLE: Self = Self(0);
    /// Default area type for walkable triangles. The highest possible area type.
    pub const DEFAULT_WALKABLE: Self = Self(u8::MAX);

    /// Whether the area is anything but [`AreaType::NOT_WALKABLE`].
    #[inline]
    pub fn is_walkable(self) -> bool {
        self != Self::NOT_WALKABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        SpanBuilder {
            min: 2,
            max: 10,
            area: AreaType(4),
            next: None,
        }
        .build()
    }

    #[test]
    fn can_retrieve_span_data_after_building() {
        let span = span();
        assert_eq!(span.min(), 2);
        assert_eq!(span.max(), 10);
        assert_eq!(span.area(), AreaType(4));
        assert_eq!(span.next(), None);
    }

    #[test]
    fn absorb_covers_both_spans() {
        let mut low = span();
        let high = SpanBuilder {
            min: 8,
            max: 12,
            area: AreaType(1),
            next: None,
        }
        .build();
        low.absorb(&high, 2);
        assert_eq!((low.min(), low.max()), (2, 12));
        assert_eq!(low.area(), AreaType(4));

        let mut walkable = span();
        let obstacle = SpanBuilder {
            min: 0,
            max: 30,
            area: AreaType::NOT_WALKABLE,
            next: None,
        }
        .build();
        walkable.absorb(&obstacle, 2);
        assert_eq!(walkable.max(), 30);
        assert_eq!(walkable.area(), AreaType(4));
    }

    #[test]
    fn only_zero_is_unwalkable() {
        assert!(!AreaType::NOT_WALKABLE.is_walkable());
        assert!(AreaType(1).is_walkable());
        assert!(AreaType::DEFAULT_WALKABLE.is_walkable());
    }
}
