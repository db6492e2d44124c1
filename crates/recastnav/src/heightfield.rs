//! The voxelized solid space produced by rasterization.
//!
//! Every column of the grid holds a sorted, non-overlapping list of [`Span`]s.

use thiserror::Error;

use crate::{
    Aabb3d,
    span::{Span, SpanKey, Spans},
};

/// Solid space as columns of spans, created with [`HeightfieldBuilder`] and filled by rasterization.
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// Number of columns along the x-axis.
    pub width: u16,
    /// Number of columns along the z-axis.
    pub height: u16,
    /// World-space bounds. Span heights are measured from `aabb.min.y`.
    pub aabb: Aabb3d,
    /// Column size on the xz-plane in world units.
    pub cell_size: f32,
    /// Voxel height in world units.
    pub cell_height: f32,
    /// Per column, in `x + z * width` order, the key of the lowest span.
    pub spans: Vec<Option<SpanKey>>,
    /// Storage of every span of every column.
    pub allocated_spans: Spans,
}

impl Heightfield {
    /// Inserts a span into its column, absorbing every span it overlaps.
    ///
    /// See [`Span::absorb`] for how the areas of overlapping spans are combined.
    pub(crate) fn add_span(&mut self, insertion: SpanInsertion) -> Result<(), SpanInsertionError> {
        let SpanInsertion {
            x,
            z,
            flag_merge_threshold,
            mut span,
        } = insertion;
        if x >= self.width || z >= self.height {
            return Err(SpanInsertionError::ColumnIndexOutOfBounds { x, z });
        }
        let column_index = self.column_index(x, z);

        // Columns are sorted bottom to top and never overlap, so the spans touching the new one
        // form a single run between `below` and `cursor`.
        let mut below = None;
        let mut cursor = self.spans[column_index];
        while let Some(key) = cursor {
            let existing = self.span(key).clone();
            if existing.min() > span.max() {
                break;
            }
            cursor = existing.next();
            if existing.max() < span.min() {
                below = Some(key);
                continue;
            }
            span.absorb(&existing, flag_merge_threshold);
            self.allocated_spans.remove(key);
        }

        span.set_next(cursor);
        let key = self.allocated_spans.insert(span);
        match below {
            Some(below) => self.span_mut(below).set_next(key),
            None => self.spans[column_index] = Some(key),
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.height as i32
    }

    /// Returns the key of the lowest span in the column at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_key_at(&self, x: u16, z: u16) -> Option<SpanKey> {
        if x >= self.width || z >= self.height {
            return None;
        }
        self.spans[self.column_index(x, z)]
    }

    /// Returns the lowest span at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_at(&self, x: u16, z: u16) -> Option<&Span> {
        let span_key = self.span_key_at(x, z)?;
        Some(self.span(span_key))
    }

    /// Returns a reference to the span with the given key.
    /// # Panics
    /// Panics if the key is not found.
    #[inline]
    pub fn span(&self, key: SpanKey) -> &Span {
        &self.allocated_spans[key]
    }

    /// Returns a mutable reference to the span with the given key.
    /// # Panics
    /// Panics if the key is not found.
    #[inline]
    pub fn span_mut(&mut self, key: SpanKey) -> &mut Span {
        &mut self.allocated_spans[key]
    }

    /// Iterates over the keys of all spans in a column, from bottom to top.
    pub fn column_span_keys(&self, x: u16, z: u16) -> impl Iterator<Item = SpanKey> + '_ {
        std::iter::successors(self.span_key_at(x, z), |key| self.span(*key).next())
    }
}

/// Creates an empty [`Heightfield`] covering `aabb`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightfieldBuilder {
    /// World-space bounds of the field.
    pub aabb: Aabb3d,
    /// Column size on the xz-plane in world units.
    pub cell_size: f32,
    /// Voxel height in world units.
    pub cell_height: f32,
}

impl HeightfieldBuilder {
    /// Allocates the columns. The grid size is the AABB extent divided by the cell size, rounded.
    pub fn build(self) -> Result<Heightfield, HeightfieldBuilderError> {
        let width = (self.aabb.max.x - self.aabb.min.x) / self.cell_size + 0.5;
        let height = (self.aabb.max.z - self.aabb.min.z) / self.cell_size + 0.5;
        if !(width >= 0.0 && height >= 0.0)
            || width >= u16::MAX as f32
            || height >= u16::MAX as f32
        {
            return Err(HeightfieldBuilderError::ColumnCountTooLarge { width, height });
        }
        let (width, height) = (width as u16, height as u16);
        let column_count = width as usize * height as usize;
        Ok(Heightfield {
            width,
            height,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            spans: vec![None; column_count],
            allocated_spans: Spans::with_min_capacity(column_count),
        })
    }
}

/// Errors that can occur when building a [`Heightfield`] with [`HeightfieldBuilder::build`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeightfieldBuilderError {
    /// Happens when the grid dimensions do not fit into the column index type.
    #[error("Column count (width*height) is invalid, got {width}*{height} but each side must be in 0..{max}", max = u16::MAX)]
    ColumnCountTooLarge {
        /// The width of the heightfield along the x-axis in cell units
        width: f32,
        /// The height of the heightfield along the z-axis in cell units
        height: f32,
    },
}

/// Errors that can occur when inserting a span into a [`Heightfield`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpanInsertionError {
    /// Happens when the column index is out of bounds.
    #[error("column index out of bounds: x={x}, z={z}")]
    ColumnIndexOutOfBounds {
        /// The x-coordinate of the span
        x: u16,
        /// The z-coordinate of the span
        z: u16,
    },
}

pub(crate) struct SpanInsertion {
    /// The x-coordinate of the span
    pub(crate) x: u16,
    /// The z-coordinate of the span
    pub(crate) z: u16,
    /// Maximum difference between the ceilings of two spans to merge area type IDs
    pub(crate) flag_merge_threshold: u16,
    /// The span to insert
    pub(crate) span: Span,
}
