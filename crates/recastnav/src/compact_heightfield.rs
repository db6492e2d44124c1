//! The open space above solid spans, packed into flat arrays with neighbor links.

use thiserror::Error;

use crate::{
    Aabb3d,
    compact_cell::CompactCell,
    compact_span::CompactSpan,
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// A packed representation of the walkable surfaces of a [`Heightfield`].
///
/// Every span describes the open space above a walkable solid span,
/// with links to the walkable spans in the four neighboring columns.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactHeightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u16,
    /// The walkable height used during the build of the field
    pub walkable_height: u16,
    /// The walkable climb used during the build of the field.
    pub walkable_climb: u16,
    /// The AABB border size used during the build of the field.
    pub border_size: u16,
    /// The maximum distance value of any span within the field.
    pub max_distance: u16,
    /// The maximum region id of any span within the field.
    pub max_region: RegionId,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The cells in the heightfield [Size: `width * height`]
    pub cells: Vec<CompactCell>,
    /// All walkable spans in the heightfield
    pub spans: Vec<CompactSpan>,
    /// Vector containing border distance data. [Size: `spans.len()`]
    /// Empty until [`CompactHeightfield::build_distance_field`] is run.
    pub dist: Vec<u16>,
    /// Vector containing area type data. [Size: `spans.len()`]
    pub areas: Vec<AreaType>,
}

impl Heightfield {
    /// Compacts the heightfield into a [`CompactHeightfield`], keeping only the walkable spans.
    ///
    /// Two neighboring spans are linked if the gap between them is at least `walkable_height`
    /// and their floors are at most `walkable_climb` apart.
    pub fn into_compact(
        self,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<CompactHeightfield, CompactHeightfieldError> {
        CompactHeightfield::from_heightfield(&self, walkable_height, walkable_climb)
    }
}

impl CompactHeightfield {
    const MAX_HEIGHT: u16 = u16::MAX;
    /// Highest layer index a neighbor link can encode.
    const MAX_LAYERS: u8 = CompactSpan::NOT_CONNECTED - 1;

    /// Builds a compact heightfield from a heightfield.
    ///
    /// # Errors
    ///
    /// Returns an error if a column holds more walkable spans than a cell can count,
    /// or if a neighbor sits at a layer index that cannot be encoded in a connection.
    pub fn from_heightfield(
        heightfield: &Heightfield,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<Self, CompactHeightfieldError> {
        let walkable_span_count = heightfield
            .allocated_spans
            .values()
            .filter(|span| span.area().is_walkable())
            .count();

        let mut compact_heightfield = Self {
            width: heightfield.width,
            height: heightfield.height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            aabb: heightfield.aabb,
            max_distance: 0,
            max_region: RegionId::NONE,
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
            cells: vec![
                CompactCell::default();
                heightfield.width as usize * heightfield.height as usize
            ],
            spans: Vec::with_capacity(walkable_span_count),
            dist: Vec::new(),
            areas: Vec::with_capacity(walkable_span_count),
        };
        compact_heightfield.aabb.max.y += walkable_height as f32 * heightfield.cell_height;

        // Fill in cells and spans
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let column_index = heightfield.column_index(x, z);
                let first_index = compact_heightfield.spans.len();
                for span_key in heightfield.column_span_keys(x, z) {
                    let span = heightfield.span(span_key);
                    if !span.area().is_walkable() {
                        continue;
                    }
                    let bot = span.max();
                    let top = span
                        .next()
                        .map(|next| heightfield.span(next).min())
                        .unwrap_or(Self::MAX_HEIGHT);
                    let height = top.saturating_sub(bot).min(u8::MAX.into()) as u8;
                    compact_heightfield.spans.push(CompactSpan::new(bot, height));
                    compact_heightfield.areas.push(span.area());
                }
                let count = compact_heightfield.spans.len() - first_index;
                let count = u8::try_from(count)
                    .map_err(|_| CompactHeightfieldError::TooManySpansInColumn { x, z, count })?;
                compact_heightfield.cells[column_index] = CompactCell::new(first_index as u32, count);
            }
        }

        // Find neighbour connections
        let mut too_high_neighbor = 0_usize;
        for z in 0..compact_heightfield.height {
            for x in 0..compact_heightfield.width {
                let cell = *compact_heightfield.cell_at(x, z);
                for i in cell.index_range() {
                    for dir in 0..4_u8 {
                        let neighbor_x = x as i32 + dir_offset_x(dir) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(dir) as i32;
                        // First check that the neighbour cell is in bounds.
                        if !compact_heightfield.contains(neighbor_x, neighbor_z) {
                            continue;
                        }

                        // Iterate over all neighbour spans and check if any of them is
                        // accessible from current cell.
                        let neighbor_cell =
                            *compact_heightfield.cell_at(neighbor_x as u16, neighbor_z as u16);
                        let span = compact_heightfield.spans[i].clone();
                        for k in neighbor_cell.index_range() {
                            let neighbor_span = &compact_heightfield.spans[k];
                            let bot = span.y.max(neighbor_span.y) as i32;
                            let top = (span.y as i32 + span.height as i32)
                                .min(neighbor_span.y as i32 + neighbor_span.height as i32);

                            // Check that the gap between the spans is walkable,
                            // and that the climb height between the gaps is not too high.
                            let is_walkable = top - bot >= walkable_height as i32;
                            let is_climbable = (neighbor_span.y as i32 - span.y as i32).abs()
                                <= walkable_climb as i32;
                            if !is_walkable || !is_climbable {
                                continue;
                            }
                            // Mark direction as walkable.
                            let layer_index = k - neighbor_cell.index() as usize;
                            if layer_index > Self::MAX_LAYERS as usize {
                                too_high_neighbor = too_high_neighbor.max(layer_index);
                                continue;
                            }
                            compact_heightfield.spans[i].set_con(dir, Some(layer_index as u8));
                            break;
                        }
                    }
                }
            }
        }
        if too_high_neighbor > Self::MAX_LAYERS as usize {
            return Err(CompactHeightfieldError::TooManyLayers {
                max_layer_index: Self::MAX_LAYERS,
                layer_index: too_high_neighbor,
            });
        }
        Ok(compact_heightfield)
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.height as i32
    }

    /// Returns the cell at the given coordinates. Returns `None` if the coordinates are invalid.
    #[inline]
    pub fn get_cell_at(&self, x: u16, z: u16) -> Option<&CompactCell> {
        if x >= self.width || z >= self.height {
            return None;
        }
        self.cells.get(self.column_index(x, z))
    }

    /// Returns the cell at the given coordinates. Panics if the coordinates are invalid.
    #[inline]
    pub fn cell_at(&self, x: u16, z: u16) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// Resolves the neighbor of a span in the given direction.
    /// `con` is the connection value stored on the span for `dir`.
    /// Returns the neighbor's cell coordinates and its span index.
    #[inline]
    pub(crate) fn con_indices(&self, x: i32, z: i32, dir: u8, con: u8) -> (i32, i32, usize) {
        let neighbor_x = x + dir_offset_x(dir) as i32;
        let neighbor_z = z + dir_offset_z(dir) as i32;
        let neighbor_index = self.cells[(neighbor_x + neighbor_z * self.width as i32) as usize]
            .index() as usize
            + con as usize;
        (neighbor_x, neighbor_z, neighbor_index)
    }

    /// Returns the span index of the neighbor of span `i` in the given direction, if connected.
    #[inline]
    pub(crate) fn neighbor_index(&self, x: i32, z: i32, i: usize, dir: u8) -> Option<usize> {
        let con = self.spans[i].con(dir)?;
        Some(self.con_indices(x, z, dir, con).2)
    }
}

/// Errors that can occur when building a compact heightfield.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompactHeightfieldError {
    /// A neighbor span sits at a layer index that doesn't fit into a connection.
    #[error(
        "Heightfield has too many layers. Max layer index is {max_layer_index}, but got {layer_index}"
    )]
    TooManyLayers {
        /// The maximum layer index.
        max_layer_index: u8,
        /// The layer index that caused the error.
        layer_index: usize,
    },
    /// A column holds more walkable spans than a cell can count.
    #[error("Column ({x}, {z}) holds {count} walkable spans, but at most 255 are supported")]
    TooManySpansInColumn {
        /// The x-coordinate of the column
        x: u16,
        /// The z-coordinate of the column
        z: u16,
        /// The number of walkable spans in the column
        count: usize,
    },
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use crate::{
        HeightfieldBuilder,
        heightfield::SpanInsertion,
        span::{AreaType, SpanBuilder},
    };

    use super::*;

    fn heightfield(size: u16) -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3::ZERO, Vec3::new(size as f32, 10.0, size as f32)),
            cell_size: 1.0,
            cell_height: 0.5,
        }
        .build()
        .unwrap()
    }

    fn add(heightfield: &mut Heightfield, x: u16, z: u16, min: u16, max: u16, area: AreaType) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: 0,
                span: SpanBuilder {
                    min,
                    max,
                    area,
                    next: None,
                }
                .build(),
            })
            .unwrap();
    }

    #[test]
    fn flat_floor_is_fully_connected_inside() {
        let mut heightfield = heightfield(3);
        for z in 0..3 {
            for x in 0..3 {
                add(&mut heightfield, x, z, 0, 2, AreaType(1));
            }
        }
        let compact = heightfield.into_compact(4, 1).unwrap();
        assert_eq!(compact.spans.len(), 9);
        assert_eq!(compact.areas.len(), 9);
        assert_eq!(compact.aabb.max.y, 12.0);

        let center = compact.cell_at(1, 1);
        assert_eq!(center.count(), 1);
        let span = &compact.spans[center.index() as usize];
        assert_eq!(span.y, 2);
        assert_eq!(span.height, u8::MAX);
        for dir in 0..4 {
            assert_eq!(span.con(dir), Some(0));
        }

        // The corner only has two neighbors inside the field.
        let corner = &compact.spans[compact.cell_at(0, 0).index() as usize];
        let connected = (0..4).filter(|dir| corner.con(*dir).is_some()).count();
        assert_eq!(connected, 2);
    }

    #[test]
    fn unwalkable_spans_are_dropped_but_still_cap_clearance() {
        let mut heightfield = heightfield(1);
        add(&mut heightfield, 0, 0, 0, 2, AreaType(1));
        add(&mut heightfield, 0, 0, 10, 12, AreaType::NOT_WALKABLE);
        let compact = heightfield.into_compact(4, 1).unwrap();
        assert_eq!(compact.spans.len(), 1);
        assert_eq!(compact.spans[0].y, 2);
        assert_eq!(compact.spans[0].height, 8);
    }

    #[test]
    fn steps_higher_than_climb_are_not_connected() {
        let mut heightfield = heightfield(2);
        add(&mut heightfield, 0, 0, 0, 2, AreaType(1));
        add(&mut heightfield, 1, 0, 0, 5, AreaType(1));
        let compact = heightfield.into_compact(4, 2).unwrap();
        let left = &compact.spans[compact.cell_at(0, 0).index() as usize];
        // Direction 2 points towards +x.
        assert_eq!(left.con(2), None);

        let mut heightfield = self::heightfield(2);
        add(&mut heightfield, 0, 0, 0, 2, AreaType(1));
        add(&mut heightfield, 1, 0, 0, 4, AreaType(1));
        let compact = heightfield.into_compact(4, 2).unwrap();
        let left = &compact.spans[compact.cell_at(0, 0).index() as usize];
        assert_eq!(left.con(2), Some(0));
        assert_eq!(compact.neighbor_index(0, 0, 0, 2), Some(1));
    }
}
