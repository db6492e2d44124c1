//! Walkability filters run on a [`Heightfield`] after rasterization and before compaction.

use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::{AreaType, Span},
};

/// Ceiling used for the topmost span of a column.
const MAX_HEIGHTFIELD_HEIGHT: i32 = 0xffff;

impl Heightfield {
    /// Marks non-walkable spans as walkable if their maximum is within `walkable_climb` of the span below them.
    ///
    /// This removes small obstacles and rasterization artifacts that the agent would be able to walk over
    /// such as curbs. It also allows agents to move up terraced structures like stairs.
    ///
    /// Obstacle spans are marked walkable if: `obstacle_span.max - walkable_span.max < walkable_climb`
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut previous_max: Option<u16> = None;
                let mut previous_was_walkable = false;
                let mut previous_area_id = AreaType::NOT_WALKABLE;

                // For each span in the column...
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    let span = self.span_mut(span_key);
                    span_key_iter = span.next();
                    let walkable = span.area().is_walkable();

                    // If current span is not walkable, but there is walkable span just below it and the height difference
                    // is small enough for the agent to walk over, mark the current span as walkable too.
                    if let Some(previous_max) = previous_max {
                        if !walkable
                            && previous_was_walkable
                            && (span.max() as i32 - previous_max as i32) <= walkable_climb as i32
                        {
                            span.set_area(previous_area_id);
                        }
                    }

                    // Copy the original walkable value regardless of whether we changed it.
                    // This prevents multiple consecutive non-walkable spans from being erroneously marked as walkable.
                    previous_max = Some(span.max());
                    previous_was_walkable = walkable;
                    previous_area_id = span.area();
                }
            }
        }
    }

    /// Marks spans that are ledges as not-walkable.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further away than `walkable_climb`
    /// from the current span's maximum.
    /// This method removes the impact of the overestimation of conservative voxelization
    /// so the resulting mesh will not have regions hanging in the air over ledges.
    ///
    /// A span is a ledge if: `abs(current_span.max - neighbor_span.max) > walkable_climb`
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    span_key_iter = span.next();
                    // Skip non-walkable spans.
                    if !span.area().is_walkable() {
                        continue;
                    }
                    if self.is_ledge(x, z, span, walkable_height as i32, walkable_climb as i32) {
                        self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    fn is_ledge(&self, x: u16, z: u16, span: &Span, walkable_height: i32, walkable_climb: i32) -> bool {
        let floor = span.max() as i32;
        let ceiling = self.ceiling_above(span);

        // The difference between this walkable area and the lowest neighbor walkable area.
        let mut lowest_neighbor_floor_difference = MAX_HEIGHTFIELD_HEIGHT;

        // Min and max height of accessible neighbours.
        let mut lowest_traversable_neighbor_floor = floor;
        let mut highest_traversable_neighbor_floor = floor;

        for dir in 0..4 {
            let neighbor_x = x as i32 + dir_offset_x(dir) as i32;
            let neighbor_z = z as i32 + dir_offset_z(dir) as i32;
            // Skip neighbours which are out of bounds.
            if !self.contains(neighbor_x, neighbor_z) {
                lowest_neighbor_floor_difference = -walkable_climb - 1;
                break;
            }
            let mut neighbor_key_iter = self.span_key_at(neighbor_x as u16, neighbor_z as u16);

            // The most we can step down to the neighbor is the walkable climb distance.
            // Start with the area under the neighbor span
            let neighbor_ceiling = neighbor_key_iter
                .map(|key| self.span(key).min() as i32)
                .unwrap_or(MAX_HEIGHTFIELD_HEIGHT);

            // Skip neighbour if the gap between the spans is too small.
            if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
                lowest_neighbor_floor_difference = -walkable_climb - 1;
                break;
            }

            // For each span in the neighboring column...
            while let Some(neighbor_key) = neighbor_key_iter {
                let neighbor_span = self.span(neighbor_key);
                neighbor_key_iter = neighbor_span.next();
                let neighbor_floor = neighbor_span.max() as i32;
                let neighbor_ceiling = self.ceiling_above(neighbor_span);

                // Only consider neighboring areas that have enough overlap to be potentially traversable.
                if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor) < walkable_height {
                    // No space to traverse between them.
                    continue;
                }

                let neighbor_floor_difference = neighbor_floor - floor;
                lowest_neighbor_floor_difference =
                    lowest_neighbor_floor_difference.min(neighbor_floor_difference);

                // Find min/max accessible neighbor height.
                // Only consider neighbors that are at most walkable_climb away.
                if neighbor_floor_difference.abs() <= walkable_climb {
                    // There is space to move to the neighbor cell and the slope isn't too much.
                    lowest_traversable_neighbor_floor =
                        lowest_traversable_neighbor_floor.min(neighbor_floor);
                    highest_traversable_neighbor_floor =
                        highest_traversable_neighbor_floor.max(neighbor_floor);
                } else if neighbor_floor_difference < -walkable_climb {
                    // We already know this will be considered a ledge span so we can early-out
                    break;
                }
            }
        }

        // The current span is close to a ledge if the magnitude of the drop to any neighbour span
        // is greater than the walkable_climb distance.
        // If the difference between all neighbor floors is too large, this is a steep slope.
        lowest_neighbor_floor_difference < -walkable_climb
            || highest_traversable_neighbor_floor - lowest_traversable_neighbor_floor
                > walkable_climb
    }

    /// Marks walkable spans as not walkable if the clearance above the span is less than the specified `walkable_height`.
    ///
    /// For this filter, the clearance above the span is the distance from the span's
    /// maximum to the minimum of the next higher span in the same column.
    /// If there is no higher span in the column, the clearance is computed as the
    /// distance from the top of the span to the maximum heightfield height.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        // Remove walkable flag from spans which do not have enough
        // space above them for the agent to stand there.
        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key_iter = self.span_key_at(x, z);
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    span_key_iter = span.next();
                    let floor = span.max() as i32;
                    let ceiling = self.ceiling_above(span);
                    if ceiling - floor < walkable_height as i32 {
                        self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    #[inline]
    fn ceiling_above(&self, span: &Span) -> i32 {
        span.next()
            .map(|next| self.span(next).min() as i32)
            .unwrap_or(MAX_HEIGHTFIELD_HEIGHT)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use crate::{
        Aabb3d, HeightfieldBuilder,
        heightfield::SpanInsertion,
        span::{SpanBuilder, SpanKey},
    };

    use super::*;

    fn heightfield(size: f32) -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3::ZERO, Vec3::new(size, 10.0, size)),
            cell_size: 1.0,
            cell_height: 1.0,
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

    fn areas(heightfield: &Heightfield, x: u16, z: u16) -> Vec<AreaType> {
        heightfield
            .column_span_keys(x, z)
            .map(|key: SpanKey| heightfield.span(key).area())
            .collect()
    }

    #[test]
    fn low_hanging_obstacle_becomes_walkable() {
        let mut heightfield = heightfield(1.0);
        add(&mut heightfield, 0, 0, 0, 2, AreaType(5));
        add(&mut heightfield, 0, 0, 3, 4, AreaType::NOT_WALKABLE);
        add(&mut heightfield, 0, 0, 5, 6, AreaType::NOT_WALKABLE);
        heightfield.filter_low_hanging_walkable_obstacles(2);
        // The second obstacle is not touched since its lower neighbor was originally unwalkable.
        assert_eq!(
            areas(&heightfield, 0, 0),
            vec![AreaType(5), AreaType(5), AreaType::NOT_WALKABLE]
        );
    }

    #[test]
    fn low_ceiling_makes_span_unwalkable() {
        let mut heightfield = heightfield(1.0);
        add(&mut heightfield, 0, 0, 0, 2, AreaType(1));
        add(&mut heightfield, 0, 0, 4, 5, AreaType(1));
        heightfield.filter_walkable_low_height_spans(3);
        assert_eq!(
            areas(&heightfield, 0, 0),
            vec![AreaType::NOT_WALKABLE, AreaType(1)]
        );
    }

    #[test]
    fn spans_at_field_edge_are_ledges() {
        let mut heightfield = heightfield(3.0);
        for z in 0..3 {
            for x in 0..3 {
                add(&mut heightfield, x, z, 0, 1, AreaType(1));
            }
        }
        heightfield.filter_ledge_spans(2, 1);
        for z in 0..3 {
            for x in 0..3 {
                let expected = if x == 1 && z == 1 {
                    AreaType(1)
                } else {
                    AreaType::NOT_WALKABLE
                };
                assert_eq!(areas(&heightfield, x, z), vec![expected], "[{x}, {z}]");
            }
        }
    }

    #[test]
    fn drop_next_to_span_is_a_ledge() {
        let mut heightfield = heightfield(5.0);
        for z in 0..5 {
            for x in 0..5 {
                let max = if x >= 2 { 5 } else { 1 };
                add(&mut heightfield, x, z, 0, max, AreaType(1));
            }
        }
        heightfield.filter_ledge_spans(2, 1);
        // The raised plateau edge at x = 2 overlooks a drop of 4 voxels.
        assert_eq!(areas(&heightfield, 2, 2), vec![AreaType::NOT_WALKABLE]);
        assert_eq!(areas(&heightfield, 3, 2), vec![AreaType(1)]);
    }
}
