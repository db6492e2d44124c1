use glam::{IVec2, Vec2, Vec3Swizzles as _};

use crate::{Aabb2d, AreaType, CompactHeightfield};

impl CompactHeightfield {
    /// Sets the [`AreaType`] of the spans within the given convex volume.
    ///
    /// A span is inside the volume if its floor lies within the volume's height range
    /// and the center of its cell lies inside the volume's polygon.
    /// Non-walkable spans are never touched.
    pub fn mark_convex_poly_area(&mut self, volume: &ConvexVolume) {
        // Compute the bounding box of the polygon
        let Some(aabb) = Aabb2d::from_points(&volume.vertices) else {
            // The volume is empty
            return;
        };

        // Compute the grid footprint of the polygon
        let to_cell = |point: Vec2| {
            let local = (point - self.aabb.min.xz()) / self.cell_size;
            IVec2::new(local.x as i32, local.y as i32)
        };
        let mut min = to_cell(aabb.min);
        let mut max = to_cell(aabb.max);
        let min_y = ((volume.min_y - self.aabb.min.y) / self.cell_height) as i32;
        let max_y = ((volume.max_y - self.aabb.min.y) / self.cell_height) as i32;

        // Early-out if the polygon lies entirely outside the grid.
        if max.x < 0 || min.x >= self.width as i32 || max.y < 0 || min.y >= self.height as i32 {
            return;
        }

        // Clamp the polygon footprint to the grid
        min = min.max(IVec2::ZERO);
        max = max.min(IVec2::new(self.width as i32 - 1, self.height as i32 - 1));

        for z in min.y..=max.y {
            for x in min.x..=max.x {
                let point = Vec2::new(
                    self.aabb.min.x + (x as f32 + 0.5) * self.cell_size,
                    self.aabb.min.z + (z as f32 + 0.5) * self.cell_size,
                );
                let mut inside = None;
                for i in self.cell_at(x as u16, z as u16).index_range() {
                    // Skip if span is removed.
                    if !self.areas[i].is_walkable() {
                        continue;
                    }
                    // Skip if y extents don't overlap.
                    let y = self.spans[i].y as i32;
                    if y < min_y || y > max_y {
                        continue;
                    }
                    if *inside.get_or_insert_with(|| point_in_poly(point, &volume.vertices)) {
                        self.areas[i] = volume.modification.apply(self.areas[i], volume.area);
                    }
                }
            }
        }
    }
}

/// Crossing-number test on the xz-plane.
fn point_in_poly(point: Vec2, vertices: &[Vec2]) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for (i, vi) in vertices.iter().enumerate() {
        let vj = vertices[j];
        if ((vi.y > point.y) != (vj.y > point.y))
            && (point.x < (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// A convex polygon on the xz-plane, extruded between two heights, that changes the
/// [`AreaType`] of the spans inside it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// The polygon's vertices on the xz-plane. `x` is world x, `y` is world z.
    pub vertices: Vec<Vec2>,
    /// The lower height of the volume in world units.
    pub min_y: f32,
    /// The upper height of the volume in world units.
    pub max_y: f32,
    /// The area type written to the spans inside the volume.
    pub area: AreaType,
    /// How [`ConvexVolume::area`] is combined with a span's current area.
    pub modification: AreaModification,
}

/// How a [`ConvexVolume`] combines its area with the area already stored on a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum AreaModification {
    /// Overwrite the span's area.
    #[default]
    Replace,
    /// Keep whichever area id is higher.
    Max,
}

impl AreaModification {
    /// Combines the `current` area of a span with the `area` of a volume.
    #[inline]
    pub fn apply(self, current: AreaType, area: AreaType) -> AreaType {
        match self {
            AreaModification::Replace => area,
            AreaModification::Max => current.max(area),
        }
    }
}
