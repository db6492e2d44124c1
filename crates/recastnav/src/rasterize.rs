//! Contains methods for rasterizing the triangles of a [`TriMesh`] into a [`Heightfield`].

use glam::{UVec3, Vec3A};
use thiserror::Error;

use crate::{
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    math::TriangleVertices as _,
    span::{AreaType, Span, SpanBuilder},
    trimesh::TriMesh,
};

impl Heightfield {
    /// Rasterizes all triangles of a [`TriMesh`], using [`TriMesh::area_types`] as the area of each triangle.
    ///
    /// Spans will only be added for triangles that overlap the heightfield grid.
    /// `flag_merge_threshold` is the distance in voxels within which two span ceilings
    /// merge their area ids, usually `walkable_climb`.
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        self.rasterize_indexed_triangles(
            &trimesh.vertices,
            &trimesh.indices,
            &trimesh.area_types,
            flag_merge_threshold,
        )
    }

    /// Rasterizes indexed triangles with a separately supplied area per triangle.
    ///
    /// This allows several heightfields, e.g. one per tile, to share the same read-only geometry.
    pub fn rasterize_indexed_triangles(
        &mut self,
        vertices: &[Vec3A],
        indices: &[UVec3],
        areas: &[AreaType],
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        if areas.len() != indices.len() {
            return Err(RasterizationError::AreaCountMismatch {
                triangles: indices.len(),
                areas: areas.len(),
            });
        }
        for (triangle, area) in indices.iter().zip(areas) {
            let vertex = |i: usize| {
                vertices
                    .get(triangle[i] as usize)
                    .copied()
                    .ok_or(RasterizationError::VertexIndexOutOfBounds {
                        index: triangle[i],
                        vertex_count: vertices.len(),
                    })
            };
            let triangle = [vertex(0)?, vertex(1)?, vertex(2)?];
            self.rasterize_triangle(triangle, *area, flag_merge_threshold)?;
        }
        Ok(())
    }

    /// Rasterizes a single triangle into the heightfield.
    pub fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area: AreaType,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        // If the triangle does not touch the bounding box of the heightfield, skip the triangle.
        let triangle_aabb = triangle.aabb();
        if !triangle_aabb.intersects(&self.aabb) {
            return Ok(());
        }

        let width = self.width as i32;
        let height = self.height as i32;
        let aabb_min = Vec3A::from(self.aabb.min);
        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;
        let by = self.aabb.max.y - self.aabb.min.y;

        // Calculate the footprint of the triangle on the grid's z-axis
        let z0 = ((triangle_aabb.min.z - self.aabb.min.z) * inverse_cell_size) as i32;
        let z1 = ((triangle_aabb.max.z - self.aabb.min.z) * inverse_cell_size) as i32;
        // use -1 rather than 0 to cut the polygon properly at the start of the tile
        let z0 = z0.clamp(-1, height - 1);
        let z1 = z1.clamp(0, height - 1);

        // Clip the triangle into all grid cells it touches.
        let mut input = ClipPolygon::from_triangle(triangle);
        let mut row = ClipPolygon::default();
        let mut rest = ClipPolygon::default();
        let mut cell = ClipPolygon::default();
        let mut row_rest = ClipPolygon::default();

        for z in z0..=z1 {
            // Clip polygon to row. Store the remaining polygon as well
            let cell_z = aabb_min.z + z as f32 * self.cell_size;
            divide_poly(&input, &mut row, &mut rest, cell_z + self.cell_size, Axis::Z);
            std::mem::swap(&mut input, &mut rest);
            if row.len < 3 || z < 0 {
                continue;
            }

            // Find the x-axis bounds of the row
            let (min_x, max_x) = row
                .vertices()
                .iter()
                .fold((row.verts[0].x, row.verts[0].x), |(min, max), v| {
                    (min.min(v.x), max.max(v.x))
                });
            let x0 = ((min_x - aabb_min.x) * inverse_cell_size) as i32;
            let x1 = ((max_x - aabb_min.x) * inverse_cell_size) as i32;
            if x1 < 0 || x0 >= width {
                continue;
            }
            let x0 = x0.clamp(-1, width - 1);
            let x1 = x1.clamp(0, width - 1);

            for x in x0..=x1 {
                // Clip polygon to column. Store the remaining polygon as well
                let cell_x = aabb_min.x + x as f32 * self.cell_size;
                divide_poly(&row, &mut cell, &mut row_rest, cell_x + self.cell_size, Axis::X);
                std::mem::swap(&mut row, &mut row_rest);
                if cell.len < 3 || x < 0 {
                    continue;
                }

                // Calculate min and max of the span.
                let (span_min, span_max) = cell
                    .vertices()
                    .iter()
                    .fold((cell.verts[0].y, cell.verts[0].y), |(min, max), v| {
                        (min.min(v.y), max.max(v.y))
                    });
                let span_min = span_min - aabb_min.y;
                let span_max = span_max - aabb_min.y;

                // Skip the span if it's completely outside the heightfield bounding box
                if span_max < 0.0 || span_min > by {
                    continue;
                }
                // Clamp the span to the heightfield bounding box.
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(by);

                // Snap the span to the heightfield height grid.
                let span_min_cell_index =
                    ((span_min * inverse_cell_height).floor() as i32).clamp(0, Span::MAX_HEIGHT as i32);
                let span_max_cell_index = ((span_max * inverse_cell_height).ceil() as i32)
                    .clamp(span_min_cell_index + 1, Span::MAX_HEIGHT as i32);

                self.add_span(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold,
                    span: SpanBuilder {
                        min: span_min_cell_index as u16,
                        max: span_max_cell_index as u16,
                        area,
                        next: None,
                    }
                    .build(),
                })?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Z,
}

/// A convex polygon produced by clipping a triangle against grid lines.
/// Clipping a triangle against two axis-aligned slabs never yields more than 7 vertices.
#[derive(Debug, Clone, Copy, Default)]
struct ClipPolygon {
    verts: [Vec3A; 7],
    len: usize,
}

impl ClipPolygon {
    fn from_triangle(triangle: [Vec3A; 3]) -> Self {
        let mut poly = Self::default();
        poly.verts[..3].copy_from_slice(&triangle);
        poly.len = 3;
        poly
    }

    #[inline]
    fn vertices(&self) -> &[Vec3A] {
        &self.verts[..self.len]
    }

    #[inline]
    fn push(&mut self, vert: Vec3A) {
        // The clipped polygons are convex, so they cannot outgrow the buffer.
        if self.len < self.verts.len() {
            self.verts[self.len] = vert;
            self.len += 1;
        }
    }
}

/// Divides a convex polygon along the line `axis = axis_offset`.
/// `below` receives the part with smaller coordinates, `above` the remainder.
fn divide_poly(
    input: &ClipPolygon,
    below: &mut ClipPolygon,
    above: &mut ClipPolygon,
    axis_offset: f32,
    axis: Axis,
) {
    below.len = 0;
    above.len = 0;
    let coord = |v: Vec3A| match axis {
        Axis::X => v.x,
        Axis::Z => v.z,
    };
    let verts = input.vertices();
    let mut delta = [0.0_f32; 7];
    for (d, v) in delta.iter_mut().zip(verts) {
        *d = axis_offset - coord(*v);
    }

    let n = verts.len();
    let mut b = n.wrapping_sub(1);
    for a in 0..n {
        // If the two vertices are on the same side of the separating axis
        let same_side = (delta[a] >= 0.0) == (delta[b] >= 0.0);
        if !same_side {
            let s = delta[b] / (delta[b] - delta[a]);
            let intersection = verts[b] + (verts[a] - verts[b]) * s;
            below.push(intersection);
            above.push(intersection);
            // Add the a'th point to the right polygon.
            // Do NOT add points that are on the dividing line since these were already added above
            if delta[a] > 0.0 {
                below.push(verts[a]);
            } else if delta[a] < 0.0 {
                above.push(verts[a]);
            }
        } else {
            // Add the a'th point to the right polygon. Addition is done even for points on the dividing line
            if delta[a] >= 0.0 {
                below.push(verts[a]);
                if delta[a] != 0.0 {
                    b = a;
                    continue;
                }
            }
            above.push(verts[a]);
        }
        b = a;
    }
}

/// Errors that can occur during rasterization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RasterizationError {
    /// A span could not be inserted into the heightfield.
    #[error("Failed to insert span: {0}")]
    SpanInsertion(#[from] SpanInsertionError),
    /// The number of area types does not match the number of triangles.
    #[error("Got {areas} area types for {triangles} triangles")]
    AreaCountMismatch {
        /// Number of triangles
        triangles: usize,
        /// Number of area types
        areas: usize,
    },
    /// A triangle references a vertex that does not exist.
    #[error("Triangle references vertex {index}, but there are only {vertex_count} vertices")]
    VertexIndexOutOfBounds {
        /// The offending index
        index: u32,
        /// Number of vertices
        vertex_count: usize,
    },
}
