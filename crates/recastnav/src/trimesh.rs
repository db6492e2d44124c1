//! The triangle soup that is rasterized into a [`Heightfield`](crate::Heightfield).

use glam::{UVec3, Vec3A};

use crate::{
    math::{Aabb3d, TriangleIndices as _},
    span::AreaType,
};

/// A mesh used as input for [`Heightfield`](crate::Heightfield) rasterization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertex positions.
    pub vertices: Vec<Vec3A>,

    /// The triangles as indices into [`TriMesh::vertices`].
    pub indices: Vec<UVec3>,

    /// The area type of each triangle. Each entry corresponds 1:1 to the [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Creates a trimesh from positions and triangle indices with every triangle marked as not walkable.
    pub fn new(vertices: Vec<Vec3A>, indices: Vec<UVec3>) -> Self {
        let area_types = vec![AreaType::NOT_WALKABLE; indices.len()];
        Self {
            vertices,
            indices,
            area_types,
        }
    }

    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    ///
    /// # Panics
    ///
    /// Panics if the combined vertex count does not fit into a `u32`.
    pub fn extend(&mut self, other: TriMesh) {
        assert!(
            self.vertices.len() + other.vertices.len() <= u32::MAX as usize,
            "Cannot extend a trimesh beyond 2^32 vertices"
        );
        let next_vertex_index = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.area_types.extend(other.area_types);
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Sets `area` on every triangle whose slope is at most `threshold_rad`.
    ///
    /// Steeper triangles keep their current area, as do triangles referencing missing vertices.
    /// The latter are reported by the rasterizer.
    pub fn mark_walkable_triangles(&mut self, threshold_rad: f32, area: AreaType) {
        let threshold_cos = threshold_rad.cos();
        for (indices, area_type) in self.indices.iter().zip(&mut self.area_types) {
            if is_walkable(indices.normal(&self.vertices), threshold_cos) {
                *area_type = area;
            }
        }
    }

    /// Like [`TriMesh::mark_walkable_triangles`], but returns the resulting areas instead of storing them.
    pub fn walkable_area_types(&self, threshold_rad: f32, area: AreaType) -> Vec<AreaType> {
        let threshold_cos = threshold_rad.cos();
        self.indices
            .iter()
            .zip(&self.area_types)
            .map(|(indices, current)| {
                if is_walkable(indices.normal(&self.vertices), threshold_cos) {
                    area
                } else {
                    *current
                }
            })
            .collect()
    }
}

fn is_walkable(normal: Option<Vec3A>, threshold_cos: f32) -> bool {
    normal.is_some_and(|normal| normal.y > threshold_cos)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A flat triangle and a wall.
    fn floor_and_wall() -> TriMesh {
        TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, 1.0),
                Vec3A::new(1.0, 0.0, 0.0),
                Vec3A::new(0.0, 1.0, 0.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 3, 1)],
        )
    }

    #[test]
    fn marks_only_flat_triangles() {
        let mut trimesh = floor_and_wall();
        trimesh.mark_walkable_triangles(45.0_f32.to_radians(), AreaType(7));
        assert_eq!(trimesh.area_types, [AreaType(7), AreaType::NOT_WALKABLE]);
    }

    #[test]
    fn walkable_area_types_leaves_mesh_untouched() {
        let trimesh = floor_and_wall();
        let areas = trimesh.walkable_area_types(45.0_f32.to_radians(), AreaType(3));
        assert_eq!(areas, [AreaType(3), AreaType::NOT_WALKABLE]);
        assert!(trimesh.area_types.iter().all(|area| !area.is_walkable()));
    }

    #[test]
    fn missing_vertices_keep_their_area() {
        let mut trimesh = floor_and_wall();
        trimesh.indices.push(UVec3::new(0, 1, 42));
        trimesh.area_types.push(AreaType::NOT_WALKABLE);
        let areas = trimesh.walkable_area_types(45.0_f32.to_radians(), AreaType(3));
        assert_eq!(areas[2], AreaType::NOT_WALKABLE);
        trimesh.mark_walkable_triangles(45.0_f32.to_radians(), AreaType(3));
        assert_eq!(trimesh.area_types[2], AreaType::NOT_WALKABLE);
    }

    #[test]
    fn extend_offsets_indices() {
        let mut trimesh = floor_and_wall();
        trimesh.extend(floor_and_wall());
        assert_eq!(trimesh.vertices.len(), 8);
        assert_eq!(trimesh.indices[2], UVec3::new(4, 5, 6));
        assert_eq!(trimesh.area_types.len(), 4);
        let aabb = trimesh.compute_aabb().unwrap();
        assert_eq!(aabb.max.y, 1.0);
    }
}
