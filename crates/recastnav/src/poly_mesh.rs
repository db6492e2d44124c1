use std::collections::VecDeque;

use glam::{IVec2, U16Vec3};
use thiserror::Error;

use crate::{
    Aabb3d, AreaType, RegionId,
    contours::{ContourSet, RegionVertexId},
    math::{intersect, intersect_prop, left, left_on, next, prev},
};

/// A value which indicates an invalid index within a mesh.
///
/// This does not necessarily indicate an error.
pub const RC_MESH_NULL_IDX: u16 = 0xffff;

/// The largest number of vertices a polygon of a [`PolygonMesh`] may have.
pub const MAX_VERTICES_PER_POLYGON: usize = 6;

/// Marks a polygon edge that lies on the tile border. The lower bits hold the side of the tile.
pub const EXTERNAL_LINK: u16 = 0x8000;

const VERTEX_BUCKET_COUNT: usize = 1 << 12;

/// Represents a polygon mesh suitable for use in building a navigation mesh.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonMesh {
    /// The mesh vertices in voxel coordinates, relative to [`Self::aabb`].
    pub vertices: Vec<U16Vec3>,
    /// Polygon and neighbor data. [Length: [`Self::polygon_count`] * 2 * [`Self::max_vertices_per_polygon`]]
    ///
    /// Each polygon holds its vertex indices followed by the indices of the neighboring polygon per edge.
    /// Unused slots are [`RC_MESH_NULL_IDX`].
    pub polygons: Vec<u16>,
    /// The region id assigned to each polygon.
    pub regions: Vec<RegionId>,
    /// The user defined flags for each polygon.
    pub flags: Vec<u16>,
    /// The area id assigned to each polygon.
    pub areas: Vec<AreaType>,
    /// The maximum number of vertices per polygon
    pub max_vertices_per_polygon: usize,
    /// The bounding box of the mesh in world space.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The AABB border size used to generate the source data from which the mesh was derived.
    pub border_size: u16,
    /// The max error of the polygon edges in the mesh.
    pub max_edge_error: f32,
}

impl PolygonMesh {
    /// The number of polygons in the mesh.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        if self.max_vertices_per_polygon == 0 {
            return 0;
        }
        self.polygons.len() / (2 * self.max_vertices_per_polygon)
    }

    /// The vertex indices of the polygon at `index`.
    pub fn polygon_vertices(&self, index: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon;
        let polygon = &self.polygons[index * 2 * nvp..][..nvp];
        let count = polygon
            .iter()
            .position(|v| *v == RC_MESH_NULL_IDX)
            .unwrap_or(nvp);
        &polygon[..count]
    }

    /// Per edge of the polygon at `index`, the index of the neighboring polygon, [`RC_MESH_NULL_IDX`]
    /// for a solid edge, or [`EXTERNAL_LINK`] combined with the side for an edge on the tile border.
    ///
    /// Edge `i` goes from vertex `i` to vertex `i + 1`.
    pub fn polygon_neighbors(&self, index: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon;
        let count = self.polygon_vertices(index).len();
        &self.polygons[index * 2 * nvp + nvp..][..count]
    }
}

/// Errors that can occur while building a [`PolygonMesh`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolygonMeshError {
    /// The contours have more vertices than a mesh can index.
    #[error("Too many vertices: {count}")]
    TooManyVertices {
        /// The number of vertices.
        count: usize,
    },
    /// More polygons were created than a mesh can index.
    #[error("Too many polygons: {count} (max: {max})")]
    TooManyPolygons {
        /// The number of polygons.
        count: usize,
        /// The maximum number of polygons.
        max: usize,
    },
    /// The requested number of vertices per polygon is out of range.
    #[error(
        "Invalid number of vertices per polygon: {0}. Must be between 3 and {MAX_VERTICES_PER_POLYGON}"
    )]
    InvalidVerticesPerPolygon(usize),
}

impl ContourSet {
    /// Builds a polygon mesh from the provided contours.
    ///
    /// The contours are triangulated and the triangles are merged into convex polygons with up to
    /// `max_vertices_per_polygon` vertices. Vertices on the tile border are removed afterwards.
    pub fn into_polygon_mesh(
        self,
        max_vertices_per_polygon: usize,
    ) -> Result<PolygonMesh, PolygonMeshError> {
        let nvp = max_vertices_per_polygon;
        if !(3..=MAX_VERTICES_PER_POLYGON).contains(&nvp) {
            return Err(PolygonMeshError::InvalidVerticesPerPolygon(nvp));
        }

        let mut max_vertices = 0;
        let mut max_polygons = 0;
        let mut max_vertices_per_contour = 0;
        for contour in self.contours.iter().filter(|c| c.vertices.len() >= 3) {
            max_vertices += contour.vertices.len();
            max_polygons += contour.vertices.len() - 2;
            max_vertices_per_contour = max_vertices_per_contour.max(contour.vertices.len());
        }
        if max_vertices >= 0xfffe {
            return Err(PolygonMeshError::TooManyVertices {
                count: max_vertices,
            });
        }

        let mut mesh = MeshPolygons {
            vertices: Vec::with_capacity(max_vertices),
            polygons: Vec::with_capacity(max_polygons),
            regions: Vec::with_capacity(max_polygons),
            areas: Vec::with_capacity(max_polygons),
        };
        let mut removable = vec![false; max_vertices];
        let mut welder = VertexWelder::new(max_vertices);

        let mut indices = Vec::with_capacity(max_vertices_per_contour);
        let mut triangles = Vec::with_capacity(max_vertices_per_contour);
        let mut contour_polygons: Vec<Vec<u16>> = Vec::with_capacity(max_vertices_per_contour);
        for (contour_index, contour) in self.contours.iter().enumerate() {
            if contour.vertices.len() < 3 {
                continue;
            }

            // Triangulate contour
            let positions: Vec<IVec2> = contour.vertices.iter().map(|(v, _)| xz(*v)).collect();
            indices.clear();
            indices.extend((0..positions.len()).map(|j| (j, false)));
            if !triangulate(&positions, &mut indices, &mut triangles) {
                // Bad triangulation, should not happen.
                tracing::warn!(contour = contour_index, "Bad triangulation of contour");
            }

            // Add and merge vertices.
            let mesh_indices: Vec<u16> = contour
                .vertices
                .iter()
                .map(|(vertex, flags)| {
                    let index = welder.add(&mut mesh.vertices, *vertex);
                    if flags.contains(RegionVertexId::BORDER_VERTEX) {
                        // This vertex should be removed.
                        removable[index] = true;
                    }
                    index as u16
                })
                .collect();

            // Build initial polygons.
            contour_polygons.clear();
            for &[a, b, c] in &triangles {
                if a != b && a != c && b != c {
                    contour_polygons.push(vec![mesh_indices[a], mesh_indices[b], mesh_indices[c]]);
                }
            }
            if contour_polygons.is_empty() {
                continue;
            }

            // Merge polygons.
            if nvp > 3 {
                merge_polygons(&mut contour_polygons, &mesh.vertices, nvp, |_, _| {});
            }

            // Store polygons.
            for polygon in contour_polygons.drain(..) {
                mesh.polygons.push(polygon);
                mesh.regions.push(contour.region);
                mesh.areas.push(contour.area);
                if mesh.polygons.len() > max_polygons {
                    return Err(PolygonMeshError::TooManyPolygons {
                        count: mesh.polygons.len(),
                        max: max_polygons,
                    });
                }
            }
        }

        // Remove edge vertices.
        let mut i = 0;
        while i < mesh.vertices.len() {
            if removable[i] && mesh.can_remove_vertex(i as u16) {
                mesh.remove_vertex(i as u16, nvp, max_polygons);
                // Fixup vertex flags
                removable.remove(i);
                continue;
            }
            i += 1;
        }

        if mesh.vertices.len() > RC_MESH_NULL_IDX as usize {
            return Err(PolygonMeshError::TooManyVertices {
                count: mesh.vertices.len(),
            });
        }
        if mesh.polygons.len() > RC_MESH_NULL_IDX as usize {
            return Err(PolygonMeshError::TooManyPolygons {
                count: mesh.polygons.len(),
                max: RC_MESH_NULL_IDX as usize,
            });
        }

        let polygon_count = mesh.polygons.len();
        let mut polygons = vec![RC_MESH_NULL_IDX; polygon_count * nvp * 2];
        for (i, polygon) in mesh.polygons.iter().enumerate() {
            polygons[i * nvp * 2..][..polygon.len()].copy_from_slice(polygon);
        }

        // Calculate adjacency.
        build_mesh_adjacency(&mut polygons, polygon_count, mesh.vertices.len(), nvp);

        // Find portal edges
        if self.border_size > 0 {
            mark_tile_border_edges(&mut polygons, &mesh.vertices, nvp, self.width, self.height);
        }

        tracing::debug!(
            vertices = mesh.vertices.len(),
            polygons = polygon_count,
            "Built polygon mesh"
        );
        Ok(PolygonMesh {
            vertices: mesh.vertices,
            polygons,
            regions: mesh.regions,
            // Just allocate the mesh flags array. The user is resposible to fill it.
            flags: vec![0; polygon_count],
            areas: mesh.areas,
            max_vertices_per_polygon: nvp,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            border_size: self.border_size,
            max_edge_error: self.max_error,
        })
    }
}

/// Polygons under construction, each one a list of vertex indices.
struct MeshPolygons {
    vertices: Vec<U16Vec3>,
    polygons: Vec<Vec<u16>>,
    regions: Vec<RegionId>,
    areas: Vec<AreaType>,
}

impl MeshPolygons {
    fn can_remove_vertex(&self, rem: u16) -> bool {
        // Count number of polygons to remove.
        let mut touched_vertices = 0;
        let mut remaining_edges = 0;
        for polygon in &self.polygons {
            let removed = polygon.iter().filter(|v| **v == rem).count();
            if removed > 0 {
                touched_vertices += removed;
                remaining_edges += polygon.len() - (removed + 1);
            }
        }

        // There would be too few edges remaining to create a polygon.
        // This can happen for example when a tip of a triangle is marked
        // as deletion, but there are no other polys that share the vertex.
        // In this case, the vertex should not be removed.
        if remaining_edges <= 2 {
            return false;
        }

        // Find edges which share the removed vertex.
        // Edge start, edge end and the number of polygons sharing it.
        let mut edges: Vec<(u16, u16, u32)> = Vec::with_capacity(touched_vertices * 2);
        for polygon in &self.polygons {
            let nv = polygon.len();
            // Collect edges which touches the removed vertex.
            for j in 0..nv {
                let k = prev(j, nv);
                if polygon[j] != rem && polygon[k] != rem {
                    continue;
                }
                // Arrange edge so that a=rem.
                let (mut a, mut b) = (polygon[j], polygon[k]);
                if b == rem {
                    std::mem::swap(&mut a, &mut b);
                }
                // Check if the edge exists
                let mut exists = false;
                for edge in edges.iter_mut().filter(|edge| edge.1 == b) {
                    // Exists, increment vertex share count.
                    edge.2 += 1;
                    exists = true;
                }
                // Add new edge.
                if !exists {
                    edges.push((a, b, 1));
                }
            }
        }

        // There should be no more than 2 open edges.
        // This catches the case that two non-adjacent polygons
        // share the removed vertex. In that case, do not remove the vertex.
        let open_edges = edges.iter().filter(|edge| edge.2 < 2).count();
        open_edges <= 2
    }

    /// Removes the vertex and every polygon using it, then fills the hole with new polygons.
    fn remove_vertex(&mut self, rem: u16, nvp: usize, max_polygons: usize) {
        // Edges of the removed polygons that don't touch the removed vertex.
        let mut edges: Vec<(u16, u16, RegionId, AreaType)> = Vec::new();
        let mut i = 0;
        while i < self.polygons.len() {
            let polygon = &self.polygons[i];
            if !polygon.contains(&rem) {
                i += 1;
                continue;
            }
            let nv = polygon.len();
            for j in 0..nv {
                let k = prev(j, nv);
                if polygon[j] != rem && polygon[k] != rem {
                    edges.push((polygon[k], polygon[j], self.regions[i], self.areas[i]));
                }
            }
            // Remove the polygon.
            self.polygons.swap_remove(i);
            self.regions.swap_remove(i);
            self.areas.swap_remove(i);
        }

        // Remove vertex.
        self.vertices.remove(rem as usize);

        // Adjust indices to match the removed vertex layout.
        for polygon in &mut self.polygons {
            for vertex in polygon.iter_mut().filter(|v| **v > rem) {
                *vertex -= 1;
            }
        }
        for edge in &mut edges {
            if edge.0 > rem {
                edge.0 -= 1;
            }
            if edge.1 > rem {
                edge.1 -= 1;
            }
        }

        let Some(&(first, _, region, area)) = edges.first() else {
            return;
        };

        // Start with one vertex, keep appending connected
        // segments to the start and end of the hole.
        let mut hole: VecDeque<(u16, RegionId, AreaType)> = VecDeque::new();
        hole.push_back((first, region, area));
        while !edges.is_empty() {
            let mut matched = false;
            let mut i = 0;
            while i < edges.len() {
                let (ea, eb, region, area) = edges[i];
                let added = if hole.front().map(|h| h.0) == Some(eb) {
                    // The segment matches the beginning of the hole boundary.
                    hole.push_front((ea, region, area));
                    true
                } else if hole.back().map(|h| h.0) == Some(ea) {
                    // The segment matches the end of the hole boundary.
                    hole.push_back((eb, region, area));
                    true
                } else {
                    false
                };
                if added {
                    // The edge segment was added, remove it.
                    edges.swap_remove(i);
                    matched = true;
                } else {
                    i += 1;
                }
            }
            if !matched {
                break;
            }
        }
        let hole = Vec::from(hole);

        // Triangulate the hole.
        let positions: Vec<IVec2> = hole
            .iter()
            .map(|(v, _, _)| xz(self.vertices[*v as usize]))
            .collect();
        let mut indices: Vec<(usize, bool)> = (0..hole.len()).map(|i| (i, false)).collect();
        let mut triangles = Vec::with_capacity(hole.len());
        if !triangulate(&positions, &mut indices, &mut triangles) {
            tracing::warn!(vertex = rem, "Bad triangulation of the hole left by a removed vertex");
        }

        // Merge the hole triangles back to polygons.
        let mut polygons = Vec::with_capacity(triangles.len());
        let mut regions = Vec::with_capacity(triangles.len());
        let mut areas = Vec::with_capacity(triangles.len());
        for [a, b, c] in triangles {
            if a == b || a == c || b == c {
                continue;
            }
            polygons.push(vec![hole[a].0, hole[b].0, hole[c].0]);
            // If this polygon covers multiple region types then mark it as such
            if hole[a].1 != hole[b].1 || hole[b].1 != hole[c].1 {
                regions.push(RegionId::NONE);
            } else {
                regions.push(hole[a].1);
            }
            areas.push(hole[a].2);
        }
        if polygons.is_empty() {
            return;
        }

        // Merge polygons.
        if nvp > 3 {
            merge_polygons(&mut polygons, &self.vertices, nvp, |pa, pb| {
                if regions[pa] != regions[pb] {
                    regions[pa] = RegionId::NONE;
                }
                regions.swap_remove(pb);
                areas.swap_remove(pb);
            });
        }

        // Store polygons.
        for ((polygon, region), area) in polygons.into_iter().zip(regions).zip(areas) {
            if self.polygons.len() >= max_polygons {
                tracing::warn!(
                    max = max_polygons,
                    "Dropping polygons while filling the hole of a removed vertex"
                );
                break;
            }
            self.polygons.push(polygon);
            self.regions.push(region);
            self.areas.push(area);
        }
    }
}

/// Welds vertices that share x and z and are at most 2 voxels apart on the y-axis.
struct VertexWelder {
    first: Vec<Option<usize>>,
    next: Vec<Option<usize>>,
}

impl VertexWelder {
    fn new(capacity: usize) -> Self {
        Self {
            first: vec![None; VERTEX_BUCKET_COUNT],
            next: Vec::with_capacity(capacity),
        }
    }

    fn add(&mut self, vertices: &mut Vec<U16Vec3>, vertex: U16Vec3) -> usize {
        let bucket = vertex_hash(vertex.x, vertex.z);
        let mut candidate = self.first[bucket];
        while let Some(i) = candidate {
            let v = vertices[i];
            if v.x == vertex.x && (v.y as i32 - vertex.y as i32).abs() <= 2 && v.z == vertex.z {
                return i;
            }
            candidate = self.next[i];
        }

        // Could not find, create new.
        let i = vertices.len();
        vertices.push(vertex);
        self.next.push(self.first[bucket]);
        self.first[bucket] = Some(i);
        i
    }
}

fn vertex_hash(x: u16, z: u16) -> usize {
    const H1: u32 = 0x8da6b343; // Large multiplicative constants;
    const H3: u32 = 0xcb1ab31f; // here arbitrarily chosen primes
    let n = H1
        .wrapping_mul(x as u32)
        .wrapping_add(H3.wrapping_mul(z as u32));
    n as usize & (VERTEX_BUCKET_COUNT - 1)
}

#[inline]
fn xz(vertex: U16Vec3) -> IVec2 {
    IVec2::new(vertex.x as i32, vertex.z as i32)
}

/// Triangulates the polygon `vertices[indices]` by ear clipping, always cutting the ear with the shortest diagonal.
///
/// The flag in `indices` marks whether the vertex is the tip of an ear. Returns `false` if the polygon
/// could not be fully triangulated, in which case `triangles` holds the triangles found so far.
pub(crate) fn triangulate(
    vertices: &[IVec2],
    indices: &mut Vec<(usize, bool)>,
    triangles: &mut Vec<[usize; 3]>,
) -> bool {
    triangles.clear();
    if indices.len() < 3 {
        return false;
    }

    let n = indices.len();
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        let is_ear = diagonal(i, i2, vertices, indices);
        indices[i1].1 = is_ear;
    }

    while indices.len() > 3 {
        let n = indices.len();
        let position = |i: usize| vertices[indices[i].0];

        let mut best: Option<(usize, i32)> = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1].1 {
                let len = (position(next(i1, n)) - position(i)).length_squared();
                if best.is_none_or(|(_, min_len)| len < min_len) {
                    best = Some((i, len));
                }
            }
        }

        if best.is_none() {
            // We might get here because the contour has overlapping segments, like this:
            //
            //  A o-o=====o---o B
            //   /  |C   D|    \.
            //  o   o     o     o
            //  :   :     :     :
            //
            // We'll try to recover by loosing up the inCone test a bit so that a diagonal
            // like A-B or C-D can be found and we can continue.
            for i in 0..n {
                let i1 = next(i, n);
                let i2 = next(i1, n);
                if diagonal_loose(i, i2, vertices, indices) {
                    let len = (position(next(i2, n)) - position(i)).length_squared();
                    if best.is_none_or(|(_, min_len)| len < min_len) {
                        best = Some((i, len));
                    }
                }
            }
        }
        let Some((i, _)) = best else {
            // The contour is messed up. This sometimes happens
            // if the contour simplification is too aggressive.
            return false;
        };

        let i1 = next(i, n);
        let i2 = next(i1, n);
        triangles.push([indices[i].0, indices[i1].0, indices[i2].0]);

        // Removes P[i1] by copying P[i+1]...P[n-1] left one index.
        indices.remove(i1);
        let n = n - 1;
        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);
        // Update diagonal flags.
        let is_ear = diagonal(prev(i, n), i1, vertices, indices);
        indices[i].1 = is_ear;
        let is_ear = diagonal(i, next(i1, n), vertices, indices);
        indices[i1].1 = is_ear;
    }

    // Append the remaining triangle.
    triangles.push([indices[0].0, indices[1].0, indices[2].0]);
    true
}

/// Returns true iff (v_i, v_j) is a proper internal diagonal of P.
fn diagonal(i: usize, j: usize, vertices: &[IVec2], indices: &[(usize, bool)]) -> bool {
    in_cone(i, j, vertices, indices) && diagonalie(i, j, vertices, indices, intersect)
}

fn diagonal_loose(i: usize, j: usize, vertices: &[IVec2], indices: &[(usize, bool)]) -> bool {
    in_cone_loose(i, j, vertices, indices)
        && diagonalie(i, j, vertices, indices, intersect_prop)
}

/// Returns true iff the diagonal (i,j) is strictly internal to the
/// polygon P in the neighborhood of the i endpoint.
fn in_cone(i: usize, j: usize, vertices: &[IVec2], indices: &[(usize, bool)]) -> bool {
    let n = indices.len();
    let pi = vertices[indices[i].0];
    let pj = vertices[indices[j].0];
    let pi1 = vertices[indices[next(i, n)].0];
    let pin1 = vertices[indices[prev(i, n)].0];

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn in_cone_loose(i: usize, j: usize, vertices: &[IVec2], indices: &[(usize, bool)]) -> bool {
    let n = indices.len();
    let pi = vertices[indices[i].0];
    let pj = vertices[indices[j].0];
    let pi1 = vertices[indices[next(i, n)].0];
    let pin1 = vertices[indices[prev(i, n)].0];

    if left_on(pin1, pi, pi1) {
        return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Returns true iff (v_i, v_j) is a proper internal *or* external
/// diagonal of P, *ignoring edges incident to v_i and v_j*.
fn diagonalie(
    i: usize,
    j: usize,
    vertices: &[IVec2],
    indices: &[(usize, bool)],
    crosses: fn(IVec2, IVec2, IVec2, IVec2) -> bool,
) -> bool {
    let n = indices.len();
    let d0 = vertices[indices[i].0];
    let d1 = vertices[indices[j].0];

    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vertices[indices[k].0];
        let p1 = vertices[indices[k1].0];
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        if crosses(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

/// Merges polygon pairs sharing an edge, longest shared edge first, as long as the result stays convex.
///
/// `on_merge(a, b)` is called before polygon `b` is merged into `a` and swap-removed.
fn merge_polygons(
    polygons: &mut Vec<Vec<u16>>,
    vertices: &[U16Vec3],
    nvp: usize,
    mut on_merge: impl FnMut(usize, usize),
) {
    loop {
        // Find best polygons to merge.
        let mut best_value = 0;
        let mut best = None;
        for j in 0..polygons.len().saturating_sub(1) {
            for k in j + 1..polygons.len() {
                let Some((value, ea, eb)) =
                    polygon_merge_value(&polygons[j], &polygons[k], vertices, nvp)
                else {
                    continue;
                };
                if value > best_value {
                    best_value = value;
                    best = Some((j, k, ea, eb));
                }
            }
        }

        let Some((pa, pb, ea, eb)) = best else {
            break;
        };
        // Found best, merge.
        polygons[pa] = merge_polygon_vertices(&polygons[pa], &polygons[pb], ea, eb);
        on_merge(pa, pb);
        polygons.swap_remove(pb);
    }
}

/// Returns the squared length of the edge shared by `pa` and `pb` and the index of that edge in
/// each polygon, if the polygons can be merged into a convex polygon of at most `nvp` vertices.
fn polygon_merge_value(
    pa: &[u16],
    pb: &[u16],
    vertices: &[U16Vec3],
    nvp: usize,
) -> Option<(i32, usize, usize)> {
    let na = pa.len();
    let nb = pb.len();

    // If the merged polygon would be too big, do not merge.
    if na + nb - 2 > nvp {
        return None;
    }

    // Check if the polygons share an edge.
    let sorted = |a: u16, b: u16| if a > b { (b, a) } else { (a, b) };
    let (ea, eb) = (0..na).find_map(|i| {
        let edge_a = sorted(pa[i], pa[(i + 1) % na]);
        (0..nb)
            .find(|&j| sorted(pb[j], pb[(j + 1) % nb]) == edge_a)
            .map(|j| (i, j))
    })?;

    let v = |i: u16| xz(vertices[i as usize]);
    // Check to see if the merged polygon would be convex.
    if !left(v(pa[(ea + na - 1) % na]), v(pa[ea]), v(pb[(eb + 2) % nb])) {
        return None;
    }
    if !left(v(pb[(eb + nb - 1) % nb]), v(pb[eb]), v(pa[(ea + 2) % na])) {
        return None;
    }

    let d = v(pa[ea]) - v(pa[(ea + 1) % na]);
    Some((d.length_squared(), ea, eb))
}

fn merge_polygon_vertices(pa: &[u16], pb: &[u16], ea: usize, eb: usize) -> Vec<u16> {
    let na = pa.len();
    let nb = pb.len();
    let mut merged = Vec::with_capacity(na + nb - 2);
    // Add pa
    merged.extend((0..na - 1).map(|i| pa[(ea + 1 + i) % na]));
    // Add pb
    merged.extend((0..nb - 1).map(|i| pb[(eb + 1 + i) % nb]));
    merged
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    vertices: [u16; 2],
    polygons: [usize; 2],
    polygon_edges: [usize; 2],
}

fn build_mesh_adjacency(
    polygons: &mut [u16],
    polygon_count: usize,
    vertex_count: usize,
    nvp: usize,
) {
    // Based on code by Eric Lengyel from:
    // https://web.archive.org/web/20080704083314/http://www.terathon.com/code/edges.php
    let max_edge_count = polygon_count * nvp;
    let mut first_edge: Vec<Option<usize>> = vec![None; vertex_count];
    let mut next_edge: Vec<Option<usize>> = Vec::with_capacity(max_edge_count);
    let mut edges: Vec<Edge> = Vec::with_capacity(max_edge_count);

    let edge_vertices = |polygon: &[u16], j: usize| {
        let v0 = polygon[j];
        let v1 = if j + 1 >= nvp || polygon[j + 1] == RC_MESH_NULL_IDX {
            polygon[0]
        } else {
            polygon[j + 1]
        };
        (v0, v1)
    };

    for i in 0..polygon_count {
        let polygon = &polygons[i * nvp * 2..][..nvp];
        for j in 0..nvp {
            if polygon[j] == RC_MESH_NULL_IDX {
                break;
            }
            let (v0, v1) = edge_vertices(polygon, j);
            if v0 < v1 {
                edges.push(Edge {
                    vertices: [v0, v1],
                    polygons: [i, i],
                    polygon_edges: [j, 0],
                });
                // Insert edge
                next_edge.push(first_edge[v0 as usize]);
                first_edge[v0 as usize] = Some(edges.len() - 1);
            }
        }
    }

    for i in 0..polygon_count {
        let polygon = &polygons[i * nvp * 2..][..nvp];
        for j in 0..nvp {
            if polygon[j] == RC_MESH_NULL_IDX {
                break;
            }
            let (v0, v1) = edge_vertices(polygon, j);
            if v0 <= v1 {
                continue;
            }
            let mut candidate = first_edge[v1 as usize];
            while let Some(e) = candidate {
                let edge = &mut edges[e];
                if edge.vertices[1] == v0 && edge.polygons[0] == edge.polygons[1] {
                    edge.polygons[1] = i;
                    edge.polygon_edges[1] = j;
                    break;
                }
                candidate = next_edge[e];
            }
        }
    }

    // Store adjacency
    for edge in edges {
        if edge.polygons[0] != edge.polygons[1] {
            let [p0, p1] = edge.polygons;
            let [e0, e1] = edge.polygon_edges;
            polygons[p0 * nvp * 2 + nvp + e0] = p1 as u16;
            polygons[p1 * nvp * 2 + nvp + e1] = p0 as u16;
        }
    }
}

/// Flags the unconnected edges that lie on the border of a tile of `width` x `height` voxels.
fn mark_tile_border_edges(
    polygons: &mut [u16],
    vertices: &[U16Vec3],
    nvp: usize,
    width: u16,
    height: u16,
) {
    for polygon in polygons.chunks_exact_mut(nvp * 2) {
        for j in 0..nvp {
            if polygon[j] == RC_MESH_NULL_IDX {
                break;
            }
            // Skip connected edges.
            if polygon[nvp + j] != RC_MESH_NULL_IDX {
                continue;
            }
            let mut nj = j + 1;
            if nj >= nvp || polygon[nj] == RC_MESH_NULL_IDX {
                nj = 0;
            }
            let va = vertices[polygon[j] as usize];
            let vb = vertices[polygon[nj] as usize];

            let side = if va.x == 0 && vb.x == 0 {
                Some(0)
            } else if va.z == height && vb.z == height {
                Some(1)
            } else if va.x == width && vb.x == width {
                Some(2)
            } else if va.z == 0 && vb.z == 0 {
                Some(3)
            } else {
                None
            };
            if let Some(side) = side {
                polygon[nvp + j] = EXTERNAL_LINK | side;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{BuildContoursFlags, CompactHeightfield, distance_field::tests::flat_field};

    use super::*;

    fn floor_contours(size: u16, border_size: u16, split_at: Option<u16>) -> ContourSet {
        let mut compact: CompactHeightfield = flat_field(size).into_compact(2, 1).unwrap();
        if let Some(split_at) = split_at {
            for z in 0..size {
                for x in split_at..size {
                    let i = compact.cell_at(x, z).index() as usize;
                    compact.areas[i] = AreaType(2);
                }
            }
        }
        compact.build_regions_monotone(border_size, 0, 0).unwrap();
        compact.build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
    }

    #[test]
    fn triangulates_convex_and_concave_polygons() {
        let square = [
            IVec2::new(0, 0),
            IVec2::new(0, 4),
            IVec2::new(4, 4),
            IVec2::new(4, 0),
        ];
        let mut indices: Vec<_> = (0..square.len()).map(|i| (i, false)).collect();
        let mut triangles = Vec::new();
        assert!(triangulate(&square, &mut indices, &mut triangles));
        assert_eq!(triangles.len(), 2);

        // An L shape with a reflex vertex at (2, 2).
        let l_shape = [
            IVec2::new(0, 0),
            IVec2::new(0, 4),
            IVec2::new(2, 4),
            IVec2::new(2, 2),
            IVec2::new(4, 2),
            IVec2::new(4, 0),
        ];
        let mut indices: Vec<_> = (0..l_shape.len()).map(|i| (i, false)).collect();
        assert!(triangulate(&l_shape, &mut indices, &mut triangles));
        assert_eq!(triangles.len(), 4);
        let doubled_area: i32 = triangles
            .iter()
            .map(|[a, b, c]| crate::math::area2(l_shape[*a], l_shape[*b], l_shape[*c]).abs())
            .sum();
        assert_eq!(doubled_area, 2 * 12);
    }

    #[test]
    fn square_floor_becomes_a_single_quad() {
        let mesh = floor_contours(6, 0, None).into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.polygon_vertices(0).len(), 4);
        assert!(
            mesh.polygon_neighbors(0)
                .iter()
                .all(|n| *n == RC_MESH_NULL_IDX)
        );
        assert_eq!(mesh.regions, vec![RegionId::from(1)]);
        assert_eq!(mesh.areas, vec![AreaType(1)]);
        assert_eq!(mesh.flags, vec![0]);
    }

    #[test]
    fn triangles_stay_triangles_with_three_vertices_per_polygon() {
        let mesh = floor_contours(6, 0, None).into_polygon_mesh(3).unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        assert!((0..2).all(|i| mesh.polygon_vertices(i).len() == 3));
        // The diagonal is shared.
        assert!(mesh.polygon_neighbors(0).contains(&1));
        assert!(mesh.polygon_neighbors(1).contains(&0));
    }

    #[test]
    fn neighboring_regions_share_welded_vertices_and_are_linked() {
        let mesh = floor_contours(6, 0, Some(3)).into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(
            mesh.polygon_neighbors(0)
                .iter()
                .filter(|n| **n == 1)
                .count(),
            1
        );
        assert_eq!(
            mesh.polygon_neighbors(1)
                .iter()
                .filter(|n| **n == 0)
                .count(),
            1
        );
        assert_ne!(mesh.areas[0], mesh.areas[1]);
    }

    #[test]
    fn edges_on_the_tile_border_are_flagged() {
        let mesh = floor_contours(8, 2, None).into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.border_size, 2);
        assert_eq!(mesh.polygon_count(), 1);
        let mut sides: Vec<u16> = mesh
            .polygon_neighbors(0)
            .iter()
            .map(|n| {
                assert_eq!(n & EXTERNAL_LINK, EXTERNAL_LINK);
                n & !EXTERNAL_LINK
            })
            .collect();
        sides.sort();
        assert_eq!(sides, vec![0, 1, 2, 3]);
    }

    #[test]
    fn rejects_invalid_vertices_per_polygon() {
        let contours = floor_contours(6, 0, None);
        assert_eq!(
            contours.clone().into_polygon_mesh(2),
            Err(PolygonMeshError::InvalidVerticesPerPolygon(2))
        );
        assert_eq!(
            contours.into_polygon_mesh(MAX_VERTICES_PER_POLYGON + 1),
            Err(PolygonMeshError::InvalidVerticesPerPolygon(
                MAX_VERTICES_PER_POLYGON + 1
            ))
        );
    }

    #[test]
    fn vertices_are_welded_within_height_tolerance() {
        let mut welder = VertexWelder::new(4);
        let mut vertices = Vec::new();
        let a = welder.add(&mut vertices, U16Vec3::new(3, 10, 4));
        let b = welder.add(&mut vertices, U16Vec3::new(3, 12, 4));
        let c = welder.add(&mut vertices, U16Vec3::new(3, 13, 4));
        let d = welder.add(&mut vertices, U16Vec3::new(4, 10, 4));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(vertices.len(), 3);
    }
}
