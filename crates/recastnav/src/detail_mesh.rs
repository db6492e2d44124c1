use std::collections::VecDeque;

use glam::{U16Vec3, Vec3A, Vec3Swizzles as _};
use thiserror::Error;

use crate::{
    CompactHeightfield, PolygonMesh, RegionId,
    math::{
        dir_for_offset, dir_offset_x, dir_offset_z, distance_squared_between_point_and_line_vec2,
        distance_squared_between_point_and_line_vec3, next, prev,
    },
};

/// The largest number of vertices a single detail sub-mesh may hold.
const MAX_VERTS: usize = 127;
/// Max tris for delaunay is 2n-2-k (n=num verts, k=num hull verts).
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

const RC_UNSET_HEIGHT: u16 = 0xffff;

/// Flag of a detail triangle edge that lies on the boundary of its polygon.
/// Edge `i` of a triangle is stored at bit `2 * i`.
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x1;

/// Contains triangle meshes that represent detailed height data associated
/// with the polygons in its associated polygon mesh object.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailNavmesh {
    /// One sub-mesh per polygon of the source [`PolygonMesh`], in the same order.
    pub meshes: Vec<SubMesh>,
    /// The mesh vertices in world space.
    pub vertices: Vec<Vec3A>,
    /// The mesh triangles. Indices are relative to [`SubMesh::first_vertex_index`] of the owning sub-mesh.
    pub triangles: Vec<[u8; 3]>,
    /// Per triangle, the [`DETAIL_EDGE_BOUNDARY`] flags of its three edges.
    pub triangle_flags: Vec<u8>,
}

/// The range of vertices and triangles of [`DetailNavmesh`] belonging to one polygon.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SubMesh {
    /// Index of the first vertex in [`DetailNavmesh::vertices`]
    pub first_vertex_index: usize,
    /// Number of vertices
    pub vertex_count: usize,
    /// Index of the first triangle in [`DetailNavmesh::triangles`]
    pub first_triangle_index: usize,
    /// Number of triangles
    pub triangle_count: usize,
}

impl DetailNavmesh {
    /// Builds a detail mesh from the provided polygon mesh.
    ///
    /// Every polygon is triangulated and refined with height samples of `heightfield` taken
    /// every `sample_distance` world units, until the surface is within `sample_max_error`
    /// of the samples. A `sample_distance` of 0 disables the refinement.
    ///
    /// `heightfield` must be the compact heightfield the polygon mesh was built from.
    pub fn new(
        mesh: &PolygonMesh,
        heightfield: &CompactHeightfield,
        sample_distance: f32,
        sample_max_error: f32,
    ) -> Result<Self, DetailNavmeshError> {
        let mut dmesh = DetailNavmesh::default();
        if mesh.vertices.is_empty() || mesh.polygon_count() == 0 {
            return Ok(dmesh);
        }
        let chf = heightfield;
        let cs = mesh.cell_size;
        let ch = mesh.cell_height;
        let orig = Vec3A::from(mesh.aabb.min);
        let border_size = mesh.border_size as i32;
        let height_search_radius = 1.max(mesh.max_edge_error.ceil() as i32);

        let polygon_count = mesh.polygon_count();
        let poly_vert_count: usize = (0..polygon_count)
            .map(|i| mesh.polygon_vertices(i).len())
            .sum();
        let vcap = poly_vert_count + poly_vert_count / 2;
        dmesh.meshes = Vec::with_capacity(polygon_count);
        dmesh.vertices = Vec::with_capacity(vcap);
        dmesh.triangles = Vec::with_capacity(vcap * 2);
        dmesh.triangle_flags = Vec::with_capacity(vcap * 2);

        let mut hp = HeightPatch::default();
        let mut detail = PolyDetail::default();
        let mut queue = VecDeque::with_capacity(512);
        let mut poly = Vec::with_capacity(mesh.max_vertices_per_polygon);

        for i in 0..polygon_count {
            let p = mesh.polygon_vertices(i);

            // Store polygon vertices for processing.
            poly.clear();
            poly.extend(p.iter().map(|index| {
                let v = mesh.vertices[*index as usize].as_vec3a();
                Vec3A::new(v.x * cs, v.y * ch, v.z * cs)
            }));

            // Find the area of the polygon, expanded by one cell.
            let mut xmin = chf.width as i32;
            let mut xmax = 0;
            let mut zmin = chf.height as i32;
            let mut zmax = 0;
            for index in p {
                let v = mesh.vertices[*index as usize];
                xmin = xmin.min(v.x as i32);
                xmax = xmax.max(v.x as i32);
                zmin = zmin.min(v.z as i32);
                zmax = zmax.max(v.z as i32);
            }
            xmin = (xmin - 1).max(0);
            xmax = (xmax + 1).min(chf.width as i32);
            zmin = (zmin - 1).max(0);
            zmax = (zmax + 1).min(chf.height as i32);

            // Get the height data from the area of the polygon.
            hp.reset(xmin, zmin, (xmax - xmin).max(0), (zmax - zmin).max(0));
            hp.get_height_data(
                chf,
                p,
                &mesh.vertices,
                border_size,
                &mut queue,
                mesh.regions[i],
            )
            .ok_or(DetailNavmeshError::NoStartSpan { polygon: i })?;

            // Build detail mesh.
            detail.build(
                &poly,
                sample_distance,
                sample_max_error,
                height_search_radius,
                chf,
                &hp,
            );

            // Store detail submesh
            dmesh.meshes.push(SubMesh {
                first_vertex_index: dmesh.vertices.len(),
                vertex_count: detail.vertices.len(),
                first_triangle_index: dmesh.triangles.len(),
                triangle_count: detail.triangles.len(),
            });

            // Move detail verts to world space.
            dmesh.vertices.extend(detail.vertices.iter().map(|vertex| {
                let mut vertex = *vertex + orig;
                vertex.y += chf.cell_height;
                vertex
            }));
            for (triangle, flags) in &detail.triangles {
                dmesh.triangles.push(triangle.map(|index| index as u8));
                dmesh.triangle_flags.push(*flags);
            }
        }

        tracing::debug!(
            submeshes = dmesh.meshes.len(),
            vertices = dmesh.vertices.len(),
            triangles = dmesh.triangles.len(),
            "Built detail mesh"
        );
        Ok(dmesh)
    }

    /// The world space vertices of the sub-mesh at `index`.
    pub fn submesh_vertices(&self, index: usize) -> &[Vec3A] {
        let mesh = &self.meshes[index];
        &self.vertices[mesh.first_vertex_index..][..mesh.vertex_count]
    }

    /// The triangles of the sub-mesh at `index`, indexing into [`Self::submesh_vertices`].
    pub fn submesh_triangles(&self, index: usize) -> &[[u8; 3]] {
        let mesh = &self.meshes[index];
        &self.triangles[mesh.first_triangle_index..][..mesh.triangle_count]
    }
}

/// Errors that can occur while building a [`DetailNavmesh`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetailNavmeshError {
    /// No span near the polygon's vertices could be found to sample heights from.
    /// The polygon mesh was likely built from a different heightfield.
    #[error("Polygon {polygon} does not lie on any span of the compact heightfield")]
    NoStartSpan {
        /// The index of the polygon.
        polygon: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    x: i32,
    y: u16,
    z: i32,
    added: bool,
}

/// Scratch buffers for refining a single polygon. Reused across polygons.
#[derive(Debug, Default)]
struct PolyDetail {
    /// Polygon-local vertices; the polygon's own vertices come first, then edge samples, then interior samples.
    vertices: Vec<Vec3A>,
    triangles: Vec<([usize; 3], u8)>,
    hull: Vec<usize>,
    edges: Vec<DelaunayEdge>,
    samples: Vec<Sample>,
}

impl PolyDetail {
    fn build(
        &mut self,
        polygon: &[Vec3A],
        sample_dist: f32,
        sample_max_error: f32,
        height_search_radius: i32,
        chf: &CompactHeightfield,
        hp: &HeightPatch,
    ) {
        let nin = polygon.len();
        let mut edge = [Vec3A::ZERO; MAX_VERTS_PER_EDGE + 1];

        self.vertices.clear();
        self.vertices.extend_from_slice(polygon);
        self.hull.clear();
        self.edges.clear();
        self.triangles.clear();

        let cs = chf.cell_size;
        let ics = 1.0 / cs;

        // Calculate minimum extents of the polygon based on input data.
        let min_extent = poly_min_extent(polygon);

        // Tessellate outlines.
        // This is done in separate pass in order to ensure
        // seamless height values across the ply boundaries.
        if sample_dist > 0.0 {
            let mut j = nin - 1;
            for i in 0..nin {
                let mut vj = polygon[j];
                let mut vi = polygon[i];
                let mut swapped = false;
                // Make sure the segments are always handled in same order
                // using lexological sort or else there will be seams.
                if (vj.x - vi.x).abs() < 1.0e-6 {
                    if vj.z > vi.z {
                        std::mem::swap(&mut vj, &mut vi);
                        swapped = true;
                    }
                } else if vj.x > vi.x {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }
                // Create samples along the edge.
                let dij = vi - vj;
                let d = dij.xz().length();
                let mut nn = 1 + (d / sample_dist).floor() as usize;
                if nn >= MAX_VERTS_PER_EDGE {
                    nn = MAX_VERTS_PER_EDGE - 1;
                }
                if self.vertices.len() + nn >= MAX_VERTS {
                    nn = (MAX_VERTS - 1).saturating_sub(self.vertices.len()).max(1);
                }
                for (k, pos) in edge.iter_mut().enumerate().take(nn + 1) {
                    let u = k as f32 / nn as f32;
                    *pos = vj + dij * u;
                    pos.y = get_height(*pos, ics, chf.cell_height, height_search_radius, hp) as f32
                        * chf.cell_height;
                }
                // Simplify samples.
                let mut idx = [0; MAX_VERTS_PER_EDGE];
                idx[1] = nn;
                let mut nidx = 2;
                let mut k = 0;
                while k < nidx - 1 {
                    let a = idx[k];
                    let b = idx[k + 1];
                    let va = edge[a];
                    let vb = edge[b];
                    // Find maximum deviation along the segment.
                    let mut maxd = 0.0;
                    let mut maxi = None;
                    for (m, vm) in edge.iter().enumerate().take(b).skip(a + 1) {
                        let dev = distance_squared_between_point_and_line_vec3(*vm, (va, vb));
                        if dev > maxd {
                            maxd = dev;
                            maxi = Some(m);
                        }
                    }
                    // If the max deviation is larger than accepted error,
                    // add new point, else continue to next segment.
                    if let Some(maxi) = maxi
                        && maxd > sample_max_error * sample_max_error
                    {
                        for m in ((k + 1)..=nidx).rev() {
                            idx[m] = idx[m - 1];
                        }
                        idx[k + 1] = maxi;
                        nidx += 1;
                    } else {
                        k += 1;
                    }
                }

                self.hull.push(j);
                // Add new vertices.
                let inner = &idx[1..nidx - 1];
                if swapped {
                    for k in inner.iter().rev() {
                        self.hull.push(self.vertices.len());
                        self.vertices.push(edge[*k]);
                    }
                } else {
                    for k in inner {
                        self.hull.push(self.vertices.len());
                        self.vertices.push(edge[*k]);
                    }
                }
                j = i;
            }
        } else {
            // Same hull order as an outline without edge samples.
            self.hull.push(nin - 1);
            self.hull.extend(0..nin - 1);
        }

        // If the polygon minimum extent is small (sliver or small triangle), do not try to add internal points.
        if min_extent < sample_dist * 2.0 {
            triangulate_hull(&self.vertices, &self.hull, nin, &mut self.triangles);
            set_tri_flags(&mut self.triangles, &self.hull);
            return;
        }

        // Tessellate the base mesh.
        // We're using the triangulateHull instead of delaunayHull as it tends to
        // create a bit better triangulation for long thin triangles when there
        // are no internal points.
        triangulate_hull(&self.vertices, &self.hull, nin, &mut self.triangles);

        if self.triangles.is_empty() {
            // Could not triangulate the poly, make sure there is some valid data there.
            tracing::warn!(
                vertices = self.vertices.len(),
                "Could not triangulate detail polygon"
            );
            return;
        }

        if sample_dist > 0.0 {
            // Create sample locations in a grid.
            let (bmin, bmax) = polygon
                .iter()
                .fold((polygon[0], polygon[0]), |(min, max), v| {
                    (min.min(*v), max.max(*v))
                });
            let x0 = (bmin.x / sample_dist).floor() as i32;
            let x1 = (bmax.x / sample_dist).ceil() as i32;
            let z0 = (bmin.z / sample_dist).floor() as i32;
            let z1 = (bmax.z / sample_dist).ceil() as i32;
            self.samples.clear();
            for z in z0..z1 {
                for x in x0..x1 {
                    let pt = Vec3A::new(
                        x as f32 * sample_dist,
                        (bmax.y + bmin.y) * 0.5,
                        z as f32 * sample_dist,
                    );
                    // Make sure the samples are not too close to the edges.
                    // The distance is squared while the threshold is not.
                    if dist_to_poly(polygon, pt) > -sample_dist / 2.0 {
                        continue;
                    }
                    let y = get_height(pt, ics, chf.cell_height, height_search_radius, hp);
                    self.samples.push(Sample {
                        x,
                        y,
                        z,
                        added: false,
                    });
                }
            }

            // Add the samples starting from the one that has the most
            // error. The procedure stops when all samples are added
            // or when the max error is within treshold.
            for _ in 0..self.samples.len() {
                if self.vertices.len() >= MAX_VERTS {
                    tracing::warn!(
                        max = MAX_VERTS,
                        "Detail polygon reached the vertex limit before meeting the sample error"
                    );
                    break;
                }

                // Find sample with most error.
                let mut bestpt = Vec3A::ZERO;
                let mut bestd = 0.0;
                let mut besti = None;
                for (i, sample) in self.samples.iter().enumerate() {
                    if sample.added {
                        continue;
                    }
                    // The sample location is jittered to get rid of some bad triangulations
                    // which are cause by symmetrical data from the grid structure.
                    let pt = Vec3A::new(
                        sample.x as f32 * sample_dist + jitter_x(i) * cs * 0.1,
                        sample.y as f32 * chf.cell_height,
                        sample.z as f32 * sample_dist + jitter_z(i) * cs * 0.1,
                    );
                    let Some(d) = dist_to_tri_mesh(pt, &self.vertices, &self.triangles) else {
                        // did not hit the mesh.
                        continue;
                    };
                    if d > bestd {
                        bestd = d;
                        besti = Some(i);
                        bestpt = pt;
                    }
                }
                // If the max error is within accepted threshold, stop tesselating.
                let Some(besti) = besti else {
                    break;
                };
                if bestd <= sample_max_error {
                    break;
                }
                // Mark sample as added.
                self.samples[besti].added = true;
                // Add the new sample point.
                self.vertices.push(bestpt);

                // Create new triangulation.
                // TODO: Insert the point incrementally instead of rebuilding the triangulation.
                self.edges.clear();
                self.triangles.clear();
                delaunay_hull(
                    &self.vertices,
                    &self.hull,
                    &mut self.triangles,
                    &mut self.edges,
                );
            }
        }

        let ntris = self.triangles.len();
        if ntris > MAX_TRIS {
            self.triangles.truncate(MAX_TRIS);
            tracing::error!("Shrinking detail triangle count from {ntris} to max {MAX_TRIS}");
        }
        set_tri_flags(&mut self.triangles, &self.hull);
    }
}

/// Face index of an edge side that has not been resolved yet.
const UNDEFINED_FACE: i32 = -1;
/// Face index of an edge side that lies outside the hull.
const HULL_FACE: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DelaunayEdge {
    start: usize,
    end: usize,
    /// The face on the left of `start -> end`, then the face on the left of `end -> start`.
    faces: [i32; 2],
}

impl DelaunayEdge {
    fn update_left_face(&mut self, s: usize, t: usize, face: i32) {
        if self.start == s && self.end == t && self.faces[0] == UNDEFINED_FACE {
            self.faces[0] = face;
        } else if self.end == s && self.start == t && self.faces[1] == UNDEFINED_FACE {
            self.faces[1] = face;
        }
    }
}

/// Delaunay triangulation of `points` constrained to the convex `hull`.
fn delaunay_hull(
    points: &[Vec3A],
    hull: &[usize],
    triangles: &mut Vec<([usize; 3], u8)>,
    edges: &mut Vec<DelaunayEdge>,
) {
    let mut nfaces = 0;
    let max_edges = points.len() * 10;
    edges.clear();

    let mut j = hull.len() - 1;
    for i in 0..hull.len() {
        add_edge(edges, max_edges, hull[j], hull[i], HULL_FACE, UNDEFINED_FACE);
        j = i;
    }

    let mut current_edge = 0;
    while current_edge < edges.len() {
        if edges[current_edge].faces[0] == UNDEFINED_FACE {
            complete_facet(points, edges, max_edges, &mut nfaces, current_edge);
        }
        if edges[current_edge].faces[1] == UNDEFINED_FACE {
            complete_facet(points, edges, max_edges, &mut nfaces, current_edge);
        }
        current_edge += 1;
    }

    // Create tris
    let mut faces: Vec<[Option<usize>; 3]> = vec![[None; 3]; nfaces];
    for e in edges.iter() {
        if e.faces[1] >= 0 {
            // Left face
            let t = &mut faces[e.faces[1] as usize];
            if t[0].is_none() {
                t[0] = Some(e.start);
                t[1] = Some(e.end);
            } else if t[0] == Some(e.end) {
                t[2] = Some(e.start);
            } else if t[1] == Some(e.start) {
                t[2] = Some(e.end);
            }
        }
        if e.faces[0] >= 0 {
            // Right
            let t = &mut faces[e.faces[0] as usize];
            if t[0].is_none() {
                t[0] = Some(e.end);
                t[1] = Some(e.start);
            } else if t[0] == Some(e.start) {
                t[2] = Some(e.end);
            } else if t[1] == Some(e.end) {
                t[2] = Some(e.start);
            }
        }
    }

    let mut i = 0;
    while i < faces.len() {
        if let [Some(a), Some(b), Some(c)] = faces[i] {
            triangles.push(([a, b, c], 0));
            i += 1;
        } else {
            tracing::warn!(face = i, "Removing dangling face of detail triangulation");
            faces.swap_remove(i);
        }
    }
}

fn complete_facet(
    points: &[Vec3A],
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    nfaces: &mut usize,
    e: usize,
) {
    const EPS: f32 = 1.0e-5;
    const TOLERANCE: f32 = 0.001;

    // Cache s and t.
    let edge = edges[e];
    let (s, t) = if edge.faces[0] == UNDEFINED_FACE {
        (edge.start, edge.end)
    } else if edge.faces[1] == UNDEFINED_FACE {
        (edge.end, edge.start)
    } else {
        // Edge already completed.
        return;
    };

    // Find best point on left of edge.
    let mut pt = None;
    let mut c = Vec3A::ZERO;
    let mut r = -1.0;
    for u in 0..points.len() {
        if u == s || u == t {
            continue;
        }
        if vcross2(points[s], points[t], points[u]) <= EPS {
            continue;
        }
        if r < 0.0 {
            // The circle is not updated yet, do it now.
            pt = Some(u);
            (c, r) = circum_circle(points[s], points[t], points[u]);
            continue;
        }
        let d = c.xz().distance(points[u].xz());
        if d > r * (1.0 + TOLERANCE) {
            // Outside current circumcircle, skip.
            continue;
        } else if d >= r * (1.0 - TOLERANCE) {
            // Inside epsilon circumcircle, do extra tests to make sure the edge is valid.
            if overlap_edges(points, edges, s, u) || overlap_edges(points, edges, t, u) {
                continue;
            }
        }
        // Edge is valid.
        pt = Some(u);
        (c, r) = circum_circle(points[s], points[t], points[u]);
    }

    // Add new triangle or update edge info if s-t is on hull.
    let Some(pt) = pt else {
        edges[e].update_left_face(s, t, HULL_FACE);
        return;
    };
    let face = *nfaces as i32;
    // Update face information of edge being completed.
    edges[e].update_left_face(s, t, face);

    // Add new edge or update face info of old edge.
    match find_edge(edges, pt, s) {
        Some(e) => edges[e].update_left_face(pt, s, face),
        None => {
            add_edge(edges, max_edges, pt, s, face, UNDEFINED_FACE);
        }
    }
    match find_edge(edges, t, pt) {
        Some(e) => edges[e].update_left_face(t, pt, face),
        None => {
            add_edge(edges, max_edges, t, pt, face, UNDEFINED_FACE);
        }
    }
    *nfaces += 1;
}

fn add_edge(
    edges: &mut Vec<DelaunayEdge>,
    max_edges: usize,
    s: usize,
    t: usize,
    l: i32,
    r: i32,
) -> Option<usize> {
    if edges.len() >= max_edges {
        tracing::error!("Too many edges in detail triangulation ({max_edges})");
        return None;
    }
    // Add edge if not already in the triangulation.
    if find_edge(edges, s, t).is_some() {
        return None;
    }
    edges.push(DelaunayEdge {
        start: s,
        end: t,
        faces: [l, r],
    });
    Some(edges.len() - 1)
}

fn find_edge(edges: &[DelaunayEdge], s: usize, t: usize) -> Option<usize> {
    edges
        .iter()
        .position(|e| (e.start == s && e.end == t) || (e.start == t && e.end == s))
}

fn overlap_edges(points: &[Vec3A], edges: &[DelaunayEdge], s1: usize, t1: usize) -> bool {
    edges.iter().any(|e| {
        let (s0, t0) = (e.start, e.end);
        // Same or connected edges do not overlap.
        if s0 == s1 || s0 == t1 || t0 == s1 || t0 == t1 {
            return false;
        }
        overlap_seg_seg_2d(points[s0], points[t0], points[s1], points[t1])
    })
}

fn overlap_seg_seg_2d(a: Vec3A, b: Vec3A, c: Vec3A, d: Vec3A) -> bool {
    let a1 = vcross2(a, b, d);
    let a2 = vcross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = vcross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

/// Circumcircle of the triangle on the xz-plane. Degenerate triangles yield `(p1, 0.0)`.
fn circum_circle(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> (Vec3A, f32) {
    const EPS: f32 = 1.0e-6;
    // Calculate the circle relative to p1, to avoid some precision issues.
    let v1 = Vec3A::ZERO;
    let v2 = p2 - p1;
    let v3 = p3 - p1;

    let cp = vcross2(v1, v2, v3);
    if cp.abs() <= EPS {
        return (p1, 0.0);
    }
    let v1_sq = v1.xz().length_squared();
    let v2_sq = v2.xz().length_squared();
    let v3_sq = v3.xz().length_squared();
    let c = Vec3A::new(
        (v1_sq * (v2.z - v3.z) + v2_sq * (v3.z - v1.z) + v3_sq * (v1.z - v2.z)) / (2.0 * cp),
        0.0,
        (v1_sq * (v3.x - v2.x) + v2_sq * (v1.x - v3.x) + v3_sq * (v2.x - v1.x)) / (2.0 * cp),
    );
    let r = c.xz().distance(v1.xz());
    (c + p1, r)
}

/// Cross product of `p1 -> p2` and `p1 -> p3` on the xz-plane.
#[inline]
fn vcross2(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> f32 {
    let u1 = p2.x - p1.x;
    let v1 = p2.z - p1.z;
    let u2 = p3.x - p1.x;
    let v2 = p3.z - p1.z;
    u1 * v2 - v1 * u2
}

fn dist_to_tri_mesh(p: Vec3A, verts: &[Vec3A], tris: &[([usize; 3], u8)]) -> Option<f32> {
    tris.iter()
        .filter_map(|([a, b, c], _)| dist_pt_tri(p, verts[*a], verts[*b], verts[*c]))
        .min_by(f32::total_cmp)
}

/// Vertical distance from point p to triangle defined by vertices a, b, and c.
/// Returns None if the point is outside the triangle on the xz-plane.
fn dist_pt_tri(p: Vec3A, a: Vec3A, b: Vec3A, c: Vec3A) -> Option<f32> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.xz().dot(v0.xz());
    let dot01 = v0.xz().dot(v1.xz());
    let dot02 = v0.xz().dot(v2.xz());
    let dot11 = v1.xz().dot(v1.xz());
    let dot12 = v1.xz().dot(v2.xz());

    // Compute barycentric coordinates
    let inv_denom = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    // If point lies inside the triangle, return interpolated y-coord.
    const EPS: f32 = 1.0e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a.y + v0.y * u + v1.y * v;
        Some((y - p.y).abs())
    } else {
        None
    }
}

#[inline]
fn jitter_x(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0x8da6_b343) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

#[inline]
fn jitter_z(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0xd816_3841) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

/// Squared distance of `p` to the polygon outline on the xz-plane, negative if `p` is inside.
fn dist_to_poly(polygon: &[Vec3A], p: Vec3A) -> f32 {
    let mut dmin = f32::MAX;
    let mut c = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let vi = polygon[i];
        let vj = polygon[j];
        if (vi.z > p.z) != (vj.z > p.z) && p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            c = !c;
        }
        dmin = dmin.min(distance_squared_between_point_and_line_vec2(
            p.xz(),
            (vj.xz(), vi.xz()),
        ));
        j = i;
    }
    if c { -dmin } else { dmin }
}

/// Find edges that lie on hull and mark them as such.
fn set_tri_flags(tris: &mut [([usize; 3], u8)], hull: &[usize]) {
    for ([a, b, c], flags) in tris {
        let edge_flag = |from: usize, to: usize, shift: u8| {
            if on_hull(from, to, hull) {
                DETAIL_EDGE_BOUNDARY << shift
            } else {
                0
            }
        };
        *flags = edge_flag(*a, *b, 0) | edge_flag(*b, *c, 2) | edge_flag(*c, *a, 4);
    }
}

fn on_hull(a: usize, b: usize, hull: &[usize]) -> bool {
    let nhull = hull.len();
    // All internal sampled points come after the hull so we can early out for those.
    if a >= nhull || b >= nhull {
        return false;
    }
    let mut j = nhull - 1;
    for i in 0..nhull {
        if a == hull[j] && b == hull[i] {
            return true;
        }
        j = i;
    }
    false
}

fn triangulate_hull(
    verts: &[Vec3A],
    hull: &[usize],
    nin: usize,
    tris: &mut Vec<([usize; 3], u8)>,
) {
    let nhull = hull.len();
    if nhull < 3 {
        return;
    }
    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;

    // Start from an ear with shortest perimeter.
    // This tends to favor well formed triangles as starting point.
    let mut dmin = f32::MAX;
    for i in 0..nhull {
        if hull[i] >= nin {
            // Ears are triangles with original vertices as middle vertex while others are actually line segments on edges
            continue;
        }
        let pi = prev(i, nhull);
        let ni = next(i, nhull);
        let pv = verts[hull[pi]].xz();
        let cv = verts[hull[i]].xz();
        let nv = verts[hull[ni]].xz();
        let d = pv.distance(cv) + cv.distance(nv) + nv.distance(pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    // Add first triangle
    tris.push(([hull[start], hull[left], hull[right]], 0));

    // Triangulate the polygon by moving left or right,
    // depending on which triangle has shorter perimeter.
    while next(left, nhull) != right {
        let nleft = next(left, nhull);
        let nright = prev(right, nhull);

        let cvleft = verts[hull[left]].xz();
        let nvleft = verts[hull[nleft]].xz();
        let cvright = verts[hull[right]].xz();
        let nvright = verts[hull[nright]].xz();
        let dleft = cvleft.distance(nvleft) + nvleft.distance(cvright);
        let dright = cvright.distance(nvright) + cvleft.distance(nvright);
        if dleft < dright {
            tris.push(([hull[left], hull[nleft], hull[right]], 0));
            left = nleft;
        } else {
            tris.push(([hull[left], hull[nright], hull[right]], 0));
            right = nright;
        }
    }
}

fn get_height(f: Vec3A, ics: f32, ch: f32, radius: i32, hp: &HeightPatch) -> u16 {
    let mut ix = (f.x * ics + 0.01).floor() as i32;
    let mut iz = (f.z * ics + 0.01).floor() as i32;
    ix = (ix - hp.xmin).min(hp.width - 1).max(0);
    iz = (iz - hp.zmin).min(hp.height - 1).max(0);
    let Some(mut h) = hp.get(ix, iz) else {
        return RC_UNSET_HEIGHT;
    };
    if h == RC_UNSET_HEIGHT {
        // Special case when data might be bad.
        // Walk adjacent cells in a spiral up to 'radius', and look
        // for a pixel which has a valid height.
        let mut x = 1;
        let mut z = 0;
        let mut dx = 1;
        let mut dz = 0;
        let max_size = radius * 2 + 1;
        let max_iter = max_size * max_size - 1;

        let mut next_ring_iter_start = 8;
        let mut next_ring_iters = 16;

        let mut dmin = f32::MAX;
        for i in 0..max_iter {
            if let Some(nh) = hp.get(ix + x, iz + z)
                && nh != RC_UNSET_HEIGHT
            {
                let d = (nh as f32 * ch - f.y).abs();
                if d < dmin {
                    h = nh;
                    dmin = d;
                }
            }
            // The search covers rings of cells around the center: 8 cells in the first ring,
            // 8 more in each ring after that. Once a ring yields a height, the search
            // stops before entering the next ring.
            if i + 1 == next_ring_iter_start {
                if h != RC_UNSET_HEIGHT {
                    break;
                }
                next_ring_iter_start += next_ring_iters;
                next_ring_iters += 8;
            }

            if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
                let tmp = dx;
                dx = -dz;
                dz = tmp;
            }
            x += dx;
            z += dz;
        }
    }
    h
}

/// Smallest width of the polygon, measured as the distance of the farthest vertex from each edge.
fn poly_min_extent(verts: &[Vec3A]) -> f32 {
    let nverts = verts.len();
    let mut min_dist = f32::MAX;
    for i in 0..nverts {
        let ni = next(i, nverts);
        let p1 = verts[i];
        let p2 = verts[ni];
        let mut max_edge_dist = 0.0_f32;
        for (j, vj) in verts.iter().enumerate() {
            if j == i || j == ni {
                continue;
            }
            let d = distance_squared_between_point_and_line_vec2(vj.xz(), (p1.xz(), p2.xz()));
            max_edge_dist = max_edge_dist.max(d);
        }
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist.sqrt()
}

/// Floor heights of the cells under a polygon, in voxel units relative to the polygon mesh.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct HeightPatch {
    data: Vec<u16>,
    xmin: i32,
    zmin: i32,
    width: i32,
    height: i32,
}

impl HeightPatch {
    fn reset(&mut self, xmin: i32, zmin: i32, width: i32, height: i32) {
        self.xmin = xmin;
        self.zmin = zmin;
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data
            .resize(width as usize * height as usize, RC_UNSET_HEIGHT);
    }

    /// Collects the heights under the polygon. Returns `None` if no seed span could be found.
    fn get_height_data(
        &mut self,
        chf: &CompactHeightfield,
        poly: &[u16],
        verts: &[U16Vec3],
        bs: i32,
        queue: &mut VecDeque<(i32, i32, usize)>,
        region: RegionId,
    ) -> Option<()> {
        // Reads to the compact heightfield are offset by border size (bs)
        // since border size offset is already removed from the polymesh vertices.
        queue.clear();
        self.data.fill(RC_UNSET_HEIGHT);

        let mut empty = true;

        // We cannot sample from this poly if it was created from polys
        // of different regions. If it was then it could potentially be overlapping
        // with polys of that region and the heights sampled here could be wrong.
        if region != RegionId::NONE {
            // Copy the height from the same region, and mark region borders
            // as seed points to fill the rest.
            for hz in 0..self.height {
                let z = self.zmin + hz + bs;
                for hx in 0..self.width {
                    let x = self.xmin + hx + bs;
                    let c = &chf.cells[(x + z * chf.width as i32) as usize];
                    for i in c.index_range() {
                        let s = &chf.spans[i];
                        if s.region != region {
                            continue;
                        }
                        // Store height
                        self.set(hx, hz, s.y);
                        empty = false;

                        // If any of the neighbours is not in same region,
                        // add the current location as flood fill start
                        let border = (0..4).any(|dir| {
                            s.con(dir).is_some_and(|con| {
                                let (_, _, ai) = chf.con_indices(x, z, dir, con);
                                chf.spans[ai].region != region
                            })
                        });
                        if border {
                            queue.push_back((x, z, i));
                        }
                        break;
                    }
                }
            }
        }
        // if the polygon does not contain any points from the current region (rare, but happens)
        // or if it could potentially be overlapping polygons of the same region,
        // then use the center as the seed point.
        if empty {
            self.seed_with_poly_center(chf, poly, verts, bs, queue)?;
        }

        // We assume the seed is centered in the polygon, so a BFS to collect
        // height data will ensure we do not move onto overlapping polygons and
        // sample wrong heights.
        while let Some((cx, cz, ci)) = queue.pop_front() {
            let cs = &chf.spans[ci];
            for dir in 0..4 {
                let Some(con) = cs.con(dir) else {
                    continue;
                };
                let (ax, az, ai) = chf.con_indices(cx, cz, dir, con);
                let hx = ax - self.xmin - bs;
                let hz = az - self.zmin - bs;
                if hx < 0 || hz < 0 || hx >= self.width || hz >= self.height {
                    continue;
                }
                if self.get(hx, hz) != Some(RC_UNSET_HEIGHT) {
                    continue;
                }
                self.set(hx, hz, chf.spans[ai].y);
                queue.push_back((ax, az, ai));
            }
        }
        Some(())
    }

    /// Walks from the span closest to a polygon vertex towards the polygon center
    /// and seeds `queue` with the span reached there.
    fn seed_with_poly_center(
        &mut self,
        chf: &CompactHeightfield,
        poly: &[u16],
        verts: &[U16Vec3],
        bs: i32,
        queue: &mut VecDeque<(i32, i32, usize)>,
    ) -> Option<()> {
        const OFFSET: [(i32, i32); 9] = [
            (0, 0),
            (-1, -1),
            (0, -1),
            (1, -1),
            (1, 0),
            (1, 1),
            (0, 1),
            (-1, 1),
            (-1, 0),
        ];

        // Find cell closest to a poly vertex
        let mut start = None;
        let mut dmin = RC_UNSET_HEIGHT as i32;
        'vertices: for v in poly.iter().map(|p| verts[*p as usize]) {
            for (ox, oz) in OFFSET {
                if dmin <= 0 {
                    break 'vertices;
                }
                let ax = v.x as i32 + ox;
                let ay = v.y as i32;
                let az = v.z as i32 + oz;
                if ax < self.xmin
                    || ax >= self.xmin + self.width
                    || az < self.zmin
                    || az >= self.zmin + self.height
                {
                    continue;
                }
                let c = &chf.cells[((ax + bs) + (az + bs) * chf.width as i32) as usize];
                for i in c.index_range() {
                    let d = (ay - chf.spans[i].y as i32).abs();
                    if d < dmin {
                        start = Some((ax, az, i));
                        dmin = d;
                    }
                    if dmin <= 0 {
                        break;
                    }
                }
            }
        }
        let start = start?;

        // Find center of the polygon
        let (sum_x, sum_z) = poly.iter().fold((0, 0), |(x, z), p| {
            let v = verts[*p as usize];
            (x + v.x as i32, z + v.z as i32)
        });
        let pcx = sum_x / poly.len() as i32;
        let pcz = sum_z / poly.len() as i32;

        // Use the queue as a stack for DFS
        let mut stack = vec![start];
        let mut dirs = [0_u8, 1, 2, 3];
        // 0 marks unvisited cells during the walk.
        self.data.fill(0);
        // DFS to move to the center. Note that we need a DFS here and can not just move
        // directly towards the center without recording intermediate nodes, even though the polygons
        // are convex. In very rare we can get stuck due to contour simplification if we do not
        // record nodes.
        let mut current = start;
        loop {
            let Some(top) = stack.pop() else {
                tracing::warn!("Walk towards polygon center failed to reach center");
                break;
            };
            current = top;
            let (cx, cz, ci) = current;
            if cx == pcx && cz == pcz {
                break;
            }

            // If we are already at the correct X-position, prefer direction
            // directly towards the center in the Z-axis; otherwise prefer
            // direction in the X-axis
            let direct_dir = if cx == pcx {
                dir_for_offset(0, if pcz > cz { 1 } else { -1 })
            } else {
                dir_for_offset(if pcx > cx { 1 } else { -1 }, 0)
            } as usize;

            // Push the direct dir last so we start with this on next iteration
            dirs.swap(direct_dir, 3);

            let cs = &chf.spans[ci];
            for dir in dirs {
                let Some(con) = cs.con(dir) else {
                    continue;
                };
                let new_x = cx + dir_offset_x(dir) as i32;
                let new_z = cz + dir_offset_z(dir) as i32;

                let hpx = new_x - self.xmin;
                let hpz = new_z - self.zmin;
                if hpx < 0 || hpx >= self.width || hpz < 0 || hpz >= self.height {
                    continue;
                }
                if self.get(hpx, hpz) != Some(0) {
                    continue;
                }
                self.set(hpx, hpz, 1);
                let new_index = chf.cells[((new_x + bs) + (new_z + bs) * chf.width as i32) as usize]
                    .index() as usize
                    + con as usize;
                stack.push((new_x, new_z, new_index));
            }
            dirs.swap(direct_dir, 3);
        }

        let (cx, cz, ci) = current;
        // Height data seeds are given in coordinates with borders
        queue.clear();
        queue.push_back((cx + bs, cz + bs, ci));
        self.data.fill(RC_UNSET_HEIGHT);
        self.set(cx - self.xmin, cz - self.zmin, chf.spans[ci].y);
        Some(())
    }

    #[inline]
    fn get(&self, x: i32, z: i32) -> Option<u16> {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return None;
        }
        self.data.get((x + z * self.width) as usize).copied()
    }

    #[inline]
    fn set(&mut self, x: i32, z: i32, value: u16) {
        if let Some(cell) = self.data.get_mut((x + z * self.width) as usize) {
            *cell = value;
        }
    }
}
