use glam::{IVec2, U16Vec3};

use crate::{
    Aabb3d, AreaType, CompactHeightfield, RegionId,
    math::{
        dir_offset_x, dir_offset_z, distance_squared_between_point_and_line_ivec2, intersect, left,
        left_on,
    },
};

/// Upper bound on the steps taken while tracing a single contour.
const MAX_CONTOUR_WALK_ITERATIONS: usize = 40_000;

impl CompactHeightfield {
    /// Builds a contour set from the region outlines in the provided compact heightfield.
    ///
    /// The raw contours will match the region outlines exactly. The `max_error` and `max_edge_len`
    /// parameters control how closely the simplified contours will match the raw contours.
    ///
    /// Simplified contours are generated such that the vertices for portals between areas match up.
    /// (They are considered mandatory vertices.)
    ///
    /// Setting `max_edge_len` to zero will disable the edge length feature.
    ///
    /// Holes are merged into the outline of their region. The hole contours stay in the set
    /// without any vertices.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> ContourSet {
        let w = self.width;
        let h = self.height;
        let border_size = self.border_size;

        let mut aabb = self.aabb;
        if border_size > 0 {
            // If the heightfield was build with bordersize, remove the offset.
            let pad = border_size as f32 * self.cell_size;
            aabb.min.x += pad;
            aabb.min.z += pad;
            aabb.max.x -= pad;
            aabb.max.z -= pad;
        }
        let mut contour_set = ContourSet {
            contours: Vec::with_capacity((self.max_region.bits() as usize).max(8)),
            aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: w.saturating_sub(border_size * 2),
            height: h.saturating_sub(border_size * 2),
            border_size,
            max_error,
        };

        let mut flags = vec![0_u8; self.spans.len()];

        // Mark boundaries.
        for z in 0..h {
            for x in 0..w {
                for i in self.cell_at(x, z).index_range() {
                    let region = self.spans[i].region;
                    if region == RegionId::NONE || region.is_border() {
                        flags[i] = 0;
                        continue;
                    }
                    let mut connected = 0;
                    for dir in 0..4 {
                        let neighbor_region = self
                            .neighbor_index(x as i32, z as i32, i, dir)
                            .map(|ai| self.spans[ai].region);
                        if neighbor_region == Some(region) {
                            connected |= 1 << dir;
                        }
                    }
                    // Inverse, mark non connected edges.
                    flags[i] = connected ^ 0xf;
                }
            }
        }

        let mut raw = Vec::with_capacity(256);
        for z in 0..h {
            for x in 0..w {
                for i in self.cell_at(x, z).index_range() {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let region = self.spans[i].region;
                    if region == RegionId::NONE || region.is_border() {
                        continue;
                    }
                    let area = self.areas[i];

                    raw.clear();
                    self.trace_contour(x as i32, z as i32, i, &mut flags, &mut raw);
                    let mut simplified =
                        simplify_contour(&raw, max_error, max_edge_len, build_flags);
                    remove_degenerate_segments(&mut simplified);

                    if simplified.len() < 3 {
                        tracing::warn!(
                            region = region.bits(),
                            vertices = simplified.len(),
                            "Discarding degenerate contour"
                        );
                        continue;
                    }
                    let remove_border = |(vertex, flags): &(U16Vec3, RegionVertexId)| {
                        let offset = U16Vec3::new(border_size, 0, border_size);
                        (vertex.saturating_sub(offset), *flags)
                    };
                    contour_set.contours.push(Contour {
                        vertices: simplified.iter().map(remove_border).collect(),
                        raw_vertices: raw.iter().map(remove_border).collect(),
                        region,
                        area,
                    });
                }
            }
        }

        merge_holes(&mut contour_set.contours);
        tracing::debug!(contours = contour_set.contours.len(), "Built contours");
        contour_set
    }

    /// Follows the region boundary clockwise starting at span `i`, clearing the visited edges in `flags`.
    fn trace_contour(
        &self,
        mut x: i32,
        mut z: i32,
        mut i: usize,
        flags: &mut [u8],
        points: &mut Vec<(U16Vec3, RegionVertexId)>,
    ) {
        // Choose the first non-connected edge
        let mut dir = 0_u8;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        for _ in 1..MAX_CONTOUR_WALK_ITERATIONS {
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner
                let (y, is_border_vertex) = self.corner_height(x, z, i, dir);
                let (px, pz) = match dir {
                    0 => (x, z + 1),
                    1 => (x + 1, z + 1),
                    2 => (x + 1, z),
                    _ => (x, z),
                };
                let mut region = RegionVertexId::NONE;
                if let Some(ai) = self.neighbor_index(x, z, i, dir) {
                    region = RegionVertexId::from(self.spans[ai].region);
                    if area != self.areas[ai] {
                        region |= RegionVertexId::AREA_BORDER;
                    }
                }
                if is_border_vertex {
                    region |= RegionVertexId::BORDER_VERTEX;
                }
                points.push((U16Vec3::new(px as u16, y, pz as u16), region));

                // Remove visited edges
                flags[i] &= !(1 << dir);
                // Rotate CW
                dir = (dir + 1) & 0x3;
            } else {
                let Some(ni) = self.neighbor_index(x, z, i, dir) else {
                    // Should not happen.
                    return;
                };
                x += dir_offset_x(dir) as i32;
                z += dir_offset_z(dir) as i32;
                i = ni;
                // Rotate CCW
                dir = (dir + 3) & 0x3;
            }

            if start_i == i && start_dir == dir {
                break;
            }
        }
    }

    /// Returns the height of the corner between `dir` and the next direction clockwise,
    /// and whether the corner is a tile border vertex.
    fn corner_height(&self, x: i32, z: i32, i: usize, dir: u8) -> (u16, bool) {
        let span = &self.spans[i];
        let mut height = span.y;
        let dir_p = (dir + 1) & 0x3;

        // Combine region and area codes in order to prevent
        // border vertices which are in between two areas to be removed.
        let region_and_area =
            |i: usize| self.spans[i].region.bits() as u32 | ((self.areas[i].0 as u32) << 16);
        let mut regs = [0_u32; 4];
        regs[0] = region_and_area(i);

        if let Some(con) = span.con(dir) {
            let (ax, az, ai) = self.con_indices(x, z, dir, con);
            height = height.max(self.spans[ai].y);
            regs[1] = region_and_area(ai);
            if let Some(ai2) = self.neighbor_index(ax, az, ai, dir_p) {
                height = height.max(self.spans[ai2].y);
                regs[2] = region_and_area(ai2);
            }
        }
        if let Some(con) = span.con(dir_p) {
            let (ax, az, ai) = self.con_indices(x, z, dir_p, con);
            height = height.max(self.spans[ai].y);
            regs[3] = region_and_area(ai);
            if let Some(ai2) = self.neighbor_index(ax, az, ai, dir) {
                height = height.max(self.spans[ai2].y);
                regs[2] = region_and_area(ai2);
            }
        }

        // Check if the vertex is special edge vertex, these vertices will be removed later.
        let border = RegionId::BORDER_REGION.bits() as u32;
        let is_border_vertex = (0..4).any(|j| {
            let a = regs[j];
            let b = regs[(j + 1) & 0x3];
            let c = regs[(j + 2) & 0x3];
            let d = regs[(j + 3) & 0x3];

            // The vertex is a border vertex there are two same exterior cells in a row,
            // followed by two interior cells and none of the regions are out of bounds.
            let two_same_exts = (a & b & border) != 0 && a == b;
            let two_ints = ((c | d) & border) == 0;
            let ints_same_area = (c >> 16) == (d >> 16);
            let no_zeros = a != 0 && b != 0 && c != 0 && d != 0;
            two_same_exts && two_ints && ints_same_area && no_zeros
        });
        (height, is_border_vertex)
    }
}

#[inline]
fn xz(vertex: U16Vec3) -> IVec2 {
    IVec2::new(vertex.x as i32, vertex.z as i32)
}

/// Whether `b` comes after `a` in lexicographic (x, then z) order.
#[inline]
fn is_lexicographically_after(a: IVec2, b: IVec2) -> bool {
    b.x > a.x || (b.x == a.x && b.y > a.y)
}

fn simplify_contour(
    points: &[(U16Vec3, RegionVertexId)],
    max_error: f32,
    max_edge_len: u16,
    flags: BuildContoursFlags,
) -> Vec<(U16Vec3, RegionVertexId)> {
    let pn = points.len();
    if pn == 0 {
        return Vec::new();
    }
    // Vertex and index of the raw point it was taken from.
    let mut simplified: Vec<(U16Vec3, usize)> = Vec::with_capacity(64);

    // Add initial points.
    let has_connections = points
        .iter()
        .any(|(_, region)| region.intersects(RegionVertexId::REGION_MASK));
    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        for (i, (point, region)) in points.iter().enumerate() {
            let next = points[(i + 1) % pn].1;
            let different_regs =
                (*region & RegionVertexId::REGION_MASK) != (next & RegionVertexId::REGION_MASK);
            let area_borders = region.contains(RegionVertexId::AREA_BORDER)
                != next.contains(RegionVertexId::AREA_BORDER);
            if different_regs || area_borders {
                simplified.push((*point, i));
            }
        }
    }

    if simplified.is_empty() {
        // If there is no connections at all,
        // create some initial points for the simplification process.
        // Find lower-left and upper-right vertices of the contour.
        let mut lower_left = (points[0].0, 0);
        let mut upper_right = (points[0].0, 0);
        for (i, (point, _)) in points.iter().enumerate() {
            let (ll, ur) = (lower_left.0, upper_right.0);
            if point.x < ll.x || (point.x == ll.x && point.z < ll.z) {
                lower_left = (*point, i);
            }
            if point.x > ur.x || (point.x == ur.x && point.z > ur.z) {
                upper_right = (*point, i);
            }
        }
        simplified.push(lower_left);
        simplified.push(upper_right);
    }

    // Add points until all raw points are within
    // error tolerance to the simplified shape.
    let max_error_sq = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();
        let (a, ai) = simplified[i];
        let (b, bi) = simplified[ii];
        let (mut a, mut b) = (xz(a), xz(b));

        // Traverse the segment in lexilogical order so that the
        // max deviation is calculated similarly when traversing
        // opposite segments.
        let (mut ci, c_inc, end_i) = if is_lexicographically_after(a, b) {
            ((ai + 1) % pn, 1, bi)
        } else {
            std::mem::swap(&mut a, &mut b);
            ((bi + pn - 1) % pn, pn - 1, ai)
        };

        // Find maximum deviation from the segment.
        let mut max_d = 0.0;
        let mut max_i = None;
        // Tessellate only outer edges or edges between areas.
        let region = points[ci].1;
        if !region.intersects(RegionVertexId::REGION_MASK)
            || region.contains(RegionVertexId::AREA_BORDER)
        {
            while ci != end_i {
                let d = distance_squared_between_point_and_line_ivec2(xz(points[ci].0), (a, b));
                if d > max_d {
                    max_d = d;
                    max_i = Some(ci);
                }
                ci = (ci + c_inc) % pn;
            }
        }

        // If the max deviation is larger than accepted error,
        // add new point, else continue to next segment.
        match max_i {
            Some(max_i) if max_d > max_error_sq => {
                simplified.insert(i + 1, (points[max_i].0, max_i));
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    let tessellate_any = BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES
        | BuildContoursFlags::TESSELLATE_AREA_EDGES;
    if max_edge_len > 0 && flags.intersects(tessellate_any) {
        let max_edge_len_sq = (max_edge_len as i32).pow(2);
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let (a, ai) = simplified[i];
            let (b, bi) = simplified[ii];
            let (a, b) = (xz(a), xz(b));

            let ci = (ai + 1) % pn;
            let region = points[ci].1;
            // Tessellate only outer edges or edges between areas.
            let wall_edge = flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES)
                && !region.intersects(RegionVertexId::REGION_MASK);
            let area_edge = flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES)
                && region.contains(RegionVertexId::AREA_BORDER);

            let mut max_i = None;
            if (wall_edge || area_edge) && (b - a).length_squared() > max_edge_len_sq {
                // Round based on the segments in lexilogical order so that the
                // max tesselation is consistent regardless in which direction
                // segments are traversed.
                let n = if bi < ai { bi + pn - ai } else { bi - ai };
                if n > 1 {
                    max_i = Some(if is_lexicographically_after(a, b) {
                        (ai + n / 2) % pn
                    } else {
                        (ai + n.div_ceil(2)) % pn
                    });
                }
            }

            match max_i {
                Some(max_i) => simplified.insert(i + 1, (points[max_i].0, max_i)),
                None => i += 1,
            }
        }
    }

    simplified
        .into_iter()
        .map(|(vertex, raw_index)| {
            // The edge vertex flag is take from the current raw point,
            // and the neighbour region is take from the next raw point.
            let next = points[(raw_index + 1) % pn].1;
            let current = points[raw_index].1;
            let region = (next & (RegionVertexId::REGION_MASK | RegionVertexId::AREA_BORDER))
                | (current & RegionVertexId::BORDER_VERTEX);
            (vertex, region)
        })
        .collect()
}

/// Removes adjacent vertices which are equal on the xz-plane, or else the triangulator will get confused.
fn remove_degenerate_segments(simplified: &mut Vec<(U16Vec3, RegionVertexId)>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = (i + 1) % simplified.len();
        if xz(simplified[i].0) == xz(simplified[ni].0) {
            simplified.remove(i);
        }
        i += 1;
    }
}

/// Twice the signed area of the contour on the xz-plane, rounded. Negative for holes.
fn signed_area(vertices: &[(U16Vec3, RegionVertexId)]) -> i32 {
    let n = vertices.len();
    let mut area = 0;
    for i in 0..n {
        let vi = xz(vertices[i].0);
        let vj = xz(vertices[(i + n - 1) % n].0);
        area += vi.x * vj.y - vj.x * vi.y;
    }
    (area + 1) / 2
}

#[derive(Debug, Clone, Default)]
struct ContourRegion {
    outline: Option<usize>,
    holes: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
struct ContourHole {
    contour: usize,
    min: IVec2,
    leftmost: usize,
}

fn merge_holes(contours: &mut [Contour]) {
    // Calculate winding of all polygons.
    let is_hole: Vec<bool> = contours
        .iter()
        .map(|contour| signed_area(&contour.vertices) < 0)
        .collect();
    if !is_hole.contains(&true) {
        return;
    }

    // Collect outline contour and holes contours per region.
    // We assume that there is one outline and multiple holes.
    let region_count = contours
        .iter()
        .map(|contour| contour.region.bits() as usize)
        .max()
        .unwrap_or(0)
        + 1;
    let mut regions = vec![ContourRegion::default(); region_count];
    for (i, contour) in contours.iter().enumerate() {
        let region = &mut regions[contour.region.bits() as usize];
        if is_hole[i] {
            region.holes.push(i);
        } else {
            if region.outline.is_some() {
                tracing::warn!(
                    region = contour.region.bits(),
                    "Multiple outlines for region"
                );
            }
            region.outline = Some(i);
        }
    }

    // Finally merge each regions holes into the outline.
    for (region_id, region) in regions.iter().enumerate() {
        if region.holes.is_empty() {
            continue;
        }
        match region.outline {
            Some(outline) => merge_region_holes(contours, outline, &region.holes),
            None => {
                // The region does not have an outline.
                // This can happen if the contour becomes self-overlapping
                // because of too aggressive simplification settings.
                tracing::warn!(
                    region = region_id,
                    "Bad outline for region, contour simplification is likely too aggressive"
                );
            }
        }
    }
}

fn merge_region_holes(contours: &mut [Contour], outline: usize, holes: &[usize]) {
    // Sort holes from left to right.
    let mut holes: Vec<ContourHole> = holes
        .iter()
        .map(|&contour| {
            let (min, leftmost) = leftmost_vertex(&contours[contour].vertices);
            ContourHole {
                contour,
                min,
                leftmost,
            }
        })
        .collect();
    holes.sort_by_key(|hole| (hole.min.x, hole.min.y));

    let mut diagonals: Vec<(usize, i32)> = Vec::new();
    // Merge holes into the outline one by one.
    for (i, hole) in holes.iter().enumerate() {
        let hole_len = contours[hole.contour].vertices.len();
        let mut best_vertex = hole.leftmost;
        let mut index = None;
        for _ in 0..hole_len {
            // Find potential diagonals.
            // The 'best' vertex must be in the cone described by 3 cosequtive vertices of the outline.
            // ..o j-1
            //   |
            //   |   * best
            //   |
            // j o-----o j+1
            //         :
            let corner = xz(contours[hole.contour].vertices[best_vertex].0);
            let outline_vertices = &contours[outline].vertices;
            diagonals.clear();
            for (j, (vertex, _)) in outline_vertices.iter().enumerate() {
                if in_cone(j, outline_vertices, corner) {
                    diagonals.push((j, (xz(*vertex) - corner).length_squared()));
                }
            }
            // Sort potential diagonals by distance, we want to make the connection as short as possible.
            diagonals.sort_by_key(|(_, distance)| *distance);

            // Find a diagonal that is not intersecting the outline not the remaining holes.
            index = diagonals.iter().map(|(j, _)| *j).find(|&j| {
                let point = xz(outline_vertices[j].0);
                !intersect_segment_contour(point, corner, Some(j), outline_vertices)
                    && holes[i..].iter().all(|other| {
                        !intersect_segment_contour(
                            point,
                            corner,
                            None,
                            &contours[other.contour].vertices,
                        )
                    })
            });
            // If found non-intersecting diagonal, stop looking.
            if index.is_some() {
                break;
            }
            // All the potential diagonals for the current vertex were intersecting, try next vertex.
            best_vertex = (best_vertex + 1) % hole_len;
        }

        let Some(index) = index else {
            tracing::warn!(
                region = contours[outline].region.bits(),
                hole = hole.contour,
                "Failed to find merge points for hole"
            );
            continue;
        };
        merge_contours(contours, outline, hole.contour, index, best_vertex);
    }
}

/// Returns the lowest (x, z) vertex and its index.
fn leftmost_vertex(vertices: &[(U16Vec3, RegionVertexId)]) -> (IVec2, usize) {
    let mut min = vertices.first().map(|(v, _)| xz(*v)).unwrap_or_default();
    let mut leftmost = 0;
    for (i, (vertex, _)) in vertices.iter().enumerate().skip(1) {
        let v = xz(*vertex);
        if v.x < min.x || (v.x == min.x && v.y < min.y) {
            min = v;
            leftmost = i;
        }
    }
    (min, leftmost)
}

/// Whether `point` lies in the cone spanned by vertex `i` of the polygon and its two neighbors.
fn in_cone(i: usize, vertices: &[(U16Vec3, RegionVertexId)], point: IVec2) -> bool {
    let n = vertices.len();
    let pi = xz(vertices[i].0);
    let pi1 = xz(vertices[(i + 1) % n].0);
    let pin1 = xz(vertices[(i + n - 1) % n].0);

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, point, pin1) && left(point, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, point, pi1) && left_on(point, pi, pin1))
}

/// Whether the segment `d0, d1` crosses any edge of the contour, ignoring the edges incident to vertex `skip`.
fn intersect_segment_contour(
    d0: IVec2,
    d1: IVec2,
    skip: Option<usize>,
    vertices: &[(U16Vec3, RegionVertexId)],
) -> bool {
    let n = vertices.len();
    (0..n).any(|k| {
        let k1 = (k + 1) % n;
        // Skip edges incident to i.
        if skip == Some(k) || skip == Some(k1) {
            return false;
        }
        let p0 = xz(vertices[k].0);
        let p1 = xz(vertices[k1].0);
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            return false;
        }
        intersect(d0, d1, p0, p1)
    })
}

/// Splices the hole into the outline at the diagonal `outline_vertex, hole_vertex`.
/// The hole is left without vertices.
fn merge_contours(
    contours: &mut [Contour],
    outline: usize,
    hole: usize,
    outline_vertex: usize,
    hole_vertex: usize,
) {
    let hole_vertices = std::mem::take(&mut contours[hole].vertices);
    let outline_vertices = &mut contours[outline].vertices;
    let mut merged = Vec::with_capacity(outline_vertices.len() + hole_vertices.len() + 2);

    // Copy contour A.
    for i in 0..=outline_vertices.len() {
        merged.push(outline_vertices[(outline_vertex + i) % outline_vertices.len()]);
    }
    // Copy contour B
    for i in 0..=hole_vertices.len() {
        merged.push(hole_vertices[(hole_vertex + i) % hole_vertices.len()]);
    }
    *outline_vertices = merged;
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    /// An array of the contours in the set.
    pub contours: Vec<Contour>,
    /// The AABB in world space
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u16,
    /// The height of the set. (Along the z-axis in cell units.)
    pub height: u16,
    /// The AABB border size used to generate the source data from which the contours were derived.
    pub border_size: u16,
    /// The max edge error that this contour set was simplified with.
    pub max_error: f32,
}

bitflags::bitflags! {
    /// Region id of a contour vertex combined with the vertex flags.
    ///
    /// For simplified vertices, the region is the one on the other side of the edge
    /// starting at the vertex.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct RegionVertexId: u32 {
        /// No region across the edge.
        const NONE = 0;

        /// Applied to the region id field of contour vertices in order to extract the region id.
        /// The region id field of a vertex may have several flags applied to it.  So the
        /// fields value can't be used directly.
        const REGION_MASK = 0xffff;

        /// Border vertex flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// a tile border. If a contour vertex's region ID has this bit set, the
        /// vertex will later be removed in order to match the segments and vertices
        /// at tile boundaries.
        /// (Used during the build process.)
        const BORDER_VERTEX = 0x10_000;

        /// Area border flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// the border of an area.
        /// (Used during the region and contour build process.)
        const AREA_BORDER = 0x20_000;
    }
}

impl From<RegionId> for RegionVertexId {
    fn from(region_id: RegionId) -> Self {
        RegionVertexId::from_bits_retain(region_id.bits() as u32)
    }
}

impl From<RegionVertexId> for RegionId {
    fn from(region_vertex_id: RegionVertexId) -> Self {
        let bits = region_vertex_id & RegionVertexId::REGION_MASK;
        RegionId::from_bits_retain(bits.bits() as u16)
    }
}

/// Represents a simple, non-overlapping contour in field space.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// Simplified contour vertices and the region across the edge that starts at each vertex.
    pub vertices: Vec<(U16Vec3, RegionVertexId)>,
    /// Raw contour vertices and connection data.
    pub raw_vertices: Vec<(U16Vec3, RegionVertexId)>,
    /// Region ID of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

bitflags::bitflags! {
    /// Contour build flags used in [`CompactHeightfield::build_contours`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(transparent)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct BuildContoursFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use crate::distance_field::tests::flat_field;

    use super::*;

    fn corners(contour: &Contour) -> Vec<(u16, u16)> {
        let mut corners: Vec<_> = contour.vertices.iter().map(|(v, _)| (v.x, v.z)).collect();
        corners.sort();
        corners
    }

    #[test]
    fn square_floor_simplifies_to_its_corners() {
        let mut compact = flat_field(6).into_compact(2, 1).unwrap();
        compact.build_regions_monotone(0, 0, 0).unwrap();
        let contours = compact.build_contours(1.3, 0, BuildContoursFlags::DEFAULT);

        assert_eq!(contours.contours.len(), 1);
        let contour = &contours.contours[0];
        assert_eq!(contour.region, RegionId::from(1));
        assert_eq!(contour.area, AreaType(1));
        assert_eq!(corners(contour), vec![(0, 0), (0, 6), (6, 0), (6, 6)]);
        assert!(contour.vertices.iter().all(|(v, _)| v.y == 2));
        assert_eq!(contour.raw_vertices.len(), 24);
        assert!(signed_area(&contour.vertices) > 0);
    }

    #[test]
    fn portals_reference_the_neighbor_region() {
        let mut compact = flat_field(6).into_compact(2, 1).unwrap();
        for z in 0..6 {
            for x in 3..6 {
                let i = compact.cell_at(x, z).index() as usize;
                compact.areas[i] = AreaType(2);
            }
        }
        compact.build_regions_monotone(0, 0, 0).unwrap();
        let contours = compact.build_contours(1.3, 0, BuildContoursFlags::DEFAULT);
        assert_eq!(contours.contours.len(), 2);

        let (a, b) = (&contours.contours[0], &contours.contours[1]);
        assert_ne!(a.region, b.region);
        let portal = a
            .vertices
            .iter()
            .find(|(_, region)| RegionId::from(*region) == b.region)
            .expect("contour should have a portal to its neighbor");
        assert!(portal.1.contains(RegionVertexId::AREA_BORDER));
    }

    #[test]
    fn holes_are_merged_into_the_outline() {
        let mut compact = flat_field(7).into_compact(2, 1).unwrap();
        for z in 2..5 {
            for x in 2..5 {
                let i = compact.cell_at(x, z).index() as usize;
                compact.areas[i] = AreaType::NOT_WALKABLE;
            }
        }
        compact.build_layer_regions(0, 0).unwrap();
        let contours = compact.build_contours(1.3, 0, BuildContoursFlags::DEFAULT);

        assert_eq!(contours.contours.len(), 2);
        let merged: Vec<_> = contours
            .contours
            .iter()
            .filter(|contour| !contour.vertices.is_empty())
            .collect();
        assert_eq!(merged.len(), 1);
        // Outline and hole, each closed by a duplicated vertex at the bridge.
        assert_eq!(merged[0].vertices.len(), 10);
    }

    #[test]
    fn long_wall_edges_are_split() {
        let mut compact = flat_field(10).into_compact(2, 1).unwrap();
        compact.build_regions_monotone(0, 0, 0).unwrap();
        let contours = compact.build_contours(1.3, 3, BuildContoursFlags::DEFAULT);
        let vertices = &contours.contours[0].vertices;
        assert!(vertices.len() > 4);
        for (i, (a, _)) in vertices.iter().enumerate() {
            let (b, _) = vertices[(i + 1) % vertices.len()];
            assert!((xz(b) - xz(*a)).length_squared() <= 9);
        }

        let untessellated = compact.build_contours(1.3, 3, BuildContoursFlags::empty());
        assert_eq!(untessellated.contours[0].vertices.len(), 4);
    }

    #[test]
    fn border_is_removed_from_the_contour_space() {
        let mut compact = flat_field(8).into_compact(2, 1).unwrap();
        compact.build_regions_monotone(2, 0, 0).unwrap();
        let contours = compact.build_contours(1.3, 0, BuildContoursFlags::DEFAULT);

        assert_eq!(contours.width, 4);
        assert_eq!(contours.height, 4);
        assert_eq!(contours.border_size, 2);
        assert_eq!(contours.aabb.min.x, 2.0);
        assert_eq!(contours.aabb.max.z, 6.0);
        assert_eq!(contours.contours.len(), 1);
        assert_eq!(corners(&contours.contours[0]), vec![(0, 0), (0, 4), (4, 0), (4, 4)]);
    }

    #[test]
    fn degenerate_segments_are_removed() {
        let mut vertices = vec![
            (U16Vec3::new(0, 0, 0), RegionVertexId::NONE),
            (U16Vec3::new(0, 3, 0), RegionVertexId::NONE),
            (U16Vec3::new(4, 0, 0), RegionVertexId::NONE),
            (U16Vec3::new(4, 0, 4), RegionVertexId::NONE),
        ];
        remove_degenerate_segments(&mut vertices);
        assert_eq!(vertices.len(), 3);
    }
}
