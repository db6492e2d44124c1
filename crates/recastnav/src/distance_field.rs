//! Distance of every span to the closest boundary of its area.
//!
//! Watershed partitioning floods regions from the peaks of this field, so it must be built
//! before [`CompactHeightfield::build_regions`]. The monotone and layer partitioners don't need it.

use crate::CompactHeightfield;

impl CompactHeightfield {
    /// Prepare for region partitioning, by calculating distance field along the walkable surface.
    ///
    /// Stores the blurred distances in [`CompactHeightfield::dist`] and the largest
    /// unblurred distance in [`CompactHeightfield::max_distance`].
    pub fn build_distance_field(&mut self) {
        let mut src = vec![u16::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let area = self.areas[i];
                    let neighbor_count = (0..4)
                        .filter_map(|dir| self.neighbor_index(x as i32, z as i32, i, dir))
                        .filter(|ai| self.areas[*ai] == area)
                        .count();
                    if neighbor_count != 4 {
                        src[i] = 0;
                    }
                }
            }
        }

        self.chamfer_distance(&mut src);
        self.max_distance = src.iter().copied().max().unwrap_or(0);

        let mut dst = vec![0_u16; self.spans.len()];
        self.box_blur(1, &src, &mut dst);
        self.dist = dst;
        tracing::trace!(max_distance = self.max_distance, "Built distance field");
    }

    /// Runs the two-pass chamfer transform on `dist`, which must hold 0 on boundary spans.
    /// Orthogonal steps cost 2, diagonal steps cost 3.
    pub(crate) fn chamfer_distance(&self, dist: &mut [u16]) {
        let relax = |dist: &mut [u16], i: usize, neighbor: usize, cost: u16| {
            let candidate = dist[neighbor].saturating_add(cost);
            if candidate < dist[i] {
                dist[i] = candidate;
            }
        };

        // Pass 1
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                for i in self.cell_at(x as u16, z as u16).index_range() {
                    // (-1,0)
                    if let Some(con) = self.spans[i].con(0) {
                        let (ax, az, ai) = self.con_indices(x, z, 0, con);
                        relax(dist, i, ai, 2);
                        // (-1,-1)
                        if let Some(aai) = self.neighbor_index(ax, az, ai, 3) {
                            relax(dist, i, aai, 3);
                        }
                    }
                    // (0,-1)
                    if let Some(con) = self.spans[i].con(3) {
                        let (ax, az, ai) = self.con_indices(x, z, 3, con);
                        relax(dist, i, ai, 2);
                        // (1,-1)
                        if let Some(aai) = self.neighbor_index(ax, az, ai, 2) {
                            relax(dist, i, aai, 3);
                        }
                    }
                }
            }
        }

        // Pass 2
        for z in (0..self.height as i32).rev() {
            for x in (0..self.width as i32).rev() {
                for i in self.cell_at(x as u16, z as u16).index_range() {
                    // (1,0)
                    if let Some(con) = self.spans[i].con(2) {
                        let (ax, az, ai) = self.con_indices(x, z, 2, con);
                        relax(dist, i, ai, 2);
                        // (1,1)
                        if let Some(aai) = self.neighbor_index(ax, az, ai, 1) {
                            relax(dist, i, aai, 3);
                        }
                    }
                    // (0,1)
                    if let Some(con) = self.spans[i].con(1) {
                        let (ax, az, ai) = self.con_indices(x, z, 1, con);
                        relax(dist, i, ai, 2);
                        // (-1,1)
                        if let Some(aai) = self.neighbor_index(ax, az, ai, 0) {
                            relax(dist, i, aai, 3);
                        }
                    }
                }
            }
        }
    }

    /// Averages each span's distance with its 8 neighbors.
    /// Spans at or below `threshold * 2` keep their distance.
    fn box_blur(&self, threshold: u16, src: &[u16], dst: &mut [u16]) {
        let threshold = threshold * 2;
        for z in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                for i in self.cell_at(x as u16, z as u16).index_range() {
                    let center = src[i] as u32;
                    if center <= threshold as u32 {
                        dst[i] = center as u16;
                        continue;
                    }

                    let mut d = center;
                    for dir in 0..4 {
                        let Some(con) = self.spans[i].con(dir) else {
                            d += center * 2;
                            continue;
                        };
                        let (ax, az, ai) = self.con_indices(x, z, dir, con);
                        d += src[ai] as u32;
                        let dir2 = (dir + 1) & 0x3;
                        match self.neighbor_index(ax, az, ai, dir2) {
                            Some(ai2) => d += src[ai2] as u32,
                            None => d += center,
                        }
                    }
                    dst[i] = ((d + 5) / 9) as u16;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use glam::Vec3;

    use crate::{Aabb3d, AreaType, HeightfieldBuilder, heightfield::Heightfield};

    /// A flat `size`x`size` walkable floor.
    pub(crate) fn flat_field(size: u16) -> Heightfield {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3::ZERO, Vec3::new(size as f32, 10.0, size as f32)),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        let triangles = [
            [
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, size as f32),
                Vec3::new(size as f32, 1.0, size as f32),
            ],
            [
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(size as f32, 1.0, size as f32),
                Vec3::new(size as f32, 1.0, 0.0),
            ],
        ];
        for triangle in triangles {
            heightfield
                .rasterize_triangle(triangle.map(Into::into), AreaType(1), 1)
                .unwrap();
        }
        heightfield
    }

    #[test]
    fn distance_grows_towards_the_center() {
        let mut compact = flat_field(7).into_compact(2, 1).unwrap();
        compact.build_distance_field();
        let dist_at = |x: u16, z: u16| compact.dist[compact.cell_at(x, z).index() as usize];

        assert_eq!(compact.dist.len(), 49);
        assert_eq!(dist_at(0, 0), 0);
        assert_eq!(dist_at(0, 3), 0);
        // Unblurred center distance is three orthogonal steps from the edge.
        assert_eq!(compact.max_distance, 6);
        // Blurred values, spans at distance 2 or less are kept as is.
        assert_eq!(dist_at(1, 3), 2);
        assert_eq!(dist_at(2, 3), 4);
        assert_eq!(dist_at(3, 3), 4);
    }

    #[test]
    fn area_changes_count_as_boundaries() {
        let mut compact = flat_field(7).into_compact(2, 1).unwrap();
        let center = compact.cell_at(3, 3).index() as usize;
        compact.areas[center] = AreaType(2);
        compact.build_distance_field();
        assert_eq!(compact.dist[center], 0);
    }

    #[test]
    fn chamfer_uses_diagonal_weights() {
        let compact = flat_field(5).into_compact(2, 1).unwrap();
        let mut dist = vec![u16::MAX; compact.spans.len()];
        let corner = compact.cell_at(0, 0).index() as usize;
        dist[corner] = 0;
        compact.chamfer_distance(&mut dist);
        let at = |x: u16, z: u16| dist[compact.cell_at(x, z).index() as usize];
        assert_eq!(at(1, 0), 2);
        assert_eq!(at(1, 1), 3);
        assert_eq!(at(2, 2), 6);
        assert_eq!(at(2, 1), 5);
    }
}
