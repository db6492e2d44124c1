//! Layer partitioning
//!   - quite fast
//!   - partitions the heightfield into non-overlapping regions
//!   - relies on the triangulation code to cope with holes (thus slower than monotone partitioning)
//!   - produces better triangles than monotone partitioning
//!   - does not have the corner cases of watershed partitioning
//!   - can be slow and create a bit ugly tessellation (still better than monotone)
//!     if you have large open areas with small obstacles (not a problem if you use tiles)
//!   * good choice to use for tiled navmesh with medium and small sized tiles

use crate::{CompactHeightfield, RegionId, region::RegionError};

impl CompactHeightfield {
    /// Partitions the walkable spans into non-overlapping layers.
    ///
    /// Monotone row sweeps are merged with their neighbors as long as the merged region
    /// does not overlap itself vertically. Regions may contain holes, which the contour
    /// builder merges into their outline.
    ///
    /// Layers with fewer than `min_region_area` spans that don't touch the tile border are removed.
    /// No distance field is needed.
    pub fn build_layer_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut region_id = self.sweep_monotone_regions(border_size, &mut src_reg)?;

        // Merge monotone regions to layers and remove small regions.
        self.merge_and_filter_layer_regions(min_region_area as usize, &mut region_id, &mut src_reg);

        // Store the result out.
        self.max_region = RegionId::from(region_id);
        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        tracing::debug!(regions = region_id, "Built layer regions");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use crate::{Aabb3d, AreaType, HeightfieldBuilder, distance_field::tests::flat_field};

    use super::*;

    fn region_at(compact: &CompactHeightfield, x: u16, z: u16) -> RegionId {
        compact.spans[compact.cell_at(x, z).index() as usize].region
    }

    #[test]
    fn ring_becomes_one_layer_with_a_hole() {
        let mut compact = flat_field(7).into_compact(2, 1).unwrap();
        for z in 2..5 {
            for x in 2..5 {
                let i = compact.cell_at(x, z).index() as usize;
                compact.areas[i] = AreaType::NOT_WALKABLE;
            }
        }
        compact.build_layer_regions(0, 0).unwrap();
        let region = region_at(&compact, 0, 0);
        assert_ne!(region, RegionId::NONE);
        for z in 0..7 {
            for x in 0..7 {
                let expected = if (2..5).contains(&x) && (2..5).contains(&z) {
                    RegionId::NONE
                } else {
                    region
                };
                assert_eq!(region_at(&compact, x, z), expected, "({x}, {z})");
            }
        }
    }

    #[test]
    fn stacked_floors_get_separate_layers() {
        // Two floors on top of each other, connected by nothing.
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3::ZERO, Vec3::new(4.0, 20.0, 4.0)),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        for y in [1.0, 10.0] {
            let quad = [
                [
                    Vec3::new(0.0, y, 0.0),
                    Vec3::new(0.0, y, 4.0),
                    Vec3::new(4.0, y, 4.0),
                ],
                [
                    Vec3::new(0.0, y, 0.0),
                    Vec3::new(4.0, y, 4.0),
                    Vec3::new(4.0, y, 0.0),
                ],
            ];
            for triangle in quad {
                heightfield
                    .rasterize_triangle(triangle.map(Into::into), AreaType(1), 1)
                    .unwrap();
            }
        }
        let mut compact = heightfield.into_compact(2, 1).unwrap();
        compact.build_layer_regions(0, 0).unwrap();
        let cell = compact.cell_at(1, 1);
        assert_eq!(cell.count(), 2);
        let lower = compact.spans[cell.index() as usize].region;
        let upper = compact.spans[cell.index() as usize + 1].region;
        assert_ne!(lower, RegionId::NONE);
        assert_ne!(upper, RegionId::NONE);
        assert_ne!(lower, upper);
    }

    #[test]
    fn small_layers_are_removed() {
        let mut compact = flat_field(6).into_compact(2, 1).unwrap();
        compact.build_layer_regions(0, 40).unwrap();
        assert!(compact.spans.iter().all(|span| span.region == RegionId::NONE));
    }
}
