//! Monotone partitioning
//!   - fastest
//!   - partitions the heightfield into regions without holes and overlaps (guaranteed)
//!   - creates long thin polygons, which sometimes causes paths with detours
//!   * use this if you want fast navmesh generation

use crate::{CompactHeightfield, RegionId, region::RegionError};

/// Marks a sweep span whose row neighbors below belong to more than one region.
const NULL_NEIGHBOR: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Region id the sweep span resolves to.
    id: u16,
    /// Number of samples shared with the neighbor region below.
    sample_count: u16,
    /// Neighbor region id below, or [`NULL_NEIGHBOR`].
    neighbor: u16,
}

impl CompactHeightfield {
    /// Partitions the walkable spans into regions by sweeping rows along the x-axis.
    ///
    /// Consecutive spans in a row form a sweep span; a sweep span continues the region of
    /// the row below if it connects to exactly that one region over its entire extent.
    /// The resulting regions never overlap and never have holes, but tend to be long and thin.
    ///
    /// `min_region_area` and `merge_region_area` are applied the same way as in
    /// [`CompactHeightfield::build_regions`]. No distance field is needed.
    pub fn build_regions_monotone(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut region_id = self.sweep_monotone_regions(border_size, &mut src_reg)?;

        // Merge regions and filter out small regions.
        self.merge_and_filter_simple_regions(
            min_region_area as usize,
            merge_region_area as usize,
            &mut region_id,
            &mut src_reg,
        )?;

        // Store the result out.
        self.max_region = RegionId::from(region_id);
        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        tracing::debug!(regions = region_id, "Built monotone regions");
        Ok(())
    }

    /// Paints the border and assigns a monotone region to every walkable span.
    /// Returns the next unused region id.
    pub(crate) fn sweep_monotone_regions(
        &mut self,
        border_size: u16,
        src_reg: &mut [RegionId],
    ) -> Result<u16, RegionError> {
        let w = self.width;
        let h = self.height;

        // Mark border regions.
        let mut id = self.paint_border_regions(border_size, src_reg);
        self.border_size = border_size;

        let mut sweeps: Vec<SweepSpan> = Vec::with_capacity(w.max(h) as usize + 1);
        let mut prev: Vec<u16> = Vec::with_capacity(256);

        // Sweep one line at a time.
        for z in border_size..h.saturating_sub(border_size) {
            // Collect spans from this row.
            prev.clear();
            prev.resize(id as usize + 1, 0);
            sweeps.clear();
            // Sweep id 0 means "no sweep span".
            sweeps.push(SweepSpan::default());

            for x in border_size..w.saturating_sub(border_size) {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() {
                        continue;
                    }
                    let area = self.areas[i];

                    // -x
                    let mut previous_id = 0;
                    if let Some(ai) = self.neighbor_index(x as i32, z as i32, i, 0) {
                        if !src_reg[ai].is_border() && area == self.areas[ai] {
                            previous_id = src_reg[ai].bits();
                        }
                    }
                    if previous_id == 0 {
                        previous_id = sweeps.len() as u16;
                        sweeps.push(SweepSpan::default());
                    }

                    // -z
                    if let Some(ai) = self.neighbor_index(x as i32, z as i32, i, 3) {
                        let neighbor_region = src_reg[ai];
                        if neighbor_region != RegionId::NONE
                            && !neighbor_region.is_border()
                            && area == self.areas[ai]
                        {
                            let nr = neighbor_region.bits();
                            let sweep = &mut sweeps[previous_id as usize];
                            if sweep.neighbor == 0 || sweep.neighbor == nr {
                                sweep.neighbor = nr;
                                sweep.sample_count += 1;
                                prev[nr as usize] += 1;
                            } else {
                                sweep.neighbor = NULL_NEIGHBOR;
                            }
                        }
                    }

                    src_reg[i] = RegionId::from(previous_id);
                }
            }

            // Create unique ID.
            for sweep in sweeps.iter_mut().skip(1) {
                if sweep.neighbor != NULL_NEIGHBOR
                    && sweep.neighbor != 0
                    && prev[sweep.neighbor as usize] == sweep.sample_count
                {
                    sweep.id = sweep.neighbor;
                } else {
                    if id >= RegionId::BORDER_REGION.bits() - 1 {
                        return Err(RegionError::RegionIdOverflow);
                    }
                    sweep.id = id;
                    id += 1;
                }
            }

            // Remap IDs
            for x in border_size..w.saturating_sub(border_size) {
                for i in self.cell_at(x, z).index_range() {
                    let sweep_id = src_reg[i].bits() as usize;
                    if sweep_id > 0 && sweep_id < sweeps.len() {
                        src_reg[i] = RegionId::from(sweeps[sweep_id].id);
                    }
                }
            }
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use crate::{AreaType, distance_field::tests::flat_field};

    use super::*;

    fn region_at(compact: &CompactHeightfield, x: u16, z: u16) -> RegionId {
        compact.spans[compact.cell_at(x, z).index() as usize].region
    }

    #[test]
    fn rectangle_is_a_single_region() {
        let mut compact = flat_field(6).into_compact(2, 1).unwrap();
        compact.build_regions_monotone(0, 0, 0).unwrap();
        assert!(
            compact
                .spans
                .iter()
                .all(|span| span.region == RegionId::from(1))
        );
    }

    #[test]
    fn obstacle_splits_rows_into_separate_regions() {
        let mut compact = flat_field(7).into_compact(2, 1).unwrap();
        // A pillar in the middle of the floor.
        let pillar = compact.cell_at(3, 3).index() as usize;
        compact.areas[pillar] = AreaType::NOT_WALKABLE;
        compact.build_regions_monotone(0, 0, 0).unwrap();

        // The rows above and below the pillar can't both continue the same region.
        let before = region_at(&compact, 3, 2);
        let left = region_at(&compact, 2, 3);
        let right = region_at(&compact, 4, 3);
        assert_ne!(left, right);
        assert_eq!(before, region_at(&compact, 0, 0));
        assert_eq!(region_at(&compact, 3, 3), RegionId::NONE);
        assert!(compact.spans.iter().enumerate().all(|(i, span)| {
            !compact.areas[i].is_walkable() || span.region != RegionId::NONE
        }));
    }

    #[test]
    fn different_areas_form_different_regions() {
        let mut compact = flat_field(6).into_compact(2, 1).unwrap();
        for z in 0..6 {
            for x in 3..6 {
                let i = compact.cell_at(x, z).index() as usize;
                compact.areas[i] = AreaType(2);
            }
        }
        compact.build_regions_monotone(0, 0, 0).unwrap();
        assert_ne!(region_at(&compact, 0, 0), region_at(&compact, 5, 0));
        assert_eq!(region_at(&compact, 0, 0), region_at(&compact, 2, 5));
        assert_eq!(region_at(&compact, 3, 0), region_at(&compact, 5, 5));
    }
}
