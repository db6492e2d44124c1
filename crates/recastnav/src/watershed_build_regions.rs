//! Watershed partitioning
//!   - the classic Recast partitioning
//!   - creates the nicest tessellation
//!   - usually slowest
//!   - partitions the heightfield into nice regions without holes or overlaps
//!   - the are some corner cases where this method creates produces holes and overlaps
//!      - holes may appear when a small obstacles is close to large open area (triangulation can handle this)
//!      - overlaps may occur if you have narrow spiral corridors (i.e stairs), such regions are split up afterwards
//!   * generally the best choice if you precompute the navmesh, use this if you have large open areas

use crate::{CompactHeightfield, RegionId, region::RegionError};

const LOG_NB_STACKS: usize = 3;
const NB_STACKS: usize = 1 << LOG_NB_STACKS;

impl CompactHeightfield {
    /// Non-null regions will consist of connected, non-overlapping walkable spans that form a single contour.
    /// Contours will form simple polygons.
    ///
    /// If multiple regions form an area that is smaller than `min_region_area`, then all spans will be
    /// re-assigned to [`RegionId::NONE`].
    ///
    /// Watershed partitioning can result in smaller than necessary regions, especially in diagonal corridors.
    /// `merge_region_area` helps reduce unnecessarily small regions.
    ///
    /// The region data will be available via the [`CompactHeightfield::max_region`]
    /// and [`CompactSpan::region`](crate::CompactSpan::region) fields.
    ///
    /// The distance field should be created using [`CompactHeightfield::build_distance_field`] before attempting to build regions.
    /// If it is missing, it is built here.
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] =
            std::array::from_fn(|_| Vec::with_capacity(256));
        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];

        if self.dist.len() != self.spans.len() {
            tracing::debug!("Distance field is missing, building it before watershed partitioning");
            self.build_distance_field();
        }
        let mut level = self.max_distance.saturating_add(1) & !1;

        // Defines how much the watershed "overflows" and simplifies the regions.
        let expand_iters = 8;

        let mut region_id = self.paint_border_regions(border_size, &mut src_reg);
        self.border_size = border_size;

        let mut s_id = usize::MAX;
        while level > 0 {
            level = level.saturating_sub(2);
            s_id = s_id.wrapping_add(1) & (NB_STACKS - 1);

            if s_id == 0 {
                self.sort_cells_by_level(level, &src_reg, &mut level_stacks, 1);
            } else {
                // copy left overs from last level
                let (src, dst) = level_stacks.split_at_mut(s_id);
                append_stacks(&src[s_id - 1], &mut dst[0], &src_reg);
            }

            self.expand_regions(
                expand_iters,
                level,
                &mut src_reg,
                &mut src_dist,
                &mut level_stacks[s_id],
                false,
            );

            // Mark new regions with IDs.
            for j in 0..level_stacks[s_id].len() {
                let current = level_stacks[s_id][j].clone();
                let Some(i) = current.index else {
                    continue;
                };
                if src_reg[i] != RegionId::NONE {
                    continue;
                }
                if self.flood_region(
                    current,
                    level,
                    RegionId::from(region_id),
                    &mut src_reg,
                    &mut src_dist,
                    &mut stack,
                ) {
                    if region_id >= RegionId::BORDER_REGION.bits() - 1 {
                        return Err(RegionError::RegionIdOverflow);
                    }
                    region_id += 1;
                }
            }
        }

        // Expand current regions until no empty connected cells found.
        self.expand_regions(
            expand_iters * 8,
            0,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
            true,
        );

        // Merge regions and filter out small regions.
        let mut max_region_id = region_id;
        self.merge_and_filter_simple_regions(
            min_region_area as usize,
            merge_region_area as usize,
            &mut max_region_id,
            &mut src_reg,
        )?;

        // Write the result out.
        self.max_region = RegionId::from(max_region_id);
        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        tracing::debug!(regions = max_region_id, "Built watershed regions");
        Ok(())
    }

    fn sort_cells_by_level(
        &self,
        start_level: u16,
        src_reg: &[RegionId],
        stacks: &mut [Vec<LevelStackEntry>],
        log_levels_per_stack: u16,
    ) {
        let start_level = start_level >> log_levels_per_stack;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // put all cells in the level range into the appropriate stacks
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() || src_reg[i] != RegionId::NONE {
                        continue;
                    }
                    let level = self.dist[i] >> log_levels_per_stack;
                    // Cells above the start level go into the first stack.
                    let s_id = start_level.saturating_sub(level) as usize;
                    if s_id >= stacks.len() {
                        continue;
                    }
                    stacks[s_id].push(LevelStackEntry {
                        x,
                        z,
                        index: Some(i),
                    });
                }
            }
        }
    }

    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for z in 0..self.height {
                for x in 0..self.width {
                    for i in self.cell_at(x, z).index_range() {
                        if self.dist[i] >= level
                            && src_reg[i] == RegionId::NONE
                            && self.areas[i].is_walkable()
                        {
                            stack.push(LevelStackEntry {
                                x,
                                z,
                                index: Some(i),
                            });
                        }
                    }
                }
            }
        } else {
            // use cells in the input stack
            // mark all cells which already have a region
            for entry in stack.iter_mut() {
                if entry.index.is_some_and(|i| src_reg[i] != RegionId::NONE) {
                    entry.index = None;
                }
            }
        }

        let mut dirty_entries = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut region = src_reg[i];
                let mut d2 = u32::from(u16::MAX);
                let area = self.areas[i];
                for dir in 0..4 {
                    let Some(ai) = self.neighbor_index(entry.x as i32, entry.z as i32, i, dir)
                    else {
                        continue;
                    };
                    if self.areas[ai] != area {
                        continue;
                    }
                    let neighbor_region = src_reg[ai];
                    let neighbor_dist = src_dist[ai] as u32 + 2;
                    if neighbor_region != RegionId::NONE
                        && !neighbor_region.is_border()
                        && neighbor_dist < d2
                    {
                        region = neighbor_region;
                        d2 = neighbor_dist;
                    }
                }
                if region != RegionId::NONE {
                    // Mark as used
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance2: d2.min(u16::MAX.into()) as u16,
                    });
                } else {
                    failed += 1;
                }
            }

            // Copy entries that differ between src and dst to keep them in sync.
            for dirty_entry in &dirty_entries {
                src_reg[dirty_entry.index] = dirty_entry.region;
                src_dist[dirty_entry.index] = dirty_entry.distance2;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    /// Flood fills a new region from `start` over spans at or above `level - 2`.
    /// Returns `true` if at least one span was claimed.
    fn flood_region(
        &self,
        start: LevelStackEntry,
        level: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
    ) -> bool {
        let Some(start_index) = start.index else {
            return false;
        };
        let area = self.areas[start_index];

        // Flood fill mark region.
        stack.clear();
        stack.push(start);
        src_reg[start_index] = region;
        src_dist[start_index] = 0;

        let lev = level.saturating_sub(2);
        let mut count = 0;

        while let Some(entry) = stack.pop() {
            let Some(ci) = entry.index else {
                continue;
            };
            let (cx, cz) = (entry.x as i32, entry.z as i32);

            // Check if any of the neighbours already have a valid region set.
            let mut neighbor_has_region = false;
            for dir in 0..4 {
                // 8 connected
                let Some(con) = self.spans[ci].con(dir) else {
                    continue;
                };
                let (ax, az, ai) = self.con_indices(cx, cz, dir, con);
                if self.areas[ai] != area {
                    continue;
                }
                let nr = src_reg[ai];
                // Do not take borders into account.
                if nr.is_border() {
                    continue;
                }
                if nr != RegionId::NONE && nr != region {
                    neighbor_has_region = true;
                    break;
                }

                let dir2 = (dir + 1) & 0x3;
                if let Some(ai2) = self.neighbor_index(ax, az, ai, dir2) {
                    if self.areas[ai2] != area {
                        continue;
                    }
                    let nr2 = src_reg[ai2];
                    if nr2 != RegionId::NONE && nr2 != region {
                        neighbor_has_region = true;
                        break;
                    }
                }
            }
            if neighbor_has_region {
                src_reg[ci] = RegionId::NONE;
                continue;
            }

            count += 1;

            // Expand neighbours.
            for dir in 0..4 {
                let Some(con) = self.spans[ci].con(dir) else {
                    continue;
                };
                let (ax, az, ai) = self.con_indices(cx, cz, dir, con);
                if self.areas[ai] != area {
                    continue;
                }
                if self.dist[ai] >= lev && src_reg[ai] == RegionId::NONE {
                    src_reg[ai] = region;
                    src_dist[ai] = 0;
                    stack.push(LevelStackEntry {
                        x: ax as u16,
                        z: az as u16,
                        index: Some(ai),
                    });
                }
            }
        }

        count > 0
    }
}

fn append_stacks(
    src_stack: &[LevelStackEntry],
    dst_stack: &mut Vec<LevelStackEntry>,
    src_reg: &[RegionId],
) {
    for entry in src_stack {
        let Some(i) = entry.index else {
            continue;
        };
        if src_reg[i] != RegionId::NONE {
            continue;
        }
        dst_stack.push(entry.clone());
    }
}

#[derive(Clone, Debug)]
struct LevelStackEntry {
    x: u16,
    z: u16,
    /// `None` once the span has been assigned a region.
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance2: u16,
}

#[cfg(test)]
mod tests {
    use crate::{AreaType, distance_field::tests::flat_field};

    use super::*;

    fn region_at(compact: &CompactHeightfield, x: u16, z: u16) -> RegionId {
        compact.spans[compact.cell_at(x, z).index() as usize].region
    }

    #[test]
    fn open_floor_becomes_a_single_region() {
        let mut compact = flat_field(7).into_compact(2, 1).unwrap();
        compact.build_distance_field();
        compact.build_regions(0, 0, 0).unwrap();
        assert!(compact.max_region >= RegionId::from(1));
        assert!(
            compact
                .spans
                .iter()
                .all(|span| span.region == RegionId::from(1))
        );
    }

    #[test]
    fn wall_splits_floor_into_two_regions() {
        let mut compact = flat_field(11).into_compact(2, 1).unwrap();
        for z in 0..11 {
            let i = compact.cell_at(5, z).index() as usize;
            compact.areas[i] = AreaType::NOT_WALKABLE;
        }
        compact.build_distance_field();
        compact.build_regions(0, 0, 0).unwrap();

        let left = region_at(&compact, 2, 5);
        let right = region_at(&compact, 8, 5);
        assert_ne!(left, RegionId::NONE);
        assert_ne!(right, RegionId::NONE);
        assert_ne!(left, right);
        assert_eq!(region_at(&compact, 5, 5), RegionId::NONE);
        for z in 0..11 {
            for x in 0..5 {
                assert_eq!(region_at(&compact, x, z), left);
                assert_eq!(region_at(&compact, x + 6, z), right);
            }
        }
    }

    #[test]
    fn small_islands_are_removed() {
        let mut compact = flat_field(11).into_compact(2, 1).unwrap();
        for z in 0..11 {
            let i = compact.cell_at(2, z).index() as usize;
            compact.areas[i] = AreaType::NOT_WALKABLE;
        }
        compact.build_distance_field();
        // The strip left of the wall has 22 spans, the rest 88.
        compact.build_regions(0, 30, 0).unwrap();
        assert_eq!(region_at(&compact, 0, 5), RegionId::NONE);
        assert_eq!(region_at(&compact, 6, 5), RegionId::from(1));
    }

    #[test]
    fn border_is_painted_with_border_regions() {
        let mut compact = flat_field(9).into_compact(2, 1).unwrap();
        compact.build_distance_field();
        compact.build_regions(2, 0, 0).unwrap();
        assert_eq!(compact.border_size, 2);
        assert!(region_at(&compact, 0, 4).is_border());
        assert!(region_at(&compact, 4, 8).is_border());
        let center = region_at(&compact, 4, 4);
        assert!(!center.is_border());
        assert_ne!(center, RegionId::NONE);
        for z in 2..7 {
            for x in 2..7 {
                assert_eq!(region_at(&compact, x, z), center);
            }
        }
    }
}
