use crate::{AreaType, CompactHeightfield};

impl CompactHeightfield {
    /// Erode the walkable area by agent radius.
    ///
    /// Every walkable span closer than `walkable_radius` voxels to a non-walkable span
    /// or to the edge of the walkable surface is marked as [`AreaType::NOT_WALKABLE`].
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        let mut distance_to_boundary = vec![u16::from(u8::MAX); self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                for span_index in self.cell_at(x, z).index_range() {
                    if !self.areas[span_index].is_walkable() {
                        distance_to_boundary[span_index] = 0;
                        continue;
                    }
                    // Check that there is a non-null adjacent span in each of the 4 cardinal directions.
                    let neighbor_count = (0..4)
                        .filter_map(|dir| self.neighbor_index(x as i32, z as i32, span_index, dir))
                        .filter(|neighbor| self.areas[*neighbor].is_walkable())
                        .count();

                    // At least one missing neighbour, so this is a boundary cell.
                    if neighbor_count != 4 {
                        distance_to_boundary[span_index] = 0;
                    }
                }
            }
        }

        self.chamfer_distance(&mut distance_to_boundary);

        let threshold = walkable_radius as u32 * 2;
        for (area, distance) in self.areas.iter_mut().zip(&distance_to_boundary) {
            // Distances saturate at u8::MAX.
            if ((*distance).min(u8::MAX.into()) as u32) < threshold {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::distance_field::tests::flat_field;

    use super::*;

    fn walkable_cells(compact: &CompactHeightfield) -> Vec<(u16, u16)> {
        let mut cells = Vec::new();
        for z in 0..compact.height {
            for x in 0..compact.width {
                if compact
                    .cell_at(x, z)
                    .index_range()
                    .any(|i| compact.areas[i].is_walkable())
                {
                    cells.push((x, z));
                }
            }
        }
        cells
    }

    #[test]
    fn zero_radius_only_keeps_area() {
        let mut compact = flat_field(5).into_compact(2, 1).unwrap();
        compact.erode_walkable_area(0);
        assert_eq!(walkable_cells(&compact).len(), 25);
    }

    #[test]
    fn erodes_by_radius() {
        let mut compact = flat_field(7).into_compact(2, 1).unwrap();
        compact.erode_walkable_area(2);
        // Only spans at least 2 orthogonal steps from the edge survive.
        let expected: Vec<_> = (2..5)
            .flat_map(|z| (2..5).map(move |x| (x, z)))
            .collect();
        assert_eq!(walkable_cells(&compact), expected);
    }

    #[test]
    fn erodes_around_obstacles() {
        let mut compact = flat_field(9).into_compact(2, 1).unwrap();
        let center = compact.cell_at(4, 4).index() as usize;
        compact.areas[center] = AreaType::NOT_WALKABLE;
        compact.erode_walkable_area(1);
        for (x, z) in [(3, 4), (5, 4), (4, 3), (4, 5), (4, 4)] {
            let i = compact.cell_at(x, z).index() as usize;
            assert_eq!(compact.areas[i], AreaType::NOT_WALKABLE, "({x}, {z})");
        }
        let diagonal = compact.cell_at(3, 3).index() as usize;
        assert!(compact.areas[diagonal].is_walkable());
    }
}
