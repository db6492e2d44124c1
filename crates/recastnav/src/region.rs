//! Region ids and the merging/filtering pass shared by the region partitioners.

use thiserror::Error;

use crate::{CompactHeightfield, span::AreaType};

bitflags::bitflags! {
    /// A region in a [`CompactHeightfield`].
    ///
    /// The lower 15 bits hold the id, the highest bit marks regions painted into the tile border.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    #[repr(transparent)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct RegionId: u16 {
        /// The default region, which is used for spans that are not in a region.
        const NONE = 0;
        /// Heightfield border flag.
        /// If a heightfield region ID has this bit set, then the region is a border
        /// region and its spans are considered un-walkable.
        const BORDER_REGION = 0x8000;
        const _ = !0;
    }
}

impl From<u16> for RegionId {
    #[inline]
    fn from(value: u16) -> Self {
        Self::from_bits_retain(value)
    }
}

impl From<RegionId> for u16 {
    #[inline]
    fn from(value: RegionId) -> Self {
        value.bits()
    }
}

impl RegionId {
    /// Returns `true` if the region is painted into the tile border.
    #[inline]
    pub fn is_border(self) -> bool {
        self.contains(Self::BORDER_REGION)
    }

    /// The region id without the border flag.
    #[inline]
    pub fn id(self) -> u16 {
        self.bits() & !Self::BORDER_REGION.bits()
    }
}

/// Errors that can occur while partitioning a [`CompactHeightfield`] into regions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    /// More regions were needed than the id space can hold.
    #[error("Region id overflow, more than {max} regions were created", max = RegionId::BORDER_REGION.bits() - 1)]
    RegionIdOverflow,
}

/// Bookkeeping for a single region while merging and filtering.
#[derive(Debug, Clone)]
struct Region {
    span_count: usize,
    id: u16,
    area_type: AreaType,
    remap: bool,
    visited: bool,
    overlap: bool,
    connects_to_border: bool,
    y_min: u16,
    y_max: u16,
    /// Neighboring regions along the region's contour, in walk order.
    connections: Vec<u16>,
    /// Regions stacked above or below this region in the same columns.
    floors: Vec<u16>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            span_count: 0,
            id,
            area_type: AreaType::NOT_WALKABLE,
            remap: false,
            visited: false,
            overlap: false,
            connects_to_border: false,
            y_min: u16::MAX,
            y_max: 0,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    fn is_null_or_border(&self) -> bool {
        self.id == 0 || RegionId::from(self.id).is_border()
    }

    fn remove_adjacent_neighbors(&mut self) {
        // Remove adjacent duplicates.
        let mut i = 0;
        while i < self.connections.len() && self.connections.len() > 1 {
            let ni = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[ni] {
                self.connections.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbor(&mut self, old_id: u16, new_id: u16) {
        let mut neighbor_changed = false;
        for connection in &mut self.connections {
            if *connection == old_id {
                *connection = new_id;
                neighbor_changed = true;
            }
        }
        for floor in &mut self.floors {
            if *floor == old_id {
                *floor = new_id;
            }
        }
        if neighbor_changed {
            self.remove_adjacent_neighbors();
        }
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area_type != other.area_type {
            return false;
        }
        let shared_edges = self
            .connections
            .iter()
            .filter(|connection| **connection == other.id)
            .count();
        if shared_edges > 1 {
            return false;
        }
        !self.floors.contains(&other.id)
    }

    fn add_unique_floor(&mut self, id: u16) {
        if !self.floors.contains(&id) {
            self.floors.push(id);
        }
    }

    fn add_unique_connection(&mut self, id: u16) {
        if !self.connections.contains(&id) {
            self.connections.push(id);
        }
    }

    fn is_connected_to_border(&self) -> bool {
        // Region id 0 is the null region, i.e. the edge of the walkable area.
        self.connections.contains(&0)
    }
}

/// Splices the contour of `b` into the contour of `a` at their shared edge.
/// Returns `false` if the regions do not share an edge.
fn merge_regions(regions: &mut [Region], a: usize, b: usize) -> bool {
    let a_id = regions[a].id;
    let b_id = regions[b].id;

    // Duplicate current neighbourhood.
    let a_connections = regions[a].connections.clone();
    let b_connections = std::mem::take(&mut regions[b].connections);
    let b_floors = regions[b].floors.clone();

    // Find insertion point on A and B.
    let Some(insert_a) = a_connections.iter().position(|c| *c == b_id) else {
        regions[b].connections = b_connections;
        return false;
    };
    let Some(insert_b) = b_connections.iter().position(|c| *c == a_id) else {
        regions[b].connections = b_connections;
        return false;
    };

    let region_a = &mut regions[a];
    region_a.connections.clear();
    let n = a_connections.len();
    for i in 0..n - 1 {
        region_a.connections.push(a_connections[(insert_a + 1 + i) % n]);
    }
    let n = b_connections.len();
    for i in 0..n - 1 {
        region_a.connections.push(b_connections[(insert_b + 1 + i) % n]);
    }
    region_a.remove_adjacent_neighbors();

    for floor in b_floors {
        region_a.add_unique_floor(floor);
    }
    let b_span_count = regions[b].span_count;
    regions[a].span_count += b_span_count;
    regions[b].span_count = 0;
    true
}

/// Rewrites the region ids to a dense `1..=n` range and returns `n`.
fn compress_region_ids(regions: &mut [Region]) -> u16 {
    for region in regions.iter_mut() {
        region.remap = !region.is_null_or_border();
    }
    let mut region_id_gen = 0;
    for i in 0..regions.len() {
        if !regions[i].remap {
            continue;
        }
        let old_id = regions[i].id;
        region_id_gen += 1;
        for region in regions[i..].iter_mut() {
            if region.id == old_id {
                region.id = region_id_gen;
                region.remap = false;
            }
        }
    }
    region_id_gen
}

fn remap_regions(regions: &[Region], src_reg: &mut [RegionId]) {
    for region in src_reg.iter_mut() {
        if !region.is_border() {
            *region = RegionId::from(regions[region.bits() as usize].id);
        }
    }
}

/// Clears the regions in `discarded` and renumbers the rest densely.
fn discard_regions(discarded: &[u16], max_region_id: &mut u16, src_reg: &mut [RegionId]) {
    let mut remap: Vec<u16> = (0..=*max_region_id).collect();
    for &id in discarded {
        if let Some(slot) = remap.get_mut(id as usize) {
            *slot = 0;
        }
    }
    let mut next_id = 0;
    for id in remap.iter_mut().skip(1) {
        if *id != 0 {
            next_id += 1;
            *id = next_id;
        }
    }
    for region in src_reg.iter_mut() {
        if !region.is_border() {
            *region = RegionId::from(remap.get(region.bits() as usize).copied().unwrap_or(0));
        }
    }
    *max_region_id = next_id;
}

impl CompactHeightfield {
    /// [`CompactHeightfield::merge_and_filter_regions`] followed by a repair of regions that
    /// overlap themselves vertically.
    ///
    /// Such a region, e.g. one winding up a spiral ramp, is re-flooded into parts that cover
    /// every column at most once, and the parts are merged and filtered again.
    /// Regions that still overlap afterwards are cleared.
    pub(crate) fn merge_and_filter_simple_regions(
        &self,
        min_region_area: usize,
        merge_region_area: usize,
        max_region_id: &mut u16,
        src_reg: &mut [RegionId],
    ) -> Result<(), RegionError> {
        let overlaps =
            self.merge_and_filter_regions(min_region_area, merge_region_area, max_region_id, src_reg);
        if overlaps.is_empty() {
            return Ok(());
        }
        tracing::warn!(
            count = overlaps.len(),
            "Found regions overlapping themselves, splitting them"
        );
        self.split_overlapping_regions(&overlaps, max_region_id, src_reg)?;

        let overlaps =
            self.merge_and_filter_regions(min_region_area, merge_region_area, max_region_id, src_reg);
        if !overlaps.is_empty() {
            tracing::warn!(
                count = overlaps.len(),
                "Regions still overlap themselves after splitting, removing them"
            );
            discard_regions(&overlaps, max_region_id, src_reg);
        }
        Ok(())
    }

    /// Re-floods every region in `overlaps` breadth-first. A part never takes a second span
    /// of a column, the remaining spans start new parts. The first part of a region keeps its id,
    /// every further part gets a fresh one.
    fn split_overlapping_regions(
        &self,
        overlaps: &[u16],
        max_region_id: &mut u16,
        src_reg: &mut [RegionId],
    ) -> Result<(), RegionError> {
        let mut span_columns = vec![(0_u16, 0_u16); self.spans.len()];
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    span_columns[i] = (x, z);
                }
            }
        }

        let mut visited = vec![false; self.spans.len()];
        let mut column_owner = vec![RegionId::NONE; self.cells.len()];
        let mut split_regions = Vec::with_capacity(overlaps.len());
        let mut queue = std::collections::VecDeque::new();
        for start in 0..self.spans.len() {
            let old_region = src_reg[start];
            if visited[start] || old_region.is_border() || !overlaps.contains(&old_region.bits()) {
                continue;
            }
            let part = if split_regions.contains(&old_region) {
                if *max_region_id >= RegionId::BORDER_REGION.bits() - 1 {
                    return Err(RegionError::RegionIdOverflow);
                }
                *max_region_id += 1;
                RegionId::from(*max_region_id)
            } else {
                split_regions.push(old_region);
                old_region
            };

            let (x, z) = span_columns[start];
            column_owner[self.column_index(x, z)] = part;
            visited[start] = true;
            src_reg[start] = part;
            queue.push_back(start);
            while let Some(i) = queue.pop_front() {
                let (x, z) = span_columns[i];
                for dir in 0..4 {
                    let Some(ni) = self.neighbor_index(x as i32, z as i32, i, dir) else {
                        continue;
                    };
                    if visited[ni] || src_reg[ni] != old_region {
                        continue;
                    }
                    let (nx, nz) = span_columns[ni];
                    let column = self.column_index(nx, nz);
                    if column_owner[column] == part {
                        continue;
                    }
                    column_owner[column] = part;
                    visited[ni] = true;
                    src_reg[ni] = part;
                    queue.push_back(ni);
                }
            }
        }
        Ok(())
    }

    /// Removes regions smaller than `min_region_area` and merges regions smaller than
    /// `merge_region_area` into their smallest compatible neighbor.
    ///
    /// Returns the ids of regions that overlap themselves vertically.
    fn merge_and_filter_regions(
        &self,
        min_region_area: usize,
        merge_region_area: usize,
        max_region_id: &mut u16,
        src_reg: &mut [RegionId],
    ) -> Vec<u16> {
        let region_count = *max_region_id as usize + 1;
        let mut regions: Vec<Region> = (0..region_count)
            .map(|i| Region::new(i as u16))
            .collect();

        // Find edge of a region and find connections around the contour.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                for i in cell.index_range() {
                    let r = src_reg[i].bits() as usize;
                    if r == 0 || r >= region_count {
                        continue;
                    }
                    let region = &mut regions[r];
                    region.span_count += 1;

                    // Update floors.
                    for j in cell.index_range() {
                        if i == j {
                            continue;
                        }
                        let floor_id = src_reg[j].bits();
                        if floor_id == 0 || floor_id as usize >= region_count {
                            continue;
                        }
                        if floor_id as usize == r {
                            region.overlap = true;
                        }
                        region.add_unique_floor(floor_id);
                    }

                    // Have found contour
                    if !region.connections.is_empty() {
                        continue;
                    }
                    region.area_type = self.areas[i];

                    // Check if this cell is next to a border.
                    let x = x as i32;
                    let z = z as i32;
                    if let Some(dir) = (0..4).find(|dir| self.is_solid_edge(src_reg, x, z, i, *dir))
                    {
                        // The region's boundary, i.e. the neighbors along the walk
                        regions[r].connections = self.walk_contour(x, z, i, dir, src_reg);
                    }
                }
            }
        }

        // Remove too small regions.
        let mut stack = Vec::with_capacity(32);
        let mut trace = Vec::with_capacity(32);
        for i in 0..region_count {
            let region = &regions[i];
            if region.is_null_or_border() || region.span_count == 0 || region.visited {
                continue;
            }

            // Count the total size of all the connected regions.
            // Also keep track of the regions connects to a tile border.
            let mut connects_to_border = false;
            let mut span_count = 0;
            stack.clear();
            trace.clear();

            regions[i].visited = true;
            stack.push(i);

            while let Some(ri) = stack.pop() {
                span_count += regions[ri].span_count;
                trace.push(ri);

                for j in 0..regions[ri].connections.len() {
                    let connection = regions[ri].connections[j];
                    if RegionId::from(connection).is_border() {
                        connects_to_border = true;
                        continue;
                    }
                    let neighbor = &mut regions[connection as usize];
                    if neighbor.visited || neighbor.is_null_or_border() {
                        continue;
                    }
                    // Visit
                    stack.push(neighbor.id as usize);
                    neighbor.visited = true;
                }
            }

            // If the accumulated regions size is too small, remove it.
            // Do not remove areas which connect to tile borders
            // as their size cannot be estimated correctly and removing them
            // can potentially remove necessary areas.
            if span_count < min_region_area && !connects_to_border {
                // Kill all visited regions.
                for &index in &trace {
                    regions[index].span_count = 0;
                    regions[index].id = 0;
                }
            }
        }

        // Merge too small regions to neighbour regions.
        loop {
            let mut merge_count = 0;
            for i in 0..region_count {
                let region = &regions[i];
                if region.is_null_or_border() || region.overlap || region.span_count == 0 {
                    continue;
                }

                // Check to see if the region should be merged.
                if region.span_count > merge_region_area && region.is_connected_to_border() {
                    continue;
                }

                // Small region with more than 1 connection.
                // Or region which is not connected to a border at all.
                // Find smallest neighbour region that connects to this one.
                let mut smallest = usize::MAX;
                let mut merge_id = region.id;
                for &connection in &region.connections {
                    if RegionId::from(connection).is_border() {
                        continue;
                    }
                    let merge_region = &regions[connection as usize];
                    if merge_region.is_null_or_border() || merge_region.overlap {
                        continue;
                    }
                    if merge_region.span_count < smallest
                        && region.can_merge_with(merge_region)
                        && merge_region.can_merge_with(region)
                    {
                        smallest = merge_region.span_count;
                        merge_id = merge_region.id;
                    }
                }

                // Found new id.
                if merge_id != region.id {
                    let old_id = region.id;
                    // Merge neighbours.
                    if merge_regions(&mut regions, merge_id as usize, i) {
                        // Fixup regions pointing to current region.
                        for other in regions.iter_mut() {
                            if other.is_null_or_border() {
                                continue;
                            }
                            // If another region was already merged into current region
                            // change the nid of the previous region too.
                            if other.id == old_id {
                                other.id = merge_id;
                            }
                            // Replace the current region with the new one if the
                            // current regions is neighbour.
                            other.replace_neighbor(old_id, merge_id);
                        }
                        merge_count += 1;
                    }
                }
            }
            if merge_count == 0 {
                break;
            }
        }

        *max_region_id = compress_region_ids(&mut regions);
        remap_regions(&regions, src_reg);

        // Return regions that we found to be overlapping.
        let mut overlaps: Vec<u16> = regions
            .iter()
            .filter(|region| region.overlap && region.id != 0)
            .map(|region| region.id)
            .collect();
        overlaps.sort_unstable();
        overlaps.dedup();
        overlaps
    }

    /// Joins neighboring monotone regions into non-overlapping layers and removes
    /// layers smaller than `min_region_area`.
    pub(crate) fn merge_and_filter_layer_regions(
        &self,
        min_region_area: usize,
        max_region_id: &mut u16,
        src_reg: &mut [RegionId],
    ) {
        let region_count = *max_region_id as usize + 1;
        let mut regions: Vec<Region> = (0..region_count)
            .map(|i| Region::new(i as u16))
            .collect();

        // Find region neighbours and overlapping regions.
        let mut layer_regions = Vec::with_capacity(32);
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell_at(x, z);
                layer_regions.clear();

                for i in cell.index_range() {
                    let span = &self.spans[i];
                    let ri = src_reg[i].bits();
                    if ri == 0 || ri as usize >= region_count {
                        continue;
                    }
                    let region = &mut regions[ri as usize];
                    region.span_count += 1;
                    region.area_type = self.areas[i];
                    region.y_min = region.y_min.min(span.y);
                    region.y_max = region.y_max.max(span.y);

                    // Collect all region layers.
                    layer_regions.push(ri);

                    // Update neighbours
                    for dir in 0..4 {
                        let Some(ai) = self.neighbor_index(x as i32, z as i32, i, dir) else {
                            continue;
                        };
                        let rai = src_reg[ai];
                        if rai.bits() > 0 && (rai.bits() as usize) < region_count && rai.bits() != ri {
                            region.add_unique_connection(rai.bits());
                        }
                        if rai.is_border() {
                            region.connects_to_border = true;
                        }
                    }
                }

                // Update overlapping regions.
                for i in 0..layer_regions.len() {
                    for j in i + 1..layer_regions.len() {
                        let (ri, rj) = (layer_regions[i], layer_regions[j]);
                        if ri != rj {
                            regions[ri as usize].add_unique_floor(rj);
                            regions[rj as usize].add_unique_floor(ri);
                        }
                    }
                }
            }
        }

        // Create 2D layers from regions.
        let mut layer_id = 1;
        for region in regions.iter_mut() {
            region.id = 0;
        }

        // Merge montone regions to create non-overlapping areas.
        let mut queue = std::collections::VecDeque::with_capacity(32);
        for i in 1..region_count {
            // Skip already visited.
            if regions[i].id != 0 {
                continue;
            }

            // Start search.
            regions[i].id = layer_id;
            queue.clear();
            queue.push_back(i);

            while let Some(current) = queue.pop_front() {
                for j in 0..regions[current].connections.len() {
                    let neighbor = regions[current].connections[j] as usize;
                    // Skip already visited.
                    if regions[neighbor].id != 0 {
                        continue;
                    }
                    // Skip if different area type, do not connect regions with different area type.
                    if regions[current].area_type != regions[neighbor].area_type {
                        continue;
                    }
                    // Skip if the neighbour is overlapping root region.
                    if regions[i].floors.contains(&(neighbor as u16)) {
                        continue;
                    }

                    // Deepen
                    queue.push_back(neighbor);

                    // Mark layer id
                    regions[neighbor].id = layer_id;

                    // Merge current layers to root.
                    let neighbor_region = regions[neighbor].clone();
                    let root = &mut regions[i];
                    for floor in neighbor_region.floors {
                        root.add_unique_floor(floor);
                    }
                    root.y_min = root.y_min.min(neighbor_region.y_min);
                    root.y_max = root.y_max.max(neighbor_region.y_max);
                    root.span_count += neighbor_region.span_count;
                    root.connects_to_border |= neighbor_region.connects_to_border;
                    regions[neighbor].span_count = 0;
                }
            }

            layer_id += 1;
        }

        // Remove small regions
        for i in 0..region_count {
            let region = &regions[i];
            if region.span_count > 0
                && region.span_count < min_region_area
                && !region.connects_to_border
            {
                let id = region.id;
                for other in regions.iter_mut() {
                    if other.id == id {
                        other.id = 0;
                    }
                }
            }
        }

        *max_region_id = compress_region_ids(&mut regions);
        remap_regions(&regions, src_reg);
    }

    /// Paints every walkable span in the rectangle with `region`.
    pub(crate) fn paint_rect_region(
        &self,
        (min_x, max_x): (u16, u16),
        (min_z, max_z): (u16, u16),
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                for i in self.cell_at(x, z).index_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    /// Paints the four border rectangles of width `border_size` with border regions.
    /// Returns the next free region id.
    pub(crate) fn paint_border_regions(&self, border_size: u16, src_reg: &mut [RegionId]) -> u16 {
        let mut region_id = 1;
        if border_size == 0 {
            return region_id;
        }
        // Make sure border will not overflow.
        let border_width = border_size.min(self.width);
        let border_height = border_size.min(self.height);
        let (w, h) = (self.width, self.height);
        let rects = [
            ((0, border_width), (0, h)),
            ((w - border_width, w), (0, h)),
            ((0, w), (0, border_height)),
            ((0, w), (h - border_height, h)),
        ];
        for (x_range, z_range) in rects {
            self.paint_rect_region(
                x_range,
                z_range,
                RegionId::from(region_id) | RegionId::BORDER_REGION,
                src_reg,
            );
            region_id += 1;
        }
        region_id
    }

    fn is_solid_edge(&self, src_reg: &[RegionId], x: i32, z: i32, i: usize, dir: u8) -> bool {
        let neighbor_region = self
            .neighbor_index(x, z, i, dir)
            .map(|ai| src_reg[ai])
            .unwrap_or(RegionId::NONE);
        neighbor_region != src_reg[i]
    }

    /// Walks the boundary of the region of span `i` clockwise, starting with
    /// the solid edge in direction `dir`. Returns the neighboring regions along the way.
    fn walk_contour(
        &self,
        mut x: i32,
        mut z: i32,
        mut i: usize,
        mut dir: u8,
        src_reg: &[RegionId],
    ) -> Vec<u16> {
        let start_dir = dir;
        let start_i = i;

        let region_across = |x: i32, z: i32, i: usize, dir: u8| {
            self.neighbor_index(x, z, i, dir)
                .map(|ai| src_reg[ai].bits())
                .unwrap_or(0)
        };

        let mut current_region = region_across(x, z, i, dir);
        let mut contour = vec![current_region];

        for _ in 1..40_000 {
            if self.is_solid_edge(src_reg, x, z, i, dir) {
                // Choose the edge corner
                let region = region_across(x, z, i, dir);
                if region != current_region {
                    current_region = region;
                    contour.push(current_region);
                }
                // Rotate CW
                dir = (dir + 1) & 0x3;
            } else {
                let Some(con) = self.spans[i].con(dir) else {
                    // Should not happen.
                    return contour;
                };
                let (nx, nz, ni) = self.con_indices(x, z, dir, con);
                x = nx;
                z = nz;
                i = ni;
                // Rotate CCW
                dir = (dir + 3) & 0x3;
            }

            if start_i == i && start_dir == dir {
                break;
            }
        }

        // Remove adjacent duplicates.
        if contour.len() > 1 {
            let mut j = 0;
            while j < contour.len() {
                let nj = (j + 1) % contour.len();
                if contour[j] == contour[nj] {
                    contour.remove(j);
                } else {
                    j += 1;
                }
            }
        }
        contour
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec3, Vec3A};

    use crate::{Aabb3d, HeightfieldBuilder};

    use super::*;

    #[test]
    fn border_flag_is_separate_from_id() {
        let region = RegionId::from(3) | RegionId::BORDER_REGION;
        assert!(region.is_border());
        assert_eq!(region.id(), 3);
        assert!(!RegionId::from(3).is_border());
        assert_eq!(RegionId::default(), RegionId::NONE);
    }

    #[test]
    fn merging_splices_contours() {
        let mut regions: Vec<Region> = (0..3).map(Region::new).collect();
        regions[1].connections = vec![0, 2];
        regions[1].span_count = 5;
        regions[2].connections = vec![1, 0];
        regions[2].span_count = 3;
        assert!(merge_regions(&mut regions, 1, 2));
        assert_eq!(regions[1].span_count, 8);
        assert_eq!(regions[2].span_count, 0);
        assert!(regions[2].connections.is_empty());
        assert_eq!(regions[1].connections, vec![0]);
    }

    #[test]
    fn regions_with_different_areas_cannot_merge() {
        let mut a = Region::new(1);
        let mut b = Region::new(2);
        a.connections = vec![2];
        b.connections = vec![1];
        a.area_type = AreaType(1);
        b.area_type = AreaType(1);
        assert!(a.can_merge_with(&b));
        b.area_type = AreaType(2);
        assert!(!a.can_merge_with(&b));
    }

    #[test]
    fn stacked_regions_cannot_merge() {
        let mut a = Region::new(1);
        let b = Region::new(2);
        a.floors.push(2);
        assert!(!a.can_merge_with(&b));
    }

    #[test]
    fn discarding_keeps_ids_dense() {
        let mut src_reg: Vec<RegionId> = [0, 1, 2, 3, 2, 0x8001]
            .into_iter()
            .map(RegionId::from)
            .collect();
        let mut max_region_id = 3;
        discard_regions(&[2], &mut max_region_id, &mut src_reg);
        assert_eq!(max_region_id, 2);
        let ids: Vec<u16> = src_reg.iter().map(|region| region.bits()).collect();
        assert_eq!(ids, vec![0, 1, 0, 2, 0, 0x8001]);
    }

    /// Two floors at `y = 1` and `y = 10` over a 4x4 grid.
    fn stacked_floors() -> CompactHeightfield {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3::ZERO, Vec3::new(4.0, 20.0, 4.0)),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        for y in [1.0, 10.0] {
            let a = Vec3A::new(0.0, y, 0.0);
            let b = Vec3A::new(0.0, y, 4.0);
            let c = Vec3A::new(4.0, y, 4.0);
            let d = Vec3A::new(4.0, y, 0.0);
            for triangle in [[a, b, c], [a, c, d]] {
                heightfield
                    .rasterize_triangle(triangle, AreaType(1), 1)
                    .unwrap();
            }
        }
        heightfield.into_compact(2, 1).unwrap()
    }

    #[test]
    fn splitting_gives_every_column_at_most_one_span_per_region() {
        let compact = stacked_floors();
        let mut src_reg = vec![RegionId::from(1); compact.spans.len()];
        let mut max_region_id = 1;
        compact
            .split_overlapping_regions(&[1], &mut max_region_id, &mut src_reg)
            .unwrap();
        assert_eq!(max_region_id, 2);

        let (lower, upper) = (RegionId::from(1), RegionId::from(2));
        for z in 0..4 {
            for x in 0..4 {
                let cell = compact.cell_at(x, z);
                assert_eq!(cell.count(), 2);
                let i = cell.index() as usize;
                assert_eq!((src_reg[i], src_reg[i + 1]), (lower, upper), "({x}, {z})");
            }
        }
    }

    #[test]
    fn stacked_region_is_repaired() {
        let compact = stacked_floors();
        let mut src_reg = vec![RegionId::from(1); compact.spans.len()];
        let mut max_region_id = 1;
        compact
            .merge_and_filter_simple_regions(0, 0, &mut max_region_id, &mut src_reg)
            .unwrap();
        assert_eq!(max_region_id, 2);
        let i = compact.cell_at(2, 2).index() as usize;
        let mut pair = [src_reg[i].bits(), src_reg[i + 1].bits()];
        pair.sort();
        assert_eq!(pair, [1, 2]);
    }

    #[test]
    fn compression_makes_ids_dense() {
        let mut regions: Vec<Region> = (0..5).map(Region::new).collect();
        regions[2].id = 0;
        regions[4].id = 3;
        let max = compress_region_ids(&mut regions);
        assert_eq!(max, 2);
        let ids: Vec<_> = regions.iter().map(|region| region.id).collect();
        assert_eq!(ids, vec![0, 1, 0, 2, 2]);
    }
}
