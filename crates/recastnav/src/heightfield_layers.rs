//! Heightfield layers: the walkable spans of a tile split into 2D layers that never overlap themselves.
//! Each layer stores one floor height per cell, which makes them cheap to store and to rebuild
//! a navmesh from when obstacles change.

use std::collections::VecDeque;

use thiserror::Error;

use crate::{Aabb3d, AreaType, CompactHeightfield, CompactSpan};

/// The largest number of layers a single cell may be part of.
const MAX_LAYERS: usize = CompactSpan::NOT_CONNECTED as usize;
const MAX_NEIGHBORS: usize = 16;
const MAX_STACK: usize = 64;
/// Sweep region id of a span that belongs to no region.
const NO_REGION: u8 = 0xff;

/// A set of [`HeightfieldLayer`]s built from one compact heightfield.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct HeightfieldLayerSet {
    /// The layers, ordered by layer id.
    pub layers: Vec<HeightfieldLayer>,
}

/// A 2D layer of walkable cells. Every cell holds at most one span.
///
/// The layer covers the compact heightfield without its border.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct HeightfieldLayer {
    /// The bounding box of the layer in world space.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the layer along the x-axis in cells.
    pub width: u16,
    /// The height of the layer along the z-axis in cells.
    pub height: u16,
    /// The minimum x-coordinate of the cells that are part of the layer.
    pub min_x: u16,
    /// The maximum x-coordinate of the cells that are part of the layer.
    pub max_x: u16,
    /// The minimum z-coordinate of the cells that are part of the layer.
    pub min_z: u16,
    /// The maximum z-coordinate of the cells that are part of the layer.
    pub max_z: u16,
    /// The lowest floor of the layer, in voxels above the heightfield's base.
    pub min_height: u16,
    /// The highest floor of the layer, in voxels above the heightfield's base.
    pub max_height: u16,
    /// Floor height per cell relative to [`Self::min_height`], or `0xff` for cells outside the layer.
    pub heights: Vec<u8>,
    /// Area per cell.
    pub areas: Vec<AreaType>,
    /// Per cell, the portal mask in the upper and the connection mask in the lower four bits.
    /// Bit `dir` of either mask refers to the neighbor in that direction.
    pub connections: Vec<u8>,
}

impl HeightfieldLayer {
    /// Directions in which the cell at `(x, z)` borders a walkable span of a different layer.
    #[inline]
    pub fn portal_mask(&self, x: u16, z: u16) -> u8 {
        self.connections[self.index(x, z)] >> 4
    }

    /// Directions in which the cell at `(x, z)` connects to a cell of the same layer.
    #[inline]
    pub fn connection_mask(&self, x: u16, z: u16) -> u8 {
        self.connections[self.index(x, z)] & 0xf
    }

    #[inline]
    fn index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }
}

/// Errors that can occur while building [`HeightfieldLayerSet`]s.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeightfieldLayerError {
    /// More than 255 sweep regions were needed.
    #[error("Layer region id overflow")]
    RegionIdOverflow,
    /// Too many walkable platforms overlap each other.
    #[error("Layer overflow, more than {MAX_LAYERS} walkable platforms overlap")]
    TooManyLayers,
}

#[derive(Debug, Clone)]
struct LayerRegion {
    /// Regions overlapping this one in at least one cell.
    layers: Vec<u8>,
    neighbors: Vec<u8>,
    ymin: u16,
    ymax: u16,
    layer_id: u8,
    /// Whether the region is the base of merged regions.
    base: bool,
}

impl Default for LayerRegion {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            neighbors: Vec::new(),
            ymin: u16::MAX,
            ymax: 0,
            layer_id: NO_REGION,
            base: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LayerSweepSpan {
    sample_count: u16,
    id: u8,
    neighbor: u8,
}

/// Adds `value` to `values` unless present. Returns `false` if there was no room for it.
fn add_unique(values: &mut Vec<u8>, max: usize, value: u8) -> bool {
    if values.contains(&value) {
        return true;
    }
    if values.len() >= max {
        return false;
    }
    values.push(value);
    true
}

#[inline]
fn overlap_range(amin: u16, amax: u16, bmin: u16, bmax: u16) -> bool {
    !(amin > bmax || amax < bmin)
}

impl CompactHeightfield {
    /// Builds layers from the walkable spans.
    ///
    /// `border_size` cells on each side are left out of the layers. Regions whose floors lie within
    /// `4 * walkable_height` of each other are merged into one layer as long as they don't overlap.
    pub fn build_heightfield_layers(
        &self,
        border_size: u16,
        walkable_height: u16,
    ) -> Result<HeightfieldLayerSet, HeightfieldLayerError> {
        let w = self.width;
        let h = self.height;

        let (src_reg, region_count) = self.sweep_layer_regions(border_size)?;
        let mut regs = vec![LayerRegion::default(); region_count];

        // Find region neighbours and overlapping regions.
        let mut lregs = Vec::with_capacity(MAX_LAYERS);
        for z in 0..h {
            for x in 0..w {
                lregs.clear();
                for i in self.cell_at(x, z).index_range() {
                    let s = &self.spans[i];
                    let ri = src_reg[i];
                    if ri == NO_REGION {
                        continue;
                    }
                    let reg = &mut regs[ri as usize];
                    reg.ymin = reg.ymin.min(s.y);
                    reg.ymax = reg.ymax.max(s.y);

                    // Collect all region layers.
                    if lregs.len() < MAX_LAYERS {
                        lregs.push(ri);
                    }

                    // Update neighbours
                    for dir in 0..4 {
                        let Some(con) = s.con(dir) else {
                            continue;
                        };
                        let (_, _, ai) = self.con_indices(x as i32, z as i32, dir, con);
                        let rai = src_reg[ai];
                        if rai != NO_REGION && rai != ri {
                            // A full neighbor list only leads to a few more layers.
                            add_unique(&mut regs[ri as usize].neighbors, MAX_NEIGHBORS, rai);
                        }
                    }
                }

                // Update overlapping regions.
                for (i, a) in lregs.iter().enumerate() {
                    for b in &lregs[i + 1..] {
                        if a == b {
                            continue;
                        }
                        if !add_unique(&mut regs[*a as usize].layers, MAX_LAYERS, *b)
                            || !add_unique(&mut regs[*b as usize].layers, MAX_LAYERS, *a)
                        {
                            tracing::error!(
                                "Layer overflow (too many overlapping walkable platforms)"
                            );
                            return Err(HeightfieldLayerError::TooManyLayers);
                        }
                    }
                }
            }
        }

        // Create 2D layers from regions.
        let mut layer_id: u8 = 0;
        let mut stack = VecDeque::with_capacity(MAX_STACK);
        for i in 0..regs.len() {
            // Skip already visited.
            if regs[i].layer_id != NO_REGION {
                continue;
            }
            // Start search.
            regs[i].layer_id = layer_id;
            regs[i].base = true;

            stack.clear();
            stack.push_back(i);
            while let Some(current) = stack.pop_front() {
                let neighbors = regs[current].neighbors.clone();
                for nei in neighbors {
                    let nei = nei as usize;
                    // Skip already visited.
                    if regs[nei].layer_id != NO_REGION {
                        continue;
                    }
                    // Skip if the neighbour is overlapping root region.
                    if regs[i].layers.contains(&(nei as u8)) {
                        continue;
                    }
                    // Skip if the height range would become too large.
                    let ymin = regs[i].ymin.min(regs[nei].ymin);
                    let ymax = regs[i].ymax.max(regs[nei].ymax);
                    if ymax - ymin >= 255 {
                        continue;
                    }
                    if stack.len() >= MAX_STACK {
                        continue;
                    }
                    // Deepen
                    stack.push_back(nei);
                    // Mark layer id
                    regs[nei].layer_id = layer_id;
                    // Merge current layers to root.
                    let layers = regs[nei].layers.clone();
                    for layer in layers {
                        if !add_unique(&mut regs[i].layers, MAX_LAYERS, layer) {
                            tracing::error!(
                                "Layer overflow (too many overlapping walkable platforms)"
                            );
                            return Err(HeightfieldLayerError::TooManyLayers);
                        }
                    }
                    regs[i].ymin = ymin;
                    regs[i].ymax = ymax;
                }
            }
            layer_id = layer_id.wrapping_add(1);
        }

        // Merge non-overlapping regions that are close in height.
        let merge_height = walkable_height.saturating_mul(4);
        for i in 0..regs.len() {
            if !regs[i].base {
                continue;
            }
            let new_id = regs[i].layer_id;
            loop {
                let ri = &regs[i];
                let candidate = regs.iter().enumerate().find(|(j, rj)| {
                    if *j == i || !rj.base {
                        return false;
                    }
                    // Skip if the regions are not close to each other.
                    if !overlap_range(
                        ri.ymin,
                        ri.ymax.saturating_add(merge_height),
                        rj.ymin,
                        rj.ymax.saturating_add(merge_height),
                    ) {
                        return false;
                    }
                    // Skip if the height range would become too large.
                    let ymin = ri.ymin.min(rj.ymin);
                    let ymax = ri.ymax.max(rj.ymax);
                    if ymax - ymin >= 255 {
                        return false;
                    }
                    // Make sure that there is no overlap when merging 'ri' and 'rj'.
                    // Index to 'regs' is the same as region id.
                    !regs.iter().enumerate().any(|(k, rk)| {
                        rk.layer_id == rj.layer_id && ri.layers.contains(&(k as u8))
                    })
                });
                // Could not find anything to merge with, stop.
                let Some((_, rj)) = candidate else {
                    break;
                };
                let old_id = rj.layer_id;

                // Merge
                for j in 0..regs.len() {
                    if regs[j].layer_id != old_id {
                        continue;
                    }
                    regs[j].base = false;
                    // Remap layer ids.
                    regs[j].layer_id = new_id;
                    // Add overlaid layers from 'rj' to 'ri'.
                    let layers = regs[j].layers.clone();
                    for layer in layers {
                        if !add_unique(&mut regs[i].layers, MAX_LAYERS, layer) {
                            tracing::error!(
                                "Layer overflow (too many overlapping walkable platforms)"
                            );
                            return Err(HeightfieldLayerError::TooManyLayers);
                        }
                    }
                    // Update height bounds.
                    regs[i].ymin = regs[i].ymin.min(regs[j].ymin);
                    regs[i].ymax = regs[i].ymax.max(regs[j].ymax);
                }
            }
        }

        // Compact layer ids
        let mut remap = [NO_REGION; 256];
        for reg in &regs {
            remap[reg.layer_id as usize] = 0;
        }
        let mut layer_count: u8 = 0;
        for id in remap.iter_mut() {
            if *id == 0 {
                *id = layer_count;
                layer_count = layer_count.wrapping_add(1);
            }
        }
        for reg in &mut regs {
            reg.layer_id = remap[reg.layer_id as usize];
        }

        let mut layer_set = HeightfieldLayerSet::default();
        // No layers, return empty.
        if layer_count == 0 {
            return Ok(layer_set);
        }

        let lw = w.saturating_sub(border_size * 2);
        let lh = h.saturating_sub(border_size * 2);

        // Build contracted bbox for layers.
        let mut aabb = self.aabb;
        let border = border_size as f32 * self.cell_size;
        aabb.min.x += border;
        aabb.min.z += border;
        aabb.max.x -= border;
        aabb.max.z -= border;

        let grid_size = lw as usize * lh as usize;
        for cur_id in 0..layer_count {
            // Find layer height bounds.
            let (hmin, hmax) = regs
                .iter()
                .filter(|reg| reg.base && reg.layer_id == cur_id)
                .last()
                .map_or((0, 0), |reg| (reg.ymin, reg.ymax));

            let mut layer = HeightfieldLayer {
                aabb,
                cell_size: self.cell_size,
                cell_height: self.cell_height,
                width: lw,
                height: lh,
                min_x: lw,
                max_x: 0,
                min_z: lh,
                max_z: 0,
                min_height: hmin,
                max_height: hmax,
                heights: vec![0xff; grid_size],
                areas: vec![AreaType::NOT_WALKABLE; grid_size],
                connections: vec![0; grid_size],
            };
            // Adjust the bbox to fit the heightfield.
            layer.aabb.min.y = aabb.min.y + hmin as f32 * self.cell_height;
            layer.aabb.max.y = aabb.min.y + hmax as f32 * self.cell_height;

            // Copy height and area from compact heightfield.
            for z in 0..lh {
                for x in 0..lw {
                    let cx = border_size + x;
                    let cz = border_size + z;
                    for j in self.cell_at(cx, cz).index_range() {
                        let s = &self.spans[j];
                        // Skip unassigned regions.
                        if src_reg[j] == NO_REGION {
                            continue;
                        }
                        // Skip if it does not belong to the current layer.
                        let lid = regs[src_reg[j] as usize].layer_id;
                        if lid != cur_id {
                            continue;
                        }

                        // Update data bounds.
                        layer.min_x = layer.min_x.min(x);
                        layer.max_x = layer.max_x.max(x);
                        layer.min_z = layer.min_z.min(z);
                        layer.max_z = layer.max_z.max(z);

                        // Store height and area type.
                        let idx = x as usize + z as usize * lw as usize;
                        layer.heights[idx] = s.y.saturating_sub(hmin).min(0xff) as u8;
                        layer.areas[idx] = self.areas[j];

                        // Check connection.
                        let mut portal = 0_u8;
                        let mut con_mask = 0_u8;
                        for dir in 0..4 {
                            let Some(con) = s.con(dir) else {
                                continue;
                            };
                            let (ax, az, ai) = self.con_indices(cx as i32, cz as i32, dir, con);
                            if !self.areas[ai].is_walkable() {
                                continue;
                            }
                            let alid = if src_reg[ai] != NO_REGION {
                                regs[src_reg[ai] as usize].layer_id
                            } else {
                                NO_REGION
                            };
                            if lid != alid {
                                // Portal mask
                                portal |= 1 << dir;
                                // Update height so that it matches on both sides of the portal.
                                let neighbor_y = self.spans[ai].y;
                                if neighbor_y > hmin {
                                    let neighbor_height = (neighbor_y - hmin).min(0xff) as u8;
                                    layer.heights[idx] = layer.heights[idx].max(neighbor_height);
                                }
                            } else {
                                // Valid connection mask
                                let nx = ax - border_size as i32;
                                let nz = az - border_size as i32;
                                if nx >= 0 && nz >= 0 && nx < lw as i32 && nz < lh as i32 {
                                    con_mask |= 1 << dir;
                                }
                            }
                        }
                        layer.connections[idx] = (portal << 4) | con_mask;
                    }
                }
            }

            if layer.min_x > layer.max_x {
                layer.min_x = 0;
                layer.max_x = 0;
            }
            if layer.min_z > layer.max_z {
                layer.min_z = 0;
                layer.max_z = 0;
            }
            layer_set.layers.push(layer);
        }

        tracing::debug!(layers = layer_set.layers.len(), "Built heightfield layers");
        Ok(layer_set)
    }

    /// Partitions the walkable spans inside the border into monotone sweep regions.
    /// Returns the region per span and the number of regions.
    fn sweep_layer_regions(
        &self,
        border_size: u16,
    ) -> Result<(Vec<u8>, usize), HeightfieldLayerError> {
        let w = self.width;
        let h = self.height;
        let mut src_reg = vec![NO_REGION; self.spans.len()];
        let mut sweeps: Vec<LayerSweepSpan> = Vec::with_capacity(w as usize);
        let mut prev_count = [0_u16; 256];
        let mut reg_id: u16 = 0;

        for z in border_size..h.saturating_sub(border_size) {
            prev_count[..reg_id as usize].fill(0);
            sweeps.clear();

            for x in border_size..w.saturating_sub(border_size) {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() {
                        continue;
                    }
                    let s = &self.spans[i];

                    // -x
                    let mut sid = NO_REGION;
                    if let Some(con) = s.con(0) {
                        let (_, _, ai) = self.con_indices(x as i32, z as i32, 0, con);
                        if self.areas[ai].is_walkable() && src_reg[ai] != NO_REGION {
                            sid = src_reg[ai];
                        }
                    }
                    if sid == NO_REGION {
                        if sweeps.len() >= NO_REGION as usize {
                            return Err(HeightfieldLayerError::RegionIdOverflow);
                        }
                        sid = sweeps.len() as u8;
                        sweeps.push(LayerSweepSpan {
                            sample_count: 0,
                            id: 0,
                            neighbor: NO_REGION,
                        });
                    }

                    // -z
                    if let Some(con) = s.con(3) {
                        let (_, _, ai) = self.con_indices(x as i32, z as i32, 3, con);
                        let nr = src_reg[ai];
                        if nr != NO_REGION {
                            let sweep = &mut sweeps[sid as usize];
                            // Set neighbour when first valid neighbour is encountered.
                            if sweep.sample_count == 0 {
                                sweep.neighbor = nr;
                            }
                            if sweep.neighbor == nr {
                                // Update existing neighbour
                                sweep.sample_count += 1;
                                prev_count[nr as usize] += 1;
                            } else {
                                // More than one neighbour, invalidate it.
                                sweep.neighbor = NO_REGION;
                            }
                        }
                    }
                    src_reg[i] = sid;
                }
            }

            // Create unique ID.
            for sweep in &mut sweeps {
                // If the neighbour is set and there is only one continuous connection to it,
                // the sweep will be merged with the previous one, else new region is created.
                if sweep.neighbor != NO_REGION
                    && prev_count[sweep.neighbor as usize] == sweep.sample_count
                {
                    sweep.id = sweep.neighbor;
                } else {
                    if reg_id == NO_REGION as u16 {
                        tracing::error!("Layer region id overflow");
                        return Err(HeightfieldLayerError::RegionIdOverflow);
                    }
                    sweep.id = reg_id as u8;
                    reg_id += 1;
                }
            }

            // Remap local sweep ids to region ids.
            for x in border_size..w.saturating_sub(border_size) {
                for i in self.cell_at(x, z).index_range() {
                    if src_reg[i] != NO_REGION {
                        src_reg[i] = sweeps[src_reg[i] as usize].id;
                    }
                }
            }
        }
        Ok((src_reg, reg_id as usize))
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use crate::{HeightfieldBuilder, distance_field::tests::flat_field};

    use super::*;

    #[test]
    fn flat_floor_is_a_single_layer() {
        let compact = flat_field(6).into_compact(2, 1).unwrap();
        let set = compact.build_heightfield_layers(0, 2).unwrap();
        assert_eq!(set.layers.len(), 1);
        let layer = &set.layers[0];
        assert_eq!((layer.width, layer.height), (6, 6));
        assert_eq!((layer.min_x, layer.max_x, layer.min_z, layer.max_z), (0, 5, 0, 5));
        assert!(layer.heights.iter().all(|h| *h == 0));
        assert!(layer.areas.iter().all(|a| *a == AreaType(1)));
        assert_eq!(layer.connection_mask(2, 2), 0xf);
        assert_eq!(layer.portal_mask(2, 2), 0);
        // -x and -z lead out of the field.
        assert_eq!(layer.connection_mask(0, 0), 0b0110);
    }

    #[test]
    fn border_cells_become_portals() {
        let compact = flat_field(8).into_compact(2, 1).unwrap();
        let set = compact.build_heightfield_layers(2, 2).unwrap();
        assert_eq!(set.layers.len(), 1);
        let layer = &set.layers[0];
        assert_eq!((layer.width, layer.height), (4, 4));
        assert_eq!(layer.aabb.min.x, 2.0);
        assert_eq!(layer.aabb.max.z, 6.0);
        assert_eq!(layer.connections[0], 0x96);
        assert_eq!(layer.connection_mask(1, 1), 0xf);
        assert_eq!(layer.portal_mask(1, 1), 0);
    }

    #[test]
    fn stacked_floors_become_separate_layers() {
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
        let compact = heightfield.into_compact(2, 1).unwrap();
        let set = compact.build_heightfield_layers(0, 2).unwrap();
        assert_eq!(set.layers.len(), 2);
        let (lower, upper) = (&set.layers[0], &set.layers[1]);
        assert!(lower.aabb.min.y < upper.aabb.min.y);
        for layer in &set.layers {
            assert!(layer.areas.iter().all(|a| a.is_walkable()));
            assert!(layer.connections.iter().all(|c| c >> 4 == 0));
        }
    }

    #[test]
    fn add_unique_respects_capacity() {
        let mut values = vec![1, 2];
        assert!(add_unique(&mut values, 3, 2));
        assert!(add_unique(&mut values, 3, 3));
        assert!(!add_unique(&mut values, 3, 4));
        assert_eq!(values, vec![1, 2, 3]);
    }
}
