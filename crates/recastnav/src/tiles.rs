//! Splitting a build into a grid of independent tiles that are built in parallel.

use std::panic::{self, AssertUnwindSafe};

use glam::UVec3;
use thiserror::Error;
use tracing::{debug_span, warn};

use crate::{
    Aabb3d, AreaType, Navmesh, NavmeshBuildError, NavmeshConfig, TriMesh,
    main_api::{build_navmesh_from_compact, compact_heightfield_from_triangles},
    math::TriangleVertices as _,
};

/// Number of tiles along x and z needed to cover `aabb` with tiles of `tile_size` cells.
pub fn tile_count(aabb: &Aabb3d, cell_size: f32, tile_size: u16) -> (u32, u32) {
    if tile_size == 0 {
        return (0, 0);
    }
    let ts = tile_size as u32;
    let grid_width = ((aabb.max.x - aabb.min.x) / cell_size + 0.5) as u32;
    let grid_height = ((aabb.max.z - aabb.min.z) / cell_size + 0.5) as u32;
    (grid_width.div_ceil(ts), grid_height.div_ceil(ts))
}

/// Why a tile is missing from a [`TileGrid`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TileBuildError {
    /// A pipeline stage failed.
    #[error("Failed to build tile ({x}, {z})")]
    Build {
        /// The tile's x-coordinate in the grid.
        x: u32,
        /// The tile's z-coordinate in the grid.
        z: u32,
        /// The failing stage's error.
        #[source]
        source: NavmeshBuildError,
    },
    /// The worker building the tile panicked.
    #[error("Worker panicked while building tile ({x}, {z})")]
    Panicked {
        /// The tile's x-coordinate in the grid.
        x: u32,
        /// The tile's z-coordinate in the grid.
        z: u32,
    },
}

impl NavmeshConfig {
    /// The configuration for the tile at `(x, z)`.
    ///
    /// The tile covers `tile_size` cells on each axis plus [`NavmeshConfig::border_size`] cells
    /// on every side, and the full height of [`NavmeshConfig::aabb`].
    pub fn tile_config(&self, x: u32, z: u32) -> NavmeshConfig {
        let tile_world_size = self.tile_size as f32 * self.cell_size;
        let border = self.border_size as f32 * self.cell_size;
        let mut aabb = self.aabb;
        aabb.min.x = self.aabb.min.x + x as f32 * tile_world_size - border;
        aabb.min.z = self.aabb.min.z + z as f32 * tile_world_size - border;
        aabb.max.x = self.aabb.min.x + (x + 1) as f32 * tile_world_size + border;
        aabb.max.z = self.aabb.min.z + (z + 1) as f32 * tile_world_size + border;
        let size = self.tile_size + self.border_size * 2;
        NavmeshConfig {
            width: size,
            height: size,
            aabb,
            ..self.clone()
        }
    }
}

/// The navmeshes of all tiles covering a configuration's AABB.
///
/// A tile without walkable geometry is an `Ok` with an empty [`Navmesh`];
/// a tile whose build failed is an `Err`.
#[derive(Debug, Clone)]
pub struct TileGrid {
    /// Number of tiles along the x-axis.
    pub tiles_x: u32,
    /// Number of tiles along the z-axis.
    pub tiles_z: u32,
    /// The build results, row-major: tile `(x, z)` is at `x + z * tiles_x`.
    pub tiles: Vec<Result<Navmesh, TileBuildError>>,
}

impl TileGrid {
    /// Builds every tile of `config` from `trimesh` on a pool of `threads` workers.
    ///
    /// Triangle slopes are classified once, then every tile rasterizes only the triangles
    /// overlapping it. Returns once all tiles are done. Zero threads lets rayon pick the number.
    /// The result does not depend on the number of threads.
    pub fn build(trimesh: &TriMesh, config: &NavmeshConfig, threads: usize) -> Self {
        let (tiles_x, tiles_z) = tile_count(&config.aabb, config.cell_size, config.tile_size);
        let _span = debug_span!("build_tiles", tiles_x, tiles_z, threads).entered();
        let areas = trimesh.walkable_area_types(config.walkable_slope_angle, config.walkable_area);
        let areas = areas.as_slice();

        let tile_count = tiles_x as usize * tiles_z as usize;
        let mut slots: Vec<Option<Result<Navmesh, TileBuildError>>> =
            (0..tile_count).map(|_| None).collect();
        let position = |index: usize| {
            let index = index as u32;
            (index % tiles_x, index / tiles_x)
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build();
        match pool {
            Ok(pool) => {
                pool.scope(|s| {
                    for (index, slot) in slots.iter_mut().enumerate() {
                        let (x, z) = position(index);
                        s.spawn(move |_| {
                            *slot = Some(build_tile(trimesh, areas, config, x, z));
                        });
                    }
                });
            }
            Err(err) => {
                warn!("Failed to create thread pool: {err}, building tiles on the current thread");
                for (index, slot) in slots.iter_mut().enumerate() {
                    let (x, z) = position(index);
                    *slot = Some(build_tile(trimesh, areas, config, x, z));
                }
            }
        }

        let tiles = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let (x, z) = position(index);
                    Err(TileBuildError::Panicked { x, z })
                })
            })
            .collect();
        Self {
            tiles_x,
            tiles_z,
            tiles,
        }
    }

    /// The build result of the tile at `(x, z)`, or `None` if it lies outside the grid.
    pub fn tile(&self, x: u32, z: u32) -> Option<&Result<Navmesh, TileBuildError>> {
        if x >= self.tiles_x || z >= self.tiles_z {
            return None;
        }
        self.tiles.get((x + z * self.tiles_x) as usize)
    }

    /// The tiles that failed to build.
    pub fn failures(&self) -> impl Iterator<Item = &TileBuildError> {
        self.tiles.iter().filter_map(|tile| tile.as_ref().err())
    }
}

/// The triangles whose xz bounds touch `bounds`, with their areas.
///
/// Triangles referencing missing vertices are kept, as is everything if the area count
/// doesn't match, so that rasterization reports the problem.
fn triangles_overlapping(
    trimesh: &TriMesh,
    areas: &[AreaType],
    bounds: &Aabb3d,
) -> (Vec<UVec3>, Vec<AreaType>) {
    if areas.len() != trimesh.indices.len() {
        return (trimesh.indices.clone(), areas.to_vec());
    }
    let bounds = bounds.xz();
    trimesh
        .indices
        .iter()
        .zip(areas)
        .filter(|(triangle, _)| {
            let vertex = |i: usize| trimesh.vertices.get(triangle[i] as usize).copied();
            match (vertex(0), vertex(1), vertex(2)) {
                (Some(a), Some(b), Some(c)) => [a, b, c].aabb().xz().intersects(&bounds),
                _ => true,
            }
        })
        .map(|(triangle, area)| (*triangle, *area))
        .unzip()
}

fn build_tile(
    trimesh: &TriMesh,
    areas: &[AreaType],
    config: &NavmeshConfig,
    x: u32,
    z: u32,
) -> Result<Navmesh, TileBuildError> {
    let _span = debug_span!("build_tile", x, z).entered();
    let tile_config = config.tile_config(x, z);
    let build = || {
        let (indices, areas) = triangles_overlapping(trimesh, areas, &tile_config.aabb);
        let mut compact =
            compact_heightfield_from_triangles(&trimesh.vertices, &indices, &areas, &tile_config)?;
        build_navmesh_from_compact(&mut compact, &tile_config)
    };
    match panic::catch_unwind(AssertUnwindSafe(build)) {
        Ok(Ok(navmesh)) => {
            tracing::debug!(
                polygons = navmesh.polygon_mesh.polygon_count(),
                "Built tile"
            );
            Ok(navmesh)
        }
        Ok(Err(source)) => {
            warn!("Failed to build tile ({x}, {z}): {source}");
            Err(TileBuildError::Build { x, z, source })
        }
        Err(_) => {
            tracing::error!("Worker panicked while building tile ({x}, {z})");
            Err(TileBuildError::Panicked { x, z })
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec3, Vec3A};

    use crate::NavmeshConfigBuilder;

    use super::*;

    #[test]
    fn tile_count_rounds_up() {
        let aabb = Aabb3d::new(Vec3::ZERO, Vec3::new(10.0, 1.0, 4.5));
        assert_eq!(tile_count(&aabb, 0.5, 8), (3, 2));
        assert_eq!(tile_count(&aabb, 0.5, 20), (1, 1));
        assert_eq!(tile_count(&aabb, 0.5, 0), (0, 0));
    }

    #[test]
    fn tiles_only_see_overlapping_triangles() {
        let mut trimesh = TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, 1.0),
                Vec3A::new(1.0, 0.0, 0.0),
                Vec3A::new(10.0, 0.0, 10.0),
                Vec3A::new(10.0, 0.0, 11.0),
                Vec3A::new(11.0, 0.0, 10.0),
            ],
            vec![UVec3::new(0, 1, 2), UVec3::new(3, 4, 5), UVec3::new(3, 4, 77)],
        );
        trimesh.area_types = vec![AreaType(1), AreaType(2), AreaType(3)];
        let areas = trimesh.area_types.clone();
        let bounds = Aabb3d::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(2.0, 1.0, 2.0));

        let (indices, areas) = triangles_overlapping(&trimesh, &areas, &bounds);
        assert_eq!(indices, [UVec3::new(0, 1, 2), UVec3::new(3, 4, 77)]);
        assert_eq!(areas, [AreaType(1), AreaType(3)]);

        let (indices, _) = triangles_overlapping(&trimesh, &[AreaType(1)], &bounds);
        assert_eq!(indices.len(), 3);
    }

    #[test]
    fn tile_config_covers_tile_and_border() {
        let config = NavmeshConfigBuilder {
            aabb: Aabb3d::new(Vec3::ZERO, Vec3::new(20.0, 2.0, 20.0)),
            cell_size: 0.5,
            agent_radius: 1.0,
            tile_size: 10,
            tiling: true,
            ..Default::default()
        }
        .build();
        assert_eq!(config.border_size, 5);

        let tile = config.tile_config(1, 2);
        assert_eq!(tile.aabb.min, Vec3::new(2.5, 0.0, 7.5));
        assert_eq!(tile.aabb.max, Vec3::new(12.5, 2.0, 17.5));
        assert_eq!(tile.width, 20);
        assert_eq!(tile.height, 20);
    }
}
