use std::f32::consts::FRAC_PI_2;

use thiserror::Error;

use crate::{Aabb3d, AreaType, BuildContoursFlags, ConvexVolume, poly_mesh::MAX_VERTICES_PER_POLYGON};

/// Parameters for a complete navmesh build, in voxel units unless noted otherwise.
/// Usually created through a [`NavmeshConfigBuilder`], which derives the voxel values from agent dimensions.
///
/// Units are either voxels (vx) or world units (wu). The size of a voxel is given by
/// [`Self::cell_size`] on the xz-plane and [`Self::cell_height`] along the y-axis, so changing either
/// changes the meaning of every voxel-based parameter.
///
/// The configuration is not validated by the individual build stages.
/// Call [`NavmeshConfig::validate`] before building if the values come from an untrusted source.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// The width of the field along the x-axis. `[Limit: >= 0] [Units: vx]`
    pub width: u16,

    /// The height of the field along the z-axis. `[Limit: >= 0] [Units: vx]`
    pub height: u16,

    /// The width/height size of tiles on the xz-plane. `[Limit: >= 0] [Units: vx]`
    ///
    /// Only used when [`Self::tiling`] is set.
    pub tile_size: u16,

    /// The size of the non-navigable border around the heightfield. `[Limit: >=0] [Units: vx]`
    ///
    /// Tiles are rasterized with this much overlap so that their navmeshes line up at the seams.
    /// Zero for single-mesh builds.
    pub border_size: u16,

    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// Usually a half or a third of the agent radius. Smaller values give more detailed meshes,
    /// but the build time grows quickly while the visible gain shrinks.
    pub cell_size: f32,

    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// A good starting point is half of [`Self::cell_size`]. Lower it if curbs or stairs leave holes in the mesh.
    pub cell_height: f32,

    /// The field's AABB. `[Units: wu]`
    pub aabb: Aabb3d,

    /// The maximum slope that is considered walkable. `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    pub walkable_slope_angle: f32,

    /// Minimum floor to 'ceiling' height that will still allow the floor area to
    /// be considered walkable. `[Limit: >= 3] [Units: vx]`
    pub walkable_height: u16,

    /// Maximum ledge height that is considered to still be traversable. `[Limit: >=0] [Units: vx]`
    pub walkable_climb: u16,

    /// The distance to erode the walkable area away from obstructions. `[Limit: >=0] [Units: vx]`
    ///
    /// With a non-zero radius the agent only needs its center point inside the navmesh.
    /// A radius of zero allows sharing one mesh between agents of different sizes,
    /// at the cost of doing edge collision against the mesh at runtime.
    pub walkable_radius: u16,

    /// The maximum allowed length for contour edges along the border of the mesh. `[Limit: >=0] [Units: vx]`
    ///
    /// Long edges are split to avoid long thin triangles. Zero disables splitting.
    pub max_edge_len: u16,

    /// The maximum distance a simplified contour's border edges may deviate
    /// from the raw contour. `[Limit: >=0] [Units: vx]`
    ///
    /// Values between 1.1 and 1.5 work well. Lower values leave sawtooth edges,
    /// higher values start cutting corners.
    pub max_simplification_error: f32,

    /// The minimum number of spans a region needs to not be removed. `[Limit: >=0] [Units: vx]`
    ///
    /// Regions connected to the tile border are always kept.
    pub min_region_area: u16,

    /// Regions with fewer spans than this are merged into a neighbor if possible. `[Limit: >=0] [Units: vx]`
    pub merge_region_area: u16,

    /// The maximum number of vertices per polygon. `[Limit: 3..=6]`
    pub max_vertices_per_polygon: u16,

    /// The sampling distance used when generating the detail mesh. `[Limits: 0 or >= 0.9] [Units: wu]`
    ///
    /// Zero disables interior sampling.
    pub detail_sample_dist: f32,

    /// The maximum distance the detail mesh surface may deviate from the heightfield. `[Limit: >=0] [Units: wu]`
    pub detail_sample_max_error: f32,

    /// Which algorithm partitions the walkable spans into regions.
    pub partition_type: PartitionType,

    /// The area assigned to triangles whose slope is walkable.
    pub walkable_area: AreaType,

    /// Flags controlling the [`ContourSet`](crate::ContourSet) generation process.
    pub contour_flags: BuildContoursFlags,

    /// Volumes that stamp their area onto the spans inside them.
    pub area_volumes: Vec<ConvexVolume>,

    /// Whether the field is split into tiles of [`Self::tile_size`].
    pub tiling: bool,
}

/// The region partitioning algorithm.
///
/// - [`PartitionType::Watershed`] gives the nicest tessellation but is the slowest and needs a distance field.
/// - [`PartitionType::Monotone`] is the fastest and never produces holes, but leaves long thin polygons.
/// - [`PartitionType::Layers`] is in between and suits tiled meshes with small tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PartitionType {
    /// Watershed flooding of the distance field.
    #[default]
    Watershed,
    /// Row sweeps merged into monotone regions.
    Monotone,
    /// Row sweeps merged into non-overlapping layers.
    Layers,
}

/// Reasons a [`NavmeshConfig`] is rejected by [`NavmeshConfig::validate`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavmeshConfigError {
    /// The cell size or cell height is not positive.
    #[error("Cell size and cell height must be positive, got {cell_size} and {cell_height}")]
    NonPositiveCellSize {
        /// The configured cell size.
        cell_size: f32,
        /// The configured cell height.
        cell_height: f32,
    },
    /// The slope angle lies outside of `[0, π/2)`.
    #[error("Walkable slope angle must be in [0, π/2), got {0}")]
    SlopeOutOfRange(f32),
    /// An agent this short cannot be represented.
    #[error("Walkable height must be at least 3 voxels, got {0}")]
    WalkableHeightTooLow(u16),
    /// The polygon vertex limit is outside of what the polygon mesh supports.
    #[error("Max vertices per polygon must be in 3..={MAX_VERTICES_PER_POLYGON}, got {0}")]
    InvalidMaxVerticesPerPolygon(u16),
    /// Tiling is enabled with a tile size of zero.
    #[error("Tile size must be positive when tiling")]
    ZeroTileSize,
    /// The AABB is empty or inverted.
    #[error("The AABB must have a positive extent on the xz-plane")]
    EmptyAabb,
}

impl NavmeshConfig {
    /// Checks the preconditions the build stages rely on.
    pub fn validate(&self) -> Result<(), NavmeshConfigError> {
        if !(self.cell_size > 0.0 && self.cell_height > 0.0) {
            return Err(NavmeshConfigError::NonPositiveCellSize {
                cell_size: self.cell_size,
                cell_height: self.cell_height,
            });
        }
        if !(0.0..FRAC_PI_2).contains(&self.walkable_slope_angle) {
            return Err(NavmeshConfigError::SlopeOutOfRange(
                self.walkable_slope_angle,
            ));
        }
        if self.walkable_height < 3 {
            return Err(NavmeshConfigError::WalkableHeightTooLow(
                self.walkable_height,
            ));
        }
        if !(3..=MAX_VERTICES_PER_POLYGON as u16).contains(&self.max_vertices_per_polygon) {
            return Err(NavmeshConfigError::InvalidMaxVerticesPerPolygon(
                self.max_vertices_per_polygon,
            ));
        }
        if self.tiling && self.tile_size == 0 {
            return Err(NavmeshConfigError::ZeroTileSize);
        }
        if !(self.aabb.max.x > self.aabb.min.x && self.aabb.max.z > self.aabb.min.z) {
            return Err(NavmeshConfigError::EmptyAabb);
        }
        Ok(())
    }
}

/// A builder for [`NavmeshConfig`] taking agent-oriented parameters in world units.
///
/// The defaults describe a human-sized agent on a 0.3 by 0.2 voxel grid.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfigBuilder {
    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`
    pub cell_size: f32,
    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    pub cell_height: f32,
    /// The height of the agent. `[Limit: > 0] [Units: wu]`
    ///
    /// It's often a good idea to add a little bit of padding to the height.
    pub agent_height: f32,
    /// The radius of the agent. `[Limit: > 0] [Units: wu]`
    pub agent_radius: f32,
    /// The highest step the agent can climb. `[Limit: >= 0] [Units: wu]`
    pub agent_max_climb: f32,
    /// The steepest walkable slope. `[Units: Radians]`
    pub agent_max_slope: f32,
    /// Side length of the smallest region that is kept. `[Units: vx]`
    pub region_min_size: f32,
    /// Side length below which regions get merged into neighbors. `[Units: vx]`
    pub region_merge_size: f32,
    /// Maximum length of contour edges. `[Units: wu]`
    pub edge_max_len: f32,
    /// Maximum contour simplification error. `[Units: vx]`
    pub edge_max_error: f32,
    /// Maximum number of vertices per polygon.
    pub verts_per_poly: u16,
    /// Detail sample distance in cells. Values below 0.9 disable sampling.
    pub detail_sample_dist: f32,
    /// Maximum detail error in cell heights.
    pub detail_sample_max_error: f32,
    /// Tile size in cells.
    pub tile_size: u16,
    /// The world-space bounds to build in.
    pub aabb: Aabb3d,
    /// See [`NavmeshConfig::partition_type`].
    pub partition_type: PartitionType,
    /// See [`NavmeshConfig::walkable_area`].
    pub walkable_area: AreaType,
    /// See [`NavmeshConfig::contour_flags`].
    pub contour_flags: BuildContoursFlags,
    /// Whether to split the bounds into tiles.
    pub tiling: bool,
    /// See [`NavmeshConfig::area_volumes`].
    pub area_volumes: Vec<ConvexVolume>,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0_f32.to_radians(),
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            tile_size: 32,
            aabb: Aabb3d::default(),
            partition_type: PartitionType::default(),
            walkable_area: AreaType::DEFAULT_WALKABLE,
            contour_flags: BuildContoursFlags::default(),
            tiling: false,
            area_volumes: Vec::new(),
        }
    }
}

impl NavmeshConfigBuilder {
    /// Builds a [`NavmeshConfig`] from the current configuration.
    pub fn build(self) -> NavmeshConfig {
        let walkable_radius = (self.agent_radius / self.cell_size).ceil() as u16;
        let (width, height, border_size) = if self.tiling {
            // Reserve enough padding for the erosion and the contour walk at the seams.
            let border_size = walkable_radius + 3;
            let size = self.tile_size + border_size * 2;
            (size, size, border_size)
        } else {
            (
                ((self.aabb.max.x - self.aabb.min.x) / self.cell_size + 0.5) as u16,
                ((self.aabb.max.z - self.aabb.min.z) / self.cell_size + 0.5) as u16,
                0,
            )
        };
        NavmeshConfig {
            width,
            height,
            tile_size: self.tile_size,
            border_size,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            aabb: self.aabb,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / self.cell_height).ceil() as u16,
            walkable_climb: (self.agent_max_climb / self.cell_height).floor() as u16,
            walkable_radius,
            max_edge_len: (self.edge_max_len / self.cell_size) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as u16,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as u16,
            max_vertices_per_polygon: self.verts_per_poly,
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                self.cell_size * self.detail_sample_dist
            },
            detail_sample_max_error: self.cell_height * self.detail_sample_max_error,
            partition_type: self.partition_type,
            walkable_area: self.walkable_area,
            contour_flags: self.contour_flags,
            area_volumes: self.area_volumes,
            tiling: self.tiling,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn golden_builder() -> NavmeshConfigBuilder {
        NavmeshConfigBuilder {
            aabb: Aabb3d::new(Vec3::new(-30.0, -5.0, -15.0), Vec3::new(30.0, 10.0, 15.0)),
            ..Default::default()
        }
    }

    #[test]
    fn derives_voxel_units_from_agent() {
        let config = golden_builder().build();
        assert_eq!(config.walkable_height, 10);
        assert_eq!(config.walkable_climb, 4);
        assert_eq!(config.walkable_radius, 2);
        assert_eq!(config.max_edge_len, 40);
        assert_eq!(config.min_region_area, 64);
        assert_eq!(config.merge_region_area, 400);
        assert_eq!(config.width, 200);
        assert_eq!(config.height, 100);
        assert_eq!(config.border_size, 0);
        approx::assert_relative_eq!(config.detail_sample_dist, 1.8);
        approx::assert_relative_eq!(config.detail_sample_max_error, 0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tiling_adds_a_border() {
        let config = NavmeshConfigBuilder {
            tiling: true,
            tile_size: 48,
            ..golden_builder()
        }
        .build();
        assert_eq!(config.border_size, 5);
        assert_eq!(config.width, 58);
        assert_eq!(config.height, 58);
    }

    #[test]
    fn small_detail_sample_distance_disables_sampling() {
        let config = NavmeshConfigBuilder {
            detail_sample_dist: 0.5,
            ..golden_builder()
        }
        .build();
        assert_eq!(config.detail_sample_dist, 0.0);
    }

    #[test]
    fn rejects_invalid_values() {
        let valid = golden_builder().build();

        let config = NavmeshConfig {
            cell_size: 0.0,
            ..valid.clone()
        };
        assert!(matches!(
            config.validate(),
            Err(NavmeshConfigError::NonPositiveCellSize { .. })
        ));

        let config = NavmeshConfig {
            walkable_slope_angle: FRAC_PI_2,
            ..valid.clone()
        };
        assert_eq!(
            config.validate(),
            Err(NavmeshConfigError::SlopeOutOfRange(FRAC_PI_2))
        );

        let config = NavmeshConfig {
            walkable_height: 2,
            ..valid.clone()
        };
        assert_eq!(
            config.validate(),
            Err(NavmeshConfigError::WalkableHeightTooLow(2))
        );

        let config = NavmeshConfig {
            max_vertices_per_polygon: 7,
            ..valid.clone()
        };
        assert_eq!(
            config.validate(),
            Err(NavmeshConfigError::InvalidMaxVerticesPerPolygon(7))
        );

        let config = NavmeshConfig {
            tiling: true,
            tile_size: 0,
            ..valid
        };
        assert_eq!(config.validate(), Err(NavmeshConfigError::ZeroTileSize));
    }

    #[cfg(feature = "serialize")]
    #[test]
    fn survives_json() {
        let config = golden_builder().build();
        let json = serde_json::to_string(&config).unwrap();
        let restored: NavmeshConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
    }
}
