//! One-call entry points running the whole pipeline for a [`NavmeshConfig`].

use glam::{UVec3, Vec3A};
use thiserror::Error;
use tracing::debug_span;

use crate::{
    AreaType, CompactHeightfield, CompactHeightfieldError, DetailNavmesh, DetailNavmeshError,
    HeightfieldBuilder, HeightfieldBuilderError, HeightfieldLayerError, HeightfieldLayerSet,
    NavmeshConfig, NavmeshConfigError, PartitionType, PolygonMesh, PolygonMeshError,
    RasterizationError, RegionError, TriMesh,
};

/// The result of a navmesh build: polygons for path finding and a detail mesh for accurate heights.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Navmesh {
    /// The convex polygons and their adjacency.
    pub polygon_mesh: PolygonMesh,
    /// One triangulated submesh per polygon of [`Navmesh::polygon_mesh`].
    pub detail_mesh: DetailNavmesh,
}

impl Navmesh {
    /// Whether the build found nothing walkable.
    pub fn is_empty(&self) -> bool {
        self.polygon_mesh.polygon_count() == 0
    }
}

/// Errors of any pipeline stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavmeshBuildError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] NavmeshConfigError),
    /// The heightfield could not be allocated.
    #[error(transparent)]
    Heightfield(#[from] HeightfieldBuilderError),
    /// A triangle could not be rasterized.
    #[error(transparent)]
    Rasterization(#[from] RasterizationError),
    /// The heightfield could not be compacted.
    #[error(transparent)]
    CompactHeightfield(#[from] CompactHeightfieldError),
    /// Region partitioning ran out of region ids.
    #[error(transparent)]
    Region(#[from] RegionError),
    /// The contours could not be turned into polygons.
    #[error(transparent)]
    PolygonMesh(#[from] PolygonMeshError),
    /// The detail mesh could not be built.
    #[error(transparent)]
    DetailNavmesh(#[from] DetailNavmeshError),
    /// The heightfield layers could not be built.
    #[error(transparent)]
    HeightfieldLayer(#[from] HeightfieldLayerError),
}

/// Rasterizes `trimesh` and runs every stage up to and including area marking.
///
/// Triangles flatter than [`NavmeshConfig::walkable_slope_angle`] are rasterized with
/// [`NavmeshConfig::walkable_area`], all others keep the area stored in the trimesh.
/// The trimesh itself is not modified, so it can be shared between tiles.
pub fn build_compact_heightfield(
    trimesh: &TriMesh,
    config: &NavmeshConfig,
) -> Result<CompactHeightfield, NavmeshBuildError> {
    let areas = trimesh.walkable_area_types(config.walkable_slope_angle, config.walkable_area);
    compact_heightfield_from_triangles(&trimesh.vertices, &trimesh.indices, &areas, config)
}

/// [`build_compact_heightfield`] for triangles whose areas are already classified.
pub(crate) fn compact_heightfield_from_triangles(
    vertices: &[Vec3A],
    indices: &[UVec3],
    areas: &[AreaType],
    config: &NavmeshConfig,
) -> Result<CompactHeightfield, NavmeshBuildError> {
    let _span = debug_span!("build_compact_heightfield", triangles = indices.len()).entered();

    let mut heightfield = HeightfieldBuilder {
        aabb: config.aabb,
        cell_size: config.cell_size,
        cell_height: config.cell_height,
    }
    .build()?;

    heightfield.rasterize_indexed_triangles(vertices, indices, areas, config.walkable_climb)?;

    // Remove overhangs left by conservative rasterization, then spans an agent can't stand on.
    heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
    heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
    heightfield.filter_walkable_low_height_spans(config.walkable_height);

    let mut compact = heightfield.into_compact(config.walkable_height, config.walkable_climb)?;
    compact.erode_walkable_area(config.walkable_radius);
    for volume in &config.area_volumes {
        compact.mark_convex_poly_area(volume);
    }
    tracing::debug!(
        spans = compact.spans.len(),
        width = compact.width,
        height = compact.height,
        "Built compact heightfield"
    );
    Ok(compact)
}

/// Builds a [`Navmesh`] from `trimesh` in one go.
pub fn build_navmesh(
    trimesh: &TriMesh,
    config: &NavmeshConfig,
) -> Result<Navmesh, NavmeshBuildError> {
    let mut compact = build_compact_heightfield(trimesh, config)?;
    build_navmesh_from_compact(&mut compact, config)
}

/// Runs region partitioning and every later stage on an already built compact heightfield.
pub fn build_navmesh_from_compact(
    compact: &mut CompactHeightfield,
    config: &NavmeshConfig,
) -> Result<Navmesh, NavmeshBuildError> {
    let _span = debug_span!("build_navmesh", partition = ?config.partition_type).entered();

    match config.partition_type {
        PartitionType::Watershed => {
            compact.build_distance_field();
            compact.build_regions(
                config.border_size,
                config.min_region_area,
                config.merge_region_area,
            )?;
        }
        PartitionType::Monotone => {
            compact.build_regions_monotone(
                config.border_size,
                config.min_region_area,
                config.merge_region_area,
            )?;
        }
        PartitionType::Layers => {
            compact.build_layer_regions(config.border_size, config.min_region_area)?;
        }
    }

    let contours = compact.build_contours(
        config.max_simplification_error,
        config.max_edge_len,
        config.contour_flags,
    );
    let polygon_mesh = contours.into_polygon_mesh(config.max_vertices_per_polygon as usize)?;
    let detail_mesh = DetailNavmesh::new(
        &polygon_mesh,
        compact,
        config.detail_sample_dist,
        config.detail_sample_max_error,
    )?;
    Ok(Navmesh {
        polygon_mesh,
        detail_mesh,
    })
}

/// Builds the [`HeightfieldLayerSet`] of `trimesh` instead of a navmesh.
pub fn build_heightfield_layers(
    trimesh: &TriMesh,
    config: &NavmeshConfig,
) -> Result<HeightfieldLayerSet, NavmeshBuildError> {
    let compact = build_compact_heightfield(trimesh, config)?;
    let layers = compact.build_heightfield_layers(config.border_size, config.walkable_height)?;
    Ok(layers)
}
