#![doc = include_str!("../../../readme.md")]

mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod config;
mod contours;
mod detail_mesh;
mod distance_field;
mod erosion;
mod heightfield;
mod heightfield_layers;
mod layer_build_regions;
mod main_api;
mod mark_convex_poly_area;
pub(crate) mod math;
mod monotone_build_regions;
mod poly_mesh;
mod pre_filter;
mod rasterize;
mod region;
mod span;
mod tiles;
mod trimesh;
mod watershed_build_regions;

pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::CompactSpan;
pub use config::{NavmeshConfig, NavmeshConfigBuilder, NavmeshConfigError, PartitionType};
pub use contours::{BuildContoursFlags, Contour, ContourSet, RegionVertexId};
pub use detail_mesh::{DETAIL_EDGE_BOUNDARY, DetailNavmesh, DetailNavmeshError, SubMesh};
pub use heightfield::{Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertionError};
pub use heightfield_layers::{HeightfieldLayer, HeightfieldLayerError, HeightfieldLayerSet};
pub use main_api::{
    Navmesh, NavmeshBuildError, build_compact_heightfield, build_heightfield_layers,
    build_navmesh, build_navmesh_from_compact,
};
pub use mark_convex_poly_area::{AreaModification, ConvexVolume};
pub use math::{Aabb2d, Aabb3d};
pub use poly_mesh::{
    EXTERNAL_LINK, MAX_VERTICES_PER_POLYGON, PolygonMesh, PolygonMeshError, RC_MESH_NULL_IDX,
};
pub use rasterize::RasterizationError;
pub use region::{RegionError, RegionId};
pub use span::{AreaType, Span, SpanBuilder, SpanKey, Spans};
pub use tiles::{TileBuildError, TileGrid, tile_count};
pub use trimesh::TriMesh;
