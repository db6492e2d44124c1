//! End-to-end builds of small synthetic scenes.

use std::collections::HashSet;

use glam::{IVec2, U16Vec3, UVec3, Vec2, Vec3, Vec3A};
use recastnav::{
    Aabb3d, AreaType, CompactHeightfield, EXTERNAL_LINK, Navmesh, NavmeshBuildError, NavmeshConfig,
    NavmeshConfigBuilder, PartitionType, RasterizationError, RegionId, RegionVertexId,
    TileBuildError, TileGrid,
    TriMesh, build_compact_heightfield, build_heightfield_layers, build_navmesh,
    build_navmesh_from_compact,
};

const PARTITIONS: [PartitionType; 3] = [
    PartitionType::Watershed,
    PartitionType::Monotone,
    PartitionType::Layers,
];

/// Adds an upward facing quad at height `y`.
fn add_quad(trimesh: &mut TriMesh, min: [f32; 2], max: [f32; 2], y: f32) {
    let base = trimesh.vertices.len() as u32;
    trimesh.vertices.extend([
        Vec3A::new(min[0], y, min[1]),
        Vec3A::new(min[0], y, max[1]),
        Vec3A::new(max[0], y, max[1]),
        Vec3A::new(max[0], y, min[1]),
    ]);
    trimesh.indices.extend([
        UVec3::new(base, base + 1, base + 2),
        UVec3::new(base, base + 2, base + 3),
    ]);
    trimesh.area_types.extend([AreaType::default(); 2]);
}

/// Adds a closed box.
fn add_box(trimesh: &mut TriMesh, min: Vec3, max: Vec3) {
    let base = trimesh.vertices.len() as u32;
    for i in 0..8 {
        trimesh.vertices.push(Vec3A::new(
            if i & 1 == 0 { min.x } else { max.x },
            if i & 2 == 0 { min.y } else { max.y },
            if i & 4 == 0 { min.z } else { max.z },
        ));
    }
    let faces = [
        // top
        [2, 6, 7],
        [2, 7, 3],
        // bottom
        [0, 1, 5],
        [0, 5, 4],
        // sides
        [0, 2, 3],
        [0, 3, 1],
        [4, 5, 7],
        [4, 7, 6],
        [0, 4, 6],
        [0, 6, 2],
        [1, 3, 7],
        [1, 7, 5],
    ];
    for [a, b, c] in faces {
        trimesh
            .indices
            .push(UVec3::new(base + a, base + b, base + c));
        trimesh.area_types.push(AreaType::default());
    }
}

fn flat_floor() -> TriMesh {
    let mut trimesh = TriMesh::default();
    add_quad(&mut trimesh, [0.0, 0.0], [12.0, 12.0], 0.0);
    trimesh
}

fn floor_with_box() -> TriMesh {
    let mut trimesh = flat_floor();
    add_box(&mut trimesh, Vec3::new(4.0, 0.0, 4.0), Vec3::new(7.0, 3.0, 7.0));
    trimesh
}

fn two_storeys() -> TriMesh {
    let mut trimesh = flat_floor();
    add_quad(&mut trimesh, [0.0, 0.0], [6.0, 12.0], 4.0);
    trimesh
}

fn staircase() -> TriMesh {
    let mut trimesh = flat_floor();
    for step in 0..8 {
        let x = 2.0 + step as f32 * 0.6;
        add_quad(&mut trimesh, [x, 3.0], [x + 0.6, 7.0], (step + 1) as f32 * 0.2);
    }
    trimesh
}

fn scenes() -> [(&'static str, TriMesh); 4] {
    [
        ("flat floor", flat_floor()),
        ("floor with box", floor_with_box()),
        ("two storeys", two_storeys()),
        ("staircase", staircase()),
    ]
}

fn config(trimesh: &TriMesh, partition_type: PartitionType) -> NavmeshConfig {
    let mut aabb = trimesh.compute_aabb().unwrap();
    aabb.min.y -= 1.0;
    aabb.max.y += 3.0;
    NavmeshConfigBuilder {
        aabb,
        partition_type,
        ..Default::default()
    }
    .build()
}

fn assert_polygons_are_bounded(navmesh: &Navmesh, nvp: usize, name: &str) {
    let mesh = &navmesh.polygon_mesh;
    for polygon in 0..mesh.polygon_count() {
        let count = mesh.polygon_vertices(polygon).len();
        assert!(
            (3..=nvp).contains(&count),
            "{name}: polygon {polygon} has {count} vertices"
        );
    }
}

fn assert_adjacency_is_symmetric(navmesh: &Navmesh, name: &str) {
    let mesh = &navmesh.polygon_mesh;
    for p in 0..mesh.polygon_count() {
        let vertices = mesh.polygon_vertices(p);
        for (edge, &neighbor) in mesh.polygon_neighbors(p).iter().enumerate() {
            if neighbor & EXTERNAL_LINK != 0 {
                continue;
            }
            let q = neighbor as usize;
            let back_edges: Vec<_> = mesh
                .polygon_neighbors(q)
                .iter()
                .enumerate()
                .filter(|(_, n)| **n as usize == p)
                .map(|(i, _)| i)
                .collect();
            assert_eq!(
                back_edges.len(),
                1,
                "{name}: polygon {q} must link back to {p} exactly once"
            );
            let q_vertices = mesh.polygon_vertices(q);
            let k = back_edges[0];
            assert_eq!(
                (q_vertices[k], q_vertices[(k + 1) % q_vertices.len()]),
                (vertices[(edge + 1) % vertices.len()], vertices[edge]),
                "{name}: polygons {p} and {q} don't share the linked edge"
            );
        }
    }
}

fn assert_detail_matches_polygons(navmesh: &Navmesh, name: &str) {
    let detail = &navmesh.detail_mesh;
    assert_eq!(
        detail.meshes.len(),
        navmesh.polygon_mesh.polygon_count(),
        "{name}"
    );
    for i in 0..detail.meshes.len() {
        let vertex_count = detail.submesh_vertices(i).len();
        assert!(vertex_count >= navmesh.polygon_mesh.polygon_vertices(i).len());
        for triangle in detail.submesh_triangles(i) {
            assert!(
                triangle.iter().all(|v| (*v as usize) < vertex_count),
                "{name}: detail triangle {triangle:?} out of range"
            );
        }
    }
}

/// Flood fills every region through the span connections and expects a single component.
fn assert_regions_are_connected(compact: &CompactHeightfield, name: &str) {
    const OFFSETS: [(i32, i32); 4] = [(-1, 0), (0, 1), (1, 0), (0, -1)];

    let mut positions = vec![(0, 0); compact.spans.len()];
    for z in 0..compact.height {
        for x in 0..compact.width {
            for i in compact.cell_at(x, z).index_range() {
                positions[i] = (x as i32, z as i32);
            }
        }
    }

    let mut seen = HashSet::new();
    let mut visited = vec![false; compact.spans.len()];
    for start in 0..compact.spans.len() {
        let region = compact.spans[start].region;
        if region == RegionId::NONE || region.is_border() || visited[start] {
            continue;
        }
        assert!(
            seen.insert(region),
            "{name}: region {region:?} has more than one component"
        );
        let mut stack = vec![start];
        visited[start] = true;
        while let Some(i) = stack.pop() {
            let (x, z) = positions[i];
            for (dir, (dx, dz)) in OFFSETS.iter().enumerate() {
                let Some(con) = compact.spans[i].con(dir as u8) else {
                    continue;
                };
                let cell = compact.cell_at((x + dx) as u16, (z + dz) as u16);
                let ni = cell.index() as usize + con as usize;
                if !visited[ni] && compact.spans[ni].region == region {
                    visited[ni] = true;
                    stack.push(ni);
                }
            }
        }
    }
}

/// Simplified contour vertices are always picked from the traced outline.
fn assert_contours_follow_raw_outline(compact: &CompactHeightfield, config: &NavmeshConfig, name: &str) {
    let contours = compact.build_contours(
        config.max_simplification_error,
        config.max_edge_len,
        config.contour_flags,
    );
    for contour in &contours.contours {
        let raw: HashSet<(u16, u16)> = contours
            .contours
            .iter()
            .filter(|other| other.region == contour.region)
            .flat_map(|other| &other.raw_vertices)
            .map(|(v, _): &(U16Vec3, _)| (v.x, v.z))
            .collect();
        for (vertex, _) in &contour.vertices {
            assert!(
                raw.contains(&(vertex.x, vertex.z)),
                "{name}: simplified vertex {vertex} is not on the raw outline"
            );
        }
    }
}

fn distance_squared_to_segment(point: IVec2, (p, q): (IVec2, IVec2)) -> f32 {
    let pq = (q - p).as_vec2();
    let d = (point - p).as_vec2();
    let len_sq = pq.length_squared();
    let t = if len_sq > 0.0 { pq.dot(d) / len_sq } else { 0.0 };
    let closest: Vec2 = p.as_vec2() + pq * t.clamp(0.0, 1.0);
    (closest - point.as_vec2()).length_squared()
}

/// Raw outline points between two simplified vertices on a solid wall stay within
/// `max_simplification_error` of the simplified edge. Returns the number of edges checked.
fn assert_walls_within_max_error(
    compact: &CompactHeightfield,
    config: &NavmeshConfig,
    name: &str,
) -> usize {
    let contours = compact.build_contours(
        config.max_simplification_error,
        config.max_edge_len,
        config.contour_flags,
    );
    let max_error_sq = config.max_simplification_error.powi(2) + 1e-3;
    let xz = |v: U16Vec3| IVec2::new(v.x as i32, v.z as i32);
    let mut checked_edges = 0;
    for contour in &contours.contours {
        let raw = &contour.raw_vertices;
        let n = raw.len();
        let Some((first, _)) = contour.vertices.first() else {
            continue;
        };
        let Some(start) = raw.iter().position(|(v, _)| xz(*v) == xz(*first)) else {
            continue;
        };

        // Follow the raw outline from one simplified vertex to the next.
        let mut indices = vec![start];
        let mut walked = 0;
        for (vertex, _) in contour.vertices.iter().skip(1).chain([contour.vertices[0]].iter()) {
            let current = *indices.last().unwrap_or(&start);
            let Some(step) = (1..=n).find(|step| xz(raw[(current + step) % n].0) == xz(*vertex))
            else {
                break;
            };
            walked += step;
            indices.push((current + step) % n);
        }
        // Outlines with merged holes bridge into other outlines.
        if walked != n || indices.len() != contour.vertices.len() + 1 {
            continue;
        }

        for edge in indices.windows(2) {
            let (ai, bi) = (edge[0], edge[1]);
            let between: Vec<usize> = (1..n)
                .map(|step| (ai + step) % n)
                .take_while(|i| *i != bi)
                .collect();
            let is_wall = between.iter().all(|i| {
                let region = raw[*i].1;
                !region.intersects(RegionVertexId::REGION_MASK)
                    && !region.contains(RegionVertexId::AREA_BORDER)
            });
            if between.is_empty() || !is_wall {
                continue;
            }
            let chord = (xz(raw[ai].0), xz(raw[bi].0));
            for i in between {
                let d = distance_squared_to_segment(xz(raw[i].0), chord);
                assert!(
                    d <= max_error_sq,
                    "{name}: raw vertex {} is {} voxels away from edge {chord:?}",
                    raw[i].0,
                    d.sqrt()
                );
            }
            checked_edges += 1;
        }
    }
    checked_edges
}

#[test]
fn every_partition_builds_valid_navmeshes() {
    let mut checked_edges = 0;
    for (scene, trimesh) in scenes() {
        for partition in PARTITIONS {
            let name = format!("{scene} ({partition:?})");
            let config = config(&trimesh, partition);
            config.validate().unwrap();

            let mut compact = build_compact_heightfield(&trimesh, &config).unwrap();
            let navmesh = build_navmesh_from_compact(&mut compact, &config).unwrap();

            assert!(!navmesh.is_empty(), "{name}: no polygons");
            assert_polygons_are_bounded(
                &navmesh,
                config.max_vertices_per_polygon as usize,
                &name,
            );
            assert_adjacency_is_symmetric(&navmesh, &name);
            assert_detail_matches_polygons(&navmesh, &name);
            assert_regions_are_connected(&compact, &name);
            assert_contours_follow_raw_outline(&compact, &config, &name);
            checked_edges += assert_walls_within_max_error(&compact, &config, &name);
        }
    }
    assert!(checked_edges > 0);
}

#[test]
fn builds_are_deterministic() {
    for (scene, trimesh) in scenes() {
        for partition in PARTITIONS {
            let config = config(&trimesh, partition);
            let first = build_navmesh(&trimesh, &config).unwrap();
            let second = build_navmesh(&trimesh, &config).unwrap();
            assert_eq!(first, second, "{scene} ({partition:?})");
        }
    }
}

#[test]
fn partitions_produce_different_regions() {
    let trimesh = floor_with_box();
    let watershed = build_navmesh(&trimesh, &config(&trimesh, PartitionType::Watershed)).unwrap();
    let monotone = build_navmesh(&trimesh, &config(&trimesh, PartitionType::Monotone)).unwrap();
    assert_ne!(watershed.polygon_mesh, monotone.polygon_mesh);
}

/// Two 10x10 rooms joined by a narrow corridor.
fn two_rooms() -> TriMesh {
    let mut trimesh = TriMesh::default();
    add_quad(&mut trimesh, [0.0, 0.0], [10.0, 10.0], 0.0);
    add_quad(&mut trimesh, [10.0, 3.5], [14.0, 6.5], 0.0);
    add_quad(&mut trimesh, [14.0, 0.0], [24.0, 10.0], 0.0);
    trimesh
}

fn distinct_regions(compact: &CompactHeightfield) -> HashSet<RegionId> {
    compact
        .spans
        .iter()
        .map(|span| span.region)
        .filter(|region| *region != RegionId::NONE)
        .collect()
}

#[test]
fn layers_join_what_watershed_separates() {
    let trimesh = two_rooms();

    let config = config(&trimesh, PartitionType::Watershed);
    let mut watershed = build_compact_heightfield(&trimesh, &config).unwrap();
    build_navmesh_from_compact(&mut watershed, &config).unwrap();

    let config = self::config(&trimesh, PartitionType::Layers);
    let mut layers = build_compact_heightfield(&trimesh, &config).unwrap();
    build_navmesh_from_compact(&mut layers, &config).unwrap();

    assert!(distinct_regions(&watershed).len() >= 2);
    assert_eq!(distinct_regions(&layers).len(), 1);
}

/// A ramp winding 2.5 times around the y-axis, rising 3 units per turn.
fn helix_ramp() -> TriMesh {
    const SEGMENTS_PER_TURN: usize = 32;
    const TURNS: f32 = 2.5;
    const RISE_PER_TURN: f32 = 3.0;
    let (inner, outer) = (1.5, 4.0);

    let mut trimesh = TriMesh::default();
    let segments = (SEGMENTS_PER_TURN as f32 * TURNS) as usize;
    let point = |segment: usize, radius: f32| {
        let turns = segment as f32 / SEGMENTS_PER_TURN as f32;
        let angle = turns * std::f32::consts::TAU;
        Vec3A::new(radius * angle.cos(), turns * RISE_PER_TURN, radius * angle.sin())
    };
    for segment in 0..segments {
        let quad = [
            point(segment, inner),
            point(segment, outer),
            point(segment + 1, outer),
            point(segment + 1, inner),
        ];
        for [a, b, c] in [[0, 1, 2], [0, 2, 3]] {
            let (a, b, c) = (quad[a], quad[b], quad[c]);
            // Face upwards.
            let triangle = if (b - a).cross(c - a).y >= 0.0 {
                [a, b, c]
            } else {
                [a, c, b]
            };
            let base = trimesh.vertices.len() as u32;
            trimesh.vertices.extend(triangle);
            trimesh.indices.push(UVec3::new(base, base + 1, base + 2));
            trimesh.area_types.push(AreaType::default());
        }
    }
    trimesh
}

#[test]
fn regions_never_wind_over_themselves() {
    let trimesh = helix_ramp();
    for partition in [PartitionType::Watershed, PartitionType::Monotone] {
        let config = config(&trimesh, partition);
        let mut compact = build_compact_heightfield(&trimesh, &config).unwrap();
        let navmesh = build_navmesh_from_compact(&mut compact, &config).unwrap();
        assert!(!navmesh.is_empty(), "{partition:?}");

        for z in 0..compact.height {
            for x in 0..compact.width {
                let mut seen = HashSet::new();
                for i in compact.cell_at(x, z).index_range() {
                    let region = compact.spans[i].region;
                    assert!(
                        region == RegionId::NONE || seen.insert(region),
                        "{partition:?}: region {region:?} is stacked over itself at ({x}, {z})"
                    );
                }
            }
        }
        let walkable = compact.areas.iter().filter(|area| area.is_walkable()).count();
        let labeled = compact
            .spans
            .iter()
            .filter(|span| span.region != RegionId::NONE)
            .count();
        assert!(
            labeled * 2 >= walkable,
            "{partition:?}: only {labeled} of {walkable} walkable spans kept a region"
        );
        assert_regions_are_connected(&compact, &format!("helix ramp ({partition:?})"));
    }
}

/// Crossing number test on the xz-plane.
fn contains_point(points: &[(f32, f32)], (px, pz): (f32, f32)) -> bool {
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (xi, zi) = points[i];
        let (xj, zj) = points[j];
        if (zi > pz) != (zj > pz) && px < (xj - xi) * (pz - zi) / (zj - zi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[test]
fn box_obstacle_cuts_a_hole() {
    let trimesh = floor_with_box();
    for partition in PARTITIONS {
        let navmesh = build_navmesh(&trimesh, &config(&trimesh, partition)).unwrap();
        let mesh = &navmesh.polygon_mesh;
        // The obstacle's center in voxels.
        let center = (
            (5.5 - mesh.aabb.min.x) / mesh.cell_size,
            (5.5 - mesh.aabb.min.z) / mesh.cell_size,
        );
        for polygon in 0..mesh.polygon_count() {
            let points: Vec<_> = mesh
                .polygon_vertices(polygon)
                .iter()
                .map(|v| {
                    let v = mesh.vertices[*v as usize];
                    (v.x as f32, v.z as f32)
                })
                .collect();
            assert!(
                !contains_point(&points, center),
                "{partition:?}: polygon {polygon} covers the obstacle"
            );
        }
    }
}

#[test]
fn two_storeys_produce_stacked_layers() {
    let trimesh = two_storeys();
    let layers = build_heightfield_layers(&trimesh, &config(&trimesh, PartitionType::Layers)).unwrap();
    assert!(layers.layers.len() >= 2);
    for layer in &layers.layers {
        assert_eq!(
            layer.heights.len(),
            layer.width as usize * layer.height as usize
        );
        assert!(layer.min_x <= layer.max_x && layer.min_z <= layer.max_z);
    }
}

fn tiled_config(trimesh: &TriMesh) -> NavmeshConfig {
    let config = NavmeshConfigBuilder {
        // Leave room for tiles without geometry.
        aabb: Aabb3d::new(Vec3::new(0.0, -1.0, 0.0), Vec3::new(24.0, 4.0, 12.0)),
        tile_size: 20,
        tiling: true,
        ..Default::default()
    }
    .build();
    assert!(trimesh.compute_aabb().unwrap().max.x < config.aabb.max.x);
    config
}

#[test]
fn tiled_build_is_independent_of_thread_count() {
    let trimesh = staircase();
    let config = tiled_config(&trimesh);
    let sequential = TileGrid::build(&trimesh, &config, 1);
    let parallel = TileGrid::build(&trimesh, &config, 4);
    assert_eq!((sequential.tiles_x, sequential.tiles_z), (4, 2));
    assert_eq!(sequential.tiles.len(), 8);
    assert_eq!(sequential.tiles, parallel.tiles);
    assert_eq!(sequential.failures().count(), 0);
}

#[test]
fn empty_tiles_are_distinguishable_from_missing_tiles() {
    let trimesh = flat_floor();
    let config = tiled_config(&trimesh);
    let grid = TileGrid::build(&trimesh, &config, 2);

    let Some(Ok(covered)) = grid.tile(0, 0) else {
        panic!("tile (0, 0) failed");
    };
    assert!(!covered.is_empty());
    // The floor ends at x = 12, tile 3 starts at x = 18.
    let Some(Ok(empty)) = grid.tile(3, 0) else {
        panic!("tile (3, 0) failed");
    };
    assert!(empty.is_empty());
    assert!(grid.tile(4, 0).is_none());

    let mut broken = flat_floor();
    broken.indices.push(UVec3::new(0, 1, 99));
    broken.area_types.push(AreaType::default());
    let grid = TileGrid::build(&broken, &config, 2);
    assert_eq!(grid.failures().count(), grid.tiles.len());
    assert!(matches!(
        grid.tile(0, 0),
        Some(Err(TileBuildError::Build {
            x: 0,
            z: 0,
            source: NavmeshBuildError::Rasterization(RasterizationError::VertexIndexOutOfBounds {
                index: 99,
                ..
            }),
        }))
    ));
}

#[test]
fn missing_vertices_are_reported_instead_of_panicking() {
    let mut trimesh = flat_floor();
    trimesh.indices.push(UVec3::new(0, 99, 1));
    trimesh.area_types.push(AreaType::default());
    let config = config(&flat_floor(), PartitionType::Watershed);
    assert!(matches!(
        build_navmesh(&trimesh, &config),
        Err(NavmeshBuildError::Rasterization(
            RasterizationError::VertexIndexOutOfBounds {
                index: 99,
                vertex_count: 4,
            }
        ))
    ));
}
