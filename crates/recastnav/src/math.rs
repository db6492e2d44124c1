//! Small geometric helpers shared by the pipeline stages.

use glam::{IVec2, UVec3, Vec2, Vec3, Vec3A, Vec3Swizzles as _};

/// An axis-aligned bounding box in 3D world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner.
    pub min: Vec3,
    /// The maximum corner.
    pub max: Vec3,
}

impl Aabb3d {
    /// Creates a new AABB from its corners.
    #[inline]
    pub fn new(min: impl Into<Vec3>, max: impl Into<Vec3>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Computes the AABB enclosing all given vertices.
    /// Returns `None` if `verts` is empty.
    pub fn from_verts(verts: &[Vec3A]) -> Option<Self> {
        let mut iter = verts.iter();
        let first = Vec3::from(*iter.next()?);
        let (min, max) = iter.fold((first, first), |(min, max), v| {
            let v = Vec3::from(*v);
            (min.min(v), max.max(v))
        });
        Some(Self { min, max })
    }

    /// Returns the projection of the AABB on the xz-plane.
    #[inline]
    pub fn xz(&self) -> Aabb2d {
        Aabb2d {
            min: self.min.xz(),
            max: self.max.xz(),
        }
    }

    /// Whether the two AABBs overlap. Touching boxes count as overlapping.
    #[inline]
    pub fn intersects(&self, other: &Aabb3d) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }
}

/// An axis-aligned bounding box on the xz-plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb2d {
    /// The minimum corner.
    pub min: Vec2,
    /// The maximum corner.
    pub max: Vec2,
}

impl Aabb2d {
    /// Computes the AABB enclosing all given points.
    /// Returns `None` if `points` is empty.
    pub fn from_points(points: &[Vec2]) -> Option<Self> {
        let mut iter = points.iter();
        let first = *iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(*p), max.max(*p)));
        Some(Self { min, max })
    }

    /// Whether the two AABBs overlap. Touching boxes count as overlapping.
    #[inline]
    pub fn intersects(&self, other: &Aabb2d) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }
}

pub(crate) trait TriangleIndices {
    /// The unit normal of the triangle, or `None` if an index is out of bounds.
    fn normal(&self, vertices: &[Vec3A]) -> Option<Vec3A>;
}

impl TriangleIndices for UVec3 {
    #[inline]
    fn normal(&self, vertices: &[Vec3A]) -> Option<Vec3A> {
        let a = *vertices.get(self[0] as usize)?;
        let b = *vertices.get(self[1] as usize)?;
        let c = *vertices.get(self[2] as usize)?;
        let ab = b - a;
        let ac = c - a;
        Some(ab.cross(ac).normalize_or_zero())
    }
}

pub(crate) trait TriangleVertices {
    fn aabb(&self) -> Aabb3d;
}

impl TriangleVertices for [Vec3A; 3] {
    #[inline]
    fn aabb(&self) -> Aabb3d {
        let min = self[0].min(self[1]).min(self[2]);
        let max = self[0].max(self[1]).max(self[2]);
        Aabb3d {
            min: min.into(),
            max: max.into(),
        }
    }
}

/// Gets the standard width (x-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The width offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_x(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [-1, 0, 1, 0];
    OFFSET[direction as usize & 0x03]
}

/// Gets the standard height (z-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The height offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_z(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [0, 1, 0, -1];
    OFFSET[direction as usize & 0x03]
}

/// Gets the direction for the specified offset. One of x and z should be 0.
/// Returns 0xff for an invalid offset.
#[inline]
pub(crate) fn dir_for_offset(x: i32, z: i32) -> u8 {
    const DIRS: [u8; 5] = [3, 0, 0xff, 2, 1];
    DIRS.get((((z + 1) << 1) + x) as usize)
        .copied()
        .unwrap_or(0xff)
}

#[inline]
pub(crate) fn next(i: usize, n: usize) -> usize {
    if i + 1 < n { i + 1 } else { 0 }
}

#[inline]
pub(crate) fn prev(i: usize, n: usize) -> usize {
    if i >= 1 { i - 1 } else { n - 1 }
}

/// Squared distance from `point` to the segment `line` on the xz-plane.
pub(crate) fn distance_squared_between_point_and_line_vec2(point: Vec2, (p, q): (Vec2, Vec2)) -> f32 {
    let pq = q - p;
    let d = point - p;
    let len_sq = pq.length_squared();
    let mut t = pq.dot(d);
    if len_sq > 0.0 {
        t /= len_sq;
    }
    t = t.clamp(0.0, 1.0);
    (p + pq * t - point).length_squared()
}

/// Squared distance from `point` to the segment `line` in 3D.
pub(crate) fn distance_squared_between_point_and_line_vec3(
    point: Vec3A,
    (p, q): (Vec3A, Vec3A),
) -> f32 {
    let pq = q - p;
    let d = point - p;
    let len_sq = pq.length_squared();
    let mut t = pq.dot(d);
    if len_sq > 0.0 {
        t /= len_sq;
    }
    t = t.clamp(0.0, 1.0);
    (p + pq * t - point).length_squared()
}

/// Squared distance from `point` to the segment `line` on an integer grid.
pub(crate) fn distance_squared_between_point_and_line_ivec2(
    point: IVec2,
    (p, q): (IVec2, IVec2),
) -> f32 {
    let pq = (q - p).as_vec2();
    let d = (point - p).as_vec2();
    let len_sq = pq.length_squared();
    let mut t = pq.dot(d);
    if len_sq > 0.0 {
        t /= len_sq;
    }
    t = t.clamp(0.0, 1.0);
    let closest = p.as_vec2() + pq * t;
    (closest - point.as_vec2()).length_squared()
}

/// Twice the signed area of the triangle `a, b, c` on an integer xz grid.
#[inline]
pub(crate) fn area2(a: IVec2, b: IVec2, c: IVec2) -> i32 {
    (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)
}

/// Whether `c` lies strictly to the left of the directed line `a -> b`.
#[inline]
pub(crate) fn left(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) < 0
}

/// Whether `c` lies to the left of or on the directed line `a -> b`.
#[inline]
pub(crate) fn left_on(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub(crate) fn collinear(a: IVec2, b: IVec2, c: IVec2) -> bool {
    area2(a, b, c) == 0
}

/// Proper intersection: the segments share a point interior to both.
pub(crate) fn intersect_prop(a: IVec2, b: IVec2, c: IVec2, d: IVec2) -> bool {
    // Eliminate improper cases.
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Whether `c` lies on the closed segment `a, b`, given that the three are collinear.
fn between(a: IVec2, b: IVec2, c: IVec2) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    // If ab not vertical, check betweenness on x; else on y.
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.y <= c.y && c.y <= b.y) || (a.y >= c.y && c.y >= b.y)
    }
}

/// Whether segments `ab` and `cd` intersect, properly or improperly.
pub(crate) fn intersect(a: IVec2, b: IVec2, c: IVec2, d: IVec2) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_offsets_round_trip() {
        for dir in 0..4 {
            let x = dir_offset_x(dir) as i32;
            let z = dir_offset_z(dir) as i32;
            assert_eq!(dir_for_offset(x, z), dir);
        }
    }

    #[test]
    fn point_to_segment_distance_clamps_to_endpoints() {
        let line = (Vec2::new(0.0, 0.0), Vec2::new(2.0, 0.0));
        assert_eq!(
            distance_squared_between_point_and_line_vec2(Vec2::new(1.0, 1.0), line),
            1.0
        );
        assert_eq!(
            distance_squared_between_point_and_line_vec2(Vec2::new(4.0, 0.0), line),
            4.0
        );
    }

    #[test]
    fn crossing_segments_intersect() {
        let a = IVec2::new(0, 0);
        let b = IVec2::new(4, 4);
        let c = IVec2::new(0, 4);
        let d = IVec2::new(4, 0);
        assert!(intersect(a, b, c, d));
        assert!(!intersect(a, IVec2::new(1, 1), c, d));
    }

    #[test]
    fn aabb_from_verts() {
        let aabb = Aabb3d::from_verts(&[
            Vec3A::new(1.0, 2.0, 3.0),
            Vec3A::new(-1.0, 5.0, 0.0),
        ])
        .unwrap();
        assert_eq!(aabb.min, Vec3::new(-1.0, 2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 5.0, 3.0));
        assert!(Aabb3d::from_verts(&[]).is_none());
    }
}
