// Copyright © 2021 strogg developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Geometry primitives shared between world loading, visibility and
//! rendering.
//!
//! World space follows the Quake convention: X east, Y north, Z up. The
//! conversion into the graphics API's coordinate system happens once, when
//! view and projection matrices are built.

use std::ops::Neg;

use cgmath::{Angle, Deg, InnerSpace, Matrix3, Matrix4, Vector3, Vector4};

pub const VERTEX_NORMAL_COUNT: usize = 162;

lazy_static! {
    /// Precomputed vertex normals shared by alias models and particle effects.
    pub static ref VERTEX_NORMALS: [Vector3<f32>; VERTEX_NORMAL_COUNT] = [
        [-0.525731, 0.000000, 0.850651].into(),
        [-0.442863, 0.238856, 0.864188].into(),
        [-0.295242, 0.000000, 0.955423].into(),
        [-0.309017, 0.500000, 0.809017].into(),
        [-0.162460, 0.262866, 0.951056].into(),
        [0.000000, 0.000000, 1.000000].into(),
        [0.000000, 0.850651, 0.525731].into(),
        [-0.147621, 0.716567, 0.681718].into(),
        [0.147621, 0.716567, 0.681718].into(),
        [0.000000, 0.525731, 0.850651].into(),
        [0.309017, 0.500000, 0.809017].into(),
        [0.525731, 0.000000, 0.850651].into(),
        [0.295242, 0.000000, 0.955423].into(),
        [0.442863, 0.238856, 0.864188].into(),
        [0.162460, 0.262866, 0.951056].into(),
        [-0.681718, 0.147621, 0.716567].into(),
        [-0.809017, 0.309017, 0.500000].into(),
        [-0.587785, 0.425325, 0.688191].into(),
        [-0.850651, 0.525731, 0.000000].into(),
        [-0.864188, 0.442863, 0.238856].into(),
        [-0.716567, 0.681718, 0.147621].into(),
        [-0.688191, 0.587785, 0.425325].into(),
        [-0.500000, 0.809017, 0.309017].into(),
        [-0.238856, 0.864188, 0.442863].into(),
        [-0.425325, 0.688191, 0.587785].into(),
        [-0.716567, 0.681718, -0.147621].into(),
        [-0.500000, 0.809017, -0.309017].into(),
        [-0.525731, 0.850651, 0.000000].into(),
        [0.000000, 0.850651, -0.525731].into(),
        [-0.238856, 0.864188, -0.442863].into(),
        [0.000000, 0.955423, -0.295242].into(),
        [-0.262866, 0.951056, -0.162460].into(),
        [0.000000, 1.000000, 0.000000].into(),
        [0.000000, 0.955423, 0.295242].into(),
        [-0.262866, 0.951056, 0.162460].into(),
        [0.238856, 0.864188, 0.442863].into(),
        [0.262866, 0.951056, 0.162460].into(),
        [0.500000, 0.809017, 0.309017].into(),
        [0.238856, 0.864188, -0.442863].into(),
        [0.262866, 0.951056, -0.162460].into(),
        [0.500000, 0.809017, -0.309017].into(),
        [0.850651, 0.525731, 0.000000].into(),
        [0.716567, 0.681718, 0.147621].into(),
        [0.716567, 0.681718, -0.147621].into(),
        [0.525731, 0.850651, 0.000000].into(),
        [0.425325, 0.688191, 0.587785].into(),
        [0.864188, 0.442863, 0.238856].into(),
        [0.688191, 0.587785, 0.425325].into(),
        [0.809017, 0.309017, 0.500000].into(),
        [0.681718, 0.147621, 0.716567].into(),
        [0.587785, 0.425325, 0.688191].into(),
        [0.955423, 0.295242, 0.000000].into(),
        [1.000000, 0.000000, 0.000000].into(),
        [0.951056, 0.162460, 0.262866].into(),
        [0.850651, -0.525731, 0.000000].into(),
        [0.955423, -0.295242, 0.000000].into(),
        [0.864188, -0.442863, 0.238856].into(),
        [0.951056, -0.162460, 0.262866].into(),
        [0.809017, -0.309017, 0.500000].into(),
        [0.681718, -0.147621, 0.716567].into(),
        [0.850651, 0.000000, 0.525731].into(),
        [0.864188, 0.442863, -0.238856].into(),
        [0.809017, 0.309017, -0.500000].into(),
        [0.951056, 0.162460, -0.262866].into(),
        [0.525731, 0.000000, -0.850651].into(),
        [0.681718, 0.147621, -0.716567].into(),
        [0.681718, -0.147621, -0.716567].into(),
        [0.850651, 0.000000, -0.525731].into(),
        [0.809017, -0.309017, -0.500000].into(),
        [0.864188, -0.442863, -0.238856].into(),
        [0.951056, -0.162460, -0.262866].into(),
        [0.147621, 0.716567, -0.681718].into(),
        [0.309017, 0.500000, -0.809017].into(),
        [0.425325, 0.688191, -0.587785].into(),
        [0.442863, 0.238856, -0.864188].into(),
        [0.587785, 0.425325, -0.688191].into(),
        [0.688191, 0.587785, -0.425325].into(),
        [-0.147621, 0.716567, -0.681718].into(),
        [-0.309017, 0.500000, -0.809017].into(),
        [0.000000, 0.525731, -0.850651].into(),
        [-0.525731, 0.000000, -0.850651].into(),
        [-0.442863, 0.238856, -0.864188].into(),
        [-0.295242, 0.000000, -0.955423].into(),
        [-0.162460, 0.262866, -0.951056].into(),
        [0.000000, 0.000000, -1.000000].into(),
        [0.295242, 0.000000, -0.955423].into(),
        [0.162460, 0.262866, -0.951056].into(),
        [-0.442863, -0.238856, -0.864188].into(),
        [-0.309017, -0.500000, -0.809017].into(),
        [-0.162460, -0.262866, -0.951056].into(),
        [0.000000, -0.850651, -0.525731].into(),
        [-0.147621, -0.716567, -0.681718].into(),
        [0.147621, -0.716567, -0.681718].into(),
        [0.000000, -0.525731, -0.850651].into(),
        [0.309017, -0.500000, -0.809017].into(),
        [0.442863, -0.238856, -0.864188].into(),
        [0.162460, -0.262866, -0.951056].into(),
        [0.238856, -0.864188, -0.442863].into(),
        [0.500000, -0.809017, -0.309017].into(),
        [0.425325, -0.688191, -0.587785].into(),
        [0.716567, -0.681718, -0.147621].into(),
        [0.688191, -0.587785, -0.425325].into(),
        [0.587785, -0.425325, -0.688191].into(),
        [0.000000, -0.955423, -0.295242].into(),
        [0.000000, -1.000000, 0.000000].into(),
        [0.262866, -0.951056, -0.162460].into(),
        [0.000000, -0.850651, 0.525731].into(),
        [0.000000, -0.955423, 0.295242].into(),
        [0.238856, -0.864188, 0.442863].into(),
        [0.262866, -0.951056, 0.162460].into(),
        [0.500000, -0.809017, 0.309017].into(),
        [0.716567, -0.681718, 0.147621].into(),
        [0.525731, -0.850651, 0.000000].into(),
        [-0.238856, -0.864188, -0.442863].into(),
        [-0.500000, -0.809017, -0.309017].into(),
        [-0.262866, -0.951056, -0.162460].into(),
        [-0.850651, -0.525731, 0.000000].into(),
        [-0.716567, -0.681718, -0.147621].into(),
        [-0.716567, -0.681718, 0.147621].into(),
        [-0.525731, -0.850651, 0.000000].into(),
        [-0.500000, -0.809017, 0.309017].into(),
        [-0.238856, -0.864188, 0.442863].into(),
        [-0.262866, -0.951056, 0.162460].into(),
        [-0.864188, -0.442863, 0.238856].into(),
        [-0.809017, -0.309017, 0.500000].into(),
        [-0.688191, -0.587785, 0.425325].into(),
        [-0.681718, -0.147621, 0.716567].into(),
        [-0.442863, -0.238856, 0.864188].into(),
        [-0.587785, -0.425325, 0.688191].into(),
        [-0.309017, -0.500000, 0.809017].into(),
        [-0.147621, -0.716567, 0.681718].into(),
        [-0.425325, -0.688191, 0.587785].into(),
        [-0.162460, -0.262866, 0.951056].into(),
        [0.442863, -0.238856, 0.864188].into(),
        [0.162460, -0.262866, 0.951056].into(),
        [0.309017, -0.500000, 0.809017].into(),
        [0.147621, -0.716567, 0.681718].into(),
        [0.000000, -0.525731, 0.850651].into(),
        [0.425325, -0.688191, 0.587785].into(),
        [0.587785, -0.425325, 0.688191].into(),
        [0.688191, -0.587785, 0.425325].into(),
        [-0.955423, 0.295242, 0.000000].into(),
        [-0.951056, 0.162460, 0.262866].into(),
        [-1.000000, 0.000000, 0.000000].into(),
        [-0.850651, 0.000000, 0.525731].into(),
        [-0.955423, -0.295242, 0.000000].into(),
        [-0.951056, -0.162460, 0.262866].into(),
        [-0.864188, 0.442863, -0.238856].into(),
        [-0.951056, 0.162460, -0.262866].into(),
        [-0.809017, 0.309017, -0.500000].into(),
        [-0.864188, -0.442863, -0.238856].into(),
        [-0.951056, -0.162460, -0.262866].into(),
        [-0.809017, -0.309017, -0.500000].into(),
        [-0.681718, 0.147621, -0.716567].into(),
        [-0.681718, -0.147621, -0.716567].into(),
        [-0.850651, 0.000000, -0.525731].into(),
        [-0.688191, 0.587785, -0.425325].into(),
        [-0.587785, 0.425325, -0.688191].into(),
        [-0.425325, 0.688191, -0.587785].into(),
        [-0.425325, -0.688191, -0.587785].into(),
        [-0.587785, -0.425325, -0.688191].into(),
        [-0.688191, -0.587785, -0.425325].into(),
    ];
}

/// Euler orientation in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Angles {
    pub pitch: Deg<f32>,
    pub roll: Deg<f32>,
    pub yaw: Deg<f32>,
}

impl Angles {
    pub fn zero() -> Angles {
        Angles {
            pitch: Deg(0.0),
            roll: Deg(0.0),
            yaw: Deg(0.0),
        }
    }

    pub fn mat3_quake(&self) -> Matrix3<f32> {
        Matrix3::from_angle_x(-self.roll)
            * Matrix3::from_angle_y(-self.pitch)
            * Matrix3::from_angle_z(self.yaw)
    }

    pub fn mat4_quake(&self) -> Matrix4<f32> {
        Matrix4::from_angle_x(-self.roll)
            * Matrix4::from_angle_y(-self.pitch)
            * Matrix4::from_angle_z(self.yaw)
    }

    pub fn mat4_wgpu(&self) -> Matrix4<f32> {
        Matrix4::from_angle_z(-self.roll)
            * Matrix4::from_angle_x(self.pitch)
            * Matrix4::from_angle_y(-self.yaw)
    }

    /// Forward, right and up basis vectors in world space.
    pub fn basis(&self) -> [Vector3<f32>; 3] {
        let (sp, cp) = self.pitch.sin_cos();
        let (sy, cy) = self.yaw.sin_cos();
        let (sr, cr) = self.roll.sin_cos();

        let forward = Vector3::new(cp * cy, cp * sy, -sp);
        let right = Vector3::new(-sr * sp * cy + cr * sy, -sr * sp * sy - cr * cy, -sr * cp);
        let up = Vector3::new(cr * sp * cy + sr * sy, cr * sp * sy - sr * cy, cr * cp);

        [forward, right, up]
    }

    /// Blends two orientations along the shortest arc, wrapping each channel
    /// independently on the ±180° seam.
    pub fn lerp(&self, other: &Angles, alpha: f32) -> Angles {
        Angles {
            pitch: lerp_angle(self.pitch, other.pitch, alpha),
            roll: lerp_angle(self.roll, other.roll, alpha),
            yaw: lerp_angle(self.yaw, other.yaw, alpha),
        }
    }
}

impl std::ops::Add for Angles {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            pitch: self.pitch + other.pitch,
            roll: self.roll + other.roll,
            yaw: self.yaw + other.yaw,
        }
    }
}

impl std::ops::Mul<f32> for Angles {
    type Output = Self;

    fn mul(self, other: f32) -> Self {
        Self {
            pitch: self.pitch * other,
            roll: self.roll * other,
            yaw: self.yaw * other,
        }
    }
}

/// Interpolates between two angles along the shortest arc.
pub fn lerp_angle(a: Deg<f32>, b: Deg<f32>, alpha: f32) -> Deg<f32> {
    let mut delta = b.0 - a.0;
    if delta > 180.0 {
        delta -= 360.0;
    } else if delta < -180.0 {
        delta += 360.0;
    }
    Deg(a.0 + delta * alpha)
}

/// Centripetal Catmull-Rom interpolation through `p1`..`p2` at parameter
/// `t ∈ [0, 1]`, shaped by the outer control points `p0` and `p3`.
pub fn catmull_rom(
    p0: Vector3<f32>,
    p1: Vector3<f32>,
    p2: Vector3<f32>,
    p3: Vector3<f32>,
    t: f32,
) -> Vector3<f32> {
    let t2 = t * t;
    let t3 = t2 * t;

    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

/// Returns the minimum and maximum corners of the bounding box containing
/// `points`.
pub fn bounds(points: &[Vector3<f32>]) -> (Vector3<f32>, Vector3<f32>) {
    let mut min = Vector3::new(f32::MAX, f32::MAX, f32::MAX);
    let mut max = Vector3::new(f32::MIN, f32::MIN, f32::MIN);

    for p in points {
        for ax in 0..3 {
            min[ax] = min[ax].min(p[ax]);
            max[ax] = max[ax].max(p[ax]);
        }
    }

    (min, max)
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PlaneSide {
    Front = 0,
    Back = 1,
}

impl Neg for PlaneSide {
    type Output = PlaneSide;

    fn neg(self) -> Self::Output {
        match self {
            PlaneSide::Front => PlaneSide::Back,
            PlaneSide::Back => PlaneSide::Front,
        }
    }
}

impl PlaneSide {
    pub fn from_dist(dist: f32) -> PlaneSide {
        if dist >= 0.0 {
            PlaneSide::Front
        } else {
            PlaneSide::Back
        }
    }
}

/// A plane in point-normal form.
///
/// Axis-aligned planes are detected at construction so that distance
/// computations reduce to one subtraction.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Hyperplane {
    pub normal: Vector3<f32>,
    pub dist: f32,
    alignment: Alignment,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Alignment {
    AxisX,
    AxisY,
    AxisZ,
    Arbitrary,
}

impl Hyperplane {
    pub fn new(normal: Vector3<f32>, dist: f32) -> Hyperplane {
        let alignment = if normal == Vector3::unit_x() {
            Alignment::AxisX
        } else if normal == Vector3::unit_y() {
            Alignment::AxisY
        } else if normal == Vector3::unit_z() {
            Alignment::AxisZ
        } else {
            Alignment::Arbitrary
        };

        Hyperplane {
            normal,
            dist,
            alignment,
        }
    }

    pub fn axis_x(dist: f32) -> Hyperplane {
        Hyperplane::new(Vector3::unit_x(), dist)
    }

    pub fn axis_y(dist: f32) -> Hyperplane {
        Hyperplane::new(Vector3::unit_y(), dist)
    }

    pub fn axis_z(dist: f32) -> Hyperplane {
        Hyperplane::new(Vector3::unit_z(), dist)
    }

    /// Signed distance from `point` to the plane.
    pub fn point_dist(&self, point: Vector3<f32>) -> f32 {
        match self.alignment {
            Alignment::AxisX => point.x - self.dist,
            Alignment::AxisY => point.y - self.dist,
            Alignment::AxisZ => point.z - self.dist,
            Alignment::Arbitrary => self.normal.dot(point) - self.dist,
        }
    }

    pub fn point_side(&self, point: Vector3<f32>) -> PlaneSide {
        PlaneSide::from_dist(self.point_dist(point))
    }
}

/// A view frustum in world space.
///
/// Only the four side planes are kept; Quake-lineage engines rely on the
/// depth range and PVS to bound the near and far ends.
#[derive(Copy, Clone, Debug)]
pub struct Frustum {
    planes: [Hyperplane; 4],
}

impl Frustum {
    /// Derives the side planes by rotating the view direction outward by half
    /// the field of view on each axis.
    pub fn new(origin: Vector3<f32>, angles: Angles, fov_x: Deg<f32>, fov_y: Deg<f32>) -> Frustum {
        let [forward, right, up] = angles.basis();

        let planes = [
            rotate_around(forward, up, Deg(-(90.0 - fov_x.0 / 2.0))),
            rotate_around(forward, up, Deg(90.0 - fov_x.0 / 2.0)),
            rotate_around(forward, right, Deg(90.0 - fov_y.0 / 2.0)),
            rotate_around(forward, right, Deg(-(90.0 - fov_y.0 / 2.0))),
        ]
        .map(|normal| Hyperplane::new(normal, normal.dot(origin)));

        Frustum { planes }
    }

    /// Tests an axis-aligned box against the frustum.
    ///
    /// Returns `true` when the box lies entirely on the negative side of any
    /// plane. A box inside or straddling all planes is never culled.
    pub fn cull_box(&self, mins: Vector3<f32>, maxs: Vector3<f32>) -> bool {
        for plane in &self.planes {
            // pick the box corner farthest along the plane normal
            let far = Vector3::new(
                if plane.normal.x >= 0.0 { maxs.x } else { mins.x },
                if plane.normal.y >= 0.0 { maxs.y } else { mins.y },
                if plane.normal.z >= 0.0 { maxs.z } else { mins.z },
            );

            if plane.point_dist(far) < 0.0 {
                return true;
            }
        }

        false
    }
}

fn rotate_around(v: Vector3<f32>, axis: Vector3<f32>, angle: Deg<f32>) -> Vector3<f32> {
    Matrix3::from_axis_angle(axis.normalize(), angle) * v
}

/// Builds a perspective projection the way Mesa's `glFrustum` does, from
/// explicit clip-volume extents.
///
/// Mirrored viewpoints can produce frusta the symmetric-FOV formula degrades
/// on; constructing from extents keeps the signs intact. The resulting depth
/// range is [0, 1].
pub fn frustum(
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
    near: f32,
    far: f32,
) -> Matrix4<f32> {
    let x = 2.0 * near / (right - left);
    let y = 2.0 * near / (top - bottom);
    let a = (right + left) / (right - left);
    let b = (top + bottom) / (top - bottom);
    let c = -far / (far - near);
    let d = -(far * near) / (far - near);

    Matrix4::from_cols(
        Vector4::new(x, 0.0, 0.0, 0.0),
        Vector4::new(0.0, y, 0.0, 0.0),
        Vector4::new(a, b, c, -1.0),
        Vector4::new(0.0, 0.0, d, 0.0),
    )
}

/// Symmetric perspective projection in terms of vertical field of view.
pub fn perspective(fov_y: Deg<f32>, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    let top = near * (fov_y / 2.0).tan();
    let right = top * aspect;
    frustum(-right, right, -top, top, near, far)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Zero;

    #[test]
    fn test_lerp_angle_shortest_arc() {
        // crossing the ±180° seam must take the short way around
        let a = lerp_angle(Deg(170.0), Deg(-170.0), 0.5);
        assert!((a.0 - 180.0).abs() < 1e-4 || (a.0 + 180.0).abs() < 1e-4);

        let b = lerp_angle(Deg(0.0), Deg(90.0), 0.5);
        assert!((b.0 - 45.0).abs() < 1e-4);
    }

    #[test]
    fn test_catmull_rom_endpoints() {
        let p0 = Vector3::new(-1.0, 0.0, 0.0);
        let p1 = Vector3::zero();
        let p2 = Vector3::new(1.0, 1.0, 0.0);
        let p3 = Vector3::new(2.0, 1.0, 0.0);

        assert_eq!(catmull_rom(p0, p1, p2, p3, 0.0), p1);
        assert_eq!(catmull_rom(p0, p1, p2, p3, 1.0), p2);
    }

    #[test]
    fn test_axis_plane_dist() {
        let plane = Hyperplane::axis_z(5.0);
        assert_eq!(plane.point_dist(Vector3::new(0.0, 0.0, 7.5)), 2.5);
        assert_eq!(plane.point_side(Vector3::new(0.0, 0.0, 2.0)), PlaneSide::Back);
    }

    #[test]
    fn test_frustum_cull_box() {
        // viewer at origin looking down +X with a 90° cone
        let frustum = Frustum::new(
            Vector3::zero(),
            Angles::zero(),
            Deg(90.0),
            Deg(90.0),
        );

        // box straight ahead is kept
        let inside = !frustum.cull_box(
            Vector3::new(10.0, -1.0, -1.0),
            Vector3::new(12.0, 1.0, 1.0),
        );
        assert!(inside);

        // box directly behind the viewer is culled
        let culled = frustum.cull_box(
            Vector3::new(-12.0, -1.0, -1.0),
            Vector3::new(-10.0, 1.0, 1.0),
        );
        assert!(culled);
    }

    #[test]
    fn test_frustum_box_straddling_not_culled() {
        let frustum = Frustum::new(
            Vector3::zero(),
            Angles::zero(),
            Deg(90.0),
            Deg(90.0),
        );

        // a box surrounding the viewer straddles every plane
        assert!(!frustum.cull_box(
            Vector3::new(-64.0, -64.0, -64.0),
            Vector3::new(64.0, 64.0, 64.0),
        ));
    }
}
