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

//! Grid subdivision for turbulent surfaces.
//!
//! Water and lava polygons are split on a world-aligned grid so the vertex
//! warp in the shader has enough geometry to bend. Output is a triangle
//! list.

use crate::common::math;

use cgmath::Vector3;

const SUBDIVIDE_SIZE: f32 = 64.0;

/// Minimum span on an axis before it is worth splitting.
const SPLIT_EPSILON: f32 = 8.0;

/// Subdivides a convex polygon on the world grid, returning triangles.
pub fn subdivide(verts: Vec<Vector3<f32>>) -> Vec<Vector3<f32>> {
    let mut out = Vec::new();
    if verts.len() >= 3 {
        subdivide_impl(verts, &mut out);
    }
    out
}

fn subdivide_impl(verts: Vec<Vector3<f32>>, output: &mut Vec<Vector3<f32>>) {
    let (min, max) = math::bounds(&verts);

    for axis in 0..3 {
        // grid line nearest the middle of the polygon's extent
        let mid = {
            let m = (min[axis] + max[axis]) / 2.0;
            SUBDIVIDE_SIZE * (m / SUBDIVIDE_SIZE).round()
        };

        if max[axis] - mid < SPLIT_EPSILON || mid - min[axis] < SPLIT_EPSILON {
            continue;
        }

        let (front, back) = split(&verts, axis, mid);
        subdivide_impl(front, output);
        subdivide_impl(back, output);
        return;
    }

    // small enough on every axis; fan it
    let v0 = verts[0];
    for i in 1..verts.len() - 1 {
        output.push(v0);
        output.push(verts[i]);
        output.push(verts[i + 1]);
    }
}

/// Splits a convex polygon by the axis-aligned plane `axis = mid`.
fn split(
    verts: &[Vector3<f32>],
    axis: usize,
    mid: f32,
) -> (Vec<Vector3<f32>>, Vec<Vector3<f32>>) {
    let mut front = Vec::new();
    let mut back = Vec::new();

    for i in 0..verts.len() {
        let v0 = verts[i];
        let v1 = verts[(i + 1) % verts.len()];
        let d0 = v0[axis] - mid;
        let d1 = v1[axis] - mid;

        if d0 >= 0.0 {
            front.push(v0);
        }
        if d0 <= 0.0 {
            back.push(v0);
        }

        // edge crosses the plane: add the intercept to both halves
        if (d0 > 0.0 && d1 < 0.0) || (d0 < 0.0 && d1 > 0.0) {
            let ratio = d0 / (d0 - d1);
            let intercept = v0 + (v1 - v0) * ratio;
            front.push(intercept);
            back.push(intercept);
        }
    }

    (front, back)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(size: f32) -> Vec<Vector3<f32>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(size, 0.0, 0.0),
            Vector3::new(size, size, 0.0),
            Vector3::new(0.0, size, 0.0),
        ]
    }

    #[test]
    fn test_small_polygon_passes_through() {
        let tris = subdivide(quad(32.0));
        // one quad fans into two triangles
        assert_eq!(tris.len(), 6);
    }

    #[test]
    fn test_large_polygon_subdivides() {
        let tris = subdivide(quad(256.0));
        assert!(tris.len() > 6);
        assert_eq!(tris.len() % 3, 0);

        // all output stays within the original bounds
        for v in &tris {
            assert!(v.x >= -0.01 && v.x <= 256.01);
            assert!(v.y >= -0.01 && v.y <= 256.01);
        }
    }

    #[test]
    fn test_area_preserved() {
        let area = |tris: &[Vector3<f32>]| -> f32 {
            tris.chunks_exact(3)
                .map(|t| 0.5 * (t[1] - t[0]).cross(t[2] - t[0]).magnitude())
                .sum()
        };

        use cgmath::InnerSpace;
        let tris = subdivide(quad(256.0));
        assert!((area(&tris) - 256.0 * 256.0).abs() < 1.0);
    }
}
