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

//! The reflection controller.
//!
//! Each frame the marked world is searched for horizontal turbulent
//! translucent surfaces; for each distinct water level (capped at
//! `MAX_REFL`) the scene is re-rendered from a viewpoint mirrored through
//! that plane into an offscreen target, which the water shader later blends
//! with the refraction path by Fresnel weight.

use crate::common::bsp::{Bsp, NodeChild, SurfaceFlags};
use crate::common::math::Angles;

use super::super::target::{Extent2d, ScenePassTarget};
use super::WorldVis;

use cgmath::Vector3;

/// Active reflectors per frame; later discoveries are dropped.
pub const MAX_REFL: usize = 2;

/// Default offscreen resolution per reflector.
pub const DEFAULT_REFL_DIM: u32 = 512;

/// Tolerance when deduplicating water levels.
const PLANE_EPSILON: f32 = 0.5;

/// A mirrored viewpoint for one water plane.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MirroredView {
    pub origin: Vector3<f32>,
    pub angles: Angles,
    /// World-space clip plane height; fragments below it are discarded in
    /// the reflected pass.
    pub clip_z: f32,
}

/// Mirrors the main view through the plane `z = plane_z`.
pub fn mirror_view(origin: Vector3<f32>, angles: Angles, plane_z: f32) -> MirroredView {
    MirroredView {
        origin: Vector3::new(origin.x, origin.y, 2.0 * plane_z - origin.z),
        angles: Angles {
            pitch: -angles.pitch,
            roll: angles.roll,
            yaw: angles.yaw,
        },
        clip_z: plane_z,
    }
}

/// Searches the marked world for reflector planes, in discovery order.
///
/// A face qualifies when it is turbulent, translucent and horizontal.
/// Duplicate levels collapse; discovery stops at `MAX_REFL`. Reflections
/// are suppressed entirely while the view is underwater.
pub fn find_reflectors(bsp: &Bsp, vis: &WorldVis, underwater: bool) -> Vec<f32> {
    let mut planes = Vec::new();

    if underwater || bsp.nodes.is_empty() {
        return planes;
    }

    find_recursive(bsp, vis, NodeChild::Node(0), &mut planes);
    planes
}

fn find_recursive(bsp: &Bsp, vis: &WorldVis, child: NodeChild, planes: &mut Vec<f32>) {
    if planes.len() >= MAX_REFL {
        return;
    }

    let node_id = match child {
        NodeChild::Leaf(_) => return,
        NodeChild::Node(node_id) => node_id,
    };

    let node = &bsp.nodes[node_id];

    for face_id in node.first_face..node.first_face + node.num_faces {
        if !vis.face_marked(face_id) {
            continue;
        }

        let face = &bsp.faces[face_id];
        let flags = bsp.texinfos[face.texinfo_id].flags;

        let turbulent = flags.contains(SurfaceFlags::WARP);
        let translucent = flags.intersects(SurfaceFlags::TRANS33 | SurfaceFlags::TRANS66);
        let horizontal = bsp.planes[face.plane_id].normal.z.abs() > 0.999;

        if !(turbulent && translucent && horizontal) {
            continue;
        }

        let z = face.vertices.first().map(|v| v.z).unwrap_or(0.0);
        if !planes.iter().any(|&p| (p - z).abs() < PLANE_EPSILON) {
            planes.push(z);
            if planes.len() >= MAX_REFL {
                return;
            }
        }
    }

    for next in node.children {
        find_recursive(bsp, vis, next, planes);
    }
}

/// One reflector's offscreen target and the view it was rendered from.
pub struct ReflectionPass {
    pub view: MirroredView,
    pub target: ScenePassTarget,
}

/// Owns the reflection targets, reusing them across frames at a fixed
/// resolution.
pub struct ReflectionController {
    dim: u32,
    passes: Vec<ReflectionPass>,
}

impl ReflectionController {
    pub fn new(dim: u32) -> ReflectionController {
        ReflectionController {
            dim: dim.max(16),
            passes: Vec::new(),
        }
    }

    pub fn dim(&self) -> u32 {
        self.dim
    }

    pub fn passes(&self) -> &[ReflectionPass] {
        &self.passes
    }

    /// Rebuilds the per-frame pass list for the discovered planes.
    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        planes: &[f32],
        origin: Vector3<f32>,
        angles: Angles,
    ) {
        // keep targets warm when the reflector count is stable
        while self.passes.len() > planes.len() {
            self.passes.pop();
        }

        for (i, &plane_z) in planes.iter().take(MAX_REFL).enumerate() {
            let view = mirror_view(origin, angles, plane_z);

            match self.passes.get_mut(i) {
                Some(pass) => pass.view = view,
                None => self.passes.push(ReflectionPass {
                    view,
                    target: ScenePassTarget::new(
                        device,
                        Extent2d {
                            width: self.dim,
                            height: self.dim,
                        },
                        1,
                    ),
                }),
            }
        }
    }

    /// The reflection image for the water surface nearest `plane_z`.
    pub fn target_for_plane(&self, plane_z: f32) -> Option<&ScenePassTarget> {
        self.passes
            .iter()
            .find(|pass| (pass.view.clip_z - plane_z).abs() < PLANE_EPSILON)
            .map(|pass| &pass.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Deg;

    #[test]
    fn test_mirror_view() {
        let view = mirror_view(
            Vector3::new(10.0, 20.0, 30.0),
            Angles {
                pitch: Deg(15.0),
                roll: Deg(0.0),
                yaw: Deg(90.0),
            },
            50.0,
        );

        assert_eq!(view.origin, Vector3::new(10.0, 20.0, 70.0));
        assert_eq!(view.angles.pitch, Deg(-15.0));
        assert_eq!(view.angles.yaw, Deg(90.0));
        assert_eq!(view.clip_z, 50.0);
    }

    #[test]
    fn test_three_reflectors_cap_at_two_passes() {
        use crate::common::bsp::{Bsp, ContentFlags, Face, FaceSide, Leaf, Node, TexInfo};
        use crate::common::math::Hyperplane;
        use cgmath::Zero;

        let water_face = |plane_id: usize, z: f32| Face {
            plane_id,
            side: FaceSide::Back,
            texinfo_id: 0,
            vertices: vec![
                Vector3::new(0.0, 0.0, z),
                Vector3::new(64.0, 0.0, z),
                Vector3::new(64.0, 64.0, z),
                Vector3::new(0.0, 64.0, z),
            ],
            light_styles: [255; 4],
            light_ofs: None,
            texture_mins: [0, 0],
            extents: [64, 64],
        };

        let bsp = Bsp {
            planes: vec![
                Hyperplane::axis_z(16.0),
                Hyperplane::axis_z(32.0),
                Hyperplane::axis_z(48.0),
            ],
            vertices: vec![],
            nodes: vec![Node {
                plane_id: 0,
                children: [NodeChild::Leaf(0), NodeChild::Leaf(0)],
                mins: Vector3::new(-128.0, -128.0, -128.0),
                maxs: Vector3::new(128.0, 128.0, 128.0),
                first_face: 0,
                num_faces: 3,
            }],
            leaves: vec![Leaf {
                contents: ContentFlags::empty(),
                cluster: 0,
                area: 0,
                mins: Vector3::zero(),
                maxs: Vector3::new(128.0, 128.0, 128.0),
                first_leaf_face: 0,
                num_leaf_faces: 3,
            }],
            texinfos: vec![TexInfo {
                s_vector: Vector3::unit_x(),
                s_offset: 0.0,
                t_vector: Vector3::unit_y(),
                t_offset: 0.0,
                flags: SurfaceFlags::WARP | SurfaceFlags::TRANS66,
                value: 0,
                texture_name: "water".to_owned(),
                next: None,
            }],
            faces: vec![
                water_face(0, 16.0),
                water_face(1, 32.0),
                water_face(2, 48.0),
            ],
            leaf_faces: vec![0, 1, 2],
            models: vec![],
            light_data: vec![],
            vis: None,
            num_areas: 1,
        };

        let mut vis = WorldVis::new(&bsp);
        vis.mark_leaves(&bsp, 0, &[], false);
        vis.walk(&bsp, Vector3::new(32.0, 32.0, 8.0), None);

        let planes = find_reflectors(&bsp, &vis, false);
        assert_eq!(planes.len(), MAX_REFL);

        // underwater suppresses every pass
        assert!(find_reflectors(&bsp, &vis, true).is_empty());
    }

    #[test]
    fn test_plane_dedup_and_cap() {
        // dedup and cap logic, exercised without a world
        let mut planes: Vec<f32> = Vec::new();
        for z in [64.0, 64.2, 32.0, 16.0, 8.0] {
            if planes.len() >= MAX_REFL {
                break;
            }
            if !planes.iter().any(|&p| (p - z).abs() < PLANE_EPSILON) {
                planes.push(z);
            }
        }

        assert_eq!(planes, vec![64.0, 32.0]);
    }
}
