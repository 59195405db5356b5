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

//! Alias model rendering.
//!
//! Keyframe pairs are blended per vertex on the CPU into a streaming vertex
//! buffer, with lighting from a dot table over the shared normal set; the
//! optional shell mode pushes vertices out along their normals.

use crate::common::math::{Angles, VERTEX_NORMALS};
use crate::common::md2::{Frame, Md2Model};

use super::super::pipeline::Pipeline;
use super::super::target::{COLOR_ATTACHMENT_FORMAT, DEPTH_ATTACHMENT_FORMAT};

use cgmath::{InnerSpace, Vector3};

/// Number of entries in the shade dot table; normal indices address the
/// first 162, the tail stays at ambient.
pub const SHADE_DOT_COUNT: usize = 256;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AliasVertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
    pub color: [f32; 3],
}

pub const ALIAS_VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x2,
    2 => Float32x3,
];

/// Builds the per-vertex lighting table for a light direction derived from
/// the entity's yaw.
pub fn build_shade_dots(yaw: Angles, ambient: f32) -> [f32; SHADE_DOT_COUNT] {
    let [forward, ..] = yaw.basis();
    let light_dir = -forward;

    let mut dots = [ambient; SHADE_DOT_COUNT];
    for (i, normal) in VERTEX_NORMALS.iter().enumerate() {
        dots[i] = normal.dot(light_dir).max(ambient);
    }
    dots
}

/// Blends two keyframes into model space.
///
/// `frontlerp` weights the newer frame; `shell_scale`, when nonzero,
/// expands each vertex along its newer-frame normal.
pub fn lerp_vertices(
    old_frame: &Frame,
    frame: &Frame,
    frontlerp: f32,
    shell_scale: f32,
) -> Vec<Vector3<f32>> {
    let backlerp = 1.0 - frontlerp;

    // fold the per-frame dequantization into the blend weights
    let front_scale = frame.scale * frontlerp;
    let back_scale = old_frame.scale * backlerp;
    let shift = old_frame.translate * backlerp + frame.translate * frontlerp;

    old_frame
        .vertices
        .iter()
        .zip(frame.vertices.iter())
        .map(|(old, new)| {
            let mut pos = Vector3::new(
                shift.x + old.pos_q[0] as f32 * back_scale.x + new.pos_q[0] as f32 * front_scale.x,
                shift.y + old.pos_q[1] as f32 * back_scale.y + new.pos_q[1] as f32 * front_scale.y,
                shift.z + old.pos_q[2] as f32 * back_scale.z + new.pos_q[2] as f32 * front_scale.z,
            );

            if shell_scale != 0.0 {
                pos += VERTEX_NORMALS[new.normal_idx as usize] * shell_scale;
            }

            pos
        })
        .collect()
}

/// Assembles the triangle list for one entity's current pose.
pub fn build_pose(
    model: &Md2Model,
    old_frame_id: usize,
    frame_id: usize,
    frontlerp: f32,
    shell_scale: f32,
    shade_dots: &[f32; SHADE_DOT_COUNT],
    light_color: [f32; 3],
) -> Vec<AliasVertex> {
    // out-of-range frames snap to the last, matching animation overruns
    let clamp_frame = |id: usize| id.min(model.frames.len() - 1);
    let old_frame = &model.frames[clamp_frame(old_frame_id)];
    let frame = &model.frames[clamp_frame(frame_id)];

    let positions = lerp_vertices(old_frame, frame, frontlerp, shell_scale);

    let mut out = Vec::with_capacity(model.triangles.len() * 3);
    for triangle in &model.triangles {
        for corner in 0..3 {
            let vertex_id = triangle.vertex_ids[corner] as usize;
            let texcoord_id = triangle.texcoord_ids[corner] as usize;

            let shade = shade_dots[frame.vertices[vertex_id].normal_idx as usize];
            let [s, t] = model.texcoords[texcoord_id];

            out.push(AliasVertex {
                position: positions[vertex_id].into(),
                texcoord: [
                    s as f32 / model.skin_width as f32,
                    t as f32 / model.skin_height as f32,
                ],
                color: [
                    light_color[0] * shade,
                    light_color[1] * shade,
                    light_color[2] * shade,
                ],
            });
        }
    }
    out
}

lazy_static! {
    static ref BIND_GROUP_LAYOUT_ENTRIES: [Vec<wgpu::BindGroupLayoutEntry>; 1] = [vec![
        // skin texture
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        },
    ]];
}

pub struct AliasPipeline;

impl Pipeline for AliasPipeline {
    fn name() -> &'static str {
        "alias"
    }

    fn shader_source() -> &'static str {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/alias.wgsl"))
    }

    fn bind_group_layout_descriptors() -> Vec<wgpu::BindGroupLayoutDescriptor<'static>> {
        vec![wgpu::BindGroupLayoutDescriptor {
            label: Some("alias per-skin bind group"),
            entries: &BIND_GROUP_LAYOUT_ENTRIES[0],
        }]
    }

    fn primitive_state() -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Cw,
            cull_mode: None,
            ..Default::default()
        }
    }

    fn color_target_states() -> Vec<Option<wgpu::ColorTargetState>> {
        vec![Some(wgpu::ColorTargetState {
            format: COLOR_ATTACHMENT_FORMAT,
            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
            write_mask: wgpu::ColorWrites::ALL,
        })]
    }

    fn depth_stencil_state() -> Option<wgpu::DepthStencilState> {
        Some(wgpu::DepthStencilState {
            format: DEPTH_ATTACHMENT_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        })
    }

    fn vertex_buffer_layouts() -> Vec<wgpu::VertexBufferLayout<'static>> {
        vec![wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<AliasVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ALIAS_VERTEX_ATTRIBUTES,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::md2::FrameVertex;

    fn frame(name: &str, q: u8) -> Frame {
        Frame {
            name: name.to_owned(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            translate: Vector3::new(0.0, 0.0, 0.0),
            vertices: vec![FrameVertex {
                pos_q: [q, 0, 0],
                normal_idx: 5, // straight up (0, 0, 1)
            }],
        }
    }

    #[test]
    fn test_lerp_midpoint() {
        let old = frame("a", 0);
        let new = frame("b", 100);
        let positions = lerp_vertices(&old, &new, 0.5, 0.0);
        assert_eq!(positions[0], Vector3::new(50.0, 0.0, 0.0));
    }

    #[test]
    fn test_lerp_endpoints() {
        let old = frame("a", 10);
        let new = frame("b", 200);
        assert_eq!(
            lerp_vertices(&old, &new, 0.0, 0.0)[0],
            Vector3::new(10.0, 0.0, 0.0)
        );
        assert_eq!(
            lerp_vertices(&old, &new, 1.0, 0.0)[0],
            Vector3::new(200.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_shell_expands_along_normal() {
        let old = frame("a", 0);
        let new = frame("b", 0);
        let positions = lerp_vertices(&old, &new, 1.0, 4.0);
        // normal 5 is (0, 0, 1)
        assert_eq!(positions[0], Vector3::new(0.0, 0.0, 4.0));
    }

    #[test]
    fn test_shade_dots_bounded() {
        let dots = build_shade_dots(Angles::zero(), 0.3);
        for dot in dots.iter() {
            assert!(*dot >= 0.3 && *dot <= 1.0);
        }
    }
}
