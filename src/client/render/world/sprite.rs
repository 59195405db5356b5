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

//! Sprite rendering: camera-facing textured quads.

use crate::common::sp2::SpriteFrame;

use super::super::pipeline::Pipeline;
use super::super::target::{COLOR_ATTACHMENT_FORMAT, DEPTH_ATTACHMENT_FORMAT};

use cgmath::Vector3;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SpriteVertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
    pub alpha: f32,
}

pub const SPRITE_VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x2,
    2 => Float32,
];

/// Expands one sprite frame into a billboard quad at `origin`, facing the
/// viewer along the camera basis vectors.
pub fn build_quad(
    frame: &SpriteFrame,
    origin: Vector3<f32>,
    view_right: Vector3<f32>,
    view_up: Vector3<f32>,
    alpha: f32,
) -> [SpriteVertex; 6] {
    let left = -(frame.origin_x as f32);
    let right = frame.width as f32 - frame.origin_x as f32;
    let top = frame.origin_y as f32;
    let bottom = frame.origin_y as f32 - frame.height as f32;

    let corner = |x: f32, y: f32, s: f32, t: f32| SpriteVertex {
        position: (origin + view_right * x + view_up * y).into(),
        texcoord: [s, t],
        alpha,
    };

    let tl = corner(left, top, 0.0, 0.0);
    let tr = corner(right, top, 1.0, 0.0);
    let br = corner(right, bottom, 1.0, 1.0);
    let bl = corner(left, bottom, 0.0, 1.0);

    [tl, tr, br, tl, br, bl]
}

lazy_static! {
    static ref BIND_GROUP_LAYOUT_ENTRIES: [Vec<wgpu::BindGroupLayoutEntry>; 1] = [vec![
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

pub struct SpritePipeline;

impl Pipeline for SpritePipeline {
    fn name() -> &'static str {
        "sprite"
    }

    fn shader_source() -> &'static str {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/sprite.wgsl"))
    }

    fn bind_group_layout_descriptors() -> Vec<wgpu::BindGroupLayoutDescriptor<'static>> {
        vec![wgpu::BindGroupLayoutDescriptor {
            label: Some("sprite bind group"),
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
        // sprites test depth but never write it
        Some(wgpu::DepthStencilState {
            format: DEPTH_ATTACHMENT_FORMAT,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        })
    }

    fn vertex_buffer_layouts() -> Vec<wgpu::VertexBufferLayout<'static>> {
        vec![wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<SpriteVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &SPRITE_VERTEX_ATTRIBUTES,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Zero;

    #[test]
    fn test_quad_centered_on_origin() {
        let frame = SpriteFrame {
            width: 32,
            height: 32,
            origin_x: 16,
            origin_y: 16,
            image_name: String::new(),
        };

        let quad = build_quad(
            &frame,
            Vector3::zero(),
            Vector3::unit_y(),
            Vector3::unit_z(),
            1.0,
        );

        // corners sit 16 units out in the camera plane
        assert_eq!(quad[0].position, [0.0, -16.0, 16.0]);
        assert_eq!(quad[2].position, [0.0, 16.0, -16.0]);
    }
}
