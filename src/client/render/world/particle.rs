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

//! Particle rendering.
//!
//! Particles are billboard quads expanded in the vertex shader; each class
//! is one draw with its own size/blend parameters from a static table.

use crate::client::entity::{Particle, ParticleKind};

use super::super::pipeline::Pipeline;
use super::super::target::{COLOR_ATTACHMENT_FORMAT, DEPTH_ATTACHMENT_FORMAT};

/// Fixed draw parameters per particle class.
#[derive(Copy, Clone, Debug)]
pub struct ParticleParams {
    pub kind: ParticleKind,
    /// Base quad half-size in world units.
    pub size: f32,
    /// Additive blend weight folded into the shader (1.0 = fully additive).
    pub additive: f32,
}

pub const PARTICLE_PARAMS: [ParticleParams; 5] = [
    ParticleParams {
        kind: ParticleKind::Default,
        size: 1.0,
        additive: 0.0,
    },
    ParticleParams {
        kind: ParticleKind::Fire,
        size: 2.0,
        additive: 1.0,
    },
    ParticleParams {
        kind: ParticleKind::Smoke,
        size: 3.0,
        additive: 0.0,
    },
    ParticleParams {
        kind: ParticleKind::Bubble,
        size: 1.0,
        additive: 0.5,
    },
    ParticleParams {
        kind: ParticleKind::Blood,
        size: 1.5,
        additive: 0.0,
    },
];

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ParticleVertex {
    pub position: [f32; 3],
    /// Quad corner in {-1,1}², expanded along the view basis in the shader.
    pub corner: [f32; 2],
    pub color: [f32; 3],
    pub alpha: f32,
    pub size: f32,
    pub additive: f32,
}

pub const PARTICLE_VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 6] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x2,
    2 => Float32x3,
    3 => Float32,
    4 => Float32,
    5 => Float32,
];

const CORNERS: [[f32; 2]; 6] = [
    [-1.0, -1.0],
    [-1.0, 1.0],
    [1.0, 1.0],
    [-1.0, -1.0],
    [1.0, 1.0],
    [1.0, -1.0],
];

/// Expands live particles into per-class vertex runs.
///
/// Returns the vertex stream and one `(kind, vertex range)` entry per class
/// that has particles this frame.
pub fn build_batches<'a>(
    particles: impl Iterator<Item = &'a Particle>,
) -> (Vec<ParticleVertex>, Vec<(ParticleKind, std::ops::Range<u32>)>) {
    let mut by_kind: [Vec<&Particle>; PARTICLE_PARAMS.len()] = Default::default();
    for particle in particles {
        by_kind[particle.kind as usize].push(particle);
    }

    let mut vertices = Vec::new();
    let mut batches = Vec::new();

    for params in PARTICLE_PARAMS.iter() {
        let bucket = &by_kind[params.kind as usize];
        if bucket.is_empty() {
            continue;
        }

        let start = vertices.len() as u32;
        for particle in bucket {
            for corner in CORNERS {
                vertices.push(ParticleVertex {
                    position: particle.origin.into(),
                    corner,
                    color: particle.color,
                    alpha: particle.alpha,
                    size: params.size,
                    additive: params.additive,
                });
            }
        }
        batches.push((params.kind, start..vertices.len() as u32));
    }

    (vertices, batches)
}

pub struct ParticlePipeline;

impl Pipeline for ParticlePipeline {
    fn name() -> &'static str {
        "particle"
    }

    fn shader_source() -> &'static str {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/particle.wgsl"))
    }

    fn bind_group_layout_descriptors() -> Vec<wgpu::BindGroupLayoutDescriptor<'static>> {
        Vec::new()
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
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        })
    }

    fn vertex_buffer_layouts() -> Vec<wgpu::VertexBufferLayout<'static>> {
        vec![wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ParticleVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &PARTICLE_VERTEX_ATTRIBUTES,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Vector3, Zero};
    use chrono::Duration;

    fn particle(kind: ParticleKind) -> Particle {
        Particle {
            kind,
            origin: Vector3::zero(),
            velocity: Vector3::zero(),
            color: [1.0, 0.5, 0.0],
            alpha: 0.8,
            expire: Duration::seconds(1),
        }
    }

    #[test]
    fn test_one_batch_per_live_class() {
        let particles = vec![
            particle(ParticleKind::Fire),
            particle(ParticleKind::Fire),
            particle(ParticleKind::Blood),
        ];

        let (vertices, batches) = build_batches(particles.iter());
        assert_eq!(batches.len(), 2);
        assert_eq!(vertices.len(), 18); // 3 particles x 6 corners

        let fire = batches.iter().find(|(k, _)| *k == ParticleKind::Fire).unwrap();
        assert_eq!(fire.1.len(), 12);
    }

    #[test]
    fn test_empty_input() {
        let (vertices, batches) = build_batches(std::iter::empty());
        assert!(vertices.is_empty());
        assert!(batches.is_empty());
    }
}
