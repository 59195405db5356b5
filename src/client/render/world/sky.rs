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

//! Sky rendering.
//!
//! The six side images are combined into one cube texture; marked sky faces
//! are drawn after the opaque world with a shader that pins them to the far
//! plane and samples the cube along the rotated view direction.

use crate::common::{
    image::{pcx, tga},
    vfs::Vfs,
};

use super::super::error::RenderError;
use super::super::palette::Palette;
use super::super::pipeline::Pipeline;
use super::super::target::{COLOR_ATTACHMENT_FORMAT, DEPTH_ATTACHMENT_FORMAT};

use cgmath::{Deg, Matrix3, Matrix4, Vector3};

/// Suffixes in cube-face order (+x, -x, +y, -y, +z, -z).
const SIDE_SUFFIXES: [&str; 6] = ["rt", "lf", "bk", "ft", "up", "dn"];

/// CPU-side sky cube data, one RGBA square per side.
pub struct SkyBox {
    pub side_dim: u32,
    pub sides: [Vec<u8>; 6],
    pub axis: Vector3<f32>,
    pub rotate: f32,
}

impl SkyBox {
    /// Loads `env/<base><side>` images, preferring TGA over PCX, and mips
    /// them down by `skymip` levels.
    ///
    /// The rotation axis is stored exactly as the map supplied it; a
    /// non-unit axis changes the apparent speed and is preserved for parity
    /// with existing maps.
    pub fn load(
        vfs: &Vfs,
        palette: &Palette,
        base: &str,
        axis: Vector3<f32>,
        rotate: f32,
        skymip: u32,
    ) -> Result<SkyBox, RenderError> {
        let mut sides: [Vec<u8>; 6] = Default::default();
        let mut side_dim = 0;

        for (i, suffix) in SIDE_SUFFIXES.iter().enumerate() {
            let (mut rgba, mut dim) = load_side(vfs, palette, base, suffix)?;

            for _ in 0..skymip {
                if dim <= 1 {
                    break;
                }
                rgba = halve(&rgba, dim);
                dim /= 2;
            }

            if side_dim == 0 {
                side_dim = dim;
            } else if side_dim != dim {
                return Err(RenderError::malformed(
                    format!("env/{}{}", base, suffix),
                    "sky sides differ in size",
                ));
            }

            sides[i] = rgba;
        }

        Ok(SkyBox {
            side_dim,
            sides,
            axis,
            rotate,
        })
    }

    /// Current sky rotation, applied to view directions in the shader.
    pub fn rotation(&self, time_seconds: f32) -> Matrix4<f32> {
        if self.rotate == 0.0 {
            return Matrix4::from_scale(1.0);
        }
        Matrix3::from_axis_angle(self.axis, Deg(self.rotate * time_seconds)).into()
    }

    /// Uploads the six sides as one cube texture.
    pub fn create_texture(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> wgpu::TextureView {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("sky cube"),
            size: wgpu::Extent3d {
                width: self.side_dim,
                height: self.side_dim,
                depth_or_array_layers: 6,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (layer, side) in self.sides.iter().enumerate() {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: layer as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                side,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.side_dim * 4),
                    rows_per_image: Some(self.side_dim),
                },
                wgpu::Extent3d {
                    width: self.side_dim,
                    height: self.side_dim,
                    depth_or_array_layers: 1,
                },
            );
        }

        texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        })
    }
}

fn load_side(
    vfs: &Vfs,
    palette: &Palette,
    base: &str,
    suffix: &str,
) -> Result<(Vec<u8>, u32), RenderError> {
    let tga_name = format!("env/{}{}.tga", base, suffix);
    if let Ok(data) = vfs.open(&tga_name) {
        let src = tga::load(&data).map_err(|e| RenderError::from_image(&tga_name, e))?;
        let dim = src.width;
        if src.width != src.height {
            return Err(RenderError::malformed(&tga_name, "sky side not square"));
        }
        return Ok((src.into_rgba(palette.rgb()), dim));
    }

    let pcx_name = format!("env/{}{}.pcx", base, suffix);
    let data = vfs
        .open(&pcx_name)
        .map_err(|e| RenderError::from_vfs(&pcx_name, e))?;
    let src = pcx::load(&data).map_err(|e| RenderError::from_image(&pcx_name, e))?;
    let dim = src.width;
    if src.width != src.height {
        return Err(RenderError::malformed(&pcx_name, "sky side not square"));
    }
    Ok((src.into_rgba(palette.rgb()), dim))
}

/// Box-filters a square RGBA image down one level.
fn halve(rgba: &[u8], dim: u32) -> Vec<u8> {
    let next = (dim / 2).max(1);
    let mut out = Vec::with_capacity((next * next * 4) as usize);

    for y in 0..next {
        for x in 0..next {
            for c in 0..4usize {
                let sum = rgba[((y * 2 * dim + x * 2) * 4) as usize + c] as u32
                    + rgba[((y * 2 * dim + x * 2 + 1) * 4) as usize + c] as u32
                    + rgba[(((y * 2 + 1) * dim + x * 2) * 4) as usize + c] as u32
                    + rgba[(((y * 2 + 1) * dim + x * 2 + 1) * 4) as usize + c] as u32;
                out.push((sum / 4) as u8);
            }
        }
    }

    out
}

lazy_static! {
    static ref BIND_GROUP_LAYOUT_ENTRIES: [Vec<wgpu::BindGroupLayoutEntry>; 1] = [vec![
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::Cube,
                multisampled: false,
            },
            count: None,
        },
        // sky rotation
        wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(64),
            },
            count: None,
        },
    ]];
}

pub const SKY_VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 1] =
    wgpu::vertex_attr_array![0 => Float32x3];

pub struct SkyPipeline;

impl Pipeline for SkyPipeline {
    fn name() -> &'static str {
        "sky"
    }

    fn shader_source() -> &'static str {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/sky.wgsl"))
    }

    fn bind_group_layout_descriptors() -> Vec<wgpu::BindGroupLayoutDescriptor<'static>> {
        vec![wgpu::BindGroupLayoutDescriptor {
            label: Some("sky bind group"),
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
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        })]
    }

    fn depth_stencil_state() -> Option<wgpu::DepthStencilState> {
        // sky fragments land exactly on the far plane
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
            array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &SKY_VERTEX_ATTRIBUTES,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halve_averages() {
        // 2x2 image of distinct values halves to their average
        let rgba = vec![
            0, 0, 0, 255, //
            100, 0, 0, 255, //
            100, 0, 0, 255, //
            200, 0, 0, 255,
        ];
        let out = halve(&rgba, 2);
        assert_eq!(&out, &[100, 0, 0, 255]);
    }

    #[test]
    fn test_rotation_identity_when_static() {
        let sky = SkyBox {
            side_dim: 1,
            sides: Default::default(),
            axis: Vector3::new(0.0, 0.0, 1.0),
            rotate: 0.0,
        };
        let m = sky.rotation(123.0);
        assert_eq!(m, Matrix4::from_scale(1.0));
    }
}
