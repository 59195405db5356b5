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

//! The post-process chain.
//!
//! Fixed pass order over the composed scene color: SSAO, bloom, FSR spatial
//! upscale, temporal accumulation, FXAA, then the final polyblend + gamma
//! pass into the presentable image. Every pass is a full-screen triangle;
//! each output feeds the next pass's sampler.

use cgmath::Matrix4;

use super::pipeline::Pipeline;
use super::target::{create_color_attachment, Extent2d, COLOR_ATTACHMENT_FORMAT};

pub const BLOOM_MIP_COUNT: usize = 4;

/// Neighborhood clamp width for the temporal pass.
///
/// The reference treats 1.0 and 2.0 differently; the default splits the
/// difference and stays tunable through `PostSettings`.
pub const DEFAULT_COLOR_BOX_SCALE: f32 = 1.25;

/// Per-frame settings sampled from the cvar surface.
#[derive(Copy, Clone, Debug)]
pub struct PostSettings {
    pub bloom: bool,
    pub bloom_threshold: f32,
    pub bloom_intensity: f32,
    pub ssao: bool,
    pub ssao_radius: f32,
    pub ssao_intensity: f32,
    pub fxaa: bool,
    pub fsr: bool,
    /// Render scale in (0, 1]; FSR upsamples when below 1.
    pub fsr_scale: f32,
    pub fsr_sharpness: f32,
    pub temporal: bool,
    pub color_box_scale: f32,
    pub gamma: f32,
    /// Damage/underwater tint folded in by the final pass.
    pub v_blend: [f32; 4],
}

impl Default for PostSettings {
    fn default() -> Self {
        PostSettings {
            bloom: false,
            bloom_threshold: 0.7,
            bloom_intensity: 0.5,
            ssao: false,
            ssao_radius: 16.0,
            ssao_intensity: 1.0,
            fxaa: false,
            fsr: false,
            fsr_scale: 1.0,
            fsr_sharpness: 0.5,
            temporal: false,
            color_box_scale: DEFAULT_COLOR_BOX_SCALE,
            gamma: 1.0,
            v_blend: [0.0; 4],
        }
    }
}

/// Uniform block shared by every post pass.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PostUniforms {
    pub inv_view_proj: [[f32; 4]; 4],
    pub prev_view_proj: [[f32; 4]; 4],
    pub v_blend: [f32; 4],
    /// xy: 1/source size, zw: 1/target size.
    pub inv_sizes: [f32; 4],
    /// xy: separable blur direction in texels.
    pub direction: [f32; 4],
    pub bloom_threshold: f32,
    pub bloom_intensity: f32,
    pub ssao_radius: f32,
    pub ssao_intensity: f32,
    pub fsr_sharpness: f32,
    pub color_box_scale: f32,
    pub history_weight: f32,
    pub gamma: f32,
}

impl Default for PostUniforms {
    fn default() -> Self {
        let identity: [[f32; 4]; 4] = Matrix4::from_scale(1.0f32).into();
        PostUniforms {
            inv_view_proj: identity,
            prev_view_proj: identity,
            v_blend: [0.0; 4],
            inv_sizes: [0.0; 4],
            direction: [0.0; 4],
            bloom_threshold: 0.7,
            bloom_intensity: 0.5,
            ssao_radius: 16.0,
            ssao_intensity: 1.0,
            fsr_sharpness: 0.5,
            color_box_scale: DEFAULT_COLOR_BOX_SCALE,
            history_weight: 0.9,
            gamma: 1.0,
        }
    }
}

macro_rules! screen_pipeline {
    ($name:ident, $label:expr, $shader:expr) => {
        pub struct $name;

        impl Pipeline for $name {
            fn name() -> &'static str {
                $label
            }

            fn shader_source() -> &'static str {
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/", $shader))
            }

            fn bind_group_layout_descriptors() -> Vec<wgpu::BindGroupLayoutDescriptor<'static>> {
                Vec::new()
            }

            fn primitive_state() -> wgpu::PrimitiveState {
                wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
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
                None
            }

            fn vertex_buffer_layouts() -> Vec<wgpu::VertexBufferLayout<'static>> {
                Vec::new()
            }
        }
    };
}

screen_pipeline!(SsaoPipeline, "ssao", "ssao.wgsl");
screen_pipeline!(SsaoBlurPipeline, "ssao_blur", "ssao_blur.wgsl");
screen_pipeline!(SsaoApplyPipeline, "ssao_apply", "ssao_apply.wgsl");
screen_pipeline!(BloomExtractPipeline, "bloom_extract", "bloom_extract.wgsl");
screen_pipeline!(BloomBlurPipeline, "bloom_blur", "bloom_blur.wgsl");
screen_pipeline!(BloomCompositePipeline, "bloom_composite", "bloom_composite.wgsl");
screen_pipeline!(EasuPipeline, "fsr_easu", "fsr_easu.wgsl");
screen_pipeline!(RcasPipeline, "fsr_rcas", "fsr_rcas.wgsl");
screen_pipeline!(TemporalPipeline, "temporal", "temporal.wgsl");
screen_pipeline!(FxaaPipeline, "fxaa", "fxaa.wgsl");
screen_pipeline!(FinalPipeline, "final", "final.wgsl");
screen_pipeline!(BlitPipeline, "blit", "blit.wgsl");

/// The shared bind group layout for post passes: one uniform block, two
/// samplers, then up to `MAX_PASS_INPUTS` sampled textures.
pub const MAX_PASS_INPUTS: u32 = 5;

pub fn pass_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let mut entries = vec![
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: wgpu::BufferSize::new(
                    std::mem::size_of::<PostUniforms>() as u64
                ),
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
            count: None,
        },
    ];

    for i in 0..MAX_PASS_INPUTS {
        // slot 2 is reserved for depth, which binds as unfilterable float
        let filterable = i != 2;
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 3 + i,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("post pass bind group"),
        entries: &entries,
    })
}

/// Order of enabled passes for a settings combination; pure and testable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PassKind {
    Ssao,
    Bloom,
    FsrEasu,
    FsrRcas,
    Temporal,
    Fxaa,
    Final,
}

pub fn plan_passes(settings: &PostSettings) -> Vec<PassKind> {
    let mut plan = Vec::new();

    if settings.ssao {
        plan.push(PassKind::Ssao);
    }
    if settings.bloom {
        plan.push(PassKind::Bloom);
    }
    if settings.fsr && settings.fsr_scale < 1.0 {
        plan.push(PassKind::FsrEasu);
        plan.push(PassKind::FsrRcas);
    }
    if settings.temporal {
        plan.push(PassKind::Temporal);
    }
    if settings.fxaa {
        plan.push(PassKind::Fxaa);
    }
    plan.push(PassKind::Final);
    plan
}

struct ColorBuffer {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

fn color_buffer(device: &wgpu::Device, label: &str, size: Extent2d) -> ColorBuffer {
    let texture = create_color_attachment(
        device,
        label,
        size,
        1,
        wgpu::TextureUsages::TEXTURE_BINDING,
    );
    let view = texture.create_view(&Default::default());
    ColorBuffer {
        _texture: texture,
        view,
    }
}

/// All post-chain GPU state: pipelines, intermediates and history.
pub struct PostChain {
    layout: wgpu::BindGroupLayout,

    ssao: wgpu::RenderPipeline,
    ssao_blur: wgpu::RenderPipeline,
    ssao_apply: wgpu::RenderPipeline,
    bloom_extract: wgpu::RenderPipeline,
    bloom_blur: wgpu::RenderPipeline,
    bloom_composite: wgpu::RenderPipeline,
    easu: wgpu::RenderPipeline,
    rcas: wgpu::RenderPipeline,
    temporal: wgpu::RenderPipeline,
    fxaa: wgpu::RenderPipeline,
    final_pass: wgpu::RenderPipeline,
    blit_pipeline: wgpu::RenderPipeline,

    render_size: Extent2d,
    output_size: Extent2d,

    // ping-pong at render resolution, then at output resolution
    render_ping: ColorBuffer,
    render_pong: ColorBuffer,
    output_ping: ColorBuffer,
    output_pong: ColorBuffer,

    ssao_raw: ColorBuffer,
    ssao_blurred: ColorBuffer,
    bloom_mips: Vec<(Extent2d, ColorBuffer, ColorBuffer)>,

    history: ColorBuffer,
    pub history_valid: bool,

    noise: ColorBuffer,
}

impl PostChain {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, render_size: Extent2d, output_size: Extent2d) -> PostChain {
        let layout = pass_bind_group_layout(device);
        let layouts = [&layout];

        let mut bloom_mips = Vec::with_capacity(BLOOM_MIP_COUNT);
        let mut mip_size = Extent2d {
            width: (render_size.width / 2).max(1),
            height: (render_size.height / 2).max(1),
        };
        for i in 0..BLOOM_MIP_COUNT {
            bloom_mips.push((
                mip_size,
                color_buffer(device, &format!("bloom mip {} a", i), mip_size),
                color_buffer(device, &format!("bloom mip {} b", i), mip_size),
            ));
            mip_size = Extent2d {
                width: (mip_size.width / 2).max(1),
                height: (mip_size.height / 2).max(1),
            };
        }

        let noise = create_noise_texture(device, queue);

        PostChain {
            ssao: SsaoPipeline::create_with_layouts(device, &layouts, 1),
            ssao_blur: SsaoBlurPipeline::create_with_layouts(device, &layouts, 1),
            ssao_apply: SsaoApplyPipeline::create_with_layouts(device, &layouts, 1),
            bloom_extract: BloomExtractPipeline::create_with_layouts(device, &layouts, 1),
            bloom_blur: BloomBlurPipeline::create_with_layouts(device, &layouts, 1),
            bloom_composite: BloomCompositePipeline::create_with_layouts(device, &layouts, 1),
            easu: EasuPipeline::create_with_layouts(device, &layouts, 1),
            rcas: RcasPipeline::create_with_layouts(device, &layouts, 1),
            temporal: TemporalPipeline::create_with_layouts(device, &layouts, 1),
            fxaa: FxaaPipeline::create_with_layouts(device, &layouts, 1),
            final_pass: FinalPipeline::create_with_layouts(device, &layouts, 1),
            blit_pipeline: BlitPipeline::create_with_layouts(device, &layouts, 1),

            render_size,
            output_size,
            render_ping: color_buffer(device, "post render ping", render_size),
            render_pong: color_buffer(device, "post render pong", render_size),
            output_ping: color_buffer(device, "post output ping", output_size),
            output_pong: color_buffer(device, "post output pong", output_size),
            ssao_raw: color_buffer(device, "ssao raw", render_size),
            ssao_blurred: color_buffer(device, "ssao blurred", render_size),
            bloom_mips,
            history: color_buffer(device, "temporal history", output_size),
            history_valid: false,
            noise,
            layout,
        }
    }

    pub fn render_size(&self) -> Extent2d {
        self.render_size
    }

    pub fn output_size(&self) -> Extent2d {
        self.output_size
    }

    fn bind_group(
        &self,
        device: &wgpu::Device,
        uniforms: &wgpu::Buffer,
        linear: &wgpu::Sampler,
        nearest: &wgpu::Sampler,
        inputs: &[&wgpu::TextureView],
    ) -> wgpu::BindGroup {
        assert!(inputs.len() <= MAX_PASS_INPUTS as usize && !inputs.is_empty());

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: uniforms,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<PostUniforms>() as u64),
                }),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(linear),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(nearest),
            },
        ];

        for i in 0..MAX_PASS_INPUTS as usize {
            // unused slots alias the first input
            let view = inputs.get(i).copied().unwrap_or(inputs[0]);
            entries.push(wgpu::BindGroupEntry {
                binding: 3 + i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }

        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("post pass"),
            layout: &self.layout,
            entries: &entries,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipeline: &wgpu::RenderPipeline,
        bind_group: &wgpu::BindGroup,
        offset: wgpu::DynamicOffset,
        target: &wgpu::TextureView,
        label: &str,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            ..Default::default()
        });

        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[offset]);
        pass.draw(0..3, 0..1);
    }

    /// Runs the enabled passes over `scene_color`, ending in `present_view`.
    ///
    /// `uniform_blocks` must hold one pre-written `PostUniforms` block per
    /// pass instance, 256-byte aligned; `depth_view` backs SSAO and the
    /// temporal reprojection.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        settings: &PostSettings,
        uniforms: &wgpu::Buffer,
        mut next_block: impl FnMut() -> wgpu::DynamicOffset,
        linear: &wgpu::Sampler,
        nearest: &wgpu::Sampler,
        scene_color: &wgpu::TextureView,
        depth_view: &wgpu::TextureView,
        present_view: &wgpu::TextureView,
    ) {
        let plan = plan_passes(settings);
        debug!("post plan: {:?}", plan);

        let mut history_written = false;

        // at render resolution until FSR (or the final pass) rescales
        let mut current: &wgpu::TextureView = scene_color;
        let mut render_scratch = [&self.render_ping.view, &self.render_pong.view];
        let mut output_scratch = [&self.output_ping.view, &self.output_pong.view];

        let mut take_render = || {
            render_scratch.rotate_left(1);
            render_scratch[1]
        };
        let mut take_output = || {
            output_scratch.rotate_left(1);
            output_scratch[1]
        };

        for kind in plan.iter() {
            match kind {
                PassKind::Ssao => {
                    // depth rides the dedicated unfilterable slot 2
                    let bg = self.bind_group(
                        device,
                        uniforms,
                        linear,
                        nearest,
                        &[&self.noise.view, &self.noise.view, depth_view],
                    );
                    self.run_pass(encoder, &self.ssao, &bg, next_block(), &self.ssao_raw.view, "ssao");

                    let bg = self.bind_group(device, uniforms, linear, nearest, &[&self.ssao_raw.view]);
                    self.run_pass(
                        encoder,
                        &self.ssao_blur,
                        &bg,
                        next_block(),
                        &self.ssao_blurred.view,
                        "ssao blur",
                    );

                    let out = take_render();
                    let bg = self.bind_group(
                        device,
                        uniforms,
                        linear,
                        nearest,
                        &[current, &self.ssao_blurred.view],
                    );
                    self.run_pass(encoder, &self.ssao_apply, &bg, next_block(), out, "ssao apply");
                    current = out;
                }

                PassKind::Bloom => {
                    // extract into the top mip
                    let bg = self.bind_group(device, uniforms, linear, nearest, &[current]);
                    self.run_pass(
                        encoder,
                        &self.bloom_extract,
                        &bg,
                        next_block(),
                        &self.bloom_mips[0].1.view,
                        "bloom extract",
                    );

                    // downsample + separable blur through the chain
                    for mip in 0..BLOOM_MIP_COUNT {
                        if mip > 0 {
                            let src = &self.bloom_mips[mip - 1].1.view;
                            let bg = self.bind_group(device, uniforms, linear, nearest, &[src]);
                            self.run_pass(
                                encoder,
                                &self.bloom_extract,
                                &bg,
                                next_block(),
                                &self.bloom_mips[mip].1.view,
                                "bloom downsample",
                            );
                        }

                        // horizontal into scratch, vertical back
                        let bg = self.bind_group(
                            device,
                            uniforms,
                            linear,
                            nearest,
                            &[&self.bloom_mips[mip].1.view],
                        );
                        self.run_pass(
                            encoder,
                            &self.bloom_blur,
                            &bg,
                            next_block(),
                            &self.bloom_mips[mip].2.view,
                            "bloom blur h",
                        );

                        let bg = self.bind_group(
                            device,
                            uniforms,
                            linear,
                            nearest,
                            &[&self.bloom_mips[mip].2.view],
                        );
                        self.run_pass(
                            encoder,
                            &self.bloom_blur,
                            &bg,
                            next_block(),
                            &self.bloom_mips[mip].1.view,
                            "bloom blur v",
                        );
                    }

                    let out = take_render();
                    let bg = self.bind_group(
                        device,
                        uniforms,
                        linear,
                        nearest,
                        &[
                            current,
                            &self.bloom_mips[0].1.view,
                            &self.bloom_mips[1].1.view,
                            &self.bloom_mips[2].1.view,
                            &self.bloom_mips[3].1.view,
                        ],
                    );
                    self.run_pass(
                        encoder,
                        &self.bloom_composite,
                        &bg,
                        next_block(),
                        out,
                        "bloom composite",
                    );
                    current = out;
                }

                PassKind::FsrEasu => {
                    let out = take_output();
                    let bg = self.bind_group(device, uniforms, linear, nearest, &[current]);
                    self.run_pass(encoder, &self.easu, &bg, next_block(), out, "fsr easu");
                    current = out;
                }

                PassKind::FsrRcas => {
                    let out = take_output();
                    let bg = self.bind_group(device, uniforms, linear, nearest, &[current]);
                    self.run_pass(encoder, &self.rcas, &bg, next_block(), out, "fsr rcas");
                    current = out;
                }

                PassKind::Temporal => {
                    let out = take_output();
                    let bg = self.bind_group(
                        device,
                        uniforms,
                        linear,
                        nearest,
                        &[current, &self.history.view, depth_view],
                    );
                    self.run_pass(encoder, &self.temporal, &bg, next_block(), out, "temporal");
                    current = out;

                    // refresh history with the accumulated result
                    let bg = self.bind_group(device, uniforms, linear, nearest, &[current]);
                    self.run_pass(
                        encoder,
                        &self.final_passthrough(),
                        &bg,
                        next_block(),
                        &self.history.view,
                        "history copy",
                    );
                    history_written = true;
                }

                PassKind::Fxaa => {
                    let out = take_output();
                    let bg = self.bind_group(device, uniforms, linear, nearest, &[current]);
                    self.run_pass(encoder, &self.fxaa, &bg, next_block(), out, "fxaa");
                    current = out;
                }

                PassKind::Final => {
                    let bg = self.bind_group(device, uniforms, linear, nearest, &[current]);
                    self.run_pass(
                        encoder,
                        &self.final_pass,
                        &bg,
                        next_block(),
                        present_view,
                        "final",
                    );
                }
            }
        }

        if history_written {
            self.history_valid = true;
        }
    }

    fn final_passthrough(&self) -> &wgpu::RenderPipeline {
        &self.blit_pipeline
    }

    /// Copies one image to another through the blit pipeline.
    #[allow(clippy::too_many_arguments)]
    pub fn blit(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        uniforms: &wgpu::Buffer,
        block: wgpu::DynamicOffset,
        linear: &wgpu::Sampler,
        nearest: &wgpu::Sampler,
        source: &wgpu::TextureView,
        target: &wgpu::TextureView,
    ) {
        let bg = self.bind_group(device, uniforms, linear, nearest, &[source]);
        self.run_pass(encoder, &self.blit_pipeline, &bg, block, target, "blit");
    }
}

fn create_noise_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> ColorBuffer {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    // per-pixel random rotation vectors for the SSAO kernel
    let mut rng = StdRng::seed_from_u64(0x5343_4150);
    let mut data = Vec::with_capacity(4 * 4 * 4);
    for _ in 0..16 {
        let x: f32 = rng.gen_range(-1.0..1.0);
        let y: f32 = rng.gen_range(-1.0..1.0);
        data.extend_from_slice(&[
            ((x * 0.5 + 0.5) * 255.0) as u8,
            ((y * 0.5 + 0.5) * 255.0) as u8,
            0,
            255,
        ]);
    }

    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("ssao noise"),
        size: wgpu::Extent3d {
            width: 4,
            height: 4,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(16),
            rows_per_image: Some(4),
        },
        wgpu::Extent3d {
            width: 4,
            height: 4,
            depth_or_array_layers: 1,
        },
    );

    let view = texture.create_view(&Default::default());
    ColorBuffer {
        _texture: texture,
        view,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_default_is_final_only() {
        let plan = plan_passes(&PostSettings::default());
        assert_eq!(plan, vec![PassKind::Final]);
    }

    #[test]
    fn test_plan_order_fixed() {
        let settings = PostSettings {
            bloom: true,
            ssao: true,
            fxaa: true,
            fsr: true,
            fsr_scale: 0.75,
            temporal: true,
            ..Default::default()
        };
        assert_eq!(
            plan_passes(&settings),
            vec![
                PassKind::Ssao,
                PassKind::Bloom,
                PassKind::FsrEasu,
                PassKind::FsrRcas,
                PassKind::Temporal,
                PassKind::Fxaa,
                PassKind::Final,
            ]
        );
    }

    #[test]
    fn test_fsr_disabled_at_native_scale() {
        let settings = PostSettings {
            fsr: true,
            fsr_scale: 1.0,
            ..Default::default()
        };
        assert!(!plan_passes(&settings).contains(&PassKind::FsrEasu));
    }
}
