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

//! The `Pipeline` trait, which lets render pipelines be defined declaratively
//! on unit structs. WGSL sources live under `shaders/` and are compiled when
//! the pipeline is created.

/// A declarative description of one render pipeline.
pub trait Pipeline {
    /// The name of this pipeline, used for labels and log lines.
    fn name() -> &'static str;

    /// WGSL source containing `vs_main` and `fs_main` entry points.
    fn shader_source() -> &'static str;

    /// The bind group layouts specific to this pipeline, appended after any
    /// shared prefix layouts.
    fn bind_group_layout_descriptors() -> Vec<wgpu::BindGroupLayoutDescriptor<'static>>;

    fn primitive_state() -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Cw,
            cull_mode: Some(wgpu::Face::Back),
            ..Default::default()
        }
    }

    fn color_target_states() -> Vec<Option<wgpu::ColorTargetState>>;

    fn depth_stencil_state() -> Option<wgpu::DepthStencilState>;

    fn vertex_buffer_layouts() -> Vec<wgpu::VertexBufferLayout<'static>>;

    /// Constructs the `RenderPipeline` and its bind group layouts.
    ///
    /// `bind_group_layout_prefix` holds layouts shared between pipelines
    /// (the per-frame group); this pipeline's own layouts follow it.
    fn create(
        device: &wgpu::Device,
        bind_group_layout_prefix: &[wgpu::BindGroupLayout],
        sample_count: u32,
    ) -> (wgpu::RenderPipeline, Vec<wgpu::BindGroupLayout>) {
        info!("Creating {} pipeline", Self::name());

        let bind_group_layouts = Self::bind_group_layout_descriptors()
            .iter()
            .map(|desc| device.create_bind_group_layout(desc))
            .collect::<Vec<_>>();

        let pipeline = {
            let layouts: Vec<&wgpu::BindGroupLayout> = bind_group_layout_prefix
                .iter()
                .chain(bind_group_layouts.iter())
                .collect();
            Self::create_with_layouts(device, &layouts, sample_count)
        };

        (pipeline, bind_group_layouts)
    }

    /// Rebuilds the pipeline against existing layouts, after a sample-count
    /// change.
    fn create_with_layouts(
        device: &wgpu::Device,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
        sample_count: u32,
    ) -> wgpu::RenderPipeline {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(Self::name()),
            source: wgpu::ShaderSource::Wgsl(Self::shader_source().into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(Self::name()),
            bind_group_layouts,
            push_constant_ranges: &[],
        });

        let vertex_layouts = Self::vertex_buffer_layouts();

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(Self::name()),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &vertex_layouts,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &Self::color_target_states(),
                compilation_options: Default::default(),
            }),
            primitive: Self::primitive_state(),
            depth_stencil: Self::depth_stencil_state(),
            multisample: wgpu::MultisampleState {
                count: sample_count,
                ..Default::default()
            },
            multiview: None,
            cache: None,
        })
    }
}
