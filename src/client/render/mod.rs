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

//! The renderer driver.
//!
//! Owns the GPU device objects, the asset caches and the loaded world, and
//! sequences each frame: entity resolution, visibility, dynamic lights,
//! reflection passes, the scene passes, the post chain and the overlay.
//! Subsystem errors surface here, and only here do they turn into retry,
//! fallback or abort.

pub mod block;
pub mod capture;
pub mod console;
pub mod error;
pub mod image;
pub mod model;
pub mod palette;
pub mod pipeline;
pub mod post;
pub mod target;
pub mod uniform;
pub mod warp;
pub mod world;

use std::{
    cell::{Cell, RefCell},
    path::PathBuf,
    rc::Rc,
};

use crate::client::entity::{EntityWorld, LerpOptions, ResolvedEntity, MAX_LIGHTSTYLES};
use crate::common::{
    bsp::{self, Bsp},
    console::{CmdRegistry, Console, CvarFlags, CvarRegistry},
    engine,
    math::{self, Angles, Frustum},
    task::TaskPool,
    vfs::Vfs,
};

use cgmath::{Angle, Deg, Matrix4, SquareMatrix, Vector3, Vector4};
use chrono::Duration;

pub use error::RenderError;
pub use palette::Palette;
pub use target::Extent2d;

use capture::CaptureFormat;
use self::image::{ImageCache, ImageKind, ImageParams, ImageRef};
use model::{ModelCache, ModelKind, ModelRef};
use pipeline::Pipeline;
use post::{PostChain, PostSettings, PostUniforms};
use target::{ScenePassTarget, SurfaceManager};
use uniform::DynamicUniformBuffer;
use world::{
    alias, light::LightmapAtlas, particle, refl, refl::ReflectionController, sky, sky::SkyBox,
    sprite, DrawLists, WorldGeometry, WorldVis,
};

pub const FRAMES_IN_FLIGHT: usize = 2;

const STREAM_BUFFER_SIZE: u64 = 8 << 20;

/// World-axis to graphics-axis change of basis: Quake X (forward) maps to
/// -Z, Y (left) to -X, Z (up) to +Y.
fn quake_to_wgpu() -> Matrix4<f32> {
    Matrix4::from_cols(
        Vector4::new(0.0, 0.0, -1.0, 0.0),
        Vector4::new(-1.0, 0.0, 0.0, 0.0),
        Vector4::new(0.0, 1.0, 0.0, 0.0),
        Vector4::new(0.0, 0.0, 0.0, 1.0),
    )
}

/// The view description handed in by the client for one frame.
#[derive(Clone, Debug)]
pub struct RefDef {
    pub origin: Vector3<f32>,
    pub angles: Angles,
    pub fov_y: Deg<f32>,
    pub time: Duration,
    /// Door/portal gating bits from gameplay; empty opens everything.
    pub area_bits: Vec<u8>,
    /// Damage/underwater screen tint.
    pub v_blend: [f32; 4],
    pub underwater: bool,
}

/// A fully derived viewpoint.
pub struct Camera {
    origin: Vector3<f32>,
    angles: Angles,
    view: Matrix4<f32>,
    projection: Matrix4<f32>,
    view_projection: Matrix4<f32>,
    frustum: Frustum,
    /// World-space clip plane height for mirrored passes.
    clip_z: Option<f32>,
}

impl Camera {
    pub fn new(
        origin: Vector3<f32>,
        angles: Angles,
        fov_y: Deg<f32>,
        aspect: f32,
        clip_z: Option<f32>,
    ) -> Camera {
        let fov_x = Deg(2.0 * ((fov_y / 2.0).tan() * aspect).atan().to_degrees());

        let translation = Matrix4::from_translation(-origin);
        let view = angles.mat4_wgpu() * quake_to_wgpu() * translation;

        // explicit-extent frustum; mirrored viewpoints keep their signs
        let projection = math::perspective(fov_y, aspect, 4.0, 4096.0);
        let view_projection = projection * view;

        Camera {
            origin,
            angles,
            view,
            projection,
            view_projection,
            frustum: Frustum::new(origin, angles, fov_x, fov_y),
            clip_z,
        }
    }

    pub fn origin(&self) -> Vector3<f32> {
        self.origin
    }

    pub fn angles(&self) -> Angles {
        self.angles
    }

    pub fn view(&self) -> Matrix4<f32> {
        self.view
    }

    pub fn projection(&self) -> Matrix4<f32> {
        self.projection
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        self.view_projection
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }
}

/// Per-frame uniform block shared by every 3D pipeline.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub prev_view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    pub view_right: [f32; 4],
    pub view_up: [f32; 4],
    /// xyz plane normal, w height; w = -1e30 disables clipping.
    pub clip_plane: [f32; 4],
    /// xy current jitter, zw previous jitter, in NDC units.
    pub jitter: [f32; 4],
    /// xy render target size in pixels, zw its inverse.
    pub screen_size: [f32; 4],
    pub time: f32,
    pub overbright: f32,
    pub fog_density: f32,
    pub cel_levels: f32,
    pub detail_scale: f32,
    pub caustics: f32,
    pub fullbright: f32,
    pub lightmap_only: f32,
    /// 64 lightstyle values packed four to a vector.
    pub lightstyles: [[f32; 4]; 16],
}

/// Per-entity uniform block, dynamically offset.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EntityUniforms {
    pub mvp: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    /// rgb tint, a alpha.
    pub color: [f32; 4],
}

/// Append-only per-frame vertex storage, reset each frame.
pub struct StreamBuffer {
    buffer: wgpu::Buffer,
    cursor: Cell<u64>,
}

impl StreamBuffer {
    pub fn new(device: &wgpu::Device) -> StreamBuffer {
        StreamBuffer {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("stream vertex buffer"),
                size: STREAM_BUFFER_SIZE,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            cursor: Cell::new(0),
        }
    }

    pub fn reset(&self) {
        self.cursor.set(0);
    }

    /// Writes `data` into the stream, returning its byte offset.
    pub fn push(&self, queue: &wgpu::Queue, data: &[u8]) -> Option<u64> {
        let offset = self.cursor.get();
        let aligned = (data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        if offset + aligned > STREAM_BUFFER_SIZE {
            warn!("stream buffer exhausted");
            return None;
        }

        queue.write_buffer(&self.buffer, offset, data);
        self.cursor.set(offset + aligned);
        Some(offset)
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

struct PipelineSet {
    world: wgpu::RenderPipeline,
    world_layouts: Vec<wgpu::BindGroupLayout>,
    water: wgpu::RenderPipeline,
    water_layouts: Vec<wgpu::BindGroupLayout>,
    alias: wgpu::RenderPipeline,
    alias_layouts: Vec<wgpu::BindGroupLayout>,
    sprite: wgpu::RenderPipeline,
    sprite_layouts: Vec<wgpu::BindGroupLayout>,
    particle: wgpu::RenderPipeline,
    sky: wgpu::RenderPipeline,
    sky_layouts: Vec<wgpu::BindGroupLayout>,
    overlay: wgpu::RenderPipeline,
    overlay_layouts: Vec<wgpu::BindGroupLayout>,
}

/// Everything loaded for the current map.
struct WorldState {
    bsp: Bsp,
    vis: WorldVis,
    geometry: WorldGeometry,
    atlas: LightmapAtlas,
    sky: Option<SkyBox>,
    sky_view: Option<wgpu::TextureView>,
    /// Per-face resolved texture.
    face_textures: Vec<ImageRef>,
}

/// One recorded draw against the stream buffer.
struct StreamDraw {
    bind_group: Option<usize>,
    uniform_offset: Option<wgpu::DynamicOffset>,
    offset: u64,
    vertices: u32,
}

/// All GPU work planned for one scene pass, replayed into a render pass.
#[derive(Default)]
struct ScenePlan {
    /// Dynamic offset of this pass's world-transform uniform block.
    world_uniform: wgpu::DynamicOffset,
    bind_groups: Vec<wgpu::BindGroup>,
    // world batches: bind group index + face vertex ranges
    world: Vec<(usize, Vec<(u32, u32)>)>,
    sky_draw: Option<StreamDraw>,
    alias_draws: Vec<StreamDraw>,
    sprite_draws: Vec<StreamDraw>,
    particle_draws: Vec<StreamDraw>,
    water: Vec<(usize, Vec<(u32, u32)>)>,
}

#[derive(Copy, Clone)]
enum SceneTargetSel {
    Main,
    Reflection(usize),
}

/// The renderer: one instance per process, all subsystem state gathered in
/// one place.
pub struct Renderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: SurfaceManager,

    cvars: Rc<RefCell<CvarRegistry>>,
    cmds: Rc<RefCell<CmdRegistry>>,
    console: Rc<Console>,
    vfs: Vfs,
    gamedir: PathBuf,

    palette: Palette,
    images: Rc<RefCell<ImageCache>>,
    models: Rc<RefCell<ModelCache>>,

    pool: TaskPool,

    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,

    frame_uniform_buffers: Vec<wgpu::Buffer>,
    frame_bind_groups: Vec<wgpu::BindGroup>,
    entity_uniforms: RefCell<DynamicUniformBuffer<EntityUniforms>>,
    entity_bind_group: wgpu::BindGroup,
    post_uniforms: RefCell<DynamicUniformBuffer<PostUniforms>>,

    stream: StreamBuffer,
    pipelines: PipelineSet,
    post: PostChain,
    scene_target: ScenePassTarget,
    /// Post output with COPY_SRC, blitted to the swapchain and read back by
    /// screenshots.
    composite_texture: wgpu::Texture,
    composite_view: wgpu::TextureView,
    refl: ReflectionController,

    world: Option<WorldState>,

    frame_index: u64,
    prev_view_proj: Matrix4<f32>,
    device_lost_streak: u32,

    screenshot_requested: Rc<Cell<bool>>,
    adapter_info: String,
}

impl Renderer {
    /// Builds the renderer over an externally created device and surface.
    ///
    /// Fails with `InitializationFailure` if the palette (the one asset the
    /// renderer cannot substitute) is missing.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface: wgpu::Surface<'static>,
        surface_config: wgpu::SurfaceConfiguration,
        vfs: Vfs,
        cvars: Rc<RefCell<CvarRegistry>>,
        cmds: Rc<RefCell<CmdRegistry>>,
        console: Rc<Console>,
        gamedir: PathBuf,
        adapter_info: String,
    ) -> Result<Renderer, RenderError> {
        register_cvars(&cvars.borrow());

        let palette = Palette::load(&vfs).map_err(|e| {
            RenderError::InitializationFailure(format!("palette load failed: {}", e))
        })?;

        let surface = SurfaceManager::new(&device, surface, surface_config);
        let output_size = surface.size();

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("per-frame bind group"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<FrameUniforms>() as u64,
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
            ],
        });

        let entity_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("per-entity bind group"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<EntityUniforms>() as u64,
                    ),
                },
                count: None,
            }],
        });

        let anisotropy = cvars
            .borrow()
            .get_value("r_anisotropy")
            .unwrap_or(1.0)
            .clamp(1.0, 16.0) as u16;

        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("linear sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            anisotropy_clamp: anisotropy,
            ..Default::default()
        });
        let nearest_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("nearest sampler"),
            ..Default::default()
        });

        let mut frame_uniform_buffers = Vec::with_capacity(FRAMES_IN_FLIGHT);
        let mut frame_bind_groups = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for i in 0..FRAMES_IN_FLIGHT {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("frame uniforms"),
                size: std::mem::size_of::<FrameUniforms>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            frame_bind_groups.push(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("frame bind group {}", i)),
                layout: &frame_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&linear_sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&nearest_sampler),
                    },
                ],
            }));
            frame_uniform_buffers.push(buffer);
        }

        let entity_uniforms = RefCell::new(DynamicUniformBuffer::new(&device));
        let entity_bind_group = {
            let uniforms = entity_uniforms.borrow();
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("entity bind group"),
                layout: &entity_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: uniforms.buffer(),
                        offset: 0,
                        size: uniforms.binding_size(),
                    }),
                }],
            })
        };
        let post_uniforms = RefCell::new(DynamicUniformBuffer::new(&device));
        let stream = StreamBuffer::new(&device);

        let sample_count = 1;
        let prefix = [frame_layout.clone(), entity_layout.clone()];

        let (world_pipeline, world_layouts) =
            world::WorldPipeline::create(&device, &prefix, sample_count);
        let (water_pipeline, water_layouts) =
            world::WaterPipeline::create(&device, &prefix, sample_count);
        let (alias_pipeline, alias_layouts) =
            alias::AliasPipeline::create(&device, &prefix, sample_count);
        let (sprite_pipeline, sprite_layouts) =
            sprite::SpritePipeline::create(&device, &prefix, sample_count);
        let (particle_pipeline, _) =
            particle::ParticlePipeline::create(&device, &prefix[..1], sample_count);
        let (sky_pipeline, sky_layouts) = sky::SkyPipeline::create(&device, &prefix, sample_count);
        let (overlay_pipeline, overlay_layouts) =
            console::OverlayPipeline::create(&device, &[], sample_count);

        let pipelines = PipelineSet {
            world: world_pipeline,
            world_layouts,
            water: water_pipeline,
            water_layouts,
            alias: alias_pipeline,
            alias_layouts,
            sprite: sprite_pipeline,
            sprite_layouts,
            particle: particle_pipeline,
            sky: sky_pipeline,
            sky_layouts,
            overlay: overlay_pipeline,
            overlay_layouts,
        };

        // render at a reduced scale only once FSR asks for it; start native
        let render_size = output_size;
        let scene_target = ScenePassTarget::new(&device, render_size, sample_count);
        let post = PostChain::new(&device, &queue, render_size, output_size);

        let composite_texture = target::create_color_attachment(
            &device,
            "composite",
            output_size,
            1,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
        );
        let composite_view = composite_texture.create_view(&Default::default());

        let params = image_params(&cvars.borrow());
        let images = Rc::new(RefCell::new(ImageCache::new(params)));
        let models = Rc::new(RefCell::new(ModelCache::new()));
        let screenshot_requested = Rc::new(Cell::new(false));

        let mut renderer = Renderer {
            device,
            queue,
            surface,
            cvars,
            cmds,
            console,
            vfs,
            gamedir,
            palette,
            images,
            models,
            pool: TaskPool::new(),
            linear_sampler,
            nearest_sampler,
            frame_uniform_buffers,
            frame_bind_groups,
            entity_uniforms,
            entity_bind_group,
            post_uniforms,
            stream,
            pipelines,
            post,
            scene_target,
            composite_texture,
            composite_view,
            refl: ReflectionController::new(refl::DEFAULT_REFL_DIM),
            world: None,
            frame_index: 0,
            prev_view_proj: Matrix4::identity(),
            device_lost_streak: 0,
            screenshot_requested,
            adapter_info,
        };

        renderer.register_commands();
        Ok(renderer)
    }

    fn register_commands(&mut self) {
        let mut cmds = self.cmds.borrow_mut();

        let flag = self.screenshot_requested.clone();
        let _ = cmds.insert(
            "screenshot",
            Box::new(move |_args| {
                flag.set(true);
                String::new()
            }),
        );

        let images = self.images.clone();
        let _ = cmds.insert(
            "imagelist",
            Box::new(move |_args| {
                let images = images.borrow();
                let mut out = String::new();
                for image in images.iter() {
                    out.push_str(&format!(
                        "{:>4}x{:<4} {:?} {}\n",
                        image.width, image.height, image.kind, image.name
                    ));
                }
                out.push_str(&format!("{} images\n", images.len()));
                out
            }),
        );

        let models = self.models.clone();
        let _ = cmds.insert(
            "modellist",
            Box::new(move |_args| {
                let models = models.borrow();
                let mut out = String::new();
                for model in models.iter() {
                    let kind = match model.kind {
                        ModelKind::Alias(_) => "alias",
                        ModelKind::Sprite(_) => "sprite",
                        ModelKind::Inline(_) => "inline",
                    };
                    out.push_str(&format!("{:>6} {}\n", kind, model.name));
                }
                out.push_str(&format!("{} models\n", models.len()));
                out
            }),
        );

        let info = self.adapter_info.clone();
        let _ = cmds.insert("vk_strings", Box::new(move |_args| info.clone()));

        let cvars = self.cvars.clone();
        let _ = cmds.insert(
            "vk_log",
            Box::new(move |args| {
                if let Some(&value) = args.first() {
                    if let Err(e) = cvars.borrow().set("vk_log", value) {
                        return format!("{}", e);
                    }
                }
                String::new()
            }),
        );
    }

    pub fn images(&self) -> Rc<RefCell<ImageCache>> {
        self.images.clone()
    }

    pub fn models(&self) -> Rc<RefCell<ModelCache>> {
        self.models.clone()
    }

    pub fn task_pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Loads a map and rebuilds all world-derived state.
    ///
    /// A bad worldmodel aborts the load; every other asset failure falls
    /// back to a placeholder.
    pub fn begin_map(&mut self, map_path: &str) -> Result<(), RenderError> {
        self.cvars.borrow().apply_latched();
        self.images.borrow_mut().begin_registration();
        self.models.borrow_mut().begin_registration();
        self.images
            .borrow_mut()
            .set_params(image_params(&self.cvars.borrow()));

        let data = self
            .vfs
            .open(map_path)
            .map_err(|e| RenderError::from_vfs(map_path, e))?;
        let bsp = bsp::load(&data).map_err(|e| RenderError::from_bsp(map_path, e))?;

        let vis = WorldVis::new(&bsp);
        let atlas = LightmapAtlas::build(&bsp, &crate::client::entity::LightStyles::new());

        let mut face_textures = Vec::with_capacity(bsp.faces.len());
        {
            let mut images = self.images.borrow_mut();
            for face in &bsp.faces {
                // the world entity sits on frame 0 of any animation chain
                let texinfo_id = world::texture_animation(&bsp, face.texinfo_id, 0);
                let texinfo = &bsp.texinfos[texinfo_id];
                let name = format!("textures/{}.wal", texinfo.texture_name);
                face_textures.push(images.find(&self.vfs, &self.palette, &name, ImageKind::Wall));
            }
        }

        let geometry = {
            let textures = &face_textures;
            WorldGeometry::build(&bsp, &atlas, |face_id| textures[face_id])
        };

        info!(
            "map {}: {} faces baked into {} vertices",
            map_path,
            bsp.faces.len(),
            geometry.vertex_count()
        );

        self.world = Some(WorldState {
            bsp,
            vis,
            geometry,
            atlas,
            sky: None,
            sky_view: None,
            face_textures,
        });

        self.end_registration();
        Ok(())
    }

    /// Drops the loaded world and everything derived from it.
    pub fn end_map(&mut self) {
        self.world = None;
    }

    /// Applies the worldspawn sky parameters.
    pub fn configure_sky(&mut self, base: &str, axis: Vector3<f32>, rotate: f32) {
        let skymip = self
            .cvars
            .borrow()
            .get_value("vk_skymip")
            .unwrap_or(0.0)
            .max(0.0) as u32;

        let Some(world) = &mut self.world else {
            return;
        };

        match SkyBox::load(&self.vfs, &self.palette, base, axis, rotate, skymip) {
            Ok(loaded) => {
                world.sky_view = Some(loaded.create_texture(&self.device, &self.queue));
                world.sky = Some(loaded);
            }
            Err(e) => {
                warn!("{}", e);
                world.sky = None;
                world.sky_view = None;
            }
        }
    }

    /// Records a damage splash into the stainmap.
    pub fn add_stain(&mut self, origin: Vector3<f32>, radius: f32, intensity: u8) {
        if !self.cvar_bool("r_stainmap") {
            return;
        }
        if let Some(world) = &mut self.world {
            world.atlas.add_stain(&world.bsp, origin, radius, intensity);
        }
    }

    /// Ends asset registration: sweeps stale entries and uploads the rest.
    fn end_registration(&mut self) {
        self.images.borrow_mut().sweep();
        self.models.borrow_mut().sweep();
        self.images.borrow_mut().sync(&self.device, &self.queue);
        if let Some(world) = &mut self.world {
            world.atlas.sync(&self.device, &self.queue);
            world.geometry.sync(&self.device, &self.queue);
        }
    }

    /// Renders one frame and presents it.
    pub fn render_frame(
        &mut self,
        refdef: &RefDef,
        entities: &EntityWorld,
    ) -> Result<(), RenderError> {
        if self.cvars.borrow().clear_modified("vk_swapinterval").unwrap_or(false) {
            let size = self.surface.size();
            let vsync = self.cvar_bool("vk_swapinterval");
            self.surface
                .reconfigure(&self.device, size.width, size.height, vsync);
        }

        let frame = match self.surface.acquire(&self.device) {
            Ok(frame) => frame,
            Err(RenderError::DeviceLost) => {
                self.device_lost_streak += 1;
                if self.device_lost_streak >= 2 {
                    return Err(RenderError::InitializationFailure(
                        "device lost twice in a row".to_owned(),
                    ));
                }
                return Err(RenderError::DeviceLost);
            }
            Err(e) => return Err(e),
        };
        self.device_lost_streak = 0;

        let present_view = frame.texture.create_view(&Default::default());
        let slot = (self.frame_index as usize) % FRAMES_IN_FLIGHT;

        self.stream.reset();
        self.entity_uniforms.borrow_mut().clear();
        self.post_uniforms.borrow_mut().clear();

        let opts = self.lerp_options();
        let resolved = entities.resolve_all_parallel(&self.pool, refdef.time, &opts);

        let output_size = self.surface.size();
        let aspect = output_size.width as f32 / output_size.height.max(1) as f32;
        let camera = Camera::new(refdef.origin, refdef.angles, refdef.fov_y, aspect, None);

        self.write_frame_uniforms(slot, &camera, refdef, entities);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") });

        // reflection passes come first so the water shader can sample them
        if self.world.is_some() {
            let planes = {
                let world = self.world.as_ref().unwrap();
                refl::find_reflectors(&world.bsp, &world.vis, refdef.underwater)
            };
            self.refl
                .prepare(&self.device, &planes, refdef.origin, refdef.angles);

            for i in 0..self.refl.passes().len() {
                let view = self.refl.passes()[i].view;
                let mirrored =
                    Camera::new(view.origin, view.angles, refdef.fov_y, 1.0, Some(view.clip_z));
                let plan = self.plan_scene(&mirrored, refdef, entities, &resolved, false);
                self.replay_scene(&mut encoder, &plan, slot, SceneTargetSel::Reflection(i));
            }
        }

        // main scene
        let plan = self.plan_scene(&camera, refdef, entities, &resolved, true);
        self.replay_scene(&mut encoder, &plan, slot, SceneTargetSel::Main);

        // post chain into the composite image, then blit to the swapchain
        let settings = self.post_settings(refdef);
        let blocks = self.write_post_uniforms(&camera, &settings);
        let blit_block = self.alloc_post_block(PostUniforms::default());
        let mut block_iter = blocks.into_iter();
        self.post_uniforms.borrow().flush(&self.queue);
        {
            let uniform_buffer = self.post_uniforms.borrow();
            self.post.record(
                &self.device,
                &mut encoder,
                &settings,
                uniform_buffer.buffer(),
                move || block_iter.next().unwrap_or(0),
                &self.linear_sampler,
                &self.nearest_sampler,
                self.scene_target.color_view(),
                self.scene_target.depth_view(),
                &self.composite_view,
            );

            self.post.blit(
                &self.device,
                &mut encoder,
                uniform_buffer.buffer(),
                blit_block,
                &self.linear_sampler,
                &self.nearest_sampler,
                &self.composite_view,
                &present_view,
            );
        }

        // overlay text on top of everything
        self.record_overlay(&mut encoder, &present_view, refdef);

        self.entity_uniforms.borrow().flush(&self.queue);
        self.queue.submit([encoder.finish()]);

        if self.screenshot_requested.replace(false) {
            if let Err(e) = self.take_screenshot() {
                self.console.println(format!("{}", e));
            }
        }

        if self.cvar_bool("vk_finish") {
            let _ = self.device.poll(wgpu::PollType::Wait);
        }

        if self.cvar_bool("r_speeds") {
            if let Some(world) = &self.world {
                let c = world.vis.counters;
                self.console.println(format!(
                    "{} wpoly {} leafs {} dlit",
                    c.wpolys, c.visible_leaves, c.dlight_faces
                ));
            }
        }

        self.surface.present(frame);
        self.prev_view_proj = camera.view_projection();
        self.frame_index += 1;
        Ok(())
    }

    fn lerp_options(&self) -> LerpOptions {
        let cvars = self.cvars.borrow();
        LerpOptions {
            extrapolate: cvars.get_bool("cl_extrapolate").unwrap_or(true),
            extrapolate_max_ms: cvars.get_value("cl_extrapolate_max").unwrap_or(100.0),
            cubic: cvars.get_bool("cl_cubic_interp").unwrap_or(false),
            anim_continue: cvars.get_bool("cl_anim_continue").unwrap_or(true),
        }
    }

    fn cvar_bool(&self, name: &str) -> bool {
        self.cvars.borrow().get_bool(name).unwrap_or(false)
    }

    fn cvar_value(&self, name: &str, default: f32) -> f32 {
        self.cvars.borrow().get_value(name).unwrap_or(default)
    }

    fn post_settings(&self, refdef: &RefDef) -> PostSettings {
        PostSettings {
            bloom: self.cvar_bool("r_bloom"),
            bloom_threshold: self.cvar_value("r_bloom_threshold", 0.7),
            bloom_intensity: self.cvar_value("r_bloom_intensity", 0.5),
            ssao: self.cvar_bool("r_ssao"),
            ssao_radius: self.cvar_value("r_ssao_radius", 16.0),
            ssao_intensity: self.cvar_value("r_ssao_intensity", 1.0),
            fxaa: self.cvar_bool("r_fxaa"),
            fsr: self.cvar_bool("r_fsr"),
            fsr_scale: self.cvar_value("r_fsr_scale", 1.0).clamp(0.1, 1.0),
            fsr_sharpness: self.cvar_value("r_fsr_sharpness", 0.5).clamp(0.0, 1.0),
            temporal: self.cvar_bool("r_temporal"),
            color_box_scale: post::DEFAULT_COLOR_BOX_SCALE,
            gamma: self.cvar_value("vid_gamma", 1.0).max(0.1),
            v_blend: refdef.v_blend,
        }
    }

    fn write_frame_uniforms(
        &mut self,
        slot: usize,
        camera: &Camera,
        refdef: &RefDef,
        entities: &EntityWorld,
    ) {
        let [_, right, up] = refdef.angles.basis();

        let mut lightstyles = [[0.0f32; 4]; 16];
        for i in 0..MAX_LIGHTSTYLES {
            lightstyles[i / 4][i % 4] = entities.lightstyles().value(i, refdef.time);
        }

        let overbright = match self.cvar_value("r_overbrightbits", 1.0) as u32 {
            0 | 1 => 1.0,
            2 => 2.0,
            _ => 4.0,
        };

        let clip_plane = match camera.clip_z {
            Some(z) => [0.0, 0.0, 1.0, z],
            None => [0.0, 0.0, 1.0, -1e30],
        };

        let jitter = if self.cvar_bool("r_temporal") {
            halton_jitter(self.frame_index, self.post.render_size())
        } else {
            [0.0; 4]
        };

        let uniforms = FrameUniforms {
            view_proj: camera.view_projection().into(),
            prev_view_proj: self.prev_view_proj.into(),
            camera_pos: camera.origin().extend(1.0).into(),
            view_right: right.extend(0.0).into(),
            view_up: up.extend(0.0).into(),
            clip_plane,
            jitter,
            screen_size: {
                let size = self.post.render_size();
                [
                    size.width as f32,
                    size.height as f32,
                    1.0 / size.width.max(1) as f32,
                    1.0 / size.height.max(1) as f32,
                ]
            },
            time: engine::duration_to_f32(refdef.time),
            overbright,
            fog_density: if self.cvar_bool("r_fog") { 0.0008 } else { 0.0 },
            cel_levels: if self.cvar_bool("r_celshading") { 4.0 } else { 0.0 },
            detail_scale: self.cvar_value("r_detailtexture", 0.0).clamp(0.0, 8.0),
            caustics: if self.cvar_bool("r_caustics") && refdef.underwater {
                1.0
            } else {
                0.0
            },
            fullbright: if self.cvar_bool("r_fullbright") { 1.0 } else { 0.0 },
            lightmap_only: if self.cvar_bool("vk_lightmap") { 1.0 } else { 0.0 },
            lightstyles,
        };

        self.queue.write_buffer(
            &self.frame_uniform_buffers[slot],
            0,
            bytemuck::bytes_of(&uniforms),
        );
    }

    /// Walks the world and lays out every draw for one scene pass.
    fn plan_scene(
        &mut self,
        camera: &Camera,
        refdef: &RefDef,
        entities: &EntityWorld,
        resolved: &[(usize, ResolvedEntity)],
        allow_dlights: bool,
    ) -> ScenePlan {
        let mut plan = ScenePlan::default();

        plan.world_uniform = self.alloc_entity_block(EntityUniforms {
            mvp: camera.view_projection().into(),
            model: Matrix4::identity().into(),
            color: [1.0, 1.0, 1.0, 1.0],
        });

        let draw_world = self.cvar_bool("r_drawworld");
        let draw_entities = self.cvar_bool("r_drawentities");
        let nocull = self.cvar_bool("r_nocull");
        let novis = self.cvar_bool("r_novis");
        let lockpvs = self.cvar_bool("vk_lockpvs");
        let stainmap = self.cvar_bool("r_stainmap");

        let lists = if let (Some(world), true) = (&mut self.world, draw_world) {
            world.vis.locked = lockpvs;

            let leaf = world.bsp.point_in_leaf(camera.origin());
            let cluster = world.bsp.leaf(leaf).cluster;
            world
                .vis
                .mark_leaves(&world.bsp, cluster, &refdef.area_bits, novis);

            let frustum = if nocull { None } else { Some(camera.frustum()) };
            world.vis.walk(&world.bsp, camera.origin(), frustum)
        } else {
            DrawLists::default()
        };

        if let Some(world) = &mut self.world {
            if allow_dlights {
                // stain fade and dlight splash re-composite their faces
                if stainmap {
                    for face_id in world.atlas.stains.fade(refdef.time) {
                        world.atlas.update_face(
                            &world.bsp,
                            face_id,
                            entities.lightstyles(),
                            &[],
                            refdef.time,
                        );
                    }
                }

                let dirty = world.vis.mark_dlights(&world.bsp, entities.dlights(), &lists);
                world.atlas.update_faces(
                    &self.pool,
                    &world.bsp,
                    &dirty,
                    entities.lightstyles(),
                    entities.dlights(),
                    refdef.time,
                );

                world.atlas.sync(&self.device, &self.queue);
            }

            let images = self.images.borrow();
            let fallback_view = images
                .view(images.notexture())
                .expect("placeholder is always synced");

            // opaque world batches
            for ((texture, page), faces) in world.geometry.batch(lists.opaque.iter()) {
                let tex_view = images.view(texture).unwrap_or(fallback_view);
                let lm_view = page.and_then(|p| world.atlas.view(p)).unwrap_or(tex_view);

                plan.bind_groups.push(world_bind_group(
                    &self.device,
                    &self.pipelines.world_layouts[0],
                    [tex_view, lm_view],
                ));
                let bg = plan.bind_groups.len() - 1;

                let ranges = faces
                    .iter()
                    .map(|&f| {
                        let geo = &world.geometry.faces[f];
                        (geo.first_vertex, geo.vertex_count)
                    })
                    .collect();
                plan.world.push((bg, ranges));
            }

            // sky
            if !lists.sky.is_empty() {
                if let (Some(sky_view), Some(loaded)) = (&world.sky_view, &world.sky) {
                    let rotation: [[f32; 4]; 4] =
                        loaded.rotation(engine::duration_to_f32(refdef.time)).into();
                    let rotation_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("sky rotation"),
                        size: 64,
                        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    });
                    self.queue
                        .write_buffer(&rotation_buffer, 0, bytemuck::bytes_of(&rotation));

                    let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("sky"),
                        layout: &self.pipelines.sky_layouts[0],
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: wgpu::BindingResource::TextureView(sky_view),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: rotation_buffer.as_entire_binding(),
                            },
                        ],
                    });
                    plan.bind_groups.push(bind_group);
                    let bg = plan.bind_groups.len() - 1;

                    let mut positions: Vec<[f32; 3]> = Vec::new();
                    for &face_id in &lists.sky {
                        let verts = &world.bsp.faces[face_id].vertices;
                        for i in 1..verts.len().saturating_sub(1) {
                            positions.push(verts[0].into());
                            positions.push(verts[i].into());
                            positions.push(verts[i + 1].into());
                        }
                    }

                    if let Some(offset) =
                        self.stream.push(&self.queue, bytemuck::cast_slice(&positions))
                    {
                        plan.sky_draw = Some(StreamDraw {
                            bind_group: Some(bg),
                            uniform_offset: None,
                            offset,
                            vertices: positions.len() as u32,
                        });
                    }
                }
            }

            // translucent world surfaces, in visit order
            for ((texture, _page), faces) in world.geometry.batch(lists.translucent.iter()) {
                let tex_view = images.view(texture).unwrap_or(fallback_view);

                // the batch's water level picks its reflection image
                let refl_view = faces
                    .first()
                    .and_then(|&f| world.bsp.faces[f].vertices.first())
                    .map(|v| v.z)
                    .and_then(|z| self.refl.target_for_plane(z))
                    .map(|t| t.color_view())
                    .unwrap_or(tex_view);

                plan.bind_groups.push(world_bind_group(
                    &self.device,
                    &self.pipelines.water_layouts[0],
                    [tex_view, refl_view],
                ));
                let bg = plan.bind_groups.len() - 1;

                let ranges = faces
                    .iter()
                    .map(|&f| {
                        let geo = &world.geometry.faces[f];
                        (geo.first_vertex, geo.vertex_count)
                    })
                    .collect();
                plan.water.push((bg, ranges));
            }
        }

        if draw_entities {
            self.plan_entities(camera, refdef, resolved, &mut plan);
        }

        // particles
        let (vertices, batches) = particle::build_batches(entities.particles().iter());
        if !vertices.is_empty() {
            let stride = std::mem::size_of::<particle::ParticleVertex>() as u64;
            if let Some(offset) = self.stream.push(&self.queue, bytemuck::cast_slice(&vertices)) {
                for (_kind, range) in batches {
                    plan.particle_draws.push(StreamDraw {
                        bind_group: None,
                        uniform_offset: None,
                        offset: offset + range.start as u64 * stride,
                        vertices: range.len() as u32,
                    });
                }
            }
        }

        plan
    }

    fn plan_entities(
        &self,
        camera: &Camera,
        refdef: &RefDef,
        resolved: &[(usize, ResolvedEntity)],
        plan: &mut ScenePlan,
    ) {
        let models = self.models.borrow();
        let images = self.images.borrow();
        let Some(fallback_view) = images.view(images.notexture()) else {
            return;
        };

        for &(_slot, ent) in resolved {
            let Some(model) = models.get(ModelRef(ent.model_id)) else {
                continue;
            };

            let model_transform = Matrix4::from_translation(ent.origin) * ent.angles.mat4_quake();
            let mvp = camera.view_projection() * model_transform;

            match &model.kind {
                ModelKind::Alias(alias_model) => {
                    let shade_dots = alias::build_shade_dots(ent.angles, 0.3);
                    let vertices = alias::build_pose(
                        alias_model,
                        ent.old_frame_id,
                        ent.frame_id,
                        ent.frontlerp,
                        0.0,
                        &shade_dots,
                        [1.0, 1.0, 1.0],
                    );

                    let Some(offset) =
                        self.stream.push(&self.queue, bytemuck::cast_slice(&vertices))
                    else {
                        continue;
                    };

                    let uniform_offset = self.alloc_entity_block(EntityUniforms {
                        mvp: mvp.into(),
                        model: model_transform.into(),
                        color: [1.0, 1.0, 1.0, 1.0],
                    });

                    let skin = model
                        .skins
                        .get(ent.skin_id)
                        .or_else(|| model.skins.first())
                        .copied();
                    let skin_view = skin
                        .and_then(|s| images.view(s))
                        .unwrap_or(fallback_view);

                    plan.bind_groups.push(single_texture_bind_group(
                        &self.device,
                        &self.pipelines.alias_layouts[0],
                        "alias skin",
                        skin_view,
                    ));

                    plan.alias_draws.push(StreamDraw {
                        bind_group: Some(plan.bind_groups.len() - 1),
                        uniform_offset: Some(uniform_offset),
                        offset,
                        vertices: vertices.len() as u32,
                    });
                }

                ModelKind::Sprite(sprite_model) => {
                    if sprite_model.frames.is_empty() {
                        continue;
                    }
                    let frame_id = ent.frame_id % sprite_model.frames.len();
                    let frame = &sprite_model.frames[frame_id];

                    let [_, right, up] = refdef.angles.basis();
                    let quad = sprite::build_quad(frame, ent.origin, right, up, 1.0);

                    let Some(offset) =
                        self.stream.push(&self.queue, bytemuck::cast_slice(&quad))
                    else {
                        continue;
                    };

                    let uniform_offset = self.alloc_entity_block(EntityUniforms {
                        mvp: camera.view_projection().into(),
                        model: Matrix4::identity().into(),
                        color: [1.0, 1.0, 1.0, 1.0],
                    });

                    let view = model
                        .skins
                        .get(frame_id)
                        .copied()
                        .and_then(|s| images.view(s))
                        .unwrap_or(fallback_view);

                    plan.bind_groups.push(single_texture_bind_group(
                        &self.device,
                        &self.pipelines.sprite_layouts[0],
                        "sprite frame",
                        view,
                    ));

                    plan.sprite_draws.push(StreamDraw {
                        bind_group: Some(plan.bind_groups.len() - 1),
                        uniform_offset: Some(uniform_offset),
                        offset,
                        vertices: 6,
                    });
                }

                // inline brush models reuse the world vertex buffer; their
                // faces were already marked and batched through the walk
                ModelKind::Inline(_) => {}
            }
        }
    }

    fn alloc_entity_block(&self, uniforms: EntityUniforms) -> wgpu::DynamicOffset {
        self.entity_uniforms.borrow_mut().allocate(uniforms).offset()
    }

    fn alloc_post_block(&self, uniforms: PostUniforms) -> wgpu::DynamicOffset {
        self.post_uniforms.borrow_mut().allocate(uniforms).offset()
    }

    fn replay_scene(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        plan: &ScenePlan,
        slot: usize,
        target: SceneTargetSel,
    ) {
        let target_ref = match target {
            SceneTargetSel::Main => &self.scene_target,
            SceneTargetSel::Reflection(i) => &self.refl.passes()[i].target,
        };

        let clear = match target {
            // reflection targets always start clean
            SceneTargetSel::Reflection(_) => true,
            SceneTargetSel::Main => self.cvar_bool("vk_clear"),
        };
        let mut pass = target_ref.begin_pass(encoder, "scene", clear);

        pass.set_bind_group(0, &self.frame_bind_groups[slot], &[]);

        let Some(world) = &self.world else {
            return;
        };

        // opaque world first: depth pre-fill for everything after it
        if let Some(vertex_buffer) = world.geometry.vertex_buffer() {
            pass.set_pipeline(&self.pipelines.world);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.set_bind_group(1, &self.entity_bind_group, &[plan.world_uniform]);

            for (bg, ranges) in &plan.world {
                pass.set_bind_group(2, &plan.bind_groups[*bg], &[]);
                for &(first, count) in ranges {
                    pass.draw(first..first + count, 0..1);
                }
            }
        }

        // opaque entities
        pass.set_pipeline(&self.pipelines.alias);
        for draw in &plan.alias_draws {
            if let (Some(bg), Some(uniform)) = (draw.bind_group, draw.uniform_offset) {
                pass.set_bind_group(1, &self.entity_bind_group, &[uniform]);
                pass.set_bind_group(2, &plan.bind_groups[bg], &[]);
                pass.set_vertex_buffer(0, self.stream.buffer().slice(draw.offset..));
                pass.draw(0..draw.vertices, 0..1);
            }
        }

        // sky after opaque, before translucent
        if let Some(sky_draw) = &plan.sky_draw {
            if let Some(bg) = sky_draw.bind_group {
                pass.set_pipeline(&self.pipelines.sky);
                pass.set_bind_group(1, &self.entity_bind_group, &[plan.world_uniform]);
                pass.set_bind_group(2, &plan.bind_groups[bg], &[]);
                pass.set_vertex_buffer(0, self.stream.buffer().slice(sky_draw.offset..));
                pass.draw(0..sky_draw.vertices, 0..1);
            }
        }

        // translucent entities, depth-read only
        pass.set_pipeline(&self.pipelines.sprite);
        for draw in &plan.sprite_draws {
            if let (Some(bg), Some(uniform)) = (draw.bind_group, draw.uniform_offset) {
                pass.set_bind_group(1, &self.entity_bind_group, &[uniform]);
                pass.set_bind_group(2, &plan.bind_groups[bg], &[]);
                pass.set_vertex_buffer(0, self.stream.buffer().slice(draw.offset..));
                pass.draw(0..draw.vertices, 0..1);
            }
        }

        // particles, one draw per class
        pass.set_pipeline(&self.pipelines.particle);
        for draw in &plan.particle_draws {
            pass.set_vertex_buffer(0, self.stream.buffer().slice(draw.offset..));
            pass.draw(0..draw.vertices, 0..1);
        }

        // translucent and turbulent world surfaces
        if let Some(vertex_buffer) = world.geometry.vertex_buffer() {
            pass.set_pipeline(&self.pipelines.water);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.set_bind_group(1, &self.entity_bind_group, &[plan.world_uniform]);

            for (bg, ranges) in &plan.water {
                pass.set_bind_group(2, &plan.bind_groups[*bg], &[]);
                for &(first, count) in ranges {
                    pass.draw(first..first + count, 0..1);
                }
            }
        }
    }

    /// Writes one `PostUniforms` block per potential pass instance,
    /// returning their dynamic offsets in consumption order.
    fn write_post_uniforms(
        &mut self,
        camera: &Camera,
        settings: &PostSettings,
    ) -> Vec<wgpu::DynamicOffset> {
        let render_size = self.post.render_size();
        let output_size = self.post.output_size();

        let base = PostUniforms {
            inv_view_proj: camera
                .view_projection()
                .invert()
                .unwrap_or_else(Matrix4::identity)
                .into(),
            prev_view_proj: self.prev_view_proj.into(),
            v_blend: settings.v_blend,
            inv_sizes: [
                1.0 / render_size.width.max(1) as f32,
                1.0 / render_size.height.max(1) as f32,
                1.0 / output_size.width.max(1) as f32,
                1.0 / output_size.height.max(1) as f32,
            ],
            direction: [0.0; 4],
            bloom_threshold: settings.bloom_threshold,
            bloom_intensity: settings.bloom_intensity,
            ssao_radius: settings.ssao_radius,
            ssao_intensity: settings.ssao_intensity,
            fsr_sharpness: settings.fsr_sharpness,
            color_box_scale: settings.color_box_scale,
            history_weight: if self.post.history_valid { 0.9 } else { 0.0 },
            gamma: settings.gamma,
        };

        // one block per pass instance, in the exact order the chain consumes
        // them; only the separable blurs care about the direction
        let mut offsets = Vec::new();
        let mut push = |direction: [f32; 4]| {
            offsets.push(self.alloc_post_block(PostUniforms { direction, ..base }));
        };

        let still = [0.0; 4];
        let horizontal = [1.0, 0.0, 0.0, 0.0];
        let vertical = [0.0, 1.0, 0.0, 0.0];

        for kind in post::plan_passes(settings) {
            match kind {
                post::PassKind::Ssao => {
                    push(still); // occlusion
                    push(still); // box blur
                    push(still); // apply
                }
                post::PassKind::Bloom => {
                    push(still); // extract
                    for mip in 0..post::BLOOM_MIP_COUNT {
                        if mip > 0 {
                            push(still); // downsample
                        }
                        push(horizontal);
                        push(vertical);
                    }
                    push(still); // composite
                }
                post::PassKind::Temporal => {
                    push(still); // accumulate
                    push(still); // history copy
                }
                post::PassKind::FsrEasu
                | post::PassKind::FsrRcas
                | post::PassKind::Fxaa
                | post::PassKind::Final => push(still),
            }
        }

        offsets
    }

    fn record_overlay(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        present_view: &wgpu::TextureView,
        refdef: &RefDef,
    ) {
        let quads = console::build_notify_quads(
            &self.console.text(),
            refdef.time,
            Duration::seconds(3),
            2.0,
        );
        if quads.is_empty() {
            return;
        }

        let Some(offset) = self.stream.push(&self.queue, bytemuck::cast_slice(&quads)) else {
            return;
        };

        let images = self.images.borrow();
        let Some(view) = images
            .find_loaded(console::GLYPH_SHEET_PATH)
            .and_then(|r| images.view(r))
        else {
            return;
        };

        let output = self.surface.size();
        let dims_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("overlay dims"),
            size: 16,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let dims = [output.width as f32, output.height as f32, 0.0f32, 0.0];
        self.queue
            .write_buffer(&dims_buffer, 0, bytemuck::cast_slice(&dims));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("overlay"),
            layout: &self.pipelines.overlay_layouts[0],
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: dims_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.nearest_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(view),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("overlay"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: present_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            ..Default::default()
        });

        pass.set_pipeline(&self.pipelines.overlay);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, self.stream.buffer().slice(offset..));
        pass.draw(0..quads.len() as u32, 0..1);
    }

    /// Preloads the glyph sheet so the overlay has something to draw with.
    pub fn load_overlay_assets(&mut self) {
        self.images.borrow_mut().find(
            &self.vfs,
            &self.palette,
            console::GLYPH_SHEET_PATH,
            ImageKind::Pic,
        );
        self.images.borrow_mut().sync(&self.device, &self.queue);
    }

    fn take_screenshot(&mut self) -> Result<(), RenderError> {
        let size = self.surface.size();

        // out-of-memory on readback gets one retry after evicting the
        // oldest unreferenced image generation
        let rgba = match capture::read_back(
            &self.device,
            &self.queue,
            &self.composite_texture,
            size.width,
            size.height,
        ) {
            Ok(rgba) => rgba,
            Err(_) if self.images.borrow_mut().evict_oldest_generation() => capture::read_back(
                &self.device,
                &self.queue,
                &self.composite_texture,
                size.width,
                size.height,
            )
            .map_err(|e| RenderError::malformed("screenshot", e))?,
            Err(e) => return Err(RenderError::malformed("screenshot", e)),
        };
        let mut rgba = rgba;

        let format = CaptureFormat::from_cvar(
            &self
                .cvars
                .borrow()
                .get("vk_screenshot_format")
                .unwrap_or_else(|_| "tga".to_owned()),
        );
        let quality = self.cvar_value("vk_screenshot_quality", 85.0).clamp(1.0, 100.0) as u8;
        let hw_gamma = if self.cvar_bool("r_hwgamma") {
            Some(self.cvar_value("vid_gamma", 1.0))
        } else {
            None
        };

        match capture::save(
            &self.gamedir,
            &mut rgba,
            size.width,
            size.height,
            format,
            quality,
            hw_gamma,
        ) {
            Ok(path) => {
                self.console.println(format!("Wrote {}", path.display()));
            }
            Err(e) => {
                self.console.println(format!("{}", e));
            }
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let mut cmds = self.cmds.borrow_mut();
        for name in ["screenshot", "imagelist", "modellist", "vk_strings", "vk_log"] {
            let _ = cmds.remove(name);
        }
    }
}

fn world_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    views: [&wgpu::TextureView; 2],
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("world textures"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(views[0]),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(views[1]),
            },
        ],
    })
}

fn single_texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    label: &str,
    view: &wgpu::TextureView,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::TextureView(view),
        }],
    })
}

/// Halton (2, 3) jitter for the temporal upscaler, in NDC units.
fn halton_jitter(frame_index: u64, render_size: Extent2d) -> [f32; 4] {
    let halton = |index: u64, base: u64| -> f32 {
        let mut f = 1.0f32;
        let mut r = 0.0f32;
        let mut i = index + 1;
        while i > 0 {
            f /= base as f32;
            r += f * (i % base) as f32;
            i /= base;
        }
        r
    };

    let jitter_at = |index: u64| -> [f32; 2] {
        [
            (halton(index % 8, 2) - 0.5) * 2.0 / render_size.width.max(1) as f32,
            (halton(index % 8, 3) - 0.5) * 2.0 / render_size.height.max(1) as f32,
        ]
    };

    let current = jitter_at(frame_index);
    let previous = jitter_at(frame_index.wrapping_sub(1));
    [current[0], current[1], previous[0], previous[1]]
}

fn image_params(cvars: &CvarRegistry) -> ImageParams {
    ImageParams {
        round_down: cvars.get_bool("gl_round_down").unwrap_or(false),
        picmip: cvars.get_value("vk_picmip").unwrap_or(0.0).max(0.0) as u32,
        max_size: 2048,
        intensity: cvars.get_value("intensity").unwrap_or(1.0).max(1.0),
        gamma: cvars.get_value("vid_gamma").unwrap_or(1.0).max(0.1),
    }
}

/// Registers the renderer's whole cvar surface with defaults and flags.
pub fn register_cvars(cvars: &CvarRegistry) {
    use CvarFlags as F;

    let defs: &[(&str, &str, CvarFlags)] = &[
        // renderer core
        ("r_fullbright", "0", F::empty()),
        ("r_nocull", "0", F::empty()),
        ("r_novis", "0", F::empty()),
        ("r_drawentities", "1", F::empty()),
        ("r_drawworld", "1", F::empty()),
        ("r_overbrightbits", "1", F::ARCHIVE),
        ("r_stainmap", "1", F::ARCHIVE),
        ("r_caustics", "1", F::ARCHIVE),
        ("r_detailtexture", "0", F::ARCHIVE),
        ("r_celshading", "0", F::ARCHIVE),
        ("r_fog", "0", F::ARCHIVE),
        ("r_timebasedfx", "0", F::ARCHIVE),
        ("r_hwgamma", "0", F::ARCHIVE),
        // post chain
        ("r_bloom", "0", F::ARCHIVE),
        ("r_bloom_intensity", "0.5", F::ARCHIVE),
        ("r_bloom_threshold", "0.7", F::ARCHIVE),
        ("r_ssao", "0", F::ARCHIVE),
        ("r_ssao_intensity", "1", F::ARCHIVE),
        ("r_ssao_radius", "16", F::ARCHIVE),
        ("r_fxaa", "0", F::ARCHIVE),
        ("r_fsr", "0", F::ARCHIVE),
        ("r_fsr_scale", "1", F::ARCHIVE),
        ("r_fsr_sharpness", "0.5", F::ARCHIVE),
        ("r_temporal", "0", F::ARCHIVE),
        // quality
        ("r_msaa", "0", F::ARCHIVE | F::LATCH),
        ("r_anisotropy", "1", F::ARCHIVE | F::LATCH),
        ("vk_texturemode", "GL_LINEAR_MIPMAP_LINEAR", F::ARCHIVE),
        ("vk_picmip", "0", F::ARCHIVE | F::LATCH),
        ("vk_skymip", "0", F::ARCHIVE | F::LATCH),
        ("gl_round_down", "0", F::ARCHIVE | F::LATCH),
        ("intensity", "2", F::ARCHIVE | F::LATCH),
        // device
        ("vk_swapinterval", "1", F::ARCHIVE),
        ("vk_mode", "3", F::ARCHIVE | F::LATCH),
        ("vid_fullscreen", "0", F::ARCHIVE | F::LATCH),
        ("vid_gamma", "1", F::ARCHIVE),
        ("vk_screenshot_format", "tga", F::ARCHIVE),
        ("vk_screenshot_quality", "85", F::ARCHIVE),
        // debug
        ("r_speeds", "0", F::empty()),
        ("vk_lightmap", "0", F::empty()),
        ("vk_showtris", "0", F::empty()),
        ("vk_lockpvs", "0", F::empty()),
        ("vk_clear", "0", F::empty()),
        ("vk_finish", "0", F::empty()),
        ("vk_log", "0", F::empty()),
        // client interpolation
        ("cl_extrapolate", "1", F::ARCHIVE),
        ("cl_extrapolate_max", "100", F::ARCHIVE),
        ("cl_cubic_interp", "0", F::ARCHIVE),
        ("cl_anim_continue", "1", F::ARCHIVE),
    ];

    for (name, default, flags) in defs {
        if let Err(e) = cvars.register(*name, *default, *flags) {
            debug!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cvar_surface_registered() {
        let cvars = CvarRegistry::new();
        register_cvars(&cvars);

        for name in [
            "r_fullbright",
            "r_nocull",
            "r_novis",
            "r_drawentities",
            "r_drawworld",
            "r_overbrightbits",
            "r_stainmap",
            "r_caustics",
            "r_detailtexture",
            "r_celshading",
            "r_fog",
            "r_timebasedfx",
            "r_hwgamma",
            "r_bloom",
            "r_bloom_intensity",
            "r_bloom_threshold",
            "r_ssao",
            "r_ssao_intensity",
            "r_ssao_radius",
            "r_fxaa",
            "r_fsr",
            "r_fsr_scale",
            "r_fsr_sharpness",
            "r_msaa",
            "r_anisotropy",
            "vk_texturemode",
            "vk_picmip",
            "vk_skymip",
            "vk_swapinterval",
            "vk_mode",
            "vid_fullscreen",
            "vid_gamma",
            "vk_screenshot_format",
            "vk_screenshot_quality",
            "r_speeds",
            "vk_lightmap",
            "vk_showtris",
            "vk_lockpvs",
            "vk_clear",
            "vk_finish",
            "vk_log",
        ] {
            assert!(cvars.contains(name), "{} not registered", name);
        }
    }

    #[test]
    fn test_latched_cvar_waits_for_map_load() {
        let cvars = CvarRegistry::new();
        register_cvars(&cvars);

        cvars.set("vk_picmip", "2").unwrap();
        assert_eq!(cvars.get_value("vk_picmip").unwrap(), 0.0);
        cvars.apply_latched();
        assert_eq!(cvars.get_value("vk_picmip").unwrap(), 2.0);
    }

    #[test]
    fn test_camera_matrices_finite() {
        let camera = Camera::new(
            Vector3::new(10.0, 20.0, 30.0),
            Angles::zero(),
            Deg(75.0),
            16.0 / 9.0,
            None,
        );

        let vp: [[f32; 4]; 4] = camera.view_projection().into();
        for col in vp.iter() {
            for value in col.iter() {
                assert!(value.is_finite());
            }
        }
    }

    #[test]
    fn test_camera_looks_down_forward_axis() {
        // a point straight ahead of the viewer lands in front (negative
        // view-space z)
        let camera = Camera::new(
            Vector3::new(0.0, 0.0, 0.0),
            Angles::zero(),
            Deg(90.0),
            1.0,
            None,
        );
        let ahead = camera.view() * Vector4::new(100.0, 0.0, 0.0, 1.0);
        assert!(ahead.z < 0.0);

        let behind = camera.view() * Vector4::new(-100.0, 0.0, 0.0, 1.0);
        assert!(behind.z > 0.0);
    }

    #[test]
    fn test_halton_jitter_subpixel() {
        let size = Extent2d {
            width: 1920,
            height: 1080,
        };
        for frame in 0..16 {
            let j = halton_jitter(frame, size);
            assert!(j[0].abs() <= 2.0 / 1920.0);
            assert!(j[1].abs() <= 2.0 / 1080.0);
        }
    }

    #[test]
    fn test_capture_format_from_cvar() {
        assert_eq!(CaptureFormat::from_cvar("png"), CaptureFormat::Png);
        assert_eq!(CaptureFormat::from_cvar("jpg"), CaptureFormat::Jpg);
        assert_eq!(CaptureFormat::from_cvar("bogus"), CaptureFormat::Tga);
    }
}
