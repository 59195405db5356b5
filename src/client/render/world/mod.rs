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

//! World traversal and the opaque world pass.
//!
//! `WorldVis` holds the per-frame transient marks (`visframe`,
//! `dlightframe`) in arrays parallel to the BSP's own, and produces ordered
//! draw lists by walking the tree front to back. The GPU side bakes all face
//! polygons into one vertex buffer at map load and replays the draw lists
//! grouped by texture and lightmap page.

pub mod alias;
pub mod light;
pub mod particle;
pub mod refl;
pub mod sky;
pub mod sprite;

use std::collections::HashMap;

use crate::client::entity::Dlight;
use crate::common::bsp::{Bsp, FaceSide, NodeChild, SurfaceFlags};
use crate::common::math::{Frustum, PlaneSide};

use super::image::ImageRef;
use super::warp;

use cgmath::{InnerSpace, Vector3};

use self::light::dlight_affects_face;

/// Ordered face lists produced by one walk.
#[derive(Default, Debug)]
pub struct DrawLists {
    /// Opaque faces, in front-to-back visit order.
    pub opaque: Vec<usize>,
    /// Sky faces, drawn after opaque to fill remaining depth.
    pub sky: Vec<usize>,
    /// Translucent and turbulent faces, in visit order.
    pub translucent: Vec<usize>,
}

/// Per-frame traversal counters, reported when `r_speeds` is set.
#[derive(Default, Copy, Clone, Debug)]
pub struct WalkCounters {
    pub wpolys: usize,
    pub visible_leaves: usize,
    pub dlight_faces: usize,
}

/// Transient visibility state over a loaded world.
pub struct WorldVis {
    visframe: u32,
    leaf_visframes: Vec<u32>,
    node_visframes: Vec<u32>,
    face_visframes: Vec<u32>,
    face_dlightframes: Vec<u32>,

    last_cluster: Option<i16>,
    last_area_bits: Vec<u8>,

    /// Freezes the mark set for debugging (`vk_lockpvs`).
    pub locked: bool,

    pub counters: WalkCounters,
}

impl WorldVis {
    pub fn new(bsp: &Bsp) -> WorldVis {
        WorldVis {
            // per-element marks start at 0, so frame 1 means "nothing yet"
            visframe: 1,
            leaf_visframes: vec![0; bsp.leaves.len()],
            node_visframes: vec![0; bsp.nodes.len()],
            face_visframes: vec![0; bsp.faces.len()],
            face_dlightframes: vec![0; bsp.faces.len()],
            last_cluster: None,
            last_area_bits: Vec::new(),
            locked: false,
            counters: WalkCounters::default(),
        }
    }

    pub fn visframe(&self) -> u32 {
        self.visframe
    }

    pub fn face_marked(&self, face_id: usize) -> bool {
        self.face_visframes[face_id] == self.visframe
    }

    pub fn face_dlit(&self, face_id: usize) -> bool {
        self.face_dlightframes[face_id] == self.visframe
    }

    /// Marks the leaves (and their ancestor nodes) visible from
    /// `viewer_cluster` through the current area bits.
    ///
    /// When the cluster and area bits both match the previous frame, or the
    /// mark set is locked, the marks are reused as-is.
    pub fn mark_leaves(&mut self, bsp: &Bsp, viewer_cluster: i16, area_bits: &[u8], novis: bool) {
        if self.locked {
            return;
        }

        if self.last_cluster == Some(viewer_cluster) && self.last_area_bits == area_bits && !novis
        {
            return;
        }

        self.last_cluster = Some(viewer_cluster);
        self.last_area_bits = area_bits.to_vec();
        self.visframe += 1;

        let pvs = if novis {
            vec![0xFF; bsp.num_clusters().max(bsp.leaves.len()).div_ceil(8)]
        } else {
            bsp.cluster_pvs(viewer_cluster)
        };

        for (leaf_id, leaf) in bsp.leaves.iter().enumerate() {
            let cluster = leaf.cluster;
            if cluster < 0 {
                continue;
            }

            let bit = cluster as usize;
            if pvs.get(bit >> 3).map_or(false, |byte| byte & (1 << (bit & 7)) != 0)
                && bsp.area_visible(leaf.area, area_bits)
            {
                self.leaf_visframes[leaf_id] = self.visframe;
            }
        }

        // propagate marks up: a node is visible iff any leaf below it is
        if !bsp.nodes.is_empty() {
            self.mark_node_ancestors(bsp, 0);
        }
    }

    fn mark_node_ancestors(&mut self, bsp: &Bsp, node_id: usize) -> bool {
        let children = bsp.nodes[node_id].children;
        let mut visible = false;

        for child in children {
            visible |= match child {
                NodeChild::Leaf(leaf_id) => self.leaf_visframes[leaf_id] == self.visframe,
                NodeChild::Node(child_id) => self.mark_node_ancestors(bsp, child_id),
            };
        }

        if visible {
            self.node_visframes[node_id] = self.visframe;
        }
        visible
    }

    /// Walks the tree front to back from `origin`, marking faces and
    /// appending them to the draw lists.
    ///
    /// Opaque order leans on the depth buffer; the sky and translucent
    /// queues depend on this exact visit order.
    pub fn walk(
        &mut self,
        bsp: &Bsp,
        origin: Vector3<f32>,
        frustum: Option<&Frustum>,
    ) -> DrawLists {
        let mut lists = DrawLists::default();
        self.counters = WalkCounters::default();

        if bsp.nodes.is_empty() {
            return lists;
        }

        self.walk_node(bsp, NodeChild::Node(0), origin, frustum, &mut lists);
        lists
    }

    fn walk_node(
        &mut self,
        bsp: &Bsp,
        child: NodeChild,
        origin: Vector3<f32>,
        frustum: Option<&Frustum>,
        lists: &mut DrawLists,
    ) {
        match child {
            NodeChild::Leaf(leaf_id) => {
                if self.leaf_visframes[leaf_id] != self.visframe {
                    return;
                }

                let leaf = &bsp.leaves[leaf_id];
                if let Some(frustum) = frustum {
                    if frustum.cull_box(leaf.mins, leaf.maxs) {
                        return;
                    }
                }

                self.counters.visible_leaves += 1;

                // mark this leaf's surfaces for the node pass
                for face_id in bsp.leaf_face_ids(leaf) {
                    self.face_visframes[face_id] = self.visframe;
                }
            }

            NodeChild::Node(node_id) => {
                if self.node_visframes[node_id] != self.visframe {
                    return;
                }

                let node = &bsp.nodes[node_id];
                if let Some(frustum) = frustum {
                    if frustum.cull_box(node.mins, node.maxs) {
                        return;
                    }
                }

                let plane = &bsp.planes[node.plane_id];
                let viewer_side = plane.point_side(origin);
                let (front, back) = match viewer_side {
                    PlaneSide::Front => (node.children[0], node.children[1]),
                    PlaneSide::Back => (node.children[1], node.children[0]),
                };

                self.walk_node(bsp, front, origin, frustum, lists);

                // emit this node's faces whose sidedness matches the viewer
                for face_id in node.first_face..node.first_face + node.num_faces {
                    if self.face_visframes[face_id] != self.visframe {
                        continue;
                    }

                    let face = &bsp.faces[face_id];
                    let facing = match (viewer_side, face.side) {
                        (PlaneSide::Front, FaceSide::Front) => true,
                        (PlaneSide::Back, FaceSide::Back) => true,
                        _ => false,
                    };
                    if !facing {
                        continue;
                    }

                    let flags = bsp.texinfos[face.texinfo_id].flags;
                    if flags.contains(SurfaceFlags::NODRAW) {
                        continue;
                    }

                    self.counters.wpolys += 1;

                    if flags.contains(SurfaceFlags::SKY) {
                        lists.sky.push(face_id);
                    } else if flags
                        .intersects(SurfaceFlags::TRANS33 | SurfaceFlags::TRANS66 | SurfaceFlags::WARP)
                    {
                        lists.translucent.push(face_id);
                    } else {
                        lists.opaque.push(face_id);
                    }
                }

                self.walk_node(bsp, back, origin, frustum, lists);
            }
        }
    }

    /// Marks every walked face a live dlight reaches; returns the set to
    /// re-composite this frame.
    ///
    /// Faces are independent of one another, so recomposition of the result
    /// may be fanned out per surface.
    pub fn mark_dlights(&mut self, bsp: &Bsp, dlights: &[Dlight], lists: &DrawLists) -> Vec<usize> {
        let mut dirty = Vec::new();

        for &face_id in lists.opaque.iter().chain(&lists.translucent) {
            if dlights
                .iter()
                .any(|dlight| dlight_affects_face(bsp, face_id, dlight))
            {
                self.face_dlightframes[face_id] = self.visframe;
                dirty.push(face_id);
            }
        }

        self.counters.dlight_faces = dirty.len();
        dirty
    }
}

/// Follows a texinfo's animation chain by `frame` steps.
///
/// Chains cycle through `next` links; the cycle length bounds the walk, so
/// a malformed self-referential chain cannot loop forever.
pub fn texture_animation(bsp: &Bsp, texinfo_id: usize, frame: usize) -> usize {
    let mut count = 1;
    let mut cursor = texinfo_id;
    while let Some(next) = bsp.texinfos[cursor].next {
        if next == texinfo_id || count >= 64 {
            break;
        }
        cursor = next;
        count += 1;
    }

    let mut current = texinfo_id;
    for _ in 0..frame % count {
        match bsp.texinfos[current].next {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

/// One baked world vertex.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct WorldVertex {
    pub position: [f32; 3],
    pub texcoord: [f32; 2],
    pub lightmap_coord: [f32; 2],
    /// Texture-flow phase: 1.0 on FLOWING surfaces, else 0.0.
    pub flow: f32,
    /// Surface opacity from texinfo (1.0, 0.66 or 0.33).
    pub alpha: f32,
}

pub const WORLD_VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x2,
    2 => Float32x2,
    3 => Float32,
    4 => Float32,
];

/// Baked geometry for one face: a range of triangles in the world vertex
/// buffer.
#[derive(Copy, Clone, Debug)]
pub struct FaceGeometry {
    pub first_vertex: u32,
    pub vertex_count: u32,
    pub texture: ImageRef,
    pub lightmap_page: Option<usize>,
}

/// World geometry baked for drawing.
pub struct WorldGeometry {
    pub faces: Vec<FaceGeometry>,
    vertex_data: Vec<WorldVertex>,
    vertex_buffer: Option<wgpu::Buffer>,
}

impl WorldGeometry {
    /// Triangulates every face against its lightmap placement.
    ///
    /// Turbulent faces are grid-subdivided so the warp deformation has
    /// vertices to act on.
    pub fn build(
        bsp: &Bsp,
        atlas: &light::LightmapAtlas,
        mut texture_for_face: impl FnMut(usize) -> ImageRef,
    ) -> WorldGeometry {
        let mut faces = Vec::with_capacity(bsp.faces.len());
        let mut vertex_data = Vec::new();

        for (face_id, face) in bsp.faces.iter().enumerate() {
            let texinfo = &bsp.texinfos[face.texinfo_id];
            let texture = texture_for_face(face_id);
            let lightmap = atlas.face_lightmap(face_id);

            let first_vertex = vertex_data.len() as u32;

            let flow = if texinfo.flags.contains(SurfaceFlags::FLOWING) {
                1.0
            } else {
                0.0
            };

            let alpha = if texinfo.flags.contains(SurfaceFlags::TRANS33) {
                0.33
            } else if texinfo.flags.contains(SurfaceFlags::TRANS66) {
                0.66
            } else {
                1.0
            };

            let emit = |out: &mut Vec<WorldVertex>, pos: Vector3<f32>| {
                let s = pos.dot(texinfo.s_vector) + texinfo.s_offset;
                let t = pos.dot(texinfo.t_vector) + texinfo.t_offset;

                let lightmap_coord = match lightmap {
                    Some(lm) => {
                        // center luxels within the atlas rectangle
                        let ls = (s - face.texture_mins[0] as f32) / 16.0 + 0.5;
                        let lt = (t - face.texture_mins[1] as f32) / 16.0 + 0.5;
                        [
                            (lm.rect.x as f32 + ls) / light::LIGHTMAP_PAGE_DIM as f32,
                            (lm.rect.y as f32 + lt) / light::LIGHTMAP_PAGE_DIM as f32,
                        ]
                    }
                    None => [0.0, 0.0],
                };

                out.push(WorldVertex {
                    position: pos.into(),
                    texcoord: [s, t],
                    lightmap_coord,
                    flow,
                    alpha,
                });
            };

            if texinfo.flags.contains(SurfaceFlags::WARP) {
                for tri_vertex in warp::subdivide(face.vertices.clone()) {
                    emit(&mut vertex_data, tri_vertex);
                }
            } else if face.vertices.len() >= 3 {
                // fan triangulation
                for i in 1..face.vertices.len() - 1 {
                    emit(&mut vertex_data, face.vertices[0]);
                    emit(&mut vertex_data, face.vertices[i]);
                    emit(&mut vertex_data, face.vertices[i + 1]);
                }
            }

            faces.push(FaceGeometry {
                first_vertex,
                vertex_count: vertex_data.len() as u32 - first_vertex,
                texture,
                lightmap_page: lightmap.map(|lm| lm.page),
            });
        }

        WorldGeometry {
            faces,
            vertex_data,
            vertex_buffer: None,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_data.len()
    }

    pub fn sync(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        if self.vertex_buffer.is_none() {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("world vertex buffer"),
                size: (self.vertex_data.len() * std::mem::size_of::<WorldVertex>()) as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            queue.write_buffer(&buffer, 0, bytemuck::cast_slice(&self.vertex_data));
            self.vertex_buffer = Some(buffer);
        }
    }

    pub fn vertex_buffer(&self) -> Option<&wgpu::Buffer> {
        self.vertex_buffer.as_ref()
    }

    /// Groups an opaque draw list by (texture, lightmap page), preserving
    /// rough front-to-back order within each group.
    pub fn batch<'a>(
        &self,
        face_ids: impl Iterator<Item = &'a usize>,
    ) -> Vec<((ImageRef, Option<usize>), Vec<usize>)> {
        let mut groups: HashMap<(ImageRef, Option<usize>), Vec<usize>> = HashMap::new();
        let mut order: Vec<(ImageRef, Option<usize>)> = Vec::new();

        for &face_id in face_ids {
            let geo = &self.faces[face_id];
            let key = (geo.texture, geo.lightmap_page);
            if !groups.contains_key(&key) {
                order.push(key);
            }
            groups.entry(key).or_default().push(face_id);
        }

        order
            .into_iter()
            .map(|key| {
                let faces = groups.remove(&key).unwrap();
                (key, faces)
            })
            .collect()
    }
}

lazy_static! {
    static ref WORLD_BIND_GROUP_LAYOUT_ENTRIES: [Vec<wgpu::BindGroupLayoutEntry>; 2] = [
        // diffuse texture + lightmap page
        vec![
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
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
        ],
        // water: diffuse + reflection image
        vec![
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
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
        ],
    ];
}

use super::pipeline::Pipeline;
use super::target::{COLOR_ATTACHMENT_FORMAT, DEPTH_ATTACHMENT_FORMAT};

pub struct WorldPipeline;

impl Pipeline for WorldPipeline {
    fn name() -> &'static str {
        "world"
    }

    fn shader_source() -> &'static str {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/world.wgsl"))
    }

    fn bind_group_layout_descriptors() -> Vec<wgpu::BindGroupLayoutDescriptor<'static>> {
        vec![wgpu::BindGroupLayoutDescriptor {
            label: Some("world per-texture bind group"),
            entries: &WORLD_BIND_GROUP_LAYOUT_ENTRIES[0],
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
            array_stride: std::mem::size_of::<WorldVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &WORLD_VERTEX_ATTRIBUTES,
        }]
    }
}

/// Translucent and turbulent surfaces: vertex warp, alpha from texinfo,
/// Fresnel blend against the reflection image when one is bound.
pub struct WaterPipeline;

impl Pipeline for WaterPipeline {
    fn name() -> &'static str {
        "water"
    }

    fn shader_source() -> &'static str {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/water.wgsl"))
    }

    fn bind_group_layout_descriptors() -> Vec<wgpu::BindGroupLayoutDescriptor<'static>> {
        vec![wgpu::BindGroupLayoutDescriptor {
            label: Some("water bind group"),
            entries: &WORLD_BIND_GROUP_LAYOUT_ENTRIES[1],
        }]
    }

    fn primitive_state() -> wgpu::PrimitiveState {
        WorldPipeline::primitive_state()
    }

    fn color_target_states() -> Vec<Option<wgpu::ColorTargetState>> {
        vec![Some(wgpu::ColorTargetState {
            format: COLOR_ATTACHMENT_FORMAT,
            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
            write_mask: wgpu::ColorWrites::ALL,
        })]
    }

    fn depth_stencil_state() -> Option<wgpu::DepthStencilState> {
        // translucent surfaces test but do not write depth
        Some(wgpu::DepthStencilState {
            format: DEPTH_ATTACHMENT_FORMAT,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        })
    }

    fn vertex_buffer_layouts() -> Vec<wgpu::VertexBufferLayout<'static>> {
        WorldPipeline::vertex_buffer_layouts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bsp::{ContentFlags, Face, Leaf, Node, TexInfo, Vis};
    use crate::common::math::{Angles, Hyperplane};
    use cgmath::{Deg, Zero};

    /// Two clusters under a shared ceiling at z = 64.
    ///
    /// The root node splits on the ceiling plane and carries both ceiling
    /// faces; its lower child splits the space at x = 0 into cluster 0
    /// (east) and cluster 1 (west). The upper leaf is outside the world.
    fn split_world(cross_visible: bool) -> Bsp {
        let face = |x0: f32| Face {
            plane_id: 0,
            side: FaceSide::Back,
            texinfo_id: 0,
            vertices: vec![
                Vector3::new(x0, 0.0, 64.0),
                Vector3::new(x0 + 64.0, 0.0, 64.0),
                Vector3::new(x0 + 64.0, 64.0, 64.0),
                Vector3::new(x0, 64.0, 64.0),
            ],
            light_styles: [255; 4],
            light_ofs: None,
            texture_mins: [0, 0],
            extents: [64, 64],
        };

        // rows: cluster 0 sees {0} or {0,1}; cluster 1 symmetric
        let row0: u8 = if cross_visible { 0b11 } else { 0b01 };
        let row1: u8 = if cross_visible { 0b11 } else { 0b10 };
        let vis = Vis::new(2, vec![(24, 24), (25, 25)], {
            let mut data = vec![0u8; 24];
            data.push(row0);
            data.push(row1);
            data
        });

        Bsp {
            planes: vec![Hyperplane::axis_z(64.0), Hyperplane::axis_x(0.0)],
            vertices: vec![],
            nodes: vec![
                Node {
                    plane_id: 0,
                    children: [NodeChild::Leaf(2), NodeChild::Node(1)],
                    mins: Vector3::new(-128.0, -128.0, -128.0),
                    maxs: Vector3::new(128.0, 128.0, 128.0),
                    first_face: 0,
                    num_faces: 2,
                },
                Node {
                    plane_id: 1,
                    children: [NodeChild::Leaf(0), NodeChild::Leaf(1)],
                    mins: Vector3::new(-128.0, -128.0, -128.0),
                    maxs: Vector3::new(128.0, 128.0, 64.0),
                    first_face: 0,
                    num_faces: 0,
                },
            ],
            leaves: vec![
                Leaf {
                    contents: ContentFlags::empty(),
                    cluster: 0,
                    area: 0,
                    mins: Vector3::zero(),
                    maxs: Vector3::new(128.0, 128.0, 64.0),
                    first_leaf_face: 0,
                    num_leaf_faces: 1,
                },
                Leaf {
                    contents: ContentFlags::empty(),
                    cluster: 1,
                    area: 0,
                    mins: Vector3::new(-128.0, -128.0, -128.0),
                    maxs: Vector3::new(0.0, 128.0, 64.0),
                    first_leaf_face: 1,
                    num_leaf_faces: 1,
                },
                Leaf {
                    contents: ContentFlags::SOLID,
                    cluster: -1,
                    area: 0,
                    mins: Vector3::new(-128.0, -128.0, 64.0),
                    maxs: Vector3::new(128.0, 128.0, 128.0),
                    first_leaf_face: 0,
                    num_leaf_faces: 0,
                },
            ],
            texinfos: vec![TexInfo {
                s_vector: Vector3::unit_x(),
                s_offset: 0.0,
                t_vector: Vector3::unit_y(),
                t_offset: 0.0,
                flags: SurfaceFlags::empty(),
                value: 0,
                texture_name: "ceiling".to_owned(),
                next: None,
            }],
            faces: vec![face(0.0), face(-64.0)],
            leaf_faces: vec![0, 1],
            models: vec![],
            light_data: vec![],
            vis: Some(vis),
            num_areas: 1,
        }
    }

    #[test]
    fn test_marked_faces_have_current_visframe() {
        let bsp = split_world(true);
        let mut vis = WorldVis::new(&bsp);

        vis.mark_leaves(&bsp, 0, &[], false);
        let lists = vis.walk(&bsp, Vector3::new(32.0, 32.0, 0.0), None);

        for &face_id in lists.opaque.iter() {
            assert!(vis.face_marked(face_id));
        }
        assert!(!lists.opaque.is_empty());
    }

    #[test]
    fn test_pvs_restricts_marks() {
        let bsp = split_world(false);
        let mut vis = WorldVis::new(&bsp);

        // cluster 0 sees only itself: exactly one ceiling face
        vis.mark_leaves(&bsp, 0, &[], false);
        let lists = vis.walk(&bsp, Vector3::new(32.0, 32.0, 0.0), None);
        assert_eq!(lists.opaque, vec![0]);
    }

    #[test]
    fn test_pvs_lock_freezes_mark_set() {
        let bsp = split_world(false);
        let mut vis = WorldVis::new(&bsp);

        vis.mark_leaves(&bsp, 0, &[], false);
        let before = vis.walk(&bsp, Vector3::new(32.0, 32.0, 0.0), None);

        // lock, then "move" to cluster 1; the mark set must not change
        vis.locked = true;
        vis.mark_leaves(&bsp, 1, &[], false);
        let after = vis.walk(&bsp, Vector3::new(32.0, 32.0, 0.0), None);

        assert_eq!(before.opaque, after.opaque);
    }

    #[test]
    fn test_cluster_reuse_keeps_visframe() {
        let bsp = split_world(true);
        let mut vis = WorldVis::new(&bsp);

        vis.mark_leaves(&bsp, 0, &[], false);
        let frame = vis.visframe();
        vis.mark_leaves(&bsp, 0, &[], false);
        assert_eq!(vis.visframe(), frame);

        // area change invalidates the cached set
        vis.mark_leaves(&bsp, 0, &[0b1], false);
        assert_eq!(vis.visframe(), frame + 1);
    }

    #[test]
    fn test_frustum_culls_subtree() {
        let bsp = split_world(true);
        let mut vis = WorldVis::new(&bsp);

        vis.mark_leaves(&bsp, 0, &[], false);

        // looking straight up from below the ceiling: both faces in view
        let frustum = Frustum::new(
            Vector3::new(1.0, 32.0, 0.0),
            Angles {
                pitch: Deg(-90.0),
                roll: Deg(0.0),
                yaw: Deg(0.0),
            },
            Deg(90.0),
            Deg(90.0),
        );
        let lists = vis.walk(&bsp, Vector3::new(1.0, 32.0, 0.0), Some(&frustum));
        assert_eq!(lists.opaque.len(), 2);
    }

    #[test]
    fn test_texture_animation_chain() {
        let mut bsp = split_world(true);
        // three-frame chain 0 -> 1 -> 2 -> 0
        bsp.texinfos = (0..3)
            .map(|i| TexInfo {
                s_vector: Vector3::unit_x(),
                s_offset: 0.0,
                t_vector: Vector3::unit_y(),
                t_offset: 0.0,
                flags: SurfaceFlags::empty(),
                value: 0,
                texture_name: format!("anim{}", i),
                next: Some((i + 1) % 3),
            })
            .collect();

        assert_eq!(texture_animation(&bsp, 0, 0), 0);
        assert_eq!(texture_animation(&bsp, 0, 1), 1);
        assert_eq!(texture_animation(&bsp, 0, 2), 2);
        assert_eq!(texture_animation(&bsp, 0, 3), 0);
        assert_eq!(texture_animation(&bsp, 0, 7), 1);
    }

    #[test]
    fn test_dlight_marks_only_reached_faces() {
        let bsp = split_world(true);
        let mut vis = WorldVis::new(&bsp);

        vis.mark_leaves(&bsp, 0, &[], false);
        let lists = vis.walk(&bsp, Vector3::new(32.0, 32.0, 0.0), None);

        // a light hugging face 0's ceiling center
        let dlight = Dlight {
            origin: Vector3::new(32.0, 32.0, 60.0),
            radius: 40.0,
            color: [1.0, 1.0, 1.0],
        };
        let dirty = vis.mark_dlights(&bsp, &[dlight], &lists);
        assert_eq!(dirty, vec![0]);
        assert!(vis.face_dlit(0));
        assert!(!vis.face_dlit(1));
    }
}
