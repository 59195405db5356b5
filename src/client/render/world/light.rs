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

//! The lightmap engine.
//!
//! Static luxel grids are packed into atlas pages at map load. Each frame,
//! surfaces touched by a dynamic light are re-composited from the static
//! samples, the dlight falloff and the stain mask, and only their
//! rectangles are re-uploaded.

use crate::client::entity::{Dlight, LightStyles, DLIGHT_CUTOFF};
use crate::client::render::block::{BlockAlloc, BlockRect};
use crate::common::bsp::{Bsp, Face, FaceSide, LIGHTMAP_SCALE};
use crate::common::task::TaskPool;

use cgmath::{InnerSpace, Vector3};
use chrono::Duration;

pub const LIGHTMAP_PAGE_DIM: u32 = 256;

/// A face's reserved rectangle in the atlas.
#[derive(Copy, Clone, Debug)]
pub struct FaceLightmap {
    pub page: usize,
    pub rect: BlockRect,
}

struct LightmapPage {
    alloc: BlockAlloc,
    /// RGBA staging copy of the page.
    pixels: Vec<u8>,
    gpu: Option<wgpu::Texture>,
    view: Option<wgpu::TextureView>,
    /// Rectangles awaiting re-upload.
    dirty: Vec<BlockRect>,
    full_upload: bool,
}

impl LightmapPage {
    fn new() -> LightmapPage {
        LightmapPage {
            alloc: BlockAlloc::new(LIGHTMAP_PAGE_DIM, LIGHTMAP_PAGE_DIM),
            pixels: vec![0xFF; (LIGHTMAP_PAGE_DIM * LIGHTMAP_PAGE_DIM * 4) as usize],
            gpu: None,
            view: None,
            dirty: Vec::new(),
            full_upload: true,
        }
    }

    fn blit(&mut self, rect: &BlockRect, rgba: &[u8]) {
        for row in 0..rect.height {
            let src = (row * rect.width * 4) as usize;
            let dst = (((rect.y + row) * LIGHTMAP_PAGE_DIM + rect.x) * 4) as usize;
            self.pixels[dst..dst + (rect.width * 4) as usize]
                .copy_from_slice(&rgba[src..src + (rect.width * 4) as usize]);
        }
    }
}

/// Per-surface stain accumulator.
///
/// One 8-bit darkening value per luxel, faded back to zero linearly over
/// time.
pub struct Stainmap {
    // per-face luxel masks, sized like the face's lightmap rect
    masks: Vec<Option<Vec<u8>>>,
    /// Units of stain faded per second.
    pub fade_per_second: f32,
    last_fade: Duration,
}

impl Stainmap {
    fn new(num_faces: usize) -> Stainmap {
        Stainmap {
            masks: (0..num_faces).map(|_| None).collect(),
            fade_per_second: 48.0,
            last_fade: Duration::zero(),
        }
    }

    pub fn mask(&self, face_id: usize) -> Option<&[u8]> {
        self.masks.get(face_id).and_then(|m| m.as_deref())
    }

    fn mask_mut(&mut self, face_id: usize, len: usize) -> &mut Vec<u8> {
        self.masks[face_id].get_or_insert_with(|| vec![0; len])
    }

    /// Fades all stains toward zero; linear in elapsed seconds.
    pub fn fade(&mut self, now: Duration) -> Vec<usize> {
        let elapsed = (now - self.last_fade).num_milliseconds() as f32 / 1000.0;
        self.last_fade = now;
        if elapsed <= 0.0 {
            return Vec::new();
        }

        let step = (self.fade_per_second * elapsed).round() as u8;
        if step == 0 {
            return Vec::new();
        }

        let mut touched = Vec::new();
        for (face_id, mask) in self.masks.iter_mut().enumerate() {
            if let Some(values) = mask {
                let mut faded = false;
                let mut live = false;
                for v in values.iter_mut() {
                    if *v > 0 {
                        *v = v.saturating_sub(step);
                        faded = true;
                    }
                    live |= *v > 0;
                }
                if faded {
                    touched.push(face_id);
                }
                if !live {
                    *mask = None;
                }
            }
        }
        touched
    }
}

/// The atlas: page allocators, staging pixels, per-face placements and the
/// stain overlay.
pub struct LightmapAtlas {
    pages: Vec<LightmapPage>,
    faces: Vec<Option<FaceLightmap>>,
    pub stains: Stainmap,
}

impl LightmapAtlas {
    /// Reserves a rectangle for every lit face in the world and composites
    /// the static lighting into the staging pages.
    pub fn build(bsp: &Bsp, styles: &LightStyles) -> LightmapAtlas {
        let mut atlas = LightmapAtlas {
            pages: vec![LightmapPage::new()],
            faces: (0..bsp.faces.len()).map(|_| None).collect(),
            stains: Stainmap::new(bsp.faces.len()),
        };

        for face_id in 0..bsp.faces.len() {
            if bsp.faces[face_id].light_ofs.is_none() {
                continue;
            }

            let (w, h) = bsp.faces[face_id].lightmap_dims();
            let placement = atlas.alloc(w, h);
            atlas.faces[face_id] = Some(placement);

            let rgba = compose_face(bsp, face_id, styles, &[], None, Duration::zero());
            atlas.pages[placement.page].blit(&placement.rect, &rgba);
        }

        info!(
            "lightmaps: {} faces across {} pages",
            atlas.faces.iter().flatten().count(),
            atlas.pages.len()
        );

        atlas
    }

    fn alloc(&mut self, width: u32, height: u32) -> FaceLightmap {
        for (page, p) in self.pages.iter_mut().enumerate() {
            if let Some(rect) = p.alloc.alloc(width, height) {
                return FaceLightmap { page, rect };
            }
        }

        // all pages full: open a new one
        self.pages.push(LightmapPage::new());
        let page = self.pages.len() - 1;
        let rect = self.pages[page]
            .alloc
            .alloc(width, height)
            .expect("lightmap rect larger than a page");
        FaceLightmap { page, rect }
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn face_lightmap(&self, face_id: usize) -> Option<FaceLightmap> {
        self.faces.get(face_id).copied().flatten()
    }

    /// All placements on one page; test and debug hook.
    pub fn page_rects(&self, page: usize) -> Vec<BlockRect> {
        self.faces
            .iter()
            .flatten()
            .filter(|f| f.page == page)
            .map(|f| f.rect)
            .collect()
    }

    /// Re-composites one face's rectangle with current styles, the frame's
    /// dlights and its stain mask, and queues the rectangle for upload.
    pub fn update_face(
        &mut self,
        bsp: &Bsp,
        face_id: usize,
        styles: &LightStyles,
        dlights: &[Dlight],
        time: Duration,
    ) {
        let Some(placement) = self.faces[face_id] else {
            return;
        };

        let rgba = compose_face(
            bsp,
            face_id,
            styles,
            dlights,
            self.stains.mask(face_id),
            time,
        );
        let page = &mut self.pages[placement.page];
        page.blit(&placement.rect, &rgba);
        page.dirty.push(placement.rect);
    }

    /// Re-composites a batch of faces, fanning the luxel work out across
    /// the pool.
    ///
    /// Composition is independent per face; only the final blit into the
    /// shared pages runs on the calling thread.
    pub fn update_faces(
        &mut self,
        pool: &TaskPool,
        bsp: &Bsp,
        face_ids: &[usize],
        styles: &LightStyles,
        dlights: &[Dlight],
        time: Duration,
    ) {
        let stains = &self.stains;
        let composed = pool.map_indexed(face_ids.len(), |i| {
            let face_id = face_ids[i];
            compose_face(bsp, face_id, styles, dlights, stains.mask(face_id), time)
        });

        for (i, rgba) in composed.into_iter().enumerate() {
            let Some(placement) = self.faces[face_ids[i]] else {
                continue;
            };
            let page = &mut self.pages[placement.page];
            page.blit(&placement.rect, &rgba);
            page.dirty.push(placement.rect);
        }
    }

    /// Projects a stain into every face the splash touches.
    pub fn add_stain(&mut self, bsp: &Bsp, origin: Vector3<f32>, radius: f32, intensity: u8) {
        for face_id in 0..bsp.faces.len() {
            if self.faces[face_id].is_none() {
                continue;
            }

            let face = &bsp.faces[face_id];
            let plane = &bsp.planes[face.plane_id];
            let dist = signed_dist(plane.point_dist(origin), face.side);
            if dist.abs() >= radius {
                continue;
            }

            let (w, h) = face.lightmap_dims();
            let impact = origin - plane.normal * dist;
            let (local_s, local_t) = texture_space(bsp, face, impact);

            let mask = self.stains.mask_mut(face_id, (w * h) as usize);
            let mut any = false;
            for t in 0..h {
                let td = local_t - (t as f32) * LIGHTMAP_SCALE as f32;
                for s in 0..w {
                    let sd = local_s - (s as f32) * LIGHTMAP_SCALE as f32;
                    let luxel_dist = (sd * sd + td * td + dist * dist).sqrt();
                    if luxel_dist < radius {
                        let add =
                            (intensity as f32 * (1.0 - luxel_dist / radius)).round() as u8;
                        let cell = &mut mask[(t * w + s) as usize];
                        *cell = cell.saturating_add(add);
                        any = true;
                    }
                }
            }

            if any {
                self.update_face(bsp, face_id, &LightStyles::new(), &[], Duration::zero());
            }
        }
    }

    /// Flushes dirty rectangles (or whole new pages) to the GPU.
    pub fn sync(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        for (index, page) in self.pages.iter_mut().enumerate() {
            if page.gpu.is_none() {
                let texture = device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&format!("lightmap page {}", index)),
                    size: wgpu::Extent3d {
                        width: LIGHTMAP_PAGE_DIM,
                        height: LIGHTMAP_PAGE_DIM,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                });
                page.view = Some(texture.create_view(&Default::default()));
                page.gpu = Some(texture);
                page.full_upload = true;
            }

            let texture = page.gpu.as_ref().unwrap();

            if page.full_upload {
                write_rect(
                    queue,
                    texture,
                    &page.pixels,
                    &BlockRect {
                        x: 0,
                        y: 0,
                        width: LIGHTMAP_PAGE_DIM,
                        height: LIGHTMAP_PAGE_DIM,
                    },
                );
                page.full_upload = false;
                page.dirty.clear();
                continue;
            }

            for rect in page.dirty.drain(..) {
                write_rect(queue, texture, &page.pixels, &rect);
            }
        }
    }

    pub fn view(&self, page: usize) -> Option<&wgpu::TextureView> {
        self.pages.get(page).and_then(|p| p.view.as_ref())
    }
}

fn write_rect(queue: &wgpu::Queue, texture: &wgpu::Texture, pixels: &[u8], rect: &BlockRect) {
    let start = ((rect.y * LIGHTMAP_PAGE_DIM + rect.x) * 4) as usize;
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d {
                x: rect.x,
                y: rect.y,
                z: 0,
            },
            aspect: wgpu::TextureAspect::All,
        },
        &pixels[start..],
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(LIGHTMAP_PAGE_DIM * 4),
            rows_per_image: Some(rect.height),
        },
        wgpu::Extent3d {
            width: rect.width,
            height: rect.height,
            depth_or_array_layers: 1,
        },
    );
}

fn signed_dist(dist: f32, side: FaceSide) -> f32 {
    match side {
        FaceSide::Front => dist,
        FaceSide::Back => -dist,
    }
}

/// Projects a world point into a face's luxel-relative texture space.
fn texture_space(bsp: &Bsp, face: &Face, point: Vector3<f32>) -> (f32, f32) {
    let texinfo = &bsp.texinfos[face.texinfo_id];
    let s = point.dot(texinfo.s_vector) + texinfo.s_offset - face.texture_mins[0] as f32;
    let t = point.dot(texinfo.t_vector) + texinfo.t_offset - face.texture_mins[1] as f32;
    (s, t)
}

/// Whether a dynamic light reaches a face: close enough to the plane and
/// projecting inside the face polygon (grown by the light radius).
pub fn dlight_affects_face(bsp: &Bsp, face_id: usize, dlight: &Dlight) -> bool {
    let face = &bsp.faces[face_id];
    let plane = &bsp.planes[face.plane_id];

    let dist = signed_dist(plane.point_dist(dlight.origin), face.side);
    if dist.abs() >= dlight.radius - DLIGHT_CUTOFF {
        return false;
    }

    let impact = dlight.origin - plane.normal * dist;
    point_in_polygon(&face.vertices, plane.normal, impact)
}

/// Point-in-polygon on the face plane.
fn point_in_polygon(vertices: &[Vector3<f32>], normal: Vector3<f32>, point: Vector3<f32>) -> bool {
    if vertices.len() < 3 {
        return false;
    }

    // orient by the polygon's own winding so either convention works
    let mut area = Vector3::new(0.0, 0.0, 0.0);
    for i in 1..vertices.len() - 1 {
        area += (vertices[i] - vertices[0]).cross(vertices[i + 1] - vertices[0]);
    }
    let oriented = if area.dot(normal) >= 0.0 { normal } else { -normal };

    for i in 0..vertices.len() {
        let v0 = vertices[i];
        let v1 = vertices[(i + 1) % vertices.len()];
        let edge = v1 - v0;
        // inward-facing edge plane
        let inward = oriented.cross(edge).normalize();
        if inward.dot(point - v0) < 0.0 {
            return false;
        }
    }

    true
}

/// Builds one face's RGBA luxel rectangle: summed static styles, dlight
/// falloff, stain darkening.
pub fn compose_face(
    bsp: &Bsp,
    face_id: usize,
    styles: &LightStyles,
    dlights: &[Dlight],
    stain: Option<&[u8]>,
    time: Duration,
) -> Vec<u8> {
    let face = &bsp.faces[face_id];
    let (w, h) = face.lightmap_dims();
    let luxels = (w * h) as usize;

    let mut accum = vec![[0f32; 3]; luxels];

    // static styles: consecutive luxel blocks in the lighting lump
    if let Some(light_ofs) = face.light_ofs {
        let mut ofs = light_ofs;
        for &style in face.light_styles.iter() {
            if style == 255 || ofs >= bsp.light_data.len() {
                break;
            }
            let scale = styles.value(style as usize, time);
            let block = &bsp.light_data[ofs..(ofs + luxels * 3).min(bsp.light_data.len())];

            for (luxel, sample) in accum.iter_mut().zip(block.chunks_exact(3)) {
                luxel[0] += sample[0] as f32 * scale;
                luxel[1] += sample[1] as f32 * scale;
                luxel[2] += sample[2] as f32 * scale;
            }

            ofs += luxels * 3;
        }
    }

    // dynamic lights: radial falloff in luxel space
    let plane = &bsp.planes[face.plane_id];
    for dlight in dlights {
        let dist = signed_dist(plane.point_dist(dlight.origin), face.side);
        if dist.abs() >= dlight.radius - DLIGHT_CUTOFF {
            continue;
        }

        let impact = dlight.origin - plane.normal * dist;
        let (local_s, local_t) = texture_space(bsp, face, impact);

        for t in 0..h {
            let td = local_t - (t as f32) * LIGHTMAP_SCALE as f32;
            for s in 0..w {
                let sd = local_s - (s as f32) * LIGHTMAP_SCALE as f32;
                let luxel_dist = (sd * sd + td * td + dist * dist).sqrt();
                let falloff = (1.0 - luxel_dist / dlight.radius).max(0.0);
                if falloff > 0.0 {
                    let luxel = &mut accum[(t * w + s) as usize];
                    luxel[0] += dlight.color[0] * 255.0 * falloff;
                    luxel[1] += dlight.color[1] * 255.0 * falloff;
                    luxel[2] += dlight.color[2] * 255.0 * falloff;
                }
            }
        }
    }

    let mut rgba = Vec::with_capacity(luxels * 4);
    for (i, luxel) in accum.iter().enumerate() {
        let darken = match stain {
            Some(mask) => 1.0 - mask[i] as f32 / 255.0,
            None => 1.0,
        };
        rgba.push((luxel[0] * darken).min(255.0) as u8);
        rgba.push((luxel[1] * darken).min(255.0) as u8);
        rgba.push((luxel[2] * darken).min(255.0) as u8);
        rgba.push(0xFF);
    }

    rgba
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bsp::{
        ContentFlags, Leaf, Node, NodeChild, SurfaceFlags, TexInfo,
    };
    use crate::common::math::Hyperplane;
    use cgmath::Zero;

    /// One 64x32-unit floor face at z = 0 with a flat static lightmap.
    fn floor_world(light_level: u8) -> Bsp {
        let face = Face {
            plane_id: 0,
            side: FaceSide::Front,
            texinfo_id: 0,
            vertices: vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(0.0, 32.0, 0.0),
                Vector3::new(64.0, 32.0, 0.0),
                Vector3::new(64.0, 0.0, 0.0),
            ],
            light_styles: [0, 255, 255, 255],
            light_ofs: Some(0),
            texture_mins: [0, 0],
            extents: [64, 32],
        };
        let (w, h) = face.lightmap_dims();

        Bsp {
            planes: vec![Hyperplane::axis_z(0.0)],
            vertices: vec![],
            nodes: vec![Node {
                plane_id: 0,
                children: [NodeChild::Leaf(0), NodeChild::Leaf(0)],
                mins: Vector3::new(-128.0, -128.0, -128.0),
                maxs: Vector3::new(128.0, 128.0, 128.0),
                first_face: 0,
                num_faces: 0,
            }],
            leaves: vec![Leaf {
                contents: ContentFlags::empty(),
                cluster: 0,
                area: 0,
                mins: Vector3::zero(),
                maxs: Vector3::zero(),
                first_leaf_face: 0,
                num_leaf_faces: 1,
            }],
            texinfos: vec![TexInfo {
                s_vector: Vector3::unit_x(),
                s_offset: 0.0,
                t_vector: Vector3::unit_y(),
                t_offset: 0.0,
                flags: SurfaceFlags::empty(),
                value: 0,
                texture_name: "floor".to_owned(),
                next: None,
            }],
            faces: vec![face],
            leaf_faces: vec![0],
            models: vec![],
            light_data: vec![light_level; (w * h) as usize * 3],
            vis: None,
            num_areas: 1,
        }
    }

    #[test]
    fn test_atlas_rects_disjoint() {
        let bsp = floor_world(128);
        let atlas = LightmapAtlas::build(&bsp, &LightStyles::new());

        for page in 0..atlas.num_pages() {
            let rects = atlas.page_rects(page);
            for (i, a) in rects.iter().enumerate() {
                for b in &rects[i + 1..] {
                    assert!(!a.overlaps(b));
                }
            }
        }
    }

    #[test]
    fn test_static_compose() {
        let bsp = floor_world(100);
        let rgba = compose_face(&bsp, 0, &LightStyles::new(), &[], None, Duration::zero());
        // style 0 is unset, so scale is 1.0 and samples pass through
        assert_eq!(rgba[0], 100);
        assert_eq!(rgba[3], 0xFF);
    }

    #[test]
    fn test_dlight_affects_face() {
        let bsp = floor_world(0);

        // well above the face center, inside range
        let near = Dlight {
            origin: Vector3::new(32.0, 16.0, 10.0),
            radius: 100.0,
            color: [1.0, 1.0, 1.0],
        };
        assert!(dlight_affects_face(&bsp, 0, &near));

        // too far from the plane: radius - cutoff exceeded
        let far = Dlight {
            origin: Vector3::new(32.0, 16.0, 90.0),
            radius: 100.0,
            color: [1.0, 1.0, 1.0],
        };
        assert!(!dlight_affects_face(&bsp, 0, &far));

        // close to the plane but projected far outside the polygon
        let outside = Dlight {
            origin: Vector3::new(500.0, 16.0, 10.0),
            radius: 100.0,
            color: [1.0, 1.0, 1.0],
        };
        assert!(!dlight_affects_face(&bsp, 0, &outside));
    }

    #[test]
    fn test_dlight_falloff_brightens_center() {
        let bsp = floor_world(0);
        let dlight = Dlight {
            origin: Vector3::new(32.0, 16.0, 8.0),
            radius: 200.0,
            color: [1.0, 0.0, 0.0],
        };

        let rgba = compose_face(
            &bsp,
            0,
            &LightStyles::new(),
            &[dlight],
            None,
            Duration::zero(),
        );

        let (w, h) = bsp.faces[0].lightmap_dims();
        let center = (((h / 2) * w + w / 2) * 4) as usize;
        let corner = 0usize;
        assert!(rgba[center] > rgba[corner]);
        assert_eq!(rgba[center + 1], 0); // red light only
    }

    #[test]
    fn test_stain_darkens_and_fades() {
        let bsp = floor_world(200);
        let mut atlas = LightmapAtlas::build(&bsp, &LightStyles::new());

        atlas.add_stain(&bsp, Vector3::new(32.0, 16.0, 0.0), 64.0, 255);
        let mask = atlas.stains.mask(0).expect("stain recorded");
        assert!(mask.iter().any(|&v| v > 0));

        let stained = compose_face(
            &bsp,
            0,
            &LightStyles::new(),
            &[],
            atlas.stains.mask(0),
            Duration::zero(),
        );
        let clean = compose_face(&bsp, 0, &LightStyles::new(), &[], None, Duration::zero());
        let (w, _) = bsp.faces[0].lightmap_dims();
        let center = ((w + w / 2) * 4) as usize;
        assert!(stained[center] < clean[center]);

        // fade to nothing over ample time
        atlas.stains.fade(Duration::seconds(60));
        assert!(atlas.stains.mask(0).is_none());
    }
}
