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

//! The image cache.
//!
//! Images are decoded, palette-translated, pre-scaled by the intensity and
//! gamma tables, rounded to power-of-two upload dimensions and mipped on the
//! CPU. Small UI pics are packed into shared scrap pages. GPU upload happens
//! in a separate sync step so the cache itself never touches the device,
//! and eviction is driven by the per-map registration sequence.

use std::collections::{HashMap, HashSet};

use crate::common::{
    image::{pcx, tga, wal, Pixels, SourceImage},
    vfs::Vfs,
};

use super::{
    block::{BlockAlloc, BlockRect},
    error::RenderError,
    palette::Palette,
};

pub const SCRAP_DIM: u32 = 256;
pub const SCRAP_PAGES: usize = 4;

/// Pics smaller than this on both axes go to the scrap.
pub const SCRAP_MAX_DIM: u32 = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Skin,
    Sprite,
    Wall,
    Pic,
    Sky,
}

impl ImageKind {
    /// Mipmapped kinds also get intensity and gamma pre-scaling.
    pub fn mipmapped(self) -> bool {
        matches!(self, ImageKind::Skin | ImageKind::Wall)
    }
}

/// Index into the image cache. Stable for the lifetime of the entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageRef(pub usize);

/// Placement of a scrap-allocated pic.
#[derive(Copy, Clone, Debug)]
pub struct ScrapPlacement {
    pub page: usize,
    pub rect: BlockRect,
}

/// Upload-processing knobs sampled from the cvar surface.
#[derive(Copy, Clone, Debug)]
pub struct ImageParams {
    /// Round non-power-of-two dimensions down instead of up (mipmapped
    /// kinds only).
    pub round_down: bool,
    /// Mip levels to skip on world textures.
    pub picmip: u32,
    /// Device texture size limit.
    pub max_size: u32,
    /// Intensity scale applied before gamma.
    pub intensity: f32,
    /// Display gamma baked into mipmapped uploads.
    pub gamma: f32,
}

impl Default for ImageParams {
    fn default() -> Self {
        ImageParams {
            round_down: false,
            picmip: 0,
            max_size: 2048,
            intensity: 1.0,
            gamma: 1.0,
        }
    }
}

struct GpuImage {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

pub struct Image {
    pub name: String,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    pub upload_width: u32,
    pub upload_height: u32,
    pub has_alpha: bool,
    pub registration_sequence: u32,
    pub scrap: Option<ScrapPlacement>,

    // processed upload data, mip 0 first; empty for scrap residents
    mips: Vec<Vec<u8>>,
    gpu: Option<GpuImage>,
}

struct ScrapPage {
    alloc: BlockAlloc,
    pixels: Vec<u8>,
    dirty: bool,
    gpu: Option<GpuImage>,
}

impl ScrapPage {
    fn new() -> ScrapPage {
        ScrapPage {
            alloc: BlockAlloc::new(SCRAP_DIM, SCRAP_DIM),
            pixels: vec![0; (SCRAP_DIM * SCRAP_DIM * 4) as usize],
            dirty: false,
            gpu: None,
        }
    }

    fn blit(&mut self, rect: &BlockRect, rgba: &[u8]) {
        for row in 0..rect.height {
            let src_start = (row * rect.width * 4) as usize;
            let dst_start = (((rect.y + row) * SCRAP_DIM + rect.x) * 4) as usize;
            self.pixels[dst_start..dst_start + (rect.width * 4) as usize]
                .copy_from_slice(&rgba[src_start..src_start + (rect.width * 4) as usize]);
        }
        self.dirty = true;
    }
}

pub struct ImageCache {
    images: Vec<Option<Image>>,
    by_name: HashMap<String, usize>,
    scrap: Vec<ScrapPage>,
    registration_sequence: u32,
    params: ImageParams,

    // names already reported, to keep fallback noise to one line each
    failed: HashSet<String>,

    notexture: ImageRef,
    nopic: ImageRef,
}

impl ImageCache {
    pub fn new(params: ImageParams) -> ImageCache {
        let mut cache = ImageCache {
            images: Vec::new(),
            by_name: HashMap::new(),
            scrap: (0..SCRAP_PAGES).map(|_| ScrapPage::new()).collect(),
            registration_sequence: 1,
            params,
            failed: HashSet::new(),
            notexture: ImageRef(0),
            nopic: ImageRef(0),
        };

        // red-checkerboard placeholder for any 3D asset that fails to load
        let mut rgba = Vec::with_capacity(16 * 16 * 4);
        for y in 0..16u32 {
            for x in 0..16u32 {
                let on = (x / 4 + y / 4) % 2 == 0;
                rgba.extend_from_slice(if on {
                    &[255, 0, 0, 255]
                } else {
                    &[32, 0, 0, 255]
                });
            }
        }
        cache.notexture = cache
            .upload("***notexture***", &rgba, 16, 16, ImageKind::Wall)
            .expect("placeholder upload cannot fail");

        // failed UI pics show up as a solid cyan quad instead
        let cyan = [0u8, 255, 255, 255].repeat(8 * 8);
        cache.nopic = cache
            .upload("***nopic***", &cyan, 8, 8, ImageKind::Pic)
            .expect("placeholder upload cannot fail");

        cache
    }

    pub fn params(&self) -> ImageParams {
        self.params
    }

    pub fn set_params(&mut self, params: ImageParams) {
        self.params = params;
    }

    pub fn notexture(&self) -> ImageRef {
        self.notexture
    }

    pub fn nopic(&self) -> ImageRef {
        self.nopic
    }

    pub fn registration_sequence(&self) -> u32 {
        self.registration_sequence
    }

    /// Starts a new registration generation at map load.
    pub fn begin_registration(&mut self) {
        self.registration_sequence += 1;
    }

    pub fn get(&self, image_ref: ImageRef) -> Option<&Image> {
        self.images.get(image_ref.0).and_then(Option::as_ref)
    }

    /// Looks up an already-loaded image without touching its registration.
    pub fn find_loaded(&self, name: &str) -> Option<ImageRef> {
        self.by_name.get(name).map(|&index| ImageRef(index))
    }

    pub fn len(&self) -> usize {
        self.images.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Image> {
        self.images.iter().flatten()
    }

    /// Resolves a named image, loading it on first use.
    ///
    /// Extension resolution prefers PNG, then TGA, then the name as given.
    /// A failed load substitutes the placeholder and reports once.
    pub fn find(
        &mut self,
        vfs: &Vfs,
        palette: &Palette,
        name: &str,
        kind: ImageKind,
    ) -> ImageRef {
        if let Some(&index) = self.by_name.get(name) {
            if let Some(image) = self.images[index].as_mut() {
                image.registration_sequence = self.registration_sequence;
                return ImageRef(index);
            }
        }

        match self.load(vfs, palette, name, kind) {
            Ok(image_ref) => image_ref,
            Err(e) => {
                if self.failed.insert(name.to_owned()) {
                    warn!("{}", e);
                }
                if kind == ImageKind::Pic {
                    self.nopic
                } else {
                    self.notexture
                }
            }
        }
    }

    fn load(
        &mut self,
        vfs: &Vfs,
        palette: &Palette,
        name: &str,
        kind: ImageKind,
    ) -> Result<ImageRef, RenderError> {
        let stem = match name.rfind('.') {
            Some(dot) => &name[..dot],
            None => name,
        };

        // PNG replacement first, then TGA, then the original asset
        let png_name = format!("{}.png", stem);
        if let Ok(data) = vfs.open(&png_name) {
            let decoded = image::load_from_memory_with_format(&data, image::ImageFormat::Png)
                .map_err(|e| RenderError::malformed(&png_name, e))?;
            let rgba = decoded.to_rgba8();
            let (w, h) = (rgba.width(), rgba.height());
            return self.named_upload(name, &rgba.into_raw(), w, h, kind);
        }

        let tga_name = format!("{}.tga", stem);
        if let Ok(data) = vfs.open(&tga_name) {
            let src = tga::load(&data).map_err(|e| RenderError::from_image(&tga_name, e))?;
            let (w, h) = (src.width, src.height);
            let rgba = src.into_rgba(palette.rgb());
            return self.named_upload(name, &rgba, w, h, kind);
        }

        let data = vfs.open(name).map_err(|e| RenderError::from_vfs(name, e))?;
        let src = if name.ends_with(".wal") {
            wal::load(&data)
                .map_err(|e| RenderError::from_image(name, e))?
                .base_image()
        } else {
            pcx::load(&data).map_err(|e| RenderError::from_image(name, e))?
        };

        let (w, h) = (src.width, src.height);
        let rgba = src.into_rgba(palette.rgb());
        self.named_upload(name, &rgba, w, h, kind)
    }

    fn named_upload(
        &mut self,
        name: &str,
        rgba: &[u8],
        width: u32,
        height: u32,
        kind: ImageKind,
    ) -> Result<ImageRef, RenderError> {
        let image_ref = self.upload(name, rgba, width, height, kind)?;
        self.by_name.insert(name.to_owned(), image_ref.0);
        Ok(image_ref)
    }

    /// Inserts raw RGBA pixels as a cache entry.
    pub fn upload(
        &mut self,
        name: &str,
        rgba: &[u8],
        width: u32,
        height: u32,
        kind: ImageKind,
    ) -> Result<ImageRef, RenderError> {
        if rgba.len() != (width * height * 4) as usize {
            return Err(RenderError::malformed(name, "pixel buffer size mismatch"));
        }

        let has_alpha = rgba.chunks_exact(4).any(|px| px[3] != 0xFF);

        // small UI pics try the scrap first
        if kind == ImageKind::Pic && width < SCRAP_MAX_DIM && height < SCRAP_MAX_DIM {
            match self.scrap_alloc(width, height) {
                Some(placement) => {
                    self.scrap[placement.page].blit(&placement.rect, rgba);
                    return Ok(self.insert(Image {
                        name: name.to_owned(),
                        kind,
                        width,
                        height,
                        upload_width: width,
                        upload_height: height,
                        has_alpha,
                        registration_sequence: self.registration_sequence,
                        scrap: Some(placement),
                        mips: Vec::new(),
                        gpu: None,
                    }));
                }
                None => {
                    if self.failed.insert(format!("scrap:{}", name)) {
                        warn!("{}: {}", RenderError::AtlasFull, name);
                    }
                    // fall through to a dedicated image
                }
            }
        }

        let (upload_width, upload_height) = self.upload_dims(width, height, kind);

        let mut base = if (upload_width, upload_height) == (width, height) {
            rgba.to_vec()
        } else {
            resample(rgba, width, height, upload_width, upload_height)
        };

        if kind.mipmapped() {
            apply_light_tables(&mut base, self.params.intensity, self.params.gamma);
        }

        let mips = if kind.mipmapped() {
            build_mip_chain(base, upload_width, upload_height)
        } else {
            vec![base]
        };

        Ok(self.insert(Image {
            name: name.to_owned(),
            kind,
            width,
            height,
            upload_width,
            upload_height,
            has_alpha,
            registration_sequence: self.registration_sequence,
            scrap: None,
            mips,
            gpu: None,
        }))
    }

    fn insert(&mut self, image: Image) -> ImageRef {
        // reuse a freed slot if one exists
        for (index, slot) in self.images.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(image);
                return ImageRef(index);
            }
        }
        self.images.push(Some(image));
        ImageRef(self.images.len() - 1)
    }

    fn scrap_alloc(&mut self, width: u32, height: u32) -> Option<ScrapPlacement> {
        for (page, scrap) in self.scrap.iter_mut().enumerate() {
            if let Some(rect) = scrap.alloc.alloc(width, height) {
                return Some(ScrapPlacement { page, rect });
            }
        }
        None
    }

    fn upload_dims(&self, width: u32, height: u32, kind: ImageKind) -> (u32, u32) {
        let round = |value: u32| -> u32 {
            let up = value.next_power_of_two();
            let mut out = if self.params.round_down && kind.mipmapped() && up > value {
                up >> 1
            } else {
                up
            };

            if kind.mipmapped() {
                out >>= self.params.picmip.min(out.trailing_zeros());
            }

            out.clamp(1, self.params.max_size)
        };

        (round(width), round(height))
    }

    /// Frees entries whose registration sequence is stale.
    ///
    /// UI pics and the placeholder are never swept; running the sweep twice
    /// without an intervening registration changes nothing.
    pub fn sweep(&mut self) {
        let current = self.registration_sequence;
        let notexture = self.notexture.0;

        for (index, slot) in self.images.iter_mut().enumerate() {
            let stale = match slot {
                Some(image) => {
                    index != notexture
                        && image.kind != ImageKind::Pic
                        && image.registration_sequence != current
                }
                None => false,
            };

            if stale {
                let image = slot.take().unwrap();
                debug!("freeing image {}", image.name);
                self.by_name.remove(&image.name);
            }
        }
    }

    /// Frees the oldest complete generation of unreferenced images.
    ///
    /// Used by the driver's out-of-memory retry path; returns whether
    /// anything was released.
    pub fn evict_oldest_generation(&mut self) -> bool {
        let current = self.registration_sequence;
        let oldest = self
            .images
            .iter()
            .flatten()
            .map(|i| i.registration_sequence)
            .filter(|&seq| seq != current)
            .min();

        let Some(oldest) = oldest else {
            return false;
        };

        let keep = [self.notexture.0, self.nopic.0];
        for (index, slot) in self.images.iter_mut().enumerate() {
            if keep.contains(&index) {
                continue;
            }
            if matches!(slot, Some(i) if i.registration_sequence == oldest) {
                let image = slot.take().unwrap();
                self.by_name.remove(&image.name);
            }
        }

        true
    }

    /// Uploads pending images and dirty scrap pages to the GPU.
    pub fn sync(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        for page in &mut self.scrap {
            if page.gpu.is_none() {
                page.gpu = Some(create_gpu_image(
                    device,
                    "scrap page",
                    SCRAP_DIM,
                    SCRAP_DIM,
                    1,
                ));
                page.dirty = true;
            }

            if page.dirty {
                let gpu = page.gpu.as_ref().unwrap();
                write_mip(queue, gpu, 0, SCRAP_DIM, SCRAP_DIM, &page.pixels);
                page.dirty = false;
            }
        }

        for image in self.images.iter_mut().flatten() {
            if image.gpu.is_some() || image.scrap.is_some() {
                continue;
            }

            let gpu = create_gpu_image(
                device,
                &image.name,
                image.upload_width,
                image.upload_height,
                image.mips.len() as u32,
            );

            let mut w = image.upload_width;
            let mut h = image.upload_height;
            for (level, mip) in image.mips.iter().enumerate() {
                write_mip(queue, &gpu, level as u32, w, h, mip);
                w = (w / 2).max(1);
                h = (h / 2).max(1);
            }

            image.gpu = Some(gpu);
        }
    }

    pub fn view(&self, image_ref: ImageRef) -> Option<&wgpu::TextureView> {
        let image = self.get(image_ref)?;
        match image.scrap {
            Some(placement) => self.scrap[placement.page].gpu.as_ref().map(|g| &g.view),
            None => image.gpu.as_ref().map(|g| &g.view),
        }
    }

    /// Texture coordinates of an image within its scrap page, or the full
    /// quad for dedicated images.
    pub fn texcoords(&self, image_ref: ImageRef) -> [f32; 4] {
        match self.get(image_ref).and_then(|i| i.scrap) {
            Some(placement) => {
                let dim = SCRAP_DIM as f32;
                [
                    placement.rect.x as f32 / dim,
                    placement.rect.y as f32 / dim,
                    (placement.rect.x + placement.rect.width) as f32 / dim,
                    (placement.rect.y + placement.rect.height) as f32 / dim,
                ]
            }
            None => [0.0, 0.0, 1.0, 1.0],
        }
    }
}

fn create_gpu_image(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    mip_level_count: u32,
) -> GpuImage {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    GpuImage {
        _texture: texture,
        view,
    }
}

fn write_mip(queue: &wgpu::Queue, gpu: &GpuImage, level: u32, width: u32, height: u32, data: &[u8]) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &gpu._texture,
            mip_level: level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

/// Point-sampled resample to the upload dimensions.
fn resample(rgba: &[u8], src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity((dst_w * dst_h * 4) as usize);
    for y in 0..dst_h {
        let src_y = (y as u64 * src_h as u64 / dst_h as u64) as u32;
        for x in 0..dst_w {
            let src_x = (x as u64 * src_w as u64 / dst_w as u64) as u32;
            let ofs = ((src_y * src_w + src_x) * 4) as usize;
            out.extend_from_slice(&rgba[ofs..ofs + 4]);
        }
    }
    out
}

/// Applies the intensity scale and display gamma to color channels.
fn apply_light_tables(rgba: &mut [u8], intensity: f32, gamma: f32) {
    if intensity == 1.0 && gamma == 1.0 {
        return;
    }

    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let scaled = (i as f32 * intensity).min(255.0) / 255.0;
        *entry = (scaled.powf(1.0 / gamma) * 255.0).round() as u8;
    }

    for px in rgba.chunks_exact_mut(4) {
        px[0] = table[px[0] as usize];
        px[1] = table[px[1] as usize];
        px[2] = table[px[2] as usize];
    }
}

/// Box-filters a full mip chain, base level first.
fn build_mip_chain(base: Vec<u8>, width: u32, height: u32) -> Vec<Vec<u8>> {
    let mut mips = vec![base];
    let mut w = width;
    let mut h = height;

    while w > 1 || h > 1 {
        let next_w = (w / 2).max(1);
        let next_h = (h / 2).max(1);
        let prev = mips.last().unwrap();

        let mut next = Vec::with_capacity((next_w * next_h * 4) as usize);
        for y in 0..next_h {
            for x in 0..next_w {
                let x0 = (x * 2).min(w - 1);
                let x1 = (x * 2 + 1).min(w - 1);
                let y0 = (y * 2).min(h - 1);
                let y1 = (y * 2 + 1).min(h - 1);

                for c in 0..4usize {
                    let sum = prev[((y0 * w + x0) * 4) as usize + c] as u32
                        + prev[((y0 * w + x1) * 4) as usize + c] as u32
                        + prev[((y1 * w + x0) * 4) as usize + c] as u32
                        + prev[((y1 * w + x1) * 4) as usize + c] as u32;
                    next.push((sum / 4) as u8);
                }
            }
        }

        mips.push(next);
        w = next_w;
        h = next_h;
    }

    mips
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, px: [u8; 4]) -> Vec<u8> {
        px.repeat((width * height) as usize)
    }

    #[test]
    fn test_alpha_classification() {
        let mut cache = ImageCache::new(ImageParams::default());

        let opaque = solid(8, 8, [200, 100, 50, 255]);
        let r = cache.upload("opaque", &opaque, 8, 8, ImageKind::Sprite).unwrap();
        assert!(!cache.get(r).unwrap().has_alpha);

        let mut translucent = opaque;
        translucent[3] = 128;
        let r = cache
            .upload("translucent", &translucent, 8, 8, ImageKind::Sprite)
            .unwrap();
        assert!(cache.get(r).unwrap().has_alpha);
    }

    #[test]
    fn test_small_pic_uses_scrap() {
        let mut cache = ImageCache::new(ImageParams::default());

        let small = cache
            .upload("small", &solid(8, 8, [1, 2, 3, 255]), 8, 8, ImageKind::Pic)
            .unwrap();
        assert!(cache.get(small).unwrap().scrap.is_some());

        // either dimension at the boundary forces a dedicated image
        let wide = cache
            .upload("wide", &solid(64, 8, [1, 2, 3, 255]), 64, 8, ImageKind::Pic)
            .unwrap();
        assert!(cache.get(wide).unwrap().scrap.is_none());

        // non-pic kinds never go to the scrap
        let skin = cache
            .upload("skin", &solid(8, 8, [1, 2, 3, 255]), 8, 8, ImageKind::Skin)
            .unwrap();
        assert!(cache.get(skin).unwrap().scrap.is_none());
    }

    #[test]
    fn test_scrap_full_falls_back() {
        let mut cache = ImageCache::new(ImageParams::default());

        // exhaust all pages with 63x63 blocks (16 per page)
        let px = solid(63, 63, [0, 0, 0, 255]);
        for i in 0..SCRAP_PAGES * 16 {
            cache
                .upload(&format!("pic{}", i), &px, 63, 63, ImageKind::Pic)
                .unwrap();
        }

        let overflow = cache
            .upload("overflow", &px, 63, 63, ImageKind::Pic)
            .unwrap();
        assert!(cache.get(overflow).unwrap().scrap.is_none());
    }

    #[test]
    fn test_pot_rounding() {
        let cache = ImageCache::new(ImageParams::default());
        assert_eq!(cache.upload_dims(100, 64, ImageKind::Wall), (128, 64));

        let down = ImageCache::new(ImageParams {
            round_down: true,
            ..Default::default()
        });
        assert_eq!(down.upload_dims(100, 64, ImageKind::Wall), (64, 64));
        // pics are never rounded down
        assert_eq!(down.upload_dims(100, 64, ImageKind::Pic), (128, 64));

        let clamped = ImageCache::new(ImageParams {
            max_size: 256,
            ..Default::default()
        });
        assert_eq!(clamped.upload_dims(1000, 1000, ImageKind::Wall), (256, 256));
    }

    #[test]
    fn test_picmip_shifts_walls() {
        let cache = ImageCache::new(ImageParams {
            picmip: 1,
            ..Default::default()
        });
        assert_eq!(cache.upload_dims(128, 128, ImageKind::Wall), (64, 64));
        assert_eq!(cache.upload_dims(128, 128, ImageKind::Pic), (128, 128));
    }

    #[test]
    fn test_sweep_idempotent() {
        let mut cache = ImageCache::new(ImageParams::default());
        let px = solid(16, 16, [9, 9, 9, 255]);

        cache.upload("wall_a", &px, 16, 16, ImageKind::Wall).unwrap();
        cache.upload("keep_pic", &px, 16, 16, ImageKind::Pic).unwrap();
        let before = cache.len();

        // nothing stale yet: sweep is a no-op
        cache.sweep();
        assert_eq!(cache.len(), before);

        // next generation: the wall is stale, the pic survives
        cache.begin_registration();
        cache.sweep();
        assert_eq!(cache.len(), before - 1);

        // idempotent thereafter
        cache.sweep();
        assert_eq!(cache.len(), before - 1);
    }

    #[test]
    fn test_find_missing_substitutes_placeholder() {
        let mut cache = ImageCache::new(ImageParams::default());
        let vfs = Vfs::new();
        let palette = Palette::from_rgb([[0; 3]; 256]);

        let r = cache.find(&vfs, &palette, "textures/missing.wal", ImageKind::Wall);
        assert_eq!(r, cache.notexture());

        // UI pics get their own solid stand-in
        let r = cache.find(&vfs, &palette, "pics/missing.pcx", ImageKind::Pic);
        assert_eq!(r, cache.nopic());
    }

    #[test]
    fn test_mip_chain_dimensions() {
        let mips = build_mip_chain(solid(8, 4, [128, 128, 128, 255]), 8, 4);
        assert_eq!(mips.len(), 4); // 8x4, 4x2, 2x1, 1x1
        assert_eq!(mips[3].len(), 4);
    }

    #[test]
    fn test_intensity_overbright_identity() {
        // identity tables leave pixel data untouched
        let mut px = solid(2, 2, [100, 150, 200, 255]);
        let orig = px.clone();
        apply_light_tables(&mut px, 1.0, 1.0);
        assert_eq!(px, orig);

        apply_light_tables(&mut px, 2.0, 1.0);
        assert_eq!(&px[..3], &[200, 255, 255]);
    }
}
