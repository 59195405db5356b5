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

//! Screenshot capture: frame read-back, inverse hardware gamma, and
//! encoding to TGA, PNG or JPEG under `scrnshot/`.

use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
};

use crate::common::image::tga;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Couldn't create a file")]
    NoFreeSlot,
    #[error("Screenshot encode failed: {0}")]
    Encode(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CaptureFormat {
    Tga,
    Png,
    Jpg,
}

impl CaptureFormat {
    pub fn extension(self) -> &'static str {
        match self {
            CaptureFormat::Tga => "tga",
            CaptureFormat::Png => "png",
            CaptureFormat::Jpg => "jpg",
        }
    }

    /// Parses the `vk_screenshot_format` cvar value; unknown values fall
    /// back to TGA.
    pub fn from_cvar(value: &str) -> CaptureFormat {
        match value {
            "png" => CaptureFormat::Png,
            "jpg" | "jpeg" => CaptureFormat::Jpg,
            _ => CaptureFormat::Tga,
        }
    }
}

/// Finds the first free `quakeNN.<ext>` slot under `scrnshot/`.
pub fn next_screenshot_path(
    gamedir: &Path,
    format: CaptureFormat,
) -> Result<PathBuf, CaptureError> {
    let dir = gamedir.join("scrnshot");
    fs::create_dir_all(&dir)?;

    for n in 0..100 {
        let candidate = dir.join(format!("quake{:02}.{}", n, format.extension()));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(CaptureError::NoFreeSlot)
}

/// Undoes the hardware gamma ramp so the file matches the on-screen image.
pub fn apply_inverse_gamma(rgba: &mut [u8], gamma: f32) {
    if gamma == 1.0 {
        return;
    }

    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = ((i as f32 / 255.0).powf(gamma) * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    for px in rgba.chunks_exact_mut(4) {
        px[0] = table[px[0] as usize];
        px[1] = table[px[1] as usize];
        px[2] = table[px[2] as usize];
    }
}

/// Encodes RGBA pixels in the requested format.
///
/// `quality` applies to JPEG only, clamped to 1..100.
pub fn encode(
    rgba: &[u8],
    width: u32,
    height: u32,
    format: CaptureFormat,
    quality: u8,
) -> Result<Vec<u8>, CaptureError> {
    match format {
        CaptureFormat::Tga => {
            tga::write(rgba, width, height).map_err(|e| CaptureError::Encode(e.to_string()))
        }

        CaptureFormat::Png => {
            let rgb = strip_alpha(rgba);
            let mut out = Cursor::new(Vec::new());
            let encoder = image::codecs::png::PngEncoder::new(&mut out);
            image::ImageEncoder::write_image(
                encoder,
                &rgb,
                width,
                height,
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
            Ok(out.into_inner())
        }

        CaptureFormat::Jpg => {
            let rgb = strip_alpha(rgba);
            let mut out = Cursor::new(Vec::new());
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                &mut out,
                quality.clamp(1, 100),
            );
            image::ImageEncoder::write_image(
                encoder,
                &rgb,
                width,
                height,
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
            Ok(out.into_inner())
        }
    }
}

fn strip_alpha(rgba: &[u8]) -> Vec<u8> {
    rgba.chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect()
}

/// Captures the current contents of `texture` into linear RGBA rows.
///
/// Blocks until the copy completes; callers invoke this outside the frame
/// loop.
pub fn read_back(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, CaptureError> {
    let bytes_per_row = (width * 4).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("screenshot readback"),
        size: (bytes_per_row * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("screenshot copy"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit([encoder.finish()]);

    let slice = buffer.slice(..);
    slice.map_async(wgpu::MapMode::Read, |_| {});
    let _ = device.poll(wgpu::PollType::Wait);

    let mapped = slice.get_mapped_range();
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for row in 0..height {
        let start = (row * bytes_per_row) as usize;
        rgba.extend_from_slice(&mapped[start..start + (width * 4) as usize]);
    }
    drop(mapped);
    buffer.unmap();

    Ok(rgba)
}

/// Full capture path: gamma restore, encode, pick a slot, write.
pub fn save(
    gamedir: &Path,
    rgba: &mut [u8],
    width: u32,
    height: u32,
    format: CaptureFormat,
    quality: u8,
    hw_gamma: Option<f32>,
) -> Result<PathBuf, CaptureError> {
    if let Some(gamma) = hw_gamma {
        apply_inverse_gamma(rgba, gamma);
    }

    let encoded = encode(rgba, width, height, format, quality)?;
    let path = next_screenshot_path(gamedir, format)?;
    fs::write(&path, encoded)?;

    info!("Wrote {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::image::{tga, Pixels};

    fn temp_gamedir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "strogg-capture-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("scrnshot")).unwrap();
        dir
    }

    fn checker(width: u32, height: u32) -> Vec<u8> {
        let mut rgba = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let on = (x + y) % 2 == 0;
                rgba.extend_from_slice(if on {
                    &[255, 128, 0, 255]
                } else {
                    &[0, 64, 192, 255]
                });
            }
        }
        rgba
    }

    #[test]
    fn test_naming_first_free_slot() {
        let dir = temp_gamedir("naming");
        for n in 0..5 {
            fs::write(
                dir.join("scrnshot").join(format!("quake{:02}.tga", n)),
                b"x",
            )
            .unwrap();
        }

        let path = next_screenshot_path(&dir, CaptureFormat::Tga).unwrap();
        assert!(path.ends_with("scrnshot/quake05.tga"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_naming_all_slots_taken() {
        let dir = temp_gamedir("full");
        for n in 0..100 {
            fs::write(
                dir.join("scrnshot").join(format!("quake{:02}.tga", n)),
                b"x",
            )
            .unwrap();
        }

        let err = next_screenshot_path(&dir, CaptureFormat::Tga).unwrap_err();
        assert_eq!(err.to_string(), "Couldn't create a file");

        // no file was written
        let count = fs::read_dir(dir.join("scrnshot")).unwrap().count();
        assert_eq!(count, 100);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_tga_round_trip_bit_exact() {
        let rgba = checker(16, 8);
        let encoded = encode(&rgba, 16, 8, CaptureFormat::Tga, 90).unwrap();
        let decoded = tga::load(&encoded).unwrap();

        let Pixels::Rgba(out) = decoded.pixels else {
            panic!("expected rgba");
        };
        for (a, b) in rgba.chunks_exact(4).zip(out.chunks_exact(4)) {
            assert_eq!(&a[..3], &b[..3]);
        }
    }

    #[test]
    fn test_jpeg_high_quality_close() {
        let rgba: Vec<u8> = (0..16 * 16)
            .flat_map(|_| [120u8, 130, 140, 255])
            .collect();
        let encoded = encode(&rgba, 16, 16, CaptureFormat::Jpg, 95).unwrap();

        let decoded = image::load_from_memory_with_format(&encoded, image::ImageFormat::Jpeg)
            .unwrap()
            .to_rgb8();
        // flat fields survive high-quality JPEG within 1 LSB
        for px in decoded.pixels() {
            assert!((px.0[0] as i32 - 120).abs() <= 1);
            assert!((px.0[1] as i32 - 130).abs() <= 1);
            assert!((px.0[2] as i32 - 140).abs() <= 1);
        }
    }

    #[test]
    fn test_png_round_trip() {
        let rgba = checker(8, 8);
        let encoded = encode(&rgba, 8, 8, CaptureFormat::Png, 90).unwrap();
        let decoded = image::load_from_memory_with_format(&encoded, image::ImageFormat::Png)
            .unwrap()
            .to_rgb8();
        for (a, b) in rgba.chunks_exact(4).zip(decoded.pixels()) {
            assert_eq!(&a[..3], &b.0);
        }
    }

    #[test]
    fn test_inverse_gamma_identity() {
        let mut rgba = checker(4, 4);
        let orig = rgba.clone();
        apply_inverse_gamma(&mut rgba, 1.0);
        assert_eq!(rgba, orig);
    }
}
