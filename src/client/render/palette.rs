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

//! The 256-entry game palette driving all 8-bit-indexed uploads.

use crate::common::{image::pcx, vfs::Vfs};

use super::error::RenderError;

pub const PALETTE_PATH: &str = "pics/colormap.pcx";

/// Palette index reserved as fully transparent.
pub const TRANSPARENT_INDEX: u8 = 0xFF;

pub struct Palette {
    rgb: [[u8; 3]; 256],
}

impl Palette {
    /// Loads the palette from the colormap and partially desaturates it.
    ///
    /// Strongly saturated entries (lava, muzzle-flash oranges) keep most of
    /// their chroma: the desaturation factor shrinks as the dominant-gun
    /// delta grows.
    pub fn load(vfs: &Vfs) -> Result<Palette, RenderError> {
        let data = vfs
            .open(PALETTE_PATH)
            .map_err(|e| RenderError::from_vfs(PALETTE_PATH, e))?;
        let raw = pcx::load_palette(&data)
            .map_err(|e| RenderError::from_image(PALETTE_PATH, e))?;

        Ok(Palette::from_rgb(raw))
    }

    pub fn from_rgb(raw: [[u8; 3]; 256]) -> Palette {
        let mut rgb = [[0u8; 3]; 256];
        for (out, entry) in rgb.iter_mut().zip(raw.iter()) {
            *out = desaturate(*entry);
        }
        Palette { rgb }
    }

    pub fn rgb(&self) -> &[[u8; 3]; 256] {
        &self.rgb
    }

    /// Translates indices into interleaved RGBA; index 255 becomes
    /// transparent black.
    pub fn translate(&self, indices: &[u8]) -> Vec<u8> {
        let mut rgba = Vec::with_capacity(indices.len() * 4);
        for &i in indices {
            if i == TRANSPARENT_INDEX {
                rgba.extend_from_slice(&[0, 0, 0, 0]);
            } else {
                let [r, g, b] = self.rgb[i as usize];
                rgba.extend_from_slice(&[r, g, b, 0xFF]);
            }
        }
        rgba
    }
}

/// Partially desaturates one palette entry.
///
/// `sat = 1 - (max_gun_delta / 255) * 0.25`: even a fully saturated entry
/// loses at most a quarter of its chroma, so lava and muzzle-flash colors
/// stay vivid.
fn desaturate([r, g, b]: [u8; 3]) -> [u8; 3] {
    let max = r.max(g).max(b) as f32;
    let min = r.min(g).min(b) as f32;
    let sat = 1.0 - ((max - min) / 255.0) * 0.25;

    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;

    let mix = |c: u8| -> u8 {
        let c = c as f32;
        (luma + (c - luma) * sat).round().clamp(0.0, 255.0) as u8
    };

    [mix(r), mix(g), mix(b)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transparent_index() {
        let mut raw = [[0u8; 3]; 256];
        raw[0] = [10, 20, 30];
        let palette = Palette::from_rgb(raw);

        let rgba = palette.translate(&[0, TRANSPARENT_INDEX]);
        assert_eq!(&rgba[4..8], &[0, 0, 0, 0]);
        assert_eq!(rgba[3], 0xFF);
    }

    #[test]
    fn test_desaturate_preserves_gray() {
        assert_eq!(desaturate([128, 128, 128]), [128, 128, 128]);
    }

    #[test]
    fn test_desaturate_keeps_saturated_vivid() {
        // a pure red entry has max gun delta 255, so sat = 0.75 and chroma
        // shrinks by exactly a quarter toward luma
        let [r, g, b] = desaturate([255, 0, 0]);
        assert!(r > 200);
        assert!(g < 60 && b < 60);

        // a weakly tinted entry barely moves
        let tinted = desaturate([100, 96, 96]);
        assert!((tinted[0] as i32 - 100).abs() <= 2);
    }
}
