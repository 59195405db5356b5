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

//! Decoders for the engine's legacy raster formats.
//!
//! PCX and WAL decode to palette indices; TGA decodes straight to RGBA.
//! PNG goes through the `image` crate at the cache layer and never comes
//! through here.

pub mod pcx;
pub mod tga;
pub mod wal;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Truncated image file")]
    Truncated,
    #[error("Unsupported image encoding: {0}")]
    Unsupported(String),
    #[error("Malformed image: {0}")]
    Malformed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pixel payload of a decoded image.
#[derive(Clone, Debug, PartialEq)]
pub enum Pixels {
    /// 8-bit indices into the game palette.
    Indexed(Vec<u8>),
    /// Interleaved 8-bit RGBA.
    Rgba(Vec<u8>),
}

/// A decoded image, prior to palette translation and upload processing.
#[derive(Clone, Debug)]
pub struct SourceImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Pixels,
}

impl SourceImage {
    /// Translates indexed pixels through `palette`, leaving RGBA untouched.
    ///
    /// Palette index 255 is the transparent index and maps to (0,0,0,0).
    pub fn into_rgba(self, palette: &[[u8; 3]; 256]) -> Vec<u8> {
        match self.pixels {
            Pixels::Rgba(rgba) => rgba,
            Pixels::Indexed(indices) => {
                let mut rgba = Vec::with_capacity(indices.len() * 4);
                for &i in &indices {
                    if i == 0xFF {
                        rgba.extend_from_slice(&[0, 0, 0, 0]);
                    } else {
                        let [r, g, b] = palette[i as usize];
                        rgba.extend_from_slice(&[r, g, b, 0xFF]);
                    }
                }
                rgba
            }
        }
    }
}
