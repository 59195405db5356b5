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

//! SP2 sprite model loading. A sprite is a sequence of camera-facing frames,
//! each referencing a standalone image by name.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

pub const SP2_IDENT: i32 = i32::from_le_bytes(*b"IDS2");
pub const SP2_VERSION: i32 = 2;

#[derive(Error, Debug)]
pub enum Sp2Error {
    #[error("Bad SP2 ident")]
    BadIdent,
    #[error("Unsupported SP2 version {0} (expected 2)")]
    UnsupportedVersion(i32),
    #[error("Malformed SP2: {0}")]
    Malformed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct SpriteFrame {
    pub width: u32,
    pub height: u32,
    /// Offset from the sprite origin to the frame's upper-left corner.
    pub origin_x: i32,
    pub origin_y: i32,
    pub image_name: String,
}

#[derive(Clone, Debug)]
pub struct Sp2Model {
    pub frames: Vec<SpriteFrame>,
}

/// Parses an SP2 file.
pub fn load(data: &[u8]) -> Result<Sp2Model, Sp2Error> {
    let mut reader = Cursor::new(data);

    let ident = reader.read_i32::<LittleEndian>()?;
    if ident != SP2_IDENT {
        return Err(Sp2Error::BadIdent);
    }

    let version = reader.read_i32::<LittleEndian>()?;
    if version != SP2_VERSION {
        return Err(Sp2Error::UnsupportedVersion(version));
    }

    let num_frames = reader.read_i32::<LittleEndian>()?;
    if num_frames <= 0 || num_frames > 512 {
        return Err(Sp2Error::Malformed(format!("{} frames", num_frames)));
    }

    let mut frames = Vec::with_capacity(num_frames as usize);
    for _ in 0..num_frames {
        let width = reader.read_i32::<LittleEndian>()?;
        let height = reader.read_i32::<LittleEndian>()?;
        let origin_x = reader.read_i32::<LittleEndian>()?;
        let origin_y = reader.read_i32::<LittleEndian>()?;

        if width <= 0 || height <= 0 {
            return Err(Sp2Error::Malformed("bad frame dimensions".to_owned()));
        }

        let mut name_raw = [0u8; 64];
        reader.read_exact(&mut name_raw)?;
        let end = name_raw.iter().position(|&b| b == 0).unwrap_or(64);
        let image_name = String::from_utf8_lossy(&name_raw[..end]).into_owned();

        frames.push(SpriteFrame {
            width: width as u32,
            height: height as u32,
            origin_x,
            origin_y,
            image_name,
        });
    }

    Ok(Sp2Model { frames })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_sp2() -> Vec<u8> {
        let mut d = Vec::new();
        d.extend_from_slice(&SP2_IDENT.to_le_bytes());
        d.extend_from_slice(&SP2_VERSION.to_le_bytes());
        d.extend_from_slice(&1i32.to_le_bytes());
        d.extend_from_slice(&32i32.to_le_bytes());
        d.extend_from_slice(&32i32.to_le_bytes());
        d.extend_from_slice(&(-16i32).to_le_bytes());
        d.extend_from_slice(&16i32.to_le_bytes());
        let mut name = [0u8; 64];
        name[..12].copy_from_slice(b"s_bubble.pcx");
        d.extend_from_slice(&name);
        d
    }

    #[test]
    fn test_load() {
        let sprite = load(&build_sp2()).unwrap();
        assert_eq!(sprite.frames.len(), 1);
        let frame = &sprite.frames[0];
        assert_eq!((frame.width, frame.height), (32, 32));
        assert_eq!((frame.origin_x, frame.origin_y), (-16, 16));
        assert_eq!(frame.image_name, "s_bubble.pcx");
    }

    #[test]
    fn test_bad_version() {
        let mut d = build_sp2();
        d[4..8].copy_from_slice(&1i32.to_le_bytes());
        assert!(matches!(load(&d), Err(Sp2Error::UnsupportedVersion(1))));
    }
}
