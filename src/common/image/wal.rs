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

//! WAL wall-texture loading.
//!
//! A WAL stores four precomputed mip levels of palette indices plus the
//! surface/content flags the compiler derived from the texture name, and the
//! name of the next frame in its animation chain.

use std::io::{Cursor, Read};

use super::{ImageError, Pixels, SourceImage};

use byteorder::{LittleEndian, ReadBytesExt};

pub const MIPLEVELS: usize = 4;

/// A parsed WAL texture.
#[derive(Clone, Debug)]
pub struct Wal {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Palette indices per mip level; level 0 is full size.
    pub mipmaps: [Vec<u8>; MIPLEVELS],
    /// Next texture name in the animation chain, if any.
    pub animname: Option<String>,
    pub flags: u32,
    pub contents: u32,
    pub value: u32,
}

impl Wal {
    /// The full-size image as a `SourceImage`.
    pub fn base_image(&self) -> SourceImage {
        SourceImage {
            width: self.width,
            height: self.height,
            pixels: Pixels::Indexed(self.mipmaps[0].clone()),
        }
    }
}

fn read_name<R: Read>(reader: &mut R) -> Result<Option<String>, ImageError> {
    let mut raw = [0u8; 32];
    reader.read_exact(&mut raw)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    if end == 0 {
        return Ok(None);
    }
    Ok(Some(
        String::from_utf8_lossy(&raw[..end]).into_owned(),
    ))
}

/// Parses a WAL file.
pub fn load(data: &[u8]) -> Result<Wal, ImageError> {
    let mut reader = Cursor::new(data);

    let name = read_name(&mut reader)?
        .ok_or_else(|| ImageError::Malformed("unnamed WAL".to_owned()))?;

    let width = reader.read_u32::<LittleEndian>()?;
    let height = reader.read_u32::<LittleEndian>()?;

    if width == 0 || height == 0 || width > 4096 || height > 4096 {
        return Err(ImageError::Malformed("bad WAL dimensions".to_owned()));
    }

    let mut offsets = [0u32; MIPLEVELS];
    for ofs in &mut offsets {
        *ofs = reader.read_u32::<LittleEndian>()?;
    }

    let animname = read_name(&mut reader)?;
    let flags = reader.read_u32::<LittleEndian>()?;
    let contents = reader.read_u32::<LittleEndian>()?;
    let value = reader.read_u32::<LittleEndian>()?;

    let mut mipmaps: [Vec<u8>; MIPLEVELS] = Default::default();
    for (level, mip) in mipmaps.iter_mut().enumerate() {
        let mip_w = (width >> level).max(1) as usize;
        let mip_h = (height >> level).max(1) as usize;
        let start = offsets[level] as usize;
        let end = start + mip_w * mip_h;

        if end > data.len() {
            return Err(ImageError::Truncated);
        }

        *mip = data[start..end].to_vec();
    }

    Ok(Wal {
        name,
        width,
        height,
        mipmaps,
        animname,
        flags,
        contents,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_wal(width: u32, height: u32, animname: &str) -> Vec<u8> {
        let mut data = Vec::new();

        let mut name = [0u8; 32];
        name[..4].copy_from_slice(b"wall");
        data.extend_from_slice(&name);

        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());

        // header is 100 bytes; mips packed immediately after
        let mut ofs = 100u32;
        for level in 0..MIPLEVELS as u32 {
            data.extend_from_slice(&ofs.to_le_bytes());
            ofs += (width >> level).max(1) * (height >> level).max(1);
        }

        let mut anim = [0u8; 32];
        anim[..animname.len()].copy_from_slice(animname.as_bytes());
        data.extend_from_slice(&anim);

        data.extend_from_slice(&1u32.to_le_bytes()); // flags
        data.extend_from_slice(&2u32.to_le_bytes()); // contents
        data.extend_from_slice(&3u32.to_le_bytes()); // value

        assert_eq!(data.len(), 100);

        for level in 0..MIPLEVELS as u32 {
            let count = (width >> level).max(1) * (height >> level).max(1);
            data.extend(std::iter::repeat(level as u8).take(count as usize));
        }

        data
    }

    #[test]
    fn test_load() {
        let wal = load(&build_wal(8, 4, "wall2")).unwrap();
        assert_eq!(wal.name, "wall");
        assert_eq!((wal.width, wal.height), (8, 4));
        assert_eq!(wal.animname.as_deref(), Some("wall2"));
        assert_eq!(wal.flags, 1);
        assert_eq!(wal.mipmaps[0].len(), 32);
        assert_eq!(wal.mipmaps[3].len(), 1);
        assert!(wal.mipmaps[3].iter().all(|&b| b == 3));
    }

    #[test]
    fn test_no_animation() {
        let wal = load(&build_wal(4, 4, "")).unwrap();
        assert!(wal.animname.is_none());
    }

    #[test]
    fn test_truncated() {
        let mut data = build_wal(8, 8, "");
        data.truncate(110);
        assert!(matches!(load(&data), Err(ImageError::Truncated)));
    }
}
