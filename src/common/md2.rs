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

//! MD2 alias model loading.
//!
//! An alias model is a set of keyframes, each an array of vertex positions
//! quantized to one byte per axis inside a per-frame bounding box, plus an
//! index into the shared 162-entry normal table.

use std::io::{Cursor, Read};

use crate::common::math::VERTEX_NORMAL_COUNT;

use byteorder::{LittleEndian, ReadBytesExt};
use cgmath::Vector3;
use thiserror::Error;

pub const MD2_IDENT: i32 = i32::from_le_bytes(*b"IDP2");
pub const MD2_VERSION: i32 = 8;

#[derive(Error, Debug)]
pub enum Md2Error {
    #[error("Bad MD2 ident")]
    BadIdent,
    #[error("Unsupported MD2 version {0} (expected 8)")]
    UnsupportedVersion(i32),
    #[error("Malformed MD2: {0}")]
    Malformed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A quantized keyframe vertex.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrameVertex {
    pub pos_q: [u8; 3],
    pub normal_idx: u8,
}

/// One keyframe: dequantization transform plus the vertex array.
#[derive(Clone, Debug)]
pub struct Frame {
    pub name: String,
    pub scale: Vector3<f32>,
    pub translate: Vector3<f32>,
    pub vertices: Vec<FrameVertex>,
}

impl Frame {
    /// Dequantizes a vertex into model space.
    pub fn decode(&self, vertex: &FrameVertex) -> Vector3<f32> {
        Vector3::new(
            vertex.pos_q[0] as f32 * self.scale.x + self.translate.x,
            vertex.pos_q[1] as f32 * self.scale.y + self.translate.y,
            vertex.pos_q[2] as f32 * self.scale.z + self.translate.z,
        )
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Triangle {
    pub vertex_ids: [u16; 3],
    pub texcoord_ids: [u16; 3],
}

#[derive(Clone, Debug)]
pub struct Md2Model {
    pub skin_width: u32,
    pub skin_height: u32,
    pub skin_names: Vec<String>,
    /// Texture coordinates in texel units; divide by skin dimensions.
    pub texcoords: Vec<[i16; 2]>,
    pub triangles: Vec<Triangle>,
    pub frames: Vec<Frame>,
}

fn read_fixed_string<R: Read>(reader: &mut R, len: usize) -> Result<String, std::io::Error> {
    let mut raw = vec![0u8; len];
    reader.read_exact(&mut raw)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Parses an MD2 file.
pub fn load(data: &[u8]) -> Result<Md2Model, Md2Error> {
    let mut reader = Cursor::new(data);

    let ident = reader.read_i32::<LittleEndian>()?;
    if ident != MD2_IDENT {
        return Err(Md2Error::BadIdent);
    }

    let version = reader.read_i32::<LittleEndian>()?;
    if version != MD2_VERSION {
        return Err(Md2Error::UnsupportedVersion(version));
    }

    let skin_width = reader.read_i32::<LittleEndian>()?;
    let skin_height = reader.read_i32::<LittleEndian>()?;
    let frame_size = reader.read_i32::<LittleEndian>()? as usize;
    let num_skins = reader.read_i32::<LittleEndian>()? as usize;
    let num_vertices = reader.read_i32::<LittleEndian>()? as usize;
    let num_texcoords = reader.read_i32::<LittleEndian>()? as usize;
    let num_triangles = reader.read_i32::<LittleEndian>()? as usize;
    let _num_glcmds = reader.read_i32::<LittleEndian>()?;
    let num_frames = reader.read_i32::<LittleEndian>()? as usize;
    let ofs_skins = reader.read_i32::<LittleEndian>()? as usize;
    let ofs_texcoords = reader.read_i32::<LittleEndian>()? as usize;
    let ofs_triangles = reader.read_i32::<LittleEndian>()? as usize;
    let ofs_frames = reader.read_i32::<LittleEndian>()? as usize;
    let _ofs_glcmds = reader.read_i32::<LittleEndian>()?;
    let ofs_end = reader.read_i32::<LittleEndian>()? as usize;

    if skin_width <= 0 || skin_height <= 0 {
        return Err(Md2Error::Malformed("bad skin dimensions".to_owned()));
    }
    if ofs_end > data.len() {
        return Err(Md2Error::Malformed("file shorter than header claims".to_owned()));
    }

    let expected_frame_size = 40 + num_vertices * 4;
    if frame_size != expected_frame_size {
        return Err(Md2Error::Malformed(format!(
            "frame size {} does not match {} vertices",
            frame_size, num_vertices
        )));
    }

    let mut skin_names = Vec::with_capacity(num_skins);
    let mut reader = Cursor::new(
        data.get(ofs_skins..)
            .ok_or_else(|| Md2Error::Malformed("skin offset out of range".to_owned()))?,
    );
    for _ in 0..num_skins {
        skin_names.push(read_fixed_string(&mut reader, 64)?);
    }

    let mut texcoords = Vec::with_capacity(num_texcoords);
    let mut reader = Cursor::new(
        data.get(ofs_texcoords..)
            .ok_or_else(|| Md2Error::Malformed("texcoord offset out of range".to_owned()))?,
    );
    for _ in 0..num_texcoords {
        let s = reader.read_i16::<LittleEndian>()?;
        let t = reader.read_i16::<LittleEndian>()?;
        texcoords.push([s, t]);
    }

    let mut triangles = Vec::with_capacity(num_triangles);
    let mut reader = Cursor::new(
        data.get(ofs_triangles..)
            .ok_or_else(|| Md2Error::Malformed("triangle offset out of range".to_owned()))?,
    );
    for _ in 0..num_triangles {
        let mut vertex_ids = [0u16; 3];
        let mut texcoord_ids = [0u16; 3];
        for v in &mut vertex_ids {
            *v = reader.read_u16::<LittleEndian>()?;
        }
        for t in &mut texcoord_ids {
            *t = reader.read_u16::<LittleEndian>()?;
        }

        if vertex_ids.iter().any(|&v| v as usize >= num_vertices) {
            return Err(Md2Error::Malformed("triangle vertex out of range".to_owned()));
        }
        if texcoord_ids.iter().any(|&t| t as usize >= num_texcoords) {
            return Err(Md2Error::Malformed("triangle texcoord out of range".to_owned()));
        }

        triangles.push(Triangle {
            vertex_ids,
            texcoord_ids,
        });
    }

    let mut frames = Vec::with_capacity(num_frames);
    let mut reader = Cursor::new(
        data.get(ofs_frames..)
            .ok_or_else(|| Md2Error::Malformed("frame offset out of range".to_owned()))?,
    );
    for _ in 0..num_frames {
        let scale = Vector3::new(
            reader.read_f32::<LittleEndian>()?,
            reader.read_f32::<LittleEndian>()?,
            reader.read_f32::<LittleEndian>()?,
        );
        let translate = Vector3::new(
            reader.read_f32::<LittleEndian>()?,
            reader.read_f32::<LittleEndian>()?,
            reader.read_f32::<LittleEndian>()?,
        );
        let name = read_fixed_string(&mut reader, 16)?;

        let mut vertices = Vec::with_capacity(num_vertices);
        for _ in 0..num_vertices {
            let mut raw = [0u8; 4];
            reader.read_exact(&mut raw)?;

            if raw[3] as usize >= VERTEX_NORMAL_COUNT {
                return Err(Md2Error::Malformed("vertex normal out of range".to_owned()));
            }

            vertices.push(FrameVertex {
                pos_q: [raw[0], raw[1], raw[2]],
                normal_idx: raw[3],
            });
        }

        frames.push(Frame {
            name,
            scale,
            translate,
            vertices,
        });
    }

    if frames.is_empty() {
        return Err(Md2Error::Malformed("model has no frames".to_owned()));
    }

    Ok(Md2Model {
        skin_width: skin_width as u32,
        skin_height: skin_height as u32,
        skin_names,
        texcoords,
        triangles,
        frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_md2() -> Vec<u8> {
        let num_vertices = 3usize;
        let header_size = 17 * 4;
        let ofs_skins = header_size;
        let ofs_texcoords = ofs_skins + 64;
        let ofs_triangles = ofs_texcoords + 3 * 4;
        let ofs_frames = ofs_triangles + 12;
        let frame_size = 40 + num_vertices * 4;
        let ofs_end = ofs_frames + frame_size;

        let mut d = Vec::new();
        for v in [
            MD2_IDENT,
            MD2_VERSION,
            64, // skin width
            64, // skin height
            frame_size as i32,
            1, // skins
            num_vertices as i32,
            3, // texcoords
            1, // triangles
            0, // glcmds
            1, // frames
            ofs_skins as i32,
            ofs_texcoords as i32,
            ofs_triangles as i32,
            ofs_frames as i32,
            0,
            ofs_end as i32,
        ] {
            d.extend_from_slice(&v.to_le_bytes());
        }

        let mut skin = [0u8; 64];
        skin[..9].copy_from_slice(b"skin.pcx\0");
        d.extend_from_slice(&skin);

        for st in [[0i16, 0], [63, 0], [0, 63]] {
            d.extend_from_slice(&st[0].to_le_bytes());
            d.extend_from_slice(&st[1].to_le_bytes());
        }

        for v in [0u16, 1, 2, 0, 1, 2] {
            d.extend_from_slice(&v.to_le_bytes());
        }

        // frame: scale 1, translate -1
        for c in [1.0f32, 1.0, 1.0, -1.0, -1.0, -1.0] {
            d.extend_from_slice(&c.to_le_bytes());
        }
        let mut name = [0u8; 16];
        name[..5].copy_from_slice(b"stand");
        d.extend_from_slice(&name);
        d.extend_from_slice(&[0, 0, 0, 0]);
        d.extend_from_slice(&[255, 0, 0, 1]);
        d.extend_from_slice(&[0, 255, 0, 2]);

        d
    }

    #[test]
    fn test_load_and_decode() {
        let model = load(&build_md2()).unwrap();
        assert_eq!(model.frames.len(), 1);
        assert_eq!(model.skin_names[0], "skin.pcx");

        let frame = &model.frames[0];
        assert_eq!(frame.name, "stand");
        assert_eq!(
            frame.decode(&frame.vertices[1]),
            Vector3::new(254.0, -1.0, -1.0)
        );
    }

    #[test]
    fn test_bad_ident() {
        let mut d = build_md2();
        d[0] = b'X';
        assert!(matches!(load(&d), Err(Md2Error::BadIdent)));
    }

    #[test]
    fn test_bad_version() {
        let mut d = build_md2();
        d[4..8].copy_from_slice(&7i32.to_le_bytes());
        assert!(matches!(load(&d), Err(Md2Error::UnsupportedVersion(7))));
    }
}
