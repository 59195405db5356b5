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

//! BSP file parsing, one pass per lump.

use std::io::{Cursor, Read};

use super::{
    Bsp, BspError, ContentFlags, Face, FaceSide, Leaf, Node, NodeChild, SubModel, SurfaceFlags,
    TexInfo, Vis, MAX_LIGHTSTYLES_PER_FACE,
};
use crate::common::math::Hyperplane;

use byteorder::{LittleEndian, ReadBytesExt};
use cgmath::{InnerSpace, Vector3};

pub const BSP_IDENT: i32 = i32::from_le_bytes(*b"IBSP");
pub const BSP_VERSION: i32 = 38;

const LUMP_COUNT: usize = 19;

// lump directory indices
const LUMP_PLANES: usize = 1;
const LUMP_VERTICES: usize = 2;
const LUMP_VISIBILITY: usize = 3;
const LUMP_NODES: usize = 4;
const LUMP_TEXINFO: usize = 5;
const LUMP_FACES: usize = 6;
const LUMP_LIGHTING: usize = 7;
const LUMP_LEAVES: usize = 8;
const LUMP_LEAF_FACES: usize = 9;
const LUMP_EDGES: usize = 11;
const LUMP_SURF_EDGES: usize = 12;
const LUMP_MODELS: usize = 13;
const LUMP_AREAS: usize = 17;

const PLANE_SIZE: usize = 20;
const VERTEX_SIZE: usize = 12;
const NODE_SIZE: usize = 28;
const TEXINFO_SIZE: usize = 76;
const FACE_SIZE: usize = 20;
const LEAF_SIZE: usize = 28;
const EDGE_SIZE: usize = 4;
const MODEL_SIZE: usize = 48;
const AREA_SIZE: usize = 8;

#[derive(Copy, Clone, Debug)]
struct Lump {
    ofs: usize,
    len: usize,
}

/// Slices one lump out of the file, validating its bounds and stride.
fn lump_data<'a>(
    data: &'a [u8],
    lumps: &[Lump; LUMP_COUNT],
    index: usize,
    stride: usize,
    name: &str,
) -> Result<&'a [u8], BspError> {
    let lump = lumps[index];

    if lump.ofs + lump.len > data.len() {
        return Err(BspError::Truncated(format!("{} lump out of bounds", name)));
    }
    if stride > 0 && lump.len % stride != 0 {
        return Err(BspError::Malformed(format!(
            "{} lump length {} not a multiple of {}",
            name, lump.len, stride
        )));
    }

    Ok(&data[lump.ofs..lump.ofs + lump.len])
}

fn read_vector3<R: Read>(reader: &mut R) -> Result<Vector3<f32>, std::io::Error> {
    Ok(Vector3::new(
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
        reader.read_f32::<LittleEndian>()?,
    ))
}

fn read_i16_vector3<R: Read>(reader: &mut R) -> Result<Vector3<f32>, std::io::Error> {
    Ok(Vector3::new(
        reader.read_i16::<LittleEndian>()? as f32,
        reader.read_i16::<LittleEndian>()? as f32,
        reader.read_i16::<LittleEndian>()? as f32,
    ))
}

/// Parses a version 38 BSP file.
pub fn load(data: &[u8]) -> Result<Bsp, BspError> {
    let mut reader = Cursor::new(data);

    let ident = reader.read_i32::<LittleEndian>().map_err(|_| {
        BspError::Truncated("header".to_owned())
    })?;
    if ident != BSP_IDENT {
        return Err(BspError::Malformed("bad ident (expected IBSP)".to_owned()));
    }

    let version = reader.read_i32::<LittleEndian>()?;
    if version != BSP_VERSION {
        return Err(BspError::UnsupportedVersion(version));
    }

    let mut lumps = [Lump { ofs: 0, len: 0 }; LUMP_COUNT];
    for lump in &mut lumps {
        lump.ofs = reader.read_u32::<LittleEndian>()? as usize;
        lump.len = reader.read_u32::<LittleEndian>()? as usize;
    }

    let planes = load_planes(lump_data(data, &lumps, LUMP_PLANES, PLANE_SIZE, "plane")?)?;
    let vertices = load_vertices(lump_data(data, &lumps, LUMP_VERTICES, VERTEX_SIZE, "vertex")?)?;
    let nodes = load_nodes(lump_data(data, &lumps, LUMP_NODES, NODE_SIZE, "node")?)?;
    let texinfos = load_texinfos(lump_data(data, &lumps, LUMP_TEXINFO, TEXINFO_SIZE, "texinfo")?)?;
    let leaves = load_leaves(lump_data(data, &lumps, LUMP_LEAVES, LEAF_SIZE, "leaf")?)?;
    let edges = load_edges(lump_data(data, &lumps, LUMP_EDGES, EDGE_SIZE, "edge")?)?;
    let surf_edges = load_surf_edges(lump_data(data, &lumps, LUMP_SURF_EDGES, 4, "surfedge")?)?;
    let leaf_faces = load_leaf_faces(lump_data(data, &lumps, LUMP_LEAF_FACES, 2, "leafface")?)?;
    let models = load_models(lump_data(data, &lumps, LUMP_MODELS, MODEL_SIZE, "model")?)?;
    let light_data = lump_data(data, &lumps, LUMP_LIGHTING, 0, "lighting")?.to_vec();
    let vis = load_vis(lump_data(data, &lumps, LUMP_VISIBILITY, 0, "visibility")?)?;
    let num_areas = lump_data(data, &lumps, LUMP_AREAS, AREA_SIZE, "area")?.len() / AREA_SIZE;

    let faces = load_faces(
        lump_data(data, &lumps, LUMP_FACES, FACE_SIZE, "face")?,
        &vertices,
        &edges,
        &surf_edges,
        &texinfos,
    )?;

    // cross-lump index validation
    for node in &nodes {
        if node.plane_id >= planes.len() {
            return Err(BspError::Malformed("node plane out of range".to_owned()));
        }
        for child in node.children {
            match child {
                NodeChild::Node(n) if n >= nodes.len() => {
                    return Err(BspError::Malformed("node child out of range".to_owned()))
                }
                NodeChild::Leaf(l) if l >= leaves.len() => {
                    return Err(BspError::Malformed("leaf child out of range".to_owned()))
                }
                _ => (),
            }
        }
    }

    let num_clusters = vis.as_ref().map(Vis::num_clusters).unwrap_or(0) as i16;
    for leaf in &leaves {
        if leaf.cluster < -1 || (num_clusters > 0 && leaf.cluster >= num_clusters) {
            return Err(BspError::Malformed("leaf cluster out of range".to_owned()));
        }
        if leaf.first_leaf_face + leaf.num_leaf_faces > leaf_faces.len() {
            return Err(BspError::Malformed("leaf face refs out of range".to_owned()));
        }
    }

    for &face_id in &leaf_faces {
        if face_id >= faces.len() {
            return Err(BspError::Malformed("marksurface out of range".to_owned()));
        }
    }

    info!(
        "world: {} nodes, {} leaves, {} faces, {} clusters, {} areas",
        nodes.len(),
        leaves.len(),
        faces.len(),
        num_clusters,
        num_areas,
    );

    Ok(Bsp {
        planes,
        vertices,
        nodes,
        leaves,
        texinfos,
        faces,
        leaf_faces,
        models,
        light_data,
        vis,
        num_areas,
    })
}

fn load_planes(data: &[u8]) -> Result<Vec<Hyperplane>, BspError> {
    let mut reader = Cursor::new(data);
    let mut planes = Vec::with_capacity(data.len() / PLANE_SIZE);

    for _ in 0..data.len() / PLANE_SIZE {
        let normal = read_vector3(&mut reader)?;
        let dist = reader.read_f32::<LittleEndian>()?;
        // the precomputed axial type is redundant; alignment is re-derived
        let _type = reader.read_u32::<LittleEndian>()?;

        planes.push(Hyperplane::new(normal, dist));
    }

    Ok(planes)
}

fn load_vertices(data: &[u8]) -> Result<Vec<Vector3<f32>>, BspError> {
    let mut reader = Cursor::new(data);
    (0..data.len() / VERTEX_SIZE)
        .map(|_| read_vector3(&mut reader).map_err(BspError::from))
        .collect()
}

fn load_nodes(data: &[u8]) -> Result<Vec<Node>, BspError> {
    let mut reader = Cursor::new(data);
    let mut nodes = Vec::with_capacity(data.len() / NODE_SIZE);

    for _ in 0..data.len() / NODE_SIZE {
        let plane_id = reader.read_u32::<LittleEndian>()? as usize;

        let mut children = [NodeChild::Node(0); 2];
        for child in &mut children {
            let raw = reader.read_i32::<LittleEndian>()?;
            *child = if raw < 0 {
                NodeChild::Leaf((-1 - raw) as usize)
            } else {
                NodeChild::Node(raw as usize)
            };
        }

        let mins = read_i16_vector3(&mut reader)?;
        let maxs = read_i16_vector3(&mut reader)?;
        let first_face = reader.read_u16::<LittleEndian>()? as usize;
        let num_faces = reader.read_u16::<LittleEndian>()? as usize;

        nodes.push(Node {
            plane_id,
            children,
            mins,
            maxs,
            first_face,
            num_faces,
        });
    }

    Ok(nodes)
}

fn load_leaves(data: &[u8]) -> Result<Vec<Leaf>, BspError> {
    let mut reader = Cursor::new(data);
    let mut leaves = Vec::with_capacity(data.len() / LEAF_SIZE);

    for _ in 0..data.len() / LEAF_SIZE {
        let contents = ContentFlags::from_bits_truncate(reader.read_u32::<LittleEndian>()?);
        let cluster = reader.read_i16::<LittleEndian>()?;
        let area = reader.read_i16::<LittleEndian>()?;
        let mins = read_i16_vector3(&mut reader)?;
        let maxs = read_i16_vector3(&mut reader)?;
        let first_leaf_face = reader.read_u16::<LittleEndian>()? as usize;
        let num_leaf_faces = reader.read_u16::<LittleEndian>()? as usize;
        let _first_brush = reader.read_u16::<LittleEndian>()?;
        let _num_brushes = reader.read_u16::<LittleEndian>()?;

        leaves.push(Leaf {
            contents,
            cluster,
            area,
            mins,
            maxs,
            first_leaf_face,
            num_leaf_faces,
        });
    }

    Ok(leaves)
}

fn load_texinfos(data: &[u8]) -> Result<Vec<TexInfo>, BspError> {
    let mut reader = Cursor::new(data);
    let count = data.len() / TEXINFO_SIZE;
    let mut texinfos = Vec::with_capacity(count);

    for _ in 0..count {
        let s_vector = read_vector3(&mut reader)?;
        let s_offset = reader.read_f32::<LittleEndian>()?;
        let t_vector = read_vector3(&mut reader)?;
        let t_offset = reader.read_f32::<LittleEndian>()?;
        let flags = SurfaceFlags::from_bits_truncate(reader.read_u32::<LittleEndian>()?);
        let value = reader.read_u32::<LittleEndian>()?;

        let mut name_raw = [0u8; 32];
        reader.read_exact(&mut name_raw)?;
        let name_end = name_raw.iter().position(|&b| b == 0).unwrap_or(32);
        let texture_name = String::from_utf8_lossy(&name_raw[..name_end]).into_owned();

        let next_raw = reader.read_i32::<LittleEndian>()?;
        let next = if next_raw < 0 || next_raw as usize >= count {
            None
        } else {
            Some(next_raw as usize)
        };

        texinfos.push(TexInfo {
            s_vector,
            s_offset,
            t_vector,
            t_offset,
            flags,
            value,
            texture_name,
            next,
        });
    }

    Ok(texinfos)
}

fn load_edges(data: &[u8]) -> Result<Vec<[usize; 2]>, BspError> {
    let mut reader = Cursor::new(data);
    (0..data.len() / EDGE_SIZE)
        .map(|_| {
            Ok([
                reader.read_u16::<LittleEndian>()? as usize,
                reader.read_u16::<LittleEndian>()? as usize,
            ])
        })
        .collect()
}

fn load_surf_edges(data: &[u8]) -> Result<Vec<i32>, BspError> {
    let mut reader = Cursor::new(data);
    (0..data.len() / 4)
        .map(|_| reader.read_i32::<LittleEndian>().map_err(BspError::from))
        .collect()
}

fn load_leaf_faces(data: &[u8]) -> Result<Vec<usize>, BspError> {
    let mut reader = Cursor::new(data);
    (0..data.len() / 2)
        .map(|_| {
            reader
                .read_u16::<LittleEndian>()
                .map(|v| v as usize)
                .map_err(BspError::from)
        })
        .collect()
}

fn load_models(data: &[u8]) -> Result<Vec<SubModel>, BspError> {
    let mut reader = Cursor::new(data);
    let mut models = Vec::with_capacity(data.len() / MODEL_SIZE);

    for _ in 0..data.len() / MODEL_SIZE {
        let mins = read_vector3(&mut reader)?;
        let maxs = read_vector3(&mut reader)?;
        let origin = read_vector3(&mut reader)?;
        let head_node = reader.read_i32::<LittleEndian>()?;
        let first_face = reader.read_i32::<LittleEndian>()? as usize;
        let num_faces = reader.read_i32::<LittleEndian>()? as usize;

        models.push(SubModel {
            mins,
            maxs,
            origin,
            head_node,
            first_face,
            num_faces,
        });
    }

    Ok(models)
}

fn load_vis(data: &[u8]) -> Result<Option<Vis>, BspError> {
    if data.is_empty() {
        return Ok(None);
    }

    let mut reader = Cursor::new(data);
    let num_clusters = reader.read_u32::<LittleEndian>()? as usize;

    if 4 + num_clusters * 8 > data.len() {
        return Err(BspError::Truncated("visibility offsets".to_owned()));
    }

    let mut offsets = Vec::with_capacity(num_clusters);
    for _ in 0..num_clusters {
        let pvs = reader.read_u32::<LittleEndian>()? as usize;
        let phs = reader.read_u32::<LittleEndian>()? as usize;
        if pvs >= data.len() || phs >= data.len() {
            return Err(BspError::Malformed("visibility offset out of range".to_owned()));
        }
        offsets.push((pvs, phs));
    }

    Ok(Some(Vis::new(num_clusters, offsets, data.to_vec())))
}

fn load_faces(
    data: &[u8],
    vertices: &[Vector3<f32>],
    edges: &[[usize; 2]],
    surf_edges: &[i32],
    texinfos: &[TexInfo],
) -> Result<Vec<Face>, BspError> {
    let mut reader = Cursor::new(data);
    let mut faces = Vec::with_capacity(data.len() / FACE_SIZE);

    for _ in 0..data.len() / FACE_SIZE {
        let plane_id = reader.read_u16::<LittleEndian>()? as usize;
        let side = match reader.read_i16::<LittleEndian>()? {
            0 => FaceSide::Front,
            _ => FaceSide::Back,
        };
        let first_edge = reader.read_i32::<LittleEndian>()? as usize;
        let num_edges = reader.read_i16::<LittleEndian>()? as usize;
        let texinfo_id = reader.read_i16::<LittleEndian>()? as usize;

        let mut light_styles = [0u8; MAX_LIGHTSTYLES_PER_FACE];
        reader.read_exact(&mut light_styles)?;

        let light_ofs = match reader.read_i32::<LittleEndian>()? {
            ofs if ofs < 0 => None,
            ofs => Some(ofs as usize),
        };

        if texinfo_id >= texinfos.len() {
            return Err(BspError::Malformed("face texinfo out of range".to_owned()));
        }
        if first_edge + num_edges > surf_edges.len() {
            return Err(BspError::Malformed("face edges out of range".to_owned()));
        }

        // walk the edge loop into a world-space polygon
        let mut face_verts = Vec::with_capacity(num_edges);
        for &surf_edge in &surf_edges[first_edge..first_edge + num_edges] {
            let vert_id = if surf_edge >= 0 {
                edges
                    .get(surf_edge as usize)
                    .ok_or_else(|| BspError::Malformed("edge out of range".to_owned()))?[0]
            } else {
                edges
                    .get(-surf_edge as usize)
                    .ok_or_else(|| BspError::Malformed("edge out of range".to_owned()))?[1]
            };

            let vert = *vertices
                .get(vert_id)
                .ok_or_else(|| BspError::Malformed("vertex out of range".to_owned()))?;
            face_verts.push(vert);
        }

        let (texture_mins, extents) = surface_extents(&face_verts, &texinfos[texinfo_id]);

        faces.push(Face {
            plane_id,
            side,
            texinfo_id,
            vertices: face_verts,
            light_styles,
            light_ofs,
            texture_mins,
            extents,
        });
    }

    Ok(faces)
}

/// Computes the texture-space bounding rectangle of a face, snapped to the
/// luxel grid.
fn surface_extents(vertices: &[Vector3<f32>], texinfo: &TexInfo) -> ([i16; 2], [i16; 2]) {
    let mut mins = [f32::MAX; 2];
    let mut maxs = [f32::MIN; 2];

    for vert in vertices {
        let s = vert.dot(texinfo.s_vector) + texinfo.s_offset;
        let t = vert.dot(texinfo.t_vector) + texinfo.t_offset;
        mins[0] = mins[0].min(s);
        maxs[0] = maxs[0].max(s);
        mins[1] = mins[1].min(t);
        maxs[1] = maxs[1].max(t);
    }

    let mut texture_mins = [0i16; 2];
    let mut extents = [0i16; 2];
    for i in 0..2 {
        let floor_min = (mins[i] / 16.0).floor() as i16;
        let ceil_max = (maxs[i] / 16.0).ceil() as i16;
        texture_mins[i] = floor_min * 16;
        extents[i] = (ceil_max - floor_min) * 16;
    }

    (texture_mins, extents)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER_SIZE: usize = 8 + LUMP_COUNT * 8;

    /// Assembles a BSP file from raw lump payloads.
    fn build_bsp(lump_payloads: &[(usize, Vec<u8>)]) -> Vec<u8> {
        let mut payload = Vec::new();
        let mut directory = [(0usize, 0usize); LUMP_COUNT];

        for (index, bytes) in lump_payloads {
            directory[*index] = (HEADER_SIZE + payload.len(), bytes.len());
            payload.extend_from_slice(bytes);
        }

        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(&BSP_IDENT.to_le_bytes());
        out.extend_from_slice(&BSP_VERSION.to_le_bytes());
        for (ofs, len) in directory {
            out.extend_from_slice(&(ofs as u32).to_le_bytes());
            out.extend_from_slice(&(len as u32).to_le_bytes());
        }
        out.extend_from_slice(&payload);
        out
    }

    fn plane_bytes(normal: [f32; 3], dist: f32) -> Vec<u8> {
        let mut b = Vec::new();
        for c in normal {
            b.extend_from_slice(&c.to_le_bytes());
        }
        b.extend_from_slice(&dist.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        b
    }

    fn node_bytes(plane: u32, front: i32, back: i32) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&plane.to_le_bytes());
        b.extend_from_slice(&front.to_le_bytes());
        b.extend_from_slice(&back.to_le_bytes());
        for _ in 0..6 {
            b.extend_from_slice(&0i16.to_le_bytes());
        }
        b.extend_from_slice(&0u16.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes());
        b
    }

    fn leaf_bytes(cluster: i16, area: i16) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&cluster.to_le_bytes());
        b.extend_from_slice(&area.to_le_bytes());
        for _ in 0..6 {
            b.extend_from_slice(&0i16.to_le_bytes());
        }
        for _ in 0..4 {
            b.extend_from_slice(&0u16.to_le_bytes());
        }
        b
    }

    #[test]
    fn test_load_minimal_world() {
        // one splitting plane, one node, two leaves
        let mut leaves = leaf_bytes(0, 0);
        leaves.extend(leaf_bytes(1, 0));

        let file = build_bsp(&[
            (LUMP_PLANES, plane_bytes([1.0, 0.0, 0.0], 0.0)),
            (LUMP_NODES, node_bytes(0, -1, -2)),
            (LUMP_LEAVES, leaves),
        ]);

        let bsp = load(&file).unwrap();
        assert_eq!(bsp.nodes.len(), 1);
        assert_eq!(bsp.leaves.len(), 2);
        assert_eq!(bsp.nodes[0].children[0], NodeChild::Leaf(0));
        assert_eq!(bsp.nodes[0].children[1], NodeChild::Leaf(1));

        use cgmath::Vector3;
        assert_eq!(
            bsp.point_in_leaf(Vector3::new(10.0, 0.0, 0.0)),
            super::super::LeafRef(0)
        );
    }

    #[test]
    fn test_bad_ident() {
        let mut file = build_bsp(&[]);
        file[0] = b'X';
        assert!(matches!(load(&file), Err(BspError::Malformed(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut file = build_bsp(&[]);
        file[4..8].copy_from_slice(&29i32.to_le_bytes());
        assert!(matches!(
            load(&file),
            Err(BspError::UnsupportedVersion(29))
        ));
    }

    #[test]
    fn test_truncated_lump() {
        let mut file = build_bsp(&[(LUMP_PLANES, plane_bytes([0.0, 0.0, 1.0], 0.0))]);
        file.truncate(file.len() - 4);
        assert!(matches!(load(&file), Err(BspError::Truncated(_))));
    }

    #[test]
    fn test_surface_extents_snap() {
        let texinfo = TexInfo {
            s_vector: cgmath::Vector3::unit_x(),
            s_offset: 0.0,
            t_vector: cgmath::Vector3::unit_y(),
            t_offset: 0.0,
            flags: SurfaceFlags::empty(),
            value: 0,
            texture_name: String::new(),
            next: None,
        };
        let verts = [
            cgmath::Vector3::new(3.0, 5.0, 0.0),
            cgmath::Vector3::new(60.0, 5.0, 0.0),
            cgmath::Vector3::new(60.0, 29.0, 0.0),
            cgmath::Vector3::new(3.0, 29.0, 0.0),
        ];
        let (mins, extents) = surface_extents(&verts, &texinfo);
        assert_eq!(mins, [0, 0]);
        assert_eq!(extents, [64, 32]);
    }
}
