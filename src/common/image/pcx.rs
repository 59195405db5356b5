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

//! ZSoft PCX decoding, limited to the 8-bit single-plane variant the game
//! assets use.

use std::io::{Cursor, Read, Seek, SeekFrom};

use super::{ImageError, Pixels, SourceImage};

use byteorder::{LittleEndian, ReadBytesExt};

const MANUFACTURER_ZSOFT: u8 = 0x0A;
const ENCODING_RLE: u8 = 1;
const PALETTE_MARKER: u8 = 0x0C;

/// Decodes a PCX file into palette indices.
pub fn load(data: &[u8]) -> Result<SourceImage, ImageError> {
    let mut reader = Cursor::new(data);

    let manufacturer = reader.read_u8()?;
    let _version = reader.read_u8()?;
    let encoding = reader.read_u8()?;
    let bits_per_pixel = reader.read_u8()?;

    if manufacturer != MANUFACTURER_ZSOFT {
        return Err(ImageError::Malformed("bad PCX manufacturer".to_owned()));
    }
    if encoding != ENCODING_RLE || bits_per_pixel != 8 {
        return Err(ImageError::Unsupported(format!(
            "PCX encoding {} at {} bpp",
            encoding, bits_per_pixel
        )));
    }

    let xmin = reader.read_u16::<LittleEndian>()? as u32;
    let ymin = reader.read_u16::<LittleEndian>()? as u32;
    let xmax = reader.read_u16::<LittleEndian>()? as u32;
    let ymax = reader.read_u16::<LittleEndian>()? as u32;

    if xmax < xmin || ymax < ymin || xmax >= 4096 || ymax >= 4096 {
        return Err(ImageError::Malformed("bad PCX dimensions".to_owned()));
    }

    let width = xmax - xmin + 1;
    let height = ymax - ymin + 1;

    // hdpi, vdpi, the 16-color header palette, a reserved byte, the plane
    // count and derived fields are all unused for this variant
    reader.seek(SeekFrom::Start(66))?;
    let bytes_per_line = reader.read_u16::<LittleEndian>()? as u32;
    reader.seek(SeekFrom::Start(128))?;

    let mut indices = Vec::with_capacity((width * height) as usize);
    for _ in 0..height {
        let mut x = 0;
        while x < bytes_per_line {
            let byte = reader.read_u8()?;
            let (run, value) = if byte & 0xC0 == 0xC0 {
                ((byte & 0x3F) as u32, reader.read_u8()?)
            } else {
                (1, byte)
            };

            for _ in 0..run {
                if x < width {
                    indices.push(value);
                }
                x += 1;
            }
        }
    }

    Ok(SourceImage {
        width,
        height,
        pixels: Pixels::Indexed(indices),
    })
}

/// Extracts the trailing 256-color palette of a PCX file.
///
/// Used for `pics/colormap.pcx`, whose pixel payload is irrelevant.
pub fn load_palette(data: &[u8]) -> Result<[[u8; 3]; 256], ImageError> {
    if data.len() < 769 {
        return Err(ImageError::Truncated);
    }

    let tail = &data[data.len() - 769..];
    if tail[0] != PALETTE_MARKER {
        return Err(ImageError::Malformed("missing PCX palette marker".to_owned()));
    }

    let mut palette = [[0u8; 3]; 256];
    for (i, rgb) in tail[1..].chunks_exact(3).enumerate() {
        palette[i] = [rgb[0], rgb[1], rgb[2]];
    }

    Ok(palette)
}

#[cfg(test)]
mod tests {
    use super::*;

    // builds a tiny valid 8-bit PCX in memory
    fn build_pcx(width: u16, height: u16, rows: &[Vec<u8>]) -> Vec<u8> {
        let mut data = vec![0u8; 128];
        data[0] = MANUFACTURER_ZSOFT;
        data[1] = 5; // version
        data[2] = ENCODING_RLE;
        data[3] = 8; // bits per pixel
        data[4..6].copy_from_slice(&0u16.to_le_bytes());
        data[6..8].copy_from_slice(&0u16.to_le_bytes());
        data[8..10].copy_from_slice(&(width - 1).to_le_bytes());
        data[10..12].copy_from_slice(&(height - 1).to_le_bytes());
        data[65] = 1; // planes
        data[66..68].copy_from_slice(&width.to_le_bytes());

        for row in rows {
            for &px in row {
                if px >= 0xC0 {
                    // values in the run-marker range must be escaped
                    data.push(0xC1);
                }
                data.push(px);
            }
        }

        data
    }

    #[test]
    fn test_load_simple() {
        let pcx = build_pcx(2, 2, &[vec![1, 2], vec![3, 4]]);
        let img = load(&pcx).unwrap();
        assert_eq!((img.width, img.height), (2, 2));
        assert_eq!(img.pixels, Pixels::Indexed(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_load_rle_run() {
        let mut pcx = build_pcx(4, 1, &[]);
        pcx.push(0xC4); // run of 4
        pcx.push(7);
        let img = load(&pcx).unwrap();
        assert_eq!(img.pixels, Pixels::Indexed(vec![7, 7, 7, 7]));
    }

    #[test]
    fn test_bad_manufacturer() {
        let mut pcx = build_pcx(1, 1, &[vec![0]]);
        pcx[0] = 0;
        assert!(matches!(load(&pcx), Err(ImageError::Malformed(_))));
    }

    #[test]
    fn test_palette_extraction() {
        let mut data = build_pcx(1, 1, &[vec![0]]);
        data.push(PALETTE_MARKER);
        for i in 0..256u32 {
            data.extend_from_slice(&[i as u8, 0, 255 - i as u8]);
        }
        let palette = load_palette(&data).unwrap();
        assert_eq!(palette[0], [0, 0, 255]);
        assert_eq!(palette[255], [255, 0, 0]);
    }
}
