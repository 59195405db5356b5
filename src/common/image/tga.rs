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

//! Targa loading and saving.
//!
//! The loader accepts the variants found in game assets: 8-bit grayscale,
//! 15/16-bit, 24-bit and 32-bit truecolor, run-length encoded or not, with
//! either vertical origin. The writer emits only the uncompressed 24-bit
//! type 2 form used for screenshots.

use std::io::{Cursor, Read, Seek, SeekFrom};

use super::{ImageError, Pixels, SourceImage};

use byteorder::{LittleEndian, ReadBytesExt};

const TYPE_TRUECOLOR: u8 = 2;
const TYPE_GRAYSCALE: u8 = 3;
const TYPE_TRUECOLOR_RLE: u8 = 10;
const TYPE_GRAYSCALE_RLE: u8 = 11;

// image descriptor bit 5: origin at top-left instead of bottom-left
const DESC_TOP_ORIGIN: u8 = 0x20;

/// Decodes a TGA file into RGBA pixels, top-left origin.
pub fn load(data: &[u8]) -> Result<SourceImage, ImageError> {
    let mut reader = Cursor::new(data);

    let id_length = reader.read_u8()?;
    let colormap_type = reader.read_u8()?;
    let image_type = reader.read_u8()?;

    // colormap specification, unused by the supported variants
    let _first_entry = reader.read_u16::<LittleEndian>()?;
    let _colormap_len = reader.read_u16::<LittleEndian>()?;
    let _entry_size = reader.read_u8()?;

    let _x_origin = reader.read_u16::<LittleEndian>()?;
    let _y_origin = reader.read_u16::<LittleEndian>()?;
    let width = reader.read_u16::<LittleEndian>()? as u32;
    let height = reader.read_u16::<LittleEndian>()? as u32;
    let pixel_depth = reader.read_u8()?;
    let descriptor = reader.read_u8()?;

    if colormap_type != 0 {
        return Err(ImageError::Unsupported("colormapped TGA".to_owned()));
    }
    if width == 0 || height == 0 {
        return Err(ImageError::Malformed("zero TGA dimension".to_owned()));
    }

    let rle = match image_type {
        TYPE_TRUECOLOR | TYPE_GRAYSCALE => false,
        TYPE_TRUECOLOR_RLE | TYPE_GRAYSCALE_RLE => true,
        other => {
            return Err(ImageError::Unsupported(format!("TGA image type {}", other)))
        }
    };

    match (image_type, pixel_depth) {
        (TYPE_GRAYSCALE | TYPE_GRAYSCALE_RLE, 8) => (),
        (TYPE_TRUECOLOR | TYPE_TRUECOLOR_RLE, 15 | 16 | 24 | 32) => (),
        (_, depth) => {
            return Err(ImageError::Unsupported(format!("TGA depth {}", depth)))
        }
    }

    reader.seek(SeekFrom::Current(id_length as i64))?;

    let pixel_count = (width * height) as usize;
    let mut rgba = Vec::with_capacity(pixel_count * 4);

    if rle {
        let mut decoded = 0;
        while decoded < pixel_count {
            let packet = reader.read_u8()?;
            let count = ((packet & 0x7F) + 1) as usize;
            if decoded + count > pixel_count {
                return Err(ImageError::Malformed("RLE overrun".to_owned()));
            }

            if packet & 0x80 != 0 {
                let px = read_pixel(&mut reader, pixel_depth)?;
                for _ in 0..count {
                    rgba.extend_from_slice(&px);
                }
            } else {
                for _ in 0..count {
                    let px = read_pixel(&mut reader, pixel_depth)?;
                    rgba.extend_from_slice(&px);
                }
            }

            decoded += count;
        }
    } else {
        for _ in 0..pixel_count {
            let px = read_pixel(&mut reader, pixel_depth)?;
            rgba.extend_from_slice(&px);
        }
    }

    // normalize to top-left origin
    if descriptor & DESC_TOP_ORIGIN == 0 {
        flip_rows(&mut rgba, width as usize, height as usize);
    }

    Ok(SourceImage {
        width,
        height,
        pixels: Pixels::Rgba(rgba),
    })
}

fn read_pixel<R: Read>(reader: &mut R, depth: u8) -> Result<[u8; 4], ImageError> {
    Ok(match depth {
        8 => {
            let v = reader.read_u8()?;
            [v, v, v, 0xFF]
        }
        15 | 16 => {
            // ARRRRRGG GGGBBBBB, little endian
            let v = reader.read_u16::<LittleEndian>()?;
            let r = ((v >> 10) & 0x1F) as u8;
            let g = ((v >> 5) & 0x1F) as u8;
            let b = (v & 0x1F) as u8;
            [r << 3 | r >> 2, g << 3 | g >> 2, b << 3 | b >> 2, 0xFF]
        }
        24 => {
            let mut bgr = [0u8; 3];
            reader.read_exact(&mut bgr)?;
            [bgr[2], bgr[1], bgr[0], 0xFF]
        }
        32 => {
            let mut bgra = [0u8; 4];
            reader.read_exact(&mut bgra)?;
            [bgra[2], bgra[1], bgra[0], bgra[3]]
        }
        _ => unreachable!("depth validated by caller"),
    })
}

fn flip_rows(rgba: &mut [u8], width: usize, height: usize) {
    let stride = width * 4;
    for row in 0..height / 2 {
        let (top, rest) = rgba.split_at_mut((height - 1 - row) * stride);
        top[row * stride..row * stride + stride].swap_with_slice(&mut rest[..stride]);
    }
}

/// Encodes RGBA pixels (top-left origin) as an uncompressed 24-bit type 2
/// TGA with the conventional bottom-left origin and BGR byte order.
pub fn write(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ImageError> {
    if rgba.len() != (width * height * 4) as usize {
        return Err(ImageError::Malformed(
            "pixel buffer does not match dimensions".to_owned(),
        ));
    }

    let mut out = Vec::with_capacity(18 + (width * height * 3) as usize);
    out.extend_from_slice(&[0, 0, TYPE_TRUECOLOR]);
    out.extend_from_slice(&[0; 9]); // colormap spec and origin
    out.extend_from_slice(&(width as u16).to_le_bytes());
    out.extend_from_slice(&(height as u16).to_le_bytes());
    out.push(24);
    out.push(0); // bottom-left origin

    for row in (0..height).rev() {
        let start = (row * width * 4) as usize;
        for px in rgba[start..start + (width * 4) as usize].chunks_exact(4) {
            out.extend_from_slice(&[px[2], px[1], px[0]]);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(image_type: u8, width: u16, height: u16, depth: u8, descriptor: u8) -> Vec<u8> {
        let mut h = vec![0u8; 18];
        h[2] = image_type;
        h[12..14].copy_from_slice(&width.to_le_bytes());
        h[14..16].copy_from_slice(&height.to_le_bytes());
        h[16] = depth;
        h[17] = descriptor;
        h
    }

    #[test]
    fn test_uncompressed_24_bottom_origin() {
        // 1x2: bottom row red, top row blue, stored bottom-first as BGR
        let mut data = header(TYPE_TRUECOLOR, 1, 2, 24, 0);
        data.extend_from_slice(&[0, 0, 255]); // red
        data.extend_from_slice(&[255, 0, 0]); // blue

        let img = load(&data).unwrap();
        let Pixels::Rgba(rgba) = img.pixels else {
            panic!("expected rgba")
        };
        // top-left origin output: blue first
        assert_eq!(&rgba[0..4], &[0, 0, 255, 255]);
        assert_eq!(&rgba[4..8], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_rle_32() {
        let mut data = header(TYPE_TRUECOLOR_RLE, 4, 1, 32, DESC_TOP_ORIGIN);
        data.push(0x83); // run packet, 4 pixels
        data.extend_from_slice(&[1, 2, 3, 4]); // BGRA

        let img = load(&data).unwrap();
        let Pixels::Rgba(rgba) = img.pixels else {
            panic!("expected rgba")
        };
        assert_eq!(rgba.len(), 16);
        assert_eq!(&rgba[0..4], &[3, 2, 1, 4]);
        assert_eq!(&rgba[12..16], &[3, 2, 1, 4]);
    }

    #[test]
    fn test_16_bit_expansion() {
        // pure red in 1-5-5-5: bits 10..14 set
        let v: u16 = 0x1F << 10;
        let mut data = header(TYPE_TRUECOLOR, 1, 1, 16, DESC_TOP_ORIGIN);
        data.extend_from_slice(&v.to_le_bytes());

        let img = load(&data).unwrap();
        let Pixels::Rgba(rgba) = img.pixels else {
            panic!("expected rgba")
        };
        assert_eq!(&rgba[..], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_write_read_round_trip() {
        let rgba: Vec<u8> = (0..4u8)
            .flat_map(|i| [i * 4, 255 - i * 4, i, 255])
            .collect();
        let encoded = write(&rgba, 4, 1).unwrap();
        let decoded = load(&encoded).unwrap();
        let Pixels::Rgba(out) = decoded.pixels else {
            panic!("expected rgba")
        };
        // alpha is reconstituted as opaque; color channels are exact
        for (a, b) in rgba.chunks_exact(4).zip(out.chunks_exact(4)) {
            assert_eq!(&a[..3], &b[..3]);
            assert_eq!(b[3], 255);
        }
    }

    #[test]
    fn test_unsupported_type() {
        let data = header(1, 1, 1, 8, 0);
        assert!(matches!(load(&data), Err(ImageError::Unsupported(_))));
    }
}
