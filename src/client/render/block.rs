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

//! Skyline rectangle packing for atlas pages.
//!
//! Shared by the UI pic scrap and the lightmap pages: rectangles are placed
//! at the lowest available skyline position, left to right, and are never
//! freed individually; a page is reset wholesale.

/// A placed rectangle, in page texel coordinates.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BlockRect {
    pub fn overlaps(&self, other: &BlockRect) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

/// One fixed-size page with a skyline height per column.
pub struct BlockAlloc {
    width: u32,
    height: u32,
    skyline: Vec<u32>,
}

impl BlockAlloc {
    pub fn new(width: u32, height: u32) -> BlockAlloc {
        BlockAlloc {
            width,
            height,
            skyline: vec![0; width as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Places a `width`×`height` rectangle at the lowest skyline span wide
    /// enough to hold it. Returns `None` when the page is full.
    pub fn alloc(&mut self, width: u32, height: u32) -> Option<BlockRect> {
        if width == 0 || height == 0 || width > self.width || height > self.height {
            return None;
        }

        let mut best_y = self.height;
        let mut best_x = None;

        for x in 0..=(self.width - width) as usize {
            // the span's placement height is its tallest column
            let span_y = self.skyline[x..x + width as usize].iter().copied().max()
                .unwrap_or(0);
            if span_y < best_y {
                best_y = span_y;
                best_x = Some(x as u32);
            }
        }

        let x = best_x?;
        if best_y + height > self.height {
            return None;
        }

        for column in &mut self.skyline[x as usize..(x + width) as usize] {
            *column = best_y + height;
        }

        Some(BlockRect {
            x,
            y: best_y,
            width,
            height,
        })
    }

    /// Forgets every placement.
    pub fn reset(&mut self) {
        self.skyline.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_disjoint() {
        let mut alloc = BlockAlloc::new(256, 256);
        let mut placed: Vec<BlockRect> = Vec::new();

        // a mix of sizes that forces multiple skyline rows
        for (w, h) in [
            (64, 64),
            (128, 16),
            (100, 40),
            (32, 32),
            (200, 8),
            (16, 100),
            (64, 64),
            (64, 64),
        ] {
            let rect = alloc.alloc(w, h).unwrap();
            assert!(rect.x + rect.width <= 256);
            assert!(rect.y + rect.height <= 256);
            for other in &placed {
                assert!(!rect.overlaps(other), "{:?} overlaps {:?}", rect, other);
            }
            placed.push(rect);
        }
    }

    #[test]
    fn test_alloc_fails_when_full() {
        let mut alloc = BlockAlloc::new(64, 64);
        assert!(alloc.alloc(64, 64).is_some());
        assert!(alloc.alloc(1, 1).is_none());

        alloc.reset();
        assert!(alloc.alloc(64, 64).is_some());
    }

    #[test]
    fn test_oversized_rejected() {
        let mut alloc = BlockAlloc::new(64, 64);
        assert!(alloc.alloc(65, 1).is_none());
        assert!(alloc.alloc(0, 10).is_none());
    }
}
