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

//! Console and notify overlay drawing.
//!
//! Text renders from the classic 16x16 glyph sheet as one quad per cell;
//! the scrollback, the input line with its blinking cursor, and the timed
//! notify lines all go through the same quad builder.

use crate::common::console::{Console, ConsoleText};

use super::pipeline::Pipeline;
use super::target::COLOR_ATTACHMENT_FORMAT;

pub const GLYPH_SHEET_PATH: &str = "pics/conchars.pcx";

/// Glyph cell size in pixels at scale 1.
pub const GLYPH_SIZE: f32 = 8.0;

const SHEET_GLYPHS_PER_ROW: u32 = 16;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GlyphVertex {
    /// Screen position in pixels; the shader maps to NDC.
    pub position: [f32; 2],
    pub texcoord: [f32; 2],
}

pub const GLYPH_VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![
    0 => Float32x2,
    1 => Float32x2,
];

/// Appends the six vertices for one glyph cell.
pub fn push_glyph(out: &mut Vec<GlyphVertex>, c: char, x: f32, y: f32, scale: f32) {
    let code = (c as u32) & 0xFF;
    if code == b' ' as u32 || code == 0 {
        return;
    }

    let cell = 1.0 / SHEET_GLYPHS_PER_ROW as f32;
    let s = (code % SHEET_GLYPHS_PER_ROW) as f32 * cell;
    let t = (code / SHEET_GLYPHS_PER_ROW) as f32 * cell;
    let size = GLYPH_SIZE * scale;

    let v = |px: f32, py: f32, ps: f32, pt: f32| GlyphVertex {
        position: [px, py],
        texcoord: [ps, pt],
    };

    let tl = v(x, y, s, t);
    let tr = v(x + size, y, s + cell, t);
    let br = v(x + size, y + size, s + cell, t + cell);
    let bl = v(x, y + size, s, t + cell);

    out.extend_from_slice(&[tl, tr, br, tl, br, bl]);
}

/// Lays out a run of characters starting at `(x, y)`.
pub fn push_string(out: &mut Vec<GlyphVertex>, text: &[char], x: f32, y: f32, scale: f32) {
    for (i, &c) in text.iter().enumerate() {
        push_glyph(out, c, x + i as f32 * GLYPH_SIZE * scale, y, scale);
    }
}

/// Builds the vertex stream for the dropped-down console: scrollback tail,
/// input line and blinking cursor.
pub fn build_console_quads(
    console: &Console,
    height: f32,
    scale: f32,
    realtime_millis: i64,
) -> Vec<GlyphVertex> {
    let mut out = Vec::new();
    let line_height = GLYPH_SIZE * scale;
    let text = console.text();

    // scrollback fills from the bottom up, leaving a row for input
    let mut y = height - 2.0 * line_height;
    let mut line = text.current();
    loop {
        push_string(&mut out, text.line(line), 0.0, y, scale);
        if line == 0 || y < 0.0 {
            break;
        }
        line -= 1;
        y -= line_height;
    }

    // input line with prompt
    let input_y = height - line_height;
    push_glyph(&mut out, ']', 0.0, input_y, scale);
    push_string(&mut out, &console.input_text(), GLYPH_SIZE * scale, input_y, scale);

    if ConsoleText::cursor_visible(realtime_millis) {
        let cursor_x = (1 + console.cursor()) as f32 * GLYPH_SIZE * scale;
        push_glyph(&mut out, '_', cursor_x, input_y, scale);
    }

    out
}

/// Builds the vertex stream for the notify overlay (recent lines at the top
/// of the screen).
pub fn build_notify_quads(
    text: &ConsoleText,
    now: chrono::Duration,
    notify_time: chrono::Duration,
    scale: f32,
) -> Vec<GlyphVertex> {
    let mut out = Vec::new();
    for (i, line) in text.notify_lines(now, notify_time).iter().enumerate() {
        push_string(&mut out, line, 0.0, i as f32 * GLYPH_SIZE * scale, scale);
    }
    out
}

lazy_static! {
    static ref BIND_GROUP_LAYOUT_ENTRIES: [Vec<wgpu::BindGroupLayoutEntry>; 1] = [vec![
        // screen dimensions
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(16),
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        },
    ]];
}

pub struct OverlayPipeline;

impl Pipeline for OverlayPipeline {
    fn name() -> &'static str {
        "overlay"
    }

    fn shader_source() -> &'static str {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/overlay.wgsl"))
    }

    fn bind_group_layout_descriptors() -> Vec<wgpu::BindGroupLayoutDescriptor<'static>> {
        vec![wgpu::BindGroupLayoutDescriptor {
            label: Some("overlay bind group"),
            entries: &BIND_GROUP_LAYOUT_ENTRIES[0],
        }]
    }

    fn primitive_state() -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Cw,
            cull_mode: None,
            ..Default::default()
        }
    }

    fn color_target_states() -> Vec<Option<wgpu::ColorTargetState>> {
        vec![Some(wgpu::ColorTargetState {
            format: COLOR_ATTACHMENT_FORMAT,
            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
            write_mask: wgpu::ColorWrites::ALL,
        })]
    }

    fn depth_stencil_state() -> Option<wgpu::DepthStencilState> {
        None
    }

    fn vertex_buffer_layouts() -> Vec<wgpu::VertexBufferLayout<'static>> {
        vec![wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<GlyphVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &GLYPH_VERTEX_ATTRIBUTES,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glyph_uv_mapping() {
        let mut out = Vec::new();
        // 'A' is code 65 = row 4, column 1 of the sheet
        push_glyph(&mut out, 'A', 0.0, 0.0, 1.0);
        assert_eq!(out.len(), 6);

        let cell = 1.0 / 16.0;
        assert_eq!(out[0].texcoord, [cell, 4.0 * cell]);
    }

    #[test]
    fn test_space_emits_nothing() {
        let mut out = Vec::new();
        push_glyph(&mut out, ' ', 0.0, 0.0, 1.0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_string_advances() {
        let mut out = Vec::new();
        push_string(&mut out, &['a', 'b'], 0.0, 0.0, 2.0);
        assert_eq!(out.len(), 12);
        // second glyph starts one scaled cell to the right
        assert_eq!(out[6].position, [16.0, 0.0]);
    }
}
