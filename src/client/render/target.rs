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

//! Render target attachments and presentation-surface management.

use super::error::RenderError;

pub const COLOR_ATTACHMENT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DEPTH_ATTACHMENT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl From<Extent2d> for wgpu::Extent3d {
    fn from(e: Extent2d) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: e.width,
            height: e.height,
            depth_or_array_layers: 1,
        }
    }
}

pub fn create_color_attachment(
    device: &wgpu::Device,
    label: &str,
    size: Extent2d,
    sample_count: u32,
    usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: size.into(),
        mip_level_count: 1,
        sample_count,
        dimension: wgpu::TextureDimension::D2,
        format: COLOR_ATTACHMENT_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | usage,
        view_formats: &[],
    })
}

pub fn create_depth_attachment(
    device: &wgpu::Device,
    label: &str,
    size: Extent2d,
    sample_count: u32,
    usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: size.into(),
        mip_level_count: 1,
        sample_count,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_ATTACHMENT_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | usage,
        view_formats: &[],
    })
}

/// A color+depth pair rendered by the 3D passes.
///
/// Also used, at a reduced resolution, for each reflection pass.
pub struct ScenePassTarget {
    size: Extent2d,
    sample_count: u32,
    color_attachment: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_attachment: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

impl ScenePassTarget {
    pub fn new(device: &wgpu::Device, size: Extent2d, sample_count: u32) -> ScenePassTarget {
        let color_attachment = create_color_attachment(
            device,
            "scene color attachment",
            size,
            sample_count,
            wgpu::TextureUsages::TEXTURE_BINDING,
        );
        let depth_attachment = create_depth_attachment(
            device,
            "scene depth attachment",
            size,
            sample_count,
            wgpu::TextureUsages::TEXTURE_BINDING,
        );

        let color_view = color_attachment.create_view(&Default::default());
        let depth_view = depth_attachment.create_view(&Default::default());

        ScenePassTarget {
            size,
            sample_count,
            color_attachment,
            color_view,
            depth_attachment,
            depth_view,
        }
    }

    pub fn size(&self) -> Extent2d {
        self.size
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn color_attachment(&self) -> &wgpu::Texture {
        &self.color_attachment
    }

    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.color_view
    }

    pub fn depth_attachment(&self) -> &wgpu::Texture {
        &self.depth_attachment
    }

    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth_view
    }

    /// Begins the scene pass. Depth always clears; the color clear is
    /// optional since the world normally covers every pixel.
    pub fn begin_pass<'enc>(
        &self,
        encoder: &'enc mut wgpu::CommandEncoder,
        label: &str,
        clear_color: bool,
    ) -> wgpu::RenderPass<'enc> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: if clear_color {
                        wgpu::LoadOp::Clear(wgpu::Color::BLACK)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            ..Default::default()
        })
    }
}

/// Presentation-surface lifecycle.
#[derive(Debug, PartialEq, Eq)]
enum SurfaceState {
    Uninitialized,
    Ready,
    Presenting,
}

/// Owns the surface configuration and drives the
/// `Ready → Presenting → Ready` cycle, recreating on acquire failure,
/// resize, or mode change.
pub struct SurfaceManager {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    state: SurfaceState,
    // consecutive rebuild failures; two in a row escalate
    rebuild_failures: u32,
}

impl SurfaceManager {
    pub fn new(
        device: &wgpu::Device,
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    ) -> SurfaceManager {
        let mut manager = SurfaceManager {
            surface,
            config,
            state: SurfaceState::Uninitialized,
            rebuild_failures: 0,
        };
        manager.initialize(device);
        manager
    }

    fn initialize(&mut self, device: &wgpu::Device) {
        self.surface.configure(device, &self.config);
        self.state = SurfaceState::Ready;
    }

    pub fn size(&self) -> Extent2d {
        Extent2d {
            width: self.config.width,
            height: self.config.height,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Applies a resize or swap-interval change; takes effect on the next
    /// acquire.
    pub fn reconfigure(
        &mut self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
        vsync: bool,
    ) {
        if width == 0 || height == 0 {
            return;
        }

        self.config.width = width;
        self.config.height = height;
        self.config.present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        self.surface.configure(device, &self.config);
        self.state = SurfaceState::Ready;
    }

    /// Acquires the next presentable image.
    ///
    /// On an out-of-date or lost surface the swapchain is recreated once; the
    /// caller must have drained in-flight frames before calling. Two
    /// consecutive failed recreations escalate to `DeviceLost`.
    pub fn acquire(
        &mut self,
        device: &wgpu::Device,
    ) -> Result<wgpu::SurfaceTexture, RenderError> {
        assert_ne!(self.state, SurfaceState::Presenting, "acquire while presenting");

        match self.surface.get_current_texture() {
            Ok(frame) => {
                self.state = SurfaceState::Presenting;
                self.rebuild_failures = 0;
                Ok(frame)
            }

            Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Lost) => {
                debug!("surface out of date, recreating");
                self.surface.configure(device, &self.config);

                match self.surface.get_current_texture() {
                    Ok(frame) => {
                        self.state = SurfaceState::Presenting;
                        self.rebuild_failures = 0;
                        Ok(frame)
                    }
                    Err(e) => {
                        self.rebuild_failures += 1;
                        warn!("surface recreate failed: {:?}", e);
                        if self.rebuild_failures >= 2 {
                            Err(RenderError::InitializationFailure(
                                "surface could not be recreated".to_owned(),
                            ))
                        } else {
                            Err(RenderError::DeviceLost)
                        }
                    }
                }
            }

            Err(wgpu::SurfaceError::OutOfMemory) => {
                Err(RenderError::OutOfMemory("swapchain".to_owned()))
            }

            Err(e) => {
                warn!("surface acquire failed: {:?}", e);
                Err(RenderError::DeviceLost)
            }
        }
    }

    /// Presents an acquired image and returns to `Ready`.
    pub fn present(&mut self, frame: wgpu::SurfaceTexture) {
        frame.present();
        self.state = SurfaceState::Ready;
    }
}
