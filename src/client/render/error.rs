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

//! Renderer error taxonomy.
//!
//! Subsystems surface tagged errors; only the driver decides between retry,
//! fallback and abort. Nothing below the driver terminates the process.

use crate::common::{
    bsp::BspError, image::ImageError, md2::Md2Error, sp2::Sp2Error, vfs::VfsError,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// Fatal at startup: no usable device or mode.
    #[error("Renderer initialization failed: {0}")]
    InitializationFailure(String),

    /// A malformed or missing asset. Fatal only for the worldmodel.
    #[error("Malformed asset {name}: {reason}")]
    MalformedAsset { name: String, reason: String },

    /// An asset in a format revision the engine does not read.
    #[error("Unsupported version for asset {name}: {reason}")]
    UnsupportedVersion { name: String, reason: String },

    /// The device was lost at runtime; the driver rebuilds the swapchain and
    /// pipelines, escalating to `InitializationFailure` on repeat failure.
    #[error("GPU device lost")]
    DeviceLost,

    /// An allocation failed even after evicting the oldest unreferenced
    /// image generation.
    #[error("Out of GPU memory allocating {0}")]
    OutOfMemory(String),

    /// The UI atlas could not place a pic; the caller falls back to a
    /// dedicated image.
    #[error("UI atlas full")]
    AtlasFull,
}

impl RenderError {
    pub fn malformed<S, R>(name: S, reason: R) -> RenderError
    where
        S: AsRef<str>,
        R: ToString,
    {
        RenderError::MalformedAsset {
            name: name.as_ref().to_owned(),
            reason: reason.to_string(),
        }
    }

    /// Wraps a BSP load failure, keeping version errors distinct so the
    /// driver can report them separately.
    pub fn from_bsp<S>(name: S, error: BspError) -> RenderError
    where
        S: AsRef<str>,
    {
        match error {
            BspError::UnsupportedVersion(_) => RenderError::UnsupportedVersion {
                name: name.as_ref().to_owned(),
                reason: error.to_string(),
            },
            other => RenderError::malformed(name, other),
        }
    }

    pub fn from_image<S>(name: S, error: ImageError) -> RenderError
    where
        S: AsRef<str>,
    {
        RenderError::malformed(name, error)
    }

    pub fn from_md2<S>(name: S, error: Md2Error) -> RenderError
    where
        S: AsRef<str>,
    {
        match error {
            Md2Error::UnsupportedVersion(_) => RenderError::UnsupportedVersion {
                name: name.as_ref().to_owned(),
                reason: error.to_string(),
            },
            other => RenderError::malformed(name, other),
        }
    }

    pub fn from_sp2<S>(name: S, error: Sp2Error) -> RenderError
    where
        S: AsRef<str>,
    {
        match error {
            Sp2Error::UnsupportedVersion(_) => RenderError::UnsupportedVersion {
                name: name.as_ref().to_owned(),
                reason: error.to_string(),
            },
            other => RenderError::malformed(name, other),
        }
    }

    pub fn from_vfs<S>(name: S, error: VfsError) -> RenderError
    where
        S: AsRef<str>,
    {
        RenderError::malformed(name, error)
    }
}
