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

//! Virtual filesystem facade.
//!
//! The engine proper treats asset storage as a black box that maps a virtual
//! path to raw bytes. This adapter searches a stack of game directories,
//! newest added first, plus an in-memory overlay used by tests and by
//! embedders that source assets elsewhere.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VfsError {
    #[error("No such file: {0}")]
    NoSuchFile(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

enum VfsComponent {
    Directory(PathBuf),
    Memory(HashMap<String, Vec<u8>>),
}

pub struct Vfs {
    components: Vec<VfsComponent>,
}

impl Vfs {
    pub fn new() -> Vfs {
        Vfs {
            components: Vec::new(),
        }
    }

    pub fn add_directory<P>(&mut self, path: P)
    where
        P: AsRef<Path>,
    {
        self.components
            .push(VfsComponent::Directory(path.as_ref().to_path_buf()));
    }

    /// Registers an in-memory file, shadowing any on-disk file of the same
    /// virtual path.
    pub fn add_memory_file<S>(&mut self, virtual_path: S, data: Vec<u8>)
    where
        S: AsRef<str>,
    {
        if let Some(VfsComponent::Memory(map)) = self.components.last_mut() {
            map.insert(virtual_path.as_ref().to_owned(), data);
            return;
        }

        let mut map = HashMap::new();
        map.insert(virtual_path.as_ref().to_owned(), data);
        self.components.push(VfsComponent::Memory(map));
    }

    /// Loads the full contents of a virtual path.
    ///
    /// Components are searched newest-first so later additions shadow earlier
    /// ones.
    pub fn open<S>(&self, virtual_path: S) -> Result<Vec<u8>, VfsError>
    where
        S: AsRef<str>,
    {
        let vp = virtual_path.as_ref();

        for c in self.components.iter().rev() {
            match c {
                VfsComponent::Directory(path) => {
                    let full_path = path.join(vp);
                    if full_path.is_file() {
                        return Ok(fs::read(full_path)?);
                    }
                }

                VfsComponent::Memory(map) => {
                    if let Some(data) = map.get(vp) {
                        return Ok(data.clone());
                    }
                }
            }
        }

        Err(VfsError::NoSuchFile(vp.to_owned()))
    }

    pub fn exists<S>(&self, virtual_path: S) -> bool
    where
        S: AsRef<str>,
    {
        let vp = virtual_path.as_ref();
        self.components.iter().rev().any(|c| match c {
            VfsComponent::Directory(path) => path.join(vp).is_file(),
            VfsComponent::Memory(map) => map.contains_key(vp),
        })
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Vfs::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_file_round_trip() {
        let mut vfs = Vfs::new();
        vfs.add_memory_file("maps/test.bsp", vec![1, 2, 3]);
        assert_eq!(vfs.open("maps/test.bsp").unwrap(), vec![1, 2, 3]);
        assert!(vfs.exists("maps/test.bsp"));
        assert!(!vfs.exists("maps/other.bsp"));
    }

    #[test]
    fn test_missing_file() {
        let vfs = Vfs::new();
        assert!(matches!(
            vfs.open("nope.wal"),
            Err(VfsError::NoSuchFile(_))
        ));
    }
}
