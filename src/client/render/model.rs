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

//! The model cache: alias models, sprites and inline brush submodels,
//! evicted by registration sequence like images.

use std::collections::HashMap;

use crate::common::{
    md2::{self, FrameVertex, Md2Model},
    sp2::{self, Sp2Model},
    vfs::Vfs,
};

use super::{
    error::RenderError,
    image::{ImageCache, ImageKind, ImageRef},
    palette::Palette,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ModelRef(pub usize);

pub enum ModelKind {
    Alias(Md2Model),
    Sprite(Sp2Model),
    /// Index into the worldmodel's submodel table ("*N" names).
    Inline(usize),
}

pub struct Model {
    pub name: String,
    pub kind: ModelKind,
    pub registration_sequence: u32,
    /// Resolved skin bindings (alias skins or sprite frames).
    pub skins: Vec<ImageRef>,
}

pub struct ModelCache {
    models: Vec<Option<Model>>,
    by_name: HashMap<String, usize>,
    registration_sequence: u32,
    nomodel: ModelRef,
}

impl ModelCache {
    pub fn new() -> ModelCache {
        let mut cache = ModelCache {
            models: Vec::new(),
            by_name: HashMap::new(),
            registration_sequence: 1,
            nomodel: ModelRef(0),
        };

        cache.nomodel = cache.insert(Model {
            name: "***nomodel***".to_owned(),
            kind: ModelKind::Alias(placeholder_cube()),
            registration_sequence: 1,
            skins: Vec::new(),
        });

        cache
    }

    pub fn nomodel(&self) -> ModelRef {
        self.nomodel
    }

    pub fn begin_registration(&mut self) {
        self.registration_sequence += 1;
    }

    pub fn registration_sequence(&self) -> u32 {
        self.registration_sequence
    }

    pub fn get(&self, model_ref: ModelRef) -> Option<&Model> {
        self.models.get(model_ref.0).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.models.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.models.iter().flatten()
    }

    /// Resolves a named model, loading it on first use.
    ///
    /// A failed load substitutes the wireframe-cube placeholder.
    pub fn register(
        &mut self,
        vfs: &Vfs,
        palette: &Palette,
        images: &mut ImageCache,
        name: &str,
    ) -> ModelRef {
        if let Some(&index) = self.by_name.get(name) {
            if let Some(model) = self.models[index].as_mut() {
                model.registration_sequence = self.registration_sequence;
                return ModelRef(index);
            }
        }

        match self.load(vfs, palette, images, name) {
            Ok(model_ref) => model_ref,
            Err(e) => {
                warn!("{}", e);
                self.nomodel
            }
        }
    }

    fn load(
        &mut self,
        vfs: &Vfs,
        palette: &Palette,
        images: &mut ImageCache,
        name: &str,
    ) -> Result<ModelRef, RenderError> {
        let (kind, skins) = if let Some(rest) = name.strip_prefix('*') {
            let submodel: usize = rest
                .parse()
                .map_err(|_| RenderError::malformed(name, "bad inline model index"))?;
            (ModelKind::Inline(submodel), Vec::new())
        } else if name.ends_with(".md2") {
            let data = vfs.open(name).map_err(|e| RenderError::from_vfs(name, e))?;
            let model = md2::load(&data).map_err(|e| RenderError::from_md2(name, e))?;
            let skins = model
                .skin_names
                .iter()
                .map(|skin| images.find(vfs, palette, skin, ImageKind::Skin))
                .collect();
            (ModelKind::Alias(model), skins)
        } else if name.ends_with(".sp2") {
            let data = vfs.open(name).map_err(|e| RenderError::from_vfs(name, e))?;
            let model = sp2::load(&data).map_err(|e| RenderError::from_sp2(name, e))?;
            let skins = model
                .frames
                .iter()
                .map(|frame| images.find(vfs, palette, &frame.image_name, ImageKind::Sprite))
                .collect();
            (ModelKind::Sprite(model), skins)
        } else {
            return Err(RenderError::malformed(name, "unknown model extension"));
        };

        let model_ref = self.insert(Model {
            name: name.to_owned(),
            kind,
            registration_sequence: self.registration_sequence,
            skins,
        });
        self.by_name.insert(name.to_owned(), model_ref.0);
        Ok(model_ref)
    }

    fn insert(&mut self, model: Model) -> ModelRef {
        for (index, slot) in self.models.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(model);
                return ModelRef(index);
            }
        }
        self.models.push(Some(model));
        ModelRef(self.models.len() - 1)
    }

    /// Frees models whose registration sequence is stale.
    pub fn sweep(&mut self) {
        let current = self.registration_sequence;
        let nomodel = self.nomodel.0;

        for (index, slot) in self.models.iter_mut().enumerate() {
            let stale = match slot {
                Some(model) => index != nomodel && model.registration_sequence != current,
                None => false,
            };

            if stale {
                let model = slot.take().unwrap();
                debug!("freeing model {}", model.name);
                self.by_name.remove(&model.name);
            }
        }
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        ModelCache::new()
    }
}

/// The stand-in for models that failed to load: a 16-unit cube rendered with
/// the placeholder texture, visibly wrong but harmless.
fn placeholder_cube() -> Md2Model {
    use cgmath::Vector3;

    let corners: Vec<FrameVertex> = (0..8)
        .map(|i| FrameVertex {
            pos_q: [
                if i & 1 != 0 { 255 } else { 0 },
                if i & 2 != 0 { 255 } else { 0 },
                if i & 4 != 0 { 255 } else { 0 },
            ],
            normal_idx: 0,
        })
        .collect();

    let quads = [
        [0, 1, 3, 2],
        [4, 6, 7, 5],
        [0, 4, 5, 1],
        [2, 3, 7, 6],
        [0, 2, 6, 4],
        [1, 5, 7, 3],
    ];

    let triangles = quads
        .iter()
        .flat_map(|&[a, b, c, d]| {
            [
                md2::Triangle {
                    vertex_ids: [a, b, c],
                    texcoord_ids: [0, 0, 0],
                },
                md2::Triangle {
                    vertex_ids: [a, c, d],
                    texcoord_ids: [0, 0, 0],
                },
            ]
        })
        .collect();

    Md2Model {
        skin_width: 1,
        skin_height: 1,
        skin_names: Vec::new(),
        texcoords: vec![[0, 0]],
        triangles,
        frames: vec![md2::Frame {
            name: "cube".to_owned(),
            scale: Vector3::new(16.0 / 255.0, 16.0 / 255.0, 16.0 / 255.0),
            translate: Vector3::new(-8.0, -8.0, -8.0),
            vertices: corners,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::render::image::ImageParams;

    #[test]
    fn test_missing_model_substitutes_placeholder() {
        let mut models = ModelCache::new();
        let mut images = ImageCache::new(ImageParams::default());
        let vfs = Vfs::new();
        let palette = Palette::from_rgb([[0; 3]; 256]);

        let r = models.register(&vfs, &palette, &mut images, "models/missing.md2");
        assert_eq!(r, models.nomodel());
    }

    #[test]
    fn test_inline_model() {
        let mut models = ModelCache::new();
        let mut images = ImageCache::new(ImageParams::default());
        let vfs = Vfs::new();
        let palette = Palette::from_rgb([[0; 3]; 256]);

        let r = models.register(&vfs, &palette, &mut images, "*3");
        match &models.get(r).unwrap().kind {
            ModelKind::Inline(3) => (),
            _ => panic!("expected inline submodel 3"),
        }
    }

    #[test]
    fn test_sweep_frees_stale() {
        let mut models = ModelCache::new();
        let mut images = ImageCache::new(ImageParams::default());
        let vfs = Vfs::new();
        let palette = Palette::from_rgb([[0; 3]; 256]);

        models.register(&vfs, &palette, &mut images, "*1");
        let before = models.len();

        models.begin_registration();
        models.sweep();
        assert_eq!(models.len(), before - 1);

        models.sweep();
        assert_eq!(models.len(), before - 1);
    }
}
