use std::path::{Path, PathBuf};

use crate::atomicfile;
use crate::errors::{Result, StoreError};
use crate::id::generate_id;
use crate::lock::Lockfile;
use crate::types::Image;

use super::Indices;

/// The registry of named, immutable images, each rooted at a layer.
pub struct ImageStore {
    json_path: PathBuf,
    lock: Lockfile,
    images: Vec<Image>,
    indices: Indices,
}

impl ImageStore {
    pub fn new(graph_root: &Path) -> Result<ImageStore> {
        std::fs::create_dir_all(graph_root)?;
        let json_path = graph_root.join("images.json");
        let lock = Lockfile::open(graph_root.join("images.lock"))?;
        let images = load_images(&json_path)?;
        let indices = build_indices(&images);
        Ok(ImageStore {
            json_path,
            lock,
            images,
            indices,
        })
    }

    pub fn lock_store(&mut self) -> Result<crate::lock::LockGuard<'_>> {
        self.lock.guard()
    }

    pub fn reload_if_modified(&mut self) -> Result<()> {
        if self.lock.modified()? {
            self.images = load_images(&self.json_path)?;
            self.indices = build_indices(&self.images);
            tracing::debug!("image store reloaded after external modification");
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.images)?;
        atomicfile::write_atomic(&self.json_path, &bytes)?;
        self.lock.touch()?;
        Ok(())
    }

    fn resolve(&self, id_or_name: &str) -> Option<usize> {
        self.indices
            .by_id
            .get(id_or_name)
            .or_else(|| self.indices.by_name.get(id_or_name))
            .copied()
    }

    pub fn exists(&self, id_or_name: &str) -> bool {
        self.resolve(id_or_name).is_some()
    }

    pub fn get(&self, id_or_name: &str) -> Result<&Image> {
        self.resolve(id_or_name)
            .map(|pos| &self.images[pos])
            .ok_or_else(|| StoreError::ImageUnknown(id_or_name.to_string()))
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn create_image(
        &mut self,
        id: Option<String>,
        top_layer: String,
        names: Vec<String>,
    ) -> Result<Image> {
        let id = match id {
            Some(id) => {
                if self.indices.by_id.contains_key(&id) {
                    return Err(StoreError::DuplicateId(id));
                }
                id
            }
            None => loop {
                let candidate = generate_id();
                if !self.indices.by_id.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        for name in &names {
            if self.indices.by_name.contains_key(name) {
                return Err(StoreError::DuplicateName(name.clone()));
            }
        }

        let mut image = Image::new(id, top_layer);
        image.names = names;

        let pos = self.images.len();
        self.indices.by_id.insert(image.id.clone(), pos);
        for name in &image.names {
            self.indices.by_name.insert(name.clone(), pos);
        }
        self.images.push(image.clone());
        self.persist()?;
        Ok(image)
    }

    /// Remove an image's metadata. Absent ids are treated as
    /// already-deleted, not an error.
    pub fn delete_image(&mut self, id_or_name: &str) -> Result<()> {
        let pos = match self.resolve(id_or_name) {
            Some(pos) => pos,
            None => return Ok(()),
        };
        self.images.remove(pos);
        self.indices = build_indices(&self.images);
        self.persist()
    }

    pub fn set_names(&mut self, id_or_name: &str, names: Vec<String>) -> Result<()> {
        let target_id = self.get(id_or_name)?.id.clone();
        for name in &names {
            if let Some(&pos) = self.indices.by_name.get(name) {
                if self.images[pos].id != target_id {
                    return Err(StoreError::DuplicateName(name.clone()));
                }
            }
        }
        let pos = self.resolve(id_or_name).unwrap();
        self.images[pos].names = names;
        self.indices = build_indices(&self.images);
        self.persist()
    }

    /// Replace an image's opaque caller-supplied metadata string.
    pub fn set_metadata(&mut self, id_or_name: &str, metadata: String) -> Result<()> {
        let pos = self
            .resolve(id_or_name)
            .ok_or_else(|| StoreError::ImageUnknown(id_or_name.to_string()))?;
        self.images[pos].metadata = metadata;
        self.persist()
    }

    /// Delete every image's metadata. Succeeds trivially on an empty store.
    pub fn wipe(&mut self) -> Result<()> {
        self.images.clear();
        self.indices = build_indices(&self.images);
        self.persist()
    }
}

fn load_images(path: &Path) -> Result<Vec<Image>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = std::fs::read(path)?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(&bytes)?)
}

fn build_indices(images: &[Image]) -> Indices {
    Indices::build(
        images
            .iter()
            .enumerate()
            .map(|(pos, i)| (pos, i.id.as_str(), i.names.as_slice())),
    )
}
