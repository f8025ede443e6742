use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::atomicfile;
use crate::drivers::{Change, GraphDriver};
use crate::errors::{Result, StoreError};
use crate::id::generate_id;
use crate::lock::Lockfile;
use crate::types::Layer;

use super::Indices;

/// The content-addressed layer forest and its backing graph driver.
pub struct LayerStore {
    json_path: PathBuf,
    lock: Lockfile,
    driver: Arc<dyn GraphDriver>,
    layers: Vec<Layer>,
    indices: Indices,
    diffsize_cache: Mutex<HashMap<(String, String), u64>>,
}

impl LayerStore {
    pub fn new(graph_root: &Path, driver: Arc<dyn GraphDriver>) -> Result<LayerStore> {
        std::fs::create_dir_all(graph_root)?;
        let json_path = graph_root.join("layers.json");
        let lock = Lockfile::open(graph_root.join("layers.lock"))?;
        let layers = load_layers(&json_path)?;
        let indices = build_indices(&layers);
        Ok(LayerStore {
            json_path,
            lock,
            driver,
            layers,
            indices,
            diffsize_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn lock_store(&mut self) -> Result<crate::lock::LockGuard<'_>> {
        self.lock.guard()
    }

    /// Reload from disk if another process has touched this store since
    /// this holder last looked.
    pub fn reload_if_modified(&mut self) -> Result<()> {
        if self.lock.modified()? {
            self.layers = load_layers(&self.json_path)?;
            self.indices = build_indices(&self.layers);
            self.diffsize_cache.lock().unwrap().clear();
            tracing::debug!("layer store reloaded after external modification");
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.layers)?;
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

    pub fn get(&self, id_or_name: &str) -> Result<&Layer> {
        self.resolve(id_or_name)
            .map(|pos| &self.layers[pos])
            .ok_or_else(|| StoreError::LayerUnknown(id_or_name.to_string()))
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_layer(
        &mut self,
        id: Option<String>,
        parent: Option<&str>,
        names: Vec<String>,
        writeable: bool,
        mount_label: String,
    ) -> Result<Layer> {
        let parent_id = match parent {
            Some(p) => {
                let layer = self.get(p)?;
                Some(layer.id.clone())
            }
            None => None,
        };

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

        if writeable {
            self.driver
                .create_read_write(&id, parent_id.as_deref(), &mount_label)
                .map_err(|e| StoreError::Driver(e.to_string()))?;
        } else {
            self.driver
                .create(&id, parent_id.as_deref(), &mount_label)
                .map_err(|e| StoreError::Driver(e.to_string()))?;
        }

        let mut layer = Layer::new(id.clone(), parent_id, writeable, mount_label);
        layer.names = names;

        let pos = self.layers.len();
        self.indices.by_id.insert(layer.id.clone(), pos);
        for name in &layer.names {
            self.indices.by_name.insert(name.clone(), pos);
        }
        self.layers.push(layer.clone());
        self.persist()?;
        Ok(layer)
    }

    /// Remove a layer's metadata and driver content. Callers (the Mall)
    /// are responsible for verifying no image or container still
    /// references it. Absent ids are treated as already-deleted, not an
    /// error.
    pub fn delete_layer(&mut self, id_or_name: &str) -> Result<()> {
        let pos = match self.resolve(id_or_name) {
            Some(pos) => pos,
            None => return Ok(()),
        };
        let layer = self.layers[pos].clone();

        self.driver
            .remove(&layer.id)
            .map_err(|e| StoreError::Driver(e.to_string()))?;

        self.layers.remove(pos);
        self.indices = build_indices(&self.layers);
        self.diffsize_cache
            .lock()
            .unwrap()
            .retain(|(a, b), _| *a != layer.id && *b != layer.id);
        self.persist()?;
        Ok(())
    }

    pub fn set_names(&mut self, id_or_name: &str, names: Vec<String>) -> Result<()> {
        for name in &names {
            if let Some(&pos) = self.indices.by_name.get(name) {
                if self.layers[pos].id != self.get(id_or_name)?.id {
                    return Err(StoreError::DuplicateName(name.clone()));
                }
            }
        }
        let pos = self
            .resolve(id_or_name)
            .ok_or_else(|| StoreError::LayerUnknown(id_or_name.to_string()))?;
        self.layers[pos].names = names;
        self.indices = build_indices(&self.layers);
        self.persist()
    }

    /// Replace a layer's opaque caller-supplied metadata string.
    pub fn set_metadata(&mut self, id_or_name: &str, metadata: String) -> Result<()> {
        let pos = self
            .resolve(id_or_name)
            .ok_or_else(|| StoreError::LayerUnknown(id_or_name.to_string()))?;
        self.layers[pos].metadata = metadata;
        self.persist()
    }

    /// Mount the layer, returning its filesystem path. Each call increments
    /// a reference count; callers must call [`LayerStore::unmount`] the
    /// same number of times.
    pub fn mount(&self, id_or_name: &str) -> Result<PathBuf> {
        let layer = self.get(id_or_name)?;
        self.driver
            .get(&layer.id, &layer.mount_label)
            .map_err(|e| StoreError::Driver(e.to_string()))
    }

    /// Decrement a layer's mount reference count, unmounting once it
    /// reaches zero.
    pub fn unmount(&self, id_or_name: &str) -> Result<()> {
        let layer = self.get(id_or_name)?;
        self.driver
            .put(&layer.id)
            .map_err(|e| StoreError::Driver(e.to_string()))
    }

    /// Delete every layer's metadata and driver content. Succeeds
    /// trivially on an empty store.
    pub fn wipe(&mut self) -> Result<()> {
        let ids: Vec<String> = self.layers.iter().map(|l| l.id.clone()).collect();
        for id in ids {
            self.driver
                .remove(&id)
                .map_err(|e| StoreError::Driver(e.to_string()))?;
        }
        self.layers.clear();
        self.indices = build_indices(&self.layers);
        self.diffsize_cache.lock().unwrap().clear();
        self.persist()
    }

    pub fn changes(&self, id_or_name: &str) -> Result<Vec<Change>> {
        let layer = self.get(id_or_name)?;
        self.driver
            .layer_changes(&layer.id, layer.parent.as_deref())
            .map_err(|e| StoreError::Driver(e.to_string()))
    }

    pub fn diff<W: Write>(&self, id_or_name: &str, writer: &mut W) -> Result<()> {
        let layer = self.get(id_or_name)?;
        self.driver
            .diff(&layer.id, layer.parent.as_deref(), writer)
            .map_err(|e| StoreError::Driver(e.to_string()))
    }

    pub fn apply_diff<R: Read>(&self, id_or_name: &str, reader: &mut R) -> Result<u64> {
        let layer = self.get(id_or_name)?;
        self.driver
            .apply_diff(&layer.id, reader)
            .map_err(|e| StoreError::Driver(e.to_string()))
    }

    pub fn diff_size(&self, id_or_name: &str) -> Result<u64> {
        let layer = self.get(id_or_name)?;
        let key = (
            layer.id.clone(),
            layer.parent.clone().unwrap_or_default(),
        );
        if let Some(size) = self.diffsize_cache.lock().unwrap().get(&key) {
            return Ok(*size);
        }
        let size = self
            .driver
            .diff_size(&layer.id, layer.parent.as_deref())
            .map_err(|e| StoreError::Driver(e.to_string()))?;
        self.diffsize_cache.lock().unwrap().insert(key, size);
        Ok(size)
    }
}

fn load_layers(path: &Path) -> Result<Vec<Layer>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = std::fs::read(path)?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(&bytes)?)
}

fn build_indices(layers: &[Layer]) -> Indices {
    Indices::build(
        layers
            .iter()
            .enumerate()
            .map(|(pos, l)| (pos, l.id.as_str(), l.names.as_slice())),
    )
}
