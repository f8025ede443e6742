use std::path::{Path, PathBuf};

use crate::atomicfile;
use crate::errors::{Result, StoreError};
use crate::id::generate_id;
use crate::lock::Lockfile;
use crate::types::Container;

use super::Indices;

/// The registry of containers, each a writeable layer bound to an image.
pub struct ContainerStore {
    json_path: PathBuf,
    lock: Lockfile,
    containers: Vec<Container>,
    indices: Indices,
}

impl ContainerStore {
    pub fn new(graph_root: &Path) -> Result<ContainerStore> {
        std::fs::create_dir_all(graph_root)?;
        let json_path = graph_root.join("containers.json");
        let lock = Lockfile::open(graph_root.join("containers.lock"))?;
        let containers = load_containers(&json_path)?;
        let indices = build_indices(&containers);
        Ok(ContainerStore {
            json_path,
            lock,
            containers,
            indices,
        })
    }

    pub fn lock_store(&mut self) -> Result<crate::lock::LockGuard<'_>> {
        self.lock.guard()
    }

    pub fn reload_if_modified(&mut self) -> Result<()> {
        if self.lock.modified()? {
            self.containers = load_containers(&self.json_path)?;
            self.indices = build_indices(&self.containers);
            tracing::debug!("container store reloaded after external modification");
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.containers)?;
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

    pub fn get(&self, id_or_name: &str) -> Result<&Container> {
        self.resolve(id_or_name)
            .map(|pos| &self.containers[pos])
            .ok_or_else(|| StoreError::ContainerUnknown(id_or_name.to_string()))
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    /// True if any container currently references `image_id`.
    pub fn any_references_image(&self, image_id: &str) -> bool {
        self.containers.iter().any(|c| c.image_id == image_id)
    }

    /// True if any container currently uses `layer_id` as its writeable
    /// top layer.
    pub fn any_references_layer(&self, layer_id: &str) -> bool {
        self.containers.iter().any(|c| c.layer_id == layer_id)
    }

    pub fn create_container(
        &mut self,
        id: Option<String>,
        image_id: String,
        layer_id: String,
        names: Vec<String>,
    ) -> Result<Container> {
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

        let mut container = Container::new(id, image_id, layer_id);
        container.names = names;

        let pos = self.containers.len();
        self.indices.by_id.insert(container.id.clone(), pos);
        for name in &container.names {
            self.indices.by_name.insert(name.clone(), pos);
        }
        self.containers.push(container.clone());
        self.persist()?;
        Ok(container)
    }

    /// Remove a container's metadata. Absent ids are treated as
    /// already-deleted, not an error.
    pub fn delete_container(&mut self, id_or_name: &str) -> Result<()> {
        let pos = match self.resolve(id_or_name) {
            Some(pos) => pos,
            None => return Ok(()),
        };
        self.containers.remove(pos);
        self.indices = build_indices(&self.containers);
        self.persist()
    }

    pub fn set_names(&mut self, id_or_name: &str, names: Vec<String>) -> Result<()> {
        let target_id = self.get(id_or_name)?.id.clone();
        for name in &names {
            if let Some(&pos) = self.indices.by_name.get(name) {
                if self.containers[pos].id != target_id {
                    return Err(StoreError::DuplicateName(name.clone()));
                }
            }
        }
        let pos = self.resolve(id_or_name).unwrap();
        self.containers[pos].names = names;
        self.indices = build_indices(&self.containers);
        self.persist()
    }

    /// Replace a container's opaque caller-supplied metadata string.
    pub fn set_metadata(&mut self, id_or_name: &str, metadata: String) -> Result<()> {
        let pos = self
            .resolve(id_or_name)
            .ok_or_else(|| StoreError::ContainerUnknown(id_or_name.to_string()))?;
        self.containers[pos].metadata = metadata;
        self.persist()
    }

    /// Delete every container's metadata. Succeeds trivially on an empty
    /// store.
    pub fn wipe(&mut self) -> Result<()> {
        self.containers.clear();
        self.indices = build_indices(&self.containers);
        self.persist()
    }
}

fn load_containers(path: &Path) -> Result<Vec<Container>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = std::fs::read(path)?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(&bytes)?)
}

fn build_indices(containers: &[Container]) -> Indices {
    Indices::build(
        containers
            .iter()
            .enumerate()
            .map(|(pos, c)| (pos, c.id.as_str(), c.names.as_slice())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_container_generates_id() {
        let dir = TempDir::new().unwrap();
        let mut store = ContainerStore::new(dir.path()).unwrap();
        let container = store
            .create_container(None, "image1".to_string(), "layer1".to_string(), vec![])
            .unwrap();
        assert_eq!(container.id.len(), 64);
    }

    #[test]
    fn test_any_references_image_and_layer() {
        let dir = TempDir::new().unwrap();
        let mut store = ContainerStore::new(dir.path()).unwrap();
        store
            .create_container(None, "image1".to_string(), "layer1".to_string(), vec![])
            .unwrap();
        assert!(store.any_references_image("image1"));
        assert!(store.any_references_layer("layer1"));
        assert!(!store.any_references_image("image2"));
    }

    #[test]
    fn test_delete_container_removes_it() {
        let dir = TempDir::new().unwrap();
        let mut store = ContainerStore::new(dir.path()).unwrap();
        let container = store
            .create_container(None, "image1".to_string(), "layer1".to_string(), vec![])
            .unwrap();
        store.delete_container(&container.id).unwrap();
        assert!(!store.exists(&container.id));
    }

    #[test]
    fn test_delete_container_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = ContainerStore::new(dir.path()).unwrap();
        let container = store
            .create_container(None, "image1".to_string(), "layer1".to_string(), vec![])
            .unwrap();
        store.delete_container(&container.id).unwrap();
        store.delete_container(&container.id).unwrap();
        store.delete_container("never-existed").unwrap();
    }

    #[test]
    fn test_set_metadata_persists() {
        let dir = TempDir::new().unwrap();
        let mut store = ContainerStore::new(dir.path()).unwrap();
        let container = store
            .create_container(None, "image1".to_string(), "layer1".to_string(), vec![])
            .unwrap();
        store
            .set_metadata(&container.id, "note".to_string())
            .unwrap();
        assert_eq!(store.get(&container.id).unwrap().metadata, "note");
    }

    #[test]
    fn test_wipe_clears_store() {
        let dir = TempDir::new().unwrap();
        let mut store = ContainerStore::new(dir.path()).unwrap();
        store
            .create_container(None, "image1".to_string(), "layer1".to_string(), vec![])
            .unwrap();
        store.wipe().unwrap();
        assert!(store.containers().is_empty());
    }

    #[test]
    fn test_wipe_on_empty_store_succeeds() {
        let dir = TempDir::new().unwrap();
        let mut store = ContainerStore::new(dir.path()).unwrap();
        store.wipe().unwrap();
        assert!(store.containers().is_empty());
    }

    #[test]
    fn test_create_container_rejects_duplicate_name() {
        let dir = TempDir::new().unwrap();
        let mut store = ContainerStore::new(dir.path()).unwrap();
        store
            .create_container(
                None,
                "i1".to_string(),
                "l1".to_string(),
                vec!["box".to_string()],
            )
            .unwrap();
        let err = store
            .create_container(
                None,
                "i2".to_string(),
                "l2".to_string(),
                vec!["box".to_string()],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(_)));
    }
}
