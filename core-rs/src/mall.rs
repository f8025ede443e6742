//! The Mall: coordinates the layer, image, and container stores so that
//! cross-store invariants (an image's top layer exists, a container's
//! image and layer exist, nothing in use gets deleted out from under its
//! owner) hold even though each store persists independently.
//!
//! Locks are always acquired in the fixed order layers -> images ->
//! containers, across every multi-store operation, to avoid deadlocks
//! between concurrent Mall instances.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::drivers::{Change, DriverKind, GraphDriver, VfsDriver};
use crate::errors::{Result, StoreError};
use crate::stores::{ContainerStore, ImageStore, LayerStore};
use crate::types::{Container, Image, Layer};

pub struct MallOptions {
    pub graph_root: PathBuf,
    pub driver_kind: DriverKind,
}

impl MallOptions {
    pub fn new(graph_root: PathBuf) -> MallOptions {
        MallOptions {
            graph_root,
            driver_kind: DriverKind::Vfs,
        }
    }
}

pub struct Mall {
    layers: LayerStore,
    images: ImageStore,
    containers: ContainerStore,
}

impl Mall {
    pub fn new(options: MallOptions) -> Result<Mall> {
        let driver: Arc<dyn GraphDriver> = match options.driver_kind {
            DriverKind::Vfs => Arc::new(VfsDriver::new(options.graph_root.clone())?),
        };
        Ok(Mall {
            layers: LayerStore::new(&options.graph_root, driver)?,
            images: ImageStore::new(&options.graph_root)?,
            containers: ContainerStore::new(&options.graph_root)?,
        })
    }

    pub fn layers(&self) -> &LayerStore {
        &self.layers
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub fn containers(&self) -> &ContainerStore {
        &self.containers
    }

    pub fn create_layer(
        &mut self,
        id: Option<String>,
        parent: Option<&str>,
        names: Vec<String>,
        writeable: bool,
        mount_label: String,
    ) -> Result<Layer> {
        let _guard = self.layers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.layers
            .create_layer(id, parent, names, writeable, mount_label)
    }

    pub fn delete_layer(&mut self, id_or_name: &str) -> Result<()> {
        let _layers_guard = self.layers.lock_store()?;
        let _images_guard = self.images.lock_store()?;
        let _containers_guard = self.containers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.images.reload_if_modified()?;
        self.containers.reload_if_modified()?;

        if !self.layers.exists(id_or_name) {
            return Ok(());
        }
        let layer_id = self.layers.get(id_or_name)?.id.clone();

        if self
            .images
            .images()
            .iter()
            .any(|i| i.top_layer == layer_id)
        {
            return Err(StoreError::LayerUsedByImage(layer_id));
        }
        if self.containers.any_references_layer(&layer_id) {
            return Err(StoreError::LayerUsedByContainer(layer_id));
        }

        self.layers.delete_layer(&layer_id)
    }

    pub fn create_image(
        &mut self,
        id: Option<String>,
        top_layer: &str,
        names: Vec<String>,
    ) -> Result<Image> {
        let _layers_guard = self.layers.lock_store()?;
        let _images_guard = self.images.lock_store()?;
        self.layers.reload_if_modified()?;
        self.images.reload_if_modified()?;

        let layer_id = self.layers.get(top_layer)?.id.clone();
        self.images.create_image(id, layer_id, names)
    }

    pub fn delete_image(&mut self, id_or_name: &str) -> Result<()> {
        let _images_guard = self.images.lock_store()?;
        let _containers_guard = self.containers.lock_store()?;
        self.images.reload_if_modified()?;
        self.containers.reload_if_modified()?;

        if !self.images.exists(id_or_name) {
            return Ok(());
        }
        let image_id = self.images.get(id_or_name)?.id.clone();
        if self.containers.any_references_image(&image_id) {
            return Err(StoreError::ImageUsedByContainer(image_id));
        }
        self.images.delete_image(&image_id)
    }

    /// Create a container: a fresh writeable layer as a child of the
    /// image's top layer, bound to a new container record. If the
    /// container record fails to persist after the layer was already
    /// created, the layer is deleted to compensate; if that compensating
    /// delete also fails, both errors are reported via
    /// [`StoreError::Compound`].
    pub fn create_container(
        &mut self,
        id: Option<String>,
        image_id_or_name: &str,
        names: Vec<String>,
        mount_label: String,
    ) -> Result<Container> {
        let _layers_guard = self.layers.lock_store()?;
        let _images_guard = self.images.lock_store()?;
        let _containers_guard = self.containers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.images.reload_if_modified()?;
        self.containers.reload_if_modified()?;

        let image = self.images.get(image_id_or_name)?.clone();

        let layer = self.layers.create_layer(
            None,
            Some(&image.top_layer),
            vec![],
            true,
            mount_label,
        )?;

        match self
            .containers
            .create_container(id, image.id.clone(), layer.id.clone(), names)
        {
            Ok(container) => Ok(container),
            Err(primary) => match self.layers.delete_layer(&layer.id) {
                Ok(()) => Err(primary),
                Err(rollback) => Err(StoreError::with_rollback_failure(primary, rollback)),
            },
        }
    }

    pub fn delete_container(&mut self, id_or_name: &str) -> Result<()> {
        let _layers_guard = self.layers.lock_store()?;
        let _containers_guard = self.containers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.containers.reload_if_modified()?;

        if !self.containers.exists(id_or_name) {
            return Ok(());
        }
        let container = self.containers.get(id_or_name)?.clone();
        self.containers.delete_container(&container.id)?;
        self.layers.delete_layer(&container.layer_id)
    }

    /// Mount a layer, returning its filesystem path.
    pub fn mount(&mut self, id_or_name: &str) -> Result<PathBuf> {
        let _guard = self.layers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.layers.mount(id_or_name)
    }

    /// Unmount a layer previously mounted with [`Mall::mount`].
    pub fn unmount(&mut self, id_or_name: &str) -> Result<()> {
        let _guard = self.layers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.layers.unmount(id_or_name)
    }

    /// The structured changeset between a layer and its parent.
    pub fn changes(&mut self, id_or_name: &str) -> Result<Vec<Change>> {
        let _guard = self.layers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.layers.changes(id_or_name)
    }

    /// Write the tar changeset between a layer and its parent to `writer`.
    pub fn diff<W: Write>(&mut self, id_or_name: &str, writer: &mut W) -> Result<()> {
        let _guard = self.layers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.layers.diff(id_or_name, writer)
    }

    /// The byte size [`Mall::diff`] would produce, without building the
    /// stream.
    pub fn diff_size(&mut self, id_or_name: &str) -> Result<u64> {
        let _guard = self.layers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.layers.diff_size(id_or_name)
    }

    /// Apply a tar changeset (as produced by [`Mall::diff`]) onto a layer.
    pub fn apply_diff<R: Read>(&mut self, id_or_name: &str, reader: &mut R) -> Result<u64> {
        let _guard = self.layers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.layers.apply_diff(id_or_name, reader)
    }

    pub fn set_layer_metadata(&mut self, id_or_name: &str, metadata: String) -> Result<()> {
        let _guard = self.layers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.layers.set_metadata(id_or_name, metadata)
    }

    pub fn set_image_metadata(&mut self, id_or_name: &str, metadata: String) -> Result<()> {
        let _guard = self.images.lock_store()?;
        self.images.reload_if_modified()?;
        self.images.set_metadata(id_or_name, metadata)
    }

    pub fn set_container_metadata(&mut self, id_or_name: &str, metadata: String) -> Result<()> {
        let _guard = self.containers.lock_store()?;
        self.containers.reload_if_modified()?;
        self.containers.set_metadata(id_or_name, metadata)
    }

    /// Delete every layer. Fails if any image or container still
    /// references one.
    pub fn wipe_layers(&mut self) -> Result<()> {
        let _layers_guard = self.layers.lock_store()?;
        let _images_guard = self.images.lock_store()?;
        let _containers_guard = self.containers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.images.reload_if_modified()?;
        self.containers.reload_if_modified()?;

        if let Some(image) = self.images.images().first() {
            return Err(StoreError::LayerUsedByImage(image.top_layer.clone()));
        }
        if let Some(container) = self.containers.containers().first() {
            return Err(StoreError::LayerUsedByContainer(container.layer_id.clone()));
        }
        self.layers.wipe()
    }

    /// Delete every image. Fails if any container still references one.
    pub fn wipe_images(&mut self) -> Result<()> {
        let _images_guard = self.images.lock_store()?;
        let _containers_guard = self.containers.lock_store()?;
        self.images.reload_if_modified()?;
        self.containers.reload_if_modified()?;

        if let Some(container) = self.containers.containers().first() {
            return Err(StoreError::ImageUsedByContainer(container.image_id.clone()));
        }
        self.images.wipe()
    }

    /// Delete every container, along with the writeable layer each owns.
    pub fn wipe_containers(&mut self) -> Result<()> {
        let _layers_guard = self.layers.lock_store()?;
        let _containers_guard = self.containers.lock_store()?;
        self.layers.reload_if_modified()?;
        self.containers.reload_if_modified()?;

        let layer_ids: Vec<String> = self
            .containers
            .containers()
            .iter()
            .map(|c| c.layer_id.clone())
            .collect();
        self.containers.wipe()?;
        for layer_id in layer_ids {
            self.layers.delete_layer(&layer_id)?;
        }
        Ok(())
    }

    pub fn get_layer(&self, id_or_name: &str) -> Result<&Layer> {
        self.layers.get(id_or_name)
    }

    pub fn get_image(&self, id_or_name: &str) -> Result<&Image> {
        self.images.get(id_or_name)
    }

    pub fn get_container(&self, id_or_name: &str) -> Result<&Container> {
        self.containers.get(id_or_name)
    }

    pub fn layer_exists(&self, id_or_name: &str) -> bool {
        self.layers.exists(id_or_name)
    }

    pub fn image_exists(&self, id_or_name: &str) -> bool {
        self.images.exists(id_or_name)
    }

    pub fn container_exists(&self, id_or_name: &str) -> bool {
        self.containers.exists(id_or_name)
    }
}
