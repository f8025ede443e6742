//! JSON-backed metadata registries: layers, images, and containers.
//!
//! Each store keeps its records in a `Vec<T>` plus two `HashMap<String,
//! usize>` indices (by id, by name) holding positions into that vector, so
//! the vector stays the single owner of the data and the indices are
//! trivially rebuilt from it on load.

pub mod container_store;
pub mod image_store;
pub mod layer_store;

pub use container_store::ContainerStore;
pub use image_store::ImageStore;
pub use layer_store::LayerStore;

use std::collections::HashMap;

/// Positional indices into a `Vec<T>`, rebuilt from scratch every time the
/// backing vector is reloaded from disk.
pub(crate) struct Indices {
    pub by_id: HashMap<String, usize>,
    pub by_name: HashMap<String, usize>,
}

impl Indices {
    pub(crate) fn build<'a, I>(rows: I) -> Indices
    where
        I: IntoIterator<Item = (usize, &'a str, &'a [String])>,
    {
        let mut by_id = HashMap::new();
        let mut by_name = HashMap::new();
        for (pos, id, names) in rows {
            by_id.insert(id.to_string(), pos);
            for name in names {
                by_name.insert(name.clone(), pos);
            }
        }
        Indices { by_id, by_name }
    }
}
