//! Data model shared by the three metadata stores.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A single node in the layer forest: content-addressed, append-only
/// parentage, materialized on disk by a [`crate::drivers::GraphDriver`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Layer {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub mount_label: String,
    #[serde(default)]
    pub writeable: bool,
    #[serde(default = "now_unix_secs")]
    pub created: i64,
}

impl Layer {
    pub fn new(id: String, parent: Option<String>, writeable: bool, mount_label: String) -> Layer {
        Layer {
            id,
            names: Vec::new(),
            parent,
            metadata: String::new(),
            mount_label,
            writeable,
            created: now_unix_secs(),
        }
    }
}

/// A named, immutable root layer plus caller-supplied metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    pub top_layer: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default = "now_unix_secs")]
    pub created: i64,
}

impl Image {
    pub fn new(id: String, top_layer: String) -> Image {
        Image {
            id,
            names: Vec::new(),
            top_layer,
            metadata: String::new(),
            created: now_unix_secs(),
        }
    }
}

/// A writeable layer bound to an image, plus the caller's bookkeeping
/// metadata (labels, mount point preference, etc.).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    pub image_id: String,
    pub layer_id: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default = "now_unix_secs")]
    pub created: i64,
}

impl Container {
    pub fn new(id: String, image_id: String, layer_id: String) -> Container {
        Container {
            id,
            names: Vec::new(),
            image_id,
            layer_id,
            metadata: String::new(),
            created: now_unix_secs(),
        }
    }
}
