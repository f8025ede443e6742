//! # container-storage
//!
//! A local, layered container storage engine: a content-addressed layer
//! forest backed by a pluggable copy-on-write graph driver, two metadata
//! registries built on top of it (images, containers), and a coordinator
//! (the [`mall::Mall`]) that keeps invariants consistent across all three
//! when multiple processes touch the same storage root concurrently.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │                   Mall                     │
//! │   fixed lock order: layers -> images       │
//! │              -> containers                 │
//! └───────────────────────────────────────────┘
//!        │              │              │
//!   LayerStore      ImageStore    ContainerStore
//!        │
//!   GraphDriver (vfs today; overlay/btrfs/zfs pluggable)
//! ```

pub mod atomicfile;
pub mod drivers;
pub mod errors;
pub mod id;
pub mod lock;
pub mod mall;
pub mod stores;
pub mod types;

pub use drivers::{Change, DriverKind, GraphDriver, VfsDriver};
pub use errors::{Result, StoreError};
pub use mall::{Mall, MallOptions};
pub use stores::{ContainerStore, ImageStore, LayerStore};
pub use types::{Container, Image, Layer};

/// Version of this storage engine's on-disk layout.
pub const VERSION: &str = "0.1.0";
