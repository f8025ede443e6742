//! Graph driver contract and implementations.
//!
//! A `GraphDriver` owns the on-disk representation of layer content: it
//! decides how a child layer's filesystem relates to its parent's (copy,
//! overlay, snapshot, ...) and exposes that relationship as tar-stream
//! changesets so the rest of the engine never has to know which strategy
//! is in use.

mod tardiff;
mod vfs;

pub use tardiff::{apply_diff, changes, diff, diff_size, Change};
pub use vfs::VfsDriver;

use std::io::{Read, Write};
use std::path::PathBuf;

use crate::errors::Result;

/// Which concrete `GraphDriver` a [`crate::mall::Mall`] should construct.
/// New backends (overlay, btrfs, zfs, devicemapper) are added here as a new
/// variant plus a matching `GraphDriver` impl, registered in the one
/// `match` in `Mall::new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Vfs,
}

/// Copy-on-write storage backend for layer content.
///
/// Implementations must be safe to share across threads: the stores call
/// through a driver instance while holding only their own lock, not a
/// driver-private one, so internal mutability has to be handled with
/// interior synchronization.
pub trait GraphDriver: Send + Sync {
    /// Materialize a new read-only layer, optionally as a child of `parent`.
    fn create(&self, id: &str, parent: Option<&str>, mount_label: &str) -> Result<()>;

    /// Materialize a new writeable layer as a child of `parent`.
    fn create_read_write(&self, id: &str, parent: Option<&str>, mount_label: &str) -> Result<()>;

    /// Remove a layer's on-disk content. The caller has already verified no
    /// other layer, image, or container references it.
    fn remove(&self, id: &str) -> Result<()>;

    /// Increment the layer's reference count and return its mount point,
    /// mounting it if this is the first outstanding reference.
    fn get(&self, id: &str, mount_label: &str) -> Result<PathBuf>;

    /// Decrement the layer's reference count, unmounting once it reaches
    /// zero.
    fn put(&self, id: &str) -> Result<()>;

    /// Whether the driver has on-disk content for `id`.
    fn exists(&self, id: &str) -> bool;

    /// Write the tar changeset between `id` and `parent` (or between `id`
    /// and an empty tree if `parent` is `None`) to `writer`.
    fn diff(&self, id: &str, parent: Option<&str>, writer: &mut dyn Write) -> Result<()>;

    /// The same changeset as [`GraphDriver::diff`], structured instead of
    /// serialized.
    fn layer_changes(&self, id: &str, parent: Option<&str>) -> Result<Vec<Change>>;

    /// Apply a tar changeset (as produced by [`GraphDriver::diff`]) onto an
    /// existing layer's content. Returns the number of bytes extracted.
    fn apply_diff(&self, id: &str, reader: &mut dyn Read) -> Result<u64>;

    /// The byte size [`GraphDriver::diff`] would produce, without building
    /// the stream.
    fn diff_size(&self, id: &str, parent: Option<&str>) -> Result<u64>;

    /// Driver-specific key/value status pairs, for diagnostics (e.g. the
    /// backing store root, backend version).
    fn status(&self) -> Result<Vec<(String, String)>>;

    /// Release any resources the driver holds that are not tied to a
    /// specific layer (e.g. cached mount state), called when a store
    /// shuts down. Outstanding per-layer `get`/`put` refcounts are
    /// dropped, not unmounted gracefully - callers should ensure nothing
    /// still has a layer checked out before calling this.
    fn cleanup(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_kind_equality() {
        assert_eq!(DriverKind::Vfs, DriverKind::Vfs);
    }
}
