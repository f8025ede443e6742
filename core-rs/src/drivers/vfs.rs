//! Reference graph driver: a plain directory tree per layer, with no
//! copy-on-write sharing. Matches the upstream project's own "vfs" driver,
//! documented there as the always-available fallback when no smarter
//! backend (overlay, btrfs, zfs, devicemapper) is usable.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use walkdir::WalkDir;

use super::{tardiff, Change, GraphDriver};
use crate::errors::{Result, StoreError};

pub struct VfsDriver {
    root: PathBuf,
    refcounts: Mutex<HashMap<String, u32>>,
}

impl VfsDriver {
    pub fn new(root: PathBuf) -> Result<VfsDriver> {
        fs::create_dir_all(root.join("vfs"))?;
        Ok(VfsDriver {
            root,
            refcounts: Mutex::new(HashMap::new()),
        })
    }

    fn layer_dir(&self, id: &str) -> PathBuf {
        self.root.join("vfs").join(id).join("diff")
    }

    fn parent_dir(&self, parent: Option<&str>) -> PathBuf {
        match parent {
            Some(id) => self.layer_dir(id),
            // Never created: tardiff treats a nonexistent tree as empty.
            None => self.root.join("vfs").join(".empty"),
        }
    }

    fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
        fs::create_dir_all(dst)?;
        if !src.exists() {
            return Ok(());
        }
        for entry in WalkDir::new(src) {
            let entry = entry.map_err(|e| StoreError::Driver(e.to_string()))?;
            if entry.path() == src {
                continue;
            }
            let rel = entry.path().strip_prefix(src).unwrap();
            let target = dst.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }
}

impl GraphDriver for VfsDriver {
    fn create(&self, id: &str, parent: Option<&str>, _mount_label: &str) -> Result<()> {
        let dst = self.layer_dir(id);
        let src = self.parent_dir(parent);
        VfsDriver::copy_tree(&src, &dst)
    }

    fn create_read_write(&self, id: &str, parent: Option<&str>, mount_label: &str) -> Result<()> {
        self.create(id, parent, mount_label)
    }

    fn remove(&self, id: &str) -> Result<()> {
        let dir = self.root.join("vfs").join(id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        self.refcounts.lock().unwrap().remove(id);
        Ok(())
    }

    fn get(&self, id: &str, _mount_label: &str) -> Result<PathBuf> {
        if !self.exists(id) {
            return Err(StoreError::Driver(format!("layer {} has no driver content", id)));
        }
        let mut counts = self.refcounts.lock().unwrap();
        *counts.entry(id.to_string()).or_insert(0) += 1;
        Ok(self.layer_dir(id))
    }

    fn put(&self, id: &str) -> Result<()> {
        let mut counts = self.refcounts.lock().unwrap();
        if let Some(count) = counts.get_mut(id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(id);
            }
        }
        Ok(())
    }

    fn exists(&self, id: &str) -> bool {
        self.layer_dir(id).exists()
    }

    fn diff(&self, id: &str, parent: Option<&str>, writer: &mut dyn Write) -> Result<()> {
        tardiff::diff(&self.parent_dir(parent), &self.layer_dir(id), writer)
    }

    fn layer_changes(&self, id: &str, parent: Option<&str>) -> Result<Vec<Change>> {
        tardiff::changes(&self.parent_dir(parent), &self.layer_dir(id))
    }

    fn apply_diff(&self, id: &str, reader: &mut dyn Read) -> Result<u64> {
        let dst = self.layer_dir(id);
        fs::create_dir_all(&dst)?;
        tardiff::apply_diff(&dst, reader)
    }

    fn diff_size(&self, id: &str, parent: Option<&str>) -> Result<u64> {
        tardiff::diff_size(&self.parent_dir(parent), &self.layer_dir(id))
    }

    fn status(&self) -> Result<Vec<(String, String)>> {
        let mounted = self
            .refcounts
            .lock()
            .unwrap()
            .values()
            .filter(|&&count| count > 0)
            .count();
        Ok(vec![
            ("Backing Filesystem".to_string(), "vfs".to_string()),
            ("Root Dir".to_string(), self.root.join("vfs").display().to_string()),
            ("Mounted Layers".to_string(), mounted.to_string()),
        ])
    }

    fn cleanup(&self) -> Result<()> {
        self.refcounts.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_exists() {
        let root = TempDir::new().unwrap();
        let driver = VfsDriver::new(root.path().to_path_buf()).unwrap();
        driver.create("l1", None, "").unwrap();
        assert!(driver.exists("l1"));
        assert!(!driver.exists("l2"));
    }

    #[test]
    fn test_create_child_inherits_parent_content() {
        let root = TempDir::new().unwrap();
        let driver = VfsDriver::new(root.path().to_path_buf()).unwrap();
        driver.create("parent", None, "").unwrap();
        fs::write(driver.layer_dir("parent").join("file.txt"), b"hi").unwrap();

        driver.create("child", Some("parent"), "").unwrap();
        assert_eq!(
            fs::read(driver.layer_dir("child").join("file.txt")).unwrap(),
            b"hi"
        );
    }

    #[test]
    fn test_get_put_refcounting() {
        let root = TempDir::new().unwrap();
        let driver = VfsDriver::new(root.path().to_path_buf()).unwrap();
        driver.create("l1", None, "").unwrap();

        driver.get("l1", "").unwrap();
        driver.get("l1", "").unwrap();
        assert_eq!(*driver.refcounts.lock().unwrap().get("l1").unwrap(), 2);

        driver.put("l1").unwrap();
        assert_eq!(*driver.refcounts.lock().unwrap().get("l1").unwrap(), 1);

        driver.put("l1").unwrap();
        assert!(driver.refcounts.lock().unwrap().get("l1").is_none());
    }

    #[test]
    fn test_get_missing_layer_errors() {
        let root = TempDir::new().unwrap();
        let driver = VfsDriver::new(root.path().to_path_buf()).unwrap();
        assert!(driver.get("missing", "").is_err());
    }

    #[test]
    fn test_remove_clears_refcount_and_content() {
        let root = TempDir::new().unwrap();
        let driver = VfsDriver::new(root.path().to_path_buf()).unwrap();
        driver.create("l1", None, "").unwrap();
        driver.get("l1", "").unwrap();
        driver.remove("l1").unwrap();
        assert!(!driver.exists("l1"));
        assert!(driver.refcounts.lock().unwrap().get("l1").is_none());
    }

    #[test]
    fn test_diff_against_no_parent_sees_whole_tree() {
        let root = TempDir::new().unwrap();
        let driver = VfsDriver::new(root.path().to_path_buf()).unwrap();
        driver.create("l1", None, "").unwrap();
        fs::write(driver.layer_dir("l1").join("a.txt"), b"content").unwrap();

        let size = driver.diff_size("l1", None).unwrap();
        assert_eq!(size, 7);
    }

    #[test]
    fn test_status_reports_mounted_layers() {
        let root = TempDir::new().unwrap();
        let driver = VfsDriver::new(root.path().to_path_buf()).unwrap();
        driver.create("l1", None, "").unwrap();
        driver.get("l1", "").unwrap();

        let status = driver.status().unwrap();
        assert!(status.iter().any(|(k, v)| k == "Mounted Layers" && v == "1"));
    }

    #[test]
    fn test_cleanup_clears_refcounts() {
        let root = TempDir::new().unwrap();
        let driver = VfsDriver::new(root.path().to_path_buf()).unwrap();
        driver.create("l1", None, "").unwrap();
        driver.get("l1", "").unwrap();

        driver.cleanup().unwrap();
        assert!(driver.refcounts.lock().unwrap().is_empty());
    }
}
