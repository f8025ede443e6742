//! Advisory, cross-process file locking with change detection.
//!
//! Mirrors the `flock(LOCK_EX)`/`flock(LOCK_UN)` pairing the filesystem
//! driver uses to serialize appends to its job log, generalized into a
//! standalone primitive the stores and the Mall share. A small persisted
//! generation counter lets a holder ask "has anyone touched this store
//! since I last looked", the same question `Modified()` answers for a
//! Go `containers/storage` lock.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::errors::{Result, StoreError};

/// A file-backed advisory lock with an 8-byte little-endian generation
/// counter stored in the file itself.
pub struct Lockfile {
    path: PathBuf,
    file: std::fs::File,
    held: bool,
    baseline: u64,
}

impl Lockfile {
    /// Open (creating if necessary) the lock file at `path`. Does not
    /// acquire the lock.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Lockfile> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        Ok(Lockfile {
            path,
            file,
            held: false,
            baseline: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the exclusive lock, blocking until it is available, and
    /// snapshot the current generation counter as this holder's baseline.
    pub fn lock(&mut self) -> Result<()> {
        let fd = self.file.as_raw_fd();
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if rc != 0 {
            return Err(StoreError::Lock(format!(
                "flock({}) failed: {}",
                self.path.display(),
                std::io::Error::last_os_error()
            )));
        }
        self.held = true;
        self.baseline = self.read_counter()?;
        tracing::debug!(path = %self.path.display(), generation = self.baseline, "lock acquired");
        Ok(())
    }

    /// Release the lock.
    pub fn unlock(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        let fd = self.file.as_raw_fd();
        let rc = unsafe { libc::flock(fd, libc::LOCK_UN) };
        if rc != 0 {
            return Err(StoreError::Lock(format!(
                "unflock({}) failed: {}",
                self.path.display(),
                std::io::Error::last_os_error()
            )));
        }
        self.held = false;
        tracing::debug!(path = %self.path.display(), "lock released");
        Ok(())
    }

    /// True if the generation counter has advanced since this holder's
    /// `lock()` (or last `touch()`), meaning another process (or another
    /// lock/unlock cycle by this one) persisted a change.
    pub fn modified(&mut self) -> Result<bool> {
        let current = self.read_counter()?;
        Ok(current != self.baseline)
    }

    /// Record that this holder made a change: bump the generation counter,
    /// persist it, and adopt it as the new baseline so an immediately
    /// following `modified()` reports `false`.
    pub fn touch(&mut self) -> Result<()> {
        let next = self.baseline.wrapping_add(1);
        self.write_counter(next)?;
        self.baseline = next;
        Ok(())
    }

    fn read_counter(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.file.seek(SeekFrom::Start(0))?;
        let n = self.file.read(&mut buf)?;
        if n < 8 {
            return Ok(0);
        }
        Ok(u64::from_le_bytes(buf))
    }

    fn write_counter(&mut self, value: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&value.to_le_bytes())?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Acquire the lock and return a guard that releases it on drop, even
    /// if the holder panics mid-mutation.
    pub fn guard(&mut self) -> Result<LockGuard<'_>> {
        self.lock()?;
        Ok(LockGuard { lock: self })
    }
}

/// RAII guard returned by [`Lockfile::guard`]. Releases the lock when
/// dropped; a failure to unlock is logged rather than panicking out of a
/// drop.
pub struct LockGuard<'a> {
    lock: &'a mut Lockfile,
}

impl<'a> LockGuard<'a> {
    pub fn modified(&mut self) -> Result<bool> {
        self.lock.modified()
    }

    pub fn touch(&mut self) -> Result<()> {
        self.lock.touch()
    }
}

impl<'a> Drop for LockGuard<'a> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.unlock() {
            tracing::warn!(path = %self.lock.path.display(), error = %err, "failed to release lock on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_unlock_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut lf = Lockfile::open(dir.path().join("lock")).unwrap();
        lf.lock().unwrap();
        lf.unlock().unwrap();
    }

    #[test]
    fn test_fresh_lockfile_not_modified() {
        let dir = TempDir::new().unwrap();
        let mut lf = Lockfile::open(dir.path().join("lock")).unwrap();
        lf.lock().unwrap();
        assert!(!lf.modified().unwrap());
    }

    #[test]
    fn test_touch_then_reopen_reports_modified() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");

        let mut first = Lockfile::open(&path).unwrap();
        first.lock().unwrap();
        first.touch().unwrap();
        assert!(!first.modified().unwrap());
        first.unlock().unwrap();

        let mut second = Lockfile::open(&path).unwrap();
        second.lock().unwrap();
        assert_ne!(second.baseline, 0);
        second.unlock().unwrap();
    }

    #[test]
    fn test_touch_clears_modified_for_same_holder() {
        let dir = TempDir::new().unwrap();
        let mut lf = Lockfile::open(dir.path().join("lock")).unwrap();
        lf.lock().unwrap();
        lf.touch().unwrap();
        assert!(!lf.modified().unwrap());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        {
            let mut lf = Lockfile::open(&path).unwrap();
            let _guard = lf.guard().unwrap();
        }
        // A second, independent Lockfile must be able to acquire the lock
        // immediately -- it would block forever if the guard had not
        // released it.
        let mut lf2 = Lockfile::open(&path).unwrap();
        lf2.lock().unwrap();
        lf2.unlock().unwrap();
    }

    #[test]
    fn test_second_handle_observes_persisted_generation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");

        let mut a = Lockfile::open(&path).unwrap();
        a.lock().unwrap();
        a.touch().unwrap();
        a.touch().unwrap();
        a.unlock().unwrap();

        let mut b = Lockfile::open(&path).unwrap();
        b.lock().unwrap();
        assert_eq!(b.baseline, 2);
        b.unlock().unwrap();
    }
}
