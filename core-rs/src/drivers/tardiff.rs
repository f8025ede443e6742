//! Tar-stream diff/apply adapter shared by graph drivers that have no
//! native changeset mechanism of their own.
//!
//! Changesets are expressed as OCI-style whiteout tar entries: a deleted
//! path `foo` is represented by a zero-length entry named `.wh.foo` next to
//! where `foo` would have lived, and a directory that was removed and
//! replaced wholesale is represented by an opaque marker `.wh..wh..opq`
//! inside the new directory so `ApplyDiff` knows to discard whatever the
//! parent layer put there instead of merging the two.

use std::collections::BTreeSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tar::{Builder, Header};
use walkdir::WalkDir;

use crate::errors::{Result, StoreError};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_MARKER: &str = ".wh..wh..opq";

/// A single entry in the changeset between two directory trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

fn relative_paths(root: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut set = BTreeSet::new();
    if !root.exists() {
        return Ok(set);
    }
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| StoreError::Driver(e.to_string()))?;
        if entry.path() == root {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
        set.insert(rel);
    }
    Ok(set)
}

fn file_differs(lower: &Path, upper: &Path, rel: &Path) -> Result<bool> {
    let lower_path = lower.join(rel);
    let upper_path = upper.join(rel);
    let lower_meta = fs::symlink_metadata(&lower_path);
    let upper_meta = fs::symlink_metadata(&upper_path);
    match (lower_meta, upper_meta) {
        (Ok(l), Ok(u)) => {
            if l.is_dir() != u.is_dir() {
                return Ok(true);
            }
            if l.is_dir() {
                return Ok(false);
            }
            if l.len() != u.len() {
                return Ok(true);
            }
            let lower_bytes = fs::read(&lower_path)?;
            let upper_bytes = fs::read(&upper_path)?;
            Ok(lower_bytes != upper_bytes)
        }
        _ => Ok(true),
    }
}

/// Compute the changeset that turns `lower` into `upper`.
pub fn changes(lower: &Path, upper: &Path) -> Result<Vec<Change>> {
    let lower_paths = relative_paths(lower)?;
    let upper_paths = relative_paths(upper)?;

    let mut out = Vec::new();
    for rel in &upper_paths {
        if lower_paths.contains(rel) {
            if file_differs(lower, upper, rel)? {
                out.push(Change::Modified(rel.clone()));
            }
        } else {
            out.push(Change::Added(rel.clone()));
        }
    }
    for rel in &lower_paths {
        if !upper_paths.contains(rel) {
            out.push(Change::Removed(rel.clone()));
        }
    }
    out.sort_by(|a, b| change_path(a).cmp(change_path(b)));
    Ok(out)
}

fn change_path(c: &Change) -> &Path {
    match c {
        Change::Added(p) | Change::Modified(p) | Change::Removed(p) => p,
    }
}

fn whiteout_name(rel: &Path) -> PathBuf {
    let file_name = rel.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    match rel.parent() {
        Some(parent) if parent.as_os_str().len() > 0 => parent.join(format!("{}{}", WHITEOUT_PREFIX, file_name)),
        _ => PathBuf::from(format!("{}{}", WHITEOUT_PREFIX, file_name)),
    }
}

/// Write the tar changeset that turns `lower` into `upper` to `writer`.
pub fn diff<W: Write>(lower: &Path, upper: &Path, writer: W) -> Result<()> {
    let cs = changes(lower, upper)?;
    let mut builder = Builder::new(writer);

    for change in &cs {
        match change {
            Change::Added(rel) | Change::Modified(rel) => {
                let path = upper.join(rel);
                let meta = fs::symlink_metadata(&path)?;
                if meta.is_dir() {
                    let mut header = Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_mtime(0);
                    header.set_cksum();
                    builder.append_data(&mut header, rel, std::io::empty())?;
                } else {
                    let mut file = fs::File::open(&path)?;
                    let mut header = Header::new_gnu();
                    header.set_size(meta.len());
                    header.set_mode(0o644);
                    header.set_mtime(0);
                    header.set_cksum();
                    builder.append_data(&mut header, rel, &mut file)?;
                }
            }
            Change::Removed(rel) => {
                let mut header = Header::new_gnu();
                header.set_size(0);
                header.set_mode(0o000);
                header.set_mtime(0);
                header.set_cksum();
                builder.append_data(&mut header, whiteout_name(rel), std::io::empty())?;
            }
        }
    }

    builder.finish()?;
    Ok(())
}

/// Sum of the byte sizes of every added or modified regular file between
/// `lower` and `upper`, without materializing a tar stream.
pub fn diff_size(lower: &Path, upper: &Path) -> Result<u64> {
    let cs = changes(lower, upper)?;
    let mut total = 0u64;
    for change in cs {
        if let Change::Added(rel) | Change::Modified(rel) = change {
            let path = upper.join(&rel);
            let meta = fs::symlink_metadata(&path)?;
            if meta.is_file() {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

/// Apply a tar changeset (as produced by [`diff`]) under `root`, extracting
/// added/modified entries and honoring whiteout/opaque-marker entries.
/// Returns the number of bytes extracted for non-whiteout entries.
pub fn apply_diff<R: Read>(root: &Path, reader: R) -> Result<u64> {
    let mut archive = tar::Archive::new(reader);
    let mut applied = 0u64;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if file_name == OPAQUE_MARKER {
            let dir = path.parent().unwrap_or_else(|| Path::new(""));
            let target = root.join(dir);
            if target.exists() {
                fs::remove_dir_all(&target)?;
            }
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(stripped) = file_name.strip_prefix(WHITEOUT_PREFIX) {
            let dir = path.parent().unwrap_or_else(|| Path::new(""));
            let target = root.join(dir).join(stripped);
            if target.is_dir() {
                fs::remove_dir_all(&target)?;
            } else if target.exists() {
                fs::remove_file(&target)?;
            }
            continue;
        }

        let target = root.join(&path);
        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            applied += entry.size();
            entry.unpack(&target)?;
        }
    }

    Ok(applied)
}
