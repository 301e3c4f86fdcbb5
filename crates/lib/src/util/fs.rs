//! Filesystem helpers for laying out build directories.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

/// Recursively copy `src` into `dst`, creating `dst` if needed.
///
/// Symlinks are followed so the copy is self-contained.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
  fs::create_dir_all(dst)?;

  for entry in WalkDir::new(src).follow_links(true).min_depth(1) {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
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

/// Move `src` to `dst`.
///
/// A rename is attempted first. When `dst` is an existing directory the two
/// trees are merged, and files already present at the destination are
/// replaced. Moves across filesystems fall back to copy-then-remove.
pub fn move_entry(src: &Path, dst: &Path) -> io::Result<()> {
  let src_meta = fs::symlink_metadata(src)?;

  if src_meta.is_dir() && dst.is_dir() {
    for child in fs::read_dir(src)? {
      let child = child?;
      move_entry(&child.path(), &dst.join(child.file_name()))?;
    }
    return fs::remove_dir(src);
  }

  if dst.exists() {
    debug!(path = %dst.display(), "replacing existing entry");
    if dst.is_dir() {
      fs::remove_dir_all(dst)?;
    } else {
      fs::remove_file(dst)?;
    }
  }

  match fs::rename(src, dst) {
    Ok(()) => Ok(()),
    Err(_) if src_meta.is_dir() => {
      copy_tree(src, dst)?;
      fs::remove_dir_all(src)
    }
    Err(_) => {
      fs::copy(src, dst)?;
      fs::remove_file(src)
    }
  }
}
