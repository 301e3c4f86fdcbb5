//! Content fingerprints.
//!
//! A unit's fingerprint covers what ends up in its artifact: the relative
//! path of every entry and the bytes of every file. Timestamps and
//! permissions are not part of it, so touching or `chmod`-ing a file does not
//! trigger a rebuild, while editing one byte or renaming a file does.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Directory names never considered part of a unit's source.
pub const FINGERPRINT_EXCLUDES: &[&str] = &["__pycache__"];

/// Lowercase hex SHA-256 digest (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(pub String);

impl fmt::Display for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Fingerprint a unit's source: a directory tree or a single definition file.
pub fn fingerprint(path: &Path) -> Result<ContentHash, FingerprintError> {
  if path.is_dir() {
    hash_directory(path, FINGERPRINT_EXCLUDES)
  } else {
    hash_file(path)
  }
}

/// Digest of a directory tree.
///
/// Each entry below `root` contributes one record, in walk order (siblings
/// sorted by name). A record is a kind tag (`F` for files, `D` for
/// directories so empty ones count too), the relative path prefixed with its
/// byte length, and for files the hex digest of their contents. The length
/// prefix keeps a crafted file name from standing in for a neighbouring
/// record.
///
/// Symlinks are followed, matching what gets copied into the artifact.
/// Entries whose name is listed in `exclude` are skipped with their subtree.
pub fn hash_directory(root: &Path, exclude: &[&str]) -> Result<ContentHash, FingerprintError> {
  if !root.is_dir() {
    return Err(FingerprintError::Read {
      path: root.to_path_buf(),
      source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
    });
  }

  let walker = WalkDir::new(root)
    .min_depth(1)
    .follow_links(true)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.file_name().to_str().is_none_or(|name| !exclude.contains(&name)));

  let mut hasher = Sha256::new();
  for entry in walker {
    let entry = entry.map_err(|source| FingerprintError::Walk {
      path: root.to_path_buf(),
      source,
    })?;
    let key = relative_key(root, entry.path());

    let (tag, contents) = if entry.file_type().is_dir() {
      (b'D', None)
    } else if entry.file_type().is_file() {
      (b'F', Some(hash_file(entry.path())?))
    } else {
      continue;
    };

    hasher.update([tag]);
    hasher.update((key.len() as u64).to_le_bytes());
    hasher.update(key.as_bytes());
    if let Some(digest) = contents {
      hasher.update(digest.0.as_bytes());
    }
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Digest of a file's contents.
pub fn hash_file(path: &Path) -> Result<ContentHash, FingerprintError> {
  let read_err = |source| FingerprintError::Read {
    path: path.to_path_buf(),
    source,
  };
  let mut file = File::open(path).map_err(read_err)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(read_err)?;
  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Digest of a byte string.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}

/// Forward-slash path of `entry` relative to `root`, identical on every platform.
fn relative_key(root: &Path, entry: &Path) -> String {
  let rel = entry.strip_prefix(root).unwrap_or(entry);
  rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}
