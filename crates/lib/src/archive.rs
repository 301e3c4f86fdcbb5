//! Artifact archiving.
//!
//! A unit's build directory is zipped into the staging area under a fresh
//! random name, so every rebuild yields a new object key and a previously
//! uploaded artifact is never overwritten.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Errors raised while producing an artifact.
#[derive(Debug, Error)]
pub enum ArchiveError {
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

  #[error("failed to write archive {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write archive {path}: {source}")]
  Zip {
    path: PathBuf,
    #[source]
    source: zip::result::ZipError,
  },
}

/// A packaged unit, ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
  pub unit_name: String,
  pub archive_path: PathBuf,
  /// Random identifier naming the archive, without extension.
  pub content_id: String,
}

impl Artifact {
  /// Object name of the archive under the run prefix.
  pub fn object_name(&self) -> String {
    format!("{}.zip", self.content_id)
  }
}

/// Zip the contents of `build_dir` into `dest_dir`.
///
/// Entries are stored relative to `build_dir` with `/` separators, in sorted
/// order and with a fixed timestamp. Unix permission bits are preserved so
/// executables stay executable.
pub fn create_archive(unit_name: &str, build_dir: &Path, dest_dir: &Path) -> Result<Artifact, ArchiveError> {
  let content_id = uuid::Uuid::new_v4().simple().to_string();
  let archive_path = dest_dir.join(format!("{}.zip", content_id));

  let write_err = |source| ArchiveError::Write {
    path: archive_path.clone(),
    source,
  };
  let zip_err = |source| ArchiveError::Zip {
    path: archive_path.clone(),
    source,
  };

  fs::create_dir_all(dest_dir).map_err(write_err)?;
  let file = File::create(&archive_path).map_err(write_err)?;
  let mut zip = ZipWriter::new(BufWriter::new(file));

  let mut count = 0usize;
  for entry in WalkDir::new(build_dir).follow_links(true).sort_by_file_name() {
    let entry = entry.map_err(|source| ArchiveError::Walk {
      path: build_dir.to_path_buf(),
      source,
    })?;
    if !entry.file_type().is_file() {
      continue;
    }

    let path = entry.path();
    let name = entry_name(build_dir, path);
    let options = SimpleFileOptions::default()
      .compression_method(CompressionMethod::Deflated)
      .last_modified_time(zip::DateTime::default())
      .unix_permissions(permissions(path).map_err(|source| ArchiveError::Read {
        path: path.to_path_buf(),
        source,
      })?);

    zip.start_file(name, options).map_err(zip_err)?;
    let mut source = File::open(path).map_err(|source| ArchiveError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    io::copy(&mut source, &mut zip).map_err(write_err)?;
    count += 1;
  }

  zip.finish().map_err(zip_err)?;

  info!(unit = %unit_name, archive = %archive_path.display(), files = count, "archived unit");
  Ok(Artifact {
    unit_name: unit_name.to_string(),
    archive_path,
    content_id,
  })
}

fn entry_name(root: &Path, path: &Path) -> String {
  let rel = path.strip_prefix(root).unwrap_or(path);
  let name = rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/");
  debug!(entry = %name, "adding to archive");
  name
}

#[cfg(unix)]
fn permissions(path: &Path) -> io::Result<u32> {
  use std::os::unix::fs::PermissionsExt;
  Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn permissions(path: &Path) -> io::Result<u32> {
  let readonly = fs::metadata(path)?.permissions().readonly();
  Ok(if readonly { 0o444 } else { 0o644 })
}
