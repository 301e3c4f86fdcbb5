//! Content fingerprint cache.
//!
//! Remembers, per unit, the fingerprint of the source that was last built and
//! the storage URI of the artifact produced from it. A unit whose fingerprint
//! is unchanged and which has a known artifact can be reused without
//! rebuilding.
//!
//! # File Format
//!
//! One JSON file per project, named after the project directory plus a short
//! hash of its full path so distinct projects never collide:
//!
//! ```json
//! {
//!   "lastRun": { "HelloFunction": "9f86d08..." },
//!   "artifactUris": { "HelloFunction": "s3://bucket/possum-1700000000/3b1f....zip" }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::CACHE_DIR;
use crate::util::hash::{FingerprintError, fingerprint, hash_bytes};

/// Errors that can occur when working with the fingerprint cache.
#[derive(Debug, Error)]
pub enum CacheError {
  /// The state path exists but is not a directory.
  #[error("'{0}' is not a directory; delete it to let possum recreate it")]
  NotADirectory(PathBuf),

  #[error("failed to create state directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read cache file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("cache file {path} is corrupt: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize cache: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to write cache file {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to fingerprint {unit}: {source}")]
  Fingerprint {
    unit: String,
    #[source]
    source: FingerprintError,
  },
}

/// On-disk representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheFile {
  #[serde(default)]
  last_run: BTreeMap<String, String>,
  #[serde(default)]
  artifact_uris: BTreeMap<String, String>,
}

/// Everything recorded about one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintCacheEntry {
  pub unit_name: String,
  pub last_hash: String,
  pub last_artifact_uri: Option<String>,
}

/// Persisted mapping from unit name to last fingerprint and artifact.
#[derive(Debug, Clone)]
pub struct FingerprintCache {
  path: PathBuf,
  data: CacheFile,
}

impl FingerprintCache {
  /// Location of the cache file for `project_dir` below `state_dir`.
  ///
  /// The name is `<dir name>-<last 8 hex digits of sha256(path)>.json`.
  pub fn path_for(state_dir: &Path, project_dir: &Path) -> PathBuf {
    let project_dir = dunce::canonicalize(project_dir).unwrap_or_else(|_| project_dir.to_path_buf());
    let full = project_dir.to_string_lossy();
    let digest = hash_bytes(full.as_bytes()).0;
    let suffix = &digest[digest.len() - 8..];
    let stem = project_dir
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_else(|| "root".to_string());
    state_dir.join(CACHE_DIR).join(format!("{}-{}.json", stem, suffix))
  }

  /// Open the cache for `project_dir`, creating the state directory if needed.
  pub fn open(state_dir: &Path, project_dir: &Path) -> Result<Self, CacheError> {
    let path = Self::path_for(state_dir, project_dir);
    if let Some(dir) = path.parent() {
      ensure_dir(state_dir)?;
      ensure_dir(dir)?;
    }
    Self::load(&path)
  }

  /// Load the cache at `path`.
  ///
  /// A missing file yields an empty cache. A file that exists but cannot be
  /// read or parsed is an error: prior state is never silently discarded.
  pub fn load(path: &Path) -> Result<Self, CacheError> {
    let data = match fs::read_to_string(path) {
      Ok(content) => serde_json::from_str(&content).map_err(|source| CacheError::Parse {
        path: path.to_path_buf(),
        source,
      })?,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no fingerprint cache yet");
        CacheFile::default()
      }
      Err(source) => {
        return Err(CacheError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    Ok(Self {
      path: path.to_path_buf(),
      data,
    })
  }

  /// Path the cache is saved to.
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Compare the current fingerprint of `source` with the recorded one.
  ///
  /// Returns `true` when unchanged, leaving the cache untouched. Otherwise
  /// records the new fingerprint and returns `false`.
  pub fn check_and_update(&mut self, unit_name: &str, source: &Path) -> Result<bool, CacheError> {
    let current = fingerprint(source).map_err(|source| CacheError::Fingerprint {
      unit: unit_name.to_string(),
      source,
    })?;

    if self.data.last_run.get(unit_name) == Some(&current.0) {
      debug!(unit = %unit_name, "fingerprint unchanged");
      return Ok(true);
    }

    debug!(unit = %unit_name, hash = %current, "fingerprint changed");
    self.data.last_run.insert(unit_name.to_string(), current.0);
    Ok(false)
  }

  /// Last uploaded artifact of `unit_name`.
  pub fn get_artifact_uri(&self, unit_name: &str) -> Option<&str> {
    self.data.artifact_uris.get(unit_name).map(String::as_str)
  }

  /// Record the uploaded artifact of `unit_name`.
  pub fn set_artifact_uri(&mut self, unit_name: &str, uri: &str) {
    self.data.artifact_uris.insert(unit_name.to_string(), uri.to_string());
  }

  /// Full entry for `unit_name`, if a fingerprint was ever recorded.
  pub fn entry(&self, unit_name: &str) -> Option<FingerprintCacheEntry> {
    let last_hash = self.data.last_run.get(unit_name)?;
    Some(FingerprintCacheEntry {
      unit_name: unit_name.to_string(),
      last_hash: last_hash.clone(),
      last_artifact_uri: self.get_artifact_uri(unit_name).map(str::to_string),
    })
  }

  /// Write the cache to disk.
  ///
  /// Uses atomic write (write to temp, then rename) to prevent corruption.
  pub fn save(&self) -> Result<(), CacheError> {
    if let Some(dir) = self.path.parent() {
      ensure_dir(dir)?;
    }

    let content = serde_json::to_string_pretty(&self.data).map_err(CacheError::Serialize)?;
    let temp_path = self.path.with_extension("json.tmp");
    let write_err = |source| CacheError::Write {
      path: self.path.clone(),
      source,
    };

    fs::write(&temp_path, content).map_err(write_err)?;
    fs::rename(&temp_path, &self.path).map_err(write_err)?;

    info!(path = %self.path.display(), units = self.data.last_run.len(), "saved fingerprint cache");
    Ok(())
  }
}

fn ensure_dir(dir: &Path) -> Result<(), CacheError> {
  if dir.exists() && !dir.is_dir() {
    return Err(CacheError::NotADirectory(dir.to_path_buf()));
  }
  fs::create_dir_all(dir).map_err(|source| CacheError::CreateDir {
    path: dir.to_path_buf(),
    source,
  })
}
