//! Local directory store, used for offline runs and tests.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{ObjectStore, UploadError};

/// Stores objects as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
  root: PathBuf,
}

impl LocalStore {
  pub fn new(root: PathBuf) -> Self {
    Self { root }
  }

  /// Path an object with `key` is stored at.
  pub fn object_path(&self, key: &str) -> PathBuf {
    key.split('/').filter(|s| !s.is_empty()).fold(self.root.clone(), |p, s| p.join(s))
  }
}

impl ObjectStore for LocalStore {
  async fn upload(&self, local: &Path, key: &str) -> Result<(), UploadError> {
    let dest = self.object_path(key);
    let copy_err = |source| UploadError::Copy {
      path: local.to_path_buf(),
      source,
    };

    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).map_err(copy_err)?;
    }
    fs::copy(local, &dest).map_err(copy_err)?;

    info!(object = %dest.display(), "stored artifact");
    Ok(())
  }
}
