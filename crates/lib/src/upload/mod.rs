//! Artifact upload.
//!
//! Everything staged during a run is uploaded in one batch once all units
//! have been packaged. Each staged file lands at `<run prefix>/<file name>`.

pub mod local;
pub mod s3;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::context::{StorageScheme, StorageTarget};
use crate::process::ProcessError;

pub use local::LocalStore;
pub use s3::AwsCliStore;

/// Errors raised while uploading artifacts.
#[derive(Debug, Error)]
pub enum UploadError {
  #[error("'{0}' could not be found; install it or point {1} at it")]
  ClientNotFound(&'static str, &'static str),

  #[error("no credentials available for the object store; configure a profile or credentials")]
  MissingCredentials,

  #[error("failed to upload {path}: {source}")]
  Client {
    path: PathBuf,
    #[source]
    source: ProcessError,
  },

  #[error("failed to copy {path} into the store: {source}")]
  Copy {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read staging directory {path}: {source}")]
  Staging {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Destination for packaged artifacts.
#[allow(async_fn_in_trait)]
pub trait ObjectStore {
  /// Upload the file at `local` under `key`.
  async fn upload(&self, local: &Path, key: &str) -> Result<(), UploadError>;
}

/// Store selected from a run's storage target.
#[derive(Debug, Clone)]
pub enum Backend {
  S3(AwsCliStore),
  Local(LocalStore),
}

impl Backend {
  /// Pick the store matching the scheme of `target`.
  pub fn for_target(target: &StorageTarget, profile: Option<&str>, timeout: Duration) -> Result<Self, UploadError> {
    match target.scheme {
      StorageScheme::S3 => Ok(Backend::S3(AwsCliStore::locate(&target.bucket, profile, timeout)?)),
      StorageScheme::File => Ok(Backend::Local(LocalStore::new(PathBuf::from(&target.bucket)))),
    }
  }
}

impl ObjectStore for Backend {
  async fn upload(&self, local: &Path, key: &str) -> Result<(), UploadError> {
    match self {
      Backend::S3(store) => store.upload(local, key).await,
      Backend::Local(store) => store.upload(local, key).await,
    }
  }
}

/// Upload every file in `staging_dir` under the run prefix of `target`.
///
/// Files are uploaded in name order. Returns the object keys written.
pub async fn upload_artifacts<S: ObjectStore>(
  store: &S,
  staging_dir: &Path,
  target: &StorageTarget,
) -> Result<Vec<String>, UploadError> {
  let staging_err = |source| UploadError::Staging {
    path: staging_dir.to_path_buf(),
    source,
  };

  let mut files = Vec::new();
  for entry in fs::read_dir(staging_dir).map_err(staging_err)? {
    let entry = entry.map_err(staging_err)?;
    if entry.file_type().map_err(staging_err)?.is_file() {
      files.push(entry.path());
    }
  }
  files.sort();

  if files.is_empty() {
    info!("nothing to upload");
    return Ok(Vec::new());
  }

  info!(count = files.len(), destination = %target, "uploading artifacts");
  let mut keys = Vec::with_capacity(files.len());
  for path in files {
    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let key = target.key_for(&name);
    store.upload(&path, &key).await?;
    keys.push(key);
  }

  Ok(keys)
}
