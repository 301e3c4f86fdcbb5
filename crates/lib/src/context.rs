//! Run context.
//!
//! Everything a packaging run needs to know about its environment (where the
//! project lives, where artifacts go, how long external calls may take) is
//! resolved once into a [`RunContext`] and passed explicitly to each stage.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::consts::{DEFAULT_TIMEOUT_SECS, RUN_PREFIX_STEM};

const S3_SCHEME: &str = "s3://";
const FILE_SCHEME: &str = "file://";

/// Errors raised while resolving the run context.
#[derive(Debug, Error)]
pub enum ContextError {
  #[error("invalid storage destination '{0}': a bucket name is required")]
  MissingBucket(String),

  #[error("invalid storage destination '{0}': local destinations must be absolute paths")]
  RelativeLocalPath(String),
}

/// Kind of object store a destination refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageScheme {
  /// An S3 bucket, uploaded through the AWS CLI.
  S3,
  /// A local directory standing in for a bucket.
  File,
}

impl StorageScheme {
  pub fn as_str(&self) -> &'static str {
    match self {
      StorageScheme::S3 => "s3",
      StorageScheme::File => "file",
    }
  }
}

/// Where a run's artifacts are uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTarget {
  pub scheme: StorageScheme,
  /// Bucket name, or the absolute root directory for `file://` targets.
  pub bucket: String,
  /// Run prefix, without leading or trailing slashes.
  pub prefix: String,
}

impl StorageTarget {
  /// Parse a destination argument.
  ///
  /// Accepted forms:
  /// - `my-bucket` (run prefix defaults to `possum-<unix seconds>`)
  /// - `my-bucket/some/path`
  /// - `s3://my-bucket[/some/path]`
  /// - `file:///absolute/dir`
  ///
  /// `prefix_override` replaces whatever prefix the argument carries.
  pub fn parse(arg: &str, prefix_override: Option<&str>, now: SystemTime) -> Result<Self, ContextError> {
    let (scheme, bucket, path) = if let Some(rest) = arg.strip_prefix(FILE_SCHEME) {
      if !Path::new(rest).is_absolute() {
        return Err(ContextError::RelativeLocalPath(arg.to_string()));
      }
      let root = rest.trim_end_matches('/');
      let root = if root.is_empty() { "/" } else { root };
      (StorageScheme::File, root.to_string(), None)
    } else {
      let rest = arg.strip_prefix(S3_SCHEME).unwrap_or(arg);
      let (bucket, path) = match rest.split_once('/') {
        Some((bucket, path)) => (bucket, Some(path)),
        None => (rest, None),
      };
      (StorageScheme::S3, bucket.to_string(), path)
    };

    if bucket.is_empty() {
      return Err(ContextError::MissingBucket(arg.to_string()));
    }

    let prefix = prefix_override
      .or(path)
      .map(|p| p.trim_matches('/').to_string())
      .filter(|p| !p.is_empty())
      .unwrap_or_else(|| default_run_prefix(now));

    Ok(Self { scheme, bucket, prefix })
  }

  /// Object key of `object` under this run's prefix.
  pub fn key_for(&self, object: &str) -> String {
    format!("{}/{}", self.prefix, object)
  }

  /// Fully-qualified URI of `object` under this run's prefix.
  pub fn uri_for(&self, object: &str) -> String {
    format!("{}://{}/{}", self.scheme.as_str(), self.bucket, self.key_for(object))
  }
}

impl fmt::Display for StorageTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}://{}/{}", self.scheme.as_str(), self.bucket, self.prefix)
  }
}

/// Default run prefix derived from the invocation time.
pub fn default_run_prefix(now: SystemTime) -> String {
  let secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
  format!("{}-{}", RUN_PREFIX_STEM, secs)
}

/// Explicit configuration for one packaging run.
#[derive(Debug, Clone)]
pub struct RunContext {
  /// Directory relative paths in the descriptor are resolved against.
  pub working_dir: PathBuf,
  /// Path identifying the project for cache naming; usually `working_dir`.
  pub project_key: PathBuf,
  /// Directory holding persisted state (fingerprint caches).
  pub state_dir: PathBuf,
  /// Upload destination and run prefix.
  pub target: StorageTarget,
  /// Rebuild every unit regardless of fingerprints.
  pub force: bool,
  /// Credential profile for the upload client.
  pub profile: Option<String>,
  /// Upper bound for each external process call.
  pub timeout: Duration,
}

impl RunContext {
  /// Create a context with default settings for everything but the paths and target.
  pub fn new(working_dir: PathBuf, state_dir: PathBuf, target: StorageTarget) -> Self {
    Self {
      project_key: working_dir.clone(),
      working_dir,
      state_dir,
      target,
      force: false,
      profile: None,
      timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
    }
  }

  /// Resolve a descriptor-relative path against the working directory.
  pub fn resolve(&self, path: &str) -> PathBuf {
    self.working_dir.join(path)
  }
}
