//! Isolated dependency installation.
//!
//! Each unit that ships a dependency manifest gets a fresh environment of its
//! own. The library directory of that environment is listed before and after
//! installation; only the entries the installation added are moved into the
//! unit's build directory. Libraries the environment ships with are never
//! bundled, and no unit can see another unit's packages because the
//! environment is torn down before the next unit starts.

pub mod pipenv;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::consts::MANIFEST_FILES;
use crate::process::ProcessError;
use crate::util::fs::move_entry;

pub use pipenv::Pipenv;

/// Errors raised while building a unit's dependencies.
#[derive(Debug, Error)]
pub enum DependencyError {
  /// The dependency tool binary could not be found.
  #[error("'{0}' could not be found; install it or point {1} at it")]
  ToolNotFound(&'static str, &'static str),

  #[error("failed to create isolated environment for {unit}: {source}")]
  CreateEnv {
    unit: String,
    #[source]
    source: ProcessError,
  },

  #[error("failed to locate library directory for {unit}: {source}")]
  LibraryDir {
    unit: String,
    #[source]
    source: ProcessError,
  },

  #[error("failed to install dependencies for {unit}: {source}")]
  Install {
    unit: String,
    #[source]
    source: ProcessError,
  },

  #[error("failed to remove isolated environment for {unit}: {source}")]
  RemoveEnv {
    unit: String,
    #[source]
    source: ProcessError,
  },

  #[error("failed to read library directory {path}: {source}")]
  ReadLibrary {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to move {entry} into the build directory: {source}")]
  MoveEntry {
    entry: String,
    #[source]
    source: io::Error,
  },
}

/// A tool that manages per-project isolated environments.
///
/// Every operation is keyed by the project directory, which for the pipeline
/// is a unit's private build directory.
#[allow(async_fn_in_trait)]
pub trait DependencyTool {
  /// Create an empty environment for `project_dir`; returns its root.
  async fn create_env(&self, unit: &str, project_dir: &Path) -> Result<PathBuf, DependencyError>;

  /// Directory where the environment keeps installed libraries.
  async fn library_dir(&self, unit: &str, project_dir: &Path) -> Result<PathBuf, DependencyError>;

  /// Install the manifest found in `project_dir` into its environment.
  async fn install(&self, unit: &str, project_dir: &Path) -> Result<(), DependencyError>;

  /// Remove the environment of `project_dir`.
  async fn remove_env(&self, unit: &str, project_dir: &Path) -> Result<(), DependencyError>;
}

/// Whether `dir` contains a recognized dependency manifest.
pub fn has_manifest(dir: &Path) -> bool {
  MANIFEST_FILES.iter().any(|name| dir.join(name).is_file())
}

/// Outcome of building one unit's dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
  /// Entries that existed in the fresh environment and were left out.
  pub base: BTreeSet<String>,
  /// Entries added by the installation and moved into the build directory.
  pub installed: BTreeSet<String>,
}

/// An isolated environment scoped to one unit.
///
/// Call [`IsolatedEnv::release`] to tear it down. If the guard is dropped
/// without being released (a panic, or a cancelled future) the environment
/// root is removed from disk directly.
pub struct IsolatedEnv<'a, T: DependencyTool> {
  tool: &'a T,
  unit: String,
  project_dir: PathBuf,
  root: PathBuf,
  released: bool,
}

impl<'a, T: DependencyTool> IsolatedEnv<'a, T> {
  /// Create a fresh environment for `project_dir`.
  pub async fn create(tool: &'a T, unit: &str, project_dir: &Path) -> Result<Self, DependencyError> {
    let root = tool.create_env(unit, project_dir).await?;
    info!(unit = %unit, env = %root.display(), "created isolated environment");
    Ok(Self {
      tool,
      unit: unit.to_string(),
      project_dir: project_dir.to_path_buf(),
      root,
      released: false,
    })
  }

  /// Root directory of the environment.
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Tear the environment down through the tool.
  pub async fn release(mut self) -> Result<(), DependencyError> {
    self.released = true;
    info!(unit = %self.unit, "removing isolated environment");
    self.tool.remove_env(&self.unit, &self.project_dir).await
  }
}

impl<T: DependencyTool> Drop for IsolatedEnv<'_, T> {
  fn drop(&mut self) {
    if self.released {
      return;
    }
    warn!(unit = %self.unit, env = %self.root.display(), "environment not released, removing it directly");
    if let Err(e) = fs::remove_dir_all(&self.root)
      && e.kind() != io::ErrorKind::NotFound
    {
      warn!(env = %self.root.display(), error = %e, "failed to remove environment");
    }
  }
}

/// Install the dependencies of the unit in `build_dir`, if it has a manifest.
///
/// Returns `None` when there is no manifest; the build directory then holds
/// only the unit's own source.
pub async fn build_dependencies<T: DependencyTool>(
  tool: &T,
  unit: &str,
  build_dir: &Path,
) -> Result<Option<DependencyReport>, DependencyError> {
  if !has_manifest(build_dir) {
    return Ok(None);
  }

  let env = IsolatedEnv::create(tool, unit, build_dir).await?;
  let result = populate(tool, unit, build_dir).await;
  let teardown = env.release().await;

  let report = result?;
  teardown?;
  Ok(Some(report))
}

async fn populate<T: DependencyTool>(tool: &T, unit: &str, build_dir: &Path) -> Result<DependencyReport, DependencyError> {
  let library = tool.library_dir(unit, build_dir).await?;
  let base = list_entries(&library)?;

  info!(unit = %unit, "installing requirements");
  tool.install(unit, build_dir).await?;

  let after = list_entries(&library)?;
  let installed: BTreeSet<String> = after.difference(&base).cloned().collect();

  info!(unit = %unit, count = installed.len(), "copying installed packages");
  for entry in &installed {
    move_entry(&library.join(entry), &build_dir.join(entry)).map_err(|source| DependencyError::MoveEntry {
      entry: entry.clone(),
      source,
    })?;
  }

  Ok(DependencyReport { base, installed })
}

fn list_entries(dir: &Path) -> Result<BTreeSet<String>, DependencyError> {
  let read_err = |source| DependencyError::ReadLibrary {
    path: dir.to_path_buf(),
    source,
  };

  let mut entries = BTreeSet::new();
  for entry in fs::read_dir(dir).map_err(read_err)? {
    let entry = entry.map_err(read_err)?;
    entries.insert(entry.file_name().to_string_lossy().to_string());
  }
  Ok(entries)
}
