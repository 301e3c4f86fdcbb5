//! Per-function `requirements.txt` generation.
//!
//! Projects that keep one root `Pipfile` for every function can split it per
//! unit: each function's handler module is scanned for top-level imports, and
//! the imports that name a root package are written, pinned to the locked
//! version, into a `requirements.txt` next to the function's source.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::descriptor::Descriptor;

/// Modules provided by the function runtime itself.
const RUNTIME_PROVIDED: &[&str] = &["boto3", "botocore"];

#[derive(Debug, Error)]
pub enum RequirementsError {
  #[error("generating requirements needs a root level Pipfile and Pipfile.lock (missing {0})")]
  MissingManifest(PathBuf),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Pipfile {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Lockfile {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[derive(Debug, Deserialize)]
struct Pipfile {
  #[serde(default)]
  packages: toml::Table,
}

#[derive(Debug, Deserialize)]
struct PipfileLock {
  #[serde(default)]
  default: BTreeMap<String, LockedPackage>,
}

#[derive(Debug, Deserialize)]
struct LockedPackage {
  version: Option<String>,
  git: Option<String>,
}

/// Root packages pinned to their locked versions, keyed by normalized name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinnedPackages {
  pins: BTreeMap<String, String>,
}

impl PinnedPackages {
  /// Read `Pipfile` and `Pipfile.lock` from `project_dir`.
  pub fn load(project_dir: &Path) -> Result<Self, RequirementsError> {
    let pipfile_path = project_dir.join("Pipfile");
    let lock_path = project_dir.join("Pipfile.lock");
    for path in [&pipfile_path, &lock_path] {
      if !path.is_file() {
        return Err(RequirementsError::MissingManifest(path.clone()));
      }
    }

    let pipfile: Pipfile = toml::from_str(&read(&pipfile_path)?).map_err(|source| RequirementsError::Pipfile {
      path: pipfile_path.clone(),
      source,
    })?;
    let lock: PipfileLock = serde_json::from_str(&read(&lock_path)?).map_err(|source| RequirementsError::Lockfile {
      path: lock_path.clone(),
      source,
    })?;

    Ok(Self::from_parts(&pipfile, &lock))
  }

  fn from_parts(pipfile: &Pipfile, lock: &PipfileLock) -> Self {
    let declared: BTreeSet<String> = pipfile.packages.keys().map(|k| normalize(k)).collect();

    let mut pins = BTreeMap::new();
    for (name, locked) in &lock.default {
      if !declared.contains(&normalize(name)) {
        continue;
      }
      // Packages installed from git carry no version.
      let pin = match (&locked.version, &locked.git) {
        (Some(version), _) => format!("{}{}", name, version),
        (None, Some(url)) => format!("git+{}#egg={}", url, name),
        (None, None) => continue,
      };
      pins.insert(normalize(name), pin);
    }
    Self { pins }
  }

  /// Requirement line for an imported module, if it names a root package.
  pub fn pin_for(&self, module: &str) -> Option<&str> {
    self.pins.get(&normalize(module)).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.pins.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pins.is_empty()
  }
}

/// What happened for one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequirementsStatus {
  /// A `requirements.txt` was written with these lines.
  Written { path: PathBuf, packages: Vec<String> },
  /// None of the handler's imports is a root package.
  NoMatches,
  /// The function declares no handler, so there is nothing to scan.
  NoHandler,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementsReport {
  pub unit: String,
  pub status: RequirementsStatus,
}

/// Top-level modules imported by python `source`.
///
/// Only unindented `import x` and `from x import y` statements count; the
/// first dotted segment is taken. Runtime-provided modules are left out.
pub fn scan_imports(source: &str) -> BTreeSet<String> {
  let mut modules = BTreeSet::new();
  for line in source.lines() {
    let rest = line
      .strip_prefix("import ")
      .or_else(|| line.strip_prefix("from "))
      .map(str::trim_start);
    let Some(rest) = rest else {
      continue;
    };

    let module: String = rest
      .chars()
      .take_while(|c| !c.is_whitespace() && !matches!(c, '.' | ','))
      .collect();
    if !module.is_empty() && !RUNTIME_PROVIDED.contains(&module.as_str()) {
      modules.insert(module);
    }
  }
  modules
}

/// Write a `requirements.txt` for every packaged function in `descriptor`.
///
/// Relative `CodeUri` paths are resolved against `project_dir`, which must
/// also hold the root `Pipfile` and `Pipfile.lock`.
pub fn generate_requirements(
  descriptor: &Descriptor,
  project_dir: &Path,
) -> Result<Vec<RequirementsReport>, RequirementsError> {
  let pins = PinnedPackages::load(project_dir)?;
  info!(packages = pins.len(), "evaluating function dependencies");

  let mut reports = Vec::new();
  for record in descriptor.lambda_resources() {
    let (Some(handler_file), Some(code_dir)) = (descriptor.get_handler_file(&record.name), &record.source_path)
    else {
      warn!(unit = %record.name, "no Handler declared, skipping");
      reports.push(RequirementsReport {
        unit: record.name.clone(),
        status: RequirementsStatus::NoHandler,
      });
      continue;
    };

    let code_dir = project_dir.join(code_dir);
    let imports = scan_imports(&read(&code_dir.join(&handler_file))?);
    let packages: Vec<String> = imports
      .iter()
      .filter_map(|module| pins.pin_for(module))
      .map(str::to_string)
      .collect();

    let status = if packages.is_empty() {
      info!(unit = %record.name, "no requirements.txt generated");
      RequirementsStatus::NoMatches
    } else {
      let path = code_dir.join("requirements.txt");
      let mut content = packages.join("\n");
      content.push('\n');
      fs::write(&path, content).map_err(|source| RequirementsError::Write {
        path: path.clone(),
        source,
      })?;
      info!(unit = %record.name, packages = %packages.join(", "), "generated requirements.txt");
      RequirementsStatus::Written { path, packages }
    };

    reports.push(RequirementsReport {
      unit: record.name.clone(),
      status,
    });
  }

  Ok(reports)
}

fn read(path: &Path) -> Result<String, RequirementsError> {
  fs::read_to_string(path).map_err(|source| RequirementsError::Read {
    path: path.to_path_buf(),
    source,
  })
}

/// Package index names compare case-insensitively, with `-` and `_` equal.
fn normalize(name: &str) -> String {
  name.to_lowercase().replace('_', "-")
}
