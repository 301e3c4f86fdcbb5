//! Packaging run orchestration.
//!
//! A run happens in two phases. [`PackageSession::prepare`] loads the
//! descriptor and the fingerprint cache and decides, per unit, whether it is
//! rebuilt or reused; no build work happens yet, so the caller can report the
//! plan. [`PackageSession::run`] then builds, archives and rewrites each unit
//! in declaration order, uploads the staged batch, and persists the cache.
//!
//! Nothing is written outside the temporary build root until every unit has
//! been built: uploads start only after the last archive exists, and the
//! cache is saved only after the uploads succeed.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::archive::{ArchiveError, create_archive};
use crate::cache::{CacheError, FingerprintCache};
use crate::consts::{API_DEFINITION_SUFFIX, STAGING_DIR};
use crate::context::RunContext;
use crate::deps::{DependencyError, DependencyTool, build_dependencies, has_manifest};
use crate::descriptor::{Descriptor, DescriptorError, Location, ResourceKind, update_resource};
use crate::upload::{ObjectStore, UploadError, upload_artifacts};
use crate::util::fs::copy_tree;

/// Errors that abort a packaging run.
#[derive(Debug, Error)]
pub enum PackageError {
  #[error(transparent)]
  Descriptor(#[from] DescriptorError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error(transparent)]
  Dependency(#[from] DependencyError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),

  #[error(transparent)]
  Upload(#[from] UploadError),

  #[error("source of {unit} not found at {path}")]
  SourceNotFound { unit: String, path: PathBuf },

  #[error("{unit} has a dependency manifest but no dependency tool is available")]
  ToolRequired { unit: String },

  #[error("failed to prepare build directory {path}: {source}")]
  BuildDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// What happens to a unit during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitDecision {
  /// Source unchanged and an artifact exists: point at it again.
  Reuse { uri: String },
  /// No fingerprint was recorded before.
  FirstBuild,
  /// The fingerprint differs from the recorded one.
  Changed,
  /// The fingerprint matches but no artifact was ever recorded.
  NoPriorArtifact,
  /// Rebuild requested for every unit.
  Forced,
}

impl UnitDecision {
  pub fn is_rebuild(&self) -> bool {
    !matches!(self, UnitDecision::Reuse { .. })
  }
}

impl fmt::Display for UnitDecision {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      UnitDecision::Reuse { uri } => write!(f, "unchanged, reusing {}", uri),
      UnitDecision::FirstBuild => write!(f, "first build"),
      UnitDecision::Changed => write!(f, "changed"),
      UnitDecision::NoPriorArtifact => write!(f, "unchanged but no previous artifact"),
      UnitDecision::Forced => write!(f, "forced rebuild"),
    }
  }
}

/// A unit scheduled for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUnit {
  pub name: String,
  /// `Function` units are archived; `ApiDefinition` units are staged as-is.
  pub kind: ResourceKind,
  /// Absolute path of the code directory or definition file.
  pub source: PathBuf,
  pub decision: UnitDecision,
  /// Whether the unit ships a dependency manifest.
  pub manifest_present: bool,
}

/// Result of a successful run.
#[derive(Debug)]
pub struct PackageOutcome {
  /// The rewritten descriptor.
  pub descriptor: Descriptor,
  /// Units built during this run, in order.
  pub rebuilt: Vec<String>,
  /// Units pointed at a previously uploaded artifact.
  pub reused: Vec<String>,
  /// Object keys uploaded during this run.
  pub uploaded: Vec<String>,
  /// Number of dependency installations performed.
  pub installs: usize,
}

/// A prepared packaging run.
pub struct PackageSession {
  ctx: RunContext,
  descriptor: Descriptor,
  cache: FingerprintCache,
  plan: Vec<PlannedUnit>,
}

impl PackageSession {
  /// Load `template` and the project's cache, and decide what to rebuild.
  ///
  /// Fingerprints are recorded in the in-memory cache here; they reach disk
  /// only when [`run`](Self::run) succeeds.
  pub fn prepare(ctx: RunContext, template: &Path) -> Result<Self, PackageError> {
    let descriptor = Descriptor::load(template)?;
    let mut cache = FingerprintCache::open(&ctx.state_dir, &ctx.project_key)?;

    let mut plan = Vec::new();
    for record in descriptor.api_resources() {
      let Some(path) = &record.definition_path else {
        continue;
      };
      plan.push(plan_unit(&ctx, &mut cache, &record.name, ResourceKind::ApiDefinition, path)?);
    }
    for record in descriptor.lambda_resources() {
      let Some(path) = &record.source_path else {
        continue;
      };
      plan.push(plan_unit(&ctx, &mut cache, &record.name, ResourceKind::Function, path)?);
    }

    Ok(Self {
      ctx,
      descriptor,
      cache,
      plan,
    })
  }

  /// Per-unit decisions, in processing order.
  pub fn plan(&self) -> &[PlannedUnit] {
    &self.plan
  }

  pub fn descriptor(&self) -> &Descriptor {
    &self.descriptor
  }

  pub fn context(&self) -> &RunContext {
    &self.ctx
  }

  /// Whether any rebuilt unit needs the dependency tool.
  pub fn requires_dependency_tool(&self) -> bool {
    self.plan.iter().any(|u| u.decision.is_rebuild() && u.manifest_present)
  }

  /// Build, stage, upload, and rewrite every planned unit.
  pub async fn run<T, S>(self, tool: Option<&T>, store: &S) -> Result<PackageOutcome, PackageError>
  where
    T: DependencyTool,
    S: ObjectStore,
  {
    let Self {
      ctx,
      mut descriptor,
      mut cache,
      plan,
    } = self;

    let build_root = tempfile::Builder::new()
      .prefix("possum-")
      .suffix("-build")
      .tempdir()
      .map_err(|source| PackageError::BuildDir {
        path: std::env::temp_dir(),
        source,
      })?;
    let staging = build_root.path().join(STAGING_DIR);
    create_dir(&staging)?;
    debug!(root = %build_root.path().display(), "created build root");

    let mut rebuilt = Vec::new();
    let mut reused = Vec::new();
    let mut installs = 0;

    for unit in &plan {
      if let UnitDecision::Reuse { uri } = &unit.decision {
        info!(unit = %unit.name, uri = %uri, "reusing previous artifact");
        update_resource(&mut descriptor, &unit.name, &ctx.target, Location::Uri(uri))?;
        reused.push(unit.name.clone());
        continue;
      }

      let object = match unit.kind {
        ResourceKind::ApiDefinition => stage_definition(unit, &staging)?,
        _ => {
          let build_dir = build_root.path().join(&unit.name);
          if build_unit(unit, tool, &build_dir).await? {
            installs += 1;
          }
          let artifact = create_archive(&unit.name, &build_dir, &staging)?;
          fs::remove_dir_all(&build_dir).map_err(|source| PackageError::BuildDir {
            path: build_dir.clone(),
            source,
          })?;
          artifact.object_name()
        }
      };

      let uri = update_resource(&mut descriptor, &unit.name, &ctx.target, Location::Object(&object))?;
      cache.set_artifact_uri(&unit.name, &uri);
      rebuilt.push(unit.name.clone());
    }

    let uploaded = upload_artifacts(store, &staging, &ctx.target).await?;
    cache.save()?;

    info!(
      rebuilt = rebuilt.len(),
      reused = reused.len(),
      uploaded = uploaded.len(),
      "packaging complete"
    );

    Ok(PackageOutcome {
      descriptor,
      rebuilt,
      reused,
      uploaded,
      installs,
    })
  }
}

fn plan_unit(
  ctx: &RunContext,
  cache: &mut FingerprintCache,
  name: &str,
  kind: ResourceKind,
  path: &Path,
) -> Result<PlannedUnit, PackageError> {
  let source = ctx.working_dir.join(path);
  let exists = match kind {
    ResourceKind::Function => source.is_dir(),
    _ => source.is_file(),
  };
  if !exists {
    return Err(PackageError::SourceNotFound {
      unit: name.to_string(),
      path: source,
    });
  }

  let had_fingerprint = cache.entry(name).is_some();
  let unchanged = cache.check_and_update(name, &source)?;

  let decision = if ctx.force {
    UnitDecision::Forced
  } else if unchanged {
    match cache.get_artifact_uri(name) {
      Some(uri) => UnitDecision::Reuse { uri: uri.to_string() },
      None => UnitDecision::NoPriorArtifact,
    }
  } else if had_fingerprint {
    UnitDecision::Changed
  } else {
    UnitDecision::FirstBuild
  };

  let manifest_present = kind == ResourceKind::Function && has_manifest(&source);
  info!(unit = %name, decision = %decision, manifest = manifest_present, "planned");

  Ok(PlannedUnit {
    name: name.to_string(),
    kind,
    source,
    decision,
    manifest_present,
  })
}

/// Copy a unit's source into `build_dir` and install its dependencies.
///
/// Returns whether an installation happened.
async fn build_unit<T: DependencyTool>(
  unit: &PlannedUnit,
  tool: Option<&T>,
  build_dir: &Path,
) -> Result<bool, PackageError> {
  info!(unit = %unit.name, "building");
  copy_tree(&unit.source, build_dir).map_err(|source| PackageError::BuildDir {
    path: build_dir.to_path_buf(),
    source,
  })?;

  if !has_manifest(build_dir) {
    return Ok(false);
  }
  let tool = tool.ok_or_else(|| PackageError::ToolRequired {
    unit: unit.name.clone(),
  })?;
  let report = build_dependencies(tool, &unit.name, build_dir).await?;
  Ok(report.is_some())
}

fn stage_definition(unit: &PlannedUnit, staging: &Path) -> Result<String, PackageError> {
  let object = format!("{}.{}", unit.name, API_DEFINITION_SUFFIX);
  let dest = staging.join(&object);
  fs::copy(&unit.source, &dest).map_err(|source| PackageError::BuildDir { path: dest, source })?;
  info!(unit = %unit.name, object = %object, "staged API definition");
  Ok(object)
}

fn create_dir(path: &Path) -> Result<(), PackageError> {
  fs::create_dir_all(path).map_err(|source| PackageError::BuildDir {
    path: path.to_path_buf(),
    source,
  })
}
