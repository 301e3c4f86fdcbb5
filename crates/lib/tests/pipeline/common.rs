//! Shared fixtures for pipeline tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use possum_lib::context::{RunContext, StorageTarget};
use possum_lib::deps::{DependencyError, DependencyTool};
use possum_lib::package::{PackageError, PackageOutcome, PackageSession};
use possum_lib::process::ProcessError;
use possum_lib::upload::{LocalStore, ObjectStore, UploadError};
use tempfile::TempDir;

/// Packages every fresh environment starts with.
pub const BASE_PACKAGES: &[&str] = &["pip", "setuptools"];

/// Dependency tool that keeps one fake environment per project directory.
///
/// `install` reads `requirements.txt` lines of the form `name==version` and
/// lays out `name/__init__.py` (holding the version) plus a dist-info dir.
pub struct FakeTool {
  envs: PathBuf,
  pub installs: Cell<usize>,
  pub live_envs: RefCell<BTreeSet<PathBuf>>,
  pub fail_install: bool,
}

impl FakeTool {
  pub fn new(envs: PathBuf) -> Self {
    Self {
      envs,
      installs: Cell::new(0),
      live_envs: RefCell::new(BTreeSet::new()),
      fail_install: false,
    }
  }

  fn env_root(&self, project_dir: &Path) -> PathBuf {
    self.envs.join(project_dir.file_name().unwrap())
  }

  fn lib(&self, project_dir: &Path) -> PathBuf {
    self.env_root(project_dir).join("lib/site-packages")
  }
}

impl DependencyTool for FakeTool {
  async fn create_env(&self, _unit: &str, project_dir: &Path) -> Result<PathBuf, DependencyError> {
    let lib = self.lib(project_dir);
    for base in BASE_PACKAGES {
      fs::create_dir_all(lib.join(base)).unwrap();
      fs::write(lib.join(base).join("__init__.py"), "").unwrap();
    }
    let root = self.env_root(project_dir);
    self.live_envs.borrow_mut().insert(root.clone());
    Ok(root)
  }

  async fn library_dir(&self, _unit: &str, project_dir: &Path) -> Result<PathBuf, DependencyError> {
    Ok(self.lib(project_dir))
  }

  async fn install(&self, unit: &str, project_dir: &Path) -> Result<(), DependencyError> {
    if self.fail_install {
      return Err(DependencyError::Install {
        unit: unit.to_string(),
        source: ProcessError::Failed {
          program: "pipenv".to_string(),
          code: Some(1),
          stderr: "ResolutionFailure".to_string(),
        },
      });
    }

    self.installs.set(self.installs.get() + 1);
    let lib = self.lib(project_dir);
    let reqs = fs::read_to_string(project_dir.join("requirements.txt")).unwrap_or_default();
    for line in reqs.lines().filter(|l| !l.trim().is_empty()) {
      let (name, version) = line.split_once("==").unwrap();
      fs::create_dir_all(lib.join(name)).unwrap();
      fs::write(lib.join(name).join("__init__.py"), version).unwrap();
      fs::create_dir_all(lib.join(format!("{name}-{version}.dist-info"))).unwrap();
      fs::write(lib.join(format!("{name}-{version}.dist-info/METADATA")), name).unwrap();
    }
    Ok(())
  }

  async fn remove_env(&self, _unit: &str, project_dir: &Path) -> Result<(), DependencyError> {
    let root = self.env_root(project_dir);
    fs::remove_dir_all(&root).unwrap();
    self.live_envs.borrow_mut().remove(&root);
    Ok(())
  }
}

/// Local store that also records the keys it receives.
///
/// With `fail_after` set, uploads past that many objects are rejected as if
/// the credentials had expired mid-run.
pub struct RecordingStore {
  inner: LocalStore,
  pub keys: RefCell<Vec<String>>,
  pub fail_after: Option<usize>,
}

impl RecordingStore {
  pub fn new(root: PathBuf) -> Self {
    Self {
      inner: LocalStore::new(root),
      keys: RefCell::new(Vec::new()),
      fail_after: None,
    }
  }
}

impl ObjectStore for RecordingStore {
  async fn upload(&self, local: &Path, key: &str) -> Result<(), UploadError> {
    if self.fail_after.is_some_and(|limit| self.keys.borrow().len() >= limit) {
      return Err(UploadError::MissingCredentials);
    }
    self.inner.upload(local, key).await?;
    self.keys.borrow_mut().push(key.to_string());
    Ok(())
  }
}

/// A project directory plus isolated state, store, and environments.
pub struct Project {
  pub temp: TempDir,
}

impl Project {
  pub fn new(template: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let project = Self { temp };
    project.write("template.yaml", template);
    project
  }

  pub fn dir(&self) -> PathBuf {
    self.temp.path().join("project")
  }

  pub fn state_dir(&self) -> PathBuf {
    self.temp.path().join("state")
  }

  pub fn store_root(&self) -> PathBuf {
    self.temp.path().join("bucket")
  }

  pub fn write(&self, relative: &str, content: &str) {
    let path = self.dir().join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }

  pub fn tool(&self) -> FakeTool {
    FakeTool::new(self.temp.path().join("envs"))
  }

  pub fn store(&self) -> RecordingStore {
    RecordingStore::new(self.store_root())
  }

  pub fn context(&self, prefix: &str, force: bool) -> RunContext {
    let dest = format!("file://{}", self.store_root().display());
    let target = StorageTarget::parse(&dest, Some(prefix), UNIX_EPOCH).unwrap();
    let mut ctx = RunContext::new(self.dir(), self.state_dir(), target);
    ctx.force = force;
    ctx
  }

  pub fn session(&self, prefix: &str, force: bool) -> PackageSession {
    PackageSession::prepare(self.context(prefix, force), &self.dir().join("template.yaml")).unwrap()
  }

  pub async fn run_with(
    &self,
    prefix: &str,
    force: bool,
    tool: &FakeTool,
    store: &RecordingStore,
  ) -> Result<PackageOutcome, PackageError> {
    self.session(prefix, force).run(Some(tool), store).await
  }

  /// Location a resource points at in `outcome`'s descriptor.
  pub fn location(outcome: &PackageOutcome, name: &str, property: &str) -> String {
    outcome
      .descriptor
      .resource_property(name, property)
      .and_then(|v| v.as_str())
      .unwrap()
      .to_string()
  }

  /// Local path of an object stored under `uri`.
  pub fn object_path(&self, uri: &str) -> PathBuf {
    let prefix = format!("file://{}/", self.store_root().display());
    self.store_root().join(uri.strip_prefix(&prefix).unwrap())
  }
}

/// Entry names of the archive at `path`.
pub fn archive_entries(path: &Path) -> BTreeSet<String> {
  let zip = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
  zip.file_names().map(str::to_string).collect()
}

/// Contents of one archive entry.
pub fn archive_file(path: &Path, name: &str) -> String {
  let mut zip = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
  let mut content = String::new();
  zip.by_name(name).unwrap().read_to_string(&mut content).unwrap();
  content
}
