//! Shared test helpers for CLI integration tests.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own project directory, state directory, and local
/// bucket directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("project")).unwrap();
    Self { temp }
  }

  /// Write a file relative to the project directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.project_path().join(relative_path);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
  }

  pub fn read_file(&self, relative_path: &str) -> String {
    fs::read_to_string(self.project_path().join(relative_path)).unwrap()
  }

  pub fn project_path(&self) -> PathBuf {
    let p = self.temp.path().join("project");
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn state_path(&self) -> PathBuf {
    self.temp.path().join("state")
  }

  /// Local directory acting as the bucket.
  pub fn bucket_path(&self) -> PathBuf {
    let p = self.temp.path().join("bucket");
    fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// `file://` destination for the local bucket.
  pub fn destination(&self) -> String {
    format!("file://{}", self.bucket_path().display())
  }

  /// Every object stored in the bucket, as keys relative to it.
  pub fn stored_objects(&self) -> BTreeSet<String> {
    let root = self.bucket_path();
    walk(&root)
      .into_iter()
      .map(|p| p.strip_prefix(&root).unwrap().to_string_lossy().replace('\\', "/"))
      .collect()
  }

  /// Pre-configured command for the possum binary.
  ///
  /// Runs in the project directory with `POSSUM_HOME` pointing at the
  /// isolated state directory.
  pub fn possum_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("possum");
    cmd.current_dir(self.project_path());
    cmd.env("POSSUM_HOME", self.state_path());
    cmd.env_remove("POSSUM_PROJECT_DIR");
    cmd.env_remove("RUST_LOG");
    cmd
  }
}

fn walk(dir: &Path) -> Vec<PathBuf> {
  let mut files = Vec::new();
  for entry in fs::read_dir(dir).unwrap() {
    let path = entry.unwrap().path();
    if path.is_dir() {
      files.extend(walk(&path));
    } else {
      files.push(path);
    }
  }
  files
}

/// Entry names of a zip archive.
pub fn archive_entries(path: &Path) -> BTreeSet<String> {
  let zip = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
  zip.file_names().map(str::to_string).collect()
}

/// Write an executable shell script standing in for pipenv.
///
/// Environments live under `$FAKE_ENVS/<project dir name>`; each starts with
/// a `pip` package, and `install` creates one package per
/// `name==version` line of `requirements.txt`.
#[cfg(unix)]
pub fn fake_pipenv(dir: &Path) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;

  let script = dir.join("pipenv");
  fs::write(
    &script,
    r#"#!/bin/sh
env_root="$FAKE_ENVS/$(basename "$PWD")"
case "$1" in
  --python) mkdir -p "$env_root/lib/pip" ;;
  --venv) echo "$env_root" ;;
  run) echo "$env_root/lib" ;;
  install)
    while IFS='=' read -r name _ version; do
      [ -n "$name" ] || continue
      mkdir -p "$env_root/lib/$name"
      echo "$version" > "$env_root/lib/$name/__init__.py"
    done < requirements.txt
    ;;
  --rm) rm -rf "$env_root" ;;
esac
"#,
  )
  .unwrap();
  fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
  script
}
