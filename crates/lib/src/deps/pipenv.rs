//! Pipenv-backed isolated environments.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use super::{DependencyError, DependencyTool};
use crate::process::{self, ProcessError, ProcessOutput, locate_program};

/// Environment variable overriding the pipenv binary.
pub const PIPENV_ENV: &str = "POSSUM_PIPENV";

const PURELIB_SCRIPT: &str = "import sysconfig; print(sysconfig.get_paths()['purelib'])";

/// Drives the `pipenv` command line tool.
///
/// Every call runs with the unit's build directory as working directory, so
/// pipenv derives a separate environment per unit.
#[derive(Debug, Clone)]
pub struct Pipenv {
  program: PathBuf,
  timeout: Duration,
}

impl Pipenv {
  /// Locate pipenv on `PATH` (or through `POSSUM_PIPENV`).
  pub fn locate(timeout: Duration) -> Result<Self, DependencyError> {
    let program = locate_program("pipenv", PIPENV_ENV).ok_or(DependencyError::ToolNotFound("pipenv", PIPENV_ENV))?;
    Ok(Self::with_program(program, timeout))
  }

  pub fn with_program(program: PathBuf, timeout: Duration) -> Self {
    Self { program, timeout }
  }

  fn command(&self, project_dir: &Path) -> Command {
    let mut command = Command::new(&self.program);
    command
      .current_dir(project_dir)
      // An activated virtualenv or an in-project venv would break isolation.
      .env("PIPENV_IGNORE_VIRTUALENVS", "1")
      .env("PIPENV_NOSPIN", "1")
      .env_remove("PIPENV_VENV_IN_PROJECT")
      .env_remove("PIPENV_PIPFILE");
    command
  }

  async fn pipenv(&self, project_dir: &Path, args: &[&str]) -> Result<ProcessOutput, ProcessError> {
    let mut command = self.command(project_dir);
    command.args(args);
    process::run(command, self.timeout).await
  }
}

impl DependencyTool for Pipenv {
  async fn create_env(&self, unit: &str, project_dir: &Path) -> Result<PathBuf, DependencyError> {
    let wrap = |source| DependencyError::CreateEnv {
      unit: unit.to_string(),
      source,
    };

    self.pipenv(project_dir, &["--python", "3"]).await.map_err(wrap)?;
    let output = match self.pipenv(project_dir, &["--venv"]).await {
      Ok(output) => output,
      Err(source) => {
        // The environment exists but nobody holds it yet.
        if let Err(e) = self.pipenv(project_dir, &["--rm"]).await {
          warn!(unit = %unit, error = %e, "failed to remove half-created environment");
        }
        return Err(wrap(source));
      }
    };
    let root = last_line(&output.stdout);
    debug!(unit = %unit, env = %root, "pipenv environment");
    Ok(PathBuf::from(root))
  }

  async fn library_dir(&self, unit: &str, project_dir: &Path) -> Result<PathBuf, DependencyError> {
    let output = self
      .pipenv(project_dir, &["run", "python", "-c", PURELIB_SCRIPT])
      .await
      .map_err(|source| DependencyError::LibraryDir {
        unit: unit.to_string(),
        source,
      })?;
    Ok(PathBuf::from(last_line(&output.stdout)))
  }

  async fn install(&self, unit: &str, project_dir: &Path) -> Result<(), DependencyError> {
    self
      .pipenv(project_dir, &["install"])
      .await
      .map(|_| ())
      .map_err(|source| DependencyError::Install {
        unit: unit.to_string(),
        source,
      })
  }

  async fn remove_env(&self, unit: &str, project_dir: &Path) -> Result<(), DependencyError> {
    self
      .pipenv(project_dir, &["--rm"])
      .await
      .map(|_| ())
      .map_err(|source| DependencyError::RemoveEnv {
        unit: unit.to_string(),
        source,
      })
  }
}

/// Pipenv may print notices before the value we asked for.
fn last_line(stdout: &str) -> &str {
  stdout.lines().map(str::trim).rev().find(|l| !l.is_empty()).unwrap_or("")
}
