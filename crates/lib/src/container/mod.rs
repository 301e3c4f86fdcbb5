//! Isolated runs inside a container.
//!
//! With `--docker` the CLI re-issues its own command line inside an image
//! that carries the dependency tool and the upload client. The project, the
//! state directory and the AWS configuration are bind-mounted so the inner
//! run sees the same files and writes the same cache as a host run would.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::process::Command;
use tracing::info;

use crate::consts::{APP_NAME, CONTAINER_WORKDIR};
use crate::process::{self, ProcessError, locate_program};

/// Environment variable overriding the container runtime binary.
pub const DOCKER_ENV: &str = "POSSUM_DOCKER";

/// Tells a containerized run which host directory it is packaging, so its
/// cache file matches the one a host run would use.
pub const PROJECT_DIR_ENV: &str = "POSSUM_PROJECT_DIR";

/// State directory as seen from inside the container.
pub const CONTAINER_STATE_DIR: &str = "/root/.possum";

const CONTAINER_AWS_DIR: &str = "/root/.aws";

/// Host credentials forwarded when set.
const FORWARDED_ENV: &[&str] = &["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_SESSION_TOKEN"];

#[derive(Debug, Error)]
pub enum ContainerError {
  #[error("'{0}' could not be found; install it or point {1} at it")]
  RuntimeNotFound(&'static str, &'static str),

  #[error("the container image '{0}' could not be found; build it with 'possum build-docker-image'")]
  ImageNotFound(String),

  #[error("failed to inspect image '{image}': {source}")]
  Inspect {
    image: String,
    #[source]
    source: ProcessError,
  },

  #[error("container run failed: {0}")]
  Run(#[source] ProcessError),

  #[error("unable to build the container image: {0}")]
  Build(#[source] ProcessError),

  #[error("unable to tag the container image: {0}")]
  Tag(#[source] ProcessError),
}

/// A bind mount from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
  pub host: PathBuf,
  pub container: String,
  pub read_only: bool,
}

impl Mount {
  fn to_arg(&self) -> String {
    let mut arg = format!("{}:{}", self.host.display(), self.container);
    if self.read_only {
      arg.push_str(":ro");
    }
    arg
  }
}

/// Everything needed to start one containerized run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
  pub image: String,
  /// Command executed in the container, program first.
  pub command: Vec<String>,
  pub mounts: Vec<Mount>,
  /// Variables passed through from the host by name.
  pub forwarded_env: Vec<String>,
  /// Variables set to fixed values.
  pub env: Vec<(String, String)>,
  pub workdir: String,
}

impl ContainerSpec {
  /// Spec re-running `args` (without the isolation flags) on `project_dir`.
  pub fn for_invocation(
    image: &str,
    args: Vec<String>,
    project_dir: &Path,
    state_dir: &Path,
    aws_config_dir: Option<&Path>,
  ) -> Self {
    let mut mounts = Vec::new();
    if let Some(aws) = aws_config_dir.filter(|p| p.is_dir()) {
      mounts.push(Mount {
        host: aws.to_path_buf(),
        container: CONTAINER_AWS_DIR.to_string(),
        read_only: true,
      });
    }
    mounts.push(Mount {
      host: state_dir.to_path_buf(),
      container: CONTAINER_STATE_DIR.to_string(),
      read_only: false,
    });
    mounts.push(Mount {
      host: project_dir.to_path_buf(),
      container: CONTAINER_WORKDIR.to_string(),
      read_only: false,
    });

    let mut command = vec![APP_NAME.to_string()];
    command.extend(args);

    Self {
      image: image.to_string(),
      command,
      mounts,
      forwarded_env: FORWARDED_ENV.iter().map(|v| v.to_string()).collect(),
      env: vec![
        (crate::platform::paths::HOME_ENV.to_string(), CONTAINER_STATE_DIR.to_string()),
        (PROJECT_DIR_ENV.to_string(), project_dir.display().to_string()),
      ],
      workdir: CONTAINER_WORKDIR.to_string(),
    }
  }

  /// Arguments to `docker run`.
  pub fn run_args(&self) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--rm".to_string(), "-w".to_string(), self.workdir.clone()];
    for name in &self.forwarded_env {
      args.push("-e".to_string());
      args.push(name.clone());
    }
    for (name, value) in &self.env {
      args.push("-e".to_string());
      args.push(format!("{}={}", name, value));
    }
    for mount in &self.mounts {
      args.push("-v".to_string());
      args.push(mount.to_arg());
    }
    args.push(self.image.clone());
    args.extend(self.command.iter().cloned());
    args
  }
}

/// Strip the program name and the container flags from a command line.
pub fn forwarded_args<I>(args: I) -> Vec<String>
where
  I: IntoIterator<Item = String>,
{
  let mut out = Vec::new();
  let mut iter = args.into_iter().skip(1);
  while let Some(arg) = iter.next() {
    if arg == "--docker" || arg.starts_with("--docker-image=") {
      continue;
    }
    if arg == "--docker-image" {
      iter.next();
      continue;
    }
    out.push(arg);
  }
  out
}

/// Build file for the default image.
pub fn dockerfile(version: &str) -> String {
  format!(
    r#"FROM public.ecr.aws/sam/build-python3.12

RUN pip install -U pip && pip install pipenv awscli

RUN curl -sSf https://sh.rustup.rs | sh -s -- -y --profile minimal \
 && /root/.cargo/bin/cargo install possum-cli --version {version} --locked \
 && cp /root/.cargo/bin/{app} /usr/local/bin/{app} \
 && rm -rf /root/.cargo /root/.rustup

WORKDIR {workdir}
"#,
    version = version,
    app = APP_NAME,
    workdir = CONTAINER_WORKDIR,
  )
}

/// The `docker` command line client.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
  program: PathBuf,
  timeout: Duration,
}

impl ContainerRuntime {
  /// Locate docker on `PATH` (or through `POSSUM_DOCKER`).
  pub fn locate(timeout: Duration) -> Result<Self, ContainerError> {
    let program = locate_program("docker", DOCKER_ENV).ok_or(ContainerError::RuntimeNotFound("docker", DOCKER_ENV))?;
    Ok(Self::with_program(program, timeout))
  }

  pub fn with_program(program: PathBuf, timeout: Duration) -> Self {
    Self { program, timeout }
  }

  fn command<I, S>(&self, args: I) -> Command
  where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
  {
    let mut command = Command::new(&self.program);
    command.args(args);
    command
  }

  /// Whether `image` exists locally.
  pub async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
    match process::run(self.command(["image", "inspect", image]), self.timeout).await {
      Ok(_) => Ok(true),
      Err(ProcessError::Failed { .. }) => Ok(false),
      Err(source) => Err(ContainerError::Inspect {
        image: image.to_string(),
        source,
      }),
    }
  }

  /// Run `spec`. The container's stdout (the rewritten template) is copied
  /// unchanged into `stdout`; its stderr is relayed line by line to the log.
  ///
  /// The run is not bounded by the timeout: the inner invocation applies it
  /// to each of its own external calls.
  pub async fn run<W>(&self, spec: &ContainerSpec, stdout: &mut W) -> Result<(), ContainerError>
  where
    W: AsyncWrite + Unpin,
  {
    if !self.image_exists(&spec.image).await? {
      return Err(ContainerError::ImageNotFound(spec.image.clone()));
    }

    info!(image = %spec.image, "running container");
    process::stream_into(self.command(spec.run_args()), None, None, stdout)
      .await
      .map_err(ContainerError::Run)
  }

  /// Build `possum:<version>` and tag it `possum:latest`; returns the versioned tag.
  pub async fn build_image(&self, version: &str) -> Result<String, ContainerError> {
    let tag = format!("{}:{}", APP_NAME, version);
    let latest = format!("{}:latest", APP_NAME);

    info!(tag = %tag, "building image (this may take several minutes)");
    let build = self.command(["build", "--pull", "--rm", "-t", tag.as_str(), "-"]);
    process::stream(build, Some(dockerfile(version).as_bytes()), None)
      .await
      .map_err(ContainerError::Build)?;

    info!(tag = %latest, "tagging image");
    process::run(self.command(["tag", tag.as_str(), latest.as_str()]), self.timeout)
      .await
      .map_err(ContainerError::Tag)?;

    Ok(tag)
  }
}
