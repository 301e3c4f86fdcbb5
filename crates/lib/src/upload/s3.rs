//! S3 uploads through the AWS command line client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use super::{ObjectStore, UploadError};
use crate::process::{self, ProcessError, locate_program};

/// Environment variable overriding the AWS CLI binary.
pub const AWS_CLI_ENV: &str = "POSSUM_AWS_CLI";

const CREDENTIALS_MARKER: &str = "Unable to locate credentials";

/// Uploads objects with `aws s3 cp`.
#[derive(Debug, Clone)]
pub struct AwsCliStore {
  program: PathBuf,
  bucket: String,
  profile: Option<String>,
  timeout: Duration,
}

impl AwsCliStore {
  /// Locate the AWS CLI on `PATH` (or through `POSSUM_AWS_CLI`).
  pub fn locate(bucket: &str, profile: Option<&str>, timeout: Duration) -> Result<Self, UploadError> {
    let program = locate_program("aws", AWS_CLI_ENV).ok_or(UploadError::ClientNotFound("aws", AWS_CLI_ENV))?;
    Ok(Self::with_program(program, bucket, profile, timeout))
  }

  pub fn with_program(program: PathBuf, bucket: &str, profile: Option<&str>, timeout: Duration) -> Self {
    Self {
      program,
      bucket: bucket.to_string(),
      profile: profile.map(str::to_string),
      timeout,
    }
  }

  fn command(&self, local: &Path, key: &str) -> Command {
    let mut command = Command::new(&self.program);
    command
      .arg("s3")
      .arg("cp")
      .arg(local)
      .arg(format!("s3://{}/{}", self.bucket, key))
      .arg("--only-show-errors");
    if let Some(profile) = &self.profile {
      command.arg("--profile").arg(profile);
    }
    command
  }
}

impl ObjectStore for AwsCliStore {
  async fn upload(&self, local: &Path, key: &str) -> Result<(), UploadError> {
    debug!(file = %local.display(), bucket = %self.bucket, key = %key, "uploading");
    match process::run(self.command(local, key), self.timeout).await {
      Ok(_) => {
        info!(object = %format!("s3://{}/{}", self.bucket, key), "uploaded artifact");
        Ok(())
      }
      Err(ProcessError::Failed { ref stderr, .. }) if stderr.contains(CREDENTIALS_MARKER) => {
        Err(UploadError::MissingCredentials)
      }
      Err(source) => Err(UploadError::Client {
        path: local.to_path_buf(),
        source,
      }),
    }
  }
}
