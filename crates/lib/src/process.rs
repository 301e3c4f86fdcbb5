//! External process execution.
//!
//! Every collaborator that lives outside this crate (the dependency tool, the
//! upload client, the container runtime) is driven through these helpers so
//! that failures and timeouts are reported the same way everywhere.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Errors raised while running an external process.
#[derive(Debug, Error)]
pub enum ProcessError {
  /// The program could not be started.
  #[error("failed to start {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// The program ran but exited unsuccessfully.
  #[error("{program} exited with code {code:?}: {stderr}")]
  Failed {
    program: String,
    code: Option<i32>,
    stderr: String,
  },

  /// The program did not finish within the allotted time and was killed.
  #[error("{program} did not finish within {}s", .timeout.as_secs())]
  Timeout { program: String, timeout: Duration },

  /// Reading or writing the program's streams failed.
  #[error("i/o error talking to {program}: {source}")]
  Io {
    program: String,
    #[source]
    source: std::io::Error,
  },
}

impl ProcessError {
  /// Captured stderr of a failed process, if any.
  pub fn stderr(&self) -> Option<&str> {
    match self {
      ProcessError::Failed { stderr, .. } => Some(stderr),
      _ => None,
    }
  }
}

/// Captured output of a successful process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
  pub stdout: String,
  pub stderr: String,
}

/// Locate a program, preferring the path in `env_override` when it is set.
pub fn locate_program(name: &str, env_override: &str) -> Option<PathBuf> {
  if let Some(path) = std::env::var_os(env_override).filter(|p| !p.is_empty()) {
    return Some(PathBuf::from(path));
  }
  which::which(name).ok()
}

/// Run a command to completion, capturing its output.
///
/// The child is killed if it is still running when `timeout` elapses.
pub async fn run(mut command: Command, timeout: Duration) -> Result<ProcessOutput, ProcessError> {
  let program = program_name(&command);
  debug!(program = %program, args = ?args_of(&command), "spawning process");

  command
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  let child = command.spawn().map_err(|source| ProcessError::Spawn {
    program: program.clone(),
    source,
  })?;

  let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
    Ok(result) => result.map_err(|source| ProcessError::Io {
      program: program.clone(),
      source,
    })?,
    Err(_) => return Err(ProcessError::Timeout { program, timeout }),
  };

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

  if !output.status.success() {
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }
    return Err(ProcessError::Failed {
      program,
      code: output.status.code(),
      stderr,
    });
  }

  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }

  Ok(ProcessOutput { stdout, stderr })
}

/// Run a command while relaying each line it prints as a log event.
///
/// `input`, when given, is written to the child's stdin before it is closed.
/// With no `timeout` the call waits for as long as the child runs.
pub async fn stream(command: Command, input: Option<&[u8]>, timeout: Option<Duration>) -> Result<(), ProcessError> {
  drive::<tokio::io::Sink>(command, input, timeout, None).await
}

/// Like [`stream`], but the child's stdout is copied byte for byte into `sink`.
///
/// Only stderr is relayed to the log.
pub async fn stream_into<W>(
  command: Command,
  input: Option<&[u8]>,
  timeout: Option<Duration>,
  sink: &mut W,
) -> Result<(), ProcessError>
where
  W: AsyncWrite + Unpin,
{
  drive(command, input, timeout, Some(sink)).await
}

async fn drive<W>(
  mut command: Command,
  input: Option<&[u8]>,
  timeout: Option<Duration>,
  sink: Option<&mut W>,
) -> Result<(), ProcessError>
where
  W: AsyncWrite + Unpin,
{
  let program = program_name(&command);
  debug!(program = %program, args = ?args_of(&command), "spawning streamed process");

  command
    .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
    program: program.clone(),
    source,
  })?;

  let io_err = |source| ProcessError::Io {
    program: program.clone(),
    source,
  };

  if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
    stdin.write_all(bytes).await.map_err(io_err)?;
    stdin.shutdown().await.map_err(io_err)?;
  }

  let stdout = child.stdout.take();
  let stderr = child.stderr.take();

  let run = async {
    let forward = async {
      match (sink, stdout) {
        (Some(sink), Some(mut stdout)) => {
          tokio::io::copy(&mut stdout, &mut *sink).await?;
          sink.flush().await?;
          Ok(String::new())
        }
        (_, stdout) => relay_lines(stdout).await,
      }
    };
    let (out, err) = tokio::join!(forward, relay_lines(stderr));
    out?;
    let stderr_tail = err?;
    let status = child.wait().await?;
    Ok::<(ExitStatus, String), std::io::Error>((status, stderr_tail))
  };

  let (status, stderr_tail) = match timeout {
    Some(limit) => match tokio::time::timeout(limit, run).await {
      Ok(result) => result.map_err(io_err)?,
      Err(_) => {
        return Err(ProcessError::Timeout {
          program,
          timeout: limit,
        });
      }
    },
    None => run.await.map_err(io_err)?,
  };

  if !status.success() {
    return Err(ProcessError::Failed {
      program,
      code: status.code(),
      stderr: stderr_tail,
    });
  }

  Ok(())
}

/// Relay each line of `reader` as an info event; returns the last line seen.
async fn relay_lines<R>(reader: Option<R>) -> std::io::Result<String>
where
  R: AsyncRead + Unpin,
{
  let Some(reader) = reader else {
    return Ok(String::new());
  };

  let mut last = String::new();
  let mut lines = BufReader::new(reader).lines();
  while let Some(line) = lines.next_line().await? {
    let line = line.trim_end();
    if line.is_empty() {
      continue;
    }
    info!("{}", line);
    last = line.to_string();
  }
  Ok(last)
}

fn program_name(command: &Command) -> String {
  let program = Path::new(command.as_std().get_program());
  program
    .file_name()
    .unwrap_or(program.as_os_str())
    .to_string_lossy()
    .to_string()
}

fn args_of(command: &Command) -> Vec<String> {
  command
    .as_std()
    .get_args()
    .map(OsStr::to_string_lossy)
    .map(|a| a.to_string())
    .collect()
}
