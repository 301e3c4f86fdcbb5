//! Implementation of the `possum package` command.
//!
//! Resolves the run context from the command line and environment, prints
//! the plan, runs the pipeline, and emits the rewritten template. With
//! `--docker` the same command line is re-run inside a container instead.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use tracing::debug;

use possum_lib::container::{ContainerRuntime, ContainerSpec, PROJECT_DIR_ENV, forwarded_args};
use possum_lib::context::{RunContext, StorageTarget};
use possum_lib::deps::Pipenv;
use possum_lib::descriptor::ResourceKind;
use possum_lib::package::{PackageOutcome, PackageSession};
use possum_lib::platform::paths;
use possum_lib::upload::Backend;

use crate::output::{format_duration, print_info, print_stat, print_success, print_unit, print_warning, shorten_uri};

pub struct PackageOptions {
  pub destination: String,
  pub template: PathBuf,
  pub output: Option<PathBuf>,
  pub profile: Option<String>,
  pub clean: bool,
  pub docker: bool,
  pub docker_image: String,
  pub timeout: Duration,
}

pub fn cmd_package(opts: PackageOptions) -> Result<()> {
  let start = Instant::now();
  let working_dir = env::current_dir().context("Failed to determine working directory")?;
  let working_dir = dunce::canonicalize(&working_dir).unwrap_or(working_dir);

  if opts.docker {
    return run_in_container(&opts, &working_dir);
  }

  let target = StorageTarget::parse(&opts.destination, None, SystemTime::now())?;
  let mut ctx = RunContext::new(working_dir.clone(), paths::state_dir(), target);
  ctx.force = opts.clean;
  ctx.timeout = opts.timeout;
  ctx.profile = opts.profile.clone().or_else(|| env::var("AWS_PROFILE").ok().filter(|p| !p.is_empty()));
  if let Some(project) = env::var_os(PROJECT_DIR_ENV).filter(|p| !p.is_empty()) {
    ctx.project_key = PathBuf::from(project);
  }
  debug!(context = ?ctx, "resolved run context");

  let template = working_dir.join(&opts.template);
  let session = PackageSession::prepare(ctx, &template).context("Failed to prepare packaging run")?;
  print_plan(&session);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let outcome = rt.block_on(async {
    let ctx = session.context();
    let store = Backend::for_target(&ctx.target, ctx.profile.as_deref(), ctx.timeout)?;
    let tool = if session.requires_dependency_tool() {
      Some(Pipenv::locate(ctx.timeout)?)
    } else {
      None
    };
    Ok::<_, anyhow::Error>(session.run(tool.as_ref(), &store).await?)
  });
  let outcome = outcome.context("Packaging failed")?;

  emit_template(&outcome, opts.output.as_deref())?;
  print_summary(&outcome, start.elapsed());
  Ok(())
}

fn print_plan(session: &PackageSession) {
  let descriptor = session.descriptor();

  for skipped in descriptor.skipped() {
    if skipped.reason.is_warning() {
      print_warning(&format!("{}: skipped, {}", skipped.name, skipped.reason));
    } else {
      print_info(&format!("{}: left untouched, {}", skipped.name, skipped.reason));
    }
  }

  let functions: Vec<&str> = descriptor.lambda_resources().names().collect();
  let apis: Vec<&str> = descriptor.api_resources().names().collect();

  if functions.is_empty() && apis.is_empty() {
    print_info("No functions or API definitions to package");
    return;
  }
  if !functions.is_empty() {
    print_info(&format!("Functions to package: {}", functions.join(", ")));
  }
  if !apis.is_empty() {
    print_info(&format!("API definitions to upload: {}", apis.join(", ")));
  }

  for unit in session.plan() {
    let kind = match unit.kind {
      ResourceKind::ApiDefinition => "api",
      _ => "function",
    };
    let detail = format!("{} ({})", unit.decision, kind);
    print_unit(unit.decision.is_rebuild(), &unit.name, &detail);
  }
  eprintln!();
}

fn emit_template(outcome: &PackageOutcome, output: Option<&Path>) -> Result<()> {
  match output {
    Some(path) => {
      outcome.descriptor.write(path)?;
      print_success(&format!("Deployment template written to {}", path.display()));
    }
    None => print!("{}", outcome.descriptor.to_yaml()?),
  }
  Ok(())
}

fn print_summary(outcome: &PackageOutcome, elapsed: Duration) {
  print_success("Packaging complete!");
  print_stat("Rebuilt", &outcome.rebuilt.len().to_string());
  print_stat("Reused", &outcome.reused.len().to_string());
  print_stat("Installs", &outcome.installs.to_string());
  print_stat("Uploaded", &outcome.uploaded.len().to_string());
  for key in &outcome.uploaded {
    print_stat("Object", &shorten_uri(key, 72));
  }
  print_stat("Duration", &format_duration(elapsed));
}

fn run_in_container(opts: &PackageOptions, working_dir: &Path) -> Result<()> {
  let state_dir = paths::state_dir();
  fs::create_dir_all(&state_dir).with_context(|| format!("Failed to create {}", state_dir.display()))?;

  let runtime = ContainerRuntime::locate(opts.timeout)?;
  let spec = ContainerSpec::for_invocation(
    &opts.docker_image,
    forwarded_args(env::args()),
    working_dir,
    &state_dir,
    Some(&paths::aws_config_dir()),
  );

  print_info(&format!("Running in container image {}", opts.docker_image));
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(async { runtime.run(&spec, &mut tokio::io::stdout()).await })
    .context("Containerized packaging failed")?;
  Ok(())
}
