use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use possum_lib::consts::DEFAULT_IMAGE;

mod cmd;
mod output;

use cmd::{PackageOptions, cmd_build_image, cmd_generate_requirements, cmd_package};
use output::print_error;

/// Package python functions of a serverless application template with
/// per-function dependencies.
#[derive(Parser)]
#[command(name = "possum")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build and upload function artifacts, then emit the deployment template
  Package {
    /// Bucket to upload to, optionally with a path (`bucket/path`) used
    /// instead of the default `possum-<timestamp>` prefix. `file:///dir`
    /// uploads to a local directory.
    destination: String,

    /// Template to package
    #[arg(short, long, default_value = "template.yaml")]
    template: PathBuf,

    /// Write the deployment template here instead of stdout
    #[arg(short = 'o', long = "output-template")]
    output: Option<PathBuf>,

    /// Credential profile for uploads (defaults to AWS_PROFILE)
    #[arg(short, long)]
    profile: Option<String>,

    /// Rebuild every function, ignoring the previous run
    #[arg(short, long)]
    clean: bool,

    /// Run inside a container
    #[arg(long)]
    docker: bool,

    /// Image for --docker
    #[arg(long, default_value = DEFAULT_IMAGE)]
    docker_image: String,

    /// Upper bound for each external command
    #[arg(long, default_value = "15m", value_parser = humantime::parse_duration)]
    timeout: Duration,
  },

  /// Write a requirements.txt per function from the project's root Pipfile
  GenerateRequirements {
    /// Template listing the functions
    #[arg(short, long, default_value = "template.yaml")]
    template: PathBuf,
  },

  /// Build the default container image used by --docker
  BuildDockerImage {
    /// Upper bound for tagging the built image
    #[arg(long, default_value = "15m", value_parser = humantime::parse_duration)]
    timeout: Duration,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  let result = match cli.command {
    Commands::Package {
      destination,
      template,
      output,
      profile,
      clean,
      docker,
      docker_image,
      timeout,
    } => cmd_package(PackageOptions {
      destination,
      template,
      output,
      profile,
      clean,
      docker,
      docker_image,
      timeout,
    }),
    Commands::GenerateRequirements { template } => cmd_generate_requirements(&template),
    Commands::BuildDockerImage { timeout } => cmd_build_image(timeout),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

/// Logs go to stderr; stdout carries the deployment template.
fn init_logging(verbose: bool) {
  let default = if verbose { "warn,possum=debug" } else { "warn,possum=info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}
