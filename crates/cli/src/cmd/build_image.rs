//! Implementation of the `possum build-docker-image` command.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use possum_lib::container::ContainerRuntime;

use crate::output::{format_duration, print_info, print_stat, print_success};

pub fn cmd_build_image(timeout: Duration) -> Result<()> {
  let start = Instant::now();
  let version = env!("CARGO_PKG_VERSION");
  let runtime = ContainerRuntime::locate(timeout)?;

  print_info(&format!("Building possum:{} (this may take several minutes)", version));
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let tag = rt.block_on(runtime.build_image(version)).context("Image build failed")?;

  print_success("Image built");
  print_stat("Tags", &format!("{}, possum:latest", tag));
  print_stat("Duration", &format_duration(start.elapsed()));
  Ok(())
}
