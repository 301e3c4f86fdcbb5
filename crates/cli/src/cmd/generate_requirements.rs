//! Implementation of the `possum generate-requirements` command.

use std::env;
use std::path::Path;

use anyhow::{Context, Result};

use possum_lib::descriptor::Descriptor;
use possum_lib::requirements::{RequirementsStatus, generate_requirements};

use crate::output::{print_info, print_stat, print_success, print_warning};

pub fn cmd_generate_requirements(template: &Path) -> Result<()> {
  let working_dir = env::current_dir().context("Failed to determine working directory")?;
  let descriptor = Descriptor::load(&working_dir.join(template))?;

  let reports = generate_requirements(&descriptor, &working_dir)?;
  if reports.is_empty() {
    print_info("No python functions found in the template");
    return Ok(());
  }

  for report in &reports {
    match &report.status {
      RequirementsStatus::Written { path, packages } => {
        print_success(&format!("{}: wrote {}", report.unit, path.display()));
        for package in packages {
          print_stat("Package", package);
        }
      }
      RequirementsStatus::NoMatches => print_info(&format!("{}: no requirements.txt needed", report.unit)),
      RequirementsStatus::NoHandler => {
        print_warning(&format!("{}: no Handler declared, skipped", report.unit))
      }
    }
  }

  Ok(())
}
