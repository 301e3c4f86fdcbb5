//! possum-lib: incremental packaging for serverless application templates.
//!
//! The pipeline reads a deployment descriptor, decides per function unit
//! whether it needs rebuilding, installs each unit's dependencies in an
//! isolated environment, archives the result, uploads the artifact batch, and
//! rewrites the descriptor to point at the uploaded locations.
//!
//! - `descriptor`: typed view over the template plus the rewriter
//! - `cache`: persisted content fingerprints and artifact locations
//! - `deps`: isolated dependency installation
//! - `archive` / `upload`: artifact production and object storage
//! - `package`: the orchestration of a single run

pub mod archive;
pub mod cache;
pub mod consts;
pub mod container;
pub mod context;
pub mod deps;
pub mod descriptor;
pub mod package;
pub mod platform;
pub mod process;
pub mod requirements;
pub mod upload;
pub mod util;
