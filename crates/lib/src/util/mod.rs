//! Shared utilities.
//!
//! Common utilities used across the crate including hashing, filesystem
//! moves, and test helpers.

pub mod fs;
pub mod hash;
