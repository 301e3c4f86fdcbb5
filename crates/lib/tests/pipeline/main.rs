//! End-to-end tests of packaging runs against fake collaborators.

mod common;
mod package_tests;
