mod build_image;
mod generate_requirements;
mod package;

pub use build_image::cmd_build_image;
pub use generate_requirements::cmd_generate_requirements;
pub use package::{PackageOptions, cmd_package};
