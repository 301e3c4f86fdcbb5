//! Descriptor rewriting.
//!
//! Points packaged resources at their artifact locations. This is the only
//! path through which the pipeline mutates the document.

use serde_yaml::Value;

use crate::context::StorageTarget;

use super::{Descriptor, DescriptorError, ResourceKind};

/// New location for a packaged resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location<'a> {
  /// An object uploaded during this run, addressed under the run prefix.
  Object(&'a str),
  /// A URI reused verbatim, e.g. from a previous run.
  Uri(&'a str),
}

/// Rewrite the location property of resource `name`.
///
/// Functions get their `CodeUri` replaced, APIs their `DefinitionUri`.
/// Returns the URI that was written.
pub fn update_resource(
  descriptor: &mut Descriptor,
  name: &str,
  target: &StorageTarget,
  location: Location<'_>,
) -> Result<String, DescriptorError> {
  let kind = if descriptor.lambda_resources().contains(name) {
    ResourceKind::Function
  } else if descriptor.api_resources().contains(name) {
    ResourceKind::ApiDefinition
  } else if !descriptor_has_resource(descriptor, name) {
    return Err(DescriptorError::UnknownResource(name.to_string()));
  } else {
    ResourceKind::Other
  };

  let property = kind
    .location_property()
    .ok_or_else(|| DescriptorError::NotRewritable(name.to_string()))?;

  let uri = match location {
    Location::Object(object) => target.uri_for(object),
    Location::Uri(uri) => uri.to_string(),
  };

  descriptor.set_resource_property(name, property, Value::from(uri.as_str()))?;
  Ok(uri)
}

fn descriptor_has_resource(descriptor: &Descriptor, name: &str) -> bool {
  descriptor.resources().is_some_and(|resources| resources.contains_key(name))
}
