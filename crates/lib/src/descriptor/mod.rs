//! Deployment descriptor model.
//!
//! Parses a serverless application template into typed resource records and
//! decides which resources the pipeline packages:
//!
//! - functions whose runtime (own, or from `Globals`) is a python runtime
//! - APIs whose `DefinitionUri` is a local file rather than a storage URI
//!
//! The underlying YAML document is kept intact so that serializing it again
//! only differs in the locations rewritten by [`rewrite`].

pub mod rewrite;
pub mod types;

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::{API_TYPE, FUNCTION_TYPE, GLOBAL_FUNCTION_KEY, HANDLER_FILE_EXTENSION, TARGET_RUNTIME_PREFIX};

pub use rewrite::{Location, update_resource};
pub use types::{ResourceKind, ResourceRecord, ResourceSet, SkipReason, SkippedResource};

/// Errors raised while reading, patching, or writing a descriptor.
#[derive(Debug, Error)]
pub enum DescriptorError {
  #[error("failed to read descriptor {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse descriptor: {0}")]
  Parse(#[source] serde_yaml::Error),

  #[error("descriptor has no 'Resources' mapping")]
  MissingResources,

  #[error("resource '{0}' not found in descriptor")]
  UnknownResource(String),

  #[error("resource '{0}' has no location property to rewrite")]
  NotRewritable(String),

  #[error("failed to serialize descriptor: {0}")]
  Serialize(#[source] serde_yaml::Error),

  #[error("failed to write descriptor {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// A parsed deployment descriptor.
#[derive(Debug, Clone)]
pub struct Descriptor {
  document: Value,
  lambda_resources: ResourceSet,
  api_resources: ResourceSet,
  skipped: Vec<SkippedResource>,
}

impl Descriptor {
  /// Read and parse the descriptor at `path`.
  pub fn load(path: &Path) -> Result<Self, DescriptorError> {
    let content = fs::read_to_string(path).map_err(|source| DescriptorError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content)
  }

  /// Parse descriptor content.
  pub fn parse(content: &str) -> Result<Self, DescriptorError> {
    let document: Value = serde_yaml::from_str(content).map_err(DescriptorError::Parse)?;

    let mut descriptor = Self {
      document,
      lambda_resources: ResourceSet::default(),
      api_resources: ResourceSet::default(),
      skipped: Vec::new(),
    };
    descriptor.classify_resources()?;
    Ok(descriptor)
  }

  /// Functions that will be packaged, in declaration order.
  pub fn lambda_resources(&self) -> &ResourceSet {
    &self.lambda_resources
  }

  /// APIs whose definition file will be uploaded, in declaration order.
  pub fn api_resources(&self) -> &ResourceSet {
    &self.api_resources
  }

  /// Function and API resources excluded from packaging.
  pub fn skipped(&self) -> &[SkippedResource] {
    &self.skipped
  }

  /// Look up `Globals.<kind>.<key>`.
  pub fn get_global(&self, kind: &str, key: &str) -> Option<&Value> {
    self.document.get("Globals")?.get(kind)?.get(key)
  }

  /// Source filename of a packaged function's handler (`app.handler` -> `app.py`).
  ///
  /// Returns `None` when the function is not packaged or declares no handler.
  pub fn get_handler_file(&self, name: &str) -> Option<String> {
    let handler = self.lambda_resources.get(name)?.handler.as_deref()?;
    let module = handler.split('.').next().filter(|m| !m.is_empty())?;
    Some(format!("{}.{}", module, HANDLER_FILE_EXTENSION))
  }

  /// Current value of a resource property in the live document.
  pub fn resource_property(&self, name: &str, key: &str) -> Option<&Value> {
    self.resources()?.get(name)?.get("Properties")?.get(key)
  }

  /// Serialize the document back to YAML.
  pub fn to_yaml(&self) -> Result<String, DescriptorError> {
    serde_yaml::to_string(&self.document).map_err(DescriptorError::Serialize)
  }

  /// Serialize the document to `path`.
  pub fn write(&self, path: &Path) -> Result<(), DescriptorError> {
    let content = self.to_yaml()?;
    fs::write(path, content).map_err(|source| DescriptorError::Write {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Replace a single property of a resource, creating `Properties` if needed.
  pub(crate) fn set_resource_property(&mut self, name: &str, key: &str, value: Value) -> Result<(), DescriptorError> {
    let resource = self
      .document
      .get_mut("Resources")
      .and_then(Value::as_mapping_mut)
      .and_then(|resources| resources.get_mut(name))
      .and_then(Value::as_mapping_mut)
      .ok_or_else(|| DescriptorError::UnknownResource(name.to_string()))?;

    if !resource.get("Properties").is_some_and(Value::is_mapping) {
      resource.insert(Value::from("Properties"), Value::Mapping(Mapping::new()));
    }

    if let Some(properties) = resource.get_mut("Properties").and_then(Value::as_mapping_mut) {
      properties.insert(Value::from(key), value);
    }
    Ok(())
  }

  fn resources(&self) -> Option<&Mapping> {
    self.document.get("Resources")?.as_mapping()
  }

  fn global_str(&self, key: &str) -> Option<String> {
    self
      .get_global(GLOBAL_FUNCTION_KEY, key)
      .and_then(Value::as_str)
      .map(str::to_string)
  }

  fn classify_resources(&mut self) -> Result<(), DescriptorError> {
    let resources = self.resources().ok_or(DescriptorError::MissingResources)?.clone();

    for (key, resource) in &resources {
      let Some(name) = key.as_str() else {
        continue;
      };

      let properties = resource
        .get("Properties")
        .and_then(Value::as_mapping)
        .cloned()
        .unwrap_or_default();

      match resource.get("Type").and_then(Value::as_str) {
        Some(FUNCTION_TYPE) => self.classify_function(name, properties),
        Some(API_TYPE) => self.classify_api(name, properties),
        _ => debug!(resource = %name, "ignoring resource"),
      }
    }

    Ok(())
  }

  fn classify_function(&mut self, name: &str, properties: Mapping) {
    let own_str = |key: &str| properties.get(key).and_then(Value::as_str).map(str::to_string);

    let runtime = own_str("Runtime").or_else(|| self.global_str("Runtime"));
    let code_uri = own_str("CodeUri").or_else(|| self.global_str("CodeUri"));
    let handler = own_str("Handler").or_else(|| self.global_str("Handler"));

    let reason = match (&runtime, &code_uri) {
      (None, _) => Some(SkipReason::MissingRuntime),
      (Some(rt), _) if !rt.to_lowercase().starts_with(TARGET_RUNTIME_PREFIX) => Some(SkipReason::RuntimeMismatch {
        runtime: rt.clone(),
      }),
      (_, None) => Some(SkipReason::MissingCodeUri),
      (_, Some(uri)) if is_storage_uri(uri) => Some(SkipReason::AlreadyUploaded { uri: uri.clone() }),
      _ => None,
    };

    if let Some(reason) = reason {
      self.skip(name, ResourceKind::Function, reason);
      return;
    }

    self.lambda_resources.push(ResourceRecord {
      name: name.to_string(),
      kind: ResourceKind::Function,
      properties,
      runtime,
      source_path: code_uri.map(PathBuf::from),
      handler,
      definition_path: None,
    });
  }

  fn classify_api(&mut self, name: &str, properties: Mapping) {
    let definition = properties.get("DefinitionUri").and_then(Value::as_str).map(str::to_string);

    match definition {
      None => self.skip(name, ResourceKind::ApiDefinition, SkipReason::NoInlineDefinition),
      Some(uri) if is_storage_uri(&uri) => {
        self.skip(name, ResourceKind::ApiDefinition, SkipReason::AlreadyUploaded { uri })
      }
      Some(path) => self.api_resources.push(ResourceRecord {
        name: name.to_string(),
        kind: ResourceKind::ApiDefinition,
        properties,
        runtime: None,
        source_path: None,
        handler: None,
        definition_path: Some(PathBuf::from(path)),
      }),
    }
  }

  fn skip(&mut self, name: &str, kind: ResourceKind, reason: SkipReason) {
    if reason.is_warning() {
      warn!(resource = %name, %reason, "resource will not be packaged");
    } else {
      info!(resource = %name, %reason, "resource left untouched");
    }
    self.skipped.push(SkippedResource {
      name: name.to_string(),
      kind,
      reason,
    });
  }
}

/// Whether a location already refers to object storage.
pub fn is_storage_uri(location: &str) -> bool {
  location.starts_with("s3://") || location.starts_with("file://")
}
