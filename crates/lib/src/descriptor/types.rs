//! Typed records over descriptor resources.

use std::fmt;
use std::path::PathBuf;

use serde_yaml::Mapping;

/// Classification of a descriptor resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
  Function,
  ApiDefinition,
  Other,
}

impl ResourceKind {
  /// Property holding the resource's deployable location.
  pub fn location_property(&self) -> Option<&'static str> {
    match self {
      ResourceKind::Function => Some("CodeUri"),
      ResourceKind::ApiDefinition => Some("DefinitionUri"),
      ResourceKind::Other => None,
    }
  }
}

/// One resource of the descriptor, as seen by the pipeline.
///
/// Function records carry `source_path` and `handler`; API records carry
/// `definition_path`. Properties are a snapshot taken at parse time; the
/// live document is only changed through the rewriter.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
  pub name: String,
  pub kind: ResourceKind,
  pub properties: Mapping,
  pub runtime: Option<String>,
  pub source_path: Option<PathBuf>,
  pub handler: Option<String>,
  pub definition_path: Option<PathBuf>,
}

/// Resources of one kind, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSet {
  records: Vec<ResourceRecord>,
}

impl ResourceSet {
  pub(crate) fn push(&mut self, record: ResourceRecord) {
    self.records.push(record);
  }

  pub fn get(&self, name: &str) -> Option<&ResourceRecord> {
    self.records.iter().find(|r| r.name == name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  pub fn iter(&self) -> impl Iterator<Item = &ResourceRecord> {
    self.records.iter()
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.records.iter().map(|r| r.name.as_str())
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

impl<'a> IntoIterator for &'a ResourceSet {
  type Item = &'a ResourceRecord;
  type IntoIter = std::slice::Iter<'a, ResourceRecord>;

  fn into_iter(self) -> Self::IntoIter {
    self.records.iter()
  }
}

/// Why a function or API resource was left out of packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
  /// The function targets a runtime this tool does not package.
  RuntimeMismatch { runtime: String },
  /// Neither the function nor `Globals` declares a runtime.
  MissingRuntime,
  /// The function has no local `CodeUri` directory.
  MissingCodeUri,
  /// The API has no `DefinitionUri` file to upload.
  NoInlineDefinition,
  /// The location already points at object storage.
  AlreadyUploaded { uri: String },
}

impl SkipReason {
  /// Whether the skip deserves a warning rather than an informational note.
  pub fn is_warning(&self) -> bool {
    !matches!(self, SkipReason::AlreadyUploaded { .. })
  }
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SkipReason::RuntimeMismatch { runtime } => {
        write!(f, "runtime '{}' is not packaged by possum; package it separately", runtime)
      }
      SkipReason::MissingRuntime => write!(f, "no Runtime declared"),
      SkipReason::MissingCodeUri => write!(f, "no local CodeUri declared"),
      SkipReason::NoInlineDefinition => write!(f, "no DefinitionUri file to upload"),
      SkipReason::AlreadyUploaded { uri } => write!(f, "already points at {}", uri),
    }
  }
}

/// A resource excluded from packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedResource {
  pub name: String,
  pub kind: ResourceKind,
  pub reason: SkipReason,
}
