use std::path::Path;

use async_trait::async_trait;
use trellis_config::Workflow;

use crate::error::LoadError;

/// Source of workflow definitions.
#[async_trait]
pub trait WorkflowLoader: Send + Sync {
  /// Load and parse the workflow referenced by `path`.
  ///
  /// Relative paths are resolved by the implementation (for the filesystem
  /// loader, against its root directory).
  async fn load_by_path(&self, path: &str) -> Result<Workflow, LoadError>;
}

/// On-disk encoding of a workflow file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowFormat {
  Yaml,
  Json,
}

impl WorkflowFormat {
  /// Pick the format from a file extension, defaulting to YAML.
  pub fn from_path(path: &Path) -> Self {
    match path.extension().and_then(|e| e.to_str()) {
      Some("json") => WorkflowFormat::Json,
      _ => WorkflowFormat::Yaml,
    }
  }
}

/// Parse workflow file contents.
pub fn parse_workflow(content: &str, format: WorkflowFormat) -> Result<Workflow, LoadError> {
  let workflow = match format {
    WorkflowFormat::Yaml => serde_yaml::from_str(content)?,
    WorkflowFormat::Json => serde_json::from_str(content)?,
  };
  Ok(workflow)
}
