use thiserror::Error;

/// Errors that can occur when loading workflow definitions.
#[derive(Debug, Error)]
pub enum LoadError {
  /// No workflow exists at the given path.
  #[error("workflow not found: {path}")]
  NotFound { path: String },

  /// IO error when reading workflow files.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// Failed to parse YAML.
  #[error("invalid workflow yaml: {0}")]
  Yaml(#[from] serde_yaml::Error),

  /// Failed to parse JSON.
  #[error("invalid workflow json: {0}")]
  Json(#[from] serde_json::Error),
}
