use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
  #[error("duplicate name in graph: {0}")]
  DuplicateName(String),

  #[error("'{node}' depends on unknown '{dependency}'")]
  UnknownDependency { node: String, dependency: String },

  #[error("circular dependency detected: {}", path.join(" -> "))]
  CircularDependency { path: Vec<String> },

  #[error("{kind} '{name}' has no {expected}")]
  Empty {
    kind: String,
    name: String,
    expected: &'static str,
  },

  #[error("module reference '{0}' has neither a path nor an inline definition")]
  UnresolvableModule(String),
}
