use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether a workflow file describes a module (steps) or a flow (modules).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
  #[default]
  Module,
  Flow,
}

impl fmt::Display for WorkflowKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkflowKind::Module => f.write_str("module"),
      WorkflowKind::Flow => f.write_str("flow"),
    }
  }
}

/// The type of a step, used to pick the executor that runs it.
///
/// Unknown type names are kept as [`StepType::Other`] so custom executors can
/// be registered for them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
  Bash,
  Http,
  Foreach,
  Other(String),
}

impl StepType {
  pub fn as_str(&self) -> &str {
    match self {
      StepType::Bash => "bash",
      StepType::Http => "http",
      StepType::Foreach => "foreach",
      StepType::Other(name) => name,
    }
  }
}

impl From<String> for StepType {
  fn from(value: String) -> Self {
    match value.as_str() {
      "bash" => StepType::Bash,
      "http" => StepType::Http,
      "foreach" => StepType::Foreach,
      _ => StepType::Other(value),
    }
  }
}

impl From<&str> for StepType {
  fn from(value: &str) -> Self {
    StepType::from(value.to_string())
  }
}

impl From<StepType> for String {
  fn from(value: StepType) -> Self {
    value.as_str().to_string()
  }
}

impl fmt::Display for StepType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
