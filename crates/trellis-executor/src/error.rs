//! Error types for workflow execution.

use thiserror::Error;
use trellis_config::WorkflowKind;
use trellis_control::ControlError;
use trellis_loader::LoadError;
use trellis_workflow::WorkflowError;

/// Errors that can occur while executing modules, flows and steps.
#[derive(Debug, Error)]
pub enum ExecutionError {
  /// The dependency graph failed validation; nothing was executed.
  #[error(transparent)]
  Workflow(#[from] WorkflowError),

  /// A module definition could not be loaded.
  #[error("failed to load module: {0}")]
  Load(#[from] LoadError),

  #[error(transparent)]
  Control(#[from] ControlError),

  /// Rendering a template or evaluating a condition failed.
  #[error("template error in '{template}': {message}")]
  Template { template: String, message: String },

  /// A step ran and failed.
  #[error("step '{step}' failed: {message}")]
  StepExecution { step: String, message: String },

  /// A step is missing fields its type requires.
  #[error("invalid step '{step}': {message}")]
  InvalidStep { step: String, message: String },

  /// No executor is registered for the step's type.
  #[error("no executor registered for step type '{step_type}'")]
  NoExecutor { step_type: String },

  /// Step execution timed out.
  #[error("step '{step}' timed out after {seconds}s")]
  Timeout { step: String, seconds: u64 },

  /// A decision routed to a step that does not exist.
  #[error("step '{step}' routes to unknown step '{target}'")]
  UnknownDecisionTarget { step: String, target: String },

  /// A workflow of the wrong kind was passed.
  #[error("'{name}' is a {actual}, expected a {expected}")]
  WrongKind {
    name: String,
    expected: WorkflowKind,
    actual: WorkflowKind,
  },

  /// Execution was cancelled.
  #[error("execution cancelled")]
  Cancelled,

  /// A scheduler task panicked or was aborted.
  #[error("scheduler task failed: {message}")]
  Join { message: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),
}
