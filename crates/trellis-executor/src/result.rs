//! Run, module and step results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trellis_config::{Step, WorkflowKind};

use crate::context::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Running,
  Success,
  Failed,
  Skipped,
  Cancelled,
}

/// Outcome of one step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
  pub step_name: String,
  pub step_type: String,
  pub status: StepStatus,
  pub started_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub output: Value,
  #[serde(default, skip_serializing_if = "Params::is_empty")]
  pub exports: Params,
  /// Step selected by decision routing, if any.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next_step: Option<String>,
  /// Why the step was skipped.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl StepResult {
  /// A result in the `running` state, started now.
  pub fn running(step: &Step) -> Self {
    Self {
      step_name: step.name.clone(),
      step_type: step.step_type.to_string(),
      status: StepStatus::Running,
      started_at: Utc::now(),
      finished_at: None,
      output: Value::Null,
      exports: Params::new(),
      next_step: None,
      reason: None,
      error: None,
    }
  }

  pub fn success(step: &Step, output: Value) -> Self {
    let mut result = Self::running(step).finish(StepStatus::Success);
    result.output = output;
    result
  }

  pub fn failed(step: &Step, error: impl Into<String>) -> Self {
    let mut result = Self::running(step).finish(StepStatus::Failed);
    result.error = Some(error.into());
    result
  }

  pub fn skipped(step: &Step, reason: impl Into<String>) -> Self {
    let mut result = Self::running(step).finish(StepStatus::Skipped);
    result.reason = Some(reason.into());
    result
  }

  pub fn cancelled(step: &Step) -> Self {
    Self::running(step).finish(StepStatus::Cancelled)
  }

  pub fn with_export(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.exports.insert(name.into(), value.into());
    self
  }

  pub fn finish(mut self, status: StepStatus) -> Self {
    self.status = status;
    self.finished_at = Some(Utc::now());
    self
  }

  pub fn is_success(&self) -> bool {
    self.status == StepStatus::Success
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Running,
  Completed,
  Failed,
  Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
  Completed,
  Failed,
  Skipped,
  Cancelled,
}

impl From<RunStatus> for ModuleStatus {
  fn from(status: RunStatus) -> Self {
    match status {
      RunStatus::Completed => ModuleStatus::Completed,
      RunStatus::Cancelled => ModuleStatus::Cancelled,
      RunStatus::Running | RunStatus::Failed => ModuleStatus::Failed,
    }
  }
}

/// A module's entry inside a flow result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleResult {
  pub module_name: String,
  pub status: ModuleStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
  /// The module's own run, absent when it never started.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<Box<WorkflowResult>>,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
}

impl ModuleResult {
  /// An entry for a module that never ran.
  pub fn not_run(module_name: impl Into<String>, status: ModuleStatus, reason: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      module_name: module_name.into(),
      status,
      reason: Some(reason.into()),
      result: None,
      started_at: now,
      finished_at: now,
    }
  }
}

/// Result of a complete module or flow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
  pub run_id: String,
  pub workflow_name: String,
  pub kind: WorkflowKind,
  pub status: RunStatus,
  pub started_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
  /// Step results of a module, in declaration order.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub steps: Vec<StepResult>,
  /// Module results of a flow, in execution order (not declaration order).
  /// Modules that never ran because the flow was cancelled or aborted are
  /// appended after the ones that did, in declaration order.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub modules: Vec<ModuleResult>,
  #[serde(default, skip_serializing_if = "Params::is_empty")]
  pub exports: Params,
  /// First fatal error.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl WorkflowResult {
  pub fn step(&self, name: &str) -> Option<&StepResult> {
    self.steps.iter().find(|s| s.step_name == name)
  }

  pub fn module(&self, name: &str) -> Option<&ModuleResult> {
    self.modules.iter().find(|m| m.module_name == name)
  }

  pub fn is_success(&self) -> bool {
    self.status == RunStatus::Completed
  }
}
