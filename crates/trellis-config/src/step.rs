use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::decision::DecisionConfig;
use crate::enums::StepType;
use crate::param::ParamValue;

/// A single unit of work inside a module.
///
/// Common fields apply to every step type; the type-specific fields are only
/// read by the executor registered for [`Step::step_type`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
  pub name: String,
  #[serde(rename = "type")]
  pub step_type: StepType,

  /// Names of sibling steps that must complete before this one starts.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
  /// Condition expression; the step is skipped when it evaluates false.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub pre_condition: Option<String>,
  /// Timeout in seconds, enforced by the step's executor.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout: Option<u64>,
  /// Values exported into the run context after the step succeeds.
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub exports: HashMap<String, ParamValue>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub decision: Option<DecisionConfig>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub on_success: Vec<Action>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub on_error: Vec<Action>,

  // bash
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub command: Option<ParamValue>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub commands: Vec<ParamValue>,

  // http
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<ParamValue>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub method: Option<String>,
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub headers: HashMap<String, ParamValue>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<ParamValue>,

  // foreach
  /// Path of the file whose lines are iterated.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub input: Option<ParamValue>,
  /// Variable name each line is bound to (default `line`).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variable: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub threads: Option<usize>,
  /// Step run once per line.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub step: Option<Box<Step>>,
}

impl Step {
  /// Create a step with only a name and type set.
  pub fn new(name: impl Into<String>, step_type: impl Into<StepType>) -> Self {
    Self {
      name: name.into(),
      step_type: step_type.into(),
      depends_on: Vec::new(),
      pre_condition: None,
      timeout: None,
      exports: HashMap::new(),
      decision: None,
      on_success: Vec::new(),
      on_error: Vec::new(),
      command: None,
      commands: Vec::new(),
      url: None,
      method: None,
      headers: HashMap::new(),
      body: None,
      input: None,
      variable: None,
      threads: None,
      step: None,
    }
  }

  pub fn with_depends_on<I, S>(mut self, deps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.depends_on = deps.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_command(mut self, command: impl Into<String>) -> Self {
    self.command = Some(command.into());
    self
  }

  /// Whether a failure of this step lets its dependents run anyway.
  pub fn continues_on_error(&self) -> bool {
    Action::any_continue(&self.on_error)
  }
}
