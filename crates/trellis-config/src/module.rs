use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::param::ParamValue;
use crate::workflow::Workflow;

/// A module's presence inside a flow.
///
/// Either `path` (resolved through the workflow loader) or an inline
/// `module` definition must be set. An inline definition wins when both are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRef {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub module: Option<Box<Workflow>>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
  /// Condition expression; the module is skipped when it evaluates false.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<String>,
  /// Parameter overrides, taking precedence over flow variables and exports.
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub params: HashMap<String, ParamValue>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub on_success: Vec<Action>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub on_error: Vec<Action>,
}

impl ModuleRef {
  /// Reference a module file by path.
  pub fn from_path(name: impl Into<String>, path: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      path: Some(path.into()),
      module: None,
      depends_on: Vec::new(),
      condition: None,
      params: HashMap::new(),
      on_success: Vec::new(),
      on_error: Vec::new(),
    }
  }

  /// Embed a module definition directly.
  pub fn inline(name: impl Into<String>, module: Workflow) -> Self {
    Self {
      name: name.into(),
      path: None,
      module: Some(Box::new(module)),
      depends_on: Vec::new(),
      condition: None,
      params: HashMap::new(),
      on_success: Vec::new(),
      on_error: Vec::new(),
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

  pub fn is_inline(&self) -> bool {
    self.module.is_some()
  }

  /// Whether a failure of this module fails the whole flow.
  pub fn aborts_on_error(&self) -> bool {
    Action::any_abort(&self.on_error)
  }
}
