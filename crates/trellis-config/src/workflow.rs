use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::enums::WorkflowKind;
use crate::module::ModuleRef;
use crate::param::ParamValue;
use crate::step::Step;

/// A module or flow definition as written in a workflow file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub name: String,
  #[serde(default)]
  pub kind: WorkflowKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// Default parameter values, overridden by caller-supplied params.
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub params: HashMap<String, ParamValue>,
  /// Steps of a module.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub steps: Vec<Step>,
  /// Modules of a flow.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub modules: Vec<ModuleRef>,
}

impl Workflow {
  /// Create an empty module definition.
  pub fn module(name: impl Into<String>, steps: Vec<Step>) -> Self {
    Self {
      name: name.into(),
      kind: WorkflowKind::Module,
      description: None,
      params: HashMap::new(),
      steps,
      modules: Vec::new(),
    }
  }

  /// Create an empty flow definition.
  pub fn flow(name: impl Into<String>, modules: Vec<ModuleRef>) -> Self {
    Self {
      name: name.into(),
      kind: WorkflowKind::Flow,
      description: None,
      params: HashMap::new(),
      steps: Vec::new(),
      modules,
    }
  }

  /// Get a step by name.
  pub fn get_step(&self, name: &str) -> Option<&Step> {
    self.steps.iter().find(|s| s.name == name)
  }

  /// Whether any step declares a dependency (selects concurrent scheduling).
  pub fn has_step_dependencies(&self) -> bool {
    self.steps.iter().any(|s| !s.depends_on.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{Action, StepType};

  #[test]
  fn test_parse_module_yaml() {
    let yaml = r#"
name: recon
params:
  target: example.com
steps:
  - name: resolve
    type: bash
    command: "dig {{ target }}"
  - name: probe
    type: http
    url: "https://{{ target }}/"
    depends_on: [resolve]
    on_error:
      - action: continue
  - name: custom
    type: screenshot
"#;
    let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(workflow.kind, WorkflowKind::Module);
    assert_eq!(workflow.steps.len(), 3);
    assert_eq!(workflow.steps[0].step_type, StepType::Bash);
    assert_eq!(workflow.steps[1].depends_on, vec!["resolve".to_string()]);
    assert!(workflow.steps[1].continues_on_error());
    assert_eq!(
      workflow.steps[2].step_type,
      StepType::Other("screenshot".to_string())
    );
    assert!(workflow.has_step_dependencies());
  }

  #[test]
  fn test_parse_flow_yaml() {
    let yaml = r#"
name: full
kind: flow
modules:
  - name: recon
    path: recon.yaml
  - name: scan
    path: scan.yaml
    depends_on: [recon]
    condition: "ips != ''"
    on_error:
      - action: log
        message: "scan failed"
      - action: abort
"#;
    let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(workflow.kind, WorkflowKind::Flow);
    assert_eq!(workflow.modules.len(), 2);
    assert!(workflow.modules[1].aborts_on_error());
    assert!(matches!(workflow.modules[1].on_error[0], Action::Log { .. }));
  }

  #[test]
  fn test_step_type_round_trips_as_string() {
    let json = serde_json::to_value(StepType::Foreach).unwrap();
    assert_eq!(json, serde_json::json!("foreach"));
  }
}
