use trellis_config::{Workflow, WorkflowKind};

use crate::error::WorkflowError;
use crate::graph::DependencyGraph;

/// Check a workflow definition without running it.
///
/// Modules must have steps and a valid step graph; flows must have modules,
/// a valid module graph, and every module reference must be resolvable.
/// Inline modules are validated recursively.
pub fn validate_workflow(workflow: &Workflow) -> Result<(), WorkflowError> {
  match workflow.kind {
    WorkflowKind::Module => {
      if workflow.steps.is_empty() {
        return Err(WorkflowError::Empty {
          kind: workflow.kind.to_string(),
          name: workflow.name.clone(),
          expected: "steps",
        });
      }
      DependencyGraph::build(&workflow.steps)?;
    }
    WorkflowKind::Flow => {
      if workflow.modules.is_empty() {
        return Err(WorkflowError::Empty {
          kind: workflow.kind.to_string(),
          name: workflow.name.clone(),
          expected: "modules",
        });
      }
      DependencyGraph::build(&workflow.modules)?;

      for module_ref in &workflow.modules {
        match (&module_ref.module, &module_ref.path) {
          (Some(inline), _) => validate_workflow(inline)?,
          (None, Some(_)) => {}
          (None, None) => return Err(WorkflowError::UnresolvableModule(module_ref.name.clone())),
        }
      }
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use trellis_config::{ModuleRef, Step};

  #[test]
  fn test_empty_module_is_rejected() {
    let module = Workflow::module("empty", vec![]);
    assert!(matches!(
      validate_workflow(&module),
      Err(WorkflowError::Empty { .. })
    ));
  }

  #[test]
  fn test_flow_with_unresolvable_module() {
    let mut dangling = ModuleRef::from_path("a", "a.yaml");
    dangling.path = None;
    let flow = Workflow::flow("f", vec![dangling]);

    assert_eq!(
      validate_workflow(&flow),
      Err(WorkflowError::UnresolvableModule("a".to_string()))
    );
  }

  #[test]
  fn test_inline_module_is_validated() {
    let inner = Workflow::module(
      "inner",
      vec![Step::new("x", "bash").with_depends_on(["y"])],
    );
    let flow = Workflow::flow("f", vec![ModuleRef::inline("m", inner)]);

    assert!(matches!(
      validate_workflow(&flow),
      Err(WorkflowError::UnknownDependency { .. })
    ));
  }
}
