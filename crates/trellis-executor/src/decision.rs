//! Decision routing for sequential modules.

use trellis_config::{DecisionCase, Step};

use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::template::TemplateEngine;

/// Where a sequential module goes after a step succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  /// Advance to the next step in declaration order.
  Next,
  /// Continue at the step with this index.
  Jump(usize),
  /// Stop the module successfully.
  End,
}

/// Resolve a step's decision once, after it succeeded.
///
/// The rendered `switch` value is matched against `cases`, falling back to
/// `default`. No decision, or no match without a default, is
/// [`Transition::Next`]. A target that is neither a step name nor `_end` is
/// an error.
pub fn resolve_transition(
  templates: &TemplateEngine,
  step: &Step,
  steps: &[Step],
  ctx: &ExecutionContext,
) -> Result<Transition, ExecutionError> {
  let Some(decision) = &step.decision else {
    return Ok(Transition::Next);
  };

  let value = templates.render(&decision.switch, ctx)?;
  let case = decision
    .cases
    .get(value.trim())
    .or(decision.default.as_ref());

  match case {
    None => Ok(Transition::Next),
    Some(case) => target_of(step, case, steps),
  }
}

fn target_of(step: &Step, case: &DecisionCase, steps: &[Step]) -> Result<Transition, ExecutionError> {
  if case.is_end() {
    return Ok(Transition::End);
  }

  steps
    .iter()
    .position(|s| s.name == case.goto)
    .map(Transition::Jump)
    .ok_or_else(|| ExecutionError::UnknownDecisionTarget {
      step: step.name.clone(),
      target: case.goto.clone(),
    })
}
