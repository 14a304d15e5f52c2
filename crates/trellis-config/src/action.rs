use serde::{Deserialize, Serialize};

use crate::param::ParamValue;

/// An action attached to a step's or module's `on_success` / `on_error` list.
///
/// ```yaml
/// on_error:
///   - action: log
///     message: "probe failed for {{ target }}"
///   - action: continue
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
  /// Emit a log line (rendered).
  Log { message: ParamValue },
  /// Export a rendered value into the run's exports.
  Export { name: String, value: ParamValue },
  /// Treat the failure as non-fatal; dependents still run.
  Continue,
  /// Fail the enclosing flow immediately.
  Abort,
}

impl Action {
  /// Whether any action in the list marks a failure as continuable.
  pub fn any_continue(actions: &[Action]) -> bool {
    actions.iter().any(|a| matches!(a, Action::Continue))
  }

  /// Whether any action in the list aborts the enclosing flow.
  pub fn any_abort(actions: &[Action]) -> bool {
    actions.iter().any(|a| matches!(a, Action::Abort))
  }
}
