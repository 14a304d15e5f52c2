//! `on_success` / `on_error` action handling.

use serde_json::Value;
use tracing::{info, warn};
use trellis_config::Action;

use crate::context::{ExecutionContext, Params};
use crate::error::ExecutionError;
use crate::template::TemplateEngine;

/// Run `log` and `export` actions, returning the exported values.
///
/// `continue` and `abort` carry no work here; schedulers read them from the
/// definition. `scope` holds the node's own exports, layered over the
/// context when rendering; each export is visible to the actions after it.
pub(crate) fn run_actions(
  templates: &TemplateEngine,
  actions: &[Action],
  subject: &str,
  ctx: &ExecutionContext,
  scope: &Params,
) -> Result<Params, ExecutionError> {
  let mut exports = Params::new();
  if actions.is_empty() {
    return Ok(exports);
  }

  let mut layered = scope.clone();
  for action in actions {
    match action {
      Action::Log { message } => {
        let message = templates.render_with(message, ctx, &layered)?;
        info!(run_id = %ctx.run_id, subject = %subject, message = %message, "action_log");
      }
      Action::Export { name, value } => {
        let value = Value::String(templates.render_with(value, ctx, &layered)?);
        layered.insert(name.clone(), value.clone());
        exports.insert(name.clone(), value);
      }
      Action::Continue | Action::Abort => {}
    }
  }

  Ok(exports)
}

/// Like [`run_actions`], for failure paths where an action error must not
/// replace the original error.
pub(crate) fn run_error_actions(
  templates: &TemplateEngine,
  actions: &[Action],
  subject: &str,
  ctx: &ExecutionContext,
  scope: &Params,
) -> Params {
  run_actions(templates, actions, subject, ctx, scope).unwrap_or_else(|e| {
    warn!(run_id = %ctx.run_id, subject = %subject, error = %e, "on_error_actions_failed");
    Params::new()
  })
}
