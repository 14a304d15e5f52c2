//! Step executors and the dispatcher that picks one per step type.

mod bash;
mod foreach;
mod http;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use trellis_config::{Step, StepType};
use trellis_control::RunControlPlane;

pub use bash::BashExecutor;
pub use foreach::ForeachExecutor;
pub use http::HttpExecutor;

use crate::actions::{run_actions, run_error_actions};
use crate::context::{ExecutionContext, Params};
use crate::error::ExecutionError;
use crate::result::{StepResult, StepStatus};
use crate::template::TemplateEngine;

/// Everything a step executor may need beyond the step and its context.
#[derive(Clone)]
pub struct StepRuntime {
  pub cancel: CancellationToken,
  pub control: RunControlPlane,
  pub templates: Arc<TemplateEngine>,
  /// For executors that run nested steps.
  pub dispatcher: Arc<StepDispatcher>,
}

/// Runs steps of one type.
///
/// Implementations return a successful [`StepResult`] (with `output` and any
/// raw `exports`, e.g. `stdout`) or an error; the dispatcher turns errors into
/// failed results, stamps timestamps and applies the step's `exports` and
/// actions.
#[async_trait]
pub trait StepExecutor: Send + Sync {
  async fn execute(
    &self,
    step: &Step,
    ctx: &ExecutionContext,
    runtime: &StepRuntime,
  ) -> Result<StepResult, ExecutionError>;
}

/// Maps step types to executors.
#[derive(Clone, Default)]
pub struct StepDispatcher {
  executors: HashMap<StepType, Arc<dyn StepExecutor>>,
}

impl StepDispatcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// A dispatcher with the built-in `bash`, `http` and `foreach` executors.
  pub fn with_defaults(shell: impl Into<String>) -> Self {
    let mut dispatcher = Self::new();
    dispatcher.register(StepType::Bash, Arc::new(BashExecutor::new(shell)));
    dispatcher.register(StepType::Http, Arc::new(HttpExecutor::new()));
    dispatcher.register(StepType::Foreach, Arc::new(ForeachExecutor));
    dispatcher
  }

  /// Register an executor, replacing any existing one for the type.
  pub fn register(&mut self, step_type: impl Into<StepType>, executor: Arc<dyn StepExecutor>) {
    self.executors.insert(step_type.into(), executor);
  }

  pub fn supports(&self, step_type: &StepType) -> bool {
    self.executors.contains_key(step_type)
  }

  /// Run a step to a terminal result.
  ///
  /// Never fails: executor errors become `failed` results and cancellation
  /// becomes `cancelled`. On success the step's `exports` templates are
  /// rendered (seeing the executor's raw exports) and `on_success` actions
  /// run; on failure `on_error` actions run.
  pub async fn dispatch(
    &self,
    step: &Step,
    ctx: &ExecutionContext,
    runtime: &StepRuntime,
  ) -> StepResult {
    let started_at = Utc::now();

    let outcome = match self.executors.get(&step.step_type) {
      Some(executor) => executor.execute(step, ctx, runtime).await,
      None => Err(ExecutionError::NoExecutor {
        step_type: step.step_type.to_string(),
      }),
    };

    let outcome = match outcome {
      Ok(result) => self.finish_success(step, ctx, runtime, result),
      Err(e) => Err(e),
    };

    let mut result = match outcome {
      Ok(result) => result,
      Err(ExecutionError::Cancelled) => StepResult::cancelled(step),
      Err(e) => {
        warn!(run_id = %ctx.run_id, step = %step.name, error = %e, "step_execution_failed");
        let mut failed = StepResult::failed(step, e.to_string());
        failed.exports =
          run_error_actions(&runtime.templates, &step.on_error, &step.name, ctx, &Params::new());
        failed
      }
    };

    result.started_at = started_at;
    result.finished_at = Some(Utc::now());
    debug!(run_id = %ctx.run_id, step = %step.name, status = ?result.status, "step_dispatched");
    result
  }

  fn finish_success(
    &self,
    step: &Step,
    ctx: &ExecutionContext,
    runtime: &StepRuntime,
    mut result: StepResult,
  ) -> Result<StepResult, ExecutionError> {
    let templates = &runtime.templates;

    for (name, template) in &step.exports {
      let value = templates.render_with(template, ctx, &result.exports)?;
      result
        .exports
        .insert(name.clone(), serde_json::Value::String(value));
    }

    let exported = run_actions(templates, &step.on_success, &step.name, ctx, &result.exports)?;
    result.exports.extend(exported);
    result.status = StepStatus::Success;
    Ok(result)
  }
}
