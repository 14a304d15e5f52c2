use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use trellis_config::Step;

use super::{StepExecutor, StepRuntime};
use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::foreach::{DEFAULT_FOREACH_THREADS, ForeachWorkerPool};
use crate::result::{StepResult, StepStatus};

const DEFAULT_VARIABLE: &str = "line";

/// Runs the nested `step` once per line of the `input` file.
///
/// Each line is bound to `variable` (default `line`). The step fails when any
/// iteration failed, after all of them finished.
pub struct ForeachExecutor;

#[async_trait]
impl StepExecutor for ForeachExecutor {
  async fn execute(
    &self,
    step: &Step,
    ctx: &ExecutionContext,
    runtime: &StepRuntime,
  ) -> Result<StepResult, ExecutionError> {
    let invalid = |message: &str| ExecutionError::InvalidStep {
      step: step.name.clone(),
      message: message.to_string(),
    };

    let input = step
      .input
      .as_deref()
      .ok_or_else(|| invalid("foreach step needs `input`"))?;
    let nested: Arc<Step> = step
      .step
      .as_deref()
      .cloned()
      .map(Arc::new)
      .ok_or_else(|| invalid("foreach step needs a nested `step`"))?;

    let path = PathBuf::from(runtime.templates.render(input, ctx)?);
    let variable = step
      .variable
      .clone()
      .unwrap_or_else(|| DEFAULT_VARIABLE.to_string());
    let pool = ForeachWorkerPool::new(step.threads.unwrap_or(DEFAULT_FOREACH_THREADS));

    info!(
      run_id = %ctx.run_id,
      step = %step.name,
      input = %path.display(),
      workers = pool.workers(),
      "foreach_started"
    );

    let job = {
      let ctx = ctx.clone();
      let runtime = runtime.clone();
      let parent = step.name.clone();
      move |index: usize, line: String| {
        let ctx = ctx.clone().with_variable(variable.clone(), line);
        let runtime = runtime.clone();
        let nested = nested.clone();
        let parent = parent.clone();
        async move {
          let result = runtime.dispatcher.dispatch(&nested, &ctx, &runtime).await;
          if result.status == StepStatus::Failed {
            warn!(
              step = %parent,
              index,
              error = result.error.as_deref().unwrap_or_default(),
              "foreach_iteration_failed"
            );
          }
          matches!(result.status, StepStatus::Success | StepStatus::Skipped)
        }
      }
    };

    let summary = pool.run_file(&path, &runtime.cancel, job).await?;

    if summary.cancelled {
      return Err(ExecutionError::Cancelled);
    }

    if summary.failed > 0 {
      return Err(ExecutionError::StepExecution {
        step: step.name.clone(),
        message: format!("{} of {} iterations failed", summary.failed, summary.total),
      });
    }

    Ok(
      StepResult::success(step, serde_json::to_value(summary).unwrap_or_default())
        .with_export("iterations", summary.total),
    )
  }
}
