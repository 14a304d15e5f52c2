//! Executor facade.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use trellis_config::{StepType, Workflow, WorkflowKind};
use trellis_control::RunControlPlane;
use trellis_loader::WorkflowLoader;

use crate::config::{ExecutorConfig, RunOptions};
use crate::context::{ExecutionContext, Params};
use crate::dispatch::{StepDispatcher, StepExecutor, StepRuntime};
use crate::error::ExecutionError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::flow_scheduler::FlowModuleScheduler;
use crate::result::{RunStatus, WorkflowResult};
use crate::step_scheduler::StepGraphScheduler;
use crate::template::TemplateEngine;

/// Runs modules and flows.
///
/// Owns the template engine, the step dispatcher and a handle to the run
/// control plane. Every run registers with the control plane for its whole
/// duration, so [`RunControlPlane::cancel`] can stop it and kill its child
/// processes.
pub struct Executor {
  config: ExecutorConfig,
  templates: Arc<TemplateEngine>,
  dispatcher: Arc<StepDispatcher>,
  control: RunControlPlane,
  loader: Arc<dyn WorkflowLoader>,
  notifier: Arc<dyn ExecutionNotifier>,
}

impl Executor {
  /// Create an executor with the built-in step executors.
  pub fn new(
    config: ExecutorConfig,
    loader: Arc<dyn WorkflowLoader>,
    control: RunControlPlane,
  ) -> Self {
    let dispatcher = StepDispatcher::with_defaults(config.shell.clone());
    Self {
      config,
      templates: Arc::new(TemplateEngine::new()),
      dispatcher: Arc::new(dispatcher),
      control,
      loader,
      notifier: Arc::new(NoopNotifier),
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// Register (or replace) the executor for a step type.
  pub fn with_step_executor(
    mut self,
    step_type: impl Into<StepType>,
    executor: Arc<dyn StepExecutor>,
  ) -> Self {
    Arc::make_mut(&mut self.dispatcher).register(step_type, executor);
    self
  }

  pub fn config(&self) -> &ExecutorConfig {
    &self.config
  }

  pub fn control(&self) -> &RunControlPlane {
    &self.control
  }

  pub(crate) fn loader(&self) -> &Arc<dyn WorkflowLoader> {
    &self.loader
  }

  pub(crate) fn templates(&self) -> &TemplateEngine {
    &self.templates
  }

  pub(crate) fn notifier(&self) -> &dyn ExecutionNotifier {
    &*self.notifier
  }

  /// Run a module or flow, depending on its kind.
  pub async fn execute(
    &self,
    workflow: &Workflow,
    params: Params,
    opts: &RunOptions,
    cancel: CancellationToken,
  ) -> Result<WorkflowResult, ExecutionError> {
    match workflow.kind {
      WorkflowKind::Module => self.execute_module(workflow, params, opts, cancel).await,
      WorkflowKind::Flow => self.execute_flow(workflow, params, opts, cancel).await,
    }
  }

  /// Run a module's steps.
  ///
  /// The module runs as its own cancellable sub-run: a child of `cancel`,
  /// registered on the control plane under `opts.run_id` (or a fresh id).
  /// Graph validation errors are returned before any step starts; step
  /// failures are reported through the result's status.
  #[instrument(
    name = "module_execute",
    skip(self, module, params, opts, cancel),
    fields(module = %module.name)
  )]
  pub async fn execute_module(
    &self,
    module: &Workflow,
    params: Params,
    opts: &RunOptions,
    cancel: CancellationToken,
  ) -> Result<WorkflowResult, ExecutionError> {
    expect_kind(module, WorkflowKind::Module)?;

    let run_id = run_id_for(opts);
    let root_run_id = opts.root_run_id.clone().unwrap_or_else(|| run_id.clone());
    let cancel = cancel.child_token();
    let _guard = self.control.register(run_id.clone(), cancel.clone());

    let started_at = Utc::now();
    let ctx = ExecutionContext::new(
      run_id.clone(),
      root_run_id,
      module.name.clone(),
      merge_params(module, params),
    );

    info!(
      run_id = %run_id,
      module = %module.name,
      steps = module.steps.len(),
      "module_started"
    );
    self.notifier.notify(ExecutionEvent::RunStarted {
      run_id: run_id.clone(),
      workflow_name: module.name.clone(),
      kind: WorkflowKind::Module,
    });

    let runtime = StepRuntime {
      cancel,
      control: self.control.clone(),
      templates: self.templates.clone(),
      dispatcher: self.dispatcher.clone(),
    };
    let max_concurrent = opts
      .max_concurrent_steps
      .unwrap_or(self.config.max_concurrent_steps);
    let scheduler = StepGraphScheduler::new(runtime, self.notifier.clone(), max_concurrent);

    let run = match scheduler.run(module.steps.clone(), ctx).await {
      Ok(run) => run,
      Err(e) => {
        error!(run_id = %run_id, module = %module.name, error = %e, "module_rejected");
        self.notifier.notify(ExecutionEvent::RunCompleted {
          run_id,
          status: RunStatus::Failed,
        });
        return Err(e);
      }
    };

    self.log_finished(&run_id, &module.name, WorkflowKind::Module, run.status, run.error.as_deref());
    self.notifier.notify(ExecutionEvent::RunCompleted {
      run_id: run_id.clone(),
      status: run.status,
    });

    Ok(WorkflowResult {
      run_id,
      workflow_name: module.name.clone(),
      kind: WorkflowKind::Module,
      status: run.status,
      started_at,
      finished_at: Some(Utc::now()),
      steps: run.steps,
      modules: Vec::new(),
      exports: run.context.exports,
      error: run.error,
    })
  }

  /// Run a flow's modules in dependency order.
  #[instrument(
    name = "flow_execute",
    skip(self, flow, params, opts, cancel),
    fields(flow = %flow.name)
  )]
  pub async fn execute_flow(
    &self,
    flow: &Workflow,
    params: Params,
    opts: &RunOptions,
    cancel: CancellationToken,
  ) -> Result<WorkflowResult, ExecutionError> {
    expect_kind(flow, WorkflowKind::Flow)?;

    let run_id = run_id_for(opts);
    let cancel = cancel.child_token();
    let _guard = self.control.register(run_id.clone(), cancel.clone());

    let started_at = Utc::now();
    let ctx = ExecutionContext::new(
      run_id.clone(),
      run_id.clone(),
      flow.name.clone(),
      merge_params(flow, params),
    );

    info!(
      run_id = %run_id,
      flow = %flow.name,
      modules = flow.modules.len(),
      "flow_started"
    );
    self.notifier.notify(ExecutionEvent::RunStarted {
      run_id: run_id.clone(),
      workflow_name: flow.name.clone(),
      kind: WorkflowKind::Flow,
    });

    let run = match FlowModuleScheduler::new(self, opts, cancel).run(flow, ctx).await {
      Ok(run) => run,
      Err(e) => {
        error!(run_id = %run_id, flow = %flow.name, error = %e, "flow_rejected");
        self.notifier.notify(ExecutionEvent::RunCompleted {
          run_id,
          status: RunStatus::Failed,
        });
        return Err(e);
      }
    };

    self.log_finished(&run_id, &flow.name, WorkflowKind::Flow, run.status, run.error.as_deref());
    self.notifier.notify(ExecutionEvent::RunCompleted {
      run_id: run_id.clone(),
      status: run.status,
    });

    Ok(WorkflowResult {
      run_id,
      workflow_name: flow.name.clone(),
      kind: WorkflowKind::Flow,
      status: run.status,
      started_at,
      finished_at: Some(Utc::now()),
      steps: Vec::new(),
      modules: run.modules,
      exports: run.context.exports,
      error: run.error,
    })
  }

  fn log_finished(
    &self,
    run_id: &str,
    name: &str,
    kind: WorkflowKind,
    status: RunStatus,
    error: Option<&str>,
  ) {
    match status {
      RunStatus::Completed => info!(run_id = %run_id, workflow = %name, kind = %kind, "run_completed"),
      RunStatus::Cancelled => warn!(run_id = %run_id, workflow = %name, kind = %kind, "run_cancelled"),
      RunStatus::Failed | RunStatus::Running => error!(
        run_id = %run_id,
        workflow = %name,
        kind = %kind,
        error = error.unwrap_or_default(),
        "run_failed"
      ),
    }
  }
}

fn run_id_for(opts: &RunOptions) -> String {
  opts
    .run_id
    .clone()
    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn expect_kind(workflow: &Workflow, expected: WorkflowKind) -> Result<(), ExecutionError> {
  if workflow.kind == expected {
    return Ok(());
  }
  Err(ExecutionError::WrongKind {
    name: workflow.name.clone(),
    expected,
    actual: workflow.kind,
  })
}

/// Workflow defaults overridden by caller params.
fn merge_params(workflow: &Workflow, params: Params) -> Params {
  let mut merged: Params = workflow
    .params
    .iter()
    .map(|(name, value)| (name.clone(), Value::String(value.clone())))
    .collect();
  merged.extend(params);
  merged
}
