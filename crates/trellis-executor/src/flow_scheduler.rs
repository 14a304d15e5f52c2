//! Module scheduling inside a flow.
//!
//! Modules are drained in topological order (Kahn's algorithm) one at a
//! time. Before the drain starts, every module referenced by path is loaded
//! concurrently so the drain itself rarely waits on I/O; a module whose
//! preload failed is loaded again when it is reached.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use trellis_config::{ModuleRef, Workflow, WorkflowKind};
use trellis_workflow::{DependencyGraph, WorkflowError};

use crate::actions::{run_actions, run_error_actions};
use crate::config::RunOptions;
use crate::context::{ExecutionContext, Params};
use crate::error::ExecutionError;
use crate::events::ExecutionEvent;
use crate::executor::Executor;
use crate::result::{ModuleResult, ModuleStatus, RunStatus};

/// Outcome of draining a flow's modules.
pub(crate) struct FlowRun {
  pub modules: Vec<ModuleResult>,
  pub context: ExecutionContext,
  pub status: RunStatus,
  pub error: Option<String>,
}

pub(crate) struct FlowModuleScheduler<'a> {
  executor: &'a Executor,
  opts: &'a RunOptions,
  cancel: CancellationToken,
}

impl<'a> FlowModuleScheduler<'a> {
  pub fn new(executor: &'a Executor, opts: &'a RunOptions, cancel: CancellationToken) -> Self {
    Self {
      executor,
      opts,
      cancel,
    }
  }

  /// Validate the module graph, preload modules and drain the graph.
  pub async fn run(&self, flow: &Workflow, mut ctx: ExecutionContext) -> Result<FlowRun, ExecutionError> {
    let modules = &flow.modules;
    let graph = DependencyGraph::build(modules)?;
    let mut preloaded = self.preload(modules).await;

    let mut in_degree = graph.in_degrees();
    let mut queue: VecDeque<usize> = graph.roots().into();
    let mut finished = vec![false; modules.len()];
    let mut results = Vec::with_capacity(modules.len());
    let mut status = RunStatus::Completed;
    let mut first_error = None;

    while let Some(idx) = queue.pop_front() {
      if self.cancel.is_cancelled() {
        warn!(run_id = %ctx.run_id, flow = %flow.name, "flow_cancelled");
        status = RunStatus::Cancelled;
        break;
      }

      let module_ref = &modules[idx];
      let result = self
        .run_module(module_ref, preloaded.remove(&module_ref.name), &mut ctx)
        .await;
      finished[idx] = true;

      self.executor.notifier().notify(ExecutionEvent::ModuleCompleted {
        run_id: ctx.run_id.clone(),
        module: module_ref.name.clone(),
        status: result.status,
      });

      let aborted = result.status == ModuleStatus::Failed && module_ref.aborts_on_error();
      if aborted {
        let reason = result.reason.clone().unwrap_or_default();
        error!(run_id = %ctx.run_id, module = %module_ref.name, error = %reason, "flow_aborted");
        status = RunStatus::Failed;
        first_error = Some(format!("module '{}' failed: {}", module_ref.name, reason));
      }
      results.push(result);
      if aborted {
        break;
      }

      for &dependent in graph.dependents(idx) {
        in_degree[dependent] -= 1;
        if in_degree[dependent] == 0 {
          queue.push_back(dependent);
        }
      }
    }

    // Cancellation that landed while the last module ran still cancels the flow.
    if status == RunStatus::Completed
      && (self.cancel.is_cancelled()
        || results.iter().any(|r| r.status == ModuleStatus::Cancelled))
    {
      warn!(run_id = %ctx.run_id, flow = %flow.name, "flow_cancelled");
      status = RunStatus::Cancelled;
    }

    if status == RunStatus::Completed {
      let leftover: Vec<String> = (0..modules.len())
        .filter(|&i| in_degree[i] > 0)
        .map(|i| modules[i].name.clone())
        .collect();
      if !leftover.is_empty() {
        return Err(WorkflowError::CircularDependency { path: leftover }.into());
      }
    } else {
      let (module_status, reason) = match status {
        RunStatus::Cancelled => (ModuleStatus::Cancelled, "flow cancelled"),
        _ => (ModuleStatus::Skipped, "flow aborted"),
      };
      for (i, module_ref) in modules.iter().enumerate().filter(|(i, _)| !finished[*i]) {
        debug!(module = %module_ref.name, index = i, reason, "module_not_run");
        results.push(ModuleResult::not_run(module_ref.name.clone(), module_status, reason));
      }
    }

    Ok(FlowRun {
      modules: results,
      context: ctx,
      status,
      error: first_error,
    })
  }

  /// Load every path-referenced module concurrently.
  ///
  /// Failures are only logged; the module is loaded again on demand.
  #[instrument(name = "flow_preload", skip(self, modules), fields(modules = modules.len()))]
  async fn preload(&self, modules: &[ModuleRef]) -> HashMap<String, Workflow> {
    let permits = Arc::new(Semaphore::new(
      self.executor.config().preload_concurrency.max(1),
    ));
    let mut loads = JoinSet::new();

    for module_ref in modules {
      if module_ref.is_inline() || self.opts.is_excluded(&module_ref.name) {
        continue;
      }
      let Some(path) = module_ref.path.clone() else {
        continue;
      };

      let name = module_ref.name.clone();
      let loader = self.executor.loader().clone();
      let permits = permits.clone();
      loads.spawn(async move {
        let _permit = permits.acquire_owned().await.ok();
        let loaded = loader.load_by_path(&path).await;
        (name, path, loaded)
      });
    }

    let mut preloaded = HashMap::new();
    while let Some(joined) = loads.join_next().await {
      match joined {
        Ok((name, _, Ok(workflow))) => {
          preloaded.insert(name, workflow);
        }
        Ok((name, path, Err(e))) => {
          warn!(module = %name, path = %path, error = %e, "module_preload_failed");
        }
        Err(e) => warn!(error = %e, "module_preload_task_failed"),
      }
    }

    debug!(loaded = preloaded.len(), "modules_preloaded");
    preloaded
  }

  /// Run one module, recording skips and failures instead of returning them.
  async fn run_module(
    &self,
    module_ref: &ModuleRef,
    preloaded: Option<Workflow>,
    ctx: &mut ExecutionContext,
  ) -> ModuleResult {
    let name = &module_ref.name;
    let templates = self.executor.templates();

    if self.opts.is_excluded(name) {
      info!(run_id = %ctx.run_id, module = %name, "module_excluded");
      return ModuleResult::not_run(name.clone(), ModuleStatus::Skipped, "excluded");
    }

    if let Some(condition) = &module_ref.condition {
      match templates.evaluate_condition(condition, ctx) {
        Ok(true) => {}
        Ok(false) => {
          info!(run_id = %ctx.run_id, module = %name, condition = %condition, "module_skipped");
          return ModuleResult::not_run(
            name.clone(),
            ModuleStatus::Skipped,
            format!("condition '{condition}' is false"),
          );
        }
        Err(e) => return self.fail_before_start(module_ref, ctx, e),
      }
    }

    let module = match self.resolve(module_ref, preloaded).await {
      Ok(module) => module,
      Err(e) => return self.fail_before_start(module_ref, ctx, e),
    };

    let params = match self.module_params(module_ref, ctx) {
      Ok(params) => params,
      Err(e) => return self.fail_before_start(module_ref, ctx, e),
    };

    let sub_opts = RunOptions {
      run_id: None,
      root_run_id: Some(ctx.root_run_id.clone()),
      exclude_modules: Default::default(),
      max_concurrent_steps: self.opts.max_concurrent_steps,
    };

    info!(run_id = %ctx.run_id, module = %name, "module_started");
    self.executor.notifier().notify(ExecutionEvent::ModuleStarted {
      run_id: ctx.run_id.clone(),
      module: name.clone(),
    });

    let started_at = Utc::now();
    let outcome = self
      .executor
      .execute_module(&module, params, &sub_opts, self.cancel.clone())
      .await;

    match outcome {
      Ok(result) => {
        let mut status = ModuleStatus::from(result.status);
        let mut reason = result.error.clone();
        ctx.merge_exports(&result.exports);

        match status {
          ModuleStatus::Completed => {
            match run_actions(templates, &module_ref.on_success, name, ctx, &result.exports) {
              Ok(exports) => ctx.merge_exports(&exports),
              Err(e) => {
                status = ModuleStatus::Failed;
                reason = Some(e.to_string());
              }
            }
          }
          ModuleStatus::Failed => {
            let exports =
              run_error_actions(templates, &module_ref.on_error, name, ctx, &result.exports);
            ctx.merge_exports(&exports);
          }
          ModuleStatus::Skipped | ModuleStatus::Cancelled => {}
        }

        ModuleResult {
          module_name: name.clone(),
          status,
          reason,
          result: Some(Box::new(result)),
          started_at,
          finished_at: Utc::now(),
        }
      }
      Err(e) => {
        let mut failed = self.fail_before_start(module_ref, ctx, e);
        failed.started_at = started_at;
        failed
      }
    }
  }

  /// Inline definition, preloaded definition, or a fresh load by path.
  async fn resolve(
    &self,
    module_ref: &ModuleRef,
    preloaded: Option<Workflow>,
  ) -> Result<Workflow, ExecutionError> {
    let module = match (&module_ref.module, preloaded, &module_ref.path) {
      (Some(inline), _, _) => (**inline).clone(),
      (None, Some(loaded), _) => loaded,
      (None, None, Some(path)) => self.executor.loader().load_by_path(path).await?,
      (None, None, None) => {
        return Err(WorkflowError::UnresolvableModule(module_ref.name.clone()).into());
      }
    };

    if module.kind != WorkflowKind::Module {
      return Err(ExecutionError::WrongKind {
        name: module.name,
        expected: WorkflowKind::Module,
        actual: module.kind,
      });
    }
    Ok(module)
  }

  /// Flow variables, then flow exports, then the reference's own params.
  fn module_params(
    &self,
    module_ref: &ModuleRef,
    ctx: &ExecutionContext,
  ) -> Result<Params, ExecutionError> {
    let mut params = ctx.variables.clone();
    params.extend(ctx.exports.clone());
    for (name, value) in self.executor.templates().render_map(&module_ref.params, ctx)? {
      params.insert(name, Value::String(value));
    }
    Ok(params)
  }

  fn fail_before_start(
    &self,
    module_ref: &ModuleRef,
    ctx: &mut ExecutionContext,
    e: ExecutionError,
  ) -> ModuleResult {
    error!(run_id = %ctx.run_id, module = %module_ref.name, error = %e, "module_failed");
    let exports = run_error_actions(
      self.executor.templates(),
      &module_ref.on_error,
      &module_ref.name,
      ctx,
      &Params::new(),
    );
    ctx.merge_exports(&exports);
    ModuleResult::not_run(module_ref.name.clone(), ModuleStatus::Failed, e.to_string())
  }
}
