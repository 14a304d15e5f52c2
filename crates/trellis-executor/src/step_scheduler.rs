//! Step scheduling inside a module.
//!
//! A module whose steps declare no `depends_on` runs sequentially: a state
//! machine over the step index that follows decision routing. Otherwise the
//! steps form a dependency graph that is drained concurrently:
//!
//! - steps with no unfinished dependencies sit in a ready set
//! - the control loop takes the whole ready set and spawns one task per step;
//!   each task holds a semaphore permit while it runs
//! - when a step finishes its task merges exports, decrements its dependents'
//!   in-degrees, moves newly ready ones into the ready set and wakes the loop
//! - the loop sleeps on a [`Notify`] whenever the ready set is empty and not
//!   every step has completed
//!
//! A step that fails without a `continue` action blocks everything that
//! transitively depends on it: those steps are recorded as skipped without
//! running, but still count as completed so the drain terminates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use trellis_config::Step;
use trellis_workflow::DependencyGraph;

use crate::collector::ResultCollector;
use crate::context::ExecutionContext;
use crate::decision::{Transition, resolve_transition};
use crate::dispatch::StepRuntime;
use crate::error::ExecutionError;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::result::{RunStatus, StepResult, StepStatus};

/// Outcome of draining a module's steps.
pub(crate) struct StepRun {
  pub steps: Vec<StepResult>,
  pub context: ExecutionContext,
  pub status: RunStatus,
  pub error: Option<String>,
}

pub(crate) struct StepGraphScheduler {
  runtime: StepRuntime,
  notifier: Arc<dyn ExecutionNotifier>,
  max_concurrent: usize,
}

impl StepGraphScheduler {
  pub fn new(
    runtime: StepRuntime,
    notifier: Arc<dyn ExecutionNotifier>,
    max_concurrent: usize,
  ) -> Self {
    Self {
      runtime,
      notifier,
      max_concurrent: max_concurrent.max(1),
    }
  }

  /// Validate the step graph, then run every step.
  ///
  /// Graph errors are returned before any step starts.
  pub async fn run(
    &self,
    steps: Vec<Step>,
    ctx: ExecutionContext,
  ) -> Result<StepRun, ExecutionError> {
    let graph = DependencyGraph::build(&steps)?;
    let concurrent = steps.iter().any(|s| !s.depends_on.is_empty());

    if concurrent {
      self.run_graph(graph, steps, ctx).await
    } else {
      Ok(self.run_sequential(&steps, ctx).await)
    }
  }

  #[instrument(
    name = "steps_sequential",
    skip(self, steps, ctx),
    fields(run_id = %ctx.run_id, steps = steps.len())
  )]
  async fn run_sequential(&self, steps: &[Step], mut ctx: ExecutionContext) -> StepRun {
    let mut results = Vec::with_capacity(steps.len());
    let mut status = RunStatus::Completed;
    let mut first_error = None;
    let mut idx = 0;

    while let Some(step) = steps.get(idx) {
      if self.runtime.cancel.is_cancelled() {
        results.push(self.record(&ctx, StepResult::cancelled(step)));
        status = RunStatus::Cancelled;
        break;
      }

      let mut result = self.record(&ctx, run_step(&self.runtime, &*self.notifier, step, &ctx).await);
      ctx.merge_exports(&result.exports);

      match result.status {
        StepStatus::Success => match resolve_transition(&self.runtime.templates, step, steps, &ctx) {
          Ok(Transition::Next) => idx += 1,
          Ok(Transition::Jump(next)) => {
            result.next_step = Some(steps[next].name.clone());
            debug!(step = %step.name, next = %steps[next].name, "decision_jump");
            idx = next;
          }
          Ok(Transition::End) => {
            debug!(step = %step.name, "decision_end");
            results.push(result);
            break;
          }
          Err(e) => {
            warn!(step = %step.name, error = %e, "decision_failed");
            status = RunStatus::Failed;
            first_error = Some(e.to_string());
            results.push(result);
            break;
          }
        },
        StepStatus::Skipped => idx += 1,
        StepStatus::Failed if step.continues_on_error() => idx += 1,
        StepStatus::Failed | StepStatus::Running => {
          status = RunStatus::Failed;
          first_error = result.error.clone();
          results.push(result);
          break;
        }
        StepStatus::Cancelled => {
          status = RunStatus::Cancelled;
          results.push(result);
          break;
        }
      }

      results.push(result);
    }

    StepRun {
      steps: results,
      context: ctx,
      status,
      error: first_error,
    }
  }

  #[instrument(
    name = "steps_graph",
    skip(self, graph, steps, ctx),
    fields(run_id = %ctx.run_id, steps = steps.len(), max_concurrent = self.max_concurrent)
  )]
  async fn run_graph(
    &self,
    graph: DependencyGraph,
    steps: Vec<Step>,
    ctx: ExecutionContext,
  ) -> Result<StepRun, ExecutionError> {
    let total = steps.len();
    let shared = Arc::new(Shared {
      run_id: ctx.run_id.clone(),
      state: Mutex::new(GraphState {
        ready: graph.roots(),
        in_degree: graph.in_degrees(),
        blocked: HashMap::new(),
        context: ctx,
        first_error: None,
      }),
      ready_signal: Notify::new(),
      completed: AtomicUsize::new(0),
      collector: ResultCollector::with_capacity(total),
      permits: Semaphore::new(self.max_concurrent),
      graph,
      steps,
      runtime: self.runtime.clone(),
      notifier: self.notifier.clone(),
    });

    let mut workers = JoinSet::new();

    loop {
      let batch = std::mem::take(&mut shared.lock().ready);

      for idx in batch {
        let shared = shared.clone();
        workers.spawn(async move { shared.run_worker(idx).await });
      }

      if shared.completed.load(Ordering::Acquire) >= total {
        break;
      }

      // A ready set that is empty now may be refilled between the check above
      // and this wait; the notify permit covers that window.
      tokio::select! {
        _ = shared.ready_signal.notified() => {}
        Some(joined) = workers.join_next(), if !workers.is_empty() => {
          if let Err(e) = joined {
            error!(error = %e, "step_worker_failed");
            workers.abort_all();
            return Err(ExecutionError::Join { message: e.to_string() });
          }
        }
      }
    }

    while let Some(joined) = workers.join_next().await {
      if let Err(e) = joined {
        error!(error = %e, "step_worker_failed");
        return Err(ExecutionError::Join {
          message: e.to_string(),
        });
      }
    }

    debug_assert_eq!(shared.collector.len(), total);
    let results = shared.collector.sorted();

    let state = shared.lock();
    let status = if state.first_error.is_some() {
      RunStatus::Failed
    } else if self.runtime.cancel.is_cancelled()
      || results.iter().any(|r| r.status == StepStatus::Cancelled)
    {
      RunStatus::Cancelled
    } else {
      RunStatus::Completed
    };

    Ok(StepRun {
      steps: results,
      context: state.context.clone(),
      status,
      error: state.first_error.clone(),
    })
  }

  fn record(&self, ctx: &ExecutionContext, result: StepResult) -> StepResult {
    self.notifier.notify(ExecutionEvent::StepCompleted {
      run_id: ctx.run_id.clone(),
      step: result.step_name.clone(),
      status: result.status,
      error: result.error.clone(),
    });
    result
  }
}

struct GraphState {
  ready: Vec<usize>,
  in_degree: Vec<usize>,
  /// Blocked step -> the failed step that blocked it.
  blocked: HashMap<usize, String>,
  context: ExecutionContext,
  first_error: Option<String>,
}

struct Shared {
  run_id: String,
  state: Mutex<GraphState>,
  ready_signal: Notify,
  completed: AtomicUsize,
  collector: ResultCollector,
  permits: Semaphore,
  graph: DependencyGraph,
  steps: Vec<Step>,
  runtime: StepRuntime,
  notifier: Arc<dyn ExecutionNotifier>,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, GraphState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  async fn run_worker(&self, idx: usize) {
    let step = &self.steps[idx];
    let cancel = &self.runtime.cancel;

    let result = if cancel.is_cancelled() {
      StepResult::cancelled(step)
    } else {
      match self.permits.acquire().await {
        Ok(_permit) if !cancel.is_cancelled() => {
          let ctx = self.lock().context.clone();
          run_step(&self.runtime, &*self.notifier, step, &ctx).await
        }
        _ => StepResult::cancelled(step),
      }
    };

    self.complete(idx, result);
  }

  /// Record a finished step and release its dependents.
  ///
  /// Dependents of a fatal failure are finalized here as skipped, cascading
  /// through the graph, without ever being handed to a worker.
  fn complete(&self, idx: usize, result: StepResult) {
    let mut finished = Vec::new();
    {
      let mut guard = self.lock();
      let state = &mut *guard;
      let mut pending = vec![(idx, result)];

      while let Some((i, result)) = pending.pop() {
        let step = &self.steps[i];
        state.context.merge_exports(&result.exports);

        if result.status == StepStatus::Failed && !step.continues_on_error() {
          if state.first_error.is_none() {
            state.first_error = Some(format!(
              "step '{}' failed: {}",
              step.name,
              result.error.as_deref().unwrap_or("unknown error")
            ));
          }
          for dependent in self.graph.transitive_dependents(i) {
            state
              .blocked
              .entry(dependent)
              .or_insert_with(|| step.name.clone());
          }
        }

        for &dependent in self.graph.dependents(i) {
          state.in_degree[dependent] -= 1;
          if state.in_degree[dependent] > 0 {
            continue;
          }
          match state.blocked.get(&dependent).cloned() {
            Some(failed) => {
              let reason = format!("skipped due to failed dependency '{failed}'");
              debug!(step = %self.steps[dependent].name, reason = %reason, "step_blocked");
              pending.push((dependent, StepResult::skipped(&self.steps[dependent], reason)));
            }
            None => state.ready.push(dependent),
          }
        }

        finished.push((i, result));
      }
    }

    let count = finished.len();
    for (i, result) in finished {
      self.notifier.notify(ExecutionEvent::StepCompleted {
        run_id: self.run_id.clone(),
        step: result.step_name.clone(),
        status: result.status,
        error: result.error.clone(),
      });
      if !self.collector.push(i, result) {
        error!(step = %self.steps[i].name, "step_completed_twice");
      }
    }

    self.completed.fetch_add(count, Ordering::AcqRel);
    self.ready_signal.notify_one();
  }
}

/// Evaluate a step's pre-condition and dispatch it.
async fn run_step(
  runtime: &StepRuntime,
  notifier: &dyn ExecutionNotifier,
  step: &Step,
  ctx: &ExecutionContext,
) -> StepResult {
  if let Some(condition) = &step.pre_condition {
    match runtime.templates.evaluate_condition(condition, ctx) {
      Ok(true) => {}
      Ok(false) => {
        info!(run_id = %ctx.run_id, step = %step.name, condition = %condition, "step_skipped");
        return StepResult::skipped(step, format!("pre_condition '{condition}' is false"));
      }
      Err(e) => {
        warn!(run_id = %ctx.run_id, step = %step.name, error = %e, "step_condition_failed");
        return StepResult::failed(step, e.to_string());
      }
    }
  }

  notifier.notify(ExecutionEvent::StepStarted {
    run_id: ctx.run_id.clone(),
    step: step.name.clone(),
  });
  info!(run_id = %ctx.run_id, step = %step.name, step_type = %step.step_type, "step_started");

  let result = runtime.dispatcher.dispatch(step, ctx, runtime).await;

  match result.status {
    StepStatus::Failed => error!(
      run_id = %ctx.run_id,
      step = %step.name,
      error = result.error.as_deref().unwrap_or_default(),
      "step_failed"
    ),
    status => info!(run_id = %ctx.run_id, step = %step.name, status = ?status, "step_completed"),
  }

  result
}
