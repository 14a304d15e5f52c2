//! Shared fixtures for executor integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use trellis_config::{Step, StepType};
use trellis_control::RunControlPlane;
use trellis_executor::{
  ExecutionContext, ExecutionError, Executor, ExecutorConfig, StepExecutor, StepResult,
  StepRuntime,
};
use trellis_loader::MemoryWorkflowLoader;

pub const FAKE: &str = "fake";

/// Step executor that records every invocation instead of doing work.
#[derive(Default)]
pub struct RecordingExecutor {
  calls: Mutex<Vec<String>>,
  seen: Mutex<HashMap<String, serde_json::Value>>,
  failing: HashSet<String>,
  delays: HashMap<String, Duration>,
  default_delay: Duration,
  running: AtomicUsize,
  peak: AtomicUsize,
}

impl RecordingExecutor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn failing(mut self, steps: &[&str]) -> Self {
    self.failing.extend(steps.iter().map(|s| s.to_string()));
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.default_delay = delay;
    self
  }

  pub fn with_step_delay(mut self, step: &str, delay: Duration) -> Self {
    self.delays.insert(step.to_string(), delay);
    self
  }

  /// Step names in invocation order.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn was_called(&self, step: &str) -> bool {
    self.calls().iter().any(|c| c == step)
  }

  /// The `target` variable as seen by a step.
  pub fn seen_target(&self, step: &str) -> Option<serde_json::Value> {
    self.seen.lock().unwrap().get(step).cloned()
  }

  pub fn peak_concurrency(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl StepExecutor for RecordingExecutor {
  async fn execute(
    &self,
    step: &Step,
    ctx: &ExecutionContext,
    runtime: &StepRuntime,
  ) -> Result<StepResult, ExecutionError> {
    self.calls.lock().unwrap().push(step.name.clone());
    if let Some(target) = ctx.get("target") {
      self
        .seen
        .lock()
        .unwrap()
        .insert(step.name.clone(), target.clone());
    }

    let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);

    let delay = self
      .delays
      .get(&step.name)
      .copied()
      .unwrap_or(self.default_delay);
    let cancelled = tokio::select! {
      _ = tokio::time::sleep(delay) => false,
      _ = runtime.cancel.cancelled() => true,
    };
    self.running.fetch_sub(1, Ordering::SeqCst);

    if cancelled {
      return Err(ExecutionError::Cancelled);
    }
    if self.failing.contains(&step.name) {
      return Err(ExecutionError::StepExecution {
        step: step.name.clone(),
        message: "boom".to_string(),
      });
    }

    Ok(StepResult::success(step, json!(step.name)).with_export(format!("{}_done", step.name), true))
  }
}

pub fn fake(name: &str) -> Step {
  Step::new(name, StepType::from(FAKE))
}

pub fn fake_after(name: &str, deps: &[&str]) -> Step {
  fake(name).with_depends_on(deps.iter().copied())
}

pub struct Harness {
  pub executor: Executor,
  pub recorder: Arc<RecordingExecutor>,
  pub loader: Arc<MemoryWorkflowLoader>,
  pub control: RunControlPlane,
}

pub fn harness(recorder: RecordingExecutor) -> Harness {
  harness_with(recorder, ExecutorConfig::default())
}

pub fn harness_with(recorder: RecordingExecutor, config: ExecutorConfig) -> Harness {
  let recorder = Arc::new(recorder);
  let loader = Arc::new(MemoryWorkflowLoader::new());
  let control = RunControlPlane::new();
  let executor = Executor::new(config, loader.clone(), control.clone())
    .with_step_executor(FAKE, recorder.clone());

  Harness {
    executor,
    recorder,
    loader,
    control,
  }
}
