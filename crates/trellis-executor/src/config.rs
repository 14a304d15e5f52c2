//! Executor and per-run configuration.

use std::collections::HashSet;

/// Default cap on steps running at once inside one module.
pub const DEFAULT_MAX_CONCURRENT_STEPS: usize = 8;

/// Default cap on module definitions loaded at once before a flow starts.
pub const DEFAULT_PRELOAD_CONCURRENCY: usize = 8;

/// Configuration shared by every run of an [`Executor`](crate::Executor).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
  /// Upper bound on concurrently running steps of a dependency-graphed module.
  pub max_concurrent_steps: usize,
  /// Upper bound on concurrent module loads during flow preloading.
  pub preload_concurrency: usize,
  /// Shell used by the bash executor, invoked as `<shell> -c <command>`.
  pub shell: String,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      max_concurrent_steps: DEFAULT_MAX_CONCURRENT_STEPS,
      preload_concurrency: DEFAULT_PRELOAD_CONCURRENCY,
      shell: "bash".to_string(),
    }
  }
}

/// Options for a single `execute_module` / `execute_flow` call.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  /// Run id to register under; a random UUID when unset.
  pub run_id: Option<String>,
  /// Top-level run this run belongs to. Flows set it for their modules so
  /// child processes are also tracked under the flow's id.
  pub root_run_id: Option<String>,
  /// Module names a flow skips.
  pub exclude_modules: HashSet<String>,
  /// Overrides [`ExecutorConfig::max_concurrent_steps`] for this run.
  pub max_concurrent_steps: Option<usize>,
}

impl RunOptions {
  pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
    self.run_id = Some(run_id.into());
    self
  }

  pub fn exclude<I, S>(mut self, modules: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.exclude_modules.extend(modules.into_iter().map(Into::into));
    self
  }

  pub fn is_excluded(&self, module: &str) -> bool {
    self.exclude_modules.contains(module)
  }
}
