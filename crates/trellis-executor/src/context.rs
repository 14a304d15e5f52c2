use serde_json::{Map, Value};

/// Parameters passed into a run, keyed by name.
pub type Params = Map<String, Value>;

/// Per-run variable and export store.
///
/// Templates see `variables` overlaid by `exports`. The step scheduler hands
/// each step its own snapshot; exports are merged back only by the scheduler.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
  pub run_id: String,
  /// Top-level run id; equal to `run_id` outside of flows.
  pub root_run_id: String,
  pub workflow_name: String,
  pub variables: Params,
  pub exports: Params,
}

impl ExecutionContext {
  pub fn new(
    run_id: impl Into<String>,
    root_run_id: impl Into<String>,
    workflow_name: impl Into<String>,
    variables: Params,
  ) -> Self {
    Self {
      run_id: run_id.into(),
      root_run_id: root_run_id.into(),
      workflow_name: workflow_name.into(),
      variables,
      exports: Params::new(),
    }
  }

  pub fn merge_exports(&mut self, exports: &Params) {
    for (name, value) in exports {
      self.exports.insert(name.clone(), value.clone());
    }
  }

  /// Bind a variable, returning the updated context.
  pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.variables.insert(name.into(), value.into());
    self
  }

  /// Lookup order: exports, then variables.
  pub fn get(&self, name: &str) -> Option<&Value> {
    self.exports.get(name).or_else(|| self.variables.get(name))
  }

  /// The object templates are rendered against.
  pub fn template_context(&self) -> Value {
    self.template_context_with(&Params::new())
  }

  /// Like [`template_context`](Self::template_context) with `extra` layered on top.
  pub fn template_context_with(&self, extra: &Params) -> Value {
    let mut merged = self.variables.clone();
    for (name, value) in self.exports.iter().chain(extra) {
      merged.insert(name.clone(), value.clone());
    }
    merged.insert("run_id".to_string(), Value::String(self.run_id.clone()));
    Value::Object(merged)
  }
}
