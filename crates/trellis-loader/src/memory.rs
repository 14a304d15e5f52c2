use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use trellis_config::Workflow;

use crate::error::LoadError;
use crate::loader::WorkflowLoader;

/// In-memory workflow loader keyed by path.
///
/// Useful for embedding workflows in a binary and for tests. Counts loads so
/// callers can observe caching and preloading behavior.
#[derive(Default)]
pub struct MemoryWorkflowLoader {
  workflows: RwLock<HashMap<String, Workflow>>,
  loads: AtomicUsize,
}

impl MemoryWorkflowLoader {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a workflow under `path`, replacing any previous one.
  pub async fn insert(&self, path: impl Into<String>, workflow: Workflow) {
    self.workflows.write().await.insert(path.into(), workflow);
  }

  /// Number of successful and failed `load_by_path` calls so far.
  pub fn load_count(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl WorkflowLoader for MemoryWorkflowLoader {
  async fn load_by_path(&self, path: &str) -> Result<Workflow, LoadError> {
    self.loads.fetch_add(1, Ordering::SeqCst);
    self
      .workflows
      .read()
      .await
      .get(path)
      .cloned()
      .ok_or_else(|| LoadError::NotFound {
        path: path.to_string(),
      })
  }
}
