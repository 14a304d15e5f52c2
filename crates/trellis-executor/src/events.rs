//! Execution events and notifiers for observability.
//!
//! Events are emitted while modules and flows run so consumers can follow
//! progress, persist it, or stream it to a UI.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use trellis_config::WorkflowKind;

use crate::result::{ModuleStatus, RunStatus, StepStatus};

/// Events emitted during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A module or flow run has started.
  RunStarted {
    run_id: String,
    workflow_name: String,
    kind: WorkflowKind,
  },

  /// A step has been dispatched to its executor.
  StepStarted { run_id: String, step: String },

  /// A step has reached a terminal status.
  StepCompleted {
    run_id: String,
    step: String,
    status: StepStatus,
    error: Option<String>,
  },

  /// A flow has started one of its modules.
  ModuleStarted { run_id: String, module: String },

  /// A flow has recorded a module's outcome (including skips).
  ModuleCompleted {
    run_id: String,
    module: String,
    status: ModuleStatus,
  },

  /// A module or flow run has finished.
  RunCompleted { run_id: String, status: RunStatus },
}

/// Trait for receiving execution events.
///
/// The executor calls `notify` for each event; implementations decide what
/// to do with them. `notify` must not block.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
