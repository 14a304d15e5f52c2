use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
  /// No active run is registered under this id.
  #[error("run not found: {run_id}")]
  RunNotFound { run_id: String },

  /// Delivering a signal failed.
  #[error("failed to signal {target}: {message}")]
  Signal { target: i32, message: String },

  /// Process signalling is not available on this platform.
  #[error("process signalling is not supported on this platform")]
  Unsupported,
}
