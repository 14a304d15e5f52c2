//! Process termination.

use crate::error::ControlError;

/// Delivers kill signals to OS processes.
///
/// The control plane only talks to processes through this trait so the kill
/// path can be observed without touching real processes.
pub trait ProcessSignaller: Send + Sync {
  /// Kill every process in the group led by `pgid`.
  fn kill_group(&self, pgid: i32) -> Result<(), ControlError>;

  /// Kill a single process.
  fn kill_process(&self, pid: i32) -> Result<(), ControlError>;
}

/// Sends `SIGKILL` through the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSignaller;

#[cfg(unix)]
impl ProcessSignaller for SystemSignaller {
  fn kill_group(&self, pgid: i32) -> Result<(), ControlError> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    // A negative pid addresses the whole process group.
    kill(Pid::from_raw(-pgid), Signal::SIGKILL).map_err(|e| ControlError::Signal {
      target: -pgid,
      message: e.to_string(),
    })
  }

  fn kill_process(&self, pid: i32) -> Result<(), ControlError> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), Signal::SIGKILL).map_err(|e| ControlError::Signal {
      target: pid,
      message: e.to_string(),
    })
  }
}

#[cfg(not(unix))]
impl ProcessSignaller for SystemSignaller {
  fn kill_group(&self, _pgid: i32) -> Result<(), ControlError> {
    Err(ControlError::Unsupported)
  }

  fn kill_process(&self, _pid: i32) -> Result<(), ControlError> {
    Err(ControlError::Unsupported)
  }
}
