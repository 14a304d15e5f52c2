//! Trellis Control
//!
//! The run control plane lets an unrelated caller (CLI signal handler, HTTP
//! API) cancel an in-flight run by its id. Cancelling fires the run's
//! [`CancellationToken`](tokio_util::sync::CancellationToken), which every
//! cooperating task observes, and then kills the process group of every
//! child process the run's executors reported.
//!
//! ```ignore
//! let control = RunControlPlane::new();
//! let cancel = CancellationToken::new();
//! let _guard = control.register("run-1", cancel.clone());
//!
//! // inside a step executor
//! control.add_pid("run-1", child_pid);
//!
//! // from anywhere else
//! let killed = control.cancel("run-1")?;
//! ```

mod error;
mod plane;
mod signal;

pub use error::ControlError;
pub use plane::{ActiveRun, RunControlPlane, RunGuard};
pub use signal::{ProcessSignaller, SystemSignaller};
