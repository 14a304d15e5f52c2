//! Active run registry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ControlError;
use crate::signal::{ProcessSignaller, SystemSignaller};

/// A cancellable run known to the control plane.
#[derive(Debug)]
pub struct ActiveRun {
  pub run_id: String,
  pub started_at: DateTime<Utc>,
  cancel: CancellationToken,
  /// Distinguishes re-registrations of the same id.
  generation: u64,
}

impl ActiveRun {
  /// Whether the run's cancellation has fired.
  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }
}

struct Inner {
  runs: RwLock<HashMap<String, Arc<ActiveRun>>>,
  /// Per-run live PIDs.
  pids: DashMap<String, HashSet<i32>>,
  signaller: Box<dyn ProcessSignaller>,
  next_generation: AtomicU64,
}

/// Registry of every in-flight run.
///
/// Cheaply cloneable; construct one per process and hand clones to the
/// executor and to whatever surface triggers cancellation.
#[derive(Clone)]
pub struct RunControlPlane {
  inner: Arc<Inner>,
}

impl Default for RunControlPlane {
  fn default() -> Self {
    Self::new()
  }
}

impl RunControlPlane {
  /// Create a control plane that signals real processes.
  pub fn new() -> Self {
    Self::with_signaller(SystemSignaller)
  }

  /// Create a control plane with a custom signaller.
  pub fn with_signaller(signaller: impl ProcessSignaller + 'static) -> Self {
    Self {
      inner: Arc::new(Inner {
        runs: RwLock::new(HashMap::new()),
        pids: DashMap::new(),
        signaller: Box::new(signaller),
        next_generation: AtomicU64::new(1),
      }),
    }
  }

  /// Register a run and return a guard that unregisters it on drop.
  ///
  /// Always creates a fresh entry with an empty PID set; an existing entry
  /// under the same id is replaced.
  pub fn register(&self, run_id: impl Into<String>, cancel: CancellationToken) -> RunGuard {
    let run_id = run_id.into();
    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
    let run = Arc::new(ActiveRun {
      run_id: run_id.clone(),
      started_at: Utc::now(),
      cancel,
      generation,
    });

    self
      .inner
      .runs
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(run_id.clone(), run);
    self.inner.pids.insert(run_id.clone(), HashSet::new());

    debug!(run_id = %run_id, "run_registered");

    RunGuard {
      plane: self.clone(),
      run_id,
      generation,
    }
  }

  /// Remove a run's entry and its PID set.
  pub fn unregister(&self, run_id: &str) {
    let removed = self
      .inner
      .runs
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(run_id);
    self.inner.pids.remove(run_id);

    if removed.is_some() {
      debug!(run_id = %run_id, "run_unregistered");
    }
  }

  /// Unregister only if the entry is still the one created by `generation`.
  fn unregister_generation(&self, run_id: &str, generation: u64) {
    let mut runs = self
      .inner
      .runs
      .write()
      .unwrap_or_else(PoisonError::into_inner);

    if runs.get(run_id).is_some_and(|r| r.generation == generation) {
      runs.remove(run_id);
      self.inner.pids.remove(run_id);
      debug!(run_id = %run_id, "run_unregistered");
    } else if !runs.contains_key(run_id) {
      // Cancelled before the guard dropped; clear PIDs reported afterwards.
      self.inner.pids.remove(run_id);
    }
  }

  /// Record a live child process for a run.
  pub fn add_pid(&self, run_id: &str, pid: i32) {
    self
      .inner
      .pids
      .entry(run_id.to_string())
      .or_default()
      .insert(pid);
    debug!(run_id = %run_id, pid, "pid_added");
  }

  /// Forget a child process once it has exited.
  pub fn remove_pid(&self, run_id: &str, pid: i32) {
    if let Some(mut pids) = self.inner.pids.get_mut(run_id) {
      pids.remove(&pid);
    }
  }

  /// Live PIDs currently tracked for a run, sorted.
  pub fn pids(&self, run_id: &str) -> Vec<i32> {
    let mut pids: Vec<i32> = self
      .inner
      .pids
      .get(run_id)
      .map(|set| set.iter().copied().collect())
      .unwrap_or_default();
    pids.sort_unstable();
    pids
  }

  /// Look up an active run.
  pub fn get(&self, run_id: &str) -> Option<Arc<ActiveRun>> {
    self
      .inner
      .runs
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(run_id)
      .cloned()
  }

  pub fn is_active(&self, run_id: &str) -> bool {
    self.get(run_id).is_some()
  }

  /// Ids of all active runs, sorted.
  pub fn active_run_ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self
      .inner
      .runs
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .keys()
      .cloned()
      .collect();
    ids.sort();
    ids
  }

  /// Cancel a run and kill its child processes.
  ///
  /// The entry is removed, so cancelling the same id again returns
  /// [`ControlError::RunNotFound`]. Returns the PIDs a kill was attempted on.
  pub fn cancel(&self, run_id: &str) -> Result<Vec<i32>, ControlError> {
    let run = self
      .inner
      .runs
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(run_id)
      .ok_or_else(|| ControlError::RunNotFound {
        run_id: run_id.to_string(),
      })?;

    run.cancel.cancel();
    let killed = self.kill_all_pids(run_id);

    info!(
      run_id = %run_id,
      killed_pids = ?killed,
      "run_cancelled"
    );

    Ok(killed)
  }

  /// Kill every tracked process of a run, emptying its PID set.
  ///
  /// The set is drained and signalled under the same map guard, so a PID
  /// is never killed twice.
  pub fn kill_all_pids(&self, run_id: &str) -> Vec<i32> {
    let Some(mut entry) = self.inner.pids.get_mut(run_id) else {
      return Vec::new();
    };

    let mut pids: Vec<i32> = entry.drain().collect();
    pids.sort_unstable();

    for &pid in &pids {
      self.kill_process_tree(pid);
    }

    pids
  }

  /// Kill the process group led by `pid`, falling back to the process alone.
  pub fn kill_process_tree(&self, pid: i32) {
    let signaller = &self.inner.signaller;

    match signaller.kill_group(pid) {
      Ok(()) => debug!(pid, "process_group_killed"),
      Err(group_err) => match signaller.kill_process(pid) {
        Ok(()) => debug!(pid, error = %group_err, "process_killed_after_group_kill_failed"),
        Err(e) => warn!(pid, error = %e, "process_kill_failed"),
      },
    }
  }
}

/// Unregisters its run when dropped.
#[must_use = "dropping the guard unregisters the run immediately"]
pub struct RunGuard {
  plane: RunControlPlane,
  run_id: String,
  generation: u64,
}

impl RunGuard {
  pub fn run_id(&self) -> &str {
    &self.run_id
  }
}

impl Drop for RunGuard {
  fn drop(&mut self) {
    self
      .plane
      .unregister_generation(&self.run_id, self.generation);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  #[derive(Debug, Clone, PartialEq, Eq)]
  enum Kill {
    Group(i32),
    Process(i32),
  }

  #[derive(Clone, Default)]
  struct RecordingSignaller {
    calls: Arc<Mutex<Vec<Kill>>>,
    fail_groups: bool,
  }

  impl ProcessSignaller for RecordingSignaller {
    fn kill_group(&self, pgid: i32) -> Result<(), ControlError> {
      self.calls.lock().unwrap().push(Kill::Group(pgid));
      if self.fail_groups {
        return Err(ControlError::Signal {
          target: -pgid,
          message: "no such process group".to_string(),
        });
      }
      Ok(())
    }

    fn kill_process(&self, pid: i32) -> Result<(), ControlError> {
      self.calls.lock().unwrap().push(Kill::Process(pid));
      Ok(())
    }
  }

  #[test]
  fn test_cancel_kills_process_group() {
    let signaller = RecordingSignaller::default();
    let calls = signaller.calls.clone();
    let plane = RunControlPlane::with_signaller(signaller);

    let cancel = CancellationToken::new();
    let _guard = plane.register("r1", cancel.clone());
    plane.add_pid("r1", 4242);

    let killed = plane.cancel("r1").unwrap();

    assert!(cancel.is_cancelled());
    assert_eq!(killed, vec![4242]);
    assert_eq!(*calls.lock().unwrap(), vec![Kill::Group(4242)]);
    assert!(plane.pids("r1").is_empty());
  }

  #[test]
  fn test_second_cancel_is_not_found() {
    let signaller = RecordingSignaller::default();
    let calls = signaller.calls.clone();
    let plane = RunControlPlane::with_signaller(signaller);

    let _guard = plane.register("r1", CancellationToken::new());
    plane.add_pid("r1", 10);
    plane.add_pid("r1", 11);

    assert_eq!(plane.cancel("r1").unwrap(), vec![10, 11]);
    assert_eq!(
      plane.cancel("r1"),
      Err(ControlError::RunNotFound {
        run_id: "r1".to_string()
      })
    );
    assert_eq!(calls.lock().unwrap().len(), 2);
  }

  #[test]
  fn test_cancel_unknown_run() {
    let plane = RunControlPlane::with_signaller(RecordingSignaller::default());
    assert!(matches!(
      plane.cancel("missing"),
      Err(ControlError::RunNotFound { .. })
    ));
  }

  #[test]
  fn test_group_kill_falls_back_to_pid() {
    let signaller = RecordingSignaller {
      fail_groups: true,
      ..Default::default()
    };
    let calls = signaller.calls.clone();
    let plane = RunControlPlane::with_signaller(signaller);

    let _guard = plane.register("r1", CancellationToken::new());
    plane.add_pid("r1", 7);
    plane.cancel("r1").unwrap();

    assert_eq!(
      *calls.lock().unwrap(),
      vec![Kill::Group(7), Kill::Process(7)]
    );
  }

  #[test]
  fn test_remove_pid_is_not_killed() {
    let signaller = RecordingSignaller::default();
    let calls = signaller.calls.clone();
    let plane = RunControlPlane::with_signaller(signaller);

    let _guard = plane.register("r1", CancellationToken::new());
    plane.add_pid("r1", 1);
    plane.add_pid("r1", 2);
    plane.remove_pid("r1", 1);

    assert_eq!(plane.cancel("r1").unwrap(), vec![2]);
    assert_eq!(*calls.lock().unwrap(), vec![Kill::Group(2)]);
  }

  #[test]
  fn test_guard_drop_unregisters() {
    let plane = RunControlPlane::with_signaller(RecordingSignaller::default());
    {
      let _guard = plane.register("r1", CancellationToken::new());
      plane.add_pid("r1", 99);
      assert!(plane.is_active("r1"));
    }
    assert!(!plane.is_active("r1"));
    assert!(plane.pids("r1").is_empty());
  }

  #[test]
  fn test_stale_guard_keeps_newer_registration() {
    let plane = RunControlPlane::with_signaller(RecordingSignaller::default());

    let first = plane.register("r1", CancellationToken::new());
    let _second = plane.register("r1", CancellationToken::new());
    drop(first);

    assert!(plane.is_active("r1"));
    assert_eq!(plane.active_run_ids(), vec!["r1".to_string()]);
  }

  #[test]
  fn test_runs_are_independent() {
    let plane = RunControlPlane::with_signaller(RecordingSignaller::default());
    let cancel_a = CancellationToken::new();
    let cancel_b = CancellationToken::new();

    let _a = plane.register("a", cancel_a.clone());
    let _b = plane.register("b", cancel_b.clone());
    plane.add_pid("a", 1);
    plane.add_pid("b", 2);

    plane.cancel("a").unwrap();

    assert!(cancel_a.is_cancelled());
    assert!(!cancel_b.is_cancelled());
    assert_eq!(plane.pids("b"), vec![2]);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_system_signaller_kills_real_process_group() {
    let mut child = tokio::process::Command::new("sleep")
      .arg("30")
      .process_group(0)
      .spawn()
      .unwrap();
    let pid = child.id().unwrap() as i32;

    let plane = RunControlPlane::new();
    let _guard = plane.register("real", CancellationToken::new());
    plane.add_pid("real", pid);

    assert_eq!(plane.cancel("real").unwrap(), vec![pid]);

    let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
      .await
      .unwrap()
      .unwrap();
    assert!(!status.success());
  }
}
