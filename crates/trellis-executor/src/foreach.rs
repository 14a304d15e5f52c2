//! Bounded worker pool streaming input lines.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ExecutionError;

pub const DEFAULT_FOREACH_THREADS: usize = 4;

/// Counts of a pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForeachSummary {
  pub total: usize,
  pub succeeded: usize,
  pub failed: usize,
  /// Whether the run stopped early because of cancellation.
  pub cancelled: bool,
}

/// Runs a job per non-blank input line on a fixed number of workers.
///
/// Lines are read lazily and handed over a bounded channel, so memory use
/// is independent of the input size.
#[derive(Debug, Clone, Copy)]
pub struct ForeachWorkerPool {
  workers: usize,
}

impl Default for ForeachWorkerPool {
  fn default() -> Self {
    Self::new(DEFAULT_FOREACH_THREADS)
  }
}

impl ForeachWorkerPool {
  pub fn new(workers: usize) -> Self {
    Self {
      workers: workers.max(1),
    }
  }

  pub fn workers(&self) -> usize {
    self.workers
  }

  /// Run `job` for every non-blank line of a file.
  pub async fn run_file<F, Fut>(
    &self,
    path: &Path,
    cancel: &CancellationToken,
    job: F,
  ) -> Result<ForeachSummary, ExecutionError>
  where
    F: Fn(usize, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
  {
    let file = tokio::fs::File::open(path).await?;
    self.run(BufReader::new(file), cancel, job).await
  }

  /// Run `job(index, line)` for every non-blank line of `reader`.
  ///
  /// `job` returns whether the item succeeded; a job that panics counts as
  /// failed. Lines are trimmed. Once `cancel` fires no further jobs start;
  /// in-flight jobs finish.
  pub async fn run<R, F, Fut>(
    &self,
    reader: R,
    cancel: &CancellationToken,
    job: F,
  ) -> Result<ForeachSummary, ExecutionError>
  where
    R: AsyncBufRead + Unpin,
    F: Fn(usize, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
  {
    let (tx, rx) = mpsc::channel::<(usize, String)>(self.workers * 2);
    let rx = Arc::new(Mutex::new(rx));
    let job = Arc::new(job);
    let succeeded = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let mut workers = JoinSet::new();
    for worker in 0..self.workers {
      let rx = rx.clone();
      let job = job.clone();
      let cancel = cancel.clone();
      let succeeded = succeeded.clone();
      let failed = failed.clone();

      workers.spawn(async move {
        loop {
          let next = rx.lock().await.recv().await;
          let Some((index, line)) = next else {
            break;
          };
          // Queued items are dropped once cancelled.
          if cancel.is_cancelled() {
            continue;
          }
          let ok = match tokio::spawn((*job)(index, line)).await {
            Ok(ok) => ok,
            Err(e) => {
              warn!(worker, index, error = %e, "foreach_job_panicked");
              false
            }
          };
          if ok {
            succeeded.fetch_add(1, Ordering::Relaxed);
          } else {
            failed.fetch_add(1, Ordering::Relaxed);
          }
        }
        debug!(worker, "foreach_worker_finished");
      });
    }

    let mut lines = reader.lines();
    let mut total = 0;
    let mut cancelled = false;
    let mut read_error = None;

    loop {
      let line = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          cancelled = true;
          break;
        }
        line = lines.next_line() => line,
      };

      let line = match line {
        Ok(Some(line)) => line,
        Ok(None) => break,
        Err(e) => {
          read_error = Some(e);
          break;
        }
      };

      let line = line.trim();
      if line.is_empty() {
        continue;
      }

      let item = (total, line.to_string());
      let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          cancelled = true;
          break;
        }
        sent = tx.send(item) => sent.is_ok(),
      };
      if !sent {
        break;
      }
      total += 1;
    }

    drop(tx);

    // A worker only dies while building a job, taking exactly one item with it.
    while let Some(joined) = workers.join_next().await {
      if let Err(e) = joined {
        warn!(error = %e, "foreach_worker_panicked");
        failed.fetch_add(1, Ordering::Relaxed);
      }
    }

    if let Some(e) = read_error {
      return Err(e.into());
    }

    Ok(ForeachSummary {
      total,
      succeeded: succeeded.load(Ordering::Relaxed),
      failed: failed.load(Ordering::Relaxed),
      cancelled: cancelled || cancel.is_cancelled(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use std::sync::Mutex as StdMutex;

  #[tokio::test(flavor = "multi_thread")]
  async fn test_runs_every_non_blank_line() {
    let seen = Arc::new(StdMutex::new(Vec::new()));
    let recorder = seen.clone();
    let input: &[u8] = b"a.com\n\n  b.com  \nc.com\n";

    let summary = ForeachWorkerPool::new(2)
      .run(input, &CancellationToken::new(), move |_, line| {
        let recorder = recorder.clone();
        async move {
          recorder.lock().unwrap().push(line);
          true
        }
      })
      .await
      .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["a.com", "b.com", "c.com"]);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_counts_failures() {
    let input: &[u8] = b"1\n2\n3\n4\n";
    let summary = ForeachWorkerPool::new(3)
      .run(input, &CancellationToken::new(), |index, _| async move {
        index % 2 == 0
      })
      .await
      .unwrap();

    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 2);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_panicking_job_counts_as_failed() {
    let input: &[u8] = b"a\nb\nc\n";
    let summary = ForeachWorkerPool::new(2)
      .run(input, &CancellationToken::new(), |index, _| async move {
        if index == 1 {
          panic!("iteration blew up");
        }
        true
      })
      .await
      .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert!(!summary.cancelled);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_panicking_job_builder_counts_as_failed() {
    let input: &[u8] = b"a\nb\nc\nd\n";
    let summary = ForeachWorkerPool::new(2)
      .run(input, &CancellationToken::new(), |index, _| {
        if index == 2 {
          panic!("could not build iteration");
        }
        async { true }
      })
      .await
      .unwrap();

    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded + summary.failed, summary.total);
    assert_eq!(summary.failed, 1);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_never_exceeds_worker_count() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let input = (0..20).map(|i| format!("{i}\n")).collect::<String>();

    let (r, p) = (running.clone(), peak.clone());
    ForeachWorkerPool::new(3)
      .run(input.as_bytes(), &CancellationToken::new(), move |_, _| {
        let (running, peak) = (r.clone(), p.clone());
        async move {
          let now = running.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          tokio::time::sleep(std::time::Duration::from_millis(5)).await;
          running.fetch_sub(1, Ordering::SeqCst);
          true
        }
      })
      .await
      .unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 3);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_cancelled_before_start() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let input: &[u8] = b"a\nb\n";

    let summary = ForeachWorkerPool::default()
      .run(input, &cancel, |_, _| async { true })
      .await
      .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.total, 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn test_run_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "one\ntwo").unwrap();

    let summary = ForeachWorkerPool::new(1)
      .run_file(file.path(), &CancellationToken::new(), |_, _| async { true })
      .await
      .unwrap();

    assert_eq!(summary.total, 2);
  }

  #[tokio::test]
  async fn test_missing_file() {
    let err = ForeachWorkerPool::new(1)
      .run_file(
        Path::new("/nonexistent/trellis-input.txt"),
        &CancellationToken::new(),
        |_, _| async { true },
      )
      .await
      .unwrap_err();
    assert!(matches!(err, ExecutionError::Io(_)));
  }
}
