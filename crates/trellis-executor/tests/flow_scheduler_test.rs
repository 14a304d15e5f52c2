//! Integration tests for flow module scheduling.

mod common;

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use trellis_config::{Action, ModuleRef, Workflow};
use trellis_executor::{
  ChannelNotifier, ExecutionError, ExecutionEvent, ModuleStatus, Params, RunOptions, RunStatus,
};
use trellis_workflow::WorkflowError;

use common::{RecordingExecutor, fake, harness};

/// A single-step module whose step is named after the module.
fn one_step(name: &str) -> Workflow {
  Workflow::module(name, vec![fake(name)])
}

fn inline(name: &str) -> ModuleRef {
  ModuleRef::inline(name, one_step(name))
}

fn module_names(result: &trellis_executor::WorkflowResult) -> Vec<String> {
  result.modules.iter().map(|m| m.module_name.clone()).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_diamond_flow_order() {
  let h = harness(RecordingExecutor::new());
  let flow = Workflow::flow(
    "diamond",
    vec![
      inline("a"),
      inline("b").with_depends_on(["a"]),
      inline("c").with_depends_on(["a"]),
      inline("d").with_depends_on(["b", "c"]),
    ],
  );

  let result = h
    .executor
    .execute_flow(&flow, Params::new(), &RunOptions::default(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, RunStatus::Completed);
  let calls = h.recorder.calls();
  assert_eq!(calls.len(), 4);
  assert_eq!(calls.first().map(String::as_str), Some("a"));
  assert_eq!(calls.last().map(String::as_str), Some("d"));
  assert_eq!(module_names(&result), calls);
  assert!(
    result
      .modules
      .iter()
      .all(|m| m.status == ModuleStatus::Completed)
  );

  // Modules run one at a time.
  assert_eq!(h.recorder.peak_concurrency(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_excluded_module_unblocks_dependents() {
  let h = harness(RecordingExecutor::new());
  let flow = Workflow::flow(
    "exclusion",
    vec![
      inline("a"),
      inline("b").with_depends_on(["a"]),
      inline("c").with_depends_on(["b"]),
    ],
  );
  let opts = RunOptions::default().exclude(["b"]);

  let result = h
    .executor
    .execute_flow(&flow, Params::new(), &opts, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, RunStatus::Completed);
  assert_eq!(h.recorder.calls(), vec!["a", "c"]);

  let b = result.module("b").unwrap();
  assert_eq!(b.status, ModuleStatus::Skipped);
  assert_eq!(b.reason.as_deref(), Some("excluded"));
  assert!(b.result.is_none());
  assert_eq!(result.module("c").unwrap().status, ModuleStatus::Completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_false_condition_skips_module() {
  let h = harness(RecordingExecutor::new());
  let mut scan = inline("scan");
  scan.condition = Some("a_done and deep".to_string());
  let flow = Workflow::flow("conditional", vec![inline("a"), scan.with_depends_on(["a"])]);

  let mut params = Params::new();
  params.insert("deep".to_string(), json!(false));

  let result = h
    .executor
    .execute_flow(&flow, params, &RunOptions::default(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, RunStatus::Completed);
  assert_eq!(result.module("scan").unwrap().status, ModuleStatus::Skipped);
  assert!(!h.recorder.was_called("scan"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_module_exports_feed_downstream_conditions() {
  let h = harness(RecordingExecutor::new());
  let mut report = inline("report");
  report.condition = Some("recon_done".to_string());
  let flow = Workflow::flow("chained", vec![inline("recon"), report.with_depends_on(["recon"])]);

  let result = h
    .executor
    .execute_flow(&flow, Params::new(), &RunOptions::default(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.module("report").unwrap().status, ModuleStatus::Completed);
  assert_eq!(result.exports["recon_done"], json!(true));
  assert_eq!(result.exports["report_done"], json!(true));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_module_without_abort_continues() {
  let h = harness(RecordingExecutor::new().failing(&["a"]));
  let flow = Workflow::flow(
    "tolerant",
    vec![inline("a"), inline("b").with_depends_on(["a"])],
  );

  let result = h
    .executor
    .execute_flow(&flow, Params::new(), &RunOptions::default(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, RunStatus::Completed);
  assert_eq!(result.module("a").unwrap().status, ModuleStatus::Failed);
  assert_eq!(result.module("b").unwrap().status, ModuleStatus::Completed);
  assert!(h.recorder.was_called("b"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_abort_fails_flow_immediately() {
  let h = harness(RecordingExecutor::new().failing(&["a"]));
  let mut a = inline("a");
  a.on_error = vec![
    Action::Export {
      name: "failed_module".to_string(),
      value: "a".to_string(),
    },
    Action::Abort,
  ];
  let flow = Workflow::flow(
    "strict",
    vec![a, inline("b").with_depends_on(["a"]), inline("c")],
  );

  let result = h
    .executor
    .execute_flow(&flow, Params::new(), &RunOptions::default(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, RunStatus::Failed);
  assert!(result.error.as_deref().unwrap().contains("module 'a' failed"));
  assert_eq!(result.exports["failed_module"], json!("a"));
  assert_eq!(h.recorder.calls(), vec!["a"]);

  assert_eq!(result.modules.len(), 3);
  for name in ["b", "c"] {
    let module = result.module(name).unwrap();
    assert_eq!(module.status, ModuleStatus::Skipped);
    assert_eq!(module.reason.as_deref(), Some("flow aborted"));
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_module_cycle_rejected() {
  let h = harness(RecordingExecutor::new());
  let flow = Workflow::flow(
    "loop",
    vec![
      inline("A").with_depends_on(["B"]),
      inline("B").with_depends_on(["A"]),
    ],
  );

  let err = h
    .executor
    .execute_flow(&flow, Params::new(), &RunOptions::default(), CancellationToken::new())
    .await
    .unwrap_err();

  assert_eq!(
    err.to_string(),
    "circular dependency detected: A -> B -> A"
  );
  assert!(matches!(
    err,
    ExecutionError::Workflow(WorkflowError::CircularDependency { .. })
  ));
  assert!(h.recorder.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_path_modules_are_preloaded_once() {
  let h = harness(RecordingExecutor::new());
  h.loader.insert("recon.yaml", one_step("recon")).await;
  h.loader.insert("scan.yaml", one_step("scan")).await;

  let flow = Workflow::flow(
    "loaded",
    vec![
      ModuleRef::from_path("recon", "recon.yaml"),
      ModuleRef::from_path("scan", "scan.yaml").with_depends_on(["recon"]),
    ],
  );

  let result = h
    .executor
    .execute_flow(&flow, Params::new(), &RunOptions::default(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, RunStatus::Completed);
  assert_eq!(h.recorder.calls(), vec!["recon", "scan"]);
  assert_eq!(h.loader.load_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_module_fails_only_that_module() {
  let h = harness(RecordingExecutor::new());
  let flow = Workflow::flow(
    "partial",
    vec![ModuleRef::from_path("ghost", "ghost.yaml"), inline("real")],
  );

  let result = h
    .executor
    .execute_flow(&flow, Params::new(), &RunOptions::default(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, RunStatus::Completed);
  let ghost = result.module("ghost").unwrap();
  assert_eq!(ghost.status, ModuleStatus::Failed);
  assert!(ghost.reason.as_deref().unwrap().contains("ghost.yaml"));
  assert_eq!(result.module("real").unwrap().status, ModuleStatus::Completed);
  // One failed preload plus one on-demand retry.
  assert_eq!(h.loader.load_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_param_precedence() {
  let h = harness(RecordingExecutor::new());

  let mut seed = fake("seed");
  seed
    .exports
    .insert("target".to_string(), "from-export".to_string());
  let seeder = ModuleRef::inline("seeder", Workflow::module("seeder", vec![seed]));

  let mut overridden = inline("overridden").with_depends_on(["seeder"]);
  overridden
    .params
    .insert("target".to_string(), "{{ target }}-override".to_string());

  let flow = Workflow::flow(
    "params",
    vec![
      inline("plain"),
      seeder,
      inline("exported").with_depends_on(["seeder"]),
      overridden,
    ],
  );

  let mut params = Params::new();
  params.insert("target".to_string(), json!("from-flow"));

  let result = h
    .executor
    .execute_flow(&flow, params, &RunOptions::default(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, RunStatus::Completed);
  assert_eq!(h.recorder.seen_target("plain"), Some(json!("from-flow")));
  assert_eq!(h.recorder.seen_target("exported"), Some(json!("from-export")));
  assert_eq!(
    h.recorder.seen_target("overridden"),
    Some(json!("from-export-override"))
  );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_flow_records_remaining_modules() {
  let h = harness(RecordingExecutor::new().with_step_delay("a", Duration::from_secs(30)));
  let flow = Workflow::flow(
    "cancelled",
    vec![inline("a"), inline("b").with_depends_on(["a"])],
  );
  let opts = RunOptions::default().with_run_id("flow-1");

  let control = h.control.clone();
  tokio::spawn(async move {
    while !control.is_active("flow-1") {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    control.cancel("flow-1")
  });

  let result = tokio::time::timeout(
    Duration::from_secs(10),
    h.executor
      .execute_flow(&flow, Params::new(), &opts, CancellationToken::new()),
  )
  .await
  .expect("cancelled flow should finish promptly")
  .unwrap();

  assert_eq!(result.status, RunStatus::Cancelled);
  assert_eq!(result.module("a").unwrap().status, ModuleStatus::Cancelled);
  let b = result.module("b").unwrap();
  assert_eq!(b.status, ModuleStatus::Cancelled);
  assert_eq!(b.reason.as_deref(), Some("flow cancelled"));
  assert!(!h.recorder.was_called("b"));
  assert_eq!(module_names(&result), vec!["a", "b"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_during_last_module_cancels_flow() {
  let h = harness(RecordingExecutor::new().with_step_delay("b", Duration::from_secs(30)));
  let flow = Workflow::flow(
    "cancel-last",
    vec![inline("a"), inline("b").with_depends_on(["a"])],
  );
  let opts = RunOptions::default().with_run_id("flow-last");

  let control = h.control.clone();
  let recorder = h.recorder.clone();
  tokio::spawn(async move {
    while !recorder.was_called("b") {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    control.cancel("flow-last")
  });

  let result = tokio::time::timeout(
    Duration::from_secs(10),
    h.executor
      .execute_flow(&flow, Params::new(), &opts, CancellationToken::new()),
  )
  .await
  .expect("cancelled flow should finish promptly")
  .unwrap();

  assert_eq!(result.module("a").unwrap().status, ModuleStatus::Completed);
  assert_eq!(result.module("b").unwrap().status, ModuleStatus::Cancelled);
  assert_eq!(result.status, RunStatus::Cancelled);
  assert_eq!(module_names(&result), vec!["a", "b"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_events_are_emitted_in_order() {
  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  let h = harness(RecordingExecutor::new());
  let executor = h
    .executor
    .with_notifier(std::sync::Arc::new(ChannelNotifier::new(tx)));

  let flow = Workflow::flow("events", vec![inline("only")]);
  let opts = RunOptions::default().with_run_id("flow-events");
  executor
    .execute_flow(&flow, Params::new(), &opts, CancellationToken::new())
    .await
    .unwrap();
  drop(executor);

  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }

  assert!(matches!(
    events.first(),
    Some(ExecutionEvent::RunStarted { run_id, .. }) if run_id == "flow-events"
  ));
  assert!(matches!(
    events.last(),
    Some(ExecutionEvent::RunCompleted { run_id, status: RunStatus::Completed }) if run_id == "flow-events"
  ));
  assert!(events.iter().any(|e| matches!(
    e,
    ExecutionEvent::ModuleCompleted { module, status: ModuleStatus::Completed, .. } if module == "only"
  )));
  assert!(events.iter().any(|e| matches!(
    e,
    ExecutionEvent::StepStarted { step, .. } if step == "only"
  )));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_module_definition_rejected_as_flow() {
  let h = harness(RecordingExecutor::new());
  let err = h
    .executor
    .execute_flow(&one_step("m"), Params::new(), &RunOptions::default(), CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, ExecutionError::WrongKind { .. }));
}
