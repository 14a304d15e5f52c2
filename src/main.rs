use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trellis_config::{Workflow, WorkflowKind};
use trellis_control::RunControlPlane;
use trellis_executor::{Executor, ExecutorConfig, Params, RunOptions};
use trellis_loader::{FsWorkflowLoader, WorkflowFormat, WorkflowLoader, parse_workflow};
use trellis_workflow::validate_workflow;

/// Trellis - a workflow engine for shell-driven pipelines
#[derive(Parser)]
#[command(name = "trellis")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.trellis)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Directory module paths are resolved against (default: <data_dir>/workflows)
  #[arg(long, global = true)]
  workflows_dir: Option<PathBuf>,

  /// Log filter used when RUST_LOG is unset
  #[arg(long, global = true, default_value = "info")]
  log_level: String,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a module or flow
  Run {
    #[command(subcommand)]
    target: RunTarget,
  },

  /// Check a workflow file without running it
  Validate {
    /// Path to the workflow file (YAML or JSON), or a name under the workflows directory
    workflow_file: PathBuf,
  },
}

#[derive(Subcommand)]
enum RunTarget {
  /// Run a single module
  Module {
    /// Path to the workflow file (YAML or JSON), or a name under the workflows directory
    workflow_file: PathBuf,

    #[command(flatten)]
    args: RunArgs,
  },

  /// Run a flow of modules
  Flow {
    /// Path to the workflow file (YAML or JSON), or a name under the workflows directory
    workflow_file: PathBuf,

    #[command(flatten)]
    args: RunArgs,

    /// Skip a module of the flow (repeatable)
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<String>,
  },
}

#[derive(clap::Args)]
struct RunArgs {
  /// Parameter override as key=value (repeatable)
  #[arg(short = 'p', long = "param", value_parser = parse_param)]
  params: Vec<(String, String)>,

  /// Shorthand for `-p target=<value>`
  #[arg(short = 't', long)]
  target: Option<String>,

  /// Cap on concurrently running steps per module
  #[arg(long)]
  max_concurrent: Option<usize>,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(&cli.log_level)?;

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".trellis"),
  };
  let workflows_dir = cli
    .workflows_dir
    .unwrap_or_else(|| data_dir.join("workflows"));

  match cli.command {
    Some(Commands::Run { target }) => {
      let (kind, workflow_file, args, exclude) = match target {
        RunTarget::Module {
          workflow_file,
          args,
        } => (WorkflowKind::Module, workflow_file, args, Vec::new()),
        RunTarget::Flow {
          workflow_file,
          args,
          exclude,
        } => (WorkflowKind::Flow, workflow_file, args, exclude),
      };
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_async(kind, workflow_file, args, exclude, workflows_dir))?;
    }
    Some(Commands::Validate { workflow_file }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(validate_async(workflow_file, workflows_dir))?;
    }
    None => {
      println!("trellis - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_tracing(default_level: &str) -> Result<()> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(default_level))
    .with_context(|| format!("invalid log level: {default_level}"))?;

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
  Ok(())
}

async fn run_async(
  kind: WorkflowKind,
  workflow_file: PathBuf,
  args: RunArgs,
  exclude: Vec<String>,
  workflows_dir: PathBuf,
) -> Result<()> {
  let loader = Arc::new(FsWorkflowLoader::new(&workflows_dir));
  let workflow = read_workflow(&workflow_file, loader.as_ref()).await?;
  if workflow.kind != kind {
    bail!(
      "'{}' is a {}, not a {}",
      workflow.name,
      workflow.kind,
      kind
    );
  }

  let mut params = Params::new();
  for (name, value) in args.params {
    params.insert(name, Value::String(value));
  }
  if let Some(target) = args.target {
    params.insert("target".to_string(), Value::String(target));
  }

  let run_id = uuid::Uuid::new_v4().to_string();
  let opts = RunOptions {
    max_concurrent_steps: args.max_concurrent,
    ..RunOptions::default()
  }
  .with_run_id(run_id.clone())
  .exclude(exclude);

  let control = RunControlPlane::new();
  let executor = Executor::new(ExecutorConfig::default(), loader, control.clone());

  let ctrl_c = {
    let control = control.clone();
    let run_id = run_id.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!(run_id = %run_id, "interrupt_received");
        match control.cancel(&run_id) {
          Ok(pids) => info!(run_id = %run_id, killed = ?pids, "run_cancelled"),
          Err(e) => warn!(run_id = %run_id, error = %e, "cancel_failed"),
        }
      }
    })
  };

  let result = executor
    .execute(&workflow, params, &opts, CancellationToken::new())
    .await
    .with_context(|| format!("failed to run {} '{}'", kind, workflow.name));
  ctrl_c.abort();
  let result = result?;

  println!("{}", serde_json::to_string_pretty(&result)?);

  if !result.is_success() {
    bail!(
      "{} '{}' finished with status {:?}{}",
      kind,
      result.workflow_name,
      result.status,
      result
        .error
        .as_deref()
        .map(|e| format!(": {e}"))
        .unwrap_or_default()
    );
  }

  Ok(())
}

async fn validate_async(workflow_file: PathBuf, workflows_dir: PathBuf) -> Result<()> {
  let loader = FsWorkflowLoader::new(&workflows_dir);
  let workflow = read_workflow(&workflow_file, &loader).await?;

  validate_workflow(&workflow)
    .with_context(|| format!("invalid {} '{}'", workflow.kind, workflow.name))?;

  if workflow.kind == WorkflowKind::Flow {
    for module_ref in workflow.modules.iter().filter(|m| !m.is_inline()) {
      let Some(path) = &module_ref.path else {
        continue;
      };
      let module = loader
        .load_by_path(path)
        .await
        .with_context(|| format!("failed to load module '{}' from {}", module_ref.name, path))?;
      validate_workflow(&module)
        .with_context(|| format!("invalid module '{}'", module_ref.name))?;
    }
  }

  println!("{} '{}' is valid", workflow.kind, workflow.name);
  Ok(())
}

/// Read a workflow from a file path, falling back to the workflows directory.
async fn read_workflow(workflow_file: &Path, loader: &FsWorkflowLoader) -> Result<Workflow> {
  if tokio::fs::metadata(workflow_file)
    .await
    .is_ok_and(|m| m.is_file())
  {
    let content = tokio::fs::read_to_string(workflow_file)
      .await
      .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
    return parse_workflow(&content, WorkflowFormat::from_path(workflow_file))
      .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()));
  }

  let reference = workflow_file.to_string_lossy();
  loader
    .load_by_path(&reference)
    .await
    .with_context(|| format!("failed to load workflow: {reference}"))
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
  match raw.split_once('=') {
    Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
    _ => Err(format!("expected key=value, got '{raw}'")),
  }
}
