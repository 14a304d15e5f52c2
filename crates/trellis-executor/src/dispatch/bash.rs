use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, instrument, warn};
use trellis_config::Step;

use super::{StepExecutor, StepRuntime};
use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::result::StepResult;

/// Runs `command` / `commands` through a shell, one after another.
///
/// Each command gets its own process group so cancellation can kill
/// everything it spawned. The child is tracked on the control plane under
/// the module's run id and, inside a flow, the flow's id as well.
///
/// Exports `stdout` (all commands concatenated) and `exit_code`.
pub struct BashExecutor {
  shell: String,
}

impl BashExecutor {
  pub fn new(shell: impl Into<String>) -> Self {
    Self {
      shell: shell.into(),
    }
  }
}

enum Exit {
  Finished(std::io::Result<std::process::Output>),
  TimedOut,
  Cancelled,
}

#[async_trait]
impl StepExecutor for BashExecutor {
  async fn execute(
    &self,
    step: &Step,
    ctx: &ExecutionContext,
    runtime: &StepRuntime,
  ) -> Result<StepResult, ExecutionError> {
    let commands: Vec<&String> = step.command.iter().chain(step.commands.iter()).collect();
    if commands.is_empty() {
      return Err(ExecutionError::InvalidStep {
        step: step.name.clone(),
        message: "bash step needs `command` or `commands`".to_string(),
      });
    }

    let mut stdout = String::new();
    let mut exit_code = 0;
    for template in commands {
      let command = runtime.templates.render(template, ctx)?;
      let output = self.run(step, &command, ctx, runtime).await?;

      stdout.push_str(&String::from_utf8_lossy(&output.stdout));
      exit_code = output.status.code().unwrap_or(-1);

      if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExecutionError::StepExecution {
          step: step.name.clone(),
          message: format!("command exited with {}: {}", output.status, stderr.trim()),
        });
      }
    }

    Ok(
      StepResult::success(step, json!(stdout))
        .with_export("stdout", stdout.trim_end().to_string())
        .with_export("exit_code", exit_code),
    )
  }
}

impl BashExecutor {
  #[instrument(
    name = "bash_command",
    skip(self, step, ctx, runtime),
    fields(run_id = %ctx.run_id, step = %step.name)
  )]
  async fn run(
    &self,
    step: &Step,
    command: &str,
    ctx: &ExecutionContext,
    runtime: &StepRuntime,
  ) -> Result<std::process::Output, ExecutionError> {
    let mut cmd = Command::new(&self.shell);
    cmd
      .arg("-c")
      .arg(command)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn()?;
    let pid = child.id().and_then(|id| i32::try_from(id).ok());
    let owners = pid_owners(ctx);

    if let Some(pid) = pid {
      for owner in &owners {
        runtime.control.add_pid(owner, pid);
      }
      debug!(pid, command = %command, "command_spawned");
    }

    let timeout = step.timeout.map(Duration::from_secs);
    let deadline = async {
      match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
      }
    };

    let exit = tokio::select! {
      output = child.wait_with_output() => Exit::Finished(output),
      _ = deadline => Exit::TimedOut,
      _ = runtime.cancel.cancelled() => Exit::Cancelled,
    };

    if let Some(pid) = pid {
      if !matches!(exit, Exit::Finished(_)) {
        runtime.control.kill_process_tree(pid);
      }
      for owner in &owners {
        runtime.control.remove_pid(owner, pid);
      }
    }

    match exit {
      Exit::Finished(output) => Ok(output?),
      Exit::TimedOut => {
        let seconds = step.timeout.unwrap_or_default();
        warn!(seconds, "command_timed_out");
        Err(ExecutionError::Timeout {
          step: step.name.clone(),
          seconds,
        })
      }
      Exit::Cancelled => Err(ExecutionError::Cancelled),
    }
  }
}

fn pid_owners(ctx: &ExecutionContext) -> Vec<&str> {
  if ctx.root_run_id == ctx.run_id {
    vec![ctx.run_id.as_str()]
  } else {
    vec![ctx.run_id.as_str(), ctx.root_run_id.as_str()]
  }
}
