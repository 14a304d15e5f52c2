//! Trellis Executor
//!
//! Runs modules and flows:
//! - [`Executor`] is the entry point, exposing [`Executor::execute_module`]
//!   and [`Executor::execute_flow`]
//! - steps of a module run either sequentially (with decision routing) or as
//!   a concurrent dependency graph bounded by a semaphore
//! - modules of a flow run one at a time in topological order
//! - every run registers with a [`RunControlPlane`](trellis_control::RunControlPlane)
//!   so it can be cancelled and have its child processes killed
//!
//! Step types are pluggable through [`StepExecutor`]; `bash`, `http` and
//! `foreach` executors are registered by default.

mod actions;
mod collector;
mod config;
mod context;
mod decision;
mod dispatch;
mod error;
mod events;
mod executor;
mod flow_scheduler;
mod foreach;
mod result;
mod step_scheduler;
mod template;

pub use config::{ExecutorConfig, RunOptions};
pub use context::{ExecutionContext, Params};
pub use decision::{Transition, resolve_transition};
pub use dispatch::{
  BashExecutor, ForeachExecutor, HttpExecutor, StepDispatcher, StepExecutor, StepRuntime,
};
pub use error::ExecutionError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::Executor;
pub use foreach::{ForeachSummary, ForeachWorkerPool};
pub use result::{ModuleResult, ModuleStatus, RunStatus, StepResult, StepStatus, WorkflowResult};
pub use template::TemplateEngine;
