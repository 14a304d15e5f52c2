//! Trellis Config
//!
//! This crate contains the serializable workflow definition types for Trellis.
//! These types describe modules and flows as they are written on disk, before
//! the executor validates their dependency graphs and runs them.
//!
//! A workflow is either:
//! - a **module**: an ordered (or dependency-graphed) list of [`Step`]s
//! - a **flow**: a dependency-graphed list of [`ModuleRef`]s
//!
//! Definitions can be loaded from YAML or JSON files (see `trellis-loader`)
//! or built in code.

mod action;
mod decision;
mod enums;
mod module;
mod param;
mod step;
mod workflow;

pub use action::Action;
pub use decision::{DecisionCase, DecisionConfig, END_TARGET};
pub use enums::{StepType, WorkflowKind};
pub use module::ModuleRef;
pub use param::ParamValue;
pub use step::Step;
pub use workflow::Workflow;
