//! Trellis Workflow
//!
//! This crate turns the `depends_on` lists of steps and modules into a
//! validated dependency graph ready for scheduling:
//! - every name is unique and every dependency refers to an existing node
//! - the graph is acyclic (a cycle is reported with its path)
//! - `dependents` and initial `in_degree` counters are precomputed

mod error;
mod graph;
mod validate;

pub use error::WorkflowError;
pub use graph::{DependencyGraph, GraphNode};
pub use validate::validate_workflow;
