//! Trellis Loader
//!
//! Resolves workflow references (`path:` entries in flows, CLI arguments)
//! into parsed [`Workflow`](trellis_config::Workflow) definitions.

mod error;
mod fs_loader;
mod loader;
mod memory;

pub use error::LoadError;
pub use fs_loader::FsWorkflowLoader;
pub use loader::{WorkflowFormat, WorkflowLoader, parse_workflow};
pub use memory::MemoryWorkflowLoader;
