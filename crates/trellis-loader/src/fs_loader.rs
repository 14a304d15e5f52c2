use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use trellis_config::Workflow;

use crate::error::LoadError;
use crate::loader::{WorkflowFormat, WorkflowLoader, parse_workflow};

/// Extensions tried, in order, when a reference has none.
const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Filesystem-based workflow loader.
///
/// Workflows are looked up relative to a root directory:
/// ```text
/// {root}/
/// ├── recon.yaml
/// ├── scan.yml
/// └── flows/
///     └── full.yaml
/// ```
/// A reference without an extension (`flows/full`) tries `.yaml`, `.yml`
/// and `.json` in turn.
pub struct FsWorkflowLoader {
  root: PathBuf,
}

impl FsWorkflowLoader {
  /// Create a new loader rooted at the given directory.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Get the root directory of the loader.
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Resolve a reference to an existing file.
  async fn resolve(&self, path: &str) -> Option<PathBuf> {
    let candidate = if Path::new(path).is_absolute() {
      PathBuf::from(path)
    } else {
      self.root.join(path)
    };

    if fs::metadata(&candidate).await.is_ok_and(|m| m.is_file()) {
      return Some(candidate);
    }

    if candidate.extension().is_none() {
      for ext in EXTENSIONS {
        let with_ext = candidate.with_extension(ext);
        if fs::metadata(&with_ext).await.is_ok_and(|m| m.is_file()) {
          return Some(with_ext);
        }
      }
    }

    None
  }
}

#[async_trait]
impl WorkflowLoader for FsWorkflowLoader {
  async fn load_by_path(&self, path: &str) -> Result<Workflow, LoadError> {
    let resolved = self.resolve(path).await.ok_or_else(|| LoadError::NotFound {
      path: path.to_string(),
    })?;

    let content = fs::read_to_string(&resolved).await?;
    parse_workflow(&content, WorkflowFormat::from_path(&resolved))
  }
}
