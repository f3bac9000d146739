//! Per-run scratch directory.

use crate::types::DemResult;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const WORKSPACE_PREFIX: &str = "collected-";

/// Uniquely named scratch directory for one pipeline run.
///
/// Holds the downloaded tiles and any intermediate rasters. The directory and
/// everything in it is removed when the workspace is dropped, on success and
/// on every error path.
#[derive(Debug)]
pub struct TempWorkspace {
    dir: TempDir,
}

impl TempWorkspace {
    /// Create a workspace under `root`, or under the system temp dir when `None`
    pub fn create(root: Option<&Path>) -> DemResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        log::debug!("Created workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Remove the directory now, reporting any failure instead of ignoring it
    pub fn close(self) -> DemResult<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        log::debug!("Removed workspace {}", path.display());
        Ok(())
    }
}
