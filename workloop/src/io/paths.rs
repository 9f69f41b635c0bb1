//! Canonical locations under `.workloop/`.

use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".workloop";

/// All workloop-owned paths for a working directory.
#[derive(Debug, Clone)]
pub struct WorkloopPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub session_path: PathBuf,
    pub progress_path: PathBuf,
    pub lock_path: PathBuf,
    pub archive_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub default_specs_dir: PathBuf,
}

impl WorkloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR);
        Self {
            root: root.clone(),
            state_dir: state_dir.clone(),
            config_path: state_dir.join("config.toml"),
            session_path: state_dir.join("session.json"),
            progress_path: state_dir.join("progress.md"),
            lock_path: state_dir.join("run.lock"),
            archive_dir: state_dir.join("archive"),
            gitignore_path: state_dir.join(".gitignore"),
            default_specs_dir: state_dir.join("specs"),
        }
    }

    /// Resolve a configured path against the working directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
