//! `.workloop/` scaffolding for `workloop init`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::io::config::{WorkloopConfig, write_config};
use crate::io::paths::WorkloopPaths;

const GITIGNORE: &str = "session.json\nprogress.md\nrun.lock\n*.tmp\n";

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite existing workloop-owned files.
    pub force: bool,
}

/// Create `.workloop/` in `root` with a default config, the default work item
/// directory and a `.gitignore` for transient state.
///
/// Fails if `.workloop/config.toml` already exists unless `options.force` is set.
/// Work items and the archive are never touched.
pub fn init_workloop(root: &Path, options: &InitOptions) -> Result<WorkloopPaths> {
    let paths = WorkloopPaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "workloop init: {} exists but is not a directory",
            paths.state_dir.display()
        ));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "workloop init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    create_dir(&paths.state_dir)?;
    create_dir(&paths.default_specs_dir)?;
    write_config(&paths.config_path, &WorkloopConfig::default())?;
    fs::write(&paths.gitignore_path, GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;

    info!(dir = %paths.state_dir.display(), "workloop initialised");
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_scaffolding() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workloop(temp.path(), &InitOptions::default()).expect("init");

        assert!(paths.default_specs_dir.is_dir());
        assert_eq!(
            load_config(&paths.config_path).expect("config"),
            WorkloopConfig::default()
        );
        let ignore = fs::read_to_string(&paths.gitignore_path).expect("gitignore");
        assert!(ignore.lines().any(|l| l == "session.json"));
        assert!(ignore.lines().any(|l| l == "run.lock"));
    }

    #[test]
    fn init_refuses_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workloop(temp.path(), &InitOptions::default()).expect("init");
        fs::write(&paths.config_path, "max_iterations = 3\n").expect("edit");
        fs::write(paths.default_specs_dir.join("a.md"), "keep me").expect("item");

        let err = init_workloop(temp.path(), &InitOptions::default()).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert_eq!(load_config(&paths.config_path).expect("config").max_iterations, 3);

        init_workloop(temp.path(), &InitOptions { force: true }).expect("force");
        assert_eq!(load_config(&paths.config_path).expect("config").max_iterations, 10);
        assert_eq!(
            fs::read_to_string(paths.default_specs_dir.join("a.md")).expect("item"),
            "keep me"
        );
    }
}
