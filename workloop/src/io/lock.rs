//! Single-writer guard for a working directory (`.workloop/run.lock`).

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, warn};

/// Held for the duration of a run. Removes the lock file on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Create the lock file, failing if another run holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_with(path, |file| writeln!(file, "{}", std::process::id()))
    }

    fn acquire_with(
        path: &Path,
        write_holder: impl FnOnce(&mut File) -> io::Result<()>,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path).unwrap_or_default();
                return Err(anyhow!(
                    "another workloop run holds {} (pid {}); use `workloop reset` if it is stale",
                    path.display(),
                    holder.trim()
                ));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("create lock {}", path.display()));
            }
        };
        if let Err(err) = write_holder(&mut file) {
            drop(file);
            if let Err(remove_err) = fs::remove_file(path) {
                warn!(path = %path.display(), err = %remove_err, "failed to remove partial run lock");
            }
            return Err(err).with_context(|| format!("write lock {}", path.display()));
        }
        debug!(path = %path.display(), "run lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Remove a lock left behind by a crashed run. Returns whether one existed.
    ///
    /// A lock whose recorded pid is still running is only removed with `force`.
    pub fn remove_stale(path: &Path, force: bool) -> Result<bool> {
        let holder = match fs::read_to_string(path) {
            Ok(text) => holder_pid(&text),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err).with_context(|| format!("read lock {}", path.display())),
        };
        if let Some(pid) = holder
            && process_alive(pid)
        {
            if !force {
                bail!(
                    "run lock {} is held by running process {pid}; pass --force to remove it anyway",
                    path.display()
                );
            }
            info!(pid, path = %path.display(), "removing run lock held by a live process");
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("remove lock {}", path.display())),
        }
    }
}

fn holder_pid(text: &str) -> Option<i32> {
    text.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), None::<Signal>) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    true
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), err = %err, "failed to release run lock");
        }
    }
}
