//! Agent collaborator.
//!
//! The [`Agent`] trait is the loop's only suspension point: payload in, raw text
//! out. [`CommandAgent`] runs a configured subprocess; tests use scripted agents
//! that return canned outputs without spawning anything.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::error::AgentInvocationError;
use crate::io::config::AgentConfig;
use crate::io::process::{RunOptions, run_command_with_timeout};

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub workdir: PathBuf,
    /// Instruction payload, written to the agent's stdin.
    pub prompt: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub item_id: String,
    /// 1-based iteration number, for error context.
    pub iteration: u32,
}

impl AgentRequest {
    fn failure(&self, reason: impl Into<String>) -> AgentInvocationError {
        AgentInvocationError {
            item_id: self.item_id.clone(),
            iteration: self.iteration,
            reason: reason.into(),
        }
    }
}

pub trait Agent {
    /// Run the agent to completion and return its stdout.
    fn invoke(&self, request: &AgentRequest) -> Result<String>;
}

/// Agent backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
    echo_output: bool,
}

impl CommandAgent {
    pub fn new(command: Vec<String>, echo_output: bool) -> Self {
        Self {
            command,
            echo_output,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.command.clone(), config.echo_output)
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(item_id = %request.item_id, iteration = request.iteration))]
    fn invoke(&self, request: &AgentRequest) -> Result<String> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(request.failure("agent command is empty").into());
        };
        info!(program = %program, workdir = %request.workdir.display(), "invoking agent");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);

        let output = run_command_with_timeout(
            cmd,
            RunOptions {
                stdin: Some(request.prompt.as_bytes()),
                timeout: request.timeout,
                output_limit_bytes: request.output_limit_bytes,
                echo_stdout: self.echo_output,
            },
        )
        .map_err(|err| request.failure(format!("{err:#}")))?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            return Err(request
                .failure(format!("timed out after {}s", request.timeout.as_secs()))
                .into());
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent exited unsuccessfully");
            let tail = output.stderr_tail(5);
            let reason = match output.status.code() {
                Some(code) => format!("exited with status {code}"),
                None => "terminated by signal".to_string(),
            };
            let reason = if tail.is_empty() {
                reason
            } else {
                format!("{reason}: {tail}")
            };
            return Err(request.failure(reason).into());
        }

        debug!(bytes = output.stdout.len(), "agent finished");
        Ok(output.stdout_lossy())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(dir: &std::path::Path, timeout: Duration) -> AgentRequest {
        AgentRequest {
            workdir: dir.to_path_buf(),
            prompt: "do the thing\n".to_string(),
            timeout,
            output_limit_bytes: 10_000,
            item_id: "auth".to_string(),
            iteration: 2,
        }
    }

    fn sh(script: &str) -> CommandAgent {
        CommandAgent::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            false,
        )
    }

    #[test]
    fn returns_stdout_and_receives_prompt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let output = sh("cat; echo '<promise>COMPLETE</promise>'")
            .invoke(&request(temp.path(), Duration::from_secs(10)))
            .expect("invoke");
        assert_eq!(output, "do the thing\n<promise>COMPLETE</promise>\n");
    }

    #[test]
    fn non_zero_exit_is_invocation_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = sh("echo broken >&2; exit 3")
            .invoke(&request(temp.path(), Duration::from_secs(10)))
            .unwrap_err();
        let invocation = err
            .downcast_ref::<AgentInvocationError>()
            .expect("typed error");
        assert_eq!(invocation.item_id, "auth");
        assert_eq!(invocation.iteration, 2);
        assert_eq!(invocation.reason, "exited with status 3: broken");
    }

    #[test]
    fn timeout_is_invocation_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = sh("exec sleep 5")
            .invoke(&request(temp.path(), Duration::from_millis(200)))
            .unwrap_err();
        let invocation = err
            .downcast_ref::<AgentInvocationError>()
            .expect("typed error");
        assert!(invocation.reason.starts_with("timed out"));
    }

    #[test]
    fn timeout_with_forked_children_returns_promptly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let started = std::time::Instant::now();
        let err = sh("cat >/dev/null; sleep 30; true")
            .invoke(&request(temp.path(), Duration::from_millis(300)))
            .unwrap_err();
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "returned after {:?}",
            started.elapsed()
        );
        let invocation = err
            .downcast_ref::<AgentInvocationError>()
            .expect("typed error");
        assert!(invocation.reason.starts_with("timed out"));
    }

    #[test]
    fn completion_after_verbose_output_is_still_detected() {
        use crate::core::sentinel::{Detection, detect};

        let temp = tempfile::tempdir().expect("tempdir");
        let mut req = request(temp.path(), Duration::from_secs(10));
        req.output_limit_bytes = 100;
        let output = sh("cat >/dev/null; printf '%0500d\\n' 0; echo '<promise>COMPLETE</promise>'")
            .invoke(&req)
            .expect("invoke");
        assert!(output.len() <= 100);
        assert_eq!(detect(&output), Detection::Complete);
    }

    #[test]
    fn missing_program_is_invocation_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = CommandAgent::new(vec!["workloop-missing-agent".to_string()], false);
        let err = agent
            .invoke(&request(temp.path(), Duration::from_secs(1)))
            .unwrap_err();
        assert!(err.downcast_ref::<AgentInvocationError>().is_some());
    }
}
