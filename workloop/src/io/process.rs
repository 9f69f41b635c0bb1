//! Child processes with a hard timeout and bounded captured output.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long output readers may keep draining once the child is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes dropped from the front of stdout to stay within the limit.
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last few lines of stderr, for error messages.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let all: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// How to run a child.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions<'a> {
    pub stdin: Option<&'a [u8]>,
    pub timeout: Duration,
    /// Bytes of stdout and of stderr kept in memory. Only the most recent output
    /// is kept; anything earlier is dropped and counted.
    pub output_limit_bytes: usize,
    /// Copy stdout lines to our stderr as they arrive.
    pub echo_stdout: bool,
}

/// Run a command, killing it when `timeout` elapses.
///
/// Stdout and stderr are read on their own threads while the child runs, and stdin
/// is fed from a third, so a child that ignores its input or floods its output
/// cannot deadlock us. On unix the child leads its own process group; a timeout
/// kills the whole group, and so does a child that exits while descendants still
/// hold its output pipes.
#[instrument(skip_all, fields(timeout_secs = opts.timeout.as_secs(), output_limit_bytes = opts.output_limit_bytes))]
pub fn run_command_with_timeout(mut cmd: Command, opts: RunOptions<'_>) -> Result<CommandOutput> {
    if opts.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let mut readers = Readers::spawn(stdout, stderr, opts.output_limit_bytes, opts.echo_stdout);

    let stdin_rx = match opts.stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                // Dropping the handle closes the pipe so the child sees EOF.
                let _ = tx.send(child_stdin.write_all(&input));
            });
            Some(rx)
        }
        None => None,
    };

    let mut timed_out = false;
    let status = match child.wait_timeout(opts.timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = opts.timeout.as_secs(),
                "command timed out, killing process tree"
            );
            timed_out = true;
            kill_process_tree(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };

    if !readers.wait(READER_GRACE)? {
        warn!("descendants still hold the output pipes, killing process group");
        kill_group(child.id());
        if !readers.wait(READER_GRACE)? {
            warn!("output readers still blocked, abandoning them");
        }
    }

    if let Some(rx) = stdin_rx {
        match rx.recv_timeout(READER_GRACE) {
            Ok(Ok(())) => {}
            // A child may exit without reading all of its input.
            Ok(Err(err)) => debug!(err = %err, "stdin write incomplete"),
            Err(RecvTimeoutError::Timeout) => debug!("stdin writer still blocked, abandoning it"),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("stdin writer thread panicked"));
            }
        }
    }

    let (stdout, stderr) = readers.finish();
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_truncated = stdout.dropped,
            stderr_truncated = stderr.dropped,
            "output truncated, kept the most recent bytes"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        stdout_truncated: stdout.dropped,
        stderr_truncated: stderr.dropped,
        timed_out,
    })
}

fn kill_process_tree(child: &mut Child) -> Result<()> {
    if kill_group(child.id()) {
        return Ok(());
    }
    child.kill().context("kill command")
}

/// SIGKILL the process group led by `pid`. False if there was nothing to signal.
#[cfg(unix)]
fn kill_group(pid: u32) -> bool {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => true,
        Err(err) => {
            debug!(pid, err = %err, "process group kill failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) -> bool {
    false
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    dropped: usize,
}

/// Reader threads for stdout and stderr, reporting back over one channel so a
/// reader blocked on an inherited pipe can be given up on.
struct Readers {
    rx: Receiver<(Stream, Result<Captured>)>,
    stdout: Option<Captured>,
    stderr: Option<Captured>,
}

impl Readers {
    fn spawn<O, E>(stdout: O, stderr: E, limit: usize, echo: bool) -> Self
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let stdout_tx: Sender<_> = tx.clone();
        thread::spawn(move || {
            let _ = stdout_tx.send((Stream::Stdout, read_lines_limited(stdout, limit, echo)));
        });
        thread::spawn(move || {
            let _ = tx.send((Stream::Stderr, read_stream_limited(stderr, limit)));
        });
        Self {
            rx,
            stdout: None,
            stderr: None,
        }
    }

    /// Wait up to `grace` for both readers. False if one is still blocked.
    fn wait(&mut self, grace: Duration) -> Result<bool> {
        let deadline = Instant::now() + grace;
        while self.stdout.is_none() || self.stderr.is_none() {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(left) {
                Ok((Stream::Stdout, result)) => self.stdout = Some(result.context("read stdout")?),
                Ok((Stream::Stderr, result)) => self.stderr = Some(result.context("read stderr")?),
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("output reader thread panicked"));
                }
            }
        }
        Ok(true)
    }

    fn finish(self) -> (Captured, Captured) {
        (
            self.stdout.unwrap_or_default(),
            self.stderr.unwrap_or_default(),
        )
    }
}

/// Keeps the last `limit` bytes written to it.
struct TailBuffer {
    buf: VecDeque<u8>,
    limit: usize,
    dropped: usize,
}

impl TailBuffer {
    fn new(limit: usize) -> Self {
        Self {
            buf: VecDeque::new(),
            limit,
            dropped: 0,
        }
    }

    fn push(&mut self, data: &[u8]) {
        let skip = data.len().saturating_sub(self.limit);
        self.dropped += skip;
        self.buf.extend(&data[skip..]);
        let excess = self.buf.len().saturating_sub(self.limit);
        if excess > 0 {
            self.buf.drain(..excess);
            self.dropped += excess;
        }
    }

    fn finish(self) -> Captured {
        Captured {
            bytes: self.buf.into(),
            dropped: self.dropped,
        }
    }
}

/// Line-wise reader that optionally mirrors each line to stderr.
fn read_lines_limited<R: Read>(reader: R, limit: usize, echo: bool) -> Result<Captured> {
    let mut reader = BufReader::new(reader);
    let mut tail = TailBuffer::new(limit);
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).context("read line")?;
        if n == 0 {
            break;
        }
        if echo {
            let mut err = std::io::stderr().lock();
            if let Err(e) = err.write_all(&line).and_then(|()| err.flush()) {
                warn!(err = %e, "failed to echo agent output");
            }
        }
        tail.push(&line);
    }

    Ok(tail.finish())
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut tail = TailBuffer::new(limit);
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        tail.push(&chunk[..n]);
    }

    Ok(tail.finish())
}

#[cfg(test)]
mod tail_tests {
    use super::*;

    #[test]
    fn tail_buffer_keeps_most_recent_bytes() {
        let mut tail = TailBuffer::new(5);
        tail.push(b"abc");
        tail.push(b"defg");
        tail.push(b"0123456789");
        let captured = tail.finish();
        assert_eq!(captured.bytes, b"56789");
        assert_eq!(captured.dropped, 12);
    }
}
