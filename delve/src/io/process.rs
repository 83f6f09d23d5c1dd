//! Helpers for running child processes with timeouts and bounded output.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, error, instrument, warn};

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    /// `None` when the child was killed after timing out.
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|status| status.success())
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last few hundred bytes of stderr, for error messages.
    pub fn stderr_tail(&self) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let trimmed = text.trim();
        let start = trimmed
            .char_indices()
            .rev()
            .nth(400)
            .map_or(0, |(idx, _)| idx);
        trimmed[start..].to_string()
    }

    /// Describe a failed run, or `None` if the command succeeded.
    pub fn failure(&self, label: &str, timeout: Duration) -> Option<String> {
        if self.timed_out {
            return Some(format!("{label} timed out after {}s", timeout.as_secs()));
        }
        match self.status {
            Some(status) if status.success() => None,
            Some(status) => Some(format!(
                "{label} exited with {}: {}",
                status
                    .code()
                    .map_or_else(|| "signal".to_string(), |code| code.to_string()),
                self.stderr_tail()
            )),
            None => Some(format!("{label} did not report an exit status")),
        }
    }
}

/// Run `argv` with a timeout, capturing stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr kept in memory (bytes beyond this are discarded while still draining the pipe).
/// The child is killed on timeout and when the returned future is dropped, so racing this
/// against a cancellation token never leaks a process.
#[instrument(skip_all, fields(program = %argv.first().map(String::as_str).unwrap_or(""), timeout_secs = timeout.as_secs()))]
pub async fn run_command(
    argv: &[String],
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must not be empty"))?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {program}"));
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
    let stdin_pipe = child.stdin.take();
    let input = stdin.map(<[u8]>::to_vec);

    let feed = async move {
        if let (Some(mut pipe), Some(input)) = (stdin_pipe, input) {
            // A child that exits without reading stdin closes the pipe; that is not our failure.
            if let Err(e) = pipe.write_all(&input).await {
                debug!(err = %e, "stdin closed early");
            }
        }
    };
    // Buffers live outside the timed future so a timeout keeps what was read.
    let (mut stdout_buf, mut stdout_truncated) = (Vec::new(), 0usize);
    let (mut stderr_buf, mut stderr_truncated) = (Vec::new(), 0usize);
    let collect = async {
        let ((), out, err) = tokio::join!(
            feed,
            read_stream_limited(stdout, output_limit_bytes, &mut stdout_buf, &mut stdout_truncated),
            read_stream_limited(stderr, output_limit_bytes, &mut stderr_buf, &mut stderr_truncated)
        );
        out?;
        err?;
        child.wait().await.context("wait for command")
    };

    let (status, timed_out) = match tokio::time::timeout(timeout, collect).await {
        Ok(result) => (Some(result?), false),
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            if let Err(e) = child.start_kill() {
                warn!(err = %e, "failed to kill timed out command");
            }
            (None, true)
        }
    };

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.and_then(|s| s.code()), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout_buf,
        stderr: stderr_buf,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
    buf: &mut Vec<u8>,
    truncated: &mut usize,
) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await.context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            *truncated += n.saturating_sub(keep);
        } else {
            *truncated += n;
        }
    }

    Ok(())
}
