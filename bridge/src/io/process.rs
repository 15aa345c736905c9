//! Running desktop helper tools (window listing, input injection) as child
//! processes with a timeout and bounded output capture.

use std::io::{Read, Write};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How long to wait for pipe threads after killing a timed-out tool.
const KILL_GRACE: Duration = Duration::from_millis(500);
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Captured output of one tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl ToolOutput {
    /// Turn a non-zero exit or a timeout into an error naming the tool.
    pub fn ensure_success(&self, label: &str) -> Result<()> {
        if self.timed_out {
            return Err(anyhow!("{label} timed out"));
        }
        if !self.status.success() {
            let stderr = String::from_utf8_lossy(&self.stderr);
            let stderr = stderr.trim();
            if stderr.is_empty() {
                return Err(anyhow!("{label} exited with status {:?}", self.status.code()));
            }
            return Err(anyhow!(
                "{label} exited with status {:?}: {stderr}",
                self.status.code()
            ));
        }
        Ok(())
    }
}

/// Run `argv` with an optional stdin payload.
///
/// stdin, stdout and stderr are serviced on their own threads so a chatty tool
/// can never deadlock against a large payload. At most `output_limit_bytes` of
/// each output stream is kept; the rest is drained and discarded.
///
/// On Unix the tool runs in its own process group and a timeout kills the
/// whole group, so wrappers like `sh -c` cannot outlive the deadline through
/// their children. Pipe threads still blocked shortly after the kill are
/// abandoned.
#[instrument(skip_all, fields(program = argv.first().map(String::as_str), timeout_ms = timeout.as_millis()))]
pub fn run_tool(
    argv: &[String],
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ToolOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("tool command must not be empty"))?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    debug!("spawning tool");
    let mut child = cmd.spawn().with_context(|| format!("spawn {program}"))?;

    let stdin_handle = match stdin {
        Some(input) => {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let payload = input.to_vec();
            Some(thread::spawn(move || -> Result<()> {
                pipe.write_all(&payload).context("write stdin")?;
                Ok(())
            }))
        }
        None => None,
    };
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for tool")? {
        Some(status) => status,
        None => {
            warn!("tool timed out, killing");
            timed_out = true;
            kill_process_tree(&mut child)?;
            child.wait().context("wait tool after kill")?
        }
    };

    let grace = timed_out.then_some(KILL_GRACE);
    if let Some(handle) = stdin_handle {
        match join_within(handle, grace)? {
            Some(Ok(())) => {}
            // Tools may exit without draining stdin; the exit status decides.
            Some(Err(err)) => debug!(err = %err, "stdin not fully consumed"),
            None => warn!("stdin pipe still blocked after kill, abandoning writer"),
        }
    }
    let stdout = collect_output(stdout_handle, grace, "stdout")?;
    let stderr = collect_output(stderr_handle, grace, "stderr")?;

    debug!(exit_code = ?status.code(), timed_out, "tool finished");
    Ok(ToolOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

/// Kill the tool and everything it spawned into its process group.
#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    let pgid = libc::pid_t::try_from(child.id()).context("tool pid out of range")?;
    // SAFETY: killpg only takes integers; `pgid` is the group created for this
    // child by `process_group(0)` and the child is not yet reaped.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err).context("kill tool process group")
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill tool")
}

/// Join `handle`, giving up after `grace` when set. `None` means abandoned.
fn join_within<T>(handle: thread::JoinHandle<T>, grace: Option<Duration>) -> Result<Option<T>> {
    if let Some(grace) = grace {
        let deadline = Instant::now() + grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(JOIN_POLL);
        }
    }
    handle
        .join()
        .map(Some)
        .map_err(|_| anyhow!("tool pipe thread panicked"))
}

fn collect_output(
    handle: thread::JoinHandle<Result<Vec<u8>>>,
    grace: Option<Duration>,
    stream: &'static str,
) -> Result<Vec<u8>> {
    match join_within(handle, grace)? {
        Some(output) => output.with_context(|| format!("read {stream}")),
        None => {
            warn!(stream, "pipe still held open after kill, abandoning reader");
            Ok(Vec::new())
        }
    }
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut discarded = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        discarded += n - keep;
    }

    if discarded > 0 {
        warn!(discarded, "tool output truncated");
    }
    Ok(buf)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn captures_stdout_and_feeds_stdin() {
        let output = run_tool(
            &argv(&["cat"]),
            Some(b"typed text"),
            Duration::from_secs(5),
            1024,
        )
        .expect("run cat");
        output.ensure_success("cat").expect("success");
        assert_eq!(output.stdout, b"typed text");
    }

    #[test]
    fn bounds_captured_output() {
        let output = run_tool(
            &argv(&["sh", "-c", "printf 0123456789"]),
            None,
            Duration::from_secs(5),
            4,
        )
        .expect("run sh");
        assert_eq!(output.stdout, b"0123");
    }

    #[test]
    fn reports_failure_with_stderr() {
        let output = run_tool(
            &argv(&["sh", "-c", "echo boom >&2; exit 3"]),
            None,
            Duration::from_secs(5),
            1024,
        )
        .expect("run sh");
        let err = output.ensure_success("failing tool").unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn kills_tool_after_timeout() {
        let output = run_tool(
            &argv(&["sleep", "5"]),
            None,
            Duration::from_millis(100),
            1024,
        )
        .expect("run sleep");
        assert!(output.timed_out);
        assert!(output.ensure_success("sleep").is_err());
    }

    #[test]
    fn timeout_kills_children_that_hold_the_pipes() {
        let started = Instant::now();
        let output = run_tool(
            &argv(&["sh", "-c", "sleep 3; true"]),
            None,
            Duration::from_millis(200),
            1024,
        )
        .expect("run sh");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn empty_command_is_an_error() {
        assert!(run_tool(&[], None, Duration::from_secs(1), 16).is_err());
    }
}
