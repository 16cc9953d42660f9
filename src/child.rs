//! Child interpreter process.
//!
//! Owns the spawned PowerShell process, its three pipes, and its two scratch
//! files. The pipes are serviced by dedicated tasks:
//!
//! ```text
//! stdin  ◄── write() (one wrapped command per write)
//! stdout ──► stdout pump ──► FrameBuffer ──► decode ──► replies channel
//! stderr ──► stderr pump (consumed and logged, never interpreted)
//! wait   ──► scratch cleanup ──► closed signal
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use crate::config::ShellConfig;
use crate::error::{Result, ShellError};
use crate::protocol::{
    decode_envelope, scratch_prefix, Delimiters, FrameBuffer, OutputFormat, StreamsResult,
};
use crate::wrapper::{build_wrapper, WrapperSpec};

/// Arguments the interpreter is always launched with.
pub(crate) const SPAWN_ARGS: [&str; 4] = ["-NoLogo", "-NoExit", "-Command", "-"];

/// Pipe read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Cap on buffered stderr bytes that never frame (stack traces, banners).
const STDERR_BUFFER_CAP: usize = 1024 * 1024;

/// Terminal report for one child: exit code and, on Unix, the killing signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitNotice {
    /// Process exit code, if it exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if any (always `None` off Unix).
    pub signal: Option<i32>,
}

impl ExitNotice {
    fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// A running interpreter child and its reply plumbing.
///
/// `replies` is single-subscriber: the supervisor is the only consumer, and
/// it correlates at most one item per in-flight command.
pub(crate) struct PwshChild {
    pid: u32,
    stdin: ChildStdin,
    delimiters: Delimiters,
    verbose_path: PathBuf,
    debug_path: PathBuf,
    /// Decoded envelopes (or per-frame decode errors) from stdout.
    pub(crate) replies: mpsc::UnboundedReceiver<Result<StreamsResult>>,
    /// Fires once when the process exits, after scratch cleanup.
    pub(crate) closed: oneshot::Receiver<ExitNotice>,
    kill_tx: mpsc::Sender<()>,
}

impl PwshChild {
    /// Spawn a fresh interpreter and wire its pumps.
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn spawn(config: &ShellConfig) -> Result<Self> {
        let mut child = Command::new(&config.exe_path)
            .args(SPAWN_ARGS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id().unwrap_or(0);
        let stdin = take_pipe(child.stdin.take(), "stdin")?;
        let stdout = take_pipe(child.stdout.take(), "stdout")?;
        let stderr = take_pipe(child.stderr.take(), "stderr")?;

        let delimiters = Delimiters::generate();
        let (verbose_path, debug_path) = scratch_paths(&config.tmp_dir);

        let (reply_tx, replies) = mpsc::unbounded_channel();
        tokio::spawn(stdout_pump(stdout, delimiters.clone(), reply_tx));
        tokio::spawn(stderr_pump(stderr, delimiters.clone()));

        let (closed_tx, closed) = oneshot::channel();
        let (kill_tx, kill_rx) = mpsc::channel(1);
        tokio::spawn(wait_for_exit(
            child,
            [verbose_path.clone(), debug_path.clone()],
            kill_rx,
            closed_tx,
        ));

        tracing::debug!(pid, "spawned interpreter");

        Ok(Self {
            pid,
            stdin,
            delimiters,
            verbose_path,
            debug_path,
            replies,
            closed,
            kill_tx,
        })
    }

    /// Process id of the interpreter.
    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Handle that hard-kills the process when signalled (used on hosts
    /// without POSIX signals, and as the drop path).
    pub(crate) fn kill_handle(&self) -> mpsc::Sender<()> {
        self.kill_tx.clone()
    }

    /// Wrap a fragment and write it to stdin as a single write.
    pub(crate) async fn write(
        &mut self,
        source: &str,
        format: OutputFormat,
        collect_verbose: bool,
        collect_debug: bool,
    ) -> Result<()> {
        let script = build_wrapper(&WrapperSpec {
            fragment: source,
            delimiters: &self.delimiters,
            verbose_path: &self.verbose_path,
            debug_path: &self.debug_path,
            format,
            collect_verbose,
            collect_debug,
        });

        self.stdin
            .write_all(script.as_bytes())
            .await
            .map_err(ShellError::WriteFailed)?;
        self.stdin.flush().await.map_err(ShellError::WriteFailed)
    }
}

/// Scratch file pair for one child, named from a fresh random prefix.
fn scratch_paths(tmp_dir: &Path) -> (PathBuf, PathBuf) {
    let prefix = scratch_prefix();
    (
        tmp_dir.join(format!("{prefix}_fps_verbose.tmp")),
        tmp_dir.join(format!("{prefix}_fps_debug.tmp")),
    )
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> Result<T> {
    pipe.ok_or_else(|| {
        ShellError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("child {name} was not captured"),
        ))
    })
}

/// Read stdout, extract frames, decode, and forward to the supervisor.
async fn stdout_pump(
    mut stdout: ChildStdout,
    delimiters: Delimiters,
    tx: mpsc::UnboundedSender<Result<StreamsResult>>,
) {
    let mut frames = FrameBuffer::new(&delimiters);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for payload in frames.push(&buf[..n]) {
                    if tx.send(decode_envelope(&payload)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!("stdout pump read failed: {e}");
                break;
            }
        }
    }
    tracing::debug!("stdout pump finished");
}

/// Consume stderr so the pipe never blocks the child. Frames extracted here
/// are logged and dropped.
async fn stderr_pump(mut stderr: ChildStderr, delimiters: Delimiters) {
    let mut frames = FrameBuffer::new(&delimiters);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for payload in frames.push(&buf[..n]) {
                    tracing::debug!(bytes = payload.len(), "discarding stderr frame");
                }
                if frames.len() > STDERR_BUFFER_CAP {
                    tracing::warn!(
                        buffered = frames.len(),
                        "dropping unframed stderr backlog"
                    );
                    frames.clear();
                }
            }
            Err(e) => {
                tracing::error!("stderr pump read failed: {e}");
                break;
            }
        }
    }
}

/// Wait for process exit, clean up scratch files, and fire `closed`.
async fn wait_for_exit(
    mut child: Child,
    scratch: [PathBuf; 2],
    mut kill_rx: mpsc::Receiver<()>,
    closed_tx: oneshot::Sender<ExitNotice>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx.recv() => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            let _ = child.start_kill();
            child.wait().await
        }
    };

    // Idempotent: the wrapper already removes these after every command.
    for path in &scratch {
        let _ = std::fs::remove_file(path);
    }

    let notice = match status {
        Ok(status) => ExitNotice::from_status(status),
        Err(e) => {
            tracing::error!("waiting on interpreter failed: {e}");
            ExitNotice {
                code: None,
                signal: None,
            }
        }
    };
    tracing::debug!(code = ?notice.code, signal = ?notice.signal, "interpreter exited");
    let _ = closed_tx.send(notice);
}
