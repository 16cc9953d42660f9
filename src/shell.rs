//! Public facade.
//!
//! [`Shell`] owns the supervisor task and the six per-stream broadcasters.
//! `call` and `destroy` never complete synchronously: both enqueue a request
//! to the supervisor and hand back an awaitable handle, so a caller always
//! holds its handle before the result can arrive.
//!
//! # Example
//!
//! ```ignore
//! use pwsh_mux::{Shell, ShellConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let shell = Shell::new(ShellConfig::default())?;
//!
//!     let mut errors = shell.subscribe_error();
//!     tokio::spawn(async move {
//!         while let Ok(lines) = errors.recv().await {
//!             eprintln!("interpreter error: {lines:?}");
//!         }
//!     });
//!
//!     let result = shell.call("Get-Date;").wait().await?;
//!     println!("{:?}", result.success[0]);
//!
//!     assert!(shell.destroy().wait().await);
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::child::PwshChild;
use crate::config::ShellConfig;
use crate::error::{Result, ShellError};
use crate::protocol::{OutputFormat, StreamsResult};
use crate::supervisor::{ShellRequest, Supervisor};

/// Broadcast channel capacity; a lagging subscriber observes `Lagged`, the
/// supervisor never blocks on fan-out.
const BROADCAST_CAPACITY: usize = 16;

/// The six per-stream fan-out senders. Live for the life of the facade;
/// non-replaying; emit only non-empty sequences.
#[derive(Clone)]
pub(crate) struct StreamBroadcasters {
    success: broadcast::Sender<Vec<Value>>,
    error: broadcast::Sender<Vec<String>>,
    warning: broadcast::Sender<Vec<String>>,
    verbose: broadcast::Sender<Vec<String>>,
    debug: broadcast::Sender<Vec<String>>,
    info: broadcast::Sender<Vec<String>>,
}

impl StreamBroadcasters {
    pub(crate) fn new() -> Self {
        Self {
            success: broadcast::channel(BROADCAST_CAPACITY).0,
            error: broadcast::channel(BROADCAST_CAPACITY).0,
            warning: broadcast::channel(BROADCAST_CAPACITY).0,
            verbose: broadcast::channel(BROADCAST_CAPACITY).0,
            debug: broadcast::channel(BROADCAST_CAPACITY).0,
            info: broadcast::channel(BROADCAST_CAPACITY).0,
        }
    }

    /// Fan one command's captures out to the per-stream subscribers.
    /// Empty captures are skipped entirely.
    pub(crate) fn publish(&self, streams: &StreamsResult) {
        if !streams.success.is_empty() {
            let _ = self.success.send(streams.success.clone());
        }
        if !streams.error.is_empty() {
            let _ = self.error.send(streams.error.clone());
        }
        if !streams.warning.is_empty() {
            let _ = self.warning.send(streams.warning.clone());
        }
        if !streams.verbose.is_empty() {
            let _ = self.verbose.send(streams.verbose.clone());
        }
        if !streams.debug.is_empty() {
            let _ = self.debug.send(streams.debug.clone());
        }
        if !streams.info.is_empty() {
            let _ = self.info.send(streams.info.clone());
        }
    }
}

/// A handle on one submitted command. Await with [`CallHandle::wait`].
///
/// The underlying sink fires exactly once: the decoded streams on success,
/// or a [`ShellError`] if the command timed out, the interpreter closed, or
/// the reply could not be decoded.
pub struct CallHandle {
    rx: oneshot::Receiver<Result<StreamsResult>>,
}

impl CallHandle {
    /// Wait for the command's result.
    pub async fn wait(self) -> Result<StreamsResult> {
        match self.rx.await {
            Ok(result) => result,
            // Sink dropped without firing: the supervisor is gone.
            Err(_) => Err(ShellError::Closed),
        }
    }
}

/// A handle on shutdown. Resolves `true` once shutdown is fully observed.
pub struct DestroyHandle {
    rx: oneshot::Receiver<bool>,
}

impl DestroyHandle {
    /// Wait for shutdown to complete.
    ///
    /// Every destroy — including repeats after completion — resolves the
    /// same terminal `true`.
    pub async fn wait(self) -> bool {
        self.rx.await.unwrap_or(true)
    }
}

/// A persistent PowerShell interpreter behind a FIFO command queue.
///
/// All calls share one interpreter deliberately: state set by one fragment
/// (variables, modules, the working directory) is visible to the next.
pub struct Shell {
    requests: mpsc::UnboundedSender<ShellRequest>,
    broadcasters: StreamBroadcasters,
}

impl Shell {
    /// Spawn the interpreter and start the supervisor.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: ShellConfig) -> Result<Self> {
        let child = PwshChild::spawn(&config)?;
        let broadcasters = StreamBroadcasters::new();
        let (requests, rx) = mpsc::unbounded_channel();
        tokio::spawn(Supervisor::new(config, rx, broadcasters.clone(), child).run());

        Ok(Self {
            requests,
            broadcasters,
        })
    }

    /// Create a configuration builder.
    pub fn builder() -> ShellBuilder {
        ShellBuilder::new()
    }

    /// Submit a fragment with the default (`json`) Success format.
    pub fn call(&self, source: impl Into<String>) -> CallHandle {
        self.call_with(source, OutputFormat::Json)
    }

    /// Submit a fragment with an explicit Success format.
    ///
    /// Commands execute strictly in submission order, one at a time, against
    /// the shared interpreter.
    pub fn call_with(&self, source: impl Into<String>, format: OutputFormat) -> CallHandle {
        let (sink, rx) = oneshot::channel();
        let request = ShellRequest::Submit {
            source: source.into(),
            format,
            sink,
        };
        if let Err(mpsc::error::SendError(request)) = self.requests.send(request) {
            // Supervisor already gone: fail the command instead of leaving
            // the handle dangling.
            if let ShellRequest::Submit { sink, .. } = request {
                let _ = sink.send(Err(ShellError::Closed));
            }
        }
        CallHandle { rx }
    }

    /// Shut the interpreter down.
    ///
    /// Queued commands and any in-flight command fail with
    /// [`ShellError::Closed`]. Safe to call repeatedly; later calls join the
    /// same terminal result and perform no additional kills.
    pub fn destroy(&self) -> DestroyHandle {
        let (done, rx) = oneshot::channel();
        // A send failure means shutdown already completed; the dropped
        // sender resolves the handle to the terminal `true`.
        let _ = self.requests.send(ShellRequest::Destroy { done });
        DestroyHandle { rx }
    }

    /// Subscribe to non-empty Success captures.
    pub fn subscribe_success(&self) -> broadcast::Receiver<Vec<Value>> {
        self.broadcasters.success.subscribe()
    }

    /// Subscribe to non-empty Error captures.
    pub fn subscribe_error(&self) -> broadcast::Receiver<Vec<String>> {
        self.broadcasters.error.subscribe()
    }

    /// Subscribe to non-empty Warning captures.
    pub fn subscribe_warning(&self) -> broadcast::Receiver<Vec<String>> {
        self.broadcasters.warning.subscribe()
    }

    /// Subscribe to non-empty Verbose captures.
    pub fn subscribe_verbose(&self) -> broadcast::Receiver<Vec<String>> {
        self.broadcasters.verbose.subscribe()
    }

    /// Subscribe to non-empty Debug captures.
    pub fn subscribe_debug(&self) -> broadcast::Receiver<Vec<String>> {
        self.broadcasters.debug.subscribe()
    }

    /// Subscribe to non-empty Information captures.
    pub fn subscribe_info(&self) -> broadcast::Receiver<Vec<String>> {
        self.broadcasters.info.subscribe()
    }
}

/// Builder for configuring and starting a [`Shell`].
///
/// ```ignore
/// let shell = Shell::builder()
///     .exe_path("/usr/local/bin/pwsh")
///     .timeout(Duration::from_secs(30))
///     .debug(false)
///     .start()?;
/// ```
pub struct ShellBuilder {
    config: ShellConfig,
}

impl ShellBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ShellConfig::default(),
        }
    }

    /// Directory for the two per-child scratch files.
    pub fn tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tmp_dir = dir.into();
        self
    }

    /// Interpreter executable path.
    pub fn exe_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.exe_path = path.into();
        self
    }

    /// Per-command timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Collect the Verbose stream.
    pub fn verbose(mut self, collect: bool) -> Self {
        self.config.verbose = collect;
        self
    }

    /// Collect the Debug stream.
    pub fn debug(mut self, collect: bool) -> Self {
        self.config.debug = collect;
        self
    }

    /// Spawn the interpreter and start the supervisor.
    pub fn start(self) -> Result<Shell> {
        Shell::new(self.config)
    }
}

impl Default for ShellBuilder {
    fn default() -> Self {
        Self::new()
    }
}
