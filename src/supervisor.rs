//! Queue, dispatcher, and lifecycle controller.
//!
//! One task owns every piece of mutable state — the FIFO queue, the
//! in-flight slot, the lifecycle latches, and the child handle — so no locks
//! are needed; everything runs on a single cooperative loop.
//!
//! The dispatcher is a three-state machine:
//!
//! ```text
//! Idle ──queue non-empty──► Writing ──stdin write ok──► Awaiting
//!  ▲                                                       │
//!  │            reply: resolve sink, fan out, tick          │
//!  └───────────────────────────────────────────────────────┘
//!
//! Awaiting ──timeout──► fail sink (Timeout), kill, restart
//! Awaiting ──closed───► fail sink (Closed), fail stale queue, respawn
//! ```
//!
//! At most one command is ever written between two envelope receipts, and at
//! most one reply is consumed per in-flight command; an envelope with no
//! command in flight is discarded.

use std::collections::VecDeque;
#[cfg(unix)]
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::child::{ExitNotice, PwshChild};
use crate::config::ShellConfig;
use crate::error::{Result, ShellError};
use crate::protocol::{OutputFormat, StreamsResult};
use crate::shell::StreamBroadcasters;

/// Delay between kill-escalation signals.
#[cfg(unix)]
const KILL_ESCALATION_INTERVAL: Duration = Duration::from_secs(10);

/// One-shot sink for a command's result.
pub(crate) type ResultSink = oneshot::Sender<Result<StreamsResult>>;

/// Requests from the facade.
pub(crate) enum ShellRequest {
    /// Enqueue a command.
    Submit {
        source: String,
        format: OutputFormat,
        sink: ResultSink,
    },
    /// Begin (or join an in-progress) shutdown.
    Destroy { done: oneshot::Sender<bool> },
}

/// A queued unit of work, stamped with the generation it will run under.
struct Command {
    source: String,
    format: OutputFormat,
    sink: ResultSink,
    generation: u64,
}

/// The command currently written to the interpreter.
struct InFlight {
    sink: ResultSink,
    deadline: Instant,
}

enum Event {
    Request(Option<ShellRequest>),
    Reply(Option<Result<StreamsResult>>),
    Closed(ExitNotice),
    TimedOut,
}

pub(crate) struct Supervisor {
    config: ShellConfig,
    requests: mpsc::UnboundedReceiver<ShellRequest>,
    broadcasters: StreamBroadcasters,
    child: PwshChild,
    queue: VecDeque<Command>,
    in_flight: Option<InFlight>,
    /// Monotonic child generation; bumped on every respawn.
    generation: u64,
    closing: bool,
    restarting: bool,
    requests_done: bool,
    replies_done: bool,
    destroy_waiters: Vec<oneshot::Sender<bool>>,
    /// Dropping this cancels the running kill-escalation task.
    kill_cancel: Option<oneshot::Sender<()>>,
}

impl Supervisor {
    pub(crate) fn new(
        config: ShellConfig,
        requests: mpsc::UnboundedReceiver<ShellRequest>,
        broadcasters: StreamBroadcasters,
        child: PwshChild,
    ) -> Self {
        Self {
            config,
            requests,
            broadcasters,
            child,
            queue: VecDeque::new(),
            in_flight: None,
            generation: 0,
            closing: false,
            restarting: false,
            requests_done: false,
            replies_done: false,
            destroy_waiters: Vec::new(),
            kill_cancel: None,
        }
    }

    /// Main loop. Runs until shutdown completes.
    pub(crate) async fn run(mut self) {
        loop {
            self.maybe_dispatch().await;

            let deadline = self.in_flight.as_ref().map(|f| f.deadline);

            let event = tokio::select! {
                request = self.requests.recv(), if !self.requests_done => {
                    Event::Request(request)
                }
                reply = self.child.replies.recv(), if !self.replies_done => {
                    Event::Reply(reply)
                }
                notice = &mut self.child.closed => {
                    Event::Closed(notice.unwrap_or(ExitNotice { code: None, signal: None }))
                }
                _ = sleep_until_deadline(deadline), if deadline.is_some() => Event::TimedOut,
            };

            match event {
                Event::Request(Some(request)) => self.handle_request(request),
                Event::Request(None) => {
                    // Facade dropped without an explicit destroy.
                    self.requests_done = true;
                    tracing::debug!("facade dropped; shutting down interpreter");
                    self.begin_destroy(None);
                }
                Event::Reply(Some(reply)) => self.handle_reply(reply),
                Event::Reply(None) => self.replies_done = true,
                Event::TimedOut => self.handle_timeout(),
                Event::Closed(notice) => {
                    if self.handle_closed(notice) {
                        break;
                    }
                }
            }
        }
    }

    /// Idle → Writing → Awaiting, when permitted.
    async fn maybe_dispatch(&mut self) {
        if self.in_flight.is_some() || self.closing || self.restarting || self.queue.is_empty() {
            return;
        }
        let Some(command) = self.queue.pop_front() else {
            return;
        };

        // Deferred by one yield: the caller always holds its handle before
        // the sink can fire, and re-entrant submissions from a completion
        // handler are isolated from this write.
        tokio::task::yield_now().await;

        match self
            .child
            .write(
                &command.source,
                command.format,
                self.config.verbose,
                self.config.debug,
            )
            .await
        {
            Ok(()) => {
                self.in_flight = Some(InFlight {
                    sink: command.sink,
                    deadline: Instant::now() + self.config.timeout,
                });
            }
            Err(e) => {
                tracing::error!("stdin write failed: {e}");
                let _ = command.sink.send(Err(e));
                self.begin_restart();
            }
        }
    }

    fn handle_request(&mut self, request: ShellRequest) {
        match request {
            ShellRequest::Submit {
                source,
                format,
                sink,
            } => {
                if self.closing {
                    let _ = sink.send(Err(ShellError::Closed));
                    return;
                }
                // Work submitted during a restart runs on the upcoming child.
                let generation = if self.restarting {
                    self.generation + 1
                } else {
                    self.generation
                };
                self.queue.push_back(Command {
                    source,
                    format,
                    sink,
                    generation,
                });
            }
            ShellRequest::Destroy { done } => self.begin_destroy(Some(done)),
        }
    }

    /// Awaiting → Idle on the next reply; at most one reply per command.
    fn handle_reply(&mut self, reply: Result<StreamsResult>) {
        let Some(in_flight) = self.in_flight.take() else {
            match reply {
                Ok(_) => tracing::warn!("discarding envelope with no command in flight"),
                Err(e) => tracing::warn!("discarding undecodable frame while idle: {e}"),
            }
            return;
        };

        match reply {
            Ok(streams) => {
                // Caller first, then per-stream fan-out, then the next
                // dispatch on the following loop pass.
                let _ = in_flight.sink.send(Ok(streams.clone()));
                self.broadcasters.publish(&streams);
            }
            Err(e) => {
                // The reader frame may be corrupt; the interpreter is not
                // trusted past this point.
                tracing::error!("envelope decode failed: {e}");
                let _ = in_flight.sink.send(Err(e));
                self.begin_restart();
            }
        }
    }

    fn handle_timeout(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            let millis = self.config.timeout_millis();
            tracing::warn!(millis, "command timed out; restarting interpreter");
            let _ = in_flight.sink.send(Err(ShellError::Timeout { millis }));
        }
        self.begin_restart();
    }

    fn begin_restart(&mut self) {
        if self.closing || self.restarting {
            return;
        }
        self.restarting = true;
        self.kill_child();
    }

    fn begin_destroy(&mut self, done: Option<oneshot::Sender<bool>>) {
        if let Some(done) = done {
            self.destroy_waiters.push(done);
        }
        if self.closing {
            // Already shutting down; the waiter above joins the same result.
            return;
        }
        self.closing = true;
        if !self.restarting {
            self.kill_child();
        }
        // During a restart the kill is already under way; `handle_closed`
        // observes `closing` and completes shutdown instead of respawning.
    }

    fn kill_child(&mut self) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        drop(self.kill_cancel.replace(cancel_tx));
        tokio::spawn(escalate_kill(
            self.child.pid(),
            self.child.kill_handle(),
            cancel_rx,
        ));
    }

    /// React to child exit. Returns true when the supervisor should stop.
    fn handle_closed(&mut self, notice: ExitNotice) -> bool {
        tracing::debug!(
            code = ?notice.code,
            signal = ?notice.signal,
            generation = self.generation,
            "interpreter closed"
        );
        // Dropping the cancel sender stops any in-progress escalation.
        drop(self.kill_cancel.take());

        if let Some(in_flight) = self.in_flight.take() {
            let _ = in_flight.sink.send(Err(ShellError::Closed));
        }

        if self.closing {
            self.fail_queue();
            for done in self.destroy_waiters.drain(..) {
                let _ = done.send(true);
            }
            return true;
        }

        // Restart: requested (timeout, decode, write failure) or spontaneous
        // exit. Work from the dead generation is failed, never re-run —
        // interpreter state does not survive the child.
        let spontaneous = !self.restarting;
        self.generation += 1;
        let stale: Vec<Command> = {
            let generation = self.generation;
            let mut kept = VecDeque::new();
            let mut stale = Vec::new();
            for command in self.queue.drain(..) {
                if command.generation < generation {
                    stale.push(command);
                } else {
                    kept.push_back(command);
                }
            }
            self.queue = kept;
            stale
        };
        for command in stale {
            let _ = command.sink.send(Err(ShellError::Closed));
        }

        match PwshChild::spawn(&self.config) {
            Ok(child) => {
                self.child = child;
                self.replies_done = false;
                self.restarting = false;
                if spontaneous {
                    tracing::warn!(generation = self.generation, "interpreter exited unexpectedly; respawned");
                } else {
                    tracing::debug!(generation = self.generation, "interpreter restarted");
                }
                false
            }
            Err(e) => {
                // No interpreter to run against: fail everything and stop.
                tracing::error!("failed to respawn interpreter: {e}");
                self.fail_queue();
                for done in self.destroy_waiters.drain(..) {
                    let _ = done.send(true);
                }
                true
            }
        }
    }

    fn fail_queue(&mut self) {
        for command in self.queue.drain(..) {
            let _ = command.sink.send(Err(ShellError::Closed));
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Graceful-then-forceful kill: SIGTERM immediately, then SIGINT and SIGKILL
/// on a fixed schedule, racing child exit (the cancel signal).
#[cfg(unix)]
async fn escalate_kill(pid: u32, _fallback: mpsc::Sender<()>, mut cancel: oneshot::Receiver<()>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let target = Pid::from_raw(pid as i32);
    tracing::debug!(pid, "sending SIGTERM");
    let _ = kill(target, Signal::SIGTERM);

    for signal in [Signal::SIGINT, Signal::SIGKILL] {
        tokio::select! {
            _ = &mut cancel => return,
            _ = tokio::time::sleep(KILL_ESCALATION_INTERVAL) => {
                tracing::warn!(pid, ?signal, "interpreter still running; escalating");
                let _ = kill(target, signal);
            }
        }
    }
}

/// Hosts without POSIX signals get a single hard process kill.
#[cfg(not(unix))]
async fn escalate_kill(pid: u32, fallback: mpsc::Sender<()>, cancel: oneshot::Receiver<()>) {
    tracing::debug!(pid, "killing interpreter process");
    let _ = fallback.try_send(());
    let _ = cancel.await;
}
