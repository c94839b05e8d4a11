//! Ownership of the single live transcoder process.
//!
//! The supervisor holds at most one active process. Starting a new
//! transcode first preempts the current one and waits until it has actually
//! exited, so two encoders never compete for the GPU. Each process gets one
//! arbiter task that multiplexes its stdout, stderr and cancellation; stdout
//! is forwarded to the HTTP body through a bounded channel, so a slow client
//! pauses the pipe read instead of buffering without limit.
//!
//! Dropping a [`TranscodeBody`] before it ends (request abort, socket close
//! or reset) cancels the process.

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use mb_core::config::TranscodeConfig;
use mb_core::{CorrelationId, Error, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_stream::wrappers::{LinesStream, ReceiverStream};
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use crate::command::program_name;

/// Read size for the transcoder's stdout.
const STDOUT_CHUNK: usize = 64 * 1024;

/// How long to keep reading stderr after the process has exited.
const STDERR_DRAIN: Duration = Duration::from_secs(1);

/// Why a process was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    /// A newer request took the slot.
    Preempted,
    /// The response body was dropped before the stream ended.
    ClientGone,
    /// The server is shutting down.
    Shutdown,
}

/// Terminal state of a transcoder process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// stdout reached EOF and the process exited successfully.
    Completed,
    /// The process was terminated on purpose.
    Killed(KillReason),
    /// The process exited with a failure status or could not be waited on.
    Errored(String),
}

/// Tunables for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Time between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
    /// Capacity of the stdout-to-body channel, in chunks.
    pub output_buffer_chunks: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            kill_grace: Duration::from_secs(3),
            output_buffer_chunks: 8,
        }
    }
}

impl From<&TranscodeConfig> for SupervisorConfig {
    fn from(config: &TranscodeConfig) -> Self {
        Self {
            kill_grace: Duration::from_millis(config.kill_grace_ms),
            output_buffer_chunks: config.output_buffer_chunks,
        }
    }
}

/// The process currently held in the supervisor's slot.
struct ActiveProcess {
    correlation_id: CorrelationId,
    pid: Option<u32>,
    cancel: CancellationToken,
    reason: Arc<parking_lot::Mutex<Option<KillReason>>>,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl ActiveProcess {
    /// Cancel the process and wait for its arbiter to report the exit.
    async fn kill(mut self, reason: KillReason) -> ProcessExit {
        if self.exit.borrow().is_none() {
            self.reason.lock().get_or_insert(reason);
            self.cancel.cancel();
        }
        wait_exit(&mut self.exit).await
    }
}

async fn wait_exit(rx: &mut watch::Receiver<Option<ProcessExit>>) -> ProcessExit {
    match rx.wait_for(Option::is_some).await {
        Ok(exit) => exit.clone().unwrap_or(ProcessExit::Errored("exit not reported".into())),
        Err(_) => ProcessExit::Errored("arbiter task ended without reporting".into()),
    }
}

/// Handle for observing a process's terminal state.
#[derive(Debug, Clone)]
pub struct ExitWatch(watch::Receiver<Option<ProcessExit>>);

impl ExitWatch {
    /// The exit, if the process has already finished.
    pub fn get(&self) -> Option<ProcessExit> {
        self.0.borrow().clone()
    }

    /// Wait until the process has finished.
    pub async fn wait(&mut self) -> ProcessExit {
        wait_exit(&mut self.0).await
    }
}

/// A freshly started transcode.
pub struct TranscodeSession {
    pub correlation_id: CorrelationId,
    pub pid: Option<u32>,
    /// Transcoder stdout, ready to become an HTTP response body.
    pub body: TranscodeBody,
    pub exit: ExitWatch,
}

/// Stream of stdout chunks from the transcoder.
///
/// Dropping it before the stream ends cancels the process.
pub struct TranscodeBody {
    chunks: ReceiverStream<Bytes>,
    guard: Option<DropGuard>,
}

impl Stream for TranscodeBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.chunks).poll_next(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => {
                // Fully drained; nothing left to cancel.
                if let Some(guard) = self.guard.take() {
                    guard.disarm();
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Owner of the one-and-only transcoder slot.
pub struct TranscodeSupervisor {
    program: PathBuf,
    config: SupervisorConfig,
    slot: Arc<Mutex<Option<ActiveProcess>>>,
    spawns: AtomicU64,
}

impl TranscodeSupervisor {
    /// Create a supervisor that runs `program` (normally ffmpeg).
    pub fn new(program: PathBuf, config: SupervisorConfig) -> Self {
        Self {
            program,
            config,
            slot: Arc::new(Mutex::new(None)),
            spawns: AtomicU64::new(0),
        }
    }

    /// Number of processes spawned so far.
    pub fn spawn_count(&self) -> u64 {
        self.spawns.load(Ordering::Relaxed)
    }

    /// Correlation id of the process currently in the slot.
    pub async fn active(&self) -> Option<CorrelationId> {
        self.slot.lock().await.as_ref().map(|p| p.correlation_id)
    }

    /// Preempt any running process, then spawn a new one with `args`.
    ///
    /// The slot lock is held from the kill through the spawn, so concurrent
    /// callers are serialized and the previous process has exited before the
    /// next one starts.
    ///
    /// # Errors
    ///
    /// [`Error::ProcessSpawnFailure`] if the program cannot be started.
    pub async fn start(&self, args: Vec<String>) -> Result<TranscodeSession> {
        let mut slot = self.slot.lock().await;

        if let Some(previous) = slot.take() {
            let previous_id = previous.correlation_id;
            tracing::info!(correlation_id = %previous_id, pid = ?previous.pid, "Preempting active transcode");
            let exit = previous.kill(KillReason::Preempted).await;
            tracing::debug!(correlation_id = %previous_id, ?exit, "Preempted transcode exited");
        }

        let correlation_id = CorrelationId::new();
        let tool = program_name(&self.program);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::spawn(&tool, e.to_string()))?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::spawn(&tool, "stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::spawn(&tool, "stderr was not captured"))?;

        let spawned = self.spawns.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(%correlation_id, ?pid, spawned, "Spawned {tool}");
        tracing::debug!(%correlation_id, args = ?args, "Transcoder arguments");

        let cancel = CancellationToken::new();
        let reason = Arc::new(parking_lot::Mutex::new(None));
        let (chunk_tx, chunk_rx) = mpsc::channel(self.config.output_buffer_chunks.max(1));
        let (exit_tx, exit_rx) = watch::channel(None);

        let arbiter = Arbiter {
            correlation_id,
            pid,
            child,
            cancel: cancel.clone(),
            reason: reason.clone(),
            exit_tx,
            slot: self.slot.clone(),
            kill_grace: self.config.kill_grace,
        };
        let span = tracing::info_span!("transcode", %correlation_id, pid = ?pid);
        tokio::spawn(arbiter.run(stdout, stderr, chunk_tx).instrument(span));

        *slot = Some(ActiveProcess {
            correlation_id,
            pid,
            cancel: cancel.clone(),
            reason,
            exit: exit_rx.clone(),
        });

        Ok(TranscodeSession {
            correlation_id,
            pid,
            body: TranscodeBody {
                chunks: ReceiverStream::new(chunk_rx),
                guard: Some(cancel.drop_guard()),
            },
            exit: ExitWatch(exit_rx),
        })
    }

    /// Kill the active process, if any, and wait for it to exit.
    pub async fn shutdown(&self) -> Option<ProcessExit> {
        let active = self.slot.lock().await.take()?;
        tracing::info!(correlation_id = %active.correlation_id, "Stopping transcode for shutdown");
        Some(active.kill(KillReason::Shutdown).await)
    }
}

enum Event {
    Stdout(std::io::Result<Bytes>),
    StdoutClosed,
    Stderr(std::io::Result<String>),
}

/// How the forwarding loop ended.
enum Forwarding {
    Eof,
    Cancelled,
}

/// Per-process task: forwards stdout, logs stderr, reacts to cancellation
/// and publishes the exit.
struct Arbiter {
    correlation_id: CorrelationId,
    pid: Option<u32>,
    child: Child,
    cancel: CancellationToken,
    reason: Arc<parking_lot::Mutex<Option<KillReason>>>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    slot: Arc<Mutex<Option<ActiveProcess>>>,
    kill_grace: Duration,
}

impl Arbiter {
    async fn run(
        mut self,
        stdout: ChildStdout,
        stderr: ChildStderr,
        chunk_tx: mpsc::Sender<Bytes>,
    ) {
        let stdout_events = ReaderStream::with_capacity(stdout, STDOUT_CHUNK)
            .map(Event::Stdout)
            .chain(tokio_stream::once(Event::StdoutClosed));
        let stderr_events =
            LinesStream::new(BufReader::new(stderr).lines()).map(Event::Stderr);
        let mut events = stdout_events.merge(stderr_events);

        let forwarding = loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Forwarding::Cancelled,
                event = events.next() => event,
            };

            match event {
                Some(Event::Stdout(Ok(chunk))) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break Forwarding::Cancelled,
                        sent = chunk_tx.send(chunk) => {
                            if sent.is_err() {
                                self.reason.lock().get_or_insert(KillReason::ClientGone);
                                break Forwarding::Cancelled;
                            }
                        }
                    }
                }
                Some(Event::Stdout(Err(e))) => {
                    tracing::warn!(error = %e, "Failed reading transcoder stdout");
                    break Forwarding::Eof;
                }
                Some(event @ Event::Stderr(_)) => log_stderr(event),
                Some(Event::StdoutClosed) | None => break Forwarding::Eof,
            }
        };

        // Ends the body once the buffered chunks are read.
        drop(chunk_tx);
        let exit = match forwarding {
            Forwarding::Eof => self.drain_and_wait(events).await,
            Forwarding::Cancelled => {
                // Stdio handles go first so the process sees EPIPE.
                drop(events);
                terminate(&mut self.child, self.pid, self.kill_grace).await;
                ProcessExit::Killed(kill_reason(&self.reason))
            }
        };

        match &exit {
            ProcessExit::Completed => tracing::info!("Transcode completed"),
            ProcessExit::Killed(reason) => tracing::info!(?reason, "Transcode killed"),
            ProcessExit::Errored(message) => tracing::error!(%message, "Transcode failed"),
        }

        // Publish before touching the slot: a preempting caller holds the slot
        // lock while it waits for this report.
        self.exit_tx.send_replace(Some(exit));

        let mut slot = self.slot.lock().await;
        if slot.as_ref().map(|p| p.correlation_id) == Some(self.correlation_id) {
            *slot = None;
        }
    }

    /// Wait for a process whose stdout has closed, still logging its stderr.
    ///
    /// Encoders print their final diagnostics after closing the output, so
    /// stderr stays open until the process has exited.
    async fn drain_and_wait<S>(&mut self, mut events: S) -> ProcessExit
    where
        S: futures::Stream<Item = Event> + Unpin,
    {
        let mut stderr_open = true;
        let status = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    drop(events);
                    terminate(&mut self.child, self.pid, self.kill_grace).await;
                    return ProcessExit::Killed(kill_reason(&self.reason));
                }
                event = events.next(), if stderr_open => match event {
                    Some(event) => log_stderr(event),
                    None => stderr_open = false,
                },
                status = self.child.wait() => break status,
            }
        };

        // Lines written just before exit are still buffered in the pipe. A
        // grandchild holding the pipe open must not stall the report.
        if stderr_open {
            let rest = async {
                while let Some(event) = events.next().await {
                    log_stderr(event);
                }
            };
            if tokio::time::timeout(STDERR_DRAIN, rest).await.is_err() {
                tracing::debug!("Transcoder stderr still open after exit");
            }
        }

        match status {
            Ok(status) if status.success() => ProcessExit::Completed,
            Ok(status) => ProcessExit::Errored(format!("exited with {status}")),
            Err(e) => ProcessExit::Errored(format!("wait failed: {e}")),
        }
    }
}

fn log_stderr(event: Event) {
    match event {
        Event::Stderr(Ok(line)) => {
            if !line.trim().is_empty() {
                tracing::warn!(line = %line, "Transcoder stderr");
            }
        }
        Event::Stderr(Err(e)) => {
            tracing::debug!(error = %e, "Transcoder stderr unreadable");
        }
        Event::Stdout(_) | Event::StdoutClosed => {}
    }
}

/// A cancel without an explicit reason comes from the body's drop guard.
fn kill_reason(reason: &parking_lot::Mutex<Option<KillReason>>) -> KillReason {
    reason.lock().unwrap_or(KillReason::ClientGone)
}

/// SIGTERM, then SIGKILL after `grace` if the process is still running.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) {
    send_sigterm(pid);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(%status, "Transcoder exited after SIGTERM");
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed waiting for transcoder");
        }
        Err(_) => {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "Transcoder ignored SIGTERM, sending SIGKILL");
            if let Err(e) = child.start_kill() {
                tracing::warn!(error = %e, "SIGKILL failed");
            }
            if let Err(e) = child.wait().await {
                tracing::warn!(error = %e, "Failed reaping transcoder");
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::debug!(pid, error = %e, "SIGTERM not delivered");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor(program: &str) -> TranscodeSupervisor {
        TranscodeSupervisor::new(
            PathBuf::from(program),
            SupervisorConfig {
                kill_grace: Duration::from_millis(500),
                output_buffer_chunks: 2,
            },
        )
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".into(), script.into()]
    }

    async fn collect(mut body: TranscodeBody) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    async fn wait_idle(sup: &TranscodeSupervisor) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while sup.active().await.is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("slot was never cleared");
    }

    #[tokio::test]
    async fn natural_completion_streams_everything() {
        let sup = supervisor("sh");
        let TranscodeSession { body, mut exit, .. } =
            sup.start(sh("printf hello; printf ' world'")).await.unwrap();

        assert_eq!(collect(body).await, b"hello world");
        assert_eq!(exit.wait().await, ProcessExit::Completed);
        wait_idle(&sup).await;
        assert_eq!(sup.spawn_count(), 1);
    }

    #[tokio::test]
    async fn stderr_output_does_not_kill() {
        let sup = supervisor("sh");
        let TranscodeSession { body, mut exit, .. } = sup
            .start(sh("echo 'deprecated pixel format' >&2; printf data"))
            .await
            .unwrap();

        assert_eq!(collect(body).await, b"data");
        assert_eq!(exit.wait().await, ProcessExit::Completed);
    }

    #[tokio::test]
    async fn stderr_after_stdout_closes_is_still_read() {
        let sup = supervisor("sh");
        let TranscodeSession { body, mut exit, .. } = sup
            .start(sh(
                "printf data; exec 1>&-; sleep 0.3; echo 'final diagnostic' >&2; exit 0",
            ))
            .await
            .unwrap();

        assert_eq!(collect(body).await, b"data");
        assert_eq!(exit.wait().await, ProcessExit::Completed);
        wait_idle(&sup).await;
    }

    #[tokio::test]
    async fn full_channel_pauses_the_producer() {
        let sup = TranscodeSupervisor::new(
            PathBuf::from("head"),
            SupervisorConfig {
                kill_grace: Duration::from_millis(500),
                output_buffer_chunks: 1,
            },
        );
        // Unthrottled, this finishes in a few milliseconds.
        let TranscodeSession { body, mut exit, .. } = sup
            .start(vec!["-c".into(), "50000000".into(), "/dev/zero".into()])
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(exit.get(), None);
        assert!(sup.active().await.is_some());

        drop(body);
        assert_eq!(exit.wait().await, ProcessExit::Killed(KillReason::ClientGone));
        wait_idle(&sup).await;
    }

    #[tokio::test]
    async fn failing_exit_status_is_errored() {
        let sup = supervisor("sh");
        let TranscodeSession { body, mut exit, .. } =
            sup.start(sh("echo 'No such file' >&2; exit 2")).await.unwrap();

        assert!(collect(body).await.is_empty());
        assert!(matches!(exit.wait().await, ProcessExit::Errored(_)));
        wait_idle(&sup).await;
    }

    #[tokio::test]
    async fn preempted_process_exits_before_next_spawn() {
        let sup = supervisor("yes");
        let first = sup.start(vec![]).await.unwrap();
        let first_exit = first.exit.clone();
        assert_eq!(sup.active().await, Some(first.correlation_id));

        let second = sup.start(vec![]).await.unwrap();

        // start() only returns after the previous exit was reported.
        assert_eq!(first_exit.get(), Some(ProcessExit::Killed(KillReason::Preempted)));
        assert_eq!(sup.active().await, Some(second.correlation_id));
        assert_eq!(sup.spawn_count(), 2);

        drop(first);
        drop(second);
        wait_idle(&sup).await;
    }

    #[tokio::test]
    async fn dropping_body_kills_process() {
        let sup = supervisor("yes");
        let TranscodeSession { mut body, mut exit, .. } = sup.start(vec![]).await.unwrap();

        let chunk = body.next().await.unwrap().unwrap();
        assert!(chunk.starts_with(b"y\n"));
        drop(body);

        assert_eq!(exit.wait().await, ProcessExit::Killed(KillReason::ClientGone));
        wait_idle(&sup).await;
    }

    #[tokio::test]
    async fn sigterm_ignored_escalates_to_sigkill() {
        let sup = supervisor("sh");
        let TranscodeSession { body, mut exit, .. } = sup
            .start(sh("trap '' TERM; printf x; while :; do sleep 0.05; done"))
            .await
            .unwrap();

        drop(body);
        let exit = tokio::time::timeout(Duration::from_secs(5), exit.wait())
            .await
            .expect("process was never killed");
        assert_eq!(exit, ProcessExit::Killed(KillReason::ClientGone));
    }

    #[tokio::test]
    async fn shutdown_kills_active_process() {
        let sup = supervisor("yes");
        let session = sup.start(vec![]).await.unwrap();

        assert_eq!(sup.shutdown().await, Some(ProcessExit::Killed(KillReason::Shutdown)));
        assert_eq!(sup.active().await, None);
        assert_eq!(session.exit.get(), Some(ProcessExit::Killed(KillReason::Shutdown)));
        assert_eq!(sup.shutdown().await, None);
    }

    #[tokio::test]
    async fn spawn_failure_leaves_slot_empty() {
        let sup = supervisor("nonexistent_transcoder_xyz");
        let err = sup.start(vec![]).await.err().unwrap();
        assert!(matches!(err, Error::ProcessSpawnFailure { .. }));
        assert_eq!(err.http_status(), 502);
        assert_eq!(sup.active().await, None);
        assert_eq!(sup.spawn_count(), 0);
    }
}
