// Worker process supervisor - launch candidates, exit monitoring, bounded stop
use crate::domain::error::LinkError;
use crate::domain::link::{FaultKind, LinkEvent, ProcessState};
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use bytes::Bytes;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(3000);

pub type EventSender = mpsc::UnboundedSender<LinkEvent>;

/// Ordered executable candidates plus the arguments every candidate gets.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub candidates: Vec<String>,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn new(candidates: Vec<String>, args: Vec<String>) -> Self {
        Self { candidates, args }
    }
}

/// Lifecycle state shared between the handle, its monitor task and the client.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<Mutex<ProcessState>>);

impl StateCell {
    pub fn new(state: ProcessState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn get(&self) -> ProcessState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, state: ProcessState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(ProcessState::Stopped)
    }
}

/// A launched worker. Its pipes are only reachable through this handle.
pub struct ProcessHandle {
    program: String,
    pid: Option<u32>,
    state: StateCell,
    stdin: Option<mpsc::UnboundedSender<Bytes>>,
    stdout: Option<ChildStdout>,
    stop_tx: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state.get()
    }

    pub(crate) fn mark_failed(&self) {
        self.state.set(ProcessState::Failed);
    }

    /// Hands the worker's stdout to the stream reader. Yields it only once.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Queues one complete message for the stdin writer task and returns
    /// without waiting for the pipe. Messages are written whole, in queue order.
    pub fn enqueue(&self, bytes: Bytes) -> io::Result<()> {
        let closed = || io::Error::new(io::ErrorKind::BrokenPipe, "worker stdin is closed");
        let queue = self.stdin.as_ref().ok_or_else(closed)?;
        queue.send(bytes).map_err(|_| closed())
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("state", &self.state.get())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    start_timeout: Duration,
    stop_timeout: Duration,
}

impl ProcessSupervisor {
    pub fn new(start_timeout: Duration, stop_timeout: Duration) -> Self {
        Self {
            start_timeout,
            stop_timeout,
        }
    }

    /// Tries each candidate in order and returns the first one that starts.
    ///
    /// Readiness means the process was created; it says nothing about the
    /// worker having produced telemetry yet. Failed attempts are logged and
    /// skipped, and only the last one's diagnostic survives in the error.
    pub async fn start(
        &self,
        launch: &LaunchSpec,
        state: &StateCell,
        events: EventSender,
    ) -> Result<ProcessHandle, LinkError> {
        state.set(ProcessState::Starting);
        let mut last_error = String::from("no launch candidates configured");

        for program in &launch.candidates {
            match self.launch(program, &launch.args).await {
                Ok(child) => {
                    tracing::info!(program = %program, pid = ?child.id(), "worker process started");
                    state.set(ProcessState::Running);
                    return Ok(self.supervise(program, child, state.clone(), events));
                }
                Err(e) => {
                    tracing::debug!(program = %program, error = %e, "launch candidate failed");
                    last_error = format!("{program}: {e}");
                }
            }
        }

        state.set(ProcessState::Failed);
        tracing::error!("no worker launch candidate could be started: {}", last_error);
        Err(LinkError::StartupFailure { last_error })
    }

    async fn launch(&self, program: &str, args: &[String]) -> io::Result<Child> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // A spawn that completes after the deadline drops its child, and
        // kill_on_drop takes the half-started process down.
        let spawn = tokio::task::spawn_blocking(move || command.spawn());
        match timeout(self.start_timeout, spawn).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(io::Error::other(join_error)),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("not started within {} ms", self.start_timeout.as_millis()),
            )),
        }
    }

    fn supervise(
        &self,
        program: &str,
        mut child: Child,
        state: StateCell,
        events: EventSender,
    ) -> ProcessHandle {
        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (stop_tx, stop_rx) = oneshot::channel();

        let (stdin_tx, writer) = match stdin {
            Some(pipe) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let writer = tokio::spawn(write_stdin(
                    pipe,
                    rx,
                    state.clone(),
                    events.clone(),
                    program.to_string(),
                ));
                (Some(tx), Some(writer))
            }
            None => (None, None),
        };

        let monitor = tokio::spawn(monitor_exit(
            child,
            stop_rx,
            state.clone(),
            events,
            program.to_string(),
        ));

        ProcessHandle {
            program: program.to_string(),
            pid,
            state,
            stdin: stdin_tx,
            stdout,
            stop_tx: Some(stop_tx),
            writer,
            monitor: Some(monitor),
        }
    }

    /// Terminates the worker and waits a bounded time for it to exit.
    ///
    /// Idempotent: a handle that was already stopped is left untouched.
    pub async fn stop(&self, handle: &mut ProcessHandle) {
        let Some(mut monitor) = handle.monitor.take() else {
            handle.state.set(ProcessState::Stopped);
            return;
        };

        // Queued commands are dropped; a writer stuck on a full pipe is not waited for.
        handle.stdin.take();
        if let Some(writer) = handle.writer.take() {
            writer.abort();
            let _ = writer.await;
        }

        if let Some(stop_tx) = handle.stop_tx.take() {
            // The monitor may already have observed an exit.
            let _ = stop_tx.send(());
        }

        if timeout(self.stop_timeout, &mut monitor).await.is_err() {
            tracing::warn!(
                program = %handle.program,
                "worker did not exit within {} ms, abandoning it",
                self.stop_timeout.as_millis()
            );
            // Dropping the child inside the monitor forces the kill.
            monitor.abort();
        }

        handle.state.set(ProcessState::Stopped);
        tracing::info!(program = %handle.program, "worker process stopped");
    }
}

/// Sole owner of the worker's stdin. A failed write marks the worker failed,
/// reports `WriteError` and closes the pipe.
async fn write_stdin(
    mut pipe: ChildStdin,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
    state: StateCell,
    events: EventSender,
    program: String,
) {
    while let Some(bytes) = queue.recv().await {
        let written = match pipe.write_all(&bytes).await {
            Ok(()) => pipe.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::error!(program = %program, error = %e, "write to worker failed");
            state.set(ProcessState::Failed);
            let _ = events.send(LinkEvent::fault(FaultKind::WriteError, e.to_string()));
            return;
        }
    }
    tracing::debug!(program = %program, "worker stdin closed");
}

async fn monitor_exit(
    mut child: Child,
    stop_rx: oneshot::Receiver<()>,
    state: StateCell,
    events: EventSender,
    program: String,
) {
    // A dropped handle closes stop_rx, which also counts as a stop request.
    let exited = tokio::select! {
        biased;
        _ = stop_rx => None,
        status = child.wait() => Some(status),
    };

    match exited {
        None => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(program = %program, error = %e, "kill on stop failed");
            }
            match child.wait().await {
                Ok(status) => tracing::debug!(program = %program, %status, "worker reaped"),
                Err(e) => tracing::warn!(program = %program, error = %e, "failed to reap worker"),
            }
        }
        Some(Ok(status)) if status.success() => {
            tracing::info!(program = %program, "worker process exited cleanly");
            state.set(ProcessState::Stopped);
        }
        Some(Ok(status)) => {
            tracing::error!(program = %program, %status, "worker process crashed");
            state.set(ProcessState::Failed);
            let _ = events.send(LinkEvent::fault(
                FaultKind::Crashed,
                format!("{program} terminated unexpectedly ({status})"),
            ));
        }
        Some(Err(e)) => {
            tracing::error!(program = %program, error = %e, "failed to wait on worker process");
            state.set(ProcessState::Failed);
            let _ = events.send(LinkEvent::fault(FaultKind::Unknown, e.to_string()));
        }
    }
}
