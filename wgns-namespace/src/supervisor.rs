//! Child process supervision
//!
//! A supervised child runs inside a namespace as an unprivileged user. Its
//! output is forwarded line by line, and when it terminates the owning
//! [`ProcessBinding`] may deflate the namespace, at most once.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use wgns_core::{Error, NamespaceEvent, NamespaceName, Result};

use crate::deflate::Deflator;
use crate::runner::{CommandRunner, CommandSpec, ExecContext, ExecutionResult};

/// How long output readers may keep draining after the child exited
///
/// Grandchildren can hold the pipes open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// One line of child output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Namespace the child runs in
    pub namespace: NamespaceName,
    /// Source stream
    pub stream: Stream,
    /// Line without its terminator
    pub line: String,
}

/// Where child output goes
///
/// Every line is logged on the `wgns::child` target; a channel can be
/// attached to observe lines programmatically.
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    tx: Option<mpsc::UnboundedSender<OutputLine>>,
}

impl OutputSink {
    /// Log-only sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also deliver lines to `tx`
    #[must_use]
    pub fn with_channel(mut self, tx: mpsc::UnboundedSender<OutputLine>) -> Self {
        self.tx = Some(tx);
        self
    }

    fn forward(&self, namespace: &NamespaceName, stream: Stream, line: String) {
        tracing::info!(
            target: "wgns::child",
            namespace = %namespace,
            stream = ?stream,
            "{line}"
        );

        if let Some(tx) = &self.tx {
            // receiver gone just means nobody is watching any more
            let _ = tx.send(OutputLine {
                namespace: namespace.clone(),
                stream,
                line,
            });
        }
    }
}

/// Association between one child, its namespace and the auto-deflate flag
#[derive(Debug)]
pub struct ProcessBinding {
    namespace: NamespaceName,
    auto_deflate: AtomicBool,
    terminated: AtomicBool,
    sink: OutputSink,
}

impl ProcessBinding {
    /// Bind a future child to `namespace`
    #[must_use]
    pub const fn new(namespace: NamespaceName, auto_deflate: bool, sink: OutputSink) -> Self {
        Self {
            namespace,
            auto_deflate: AtomicBool::new(auto_deflate),
            terminated: AtomicBool::new(false),
            sink,
        }
    }

    /// Namespace the child runs in
    #[must_use]
    pub const fn namespace(&self) -> &NamespaceName {
        &self.namespace
    }

    /// Whether termination will deflate the namespace
    #[must_use]
    pub fn auto_deflate(&self) -> bool {
        self.auto_deflate.load(Ordering::SeqCst)
    }

    /// Change the auto-deflate policy while the child runs
    pub fn set_auto_deflate(&self, enable: bool) {
        self.auto_deflate.store(enable, Ordering::SeqCst);
    }

    /// Output sink of the child
    #[must_use]
    pub const fn sink(&self) -> &OutputSink {
        &self.sink
    }

    /// Whether termination has been handled
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Handle the child's terminal transition
    ///
    /// Only the first call does anything; it deflates the namespace if
    /// auto-deflate is set. Returns whether this call deflated.
    ///
    /// # Errors
    /// Returns the deflation error, if deflation ran and failed
    pub async fn on_terminated(&self, deflator: &Deflator) -> Result<bool> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            tracing::debug!(namespace = %self.namespace, "Termination already handled");
            return Ok(false);
        }

        if !self.auto_deflate() {
            tracing::info!(
                namespace = %self.namespace,
                "Auto-deflate disabled, leaving namespace in place"
            );
            return Ok(false);
        }

        deflator.deflate(self.namespace.as_str()).await?;
        Ok(true)
    }
}

/// Outcome of a supervised child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Whether the namespace was deflated on exit
    pub deflated: bool,
}

/// Requests termination of a supervised child
///
/// The signal is sent by the termination observer, which owns the child,
/// so a request arriving after the child was reaped is dropped instead of
/// hitting a recycled pid.
#[derive(Debug, Clone)]
pub struct Terminator {
    tx: mpsc::UnboundedSender<()>,
}

impl Terminator {
    /// Ask the child to terminate with SIGTERM
    pub fn terminate(&self) {
        if self.tx.send(()).is_err() {
            tracing::debug!("Child already reaped, not signalling");
        }
    }
}

/// Handle to a running supervised child
#[derive(Debug)]
pub struct SupervisedProcess {
    pid: Option<u32>,
    binding: Arc<ProcessBinding>,
    terminator: Terminator,
    handle: JoinHandle<Result<ExitReport>>,
}

impl SupervisedProcess {
    /// OS process id of the launched wrapper
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Binding shared with the termination observer
    #[must_use]
    pub const fn binding(&self) -> &Arc<ProcessBinding> {
        &self.binding
    }

    /// Whether the termination observer has finished
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the child to terminate
    pub fn terminate(&self) {
        self.terminator.terminate();
    }

    /// Termination handle that outlives [`wait`](Self::wait)
    #[must_use]
    pub fn terminator(&self) -> Terminator {
        self.terminator.clone()
    }

    /// Wait for the child and its termination handling
    ///
    /// # Errors
    /// Returns the deflation error if auto-deflate failed
    pub async fn wait(self) -> Result<ExitReport> {
        self.handle.await?
    }
}

/// Send SIGTERM to `pid`
fn terminate_pid(pid: u32) -> Result<()> {
    let raw = i32::try_from(pid).map_err(|_| Error::precheck(format!("invalid pid {pid}")))?;
    tracing::debug!(pid, "Sending SIGTERM to child");
    kill(Pid::from_raw(raw), Signal::SIGTERM)?;
    Ok(())
}

/// Launches commands inside namespaces and observes them
#[derive(Clone)]
pub struct Supervisor {
    runner: Arc<dyn CommandRunner>,
    deflator: Deflator,
    events: Option<mpsc::Sender<NamespaceEvent>>,
}

impl Supervisor {
    /// Create a supervisor on top of `runner`
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let deflator = Deflator::new(Arc::clone(&runner));
        Self {
            runner,
            deflator,
            events: None,
        }
    }

    /// Add event channel for emitting lifecycle events
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::Sender<NamespaceEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Run a short command to completion, failing on non-zero exit
    ///
    /// # Errors
    /// Returns the runner's command or spawn error
    pub async fn run_blocking(
        &self,
        context: &ExecContext,
        command: &CommandSpec,
    ) -> Result<ExecutionResult> {
        self.runner.run(context, command).await
    }

    /// Start `command` through the shell inside the bound namespace as `user`
    ///
    /// Returns immediately; output forwarding and termination handling run
    /// as tasks on the current tokio runtime.
    ///
    /// # Errors
    /// Returns a precheck error for an empty command, or a spawn error
    pub fn launch(
        &self,
        binding: Arc<ProcessBinding>,
        command: &str,
        user: &str,
    ) -> Result<SupervisedProcess> {
        if command.trim().is_empty() {
            return Err(Error::precheck("Command cannot be empty"));
        }

        let settings = self.runner.settings();
        let context = ExecContext::privileged()
            .in_namespace(binding.namespace().clone())
            .as_user(user);

        let mut child = self
            .runner
            .spawn(&context, &CommandSpec::shell(&settings.shell, command))?;
        let pid = child.id();

        tracing::info!(
            namespace = %binding.namespace(),
            pid = ?pid,
            user,
            auto_deflate = binding.auto_deflate(),
            "Launched supervised child"
        );

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(
                stdout,
                Stream::Stdout,
                Arc::clone(&binding),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(
                stderr,
                Stream::Stderr,
                Arc::clone(&binding),
            )));
        }

        let (terminate_tx, terminate_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(observe(
            child,
            terminate_rx,
            readers,
            Arc::clone(&binding),
            self.deflator.clone(),
            self.events.clone(),
            command.to_string(),
        ));

        Ok(SupervisedProcess {
            pid,
            binding,
            terminator: Terminator { tx: terminate_tx },
            handle,
        })
    }
}

/// Forward each line of `reader` to the binding's sink
async fn forward_lines<R>(reader: R, stream: Stream, binding: Arc<ProcessBinding>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                binding.sink().forward(binding.namespace(), stream, line);
            }
            Err(e) => {
                tracing::warn!(
                    namespace = %binding.namespace(),
                    stream = ?stream,
                    error = %e,
                    "Stopped reading child output"
                );
                break;
            }
        }
    }
}

/// Termination observer: waits for the child, then hands off to the binding
async fn observe(
    mut child: Child,
    mut terminate: mpsc::UnboundedReceiver<()>,
    readers: Vec<JoinHandle<()>>,
    binding: Arc<ProcessBinding>,
    deflator: Deflator,
    events: Option<mpsc::Sender<NamespaceEvent>>,
    command: String,
) -> Result<ExitReport> {
    let namespace = binding.namespace().clone();

    publish(
        events.as_ref(),
        NamespaceEvent::ChildStarted {
            namespace: namespace.clone(),
            pid: child.id(),
            command,
            timestamp: SystemTime::now(),
        },
    );

    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(()) = terminate.recv() => {
                // not reaped yet, so the pid still names this child
                if let Some(pid) = child.id()
                    && let Err(e) = terminate_pid(pid)
                {
                    tracing::warn!(namespace = %namespace, pid, error = %e, "Could not signal child");
                }
            }
        }
    };

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(namespace = %namespace, error = %e, "Lost track of child");
            None
        }
    };

    for mut reader in readers {
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await.is_err() {
            tracing::debug!(namespace = %namespace, "Output still open after exit, detaching");
            reader.abort();
        }
    }

    publish(
        events.as_ref(),
        NamespaceEvent::ChildExited {
            namespace: namespace.clone(),
            exit_code,
            timestamp: SystemTime::now(),
        },
    );

    let deflated = match binding.on_terminated(&deflator).await {
        Ok(deflated) => deflated,
        Err(e) => {
            publish(
                events.as_ref(),
                NamespaceEvent::Error {
                    namespace,
                    message: e.to_string(),
                    timestamp: SystemTime::now(),
                },
            );
            return Err(e);
        }
    };

    if deflated {
        publish(
            events.as_ref(),
            NamespaceEvent::Deflated {
                namespace,
                timestamp: SystemTime::now(),
            },
        );
    }

    Ok(ExitReport {
        exit_code,
        deflated,
    })
}

/// Trace `event` and offer it to the event channel without waiting
///
/// A slow or absent consumer must never stall supervision, so events that
/// do not fit are dropped.
pub(crate) fn publish(events: Option<&mpsc::Sender<NamespaceEvent>>, event: NamespaceEvent) {
    event.emit_trace();

    let Some(tx) = events else {
        return;
    };

    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            tracing::warn!(
                namespace = %event.namespace(),
                "Event channel full, dropping event"
            );
        }
        Err(TrySendError::Closed(_)) => tracing::debug!("Event receiver dropped"),
    }
}
