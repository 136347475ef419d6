//! Command execution with pluggable runners
//!
//! Commands are built as argument vectors and only go through a shell when
//! built with [`CommandSpec::shell`]. Where a command runs (namespace, user,
//! elevation) is an explicit [`ExecContext`] instead of ambient state.

use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::process::{Child, Command};
use tracing::Instrument;
use wgns_core::{Error, NamespaceName, Result};

use crate::config::Settings;

/// Characters that never need quoting in the textual form of a command
const SHELL_SAFE: &str = "-_./:=,@+%";

/// Quote a word for a POSIX shell
///
/// Used both for logging the textual form of commands and for the few
/// invocations that need a shell.
#[must_use]
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || SHELL_SAFE.contains(c))
    {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

/// A program and its argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    /// Create a command with no arguments
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Run `script` through `shell -c`
    #[must_use]
    pub fn shell(shell: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(shell).arg("-c").arg(script)
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments after the program name
    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Program followed by its arguments
    #[must_use]
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Where and as whom a command runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecContext {
    /// Network namespace to enter
    pub namespace: Option<NamespaceName>,

    /// User to drop privileges to
    pub user: Option<String>,

    /// Run through the elevation wrapper
    pub elevate: bool,
}

impl ExecContext {
    /// Unprivileged, in the host namespace
    #[must_use]
    pub fn host() -> Self {
        Self::default()
    }

    /// Elevated, in the host namespace
    #[must_use]
    pub fn privileged() -> Self {
        Self {
            elevate: true,
            ..Self::default()
        }
    }

    /// Enter `namespace` before running
    #[must_use]
    pub fn in_namespace(mut self, namespace: NamespaceName) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Drop privileges to `user` before running
    #[must_use]
    pub fn as_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Final command line for `command` under this context
    ///
    /// Layout: `[elevation] [ip netns exec <ns>] [switch -u <user> --] command`
    #[must_use]
    pub fn wrap(&self, command: &CommandSpec, settings: &Settings) -> CommandSpec {
        let mut argv: Vec<String> = Vec::new();

        if self.elevate
            && let Some(elevation) = &settings.elevation
        {
            argv.push(elevation.program.clone());
            argv.extend(elevation.args.iter().cloned());
        }

        if let Some(namespace) = &self.namespace {
            argv.extend([
                settings.ip_program.clone(),
                "netns".to_string(),
                "exec".to_string(),
                namespace.to_string(),
            ]);
        }

        if let Some(user) = &self.user {
            argv.extend([
                settings.user_switch.program.clone(),
                "-u".to_string(),
                user.clone(),
                "--".to_string(),
            ]);
        }

        if argv.is_empty() {
            return command.clone();
        }

        CommandSpec::new(argv.remove(0))
            .args(argv)
            .arg(command.program.clone())
            .args(command.args.iter().cloned())
    }
}

/// Per-command execution scope
///
/// Holds the tracing span for one command and logs its release when
/// dropped, on the error path as well.
#[derive(Debug)]
pub struct CommandScope {
    span: tracing::Span,
    started: Instant,
}

impl CommandScope {
    /// Open a scope for `command` under `context`
    #[must_use]
    pub fn enter(context: &ExecContext, command: &str) -> Self {
        let span = tracing::info_span!(
            "command",
            namespace = context.namespace.as_ref().map(NamespaceName::as_str),
            user = context.user.as_deref(),
            elevated = context.elevate,
        );
        span.in_scope(|| tracing::info!(command = %command, "Running command"));

        Self {
            span,
            started: Instant::now(),
        }
    }

    /// Span covering the command
    #[must_use]
    pub const fn span(&self) -> &tracing::Span {
        &self.span
    }
}

impl Drop for CommandScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_millis();
        self.span
            .in_scope(|| tracing::debug!(elapsed_ms, "Command scope released"));
    }
}

/// Result of a command run to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: Vec<u8>,
    /// Captured standard error
    pub stderr: Vec<u8>,
}

impl ExecutionResult {
    /// Successful result with the given output
    #[must_use]
    pub fn success_with(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Whether the command exited with status zero
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Standard output as text
    #[must_use]
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Standard error as text
    #[must_use]
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Turn a non-zero exit into [`Error::Command`]
    pub fn into_checked(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::Command {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr_string(),
            })
        }
    }
}

impl From<Output> for ExecutionResult {
    fn from(output: Output) -> Self {
        Self {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Trait for command execution backends
///
/// This allows for different implementations:
/// - [`SystemRunner`] - Real processes via `tokio::process`
/// - [`MockRunner`] - Recording runner for tests
///
/// # Thread Safety
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Settings commands are wrapped with
    fn settings(&self) -> &Settings;

    /// Run a command to completion
    ///
    /// # Errors
    /// Returns [`Error::Command`] on non-zero exit, [`Error::Spawn`] if the
    /// program cannot be started
    async fn run(&self, context: &ExecContext, command: &CommandSpec) -> Result<ExecutionResult>;

    /// Start a long-lived command with piped stdout and stderr
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns [`Error::Spawn`] if the program cannot be started
    fn spawn(&self, context: &ExecContext, command: &CommandSpec) -> Result<Child>;
}

/// Runner that executes real processes
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    settings: Settings,
}

impl SystemRunner {
    /// Create a runner with the given settings
    #[must_use]
    pub const fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    fn settings(&self) -> &Settings {
        &self.settings
    }

    async fn run(&self, context: &ExecContext, command: &CommandSpec) -> Result<ExecutionResult> {
        let wrapped = context.wrap(command, &self.settings);
        let text = wrapped.to_string();
        let scope = CommandScope::enter(context, &text);

        // stdin stays attached so the elevation program can prompt
        let output = wrapped
            .to_command()
            .stdin(Stdio::inherit())
            .output()
            .instrument(scope.span().clone())
            .await
            .map_err(|source| {
                tracing::error!(command = %text, error = %source, "Failed to start command");
                Error::Spawn {
                    command: text.clone(),
                    source,
                }
            })?;

        let result = ExecutionResult::from(output);
        if result.success() {
            tracing::debug!(command = %text, "Command succeeded");
        } else {
            tracing::error!(
                command = %text,
                exit_code = ?result.exit_code,
                stderr = %result.stderr_string().trim(),
                "Command failed"
            );
        }

        result.into_checked(&text)
    }

    fn spawn(&self, context: &ExecContext, command: &CommandSpec) -> Result<Child> {
        let wrapped = context.wrap(command, &self.settings);
        let text = wrapped.to_string();
        let _scope = CommandScope::enter(context, &text);

        wrapped
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| Error::Spawn {
                command: text,
                source,
            })
    }
}

/// One command seen by [`MockRunner`]
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Context the command was issued under
    pub context: ExecContext,
    /// The command before wrapping
    pub command: CommandSpec,
    /// Contents of file arguments at the time of the call
    pub files: Vec<(PathBuf, String)>,
}

impl Invocation {
    /// Textual form of the unwrapped command
    #[must_use]
    pub fn text(&self) -> String {
        self.command.to_string()
    }
}

/// Recording runner for testing (never touches the network stack)
///
/// `run` records the invocation and succeeds unless a failure was injected.
/// `spawn` starts the *unwrapped* command as a real process, so supervision
/// can be exercised without privileges.
///
/// # Example
/// ```
/// use wgns_namespace::{CommandRunner, CommandSpec, ExecContext, MockRunner};
///
/// # tokio_test_block_on(async {
/// let runner = MockRunner::new().respond("ip netns list", "wgns-1a2b (id: 0)\n");
///
/// let list = CommandSpec::new("ip").args(["netns", "list"]);
/// let output = runner.run(&ExecContext::host(), &list).await.unwrap();
///
/// assert_eq!(output.stdout_string(), "wgns-1a2b (id: 0)\n");
/// assert_eq!(runner.count_matching("ip netns list"), 1);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MockRunner {
    settings: Settings,
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    invocations: Vec<Invocation>,
    responses: Vec<(String, String)>,
    failures: Vec<String>,
}

impl MockRunner {
    /// Create a new mock runner
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use specific settings
    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Answer commands starting with `prefix` with `stdout`
    #[must_use]
    pub fn respond(self, prefix: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.lock().responses.push((prefix.into(), stdout.into()));
        self
    }

    /// Fail commands starting with `prefix`
    #[must_use]
    pub fn fail_on(self, prefix: impl Into<String>) -> Self {
        self.lock().failures.push(prefix.into());
        self
    }

    /// Replace the canned answer for `prefix`
    pub fn set_response(&self, prefix: &str, stdout: impl Into<String>) {
        let mut state = self.lock();
        state.responses.retain(|(p, _)| p != prefix);
        state.responses.push((prefix.to_string(), stdout.into()));
    }

    /// All invocations so far, in order
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.lock().invocations.clone()
    }

    /// Textual form of every command so far, in order
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.lock().invocations.iter().map(Invocation::text).collect()
    }

    /// Number of commands starting with `prefix`
    #[must_use]
    pub fn count_matching(&self, prefix: &str) -> usize {
        self.lock()
            .invocations
            .iter()
            .filter(|invocation| invocation.text().starts_with(prefix))
            .count()
    }

    /// Number of calls made (for testing)
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.lock().invocations.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, context: &ExecContext, command: &CommandSpec) -> String {
        let files = command
            .get_args()
            .iter()
            .map(Path::new)
            .filter(|path| path.is_absolute() && path.is_file())
            .filter_map(|path| {
                std::fs::read_to_string(path)
                    .ok()
                    .map(|text| (path.to_path_buf(), text))
            })
            .collect();

        let invocation = Invocation {
            context: context.clone(),
            command: command.clone(),
            files,
        };
        let text = invocation.text();

        tracing::debug!(command = %text, "Mock: Recorded command");
        self.lock().invocations.push(invocation);
        text
    }
}

impl fmt::Debug for MockRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRunner").finish_non_exhaustive()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    fn settings(&self) -> &Settings {
        &self.settings
    }

    async fn run(&self, context: &ExecContext, command: &CommandSpec) -> Result<ExecutionResult> {
        let text = self.record(context, command);
        let state = self.lock();

        if state.failures.iter().any(|prefix| text.starts_with(prefix)) {
            return Err(Error::Command {
                command: context.wrap(command, &self.settings).to_string(),
                exit_code: Some(1),
                stderr: "mock failure".to_string(),
            });
        }

        let stdout = state
            .responses
            .iter()
            .rev()
            .find(|(prefix, _)| text.starts_with(prefix.as_str()))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();

        Ok(ExecutionResult::success_with(stdout))
    }

    fn spawn(&self, context: &ExecContext, command: &CommandSpec) -> Result<Child> {
        let text = self.record(context, command);

        command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Spawn {
                command: text,
                source,
            })
    }
}
