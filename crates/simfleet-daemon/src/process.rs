//! External process execution
//!
//! Commands are described by a [`CommandLine`] and executed through the
//! [`ProcessRunner`] trait, so engines can be driven by a scripted fake in
//! tests. [`ProcessExecutor`] is the real implementation on top of
//! `tokio::process`.
//!
//! Output capture merges stdout and stderr line-by-line in arrival order. No
//! retry happens at this layer; callers decide how often to re-run a command.

use std::collections::BTreeMap;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use simfleet_core::prelude::*;
use simfleet_core::ProcessResult;

// ─────────────────────────────────────────────────────────────────
// Command Lines
// ─────────────────────────────────────────────────────────────────

/// A program plus its arguments and environment overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandLine {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
        }
    }

    /// Parse a command-line string.
    ///
    /// Tokens are separated by whitespace; double quotes group a token that
    /// contains whitespace. Returns `None` for an empty line or an unclosed
    /// quote.
    pub fn parse(line: &str) -> Option<Self> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut has_token = false;

        for c in line.chars() {
            match c {
                '"' => {
                    in_quotes = !in_quotes;
                    has_token = true;
                }
                c if c.is_whitespace() && !in_quotes => {
                    if has_token {
                        tokens.push(std::mem::take(&mut current));
                        has_token = false;
                    }
                }
                c => {
                    current.push(c);
                    has_token = true;
                }
            }
        }
        if in_quotes {
            return None;
        }
        if has_token {
            tokens.push(current);
        }

        let mut tokens = tokens.into_iter();
        let program = tokens.next()?;
        Some(Self::new(program, tokens))
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(&self.env);
        command
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Background Processes
// ─────────────────────────────────────────────────────────────────

/// Handle to a long-lived process owned by an engine.
///
/// The child is spawned with `kill_on_drop`, so dropping the handle also
/// terminates the process.
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    child: Option<Child>,
}

impl ProcessHandle {
    pub fn from_child(label: impl Into<String>, child: Child) -> Self {
        Self {
            label: label.into(),
            child: Some(child),
        }
    }

    /// A handle with no OS process behind it
    pub fn detached(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            child: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Whether the process is still running
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kill the process if it is still running. Safe to call repeatedly.
    pub async fn kill(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("{} already exited with {:?}", self.label, status);
                Ok(())
            }
            _ => {
                info!("Killing {} (pid {:?})", self.label, child.id());
                child.kill().await.map_err(Error::from)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Runner Trait
// ─────────────────────────────────────────────────────────────────

/// Seam between engines and the OS process launcher
#[trait_variant::make(ProcessRunner: Send)]
pub trait LocalProcessRunner {
    /// Run `cmd` to completion and return its exit status and merged output.
    ///
    /// A non-zero exit is not an error here; it is reported through
    /// [`ProcessResult::exit_succeeded`].
    async fn run(&self, cmd: &CommandLine) -> Result<ProcessResult>;

    /// Start `cmd` in the background and return a handle owning it
    async fn launch(&self, cmd: &CommandLine) -> Result<ProcessHandle>;
}

/// Run `cmd` and return its output, failing with `ProcessExecution` on a
/// non-zero exit
pub async fn execute_with<R>(runner: &R, cmd: &CommandLine) -> Result<String>
where
    R: ProcessRunner + Sync,
{
    ProcessRunner::run(runner, cmd)
        .await?
        .into_output(cmd.to_string())
}

// ─────────────────────────────────────────────────────────────────
// Completion
// ─────────────────────────────────────────────────────────────────

/// Single-value-or-error result of an operation running on another task
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Completion<T> {
    pub fn new(rx: oneshot::Receiver<Result<T>>) -> Self {
        Self { rx }
    }

    /// Wait for the operation to finish
    pub async fn wait(self) -> Result<T> {
        self.rx.await.map_err(|_| Error::ChannelClosed)?
    }
}

// ─────────────────────────────────────────────────────────────────
// Executor
// ─────────────────────────────────────────────────────────────────

/// Real process runner built on `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `cmd` to completion and return its merged output.
    ///
    /// Fails with `ProcessExecution` (carrying the output) on non-zero exit
    /// and with `ProcessSpawn` when the program cannot be started.
    pub async fn execute(&self, cmd: &CommandLine) -> Result<String> {
        capture(cmd).await?.into_output(cmd.to_string())
    }

    /// Same as [`execute`](Self::execute), but runs on a spawned task.
    ///
    /// The returned [`Completion`] resolves exactly once.
    pub fn execute_async(&self, cmd: CommandLine) -> Completion<String> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = capture(&cmd).await.and_then(|r| r.into_output(cmd.to_string()));
            if tx.send(result).is_err() {
                debug!("Completion for `{}` dropped before it finished", cmd);
            }
        });
        Completion::new(rx)
    }
}

impl ProcessRunner for ProcessExecutor {
    async fn run(&self, cmd: &CommandLine) -> Result<ProcessResult> {
        capture(cmd).await
    }

    async fn launch(&self, cmd: &CommandLine) -> Result<ProcessHandle> {
        info!("Launching: {}", cmd);

        let child = cmd
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::process_spawn(cmd.to_string(), e.to_string()))?;

        debug!("Launched {} with pid {:?}", cmd.program, child.id());
        Ok(ProcessHandle::from_child(cmd.to_string(), child))
    }
}

/// Spawn `cmd`, merge its stdout/stderr lines, and wait for exit
async fn capture(cmd: &CommandLine) -> Result<ProcessResult> {
    debug!("Executing: {}", cmd);

    let mut child = cmd
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::process_spawn(cmd.to_string(), e.to_string()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::process_spawn(cmd.to_string(), "stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::process_spawn(cmd.to_string(), "stderr was not captured"))?;

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(forward_lines(stdout, line_tx.clone()));
    tokio::spawn(forward_lines(stderr, line_tx));

    // Ends once both readers hit EOF and drop their senders
    let mut output = String::new();
    while let Some(line) = line_rx.recv().await {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&line);
    }

    let status = child.wait().await?;
    trace!("`{}` exited with {:?}", cmd, status);

    Ok(ProcessResult {
        exit_succeeded: status.success(),
        output,
    })
}

/// Forward `stream` line by line; bytes that are not UTF-8 are replaced
async fn forward_lines<T>(stream: T, tx: mpsc::UnboundedSender<String>)
where
    T: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
                if tx.send(line.to_string()).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read process output: {}", e);
                break;
            }
        }
    }
}
