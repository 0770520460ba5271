//! Subprocess workers speaking newline-delimited JSON over stdio.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::{Message, PoolError, SpawnOptions, WorkerLink, WorkerSpawner};
use crate::worker::WORKER_ENV;

/// Spawns each worker as a child process running a worker host binary.
///
/// The child receives [`WORKER_ENV`]`=1`, its stdin/stdout carry protocol
/// lines, and its stderr is inherited. Closing the link closes the child's
/// stdin, which ends its serve loop.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    /// Spawn workers running `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Spawn workers running the current executable.
    ///
    /// The binary is expected to branch on [`crate::worker::is_worker`].
    ///
    /// # Errors
    ///
    /// Fails if the path of the current executable cannot be determined.
    pub fn current_exe() -> Result<Self, PoolError> {
        std::env::current_exe()
            .map(Self::new)
            .map_err(|e| PoolError::Spawn(format!("cannot locate current executable: {e}")))
    }

    /// Append an argument placed before the per-pool extra arguments.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Program run for every worker.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, options: &SpawnOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(&options.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &options.working_directory {
            cmd.current_dir(dir);
        }
        if let Some(env) = &options.environment {
            cmd.env_clear().envs(env);
        }
        cmd.env(WORKER_ENV, "1");
        cmd
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, options: &SpawnOptions) -> Result<WorkerLink, PoolError> {
        let mut child = self
            .command(options)
            .spawn()
            .map_err(|e| PoolError::Spawn(format!("{}: {e}", self.program.display())))?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::Spawn("failed to capture worker stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::Spawn("failed to capture worker stdout".into()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_lines(stdin, outbound_rx, pid));
        tokio::spawn(read_lines(stdout, inbound_tx, child, pid));

        info!(program = %self.program.display(), pid = ?pid, "worker process spawned");
        Ok(WorkerLink::new(outbound_tx, inbound_rx).with_pid(pid))
    }
}

async fn write_lines(
    mut stdin: ChildStdin,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    pid: Option<u32>,
) {
    while let Some(message) = outbound.recv().await {
        let line = match message.to_line() {
            Ok(line) => line,
            Err(error) => {
                warn!(pid = ?pid, %error, "dropping unserializable message");
                continue;
            }
        };
        if let Err(error) = stdin.write_all(line.as_bytes()).await {
            warn!(pid = ?pid, %error, "failed to write to worker stdin");
            break;
        }
        if let Err(error) = stdin.flush().await {
            warn!(pid = ?pid, %error, "failed to flush worker stdin");
            break;
        }
    }
    debug!(pid = ?pid, "worker stdin closed");
}

async fn read_lines(
    stdout: ChildStdout,
    inbound: mpsc::UnboundedSender<Message>,
    mut child: Child,
    pid: Option<u32>,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    let mut reached_eof = false;
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                reached_eof = true;
                break;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(pid = ?pid, %error, "failed to read worker stdout");
                break;
            }
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        // Raw bytes: stray non-UTF-8 output must not end the link.
        match Message::from_bytes(&line) {
            Ok(message) => {
                if inbound.send(message).is_err() {
                    break;
                }
            }
            Err(_) => debug!(
                pid = ?pid,
                line = %String::from_utf8_lossy(&line).trim_end(),
                "ignoring non-protocol output"
            ),
        }
    }

    if !reached_eof {
        // Stdout is unusable or the pool is gone; the child must not outlive it.
        if let Err(error) = child.start_kill() {
            debug!(pid = ?pid, %error, "worker process already gone");
        }
    }
    match child.wait().await {
        Ok(status) => debug!(pid = ?pid, %status, "worker process exited"),
        Err(error) => warn!(pid = ?pid, %error, "failed to reap worker process"),
    }
    // Dropping `inbound` here reports the exit to the pool.
}
