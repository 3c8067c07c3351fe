//! Process launcher collaborator
//!
//! The supervisor only needs three capabilities from the OS: start a command,
//! terminate it, and wait for it. [`TokioLauncher`] implements them on top of
//! `tokio::process`, with one watcher task per child racing the child's exit
//! against a kill signal.

use crate::error::LaunchError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tokio::sync::oneshot;

/// Identity of one launched process
///
/// `id` is unique per launcher for its whole lifetime, so a handle can be
/// compared against whatever process currently occupies a slot even after
/// the OS has recycled the pid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pub id: u64,
    pub pid: Option<u32>,
    pub program: String,
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited on its own with this code
    Exited(i32),
    /// Killed, by us or by a signal
    Terminated,
}

/// Process creation and termination capability
#[async_trait::async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start `command` and return its handle
    async fn start(&self, command: &str) -> Result<ProcessHandle, LaunchError>;

    /// Ask the process to terminate
    ///
    /// Returns false when the handle no longer names a live process.
    fn terminate(&self, handle: &ProcessHandle) -> bool;

    /// Wait for the process to end
    async fn wait(&self, handle: &ProcessHandle) -> Result<ProcessExit, LaunchError>;
}

/// Split a command line into program and arguments
///
/// # Errors
/// Returns `LaunchError::InvalidCommand` for empty or unbalanced input.
pub fn split_command(command: &str) -> Result<(String, Vec<String>), LaunchError> {
    let mut words = shell_words::split(command).map_err(|e| LaunchError::InvalidCommand {
        command: command.to_string(),
        reason: e.to_string(),
    })?;
    if words.is_empty() {
        return Err(LaunchError::InvalidCommand {
            command: command.to_string(),
            reason: "empty command".to_string(),
        });
    }
    let program = words.remove(0);
    Ok((program, words))
}

struct LiveProcess {
    kill: Option<oneshot::Sender<()>>,
    /// Taken by the waiter; `None` means the exit is already claimed
    exit: Option<oneshot::Receiver<ProcessExit>>,
}

type LiveMap = Arc<Mutex<HashMap<u64, LiveProcess>>>;

/// Launcher backed by `tokio::process`
///
/// An entry leaves the live map when its exit is reaped by `wait`, when it is
/// terminated after its waiter went away, or when the watcher finds nobody
/// left to hand the exit to.
pub struct TokioLauncher {
    next_id: AtomicU64,
    max_live: Option<usize>,
    live: LiveMap,
}

impl TokioLauncher {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            max_live: None,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Refuse to start more than `max` concurrent processes
    #[must_use]
    pub fn with_max_live(mut self, max: usize) -> Self {
        self.max_live = Some(max);
        self
    }

    /// Processes started and not yet released
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}

impl Default for TokioLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn start(&self, command: &str) -> Result<ProcessHandle, LaunchError> {
        let (program, args) = split_command(command)?;

        if let Some(max) = self.max_live {
            if self.live.lock().len() >= max {
                return Err(LaunchError::Exhausted(max));
            }
        }

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.clone(),
                source,
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = oneshot::channel();

        self.live.lock().insert(
            id,
            LiveProcess {
                kill: Some(kill_tx),
                exit: Some(exit_rx),
            },
        );

        let live = Arc::clone(&self.live);
        tokio::spawn(async move {
            let exit = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => status.code().map_or(ProcessExit::Terminated, ProcessExit::Exited),
                    Err(e) => {
                        tracing::warn!(process = id, "wait failed: {}", e);
                        ProcessExit::Terminated
                    }
                },
                Ok(()) = kill_rx => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(process = id, "kill failed: {}", e);
                    }
                    ProcessExit::Terminated
                }
            };
            if exit_tx.send(exit).is_err() {
                // The waiter was dropped; nobody can reap this entry anymore.
                live.lock().remove(&id);
            }
        });

        tracing::debug!(process = id, ?pid, %program, "process started");
        Ok(ProcessHandle { id, pid, program })
    }

    fn terminate(&self, handle: &ProcessHandle) -> bool {
        let kill = {
            let mut live = self.live.lock();
            let Some(process) = live.get_mut(&handle.id) else {
                return false;
            };
            let kill = process.kill.take();
            if process.exit.is_none() {
                // The exit was claimed by a waiter that may already be gone.
                live.remove(&handle.id);
            }
            kill
        };
        match kill {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    async fn wait(&self, handle: &ProcessHandle) -> Result<ProcessExit, LaunchError> {
        let exit_rx = self
            .live
            .lock()
            .get_mut(&handle.id)
            .and_then(|p| p.exit.take())
            .ok_or(LaunchError::UnknownProcess(handle.id))?;

        let exit = exit_rx.await.unwrap_or(ProcessExit::Terminated);
        self.live.lock().remove(&handle.id);
        Ok(exit)
    }
}
