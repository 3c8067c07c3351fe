//! Testing utilities for the Trellis workspace
//!
//! Scripted collaborators that stand in for real processes and timers, plus
//! a few tree fixtures.

#![allow(missing_docs)]

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use trellis_kernel::deadline::{DeadlineCallback, DeadlineScheduler, DeadlineToken};
use trellis_kernel::error::{DeadlineError, LaunchError};
use trellis_kernel::executor::Supervisor;
use trellis_kernel::process::{ProcessExit, ProcessHandle, ProcessLauncher};
use trellis_kernel::config::HarnessConfig;
use trellis_kernel::{Harness, NodeHandle};

/// What a scripted process does, parsed from the first word of its command
///
/// - `pass`: exit 0 at once
/// - `exit:N`: exit with code N at once
/// - `sleep:MS` / `sleep:MS:N`: exit 0 (or N) after MS milliseconds
/// - `hang`: run until terminated
/// - `missing`: fail to start
///
/// Any further words only label the process in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Exit(i32),
    Sleep(Duration, i32),
    Hang,
    Missing,
}

impl Behaviour {
    pub fn parse(word: &str) -> Option<Self> {
        let mut parts = word.split(':');
        match (parts.next()?, parts.next(), parts.next()) {
            ("pass", None, None) => Some(Behaviour::Exit(0)),
            ("exit", Some(code), None) => code.parse().ok().map(Behaviour::Exit),
            ("sleep", Some(ms), code) => {
                let ms = ms.parse().ok()?;
                let code = match code {
                    Some(code) => code.parse().ok()?,
                    None => 0,
                };
                Some(Behaviour::Sleep(Duration::from_millis(ms), code))
            }
            ("hang", None, None) => Some(Behaviour::Hang),
            ("missing", None, None) => Some(Behaviour::Missing),
            _ => None,
        }
    }
}

/// Observable launcher activity, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchEvent {
    Started(String),
    Exited(String, i32),
    Terminated(String),
}

struct Scripted {
    label: String,
    behaviour: Behaviour,
    kill_tx: Option<oneshot::Sender<()>>,
    kill_rx: Option<oneshot::Receiver<()>>,
}

/// In-process launcher driven by [`Behaviour`] strings
#[derive(Default)]
pub struct ScriptedLauncher {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, Scripted>>,
    events: Mutex<Vec<LaunchEvent>>,
    queued: Mutex<HashMap<String, VecDeque<Behaviour>>>,
    peak_live: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next starts of exactly `command` behave as given, in order
    pub fn queue(&self, command: &str, behaviours: impl IntoIterator<Item = Behaviour>) {
        self.queued
            .lock()
            .entry(command.to_string())
            .or_default()
            .extend(behaviours);
    }

    pub fn events(&self) -> Vec<LaunchEvent> {
        self.events.lock().clone()
    }

    /// Labels in start order
    pub fn started(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                LaunchEvent::Started(label) => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                LaunchEvent::Terminated(label) => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Highest number of processes alive at once
    pub fn peak_live(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }

    fn record(&self, event: LaunchEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait::async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn start(&self, command: &str) -> Result<ProcessHandle, LaunchError> {
        let mut words = command.split_whitespace();
        let word = words.next().unwrap_or_default();
        let queued = self
            .queued
            .lock()
            .get_mut(command)
            .and_then(VecDeque::pop_front);
        let behaviour = queued
            .or_else(|| Behaviour::parse(word))
            .ok_or_else(|| LaunchError::InvalidCommand {
                command: command.to_string(),
                reason: "unknown scripted behaviour".to_string(),
            })?;
        let rest: Vec<&str> = words.collect();
        let label = if rest.is_empty() { word.to_string() } else { rest.join(" ") };

        if behaviour == Behaviour::Missing {
            return Err(LaunchError::Spawn {
                program: label,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (kill_tx, kill_rx) = oneshot::channel();
        let live = {
            let mut live = self.live.lock();
            live.insert(
                id,
                Scripted {
                    label: label.clone(),
                    behaviour,
                    kill_tx: Some(kill_tx),
                    kill_rx: Some(kill_rx),
                },
            );
            live.len()
        };
        self.peak_live.fetch_max(live, Ordering::SeqCst);
        self.record(LaunchEvent::Started(label.clone()));

        Ok(ProcessHandle {
            id,
            pid: None,
            program: label,
        })
    }

    fn terminate(&self, handle: &ProcessHandle) -> bool {
        let kill = self
            .live
            .lock()
            .get_mut(&handle.id)
            .and_then(|p| p.kill_tx.take());
        let Some(tx) = kill else {
            return false;
        };
        if tx.send(()).is_err() {
            // Nobody is waiting any more: the process dies unobserved.
            if let Some(p) = self.live.lock().remove(&handle.id) {
                self.record(LaunchEvent::Terminated(p.label));
            }
        }
        true
    }

    async fn wait(&self, handle: &ProcessHandle) -> Result<ProcessExit, LaunchError> {
        let (behaviour, kill_rx, label) = {
            let mut live = self.live.lock();
            let p = live
                .get_mut(&handle.id)
                .ok_or(LaunchError::UnknownProcess(handle.id))?;
            let kill_rx = p.kill_rx.take().ok_or(LaunchError::UnknownProcess(handle.id))?;
            (p.behaviour, kill_rx, p.label.clone())
        };

        let exit = match behaviour {
            Behaviour::Exit(code) => ProcessExit::Exited(code),
            Behaviour::Sleep(after, code) => {
                tokio::select! {
                    biased;
                    () = tokio::time::sleep(after) => ProcessExit::Exited(code),
                    Ok(()) = kill_rx => ProcessExit::Terminated,
                }
            }
            Behaviour::Hang | Behaviour::Missing => {
                let _ = kill_rx.await;
                ProcessExit::Terminated
            }
        };

        self.live.lock().remove(&handle.id);
        self.record(match exit {
            ProcessExit::Exited(code) => LaunchEvent::Exited(label, code),
            ProcessExit::Terminated => LaunchEvent::Terminated(label),
        });
        Ok(exit)
    }
}

/// Deadline scheduler whose callbacks only run when a test fires them
#[derive(Default)]
pub struct ManualDeadlines {
    next_token: AtomicU64,
    pending: Mutex<BTreeMap<u64, (Duration, DeadlineCallback)>>,
    canceled: AtomicUsize,
    max_pending: Option<usize>,
    leaky: bool,
}

impl ManualDeadlines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep callbacks after `cancel`, as if cancellation lost the race
    #[must_use]
    pub fn leaky() -> Self {
        Self {
            leaky: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = Some(max);
        self
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn canceled_count(&self) -> usize {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Durations of the callbacks still held, in scheduling order
    pub fn pending_delays(&self) -> Vec<Duration> {
        self.pending.lock().values().map(|(d, _)| *d).collect()
    }

    /// Run one callback; false if it is not held
    pub fn fire(&self, token: DeadlineToken) -> bool {
        let entry = self.pending.lock().remove(&token.0);
        match entry {
            Some((_, callback)) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Run every held callback in scheduling order
    pub fn fire_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.pending.lock());
        let fired = drained.len();
        for (_, (_, callback)) in drained {
            callback();
        }
        fired
    }
}

impl DeadlineScheduler for ManualDeadlines {
    fn schedule(
        &self,
        after: Duration,
        callback: DeadlineCallback,
    ) -> Result<DeadlineToken, DeadlineError> {
        let mut pending = self.pending.lock();
        if let Some(max) = self.max_pending {
            if pending.len() >= max {
                return Err(DeadlineError::Exhausted(max));
            }
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        pending.insert(token, (after, callback));
        Ok(DeadlineToken(token))
    }

    fn cancel(&self, token: DeadlineToken) {
        self.canceled.fetch_add(1, Ordering::SeqCst);
        if !self.leaky {
            self.pending.lock().remove(&token.0);
        }
    }
}

/// Harness wired to the given collaborators
pub fn scripted_harness(
    launcher: Arc<ScriptedLauncher>,
    deadlines: Arc<dyn DeadlineScheduler>,
) -> Harness {
    Harness::with_supervisor(
        HarnessConfig::default(),
        Supervisor::with_collaborators(launcher, deadlines),
    )
}

/// Add a named test case with `exec` under `parent`
pub fn add_scripted(
    harness: &mut Harness,
    parent: NodeHandle,
    name: &str,
    exec: &str,
) -> NodeHandle {
    let node = harness.add_test_case(parent, Some(name), true).expect("fixture test case must be addable");
    harness.set_test_case_exec(node, exec).expect("fixture exec must be settable");
    node
}
