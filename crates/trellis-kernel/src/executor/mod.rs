//! Execution Supervisor
//!
//! Walks a scenario from its root in child order:
//! - a blocking group awaits each child before starting the next
//! - a non-blocking group starts every child and joins them all
//! - a test case runs its process `number_of_runs` times, always in sequence
//! - a reference runs its target in its place
//!
//! Each run may carry a deadline. The deadline callback and the natural exit
//! race; the callback only terminates if the node's slot still holds the
//! exact process it was armed for.

use crate::deadline::{DeadlineCallback, DeadlineScheduler, TokioDeadlines};
use crate::error::LaunchError;
use crate::gc::release_outstanding;
use crate::identity::NodeId;
use crate::process::{ProcessExit, ProcessHandle, ProcessLauncher, TokioLauncher};
use crate::reference::excise_invalid_references;
use crate::scenario::node::{Node, ProcessSlot};
use crate::scenario::Scenario;
use crate::status::{group_status, pseudo_group_status, Status};
use crate::types::{NodeIndex, Phase, RunOutcome, ScenarioId, TERMINATED_EXIT_CODE};
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use trellis_profile::ProfileContext;

/// Outcome of one test case position in the tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseReport {
    pub id: NodeId,
    pub name: String,
    pub exec: String,
    /// Set when this position aliases another node
    pub reference_to: Option<NodeId>,
    pub outcomes: Vec<RunOutcome>,
    pub status: Status,
}

/// Result of one execution pass over a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub scenario: ScenarioId,
    pub status: Status,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub test_cases: Vec<TestCaseReport>,
    /// References removed before the pass because their target was gone
    pub excised: Vec<NodeId>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.status.is_pass()
    }

    /// Human-readable summary
    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Scenario {}", self.scenario);
        let _ = writeln!(out, "  Started: {}", self.started_at.to_rfc3339());
        let _ = writeln!(out, "  Elapsed: {}ms", self.elapsed_ms);
        for tc in &self.test_cases {
            let runs: Vec<String> = tc.outcomes.iter().map(ToString::to_string).collect();
            let name = if tc.name.is_empty() { tc.id.to_string() } else { tc.name.clone() };
            let alias = tc
                .reference_to
                .map(|t| format!(" -> {t}"))
                .unwrap_or_default();
            let _ = writeln!(out, "  [{}] {name}{alias}: {}", tc.status, runs.join(", "));
        }
        for id in &self.excised {
            let _ = writeln!(out, "  [EXCISED] {id}");
        }
        let _ = writeln!(out, "Status: {}", self.status);
        out
    }
}

/// Drives test case processes through the launcher and deadline scheduler
pub struct Supervisor {
    launcher: Arc<dyn ProcessLauncher>,
    deadlines: Arc<dyn DeadlineScheduler>,
    profile: Option<Arc<ProfileContext>>,
}

impl Supervisor {
    /// Supervisor backed by real processes and tokio timers
    pub fn new() -> Self {
        Self::with_collaborators(Arc::new(TokioLauncher::new()), Arc::new(TokioDeadlines::new()))
    }

    /// Supervisor with custom collaborators
    pub fn with_collaborators(
        launcher: Arc<dyn ProcessLauncher>,
        deadlines: Arc<dyn DeadlineScheduler>,
    ) -> Self {
        Self {
            launcher,
            deadlines,
            profile: None,
        }
    }

    /// Record every run into `profile`
    #[must_use]
    pub fn with_profile(mut self, profile: Arc<ProfileContext>) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn launcher(&self) -> &dyn ProcessLauncher {
        self.launcher.as_ref()
    }

    pub fn deadlines(&self) -> &dyn DeadlineScheduler {
        self.deadlines.as_ref()
    }

    /// Run one execution pass
    ///
    /// Invalid references are excised first; after that the tree topology is
    /// frozen for good. Processes and deadlines left behind by an abandoned
    /// earlier pass are released before anything new starts.
    pub(crate) async fn execute(&self, scenario: &mut Scenario) -> RunReport {
        let started_at = Utc::now();
        let started = Instant::now();

        let order = scenario.depth_first();
        let leftover = release_outstanding(
            scenario,
            &order,
            self.launcher.as_ref(),
            self.deadlines.as_ref(),
            true,
        );
        if leftover > 0 {
            tracing::warn!(scenario = %scenario.id(), leftover, "terminated processes of an abandoned pass");
        }

        let excised = excise_invalid_references(scenario);
        scenario.set_phase(Phase::Executing);
        for index in scenario.indices() {
            scenario.node(index).process.state.lock().outcomes.clear();
        }

        tracing::info!(scenario = %scenario.id(), nodes = scenario.len(), "executing scenario");
        let status = self.run_node(scenario, NodeIndex::ROOT).await;
        scenario.set_phase(Phase::Executed);

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(scenario = %scenario.id(), %status, elapsed_ms, "scenario finished");

        RunReport {
            scenario: scenario.id(),
            status,
            started_at,
            elapsed_ms,
            test_cases: collect_test_cases(scenario),
            excised,
        }
    }

    fn run_node<'a>(&'a self, scenario: &'a Scenario, index: NodeIndex) -> BoxFuture<'a, Status> {
        async move {
            let node = scenario.node(index);

            if let Some(target) = node.reference {
                tracing::debug!(node = %node.id, target = %scenario.node(target).id, "running reference target");
                return self.run_node(scenario, target).await;
            }

            if !node.is_group() {
                return self.run_test_case(scenario, index).await;
            }

            if node.blocking {
                for &child in &node.children {
                    self.run_node(scenario, child).await;
                }
            } else {
                join_all(node.children.iter().map(|&c| self.run_node(scenario, c))).await;
            }

            let status = group_status(scenario, index);
            tracing::debug!(node = %node.id, %status, "group resolved");
            status
        }
        .boxed()
    }

    async fn run_test_case(&self, scenario: &Scenario, index: NodeIndex) -> Status {
        let node = scenario.node(index);
        let slot = Arc::clone(&node.process);

        // Serialises every path that reaches this leaf during the pass.
        let _running = slot.run_lock.lock().await;
        slot.state.lock().outcomes.clear();

        let runs = node.runs.max(1);
        for run in 1..=runs {
            let outcome = self.run_once(node, &slot, run, runs).await;
            slot.state.lock().outcomes.push(outcome);
        }

        pseudo_group_status(scenario, index)
    }

    async fn run_once(&self, node: &Node, slot: &Arc<ProcessSlot>, run: u32, runs: u32) -> RunOutcome {
        let started = Instant::now();
        let outcome = self.launch_and_reap(node, slot).await;

        tracing::debug!(node = %node.id, run, runs, %outcome, "run finished");
        if let Some(profile) = &self.profile {
            let ticks = i64::try_from(started.elapsed().as_micros()).unwrap_or(i64::MAX);
            let label = if node.name.is_empty() { node.id.to_string() } else { node.name.clone() };
            profile.record(
                ticks,
                format!("{ticks} us {label} run {run}/{runs} {outcome}"),
                !outcome.is_pass(),
            );
        }
        outcome
    }

    async fn launch_and_reap(&self, node: &Node, slot: &Arc<ProcessSlot>) -> RunOutcome {
        if node.exec.trim().is_empty() {
            tracing::warn!(node = %node.id, "test case has no executable");
            return RunOutcome::LaunchFailed;
        }

        let handle = match self.launcher.start(&node.exec).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(node = %node.id, "launch failed: {}", e);
                return RunOutcome::LaunchFailed;
            }
        };

        {
            let mut state = slot.state.lock();
            state.process_name = Some(handle.program.clone());
            state.handle = Some(handle.clone());
            state.timed_out = false;
        }

        if let Some(limit) = node.time_limit {
            let callback = deadline_callback(
                Arc::clone(slot),
                Arc::clone(&self.launcher),
                handle.clone(),
                node.id,
                limit,
            );
            match self.deadlines.schedule(limit, callback) {
                Ok(token) => slot.state.lock().deadline = Some(token),
                Err(e) => {
                    tracing::warn!(node = %node.id, "cannot arm deadline: {}", e);
                    self.launcher.terminate(&handle);
                    let _ = self.launcher.wait(&handle).await;
                    slot.state.lock().handle = None;
                    return RunOutcome::LaunchFailed;
                }
            }
        }

        let exit = self.launcher.wait(&handle).await;

        let (token, timed_out) = {
            let mut state = slot.state.lock();
            state.handle = None;
            (state.deadline.take(), std::mem::take(&mut state.timed_out))
        };
        if let Some(token) = token {
            self.deadlines.cancel(token);
        }

        classify(exit, timed_out)
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn deadline_callback(
    slot: Arc<ProcessSlot>,
    launcher: Arc<dyn ProcessLauncher>,
    expected: ProcessHandle,
    node: NodeId,
    limit: Duration,
) -> DeadlineCallback {
    Box::new(move || {
        let mut state = slot.state.lock();
        if state.handle.as_ref() != Some(&expected) {
            tracing::debug!(node = %node, process = expected.id, "stale deadline ignored");
            return;
        }
        state.timed_out = true;
        state.deadline = None;
        tracing::warn!(
            node = %node,
            process = expected.id,
            limit_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            "deadline expired, terminating"
        );
        // Still under the slot lock: the handle cannot change underneath us.
        launcher.terminate(&expected);
    })
}

fn classify(exit: Result<ProcessExit, LaunchError>, timed_out: bool) -> RunOutcome {
    match exit {
        Ok(ProcessExit::Exited(code)) => RunOutcome::Completed(code),
        Ok(ProcessExit::Terminated) if timed_out => RunOutcome::TimedOut,
        Ok(ProcessExit::Terminated) => RunOutcome::Completed(TERMINATED_EXIT_CODE),
        Err(e) => {
            tracing::warn!("wait failed: {}", e);
            RunOutcome::LaunchFailed
        }
    }
}

fn collect_test_cases(scenario: &Scenario) -> Vec<TestCaseReport> {
    scenario
        .depth_first()
        .into_iter()
        .filter(|&i| scenario.is_attached(i))
        .filter(|&i| {
            let node = scenario.node(i);
            node.is_reference() || !node.is_group()
        })
        .map(|index| {
            let node = scenario.node(index);
            let owner = scenario.node(scenario.resolve(index));
            let outcomes = if owner.is_group() {
                Vec::new()
            } else {
                owner.process.state.lock().outcomes.clone()
            };
            TestCaseReport {
                id: node.id,
                name: owner.name.clone(),
                exec: owner.exec.clone(),
                reference_to: node.reference.map(|_| owner.id),
                outcomes,
                status: group_status(scenario, index),
            }
        })
        .collect()
}
