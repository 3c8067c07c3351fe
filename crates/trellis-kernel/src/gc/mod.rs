//! Garbage Collector
//!
//! The scenario arena owns every node, so reclaiming memory is dropping the
//! arena. What teardown still has to do by hand is stop anything a node left
//! running: outstanding processes are terminated and pending deadlines are
//! canceled before the arena goes away.

use crate::deadline::DeadlineScheduler;
use crate::process::ProcessLauncher;
use crate::scenario::Scenario;
use crate::types::{NodeIndex, ScenarioId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub scenario: ScenarioId,
    /// Nodes released, attached or not
    pub released: usize,
    /// Processes still running at teardown
    pub terminated: usize,
}

/// Release a whole scenario in one pass
///
/// Every node is marked first, then visited depth-first (detached nodes
/// last). Reference nodes own no process state of their own, so an aliased
/// process is only ever terminated once, through its owner.
pub(crate) fn teardown(
    mut scenario: Scenario,
    launcher: &dyn ProcessLauncher,
    deadlines: &dyn DeadlineScheduler,
    kill_outstanding: bool,
) -> TeardownReport {
    let id = scenario.id();
    let order = scenario.depth_first();

    for &index in &order {
        scenario.node_mut(index).marked_for_deletion = true;
    }

    let terminated = release_outstanding(&scenario, &order, launcher, deadlines, kill_outstanding);

    let released = order.len();
    drop(scenario);

    tracing::info!(scenario = %id, released, terminated, "scenario deleted");
    TeardownReport {
        scenario: id,
        released,
        terminated,
    }
}

/// Cancel pending deadlines and drop outstanding process handles of `order`
///
/// With `kill` set each outstanding process is terminated through the
/// launcher. Returns the number of processes terminated.
pub(crate) fn release_outstanding(
    scenario: &Scenario,
    order: &[NodeIndex],
    launcher: &dyn ProcessLauncher,
    deadlines: &dyn DeadlineScheduler,
    kill: bool,
) -> usize {
    let mut terminated = 0;
    for &index in order {
        let node = scenario.node(index);
        if node.is_reference() || node.is_group() {
            continue;
        }
        let mut state = node.process.state.lock();
        if let Some(token) = state.deadline.take() {
            deadlines.cancel(token);
        }
        if let Some(handle) = state.handle.take() {
            if kill && launcher.terminate(&handle) {
                terminated += 1;
            }
            tracing::debug!(scenario = %scenario.id(), node = %node.id, process = handle.id, "outstanding process released");
        }
    }
    terminated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::TokioDeadlines;
    use crate::process::TokioLauncher;
    use crate::types::{NodeIndex, NodeRole};

    #[test]
    fn test_teardown_counts_detached_nodes() {
        let mut s = Scenario::new(Some("root"), true);
        let group = s.add_child(NodeIndex::ROOT, Some("g"), NodeRole::Group, true).unwrap();
        s.add_child(group, None, NodeRole::TestCase, true).unwrap();
        s.add_child(NodeIndex::ROOT, None, NodeRole::TestCase, true).unwrap();
        s.detach(group);
        let id = s.id();

        let report = teardown(s, &TokioLauncher::new(), &TokioDeadlines::new(), true);

        assert_eq!(
            report,
            TeardownReport {
                scenario: id,
                released: 4,
                terminated: 0,
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_teardown_kills_outstanding_process() {
        let launcher = TokioLauncher::new();
        let deadlines = TokioDeadlines::new();
        let mut s = Scenario::new(None, true);
        let leaf = s.add_child(NodeIndex::ROOT, None, NodeRole::TestCase, true).unwrap();

        let handle = launcher.start("sleep 30").await.unwrap();
        let token = deadlines
            .schedule(std::time::Duration::from_secs(60), Box::new(|| {}))
            .unwrap();
        {
            let mut state = s.node(leaf).process.state.lock();
            state.handle = Some(handle.clone());
            state.deadline = Some(token);
        }

        let report = teardown(s, &launcher, &deadlines, true);

        assert_eq!(report.terminated, 1);
        assert_eq!(deadlines.pending_count(), 0);
        assert_eq!(
            launcher.wait(&handle).await.unwrap(),
            crate::process::ProcessExit::Terminated
        );
    }
}
