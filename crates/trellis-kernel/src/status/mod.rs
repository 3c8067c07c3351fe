//! Status Aggregator
//!
//! Status is folded bottom-up with AND semantics. `Unresolved` dominates:
//! a group cannot report until every child has resolved, even if one child
//! has already failed.

use crate::scenario::Scenario;
use crate::types::{NodeIndex, RunOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Unresolved,
    Pass,
    Fail,
}

impl Status {
    /// AND of two statuses
    #[must_use]
    pub fn and(self, other: Status) -> Status {
        match (self, other) {
            (Status::Unresolved, _) | (_, Status::Unresolved) => Status::Unresolved,
            (Status::Fail, _) | (_, Status::Fail) => Status::Fail,
            (Status::Pass, Status::Pass) => Status::Pass,
        }
    }

    pub fn is_pass(self) -> bool {
        self == Status::Pass
    }

    /// Fold an iterator of statuses; empty input passes
    pub fn all(statuses: impl IntoIterator<Item = Status>) -> Status {
        statuses.into_iter().fold(Status::Pass, Status::and)
    }
}

impl From<RunOutcome> for Status {
    fn from(outcome: RunOutcome) -> Self {
        if outcome.is_pass() {
            Status::Pass
        } else {
            Status::Fail
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Unresolved => write!(f, "UNRESOLVED"),
            Status::Pass => write!(f, "PASS"),
            Status::Fail => write!(f, "FAIL"),
        }
    }
}

/// Status of a run sequence that expects `expected_runs` outcomes
pub fn runs_status(outcomes: &[RunOutcome], expected_runs: usize) -> Status {
    if outcomes.len() < expected_runs.max(1) {
        return Status::Unresolved;
    }
    Status::all(outcomes.iter().copied().map(Status::from))
}

/// Status of any node; references answer for their target
pub(crate) fn group_status(scenario: &Scenario, index: NodeIndex) -> Status {
    let index = scenario.resolve(index);
    let node = scenario.node(index);
    if node.is_group() {
        Status::all(node.children.iter().map(|&c| group_status(scenario, c)))
    } else {
        pseudo_group_status(scenario, index)
    }
}

/// Status of a test case across all of its runs
///
/// For a single-run test case this is just the status of that run; groups
/// fall back to [`group_status`] so callers can treat both alike.
pub(crate) fn pseudo_group_status(scenario: &Scenario, index: NodeIndex) -> Status {
    let index = scenario.resolve(index);
    let node = scenario.node(index);
    if node.is_group() {
        return group_status(scenario, index);
    }
    let state = node.process.state.lock();
    runs_status(&state.outcomes, node.runs as usize)
}
