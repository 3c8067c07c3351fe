use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Exit code recorded when a process was terminated without its deadline firing
pub const TERMINATED_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioId(pub Uuid);

impl ScenarioId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScenarioId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable position of a node inside its scenario arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(pub(crate) u32);

impl NodeIndex {
    pub(crate) const ROOT: NodeIndex = NodeIndex(0);

    #[inline]
    pub(crate) fn slot(self) -> usize {
        self.0 as usize
    }
}

/// Opaque, copyable handle to a node owned by a scenario
///
/// Handles never own the node; the scenario does. Using a handle after its
/// scenario was deleted fails instead of dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    pub(crate) scenario: ScenarioId,
    pub(crate) index: NodeIndex,
}

impl NodeHandle {
    /// Scenario that owns this node
    pub fn scenario(&self) -> ScenarioId {
        self.scenario
    }

    /// True for the handle returned by `create_scenario`
    pub fn is_root(&self) -> bool {
        self.index == NodeIndex::ROOT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Scenario,
    Group,
    TestCase,
}

impl NodeRole {
    pub fn is_group(self) -> bool {
        matches!(self, NodeRole::Scenario | NodeRole::Group)
    }
}

/// Build phase of a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Building,
    Executing,
    Executed,
}

/// Result of one run of a test case process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed(i32),
    TimedOut,
    LaunchFailed,
}

impl RunOutcome {
    /// Only a zero exit code passes
    pub fn is_pass(self) -> bool {
        matches!(self, RunOutcome::Completed(0))
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed(code) => write!(f, "completed({code})"),
            RunOutcome::TimedOut => write!(f, "timed out"),
            RunOutcome::LaunchFailed => write!(f, "launch failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_zero_exit_passes() {
        assert!(RunOutcome::Completed(0).is_pass());
        assert!(!RunOutcome::Completed(1).is_pass());
        assert!(!RunOutcome::Completed(TERMINATED_EXIT_CODE).is_pass());
        assert!(!RunOutcome::TimedOut.is_pass());
        assert!(!RunOutcome::LaunchFailed.is_pass());
    }

    #[test]
    fn test_group_roles() {
        assert!(NodeRole::Scenario.is_group());
        assert!(NodeRole::Group.is_group());
        assert!(!NodeRole::TestCase.is_group());
    }
}
