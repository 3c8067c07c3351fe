use crate::deadline::DeadlineToken;
use crate::identity::NodeId;
use crate::process::ProcessHandle;
use crate::types::{NodeIndex, NodeRole, RunOutcome};
use std::sync::Arc;
use std::time::Duration;

/// One arena slot
///
/// `parent`, `root` and `reference` are back-links by index; only the arena
/// owns nodes.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) role: NodeRole,
    pub(crate) name: String,
    pub(crate) exec: String,
    pub(crate) blocking: bool,
    pub(crate) runs: u32,
    pub(crate) time_limit: Option<Duration>,
    pub(crate) marked_for_deletion: bool,
    pub(crate) parent: Option<NodeIndex>,
    pub(crate) root: NodeIndex,
    pub(crate) children: Vec<NodeIndex>,
    pub(crate) reference: Option<NodeIndex>,
    pub(crate) process: Arc<ProcessSlot>,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        role: NodeRole,
        name: Option<&str>,
        blocking: bool,
        parent: Option<NodeIndex>,
        root: NodeIndex,
    ) -> Self {
        Self {
            id,
            role,
            name: name.unwrap_or_default().to_string(),
            exec: String::new(),
            blocking,
            runs: 1,
            time_limit: None,
            marked_for_deletion: false,
            parent,
            root,
            children: Vec::new(),
            reference: None,
            process: Arc::new(ProcessSlot::default()),
        }
    }

    #[inline]
    pub(crate) fn is_group(&self) -> bool {
        self.role.is_group()
    }

    #[inline]
    pub(crate) fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    #[inline]
    pub(crate) fn is_pseudo_group(&self) -> bool {
        self.role == NodeRole::TestCase && self.runs > 1
    }
}

/// Process state of a test case leaf
///
/// `run_lock` is held for a whole run sequence so two paths reaching the
/// same leaf (its own position and a reference to it) never share the slot
/// concurrently. `state` is the short-lived lock also taken by deadline
/// callbacks.
#[derive(Debug, Default)]
pub(crate) struct ProcessSlot {
    pub(crate) run_lock: tokio::sync::Mutex<()>,
    pub(crate) state: parking_lot::Mutex<ProcessState>,
}

#[derive(Debug, Default)]
pub(crate) struct ProcessState {
    pub(crate) handle: Option<ProcessHandle>,
    pub(crate) deadline: Option<DeadlineToken>,
    pub(crate) timed_out: bool,
    pub(crate) process_name: Option<String>,
    pub(crate) outcomes: Vec<RunOutcome>,
}
