use crate::config::HarnessConfig;
use crate::deadline::TokioDeadlines;
use crate::error::ScenarioError;
use crate::executor::{RunReport, Supervisor};
use crate::gc::{teardown, TeardownReport};
use crate::identity::NodeId;
use crate::process::TokioLauncher;
use crate::reference;
use crate::scenario::node::Node;
use crate::scenario::Scenario;
use crate::status::{self, Status};
use crate::types::{NodeHandle, NodeIndex, NodeRole, RunOutcome, ScenarioId};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use trellis_profile::ProfileContext;

/// Owner of every scenario tree and entry point of the public API
///
/// Nodes are addressed through [`NodeHandle`]s. A handle never owns its node,
/// and every call validates it: handles of deleted scenarios fail with
/// [`ScenarioError::ScenarioDeleted`] instead of dangling.
pub struct Harness {
    config: HarnessConfig,
    scenarios: HashMap<ScenarioId, Scenario>,
    retired: HashSet<ScenarioId>,
    supervisor: Supervisor,
}

impl Harness {
    /// Create a harness with default configuration
    pub fn new() -> Self {
        Self::with_config(HarnessConfig::default())
    }

    /// Create a harness backed by real processes, bounded per `config`
    pub fn with_config(config: HarnessConfig) -> Self {
        let mut launcher = TokioLauncher::new();
        if let Some(max) = config.max_live_processes {
            launcher = launcher.with_max_live(max);
        }
        let mut deadlines = TokioDeadlines::new();
        if let Some(max) = config.max_pending_deadlines {
            deadlines = deadlines.with_max_pending(max);
        }
        let supervisor = Supervisor::with_collaborators(Arc::new(launcher), Arc::new(deadlines));
        Self::with_supervisor(config, supervisor)
    }

    /// Create a harness around a custom supervisor
    pub fn with_supervisor(config: HarnessConfig, supervisor: Supervisor) -> Self {
        Self {
            config,
            scenarios: HashMap::new(),
            retired: HashSet::new(),
            supervisor,
        }
    }

    /// Record every run of every scenario into `profile`
    #[must_use]
    pub fn with_profile(mut self, profile: Arc<ProfileContext>) -> Self {
        self.supervisor = self.supervisor.with_profile(profile);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Live scenarios
    pub fn scenario_count(&self) -> usize {
        self.scenarios.len()
    }

    fn scenario(&self, handle: NodeHandle) -> Result<&Scenario, ScenarioError> {
        match self.scenarios.get(&handle.scenario) {
            Some(s) if s.contains(handle.index) => Ok(s),
            Some(_) => Err(ScenarioError::UnknownNode(handle.scenario)),
            None => Err(self.missing(handle.scenario)),
        }
    }

    fn scenario_mut(&mut self, handle: NodeHandle) -> Result<&mut Scenario, ScenarioError> {
        let missing = self.missing(handle.scenario);
        match self.scenarios.get_mut(&handle.scenario) {
            Some(s) if s.contains(handle.index) => Ok(s),
            Some(_) => Err(ScenarioError::UnknownNode(handle.scenario)),
            None => Err(missing),
        }
    }

    fn missing(&self, id: ScenarioId) -> ScenarioError {
        if self.retired.contains(&id) {
            ScenarioError::ScenarioDeleted(id)
        } else {
            ScenarioError::UnknownScenario(id)
        }
    }

    /// Read the node that owns state for `handle`
    fn read<T>(&self, handle: NodeHandle, f: impl FnOnce(&Node) -> T) -> Result<T, ScenarioError> {
        let scenario = self.scenario(handle)?;
        Ok(f(scenario.node(scenario.resolve(handle.index))))
    }

    /// Mutate the node that owns state for `handle`; build phase only
    fn edit(&mut self, handle: NodeHandle, f: impl FnOnce(&mut Node)) -> Result<(), ScenarioError> {
        let scenario = self.scenario_mut(handle)?;
        scenario.ensure_building()?;
        let index = scenario.resolve(handle.index);
        f(scenario.node_mut(index));
        Ok(())
    }

    // ===== Construction =====

    /// Create a new scenario and return its root
    pub fn create_scenario(&mut self, name: Option<&str>, blocking: bool) -> NodeHandle {
        let scenario = Scenario::new(name, blocking)
            .with_default_time_limit(self.config.default_time_limit());
        let id = scenario.id();
        self.scenarios.insert(id, scenario);

        tracing::info!(scenario = %id, name = name.unwrap_or_default(), "scenario created");
        NodeHandle {
            scenario: id,
            index: NodeIndex::ROOT,
        }
    }

    pub fn add_group(
        &mut self,
        parent: NodeHandle,
        name: Option<&str>,
        blocking: bool,
    ) -> Result<NodeHandle, ScenarioError> {
        self.add_child(parent, name, NodeRole::Group, blocking)
    }

    pub fn add_test_case(
        &mut self,
        parent: NodeHandle,
        name: Option<&str>,
        blocking: bool,
    ) -> Result<NodeHandle, ScenarioError> {
        self.add_child(parent, name, NodeRole::TestCase, blocking)
    }

    fn add_child(
        &mut self,
        parent: NodeHandle,
        name: Option<&str>,
        role: NodeRole,
        blocking: bool,
    ) -> Result<NodeHandle, ScenarioError> {
        let index = self
            .scenario_mut(parent)?
            .add_child(parent.index, name, role, blocking)?;
        Ok(NodeHandle {
            scenario: parent.scenario,
            index,
        })
    }

    /// Turn a freshly created node into a reference to `target` and return
    /// the target's handle
    pub fn make_reference(
        &mut self,
        node: NodeHandle,
        target: NodeId,
    ) -> Result<NodeHandle, ScenarioError> {
        let scenario = self.scenario_mut(node)?;
        let index = reference::make_reference(scenario, node.index, target)?;
        Ok(NodeHandle {
            scenario: node.scenario,
            index,
        })
    }

    // ===== Teardown =====

    /// Release a scenario and every node in it
    ///
    /// Only the root handle is accepted.
    pub fn delete_scenario(&mut self, root: NodeHandle) -> Result<TeardownReport, ScenarioError> {
        let scenario = self.scenario(root)?;
        if !root.is_root() {
            return Err(ScenarioError::IllegalDirectDelete(scenario.node(root.index).id));
        }

        let scenario = self
            .scenarios
            .remove(&root.scenario)
            .ok_or(ScenarioError::UnknownScenario(root.scenario))?;
        self.retired.insert(root.scenario);

        Ok(teardown(
            scenario,
            self.supervisor.launcher(),
            self.supervisor.deadlines(),
            self.config.kill_on_teardown,
        ))
    }

    /// Individual nodes are never released on their own
    pub fn delete_node(&mut self, node: NodeHandle) -> Result<(), ScenarioError> {
        let id = self.scenario(node)?.node(node.index).id;
        tracing::warn!(scenario = %node.scenario, node = %id, "direct node deletion rejected");
        Err(ScenarioError::IllegalDirectDelete(id))
    }

    // ===== Execution =====

    /// Execute the scenario that owns `node`, starting from its root
    pub async fn execute(&mut self, node: NodeHandle) -> Result<RunReport, ScenarioError> {
        let missing = self.missing(node.scenario);
        let scenario = match self.scenarios.get_mut(&node.scenario) {
            Some(s) if s.contains(node.index) => s,
            Some(_) => return Err(ScenarioError::UnknownNode(node.scenario)),
            None => return Err(missing),
        };
        Ok(self.supervisor.execute(scenario).await)
    }

    // ===== Accessors =====

    pub fn test_case_name(&self, node: NodeHandle) -> Result<String, ScenarioError> {
        self.read(node, |n| n.name.clone())
    }

    pub fn set_test_case_name(&mut self, node: NodeHandle, name: &str) -> Result<(), ScenarioError> {
        self.edit(node, |n| n.name = name.to_string())
    }

    pub fn test_case_exec(&self, node: NodeHandle) -> Result<String, ScenarioError> {
        self.read(node, |n| n.exec.clone())
    }

    pub fn set_test_case_exec(&mut self, node: NodeHandle, exec: &str) -> Result<(), ScenarioError> {
        self.edit(node, |n| n.exec = exec.to_string())
    }

    /// `None` means unlimited
    pub fn max_time_limit(&self, node: NodeHandle) -> Result<Option<Duration>, ScenarioError> {
        self.read(node, |n| n.time_limit)
    }

    /// A zero duration clears the limit
    pub fn set_max_time_limit(
        &mut self,
        node: NodeHandle,
        limit: Duration,
    ) -> Result<(), ScenarioError> {
        self.edit(node, |n| n.time_limit = Some(limit).filter(|d| !d.is_zero()))
    }

    pub fn number_of_runs(&self, node: NodeHandle) -> Result<u32, ScenarioError> {
        self.read(node, |n| n.runs)
    }

    /// More than one run makes a test case a pseudo-group; 0 is treated as 1
    pub fn set_number_of_runs(&mut self, node: NodeHandle, runs: u32) -> Result<(), ScenarioError> {
        self.edit(node, |n| n.runs = runs.max(1))
    }

    pub fn block_status(&self, node: NodeHandle) -> Result<bool, ScenarioError> {
        self.read(node, |n| n.blocking)
    }

    pub fn set_block_status(&mut self, node: NodeHandle, blocking: bool) -> Result<(), ScenarioError> {
        self.edit(node, |n| n.blocking = blocking)
    }

    pub fn is_pseudo_group(&self, node: NodeHandle) -> Result<bool, ScenarioError> {
        self.read(node, Node::is_pseudo_group)
    }

    pub fn role(&self, node: NodeHandle) -> Result<NodeRole, ScenarioError> {
        self.read(node, |n| n.role)
    }

    /// Identifier of the node itself, not of a reference target
    pub fn node_id(&self, node: NodeHandle) -> Result<NodeId, ScenarioError> {
        Ok(self.scenario(node)?.node(node.index).id)
    }

    /// Program name of the last process started for this test case
    pub fn process_name(&self, node: NodeHandle) -> Result<Option<String>, ScenarioError> {
        self.read(node, |n| n.process.state.lock().process_name.clone())
    }

    /// Outcomes recorded by the latest execution pass
    pub fn outcomes(&self, node: NodeHandle) -> Result<Vec<RunOutcome>, ScenarioError> {
        self.read(node, |n| n.process.state.lock().outcomes.clone())
    }

    // ===== Queries =====

    pub fn group_status(&self, node: NodeHandle) -> Result<Status, ScenarioError> {
        let scenario = self.scenario(node)?;
        Ok(status::group_status(scenario, node.index))
    }

    pub fn pseudo_group_status(&self, node: NodeHandle) -> Result<Status, ScenarioError> {
        let scenario = self.scenario(node)?;
        Ok(status::pseudo_group_status(scenario, node.index))
    }

    /// True if the node is a reference
    pub fn refer_status(&self, node: NodeHandle) -> Result<bool, ScenarioError> {
        Ok(self.scenario(node)?.node(node.index).is_reference())
    }

    /// Direct target of a reference node
    pub fn reference_target(&self, node: NodeHandle) -> Result<Option<NodeHandle>, ScenarioError> {
        let target = self.scenario(node)?.node(node.index).reference;
        Ok(target.map(|index| NodeHandle {
            scenario: node.scenario,
            index,
        }))
    }

    /// Containing group; `None` for the scenario root
    pub fn parent_group(&self, node: NodeHandle) -> Result<Option<NodeHandle>, ScenarioError> {
        let parent = self.scenario(node)?.node(node.index).parent;
        Ok(parent.map(|index| NodeHandle {
            scenario: node.scenario,
            index,
        }))
    }

    pub fn scenario_root(&self, node: NodeHandle) -> Result<NodeHandle, ScenarioError> {
        let root = self.scenario(node)?.node(node.index).root;
        Ok(NodeHandle {
            scenario: node.scenario,
            index: root,
        })
    }

    /// Ordered children; a reference lists its target's children
    pub fn list_of_tci(&self, node: NodeHandle) -> Result<Vec<NodeHandle>, ScenarioError> {
        let scenario = self.scenario(node)?;
        let owner = scenario.node(scenario.resolve(node.index));
        Ok(owner
            .children
            .iter()
            .map(|&index| NodeHandle {
                scenario: node.scenario,
                index,
            })
            .collect())
    }

    /// Scenario-wide lookup by identifier
    pub fn find_by_id(
        &self,
        node: NodeHandle,
        id: NodeId,
    ) -> Result<Option<NodeHandle>, ScenarioError> {
        let scenario = self.scenario(node)?;
        Ok(scenario.lookup(id).map(|index| NodeHandle {
            scenario: node.scenario,
            index,
        }))
    }

    /// Indented outline of the attached tree
    pub fn describe(&self, root: NodeHandle) -> Result<String, ScenarioError> {
        let scenario = self.scenario(root)?;
        let mut out = String::new();
        describe_node(scenario, root.index, 0, &mut out);
        Ok(out)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

fn describe_node(scenario: &Scenario, index: NodeIndex, depth: usize, out: &mut String) {
    let node = scenario.node(index);
    let label = if node.name.is_empty() { node.id.to_string() } else { node.name.clone() };
    let indent = "  ".repeat(depth);

    let line = if let Some(target) = node.reference {
        format!("{indent}{label} -> {}", scenario.node(target).id)
    } else if node.is_group() {
        let mode = if node.blocking { "blocking" } else { "concurrent" };
        format!("{indent}{label} [{mode}]")
    } else {
        let mut line = format!("{indent}{label}: {}", node.exec);
        if node.runs > 1 {
            let _ = write!(line, " x{}", node.runs);
        }
        if let Some(limit) = node.time_limit {
            let _ = write!(line, " (limit {}ms)", limit.as_millis());
        }
        line
    };
    out.push_str(&line);
    out.push('\n');

    for &child in &node.children {
        describe_node(scenario, child, depth + 1, out);
    }
}
