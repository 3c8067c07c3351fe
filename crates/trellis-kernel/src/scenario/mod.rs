//! Scenario Tree
//!
//! A scenario is an arena of nodes addressed by [`NodeIndex`]. The arena is
//! also the scenario-wide registry of every node ever allocated: nothing is
//! removed from it until the whole scenario is dropped, so back-links by
//! index can never dangle.
//!
//! Index 0 is always the scenario root.

pub(crate) mod node;

use crate::error::ScenarioError;
use crate::identity::{IdAllocator, NodeId};
use crate::types::{NodeIndex, NodeRole, Phase, ScenarioId};
use node::Node;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct Scenario {
    id: ScenarioId,
    nodes: Vec<Node>,
    by_id: HashMap<NodeId, NodeIndex>,
    ids: IdAllocator,
    phase: Phase,
    default_time_limit: Option<Duration>,
    max_nodes: u32,
}

impl Scenario {
    pub(crate) fn new(name: Option<&str>, blocking: bool) -> Self {
        let mut ids = IdAllocator::new();
        let root_id = ids.assign(name);
        let root = Node::new(
            root_id,
            NodeRole::Scenario,
            name,
            blocking,
            None,
            NodeIndex::ROOT,
        );

        let mut by_id = HashMap::new();
        by_id.insert(root_id, NodeIndex::ROOT);

        Self {
            id: ScenarioId::new(),
            nodes: vec![root],
            by_id,
            ids,
            phase: Phase::Building,
            default_time_limit: None,
            max_nodes: u32::MAX,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_max_nodes(mut self, max: u32) -> Self {
        self.max_nodes = max;
        self
    }

    /// Time limit given to every test case created afterwards
    pub(crate) fn with_default_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.default_time_limit = limit.filter(|d| !d.is_zero());
        self
    }

    #[inline]
    pub(crate) fn id(&self) -> ScenarioId {
        self.id
    }

    #[inline]
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Number of nodes ever allocated
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub(crate) fn contains(&self, index: NodeIndex) -> bool {
        index.slot() < self.nodes.len()
    }

    /// Panics on an index from another scenario; callers validate handles first.
    #[inline]
    pub(crate) fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index.slot()]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index.slot()]
    }

    pub(crate) fn indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        (0..self.nodes.len()).filter_map(|i| u32::try_from(i).ok().map(NodeIndex))
    }

    /// Registry lookup by identifier
    pub(crate) fn lookup(&self, id: NodeId) -> Option<NodeIndex> {
        self.by_id.get(&id).copied()
    }

    pub(crate) fn ensure_building(&self) -> Result<(), ScenarioError> {
        if self.phase == Phase::Building {
            Ok(())
        } else {
            Err(ScenarioError::IllegalBuildMutation(self.id))
        }
    }

    /// Allocate a child under `parent` and append it to the parent's children
    pub(crate) fn add_child(
        &mut self,
        parent: NodeIndex,
        name: Option<&str>,
        role: NodeRole,
        blocking: bool,
    ) -> Result<NodeIndex, ScenarioError> {
        self.ensure_building()?;

        let parent_node = self.node(parent);
        if !parent_node.is_group() || parent_node.is_reference() {
            return Err(ScenarioError::InvalidParent(parent_node.id));
        }

        if let Some(name) = name {
            let id = NodeId::from_name(name);
            if self.by_id.contains_key(&id) {
                return Err(ScenarioError::DuplicateIdentifier(id));
            }
        }
        let index = u32::try_from(self.nodes.len())
            .ok()
            .filter(|&slot| slot < self.max_nodes)
            .map(NodeIndex)
            .ok_or(ScenarioError::ScenarioFull(self.id))?;
        let id = self.ids.assign(name);

        let mut node = Node::new(id, role, name, blocking, Some(parent), NodeIndex::ROOT);
        if role == NodeRole::TestCase {
            node.time_limit = self.default_time_limit;
        }

        self.nodes.push(node);
        self.by_id.insert(id, index);
        self.node_mut(parent).children.push(index);

        tracing::debug!(scenario = %self.id, node = %id, ?role, "node added");
        Ok(index)
    }

    /// Follow reference links to the node that actually owns state
    pub(crate) fn resolve(&self, mut index: NodeIndex) -> NodeIndex {
        // Reference chains are acyclic by construction; the bound guards the
        // loop if that invariant is ever broken.
        for _ in 0..self.nodes.len() {
            match self.node(index).reference {
                Some(target) => index = target,
                None => break,
            }
        }
        index
    }

    /// True if the parent chain reaches the root through `children` lists
    pub(crate) fn is_attached(&self, mut index: NodeIndex) -> bool {
        for _ in 0..self.nodes.len() {
            if index == NodeIndex::ROOT {
                return true;
            }
            let Some(parent) = self.node(index).parent else {
                return false;
            };
            if !self.node(parent).children.contains(&index) {
                return false;
            }
            index = parent;
        }
        false
    }

    /// Remove `index` from its parent's children; the node stays in the arena
    pub(crate) fn detach(&mut self, index: NodeIndex) {
        if let Some(parent) = self.node(index).parent {
            self.node_mut(parent).children.retain(|&c| c != index);
        }
    }

    /// Attached nodes depth-first from the root, then every detached node
    pub(crate) fn depth_first(&self) -> Vec<NodeIndex> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![NodeIndex::ROOT];

        while let Some(index) = stack.pop() {
            if std::mem::replace(&mut seen[index.slot()], true) {
                continue;
            }
            order.push(index);
            // Reference nodes own no children, so aliases are never walked twice.
            stack.extend(self.node(index).children.iter().rev().copied());
        }

        order.extend(self.indices().filter(|i| !seen[i.slot()]));
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Scenario {
        Scenario::new(Some("root"), true)
    }

    #[test]
    fn test_root_is_its_own_scenario_root() {
        let s = scenario();
        let root = s.node(NodeIndex::ROOT);
        assert_eq!(root.role, NodeRole::Scenario);
        assert_eq!(root.root, NodeIndex::ROOT);
        assert!(root.parent.is_none());
        assert_eq!(s.lookup(NodeId::from_name("root")), Some(NodeIndex::ROOT));
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let mut s = scenario();
        let a = s.add_child(NodeIndex::ROOT, Some("a"), NodeRole::TestCase, true).unwrap();
        let b = s.add_child(NodeIndex::ROOT, None, NodeRole::Group, false).unwrap();
        let c = s.add_child(NodeIndex::ROOT, Some("c"), NodeRole::TestCase, true).unwrap();

        assert_eq!(s.node(NodeIndex::ROOT).children, vec![a, b, c]);
        assert_eq!(s.node(b).parent, Some(NodeIndex::ROOT));
        assert!(s.node(b).id.is_auto());
    }

    #[test]
    fn test_test_case_cannot_be_a_parent() {
        let mut s = scenario();
        let leaf = s.add_child(NodeIndex::ROOT, Some("leaf"), NodeRole::TestCase, true).unwrap();

        let result = s.add_child(leaf, None, NodeRole::Group, true);
        assert_eq!(result, Err(ScenarioError::InvalidParent(NodeId::from_name("leaf"))));
        assert!(s.node(leaf).children.is_empty());
    }

    #[test]
    fn test_duplicate_name_leaves_tree_unchanged() {
        let mut s = scenario();
        s.add_child(NodeIndex::ROOT, Some("dup"), NodeRole::TestCase, true).unwrap();
        let before = s.len();

        let result = s.add_child(NodeIndex::ROOT, Some("dup"), NodeRole::Group, true);
        assert_eq!(result, Err(ScenarioError::DuplicateIdentifier(NodeId::from_name("dup"))));
        assert_eq!(s.len(), before);
        assert_eq!(s.node(NodeIndex::ROOT).children.len(), 1);
    }

    #[test]
    fn test_root_name_is_registered() {
        let mut s = scenario();
        assert!(matches!(
            s.add_child(NodeIndex::ROOT, Some("root"), NodeRole::Group, true),
            Err(ScenarioError::DuplicateIdentifier(_))
        ));
    }

    #[test]
    fn test_full_arena_rejects_new_nodes() {
        let mut s = scenario().with_max_nodes(2);
        s.add_child(NodeIndex::ROOT, Some("a"), NodeRole::TestCase, true).unwrap();

        assert_eq!(
            s.add_child(NodeIndex::ROOT, Some("b"), NodeRole::TestCase, true),
            Err(ScenarioError::ScenarioFull(s.id()))
        );
        assert_eq!(s.len(), 2);
        assert!(s.lookup(NodeId::from_name("b")).is_none());
        assert_eq!(s.indices().count(), 2);
    }

    #[test]
    fn test_mutation_after_execution_is_rejected() {
        let mut s = scenario();
        s.set_phase(Phase::Executing);
        assert_eq!(
            s.add_child(NodeIndex::ROOT, None, NodeRole::TestCase, true),
            Err(ScenarioError::IllegalBuildMutation(s.id()))
        );
    }

    #[test]
    fn test_default_time_limit_applies_to_test_cases() {
        let mut s = scenario().with_default_time_limit(Some(Duration::from_secs(5)));
        let group = s.add_child(NodeIndex::ROOT, None, NodeRole::Group, true).unwrap();
        let leaf = s.add_child(group, None, NodeRole::TestCase, true).unwrap();

        assert_eq!(s.node(group).time_limit, None);
        assert_eq!(s.node(leaf).time_limit, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_detached_nodes_stay_registered() {
        let mut s = scenario();
        let group = s.add_child(NodeIndex::ROOT, Some("g"), NodeRole::Group, true).unwrap();
        let leaf = s.add_child(group, Some("t"), NodeRole::TestCase, true).unwrap();

        s.detach(group);

        assert!(!s.is_attached(group));
        assert!(!s.is_attached(leaf));
        assert_eq!(s.lookup(NodeId::from_name("t")), Some(leaf));
        assert_eq!(s.depth_first(), vec![NodeIndex::ROOT, group, leaf]);
    }

    #[test]
    fn test_depth_first_visits_children_in_order() {
        let mut s = scenario();
        let g = s.add_child(NodeIndex::ROOT, None, NodeRole::Group, true).unwrap();
        let a = s.add_child(g, None, NodeRole::TestCase, true).unwrap();
        let b = s.add_child(NodeIndex::ROOT, None, NodeRole::TestCase, true).unwrap();
        let c = s.add_child(g, None, NodeRole::TestCase, true).unwrap();

        assert_eq!(s.depth_first(), vec![NodeIndex::ROOT, g, a, c, b]);
    }
}
