//! Reference Resolver
//!
//! A reference node aliases another node of the same scenario: executing it
//! executes the target, and every query on it answers for the target.
//!
//! Executing a node walks two kinds of edges: group → child and
//! reference → target. Those edges must stay acyclic or execution would
//! recurse forever, so a reference from `node` to `target` is rejected
//! whenever `node` is already reachable from `target`. That covers the node
//! itself, every ancestor of it, and indirect loops through other references.

use crate::error::ScenarioError;
use crate::identity::NodeId;
use crate::scenario::Scenario;
use crate::types::NodeIndex;
use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;

/// Convert a fresh node into a reference to `target_id`
///
/// On error the node is left untouched.
pub(crate) fn make_reference(
    scenario: &mut Scenario,
    index: NodeIndex,
    target_id: NodeId,
) -> Result<NodeIndex, ScenarioError> {
    scenario.ensure_building()?;

    let node = scenario.node(index);
    if index == NodeIndex::ROOT || node.is_reference() || !node.children.is_empty() {
        return Err(ScenarioError::ReferenceNotFresh(node.id));
    }
    let node_id = node.id;

    let target = scenario
        .lookup(target_id)
        .ok_or(ScenarioError::UnknownReference(target_id))?;

    if reaches(scenario, target, index) {
        return Err(ScenarioError::ReferenceCycle {
            node: node_id,
            target: target_id,
        });
    }

    scenario.node_mut(index).reference = Some(target);
    tracing::debug!(scenario = %scenario.id(), node = %node_id, target = %target_id, "reference created");
    Ok(target)
}

/// True if executing `from` could execute `to`
fn reaches(scenario: &Scenario, from: NodeIndex, to: NodeIndex) -> bool {
    if from == to {
        return true;
    }
    let graph = execution_graph(scenario);
    has_path_connecting(&graph, from, to, None)
}

fn execution_graph(scenario: &Scenario) -> DiGraphMap<NodeIndex, ()> {
    let mut graph = DiGraphMap::new();
    for index in scenario.indices() {
        graph.add_node(index);
        let node = scenario.node(index);
        for &child in &node.children {
            graph.add_edge(index, child, ());
        }
        if let Some(target) = node.reference {
            graph.add_edge(index, target, ());
        }
    }
    graph
}

/// Lazy validity check run before execution
///
/// A reference stays valid while its target is still part of the tree: not
/// marked for deletion and reachable from the root through `children`.
pub(crate) fn is_reference_valid(scenario: &Scenario, index: NodeIndex) -> bool {
    let Some(target) = scenario.node(index).reference else {
        return true;
    };
    scenario.contains(target)
        && !scenario.node(target).marked_for_deletion
        && scenario.is_attached(target)
}

/// Remove every attached reference whose target is no longer valid
///
/// Excising one reference can invalidate references that point at it, so
/// this repeats until nothing changes. Returns the excised node IDs.
pub(crate) fn excise_invalid_references(scenario: &mut Scenario) -> Vec<NodeId> {
    let mut excised = Vec::new();
    loop {
        let invalid: Vec<NodeIndex> = scenario
            .indices()
            .filter(|&i| scenario.node(i).is_reference())
            .filter(|&i| scenario.is_attached(i) && !is_reference_valid(scenario, i))
            .collect();
        if invalid.is_empty() {
            break;
        }
        for index in invalid {
            let id = scenario.node(index).id;
            tracing::warn!(scenario = %scenario.id(), node = %id, "excising reference with invalid target");
            scenario.detach(index);
            excised.push(id);
        }
    }
    excised
}
