//! Error types for the Trellis kernel
//!
//! Construction and validation failures are synchronous `Err` values.
//! Execution-time failures (launch failure, timeout) are never errors: they
//! are recorded as [`RunOutcome`](crate::types::RunOutcome)s and surface only
//! through status aggregation.

use crate::identity::NodeId;
use crate::types::ScenarioId;
use std::path::PathBuf;

/// Tree construction, reference and teardown errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScenarioError {
    /// A named node hashed to an ID already present in the scenario
    #[error("duplicate identifier {0}")]
    DuplicateIdentifier(NodeId),

    /// Children were added to a node that cannot own them
    #[error("node {0} cannot own children")]
    InvalidParent(NodeId),

    /// Reference target is not registered in this scenario
    #[error("unknown reference target {0}")]
    UnknownReference(NodeId),

    /// Reference would make the execution graph cyclic
    #[error("reference from {node} to {target} would create a cycle")]
    ReferenceCycle {
        /// The node being converted into a reference
        node: NodeId,
        /// The requested target
        target: NodeId,
    },

    /// Only fresh, childless, non-root nodes can become references
    #[error("node {0} cannot become a reference")]
    ReferenceNotFresh(NodeId),

    /// Nodes are only released by whole-scenario teardown
    #[error("node {0} cannot be deleted directly; delete its scenario")]
    IllegalDirectDelete(NodeId),

    /// The tree was mutated after execution began
    #[error("scenario {0} is no longer in its build phase")]
    IllegalBuildMutation(ScenarioId),

    /// The harness never created this scenario
    #[error("unknown scenario {0}")]
    UnknownScenario(ScenarioId),

    /// The scenario was torn down
    #[error("scenario {0} has been deleted")]
    ScenarioDeleted(ScenarioId),

    /// The arena cannot address another node
    #[error("scenario {0} cannot hold more nodes")]
    ScenarioFull(ScenarioId),

    /// Handle index outside the scenario arena
    #[error("unknown node handle in scenario {0}")]
    UnknownNode(ScenarioId),
}

impl ScenarioError {
    /// Check if the error is caller misuse rather than a rejected tree shape
    #[inline]
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::IllegalDirectDelete(_)
                | Self::IllegalBuildMutation(_)
                | Self::UnknownScenario(_)
                | Self::ScenarioDeleted(_)
                | Self::UnknownNode(_)
        )
    }
}

/// Process launcher errors
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Command line is empty or cannot be tokenised
    #[error("invalid command line {command:?}: {reason}")]
    InvalidCommand {
        /// The offending command line
        command: String,
        /// Why it was rejected
        reason: String,
    },

    /// The OS refused to start the process
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Too many live processes
    #[error("process limit reached (max: {0})")]
    Exhausted(usize),

    /// The handle does not belong to a process this launcher is tracking
    #[error("unknown process {0}")]
    UnknownProcess(u64),
}

/// Deadline scheduler errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeadlineError {
    /// Too many pending deadlines
    #[error("deadline limit reached (max: {0})")]
    Exhausted(usize),
}

/// Configuration and scenario document errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Document could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or shape error
    #[error("invalid TOML document: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON syntax or shape error
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    /// Unsupported file extension
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// Building the tree from the document failed
    #[error("scenario construction failed: {0}")]
    Scenario(#[from] ScenarioError),
}
