//! Error types for graph construction and evaluation.

use std::fmt::Display;

use thiserror::Error;

use crate::graph::NodeHandle;

/// Errors raised by a node's computation.
///
/// These never escape on their own; the scheduler wraps them in
/// [`GraphError::NodeExecution`] together with the failing node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputeError {
    /// An input the computation needs has never been set in the scope.
    #[error("missing required input '{0}'")]
    MissingInput(String),

    /// The computation asked for an argument it did not declare.
    #[error("'{0}' is not a declared parameter")]
    UnknownParameter(String),

    /// The computation returned the wrong number of results.
    #[error("expected {expected} output value(s), got {actual}")]
    OutputArity { expected: usize, actual: usize },

    /// Any other failure reported by the computation itself.
    #[error("{0}")]
    Failed(String),
}

impl ComputeError {
    /// Build a [`ComputeError::Failed`] from anything printable.
    pub fn msg(message: impl Display) -> Self {
        Self::Failed(message.to_string())
    }
}

/// Reasons a node declaration is rejected at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("computation has an empty name")]
    EmptyName,

    #[error("parameter names must be non-empty")]
    EmptyParameter,

    #[error("parameter '{0}' is declared more than once")]
    DuplicateParameter(String),

    #[error("an explicit output list must not be empty")]
    NoOutputs,

    #[error("output names must be non-empty")]
    EmptyOutput,

    #[error("output '{0}' is declared more than once")]
    DuplicateOutput(String),

    #[error("cannot remap '{0}': not a declared parameter")]
    RemapUnknownParameter(String),

    #[error("parameters '{first}' and '{second}' both read '{name}'")]
    RemapCollision {
        first: String,
        second: String,
        name: String,
    },
}

/// The crate-wide error type.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node could not be registered.
    #[error("registration of '{name}' failed: {source}")]
    Registration {
        name: String,
        #[source]
        source: RegistrationError,
    },

    /// The wiring contains a dependency cycle. The previous index is kept.
    #[error("dependency cycle between nodes {}", format_handles(.nodes))]
    Cycle { nodes: Vec<NodeHandle> },

    /// A live node failed while pumping.
    #[error("node {node} ('{name}') failed: {source}")]
    NodeExecution {
        node: NodeHandle,
        name: String,
        #[source]
        source: ComputeError,
    },

    /// The handle does not refer to a registered node.
    #[error("unknown node {0}")]
    UnknownNode(NodeHandle),

    /// A module in a module list could not be created or updated.
    #[error("module error: {0}")]
    Module(String),

    /// A module-list snapshot could not be encoded or decoded.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GraphError {
    /// The node that failed, for execution errors.
    pub fn failed_node(&self) -> Option<NodeHandle> {
        match self {
            Self::NodeExecution { node, .. } => Some(*node),
            _ => None,
        }
    }

    /// The underlying computation error, for execution errors.
    pub fn compute_error(&self) -> Option<&ComputeError> {
        match self {
            Self::NodeExecution { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn format_handles(nodes: &[NodeHandle]) -> String {
    nodes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Snapshot(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for GraphError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Snapshot(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for GraphError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Snapshot(err.to_string())
    }
}

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
