//! Graph-related error types.

use thiserror::Error;

/// Errors that can occur while building, compiling or running a network graph.
///
/// Configuration and structural errors are raised by `compile` and
/// `initialize`, before any buffer is allocated. Resource errors come from
/// the tensor manager and are propagated unchanged.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph has no layers defined")]
    NoLayers,

    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Duplicate node name: {name}")]
    DuplicateName { name: String },

    #[error("Node {node} references unknown input {input}")]
    UnresolvedInput { node: String, input: String },

    #[error("Output {index} of node {node} is never consumed")]
    DanglingOutput { node: String, index: usize },

    #[error("Cycle detected at node {node}")]
    Cycle { node: String },

    #[error("Node {node} is not reachable from any graph input")]
    Disconnected { node: String },

    #[error("Compiled graph is invalid: {message}")]
    CompiledGraphInvalid { message: String },

    #[error("Shape mismatch at {node}: expected {expected}, got {actual}")]
    ShapeMismatch {
        node: String,
        expected: String,
        actual: String,
    },

    #[error("Resource error: {message}")]
    Resource { message: String },

    #[error("Graph is not compiled")]
    NotCompiled,

    #[error("Graph is already compiled")]
    AlreadyCompiled,

    #[error("Graph is not initialized")]
    NotInitialized,

    #[error("Tensors are not allocated")]
    NotAllocated,

    #[error("Layer {node} failed: {message}")]
    Layer { node: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        GraphError::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn resource(message: impl Into<String>) -> Self {
        GraphError::Resource {
            message: message.into(),
        }
    }

    pub(crate) fn shape(node: &str, expected: impl ToString, actual: impl ToString) -> Self {
        GraphError::ShapeMismatch {
            node: node.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Returns true for errors raised while validating the graph structure.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            GraphError::Cycle { .. }
                | GraphError::Disconnected { .. }
                | GraphError::CompiledGraphInvalid { .. }
        )
    }
}
