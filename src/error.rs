//! Error types for the tagslam graph core

use crate::mapping::{VertexDesc, VertexId};
use crate::optimizer::OptimizerKey;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the graph, the optimizer and the config loader
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A vertex with this id is already in the graph
    #[error("duplicate vertex: {0}")]
    DuplicateVertex(VertexId),

    /// The handle does not index a live vertex
    #[error("invalid vertex handle: {0}")]
    InvalidVertex(VertexDesc),

    /// A factor refers to a vertex that is missing or not a value
    #[error("factor {factor} has dangling endpoint {endpoint}")]
    DanglingReference {
        /// Id of the offending factor
        factor: VertexId,
        /// The endpoint that could not be resolved
        endpoint: String,
    },

    /// Optimized state was requested for a vertex never handed to the optimizer
    #[error("vertex not optimized: {0}")]
    NotOptimized(String),

    /// The vertex was already handed to the optimizer
    #[error("vertex already optimized: {0}")]
    AlreadyOptimized(String),

    /// The vertex exists but has the wrong kind for the operation
    #[error("wrong vertex kind: expected {expected}, found {found}")]
    WrongVertexKind {
        /// Kind the operation needs
        expected: &'static str,
        /// Kind actually found
        found: &'static str,
    },

    /// A factor's noise model has a zero, negative or non-finite sigma
    #[error("invalid noise model for factor {0}")]
    InvalidNoise(VertexId),

    /// Attempt to record an empty optimizer key list
    #[error("empty optimizer key list for vertex {0}")]
    EmptyKeys(VertexDesc),

    /// The optimizer does not know this key
    #[error("unknown optimizer key: {0}")]
    UnknownKey(OptimizerKey),

    /// The linear system could not be solved or inverted
    #[error("singular linear system")]
    SingularSystem,

    /// Missing or malformed configuration entry
    #[error("config error at '{key}': {reason}")]
    Config {
        /// Full key path of the offending entry
        key: String,
        /// What went wrong
        reason: String,
    },

    /// YAML syntax error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
