//! Error types for diagram operations.

use cb_core::{BlockId, CoreError};
use thiserror::Error;

use crate::state_space::StateSpaceError;

/// Result type for diagram operations.
pub type DiagramResult<T> = Result<T, DiagramError>;

/// Errors that can occur while editing or running a diagram.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiagramError {
    /// Connection request that would break a port invariant.
    #[error("Invalid connection: {what}")]
    InvalidConnection { what: String },

    /// Block, port, wire or type tag that does not exist.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Port lookup by position outside the block's port list.
    #[error("Port index {index} is out of range for block {block} ({len} ports)")]
    PortIndex {
        block: BlockId,
        index: usize,
        len: usize,
    },

    /// Operation not allowed in the current simulation state.
    #[error("Invalid state: {what}")]
    InvalidState { what: &'static str },

    /// Invalid argument provided to a diagram function.
    #[error("Invalid argument: {what}")]
    InvalidArg { what: String },

    /// A block could not be prepared for simulation.
    #[error("Block '{block}' failed to initialize: {what}")]
    Initialization { block: String, what: String },

    /// State-space evaluation failed.
    #[error(transparent)]
    StateSpace(#[from] StateSpaceError),

    #[error(transparent)]
    Core(#[from] CoreError),
}
