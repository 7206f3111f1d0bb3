//! Evaluation errors.
//!
//! None of these are retryable: each one means an operator, the compiler or
//! the compiled graph broke a contract, and the transaction being evaluated
//! must be abandoned.

use crate::node::NodeIndex;

/// Errors raised while evaluating a graph for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// A node state transition that its current mode does not allow.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("forwarding chain starting at node {start} did not terminate within {limit} hops")]
    ForwardingCycle { start: NodeIndex, limit: usize },

    #[error("node index {index} out of range for graph of {len} nodes")]
    IndexOutOfRange { index: NodeIndex, len: usize },

    /// Failure reported by an operator's own evaluation logic.
    #[error("operator failed at node {node}: {message}")]
    Operator { node: NodeIndex, message: String },
}

impl EvalError {
    /// Structural inconsistencies of the compiled graph itself.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EvalError::ForwardingCycle { .. } | EvalError::IndexOutOfRange { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
