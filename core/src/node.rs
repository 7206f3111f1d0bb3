//! Compiled graph vertices and the operator capability they carry.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::eval::GraphEvalState;
use crate::transaction::Transaction;

/// Dense, zero-based position of a node inside its compiled graph.
///
/// Node identity is this index, never an address, so per-transaction state
/// can live in a plain vector.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIndex(pub usize);

impl NodeIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

impl From<usize> for NodeIndex {
    fn from(index: usize) -> Self {
        NodeIndex(index)
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-kind evaluation behavior of a node.
///
/// An operator records its result on its own node's [`NodeEvalState`]
/// through the graph evaluation state, using exactly one production mode:
/// a local list, an alias, or a forward.
///
/// [`NodeEvalState`]: crate::NodeEvalState
pub trait Operator: fmt::Debug + Send + Sync {
    /// Name used in logs and serialized graphs.
    fn name(&self) -> &str;

    /// One-time setup for nodes that need no incremental evaluation, such as
    /// literals aliasing their constant. Runs before any phase is evaluated.
    fn eval_initialize(
        &self,
        ges: &mut GraphEvalState,
        node: &Node,
        tx: &dyn Transaction,
    ) -> Result<()> {
        let _ = (ges, node, tx);
        Ok(())
    }

    /// Computes (or extends) the node's result for the transaction's current
    /// phase. Children have already been evaluated for this phase.
    fn eval_calculate(
        &self,
        ges: &mut GraphEvalState,
        node: &Node,
        tx: &dyn Transaction,
    ) -> Result<()>;
}

/// An immutable vertex of a compiled graph.
#[derive(Debug, Clone)]
pub struct Node {
    index: NodeIndex,
    label: String,
    children: Vec<NodeIndex>,
    forward: Option<NodeIndex>,
    operator: Arc<dyn Operator>,
}

impl Node {
    pub(crate) fn new(
        index: NodeIndex,
        label: String,
        children: Vec<NodeIndex>,
        operator: Arc<dyn Operator>,
    ) -> Self {
        Self {
            index,
            label,
            children,
            forward: None,
            operator,
        }
    }

    pub(crate) fn set_forward(&mut self, target: NodeIndex) {
        self.forward = Some(target);
    }

    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    /// Node this one was merged into by the compiler, if any.
    pub fn forward(&self) -> Option<NodeIndex> {
        self.forward
    }

    pub fn operator(&self) -> &dyn Operator {
        self.operator.as_ref()
    }
}
