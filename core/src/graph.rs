//! Compiled predicate graphs.
//!
//! A [`Graph`] is built once, wrapped in an `Arc`, and shared read-only by
//! every transaction that evaluates it. Nodes are stored densely by index.
//!
//! ```text
//! [field REQUEST_METHOD] ──► [eq 'POST'] ──► [and] ──► rule
//! [field ARGS]           ──► [rx ...]    ──►│
//! ```

use std::sync::Arc;

use crate::config::EvalConfig;
use crate::node::{Node, NodeIndex, Operator};

/// Errors detected while building a graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("node {node} references child {child} which has not been added yet")]
    UnknownChild { node: NodeIndex, child: NodeIndex },

    #[error("node {0} does not exist")]
    UnknownNode(NodeIndex),

    #[error("node {0} cannot forward to itself")]
    SelfForward(NodeIndex),

    #[error("node {0} already forwards to another node")]
    AlreadyForwarded(NodeIndex),

    #[error("forwarding chain starting at node {0} forms a cycle")]
    ForwardCycle(NodeIndex),

    #[error("forwarding chain starting at node {node} is {length} hops long (limit {limit})")]
    ForwardChainTooLong {
        node: NodeIndex,
        length: usize,
        limit: usize,
    },
}

/// An immutable, compiled DAG of predicate nodes.
#[derive(Debug)]
pub struct Graph {
    name: String,
    nodes: Vec<Node>,
}

impl Graph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.get())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

/// Incrementally assembles a [`Graph`].
///
/// Children must be added before their parents, which keeps the graph
/// acyclic by construction.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    name: String,
    nodes: Vec<Node>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds a node and returns its index.
    pub fn add(
        &mut self,
        label: impl Into<String>,
        operator: Arc<dyn Operator>,
        children: Vec<NodeIndex>,
    ) -> Result<NodeIndex, GraphError> {
        let index = NodeIndex(self.nodes.len());
        if let Some(&child) = children.iter().find(|c| c.get() >= index.get()) {
            return Err(GraphError::UnknownChild { node: index, child });
        }
        self.nodes
            .push(Node::new(index, label.into(), children, operator));
        Ok(index)
    }

    /// Declares that `from` produces exactly the result of `to`.
    pub fn forward(&mut self, from: NodeIndex, to: NodeIndex) -> Result<(), GraphError> {
        if to.get() >= self.nodes.len() {
            return Err(GraphError::UnknownNode(to));
        }
        if from == to {
            return Err(GraphError::SelfForward(from));
        }
        let node = self
            .nodes
            .get_mut(from.get())
            .ok_or(GraphError::UnknownNode(from))?;
        if node.forward().is_some() {
            return Err(GraphError::AlreadyForwarded(from));
        }
        node.set_forward(to);
        Ok(())
    }

    /// Builds with the default [`EvalConfig`].
    pub fn build(self) -> Result<Graph, GraphError> {
        self.build_with_config(&EvalConfig::default())
    }

    /// Builds the graph, rejecting forwarding cycles and chains longer than
    /// `config.max_forward_chain`, which evaluation would refuse to follow.
    pub fn build_with_config(self, config: &EvalConfig) -> Result<Graph, GraphError> {
        for node in &self.nodes {
            let mut current = node.index();
            let mut hops = 0;
            while let Some(next) = self.nodes[current.get()].forward() {
                hops += 1;
                if hops > self.nodes.len() {
                    return Err(GraphError::ForwardCycle(node.index()));
                }
                current = next;
            }
            if hops > config.max_forward_chain {
                return Err(GraphError::ForwardChainTooLong {
                    node: node.index(),
                    length: hops,
                    limit: config.max_forward_chain,
                });
            }
        }

        Ok(Graph {
            name: self.name,
            nodes: self.nodes,
        })
    }
}
