//! Per-transaction graph evaluation.
//!
//! A [`GraphEvalState`] holds one [`NodeEvalState`] per node of a shared,
//! immutable [`Graph`]. It resolves forwarding chains, evaluates children
//! before their parents, and memoizes results so each node is calculated at
//! most once per phase and never again once finished.

use std::sync::Arc;

use tracing::{error, trace};

use crate::config::EvalConfig;
use crate::error::{EvalError, Result};
use crate::graph::Graph;
use crate::node::NodeIndex;
use crate::node_state::NodeEvalState;
use crate::transaction::Transaction;
use crate::value::Value;

/// Evaluation state of a whole graph for one transaction.
///
/// Created fresh for each transaction and dropped with it. Not meant to be
/// shared between threads; the graph it points at is.
#[derive(Debug)]
pub struct GraphEvalState {
    graph: Arc<Graph>,
    states: Vec<NodeEvalState>,
    config: EvalConfig,
}

impl GraphEvalState {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self::with_config(graph, EvalConfig::default())
    }

    pub fn with_config(graph: Arc<Graph>, config: EvalConfig) -> Self {
        let states = (0..graph.len()).map(|_| NodeEvalState::new()).collect();
        Self {
            graph,
            states,
            config,
        }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn slot(&self, index: NodeIndex) -> Result<usize> {
        if index.get() < self.states.len() {
            Ok(index.get())
        } else {
            Err(EvalError::IndexOutOfRange {
                index,
                len: self.states.len(),
            })
        }
    }

    /// Record of `index` itself, without following forwarding.
    pub fn node_eval_state(&self, index: NodeIndex) -> Result<&NodeEvalState> {
        let slot = self.slot(index)?;
        Ok(&self.states[slot])
    }

    pub fn node_eval_state_mut(&mut self, index: NodeIndex) -> Result<&mut NodeEvalState> {
        let slot = self.slot(index)?;
        Ok(&mut self.states[slot])
    }

    /// Follows forwarding from `index` to the node that owns the result.
    pub fn final_index(&self, index: NodeIndex) -> Result<NodeIndex> {
        let limit = self.config.max_forward_chain.min(self.states.len());
        let mut current = NodeIndex(self.slot(index)?);
        let mut hops = 0;

        while let Some(next) = self.states[current.get()].forwarded_to() {
            if hops == limit {
                error!(start = %index, limit, "forwarding chain does not terminate");
                return Err(EvalError::ForwardingCycle { start: index, limit });
            }
            hops += 1;
            current = NodeIndex(self.slot(next)?);
        }

        Ok(current)
    }

    /// Record that owns the result of `index`.
    pub fn index_final(&self, index: NodeIndex) -> Result<&NodeEvalState> {
        let owner = self.final_index(index)?;
        Ok(&self.states[owner.get()])
    }

    pub fn index_final_mut(&mut self, index: NodeIndex) -> Result<&mut NodeEvalState> {
        let owner = self.final_index(index)?;
        Ok(&mut self.states[owner.get()])
    }

    /// One-time setup of a node before phase evaluation starts.
    ///
    /// Nodes the compiler merged into another node start forwarding; all
    /// others get their operator's `eval_initialize`.
    pub fn initialize(&mut self, index: NodeIndex, tx: &dyn Transaction) -> Result<()> {
        let graph = Arc::clone(&self.graph);
        let node = graph.node(index).ok_or(EvalError::IndexOutOfRange {
            index,
            len: graph.len(),
        })?;

        match node.forward() {
            Some(target) => {
                self.slot(target)?;
                trace!(node = %index, target = %target, "forwarding");
                self.states[index.get()].forward(target)
            }
            None => node.operator().eval_initialize(self, node, tx),
        }
    }

    /// Initializes every node in index order.
    pub fn initialize_all(&mut self, tx: &dyn Transaction) -> Result<()> {
        for index in 0..self.states.len() {
            self.initialize(NodeIndex(index), tx)?;
        }
        Ok(())
    }

    /// Evaluates `index` for the transaction's current phase.
    ///
    /// Returns immediately if the owning node is finished or was already
    /// evaluated in this phase. Otherwise its children are evaluated first,
    /// then its operator runs. Traversal uses an explicit stack, so graph
    /// depth is not limited by the call stack.
    pub fn eval(&mut self, index: NodeIndex, tx: &dyn Transaction) -> Result<()> {
        let phase = tx.phase();
        let graph = Arc::clone(&self.graph);

        // (node, children already scheduled)
        let mut pending = vec![(index, false)];
        while let Some((index, expanded)) = pending.pop() {
            let owner = self.final_index(index)?;

            let state = &self.states[owner.get()];
            if state.is_finished() {
                trace!(node = %index, owner = %owner, "already finished");
                continue;
            }
            if state.evaluated_in(phase) {
                trace!(node = %index, owner = %owner, %phase, "already evaluated this phase");
                continue;
            }

            let node = graph.node(owner).ok_or(EvalError::IndexOutOfRange {
                index: owner,
                len: graph.len(),
            })?;

            if !expanded {
                pending.push((owner, true));
                pending.extend(node.children().iter().rev().map(|&child| (child, false)));
                continue;
            }

            // Stamped before calculating so an operator that re-enters its own
            // node within this phase does not recurse.
            self.states[owner.get()].set_phase(phase);
            trace!(
                node = %owner,
                label = node.label(),
                operator = node.operator().name(),
                %phase,
                "calculating"
            );
            node.operator().eval_calculate(self, node, tx)?;
        }
        Ok(())
    }

    /// Current value of `index`, following forwarding. Does not evaluate.
    pub fn value(&self, index: NodeIndex) -> Result<Value> {
        Ok(self.index_final(index)?.value().clone())
    }

    pub fn is_finished(&self, index: NodeIndex) -> Result<bool> {
        Ok(self.index_final(index)?.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::node::{Node, Operator};
    use crate::phase::Phase;
    use crate::transaction::TransactionData;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Aliases a constant and finishes at initialization.
    #[derive(Debug)]
    struct Constant(Value);

    impl Operator for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        fn eval_initialize(&self, ges: &mut GraphEvalState, node: &Node, _: &dyn Transaction) -> Result<()> {
            let state = ges.node_eval_state_mut(node.index())?;
            state.alias(self.0.clone())?;
            state.finish()
        }

        fn eval_calculate(&self, _: &mut GraphEvalState, _: &Node, _: &dyn Transaction) -> Result<()> {
            Ok(())
        }
    }

    /// Once every child has finished, lists their values and finishes.
    /// Counts how often it is calculated.
    #[derive(Debug, Default)]
    struct Collect {
        calls: AtomicUsize,
    }

    impl Operator for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn eval_calculate(&self, ges: &mut GraphEvalState, node: &Node, _: &dyn Transaction) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut values = Vec::new();
            for &child in node.children() {
                if !ges.is_finished(child)? {
                    return ges.node_eval_state_mut(node.index())?.setup_local_list();
                }
                values.push(ges.value(child)?);
            }
            let state = ges.node_eval_state_mut(node.index())?;
            state.setup_local_list()?;
            for value in values {
                state.append_to_list(value)?;
            }
            state.finish()
        }
    }

    /// Picks up the field `name` once the transaction reaches `phase`.
    #[derive(Debug)]
    struct FieldAt {
        name: &'static str,
        phase: Phase,
    }

    impl Operator for FieldAt {
        fn name(&self) -> &str {
            "field_at"
        }

        fn eval_calculate(&self, ges: &mut GraphEvalState, node: &Node, tx: &dyn Transaction) -> Result<()> {
            if tx.phase() < self.phase {
                return Ok(());
            }
            let value = tx.field(self.name).unwrap_or_default();
            let state = ges.node_eval_state_mut(node.index())?;
            state.alias(value)?;
            state.finish()
        }
    }

    fn constant(v: impl Into<Value>) -> Arc<dyn Operator> {
        Arc::new(Constant(v.into()))
    }

    fn hello_graph() -> Arc<Graph> {
        let mut builder = GraphBuilder::new("hello");
        for label in ["n0", "n1", "n2", "n3"] {
            builder.add(label, constant(Value::Null), vec![]).unwrap();
        }
        builder.add("n4", constant("Hello World"), vec![]).unwrap();
        Arc::new(builder.build().unwrap())
    }

    #[test]
    fn test_graph_eval_state() {
        let graph = hello_graph();
        let tx = TransactionData::new("tx");
        let mut ges = GraphEvalState::new(graph);
        let n: Vec<NodeIndex> = (0..5).map(NodeIndex).collect();

        ges.node_eval_state_mut(n[3]).unwrap().forward(n[2]).unwrap();
        ges.node_eval_state_mut(n[2]).unwrap().forward(n[4]).unwrap();
        {
            let alias = ges.node_eval_state_mut(n[1]).unwrap();
            alias.alias(Value::from(5)).unwrap();
            alias.finish().unwrap();
        }
        ges.node_eval_state_mut(n[0]).unwrap().setup_local_list().unwrap();

        assert_eq!(ges.final_index(n[0]).unwrap(), n[0]);
        assert_eq!(ges.final_index(n[1]).unwrap(), n[1]);
        assert_eq!(ges.final_index(n[2]).unwrap(), n[4]);
        assert_eq!(ges.final_index(n[3]).unwrap(), n[4]);
        assert_eq!(ges.final_index(n[4]).unwrap(), n[4]);

        ges.initialize(n[4], &tx).unwrap();
        ges.eval(n[3], &tx).unwrap();
        let result = ges.value(n[3]).unwrap();

        assert!(result.is_truthy());
        assert_eq!(result.to_string(), "'Hello World'");

        assert!(!ges.index_final(n[0]).unwrap().value().is_truthy());
        assert!(ges.index_final(n[1]).unwrap().value().is_truthy());
        for &i in &n[2..] {
            assert_eq!(ges.index_final(i).unwrap().value(), &Value::from("Hello World"));
        }

        assert!(!ges.index_final(n[0]).unwrap().is_finished());
        for &i in &n[1..] {
            assert!(ges.index_final(i).unwrap().is_finished());
        }

        // Forwarding records keep no value of their own.
        assert!(ges.node_eval_state(n[2]).unwrap().value().is_null());
        assert!(ges.node_eval_state(n[3]).unwrap().value().is_null());
    }

    #[test]
    fn test_untouched_node_stays_empty() {
        let mut ges = GraphEvalState::new(hello_graph());
        let state = ges.index_final(NodeIndex(0)).unwrap();
        assert!(!state.is_finished());
        assert!(state.value().is_null());
        assert!(ges.value(NodeIndex(0)).unwrap().is_null());
        assert!(ges.index_final_mut(NodeIndex(0)).unwrap().finish().is_err());
    }

    #[test]
    fn test_index_out_of_range() {
        let ges = GraphEvalState::new(hello_graph());
        let err = ges.index_final(NodeIndex(5)).unwrap_err();
        assert_eq!(err, EvalError::IndexOutOfRange { index: NodeIndex(5), len: 5 });
        assert!(err.is_fatal());
    }

    #[test]
    fn test_forwarding_cycle_is_fatal() {
        let mut ges = GraphEvalState::new(hello_graph());
        ges.node_eval_state_mut(NodeIndex(0)).unwrap().forward(NodeIndex(1)).unwrap();
        ges.node_eval_state_mut(NodeIndex(1)).unwrap().forward(NodeIndex(0)).unwrap();

        let err = ges.final_index(NodeIndex(0)).unwrap_err();
        assert!(matches!(err, EvalError::ForwardingCycle { start: NodeIndex(0), .. }));
        assert!(err.is_fatal());

        let tx = TransactionData::new("tx");
        assert!(ges.eval(NodeIndex(1), &tx).unwrap_err().is_fatal());
    }

    #[test]
    fn test_forward_to_missing_node() {
        let mut ges = GraphEvalState::new(hello_graph());
        ges.node_eval_state_mut(NodeIndex(0)).unwrap().forward(NodeIndex(42)).unwrap();
        assert!(matches!(
            ges.final_index(NodeIndex(0)),
            Err(EvalError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_forward_chain_limit() {
        let mut ges = GraphEvalState::with_config(hello_graph(), EvalConfig { max_forward_chain: 1 });
        ges.node_eval_state_mut(NodeIndex(0)).unwrap().forward(NodeIndex(1)).unwrap();
        ges.node_eval_state_mut(NodeIndex(1)).unwrap().forward(NodeIndex(2)).unwrap();

        assert_eq!(ges.final_index(NodeIndex(1)).unwrap(), NodeIndex(2));
        assert_eq!(
            ges.final_index(NodeIndex(0)),
            Err(EvalError::ForwardingCycle { start: NodeIndex(0), limit: 1 })
        );
    }

    #[test]
    fn test_initialize_applies_compiled_forwarding() {
        let mut builder = GraphBuilder::new("merged");
        let a = builder.add("a", constant("x"), vec![]).unwrap();
        let b = builder.add("b", constant("x"), vec![]).unwrap();
        builder.forward(b, a).unwrap();
        let graph = Arc::new(builder.build().unwrap());

        let tx = TransactionData::new("tx");
        let mut ges = GraphEvalState::new(graph);
        ges.initialize_all(&tx).unwrap();

        assert!(ges.node_eval_state(b).unwrap().is_forwarding());
        assert_eq!(ges.node_eval_state(b).unwrap().forwarded_to(), Some(a));
        assert_eq!(ges.value(b).unwrap(), Value::from("x"));
        assert!(ges.is_finished(b).unwrap());
    }

    #[test]
    fn test_shared_child_calculated_once_per_phase() {
        let collect = Arc::new(Collect::default());
        let mut builder = GraphBuilder::new("diamond");
        let field = builder
            .add("field", Arc::new(FieldAt { name: "ARGS", phase: Phase::Request }), vec![])
            .unwrap();
        let shared = builder.add("shared", collect.clone(), vec![field]).unwrap();
        let left = builder.add("left", Arc::new(Collect::default()), vec![shared]).unwrap();
        let right = builder.add("right", Arc::new(Collect::default()), vec![shared]).unwrap();
        let top = builder.add("top", Arc::new(Collect::default()), vec![left, right]).unwrap();
        let graph = Arc::new(builder.build().unwrap());

        let mut tx = TransactionData::new("tx");
        tx.set_field("ARGS", Value::from("a=1"));
        let mut ges = GraphEvalState::new(graph);
        ges.initialize_all(&tx).unwrap();

        tx.set_phase(Phase::RequestHeader);
        ges.eval(top, &tx).unwrap();
        ges.eval(top, &tx).unwrap();
        ges.eval(shared, &tx).unwrap();
        assert_eq!(collect.calls.load(Ordering::SeqCst), 1);
        assert!(!ges.is_finished(top).unwrap());
        assert_eq!(ges.node_eval_state(shared).unwrap().phase(), Phase::RequestHeader);

        tx.set_phase(Phase::Request);
        ges.eval(top, &tx).unwrap();
        assert_eq!(collect.calls.load(Ordering::SeqCst), 2);
        assert!(ges.is_finished(shared).unwrap());
        assert!(ges.is_finished(top).unwrap());
        assert_eq!(ges.value(shared).unwrap().as_list(), &[Value::from("a=1")]);

        // Finished nodes are never recalculated.
        tx.set_phase(Phase::Response);
        ges.eval(top, &tx).unwrap();
        assert_eq!(collect.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ges.node_eval_state(shared).unwrap().phase(), Phase::Request);
    }

    #[test]
    fn test_operator_errors_propagate() {
        #[derive(Debug)]
        struct DoubleFinish;

        impl Operator for DoubleFinish {
            fn name(&self) -> &str {
                "double_finish"
            }

            fn eval_calculate(&self, ges: &mut GraphEvalState, node: &Node, _: &dyn Transaction) -> Result<()> {
                let state = ges.node_eval_state_mut(node.index())?;
                state.finish_true()?;
                state.finish()
            }
        }

        let mut builder = GraphBuilder::new("broken");
        let node = builder.add("broken", Arc::new(DoubleFinish), vec![]).unwrap();
        let mut ges = GraphEvalState::new(Arc::new(builder.build().unwrap()));
        let mut tx = TransactionData::new("tx");
        tx.set_phase(Phase::RequestHeader);

        let err = ges.eval(node, &tx).unwrap_err();
        assert!(matches!(err, EvalError::InvalidState(_)));
        assert!(!err.is_fatal());
        assert_eq!(ges.node_eval_state(node).unwrap().phase(), Phase::RequestHeader);
    }

    #[test]
    fn test_deep_graph_does_not_exhaust_stack() {
        /// Aliases its single child's value once the child finishes.
        #[derive(Debug)]
        struct Pass;

        impl Operator for Pass {
            fn name(&self) -> &str {
                "pass"
            }

            fn eval_calculate(&self, ges: &mut GraphEvalState, node: &Node, _: &dyn Transaction) -> Result<()> {
                let child = node.children()[0];
                if ges.is_finished(child)? {
                    let value = ges.value(child)?;
                    let state = ges.node_eval_state_mut(node.index())?;
                    state.alias(value)?;
                    state.finish()?;
                }
                Ok(())
            }
        }

        let mut builder = GraphBuilder::new("deep");
        let mut top = builder.add("leaf", Arc::new(Constant(Value::from("deep"))), vec![]).unwrap();
        for i in 0..200_000 {
            top = builder.add(format!("pass{i}"), Arc::new(Pass), vec![top]).unwrap();
        }
        let mut tx = TransactionData::new("tx");
        let mut ges = GraphEvalState::new(Arc::new(builder.build().unwrap()));
        ges.initialize_all(&tx).unwrap();
        tx.set_phase(Phase::Request);

        ges.eval(top, &tx).unwrap();
        assert!(ges.is_finished(top).unwrap());
        assert_eq!(ges.value(top).unwrap(), Value::from("deep"));
    }
}
