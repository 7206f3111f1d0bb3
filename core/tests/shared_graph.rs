use std::sync::Arc;
use std::thread;

use predicate_core::{
    EvalError, Graph, GraphBuilder, GraphEvalState, Node, NodeIndex, Operator, Phase,
    Transaction, TransactionData, Value,
};

/// Lists every item of a transaction field, finishing at `final_phase`.
#[derive(Debug)]
struct Field {
    name: &'static str,
    final_phase: Phase,
}

impl Operator for Field {
    fn name(&self) -> &str {
        "field"
    }

    fn eval_calculate(
        &self,
        ges: &mut GraphEvalState,
        node: &Node,
        tx: &dyn Transaction,
    ) -> Result<(), EvalError> {
        let items = tx.field(self.name).unwrap_or_default();
        let state = ges.node_eval_state_mut(node.index())?;
        state.setup_local_list()?;

        let consumed = state.state().get::<usize>().copied().unwrap_or(0);
        for item in items.items().iter().skip(consumed) {
            state.append_to_list(item.clone())?;
        }
        state.state_mut().set(items.items().len());

        if tx.phase() >= self.final_phase {
            state.finish()?;
        }
        Ok(())
    }
}

/// True as soon as any child value contains `needle`.
#[derive(Debug)]
struct AnyContains(&'static str);

impl Operator for AnyContains {
    fn name(&self) -> &str {
        "any_contains"
    }

    fn eval_calculate(
        &self,
        ges: &mut GraphEvalState,
        node: &Node,
        _: &dyn Transaction,
    ) -> Result<(), EvalError> {
        let mut all_finished = true;
        for &child in node.children() {
            let value = ges.value(child)?;
            let hit = value
                .items()
                .iter()
                .any(|item| item.as_str().is_some_and(|s| s.contains(self.0)));
            if hit {
                return ges.node_eval_state_mut(node.index())?.finish_true();
            }
            all_finished &= ges.is_finished(child)?;
        }

        let state = ges.node_eval_state_mut(node.index())?;
        state.setup_local_list()?;
        if all_finished {
            state.finish()?;
        }
        Ok(())
    }
}

fn build_graph() -> (Arc<Graph>, NodeIndex, NodeIndex) {
    let mut builder = GraphBuilder::new("sqli");
    let args = builder
        .add("args", Arc::new(Field { name: "ARGS", final_phase: Phase::Request }), vec![])
        .unwrap();
    let args_again = builder
        .add("args_again", Arc::new(Field { name: "ARGS", final_phase: Phase::Request }), vec![])
        .unwrap();
    builder.forward(args_again, args).unwrap();
    let rule = builder
        .add("rule", Arc::new(AnyContains("select")), vec![args, args_again])
        .unwrap();
    (Arc::new(builder.build().unwrap()), rule, args_again)
}

fn run(graph: Arc<Graph>, rule: NodeIndex, args: &[&str]) -> (bool, usize) {
    let mut tx = TransactionData::new("tx");
    let mut ges = GraphEvalState::new(graph);
    ges.initialize_all(&tx).unwrap();

    tx.set_phase(Phase::RequestHeader);
    ges.eval(rule, &tx).unwrap();
    assert!(!ges.is_finished(rule).unwrap());

    tx.set_phase(Phase::Request);
    for arg in args {
        tx.append_field("ARGS", Value::from(*arg));
    }
    ges.eval(rule, &tx).unwrap();
    assert!(ges.is_finished(rule).unwrap());

    let listed = ges.value(NodeIndex(0)).unwrap().as_list().len();
    (ges.value(rule).unwrap().is_truthy(), listed)
}

#[test]
fn test_graph_and_state_thread_bounds() {
    fn assert_send_sync<T: Send + Sync>() {}
    fn assert_send<T: Send>() {}
    assert_send_sync::<Graph>();
    assert_send::<GraphEvalState>();
}

#[test]
fn test_forwarded_duplicate_shares_result() {
    let (graph, rule, args_again) = build_graph();
    let mut tx = TransactionData::new("tx");
    tx.append_field("ARGS", Value::from("id=1"));
    tx.set_phase(Phase::Request);

    let mut ges = GraphEvalState::new(graph);
    ges.initialize_all(&tx).unwrap();
    ges.eval(rule, &tx).unwrap();

    assert!(ges.node_eval_state(args_again).unwrap().is_forwarding());
    assert!(ges.node_eval_state(args_again).unwrap().value().is_null());
    assert_eq!(ges.value(args_again).unwrap(), ges.value(NodeIndex(0)).unwrap());
    assert_eq!(ges.value(args_again).unwrap().as_list().len(), 1);
}

#[test]
fn test_concurrent_transactions_share_one_graph() {
    let (graph, rule, _) = build_graph();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let graph = Arc::clone(&graph);
            thread::spawn(move || {
                if i % 2 == 0 {
                    run(graph, rule, &["q=1 union select *", "page=2"])
                } else {
                    run(graph, rule, &["q=hello"])
                }
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let (matched, listed) = handle.join().unwrap();
        assert_eq!(matched, i % 2 == 0);
        assert_eq!(listed, if i % 2 == 0 { 2 } else { 1 });
    }
}
