//! Security rules module.
//!
//! Rules are stored as serialized predicate graphs. This module loads them,
//! compiles them into a shared [`predicate_core::Graph`] with the built-in
//! operator catalog, and drives transactions through them phase by phase.

mod compile;
mod engine;
mod loader;
mod operators;
mod types;

pub use compile::{compile_graph, compile_graph_with_config, CompileError, CompiledRule, CompiledRules, RuleAction};
pub use engine::{Decision, Inspection, RuleEngine, RuleHit};
pub use loader::{
    decompress_graph, graph_digest, load_graph_from_file, load_transaction_from_file, parse_graph,
    parse_transaction, GraphFormat, LoadError, LoadedGraph, MAX_GRAPH_BYTES,
};
pub use operators::{Arity, ItemTest, OperatorFactory, OperatorRegistry};
pub use types::{ActionSpec, GraphPayload, NodeSpec, PhaseData, RuleSpec, TransactionPayload};
