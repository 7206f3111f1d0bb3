//! # Predicate Core
//!
//! Per-transaction evaluation of compiled predicate graphs.
//!
//! A rule set is compiled once into a [`Graph`]: an immutable DAG of nodes,
//! each carrying an [`Operator`]. Every transaction gets its own
//! [`GraphEvalState`], which stores one [`NodeEvalState`] per node and drives
//! evaluation as the transaction moves through its [`Phase`]s.
//!
//! ## Architecture
//!
//! - **Graph** nodes are shared read-only across all concurrent transactions.
//! - **Node state** records how a node produces its result (local list,
//!   alias or forward), whether it is finished, and the last phase it ran in.
//! - **Graph state** resolves forwarding chains, evaluates children before
//!   parents, and never recalculates a finished node.
//!
//! ## Example
//!
//! ```text
//! [field ARGS] ──► [rx 'union.+select'] ──► [or] ──► rule 1001
//! [field URI]  ──► [contains '../']     ──►│
//! ```
//!
//! ## Modules
//!
//! - `value` - Runtime values
//! - `phase` - Transaction phases
//! - `node` - Nodes and the operator trait
//! - `graph` - Compiled graph and builder
//! - `node_state` - Per-node evaluation state machine
//! - `eval` - Per-transaction graph evaluation driver
//! - `transaction` - Transaction data seen by operators
//! - `config` - Evaluation settings
//! - `error` - Evaluation errors

mod config;
mod error;
mod eval;
mod graph;
mod node;
mod node_state;
mod phase;
mod transaction;
mod value;

pub use config::*;
pub use error::EvalError;
pub use eval::*;
pub use graph::*;
pub use node::*;
pub use node_state::*;
pub use phase::*;
pub use transaction::*;
pub use value::*;
