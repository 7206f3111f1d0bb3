//! Type definitions for the serialized rule graph and transaction formats.
//!
//! A rule graph is stored as a flat list of predicate nodes referring to each
//! other by id, plus the rules whose root nodes decide what happens to a
//! transaction. The compiler turns this into a [`predicate_core::Graph`].

use std::collections::BTreeMap;

use predicate_core::{Phase, Value};
use serde::{Deserialize, Serialize};

// ============================================================================
// Graph Structure
// ============================================================================

/// The complete rule graph payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphPayload {
    #[serde(default)]
    pub name: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// A single predicate node.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeSpec {
    pub id: String,
    /// Operator name, e.g. `field`, `rx`, `and`.
    pub op: String,
    /// Operator-specific arguments, parsed by the operator registry.
    #[serde(default)]
    pub args: serde_json::Value,
    /// Ids of the nodes whose values this node consumes.
    #[serde(default)]
    pub children: Vec<String>,
    /// Id of an identical node whose result this node reuses.
    #[serde(default)]
    pub forward: Option<String>,
}

/// A rule: when the value of `root` becomes truthy, `action` fires.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleSpec {
    pub id: String,
    pub root: String,
    pub action: ActionSpec,
}

/// Action taken when a rule fires.
/// Supports: block, allow, log
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionSpec {
    pub action: String,
    #[serde(rename = "statusCode")]
    pub status_code: Option<u16>,
    pub message: Option<String>,
}

// ============================================================================
// Operator Arguments (parsed from NodeSpec.args)
// ============================================================================

/// Arguments of `literal` nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiteralArgs {
    #[serde(default)]
    pub value: Value,
}

/// Arguments of `field` nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldArgs {
    pub name: String,
    /// Phase after which the field no longer changes.
    #[serde(rename = "finalPhase", default = "default_final_phase")]
    pub final_phase: Phase,
}

fn default_final_phase() -> Phase {
    Phase::Logging
}

/// Arguments of `eq` nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EqArgs {
    pub value: Value,
}

/// Arguments of `contains` and `starts_with` nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StringArgs {
    pub value: String,
    #[serde(rename = "caseInsensitive", default)]
    pub case_insensitive: bool,
}

/// Arguments of `rx` nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegexArgs {
    pub pattern: String,
}

/// Arguments of `ip_match` nodes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpMatchArgs {
    pub networks: Vec<String>,
}

// ============================================================================
// Transactions
// ============================================================================

/// A transaction to inspect, as the data that arrives in each phase.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransactionPayload {
    #[serde(default)]
    pub id: Option<String>,
    pub phases: Vec<PhaseData>,
}

/// Fields that become available in one phase. Items are appended to any
/// values the field already had.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhaseData {
    pub phase: Phase,
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<Value>>,
}
