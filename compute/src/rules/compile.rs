//! Compiles a [`GraphPayload`] into a shared [`Graph`] plus its rule table.
//!
//! Nodes are added in dependency order, so every child gets a lower index
//! than its parents. Forward targets count as dependencies too.

use std::collections::HashMap;
use std::sync::Arc;

use predicate_core::{EvalConfig, Graph, GraphBuilder, GraphError, NodeIndex};
use thiserror::Error;
use tracing::debug;

use super::operators::{Arity, OperatorRegistry};
use super::types::{ActionSpec, GraphPayload, NodeSpec};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("node '{node}': unknown operator '{op}'")]
    UnknownOperator { node: String, op: String },

    #[error("node '{node}': invalid arguments for '{op}': {reason}")]
    InvalidArgs {
        node: String,
        op: String,
        reason: String,
    },

    #[error("node '{node}': operator '{op}' expects {expected}, found {found}")]
    Arity {
        node: String,
        op: String,
        expected: Arity,
        found: usize,
    },

    #[error("duplicate id '{0}'")]
    DuplicateId(String),

    #[error("'{from}' refers to unknown node '{to}'")]
    UnknownReference { from: String, to: String },

    #[error("dependency cycle through node '{0}'")]
    DependencyCycle(String),

    #[error("rule '{rule}': unknown action '{action}'")]
    UnknownAction { rule: String, action: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// What happens to a transaction when a rule fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    Block { status_code: u16, message: String },
    Allow,
    Log,
}

impl RuleAction {
    fn from_spec(rule: &str, spec: &ActionSpec) -> Result<Self, CompileError> {
        match spec.action.as_str() {
            "block" => Ok(RuleAction::Block {
                status_code: spec.status_code.unwrap_or(403),
                message: spec.message.clone().unwrap_or_else(|| "Blocked".to_string()),
            }),
            "allow" => Ok(RuleAction::Allow),
            "log" => Ok(RuleAction::Log),
            other => Err(CompileError::UnknownAction {
                rule: rule.to_string(),
                action: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Block { .. } => "block",
            RuleAction::Allow => "allow",
            RuleAction::Log => "log",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub root: NodeIndex,
    pub action: RuleAction,
}

/// A compiled graph, ready to be shared by every transaction.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    pub graph: Arc<Graph>,
    pub rules: Vec<CompiledRule>,
    ids: HashMap<String, NodeIndex>,
}

impl CompiledRules {
    /// Index assigned to the node with payload id `id`.
    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.ids.get(id).copied()
    }
}

#[derive(Clone, Copy)]
enum Visit {
    Active,
    Done,
}

/// Depth-first post-order over children and forward targets. Uses an explicit
/// stack so deep graphs cannot exhaust the thread's stack.
fn dependency_order<'a>(
    specs: &'a [NodeSpec],
    by_id: &HashMap<&'a str, &'a NodeSpec>,
) -> Result<Vec<&'a NodeSpec>, CompileError> {
    let mut marks: HashMap<&'a str, Visit> = HashMap::new();
    let mut order = Vec::with_capacity(specs.len());
    // (node, number of dependencies already pushed)
    let mut stack: Vec<(&'a NodeSpec, usize)> = Vec::new();

    for root in specs {
        if marks.contains_key(root.id.as_str()) {
            continue;
        }
        marks.insert(&root.id, Visit::Active);
        stack.push((root, 0));

        while let Some((spec, next)) = stack.pop() {
            let Some(dep) = spec.children.iter().chain(spec.forward.iter()).nth(next) else {
                marks.insert(&spec.id, Visit::Done);
                order.push(spec);
                continue;
            };
            stack.push((spec, next + 1));

            let dep_spec = by_id.get(dep.as_str()).copied().ok_or_else(|| {
                CompileError::UnknownReference {
                    from: spec.id.clone(),
                    to: dep.clone(),
                }
            })?;
            match marks.get(dep_spec.id.as_str()) {
                Some(Visit::Done) => {}
                Some(Visit::Active) => return Err(CompileError::DependencyCycle(dep_spec.id.clone())),
                None => {
                    marks.insert(&dep_spec.id, Visit::Active);
                    stack.push((dep_spec, 0));
                }
            }
        }
    }
    Ok(order)
}

/// Compiles `payload` using the operators of `registry`.
pub fn compile_graph(
    payload: &GraphPayload,
    registry: &OperatorRegistry,
) -> Result<CompiledRules, CompileError> {
    compile_graph_with_config(payload, registry, &EvalConfig::default())
}

/// Compiles `payload` for evaluation under `config`. Forwarding chains longer
/// than `config.max_forward_chain` are rejected here rather than at runtime.
pub fn compile_graph_with_config(
    payload: &GraphPayload,
    registry: &OperatorRegistry,
    config: &EvalConfig,
) -> Result<CompiledRules, CompileError> {
    let mut by_id: HashMap<&str, &NodeSpec> = HashMap::new();
    for spec in &payload.nodes {
        if by_id.insert(&spec.id, spec).is_some() {
            return Err(CompileError::DuplicateId(spec.id.clone()));
        }
    }

    let order = dependency_order(&payload.nodes, &by_id)?;

    let mut builder = GraphBuilder::new(payload.name.clone().unwrap_or_default());
    let mut ids: HashMap<String, NodeIndex> = HashMap::new();
    for spec in order {
        let arity = registry.arity(&spec.op).ok_or_else(|| CompileError::UnknownOperator {
            node: spec.id.clone(),
            op: spec.op.clone(),
        })?;
        if !arity.accepts(spec.children.len()) {
            return Err(CompileError::Arity {
                node: spec.id.clone(),
                op: spec.op.clone(),
                expected: arity,
                found: spec.children.len(),
            });
        }
        let operator = registry
            .build(&spec.op, &spec.args)
            .ok_or_else(|| CompileError::UnknownOperator {
                node: spec.id.clone(),
                op: spec.op.clone(),
            })?
            .map_err(|reason| CompileError::InvalidArgs {
                node: spec.id.clone(),
                op: spec.op.clone(),
                reason,
            })?;

        // Dependencies were placed first, so these lookups cannot miss.
        let children = spec.children.iter().filter_map(|c| ids.get(c).copied()).collect();
        let index = builder.add(spec.id.clone(), operator, children)?;
        if let Some(target) = spec.forward.as_ref().and_then(|t| ids.get(t)) {
            builder.forward(index, *target)?;
        }
        ids.insert(spec.id.clone(), index);
    }

    let mut rules = Vec::with_capacity(payload.rules.len());
    let mut rule_ids = HashMap::new();
    for rule in &payload.rules {
        if rule_ids.insert(rule.id.as_str(), ()).is_some() {
            return Err(CompileError::DuplicateId(rule.id.clone()));
        }
        let root = ids.get(&rule.root).copied().ok_or_else(|| CompileError::UnknownReference {
            from: rule.id.clone(),
            to: rule.root.clone(),
        })?;
        rules.push(CompiledRule {
            id: rule.id.clone(),
            root,
            action: RuleAction::from_spec(&rule.id, &rule.action)?,
        });
    }

    let graph = builder.build_with_config(config)?;
    debug!(
        graph = graph.name(),
        nodes = graph.len(),
        rules = rules.len(),
        "Compiled rule graph"
    );

    Ok(CompiledRules {
        graph: Arc::new(graph),
        rules,
        ids,
    })
}
