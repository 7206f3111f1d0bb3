//! Phase driver: runs transactions through a compiled rule graph.
//!
//! The compiled graph is shared; each transaction gets its own
//! [`GraphEvalState`]. As every phase arrives its fields are appended to the
//! transaction, then the root of every rule that has not fired yet is
//! evaluated. A rule fires the first time its root becomes truthy.

use std::sync::Arc;

use predicate_core::{EvalConfig, EvalError, Graph, GraphEvalState, Phase, TransactionData};
use serde::Serialize;
use tracing::{debug, info};

use super::compile::{CompiledRules, RuleAction};
use super::types::TransactionPayload;

/// Outcome of inspecting a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// A block rule fired
    Block {
        rule: String,
        status_code: u16,
        message: String,
    },
    /// An allow rule fired before any block rule
    Allow { rule: String },
    /// No terminal rule fired
    NoMatch,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Block { .. } => "blocked",
            Decision::Allow { .. } => "allowed",
            Decision::NoMatch => "nomatch",
        }
    }
}

/// A rule that fired, and the phase it fired in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleHit {
    pub rule: String,
    pub phase: Phase,
    pub action: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub transaction_id: String,
    pub decision: Decision,
    pub hits: Vec<RuleHit>,
    pub phases_run: usize,
}

/// Evaluates transactions against one compiled rule set.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: CompiledRules,
    config: EvalConfig,
}

impl RuleEngine {
    pub fn new(rules: CompiledRules) -> Self {
        Self::with_config(rules, EvalConfig::default())
    }

    pub fn with_config(rules: CompiledRules, config: EvalConfig) -> Self {
        Self { rules, config }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.rules.graph
    }

    pub fn rules(&self) -> &CompiledRules {
        &self.rules
    }

    /// Inspects one transaction, phase by phase.
    ///
    /// Stops early once a block or allow rule fires. Errors abort the
    /// transaction; the caller decides whether to fail open.
    pub fn inspect(&self, payload: &TransactionPayload) -> Result<Inspection, EvalError> {
        let id = payload
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let mut tx = TransactionData::new(id.clone());
        let mut ges = GraphEvalState::with_config(Arc::clone(&self.rules.graph), self.config);
        ges.initialize_all(&tx)?;

        let mut fired = vec![false; self.rules.rules.len()];
        let mut hits = Vec::new();
        let mut decision = Decision::NoMatch;
        let mut phases_run = 0;

        'phases: for data in &payload.phases {
            tx.set_phase(data.phase);
            for (name, items) in &data.fields {
                for item in items {
                    tx.append_field(name.clone(), item.clone());
                }
            }
            phases_run += 1;
            debug!(transaction = %id, phase = %data.phase, fields = data.fields.len(), "Running phase");

            for (rule, fired) in self.rules.rules.iter().zip(fired.iter_mut()) {
                if *fired {
                    continue;
                }
                ges.eval(rule.root, &tx)?;
                if !ges.value(rule.root)?.is_truthy() {
                    continue;
                }

                *fired = true;
                info!(transaction = %id, rule = %rule.id, phase = %data.phase, action = rule.action.as_str(), "Rule fired");
                hits.push(RuleHit {
                    rule: rule.id.clone(),
                    phase: data.phase,
                    action: rule.action.as_str(),
                });

                match &rule.action {
                    RuleAction::Block {
                        status_code,
                        message,
                    } => {
                        decision = Decision::Block {
                            rule: rule.id.clone(),
                            status_code: *status_code,
                            message: message.clone(),
                        };
                        break 'phases;
                    }
                    RuleAction::Allow => {
                        decision = Decision::Allow {
                            rule: rule.id.clone(),
                        };
                        break 'phases;
                    }
                    RuleAction::Log => {}
                }
            }
        }

        Ok(Inspection {
            transaction_id: id,
            decision,
            hits,
            phases_run,
        })
    }
}
