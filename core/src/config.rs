//! Evaluation settings.

use serde::{Deserialize, Serialize};

fn default_max_forward_chain() -> usize {
    64
}

/// Tunables for [`GraphEvalState`](crate::GraphEvalState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Longest forwarding chain. `GraphBuilder::build_with_config` rejects
    /// longer chains; evaluation reports one as a cycle.
    #[serde(default = "default_max_forward_chain")]
    pub max_forward_chain: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_forward_chain: default_max_forward_chain(),
        }
    }
}
