//! Transaction processing phases.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An ordered stage of transaction processing.
///
/// Later phases make more transaction data available, so a node that could
/// not decide its result in one phase may be able to in a later one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Outside of any phase, e.g. while initializing literals.
    #[default]
    None,
    RequestHeader,
    Request,
    ResponseHeader,
    Response,
    Postprocess,
    Logging,
}

impl Phase {
    /// Every phase a transaction passes through, in engine order.
    pub const ALL: [Phase; 6] = [
        Phase::RequestHeader,
        Phase::Request,
        Phase::ResponseHeader,
        Phase::Response,
        Phase::Postprocess,
        Phase::Logging,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::None => "none",
            Phase::RequestHeader => "request_header",
            Phase::Request => "request",
            Phase::ResponseHeader => "response_header",
            Phase::Response => "response",
            Phase::Postprocess => "postprocess",
            Phase::Logging => "logging",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
