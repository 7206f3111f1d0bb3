use std::time::Instant;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;
use crate::rules::{Decision, Inspection, RuleHit};

const DEFAULT_FILTER: &str = "info";

pub fn init_logger(format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // Diagnostics go to stderr; stdout carries only inspection records.
    match format {
        LogFormat::Json => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .try_init()
            .map_err(|err| anyhow!(err))?,
        LogFormat::Text => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .try_init()
            .map_err(|err| anyhow!(err))?,
    }

    Ok(())
}

/// One record per inspected transaction.
#[derive(Debug, Serialize)]
pub struct InspectionLog {
    pub transaction_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub graph_name: String,
    pub graph_hash: String,
    pub final_action: String,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub hits: Vec<RuleHit>,
    pub phases_run: usize,
    pub elapsed_us: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    start: Option<Instant>,
}

impl InspectionLog {
    pub fn new(graph_name: &str, graph_hash: &str, start: Instant) -> Self {
        Self {
            transaction_id: None,
            timestamp: Utc::now(),
            graph_name: graph_name.to_string(),
            graph_hash: graph_hash.to_string(),
            final_action: "unknown".to_string(),
            blocked: false,
            status_code: None,
            rule: None,
            hits: Vec::new(),
            phases_run: 0,
            elapsed_us: 0,
            error: None,
            start: Some(start),
        }
    }

    pub fn set_final_action(&mut self, action: &str) {
        self.final_action = action.to_string();
    }

    pub fn set_error(&mut self, error: impl ToString) {
        self.error = Some(error.to_string());
    }

    /// Copies the outcome of an inspection into the record.
    pub fn add_inspection(&mut self, inspection: &Inspection) {
        self.transaction_id = Some(inspection.transaction_id.clone());
        self.hits = inspection.hits.clone();
        self.phases_run = inspection.phases_run;
        self.set_final_action(inspection.decision.as_str());
        match &inspection.decision {
            Decision::Block {
                rule, status_code, ..
            } => {
                self.blocked = true;
                self.status_code = Some(*status_code);
                self.rule = Some(rule.clone());
            }
            Decision::Allow { rule } => self.rule = Some(rule.clone()),
            Decision::NoMatch => {}
        }
    }

    pub fn finalize(&mut self) {
        if let Some(start) = self.start {
            self.elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use predicate_core::Phase;

    #[test]
    fn test_block_inspection_record() {
        let inspection = Inspection {
            transaction_id: "t1".to_string(),
            decision: Decision::Block {
                rule: "block-sqli".to_string(),
                status_code: 406,
                message: "SQL injection".to_string(),
            },
            hits: vec![RuleHit {
                rule: "block-sqli".to_string(),
                phase: Phase::Request,
                action: "block",
            }],
            phases_run: 2,
        };

        let mut log = InspectionLog::new("waf", "0123456789abcdef", Instant::now());
        log.add_inspection(&inspection);
        log.finalize();

        let json: serde_json::Value = serde_json::from_str(&log.to_json().unwrap()).unwrap();
        assert_eq!(json["transaction_id"], "t1");
        assert_eq!(json["final_action"], "blocked");
        assert_eq!(json["blocked"], true);
        assert_eq!(json["status_code"], 406);
        assert_eq!(json["rule"], "block-sqli");
        assert_eq!(json["hits"][0]["phase"], "request");
        assert_eq!(json["phases_run"], 2);
        assert!(json.get("error").is_none());
        assert!(json.get("start").is_none());
    }

    #[test]
    fn test_fail_open_record() {
        let mut log = InspectionLog::new("waf", "none", Instant::now());
        log.set_final_action("failopen:eval_error");
        log.set_error("forwarding cycle");
        log.finalize();

        let json: serde_json::Value = serde_json::from_str(&log.to_json().unwrap()).unwrap();
        assert_eq!(json["final_action"], "failopen:eval_error");
        assert_eq!(json["error"], "forwarding cycle");
        assert_eq!(json["blocked"], false);
        assert!(json["transaction_id"].is_null());
    }
}
