//! Predicate rule engine.
//!
//! Loads a serialized rule graph, compiles it once into a shared
//! [`predicate_core::Graph`], and inspects transactions against it phase by
//! phase. Each inspection produces one [`logging::InspectionLog`] record.
//!
//! Loading and evaluation failures fail open when `fail_open` is set: the
//! transaction is reported as `failopen:*` instead of aborting the run.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

pub mod cli;
pub mod logging;
pub mod rules;
pub mod settings;

use logging::InspectionLog;
use rules::{OperatorRegistry, RuleEngine};
use settings::Settings;

/// Inspects the transaction at `transaction_path` against the graph at
/// `graph_path` using the built-in operator catalog.
pub fn inspect_files(
    graph_path: &Path,
    transaction_path: &Path,
    settings: &Settings,
) -> Result<InspectionLog> {
    inspect_files_with(graph_path, transaction_path, settings, &OperatorRegistry::builtin())
}

/// Like [`inspect_files`], compiling the graph against `registry`.
pub fn inspect_files_with(
    graph_path: &Path,
    transaction_path: &Path,
    settings: &Settings,
    registry: &OperatorRegistry,
) -> Result<InspectionLog> {
    let start = Instant::now();

    let mut transaction = rules::load_transaction_from_file(transaction_path)
        .with_context(|| format!("loading transaction {}", transaction_path.display()))?;
    // Every record, including fail-open ones, carries the id the engine uses.
    let transaction_id = transaction
        .id
        .get_or_insert_with(|| uuid::Uuid::now_v7().to_string())
        .clone();

    let loaded = match rules::load_graph_from_file(graph_path) {
        Ok(loaded) => loaded,
        Err(err) => {
            let mut log = InspectionLog::new("", "none", start);
            log.transaction_id = Some(transaction_id);
            return fail_open(
                settings,
                log,
                "failopen:graph_load_error",
                anyhow::Error::new(err)
                    .context(format!("loading graph {}", graph_path.display())),
            );
        }
    };
    let graph_name = loaded.payload.name.clone().unwrap_or_default();
    let mut log = InspectionLog::new(&graph_name, &loaded.digest, start);
    log.transaction_id = Some(transaction_id);

    let eval_config = settings.eval_config();
    let compiled = match rules::compile_graph_with_config(&loaded.payload, registry, &eval_config) {
        Ok(compiled) => compiled,
        Err(err) => {
            return fail_open(settings, log, "failopen:graph_compile_error", err.into());
        }
    };
    info!(
        graph = %graph_name,
        hash = %loaded.digest,
        nodes = compiled.graph.len(),
        rules = compiled.rules.len(),
        "Loaded rule graph"
    );

    let engine = RuleEngine::with_config(compiled, eval_config);
    match engine.inspect(&transaction) {
        Ok(inspection) => {
            log.add_inspection(&inspection);
            log.finalize();
            Ok(log)
        }
        Err(err) => fail_open(settings, log, "failopen:eval_error", err.into()),
    }
}

fn fail_open(
    settings: &Settings,
    mut log: InspectionLog,
    action: &str,
    err: anyhow::Error,
) -> Result<InspectionLog> {
    if !settings.fail_open {
        return Err(err);
    }
    warn!(action, error = %format!("{err:#}"), "Inspection failed (fail-open)");
    log.set_final_action(action);
    log.set_error(format!("{err:#}"));
    log.finalize();
    Ok(log)
}

/// Entry point of the `predicate-eval` binary. Returns the JSON record line.
pub fn run(cli: &cli::Cli, settings: &Settings) -> Result<String> {
    let log = inspect_files(&cli.graph, &cli.transaction, settings)?;
    log.to_json()
}
