use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "predicate-eval",
    version,
    about = "Inspect a transaction against a compiled predicate rule graph"
)]
pub struct Cli {
    /// Path to the settings file (defaults to ./predicate.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Rule graph to load (.json, .ron or .packed).
    #[arg(long)]
    pub graph: PathBuf,

    /// Transaction to inspect (JSON, one entry per phase).
    #[arg(long)]
    pub transaction: PathBuf,

    /// Overrides the log format from the settings file.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
