//! `predicate-eval`: inspects one transaction against a rule graph and
//! writes the inspection record to stdout as a JSON line.

use anyhow::Result;
use clap::Parser;

use predicate_compute::{cli::Cli, logging, run, settings::Settings};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli)?;
    logging::init_logger(settings.log)?;
    let line = run(&cli, &settings)?;
    println!("{line}");
    Ok(())
}
