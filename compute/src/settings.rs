use std::path::PathBuf;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use predicate_core::EvalConfig;
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};

const DEFAULT_CONFIG_NAME: &str = "predicate";

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_fail_open() -> bool {
    true
}

fn default_max_forward_chain() -> usize {
    EvalConfig::default().max_forward_chain
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    /// Report evaluation errors as `failopen:*` instead of failing the run.
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,
    #[serde(default = "default_max_forward_chain")]
    pub max_forward_chain: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log: default_log_format(),
            fail_open: default_fail_open(),
            max_forward_chain: default_max_forward_chain(),
        }
    }
}

impl Settings {
    /// Loads settings from the `--config` file (required when given,
    /// otherwise `./predicate.toml` if present) and `PREDICATE__*`
    /// environment variables. `--log-format` wins over both.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match cli.config_path() {
            Some(path) => builder.add_source(File::from(path.clone()).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("PREDICATE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        if let Some(format) = cli.log_format {
            settings.log = format;
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_forward_chain > 0,
            "max_forward_chain must be at least 1 (got {})",
            self.max_forward_chain
        );
        Ok(())
    }

    pub fn eval_config(&self) -> EvalConfig {
        EvalConfig {
            max_forward_chain: self.max_forward_chain,
        }
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

impl Cli {
    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config.as_ref()
    }
}
