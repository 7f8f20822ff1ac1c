mod analyze;
mod cli;
mod logging;
mod settings;
mod validate;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, Level};

use crate::cli::{Cli, Command};
use crate::logging::{parse_log_level, setup_logging, LoggingConfig};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = parse_log_level(&cli.log_level)?;
    setup_logging(
        LoggingConfig::new(level)
            .with_json(cli.log_json)
            .with_spans(level >= Level::DEBUG)
            .with_file_info(level == Level::TRACE),
    )?;
    debug!("sipcheck v{}", env!("CARGO_PKG_VERSION"));

    let config = settings::load(cli.config.as_deref())?;

    match &cli.command {
        Command::Analyze(args) => {
            analyze::run(args, &config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate(args) => {
            if validate::run(args, &config)? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Config => {
            let text = toml::to_string_pretty(&config).context("Failed to render config")?;
            print!("{}", text);
            Ok(ExitCode::SUCCESS)
        }
    }
}
