//! Command-line definition

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sipcheck", version, about = "SIP call scenario verification")]
pub struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, short = 'c', env = "SIPCHECK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SIPCHECK_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyse a WAV recording for tones and beeps
    Analyze(AnalyzeArgs),

    /// Parse a test definition and print its plan
    Validate(ValidateArgs),

    /// Print the effective engine configuration as TOML
    Config,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Recording to analyse
    pub file: PathBuf,

    /// Segment the recording into beeps
    #[arg(long)]
    pub beeps: bool,

    /// Print frame statistics (default unless --beeps is given)
    #[arg(long)]
    pub stats: bool,

    /// Print every analysed frame
    #[arg(long)]
    pub frames: bool,

    /// Only count beeps (and report frames) near this frequency
    #[arg(long, value_name = "HZ")]
    pub target_freq: Option<f32>,

    /// FFT window size (power of two)
    #[arg(long, value_name = "N")]
    pub fft_size: Option<usize>,

    /// Print a single JSON document
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Test definition (JSON)
    pub file: PathBuf,

    /// Treat warnings as failures
    #[arg(long)]
    pub strict: bool,

    /// Print the parsed definition as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_analyze() {
        let cli = Cli::parse_from([
            "sipcheck",
            "analyze",
            "rx.wav",
            "--beeps",
            "--target-freq",
            "1000",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Command::Analyze(args) => {
                assert_eq!(args.file, PathBuf::from("rx.wav"));
                assert!(args.beeps);
                assert_eq!(args.target_freq, Some(1000.0));
                assert!(!args.json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
