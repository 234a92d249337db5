//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "partsbroker")]
#[command(about = "Partsbroker - broker-mediated car component market", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a market with one broker
    Run {
        /// Number of suppliers
        #[arg(short, long, default_value = "3")]
        suppliers: usize,

        /// Number of consumers
        #[arg(short, long, default_value = "2")]
        consumers: usize,

        /// Stop after this many seconds (runs until Ctrl+C if omitted)
        #[arg(short, long)]
        duration_secs: Option<u64>,

        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override consumer request interval (milliseconds)
        #[arg(long)]
        request_interval_ms: Option<u64>,

        /// Override supplier drift interval (milliseconds)
        #[arg(long)]
        drift_interval_ms: Option<u64>,
    },

    /// Print the default configuration as JSON
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "partsbroker",
            "run",
            "--suppliers",
            "4",
            "-c",
            "1",
            "--duration-secs",
            "30",
            "--request-interval-ms",
            "500",
        ]);

        match cli.command {
            Commands::Run {
                suppliers,
                consumers,
                duration_secs,
                config,
                request_interval_ms,
                drift_interval_ms,
            } => {
                assert_eq!(suppliers, 4);
                assert_eq!(consumers, 1);
                assert_eq!(duration_secs, Some(30));
                assert!(config.is_none());
                assert_eq!(request_interval_ms, Some(500));
                assert!(drift_interval_ms.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_config() {
        let cli = Cli::parse_from(["partsbroker", "config"]);
        assert!(matches!(cli.command, Commands::Config));
    }

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
