//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// appsync - Application synchronizer
#[derive(Parser, Debug)]
#[command(name = "appsync")]
#[command(version)]
#[command(about = "Drives cluster state toward declared Application resources")]
#[command(
    long_about = "appsync watches Application resources, generates the objects each one needs, applies them in order, deletes what is no longer wanted and reports the outcome in status and events."
)]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info", env = "APPSYNC_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "APPSYNC_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller until interrupted
    Run {
        /// Configuration file (TOML, or JSON by extension)
        #[arg(short, long, env = "APPSYNC_CONFIG")]
        config: Option<PathBuf>,

        /// YAML file of Applications to load into the local store at startup
        #[arg(short, long)]
        applications: Option<PathBuf>,
    },

    /// Validate configuration and print the effective values
    CheckConfig {
        /// Configuration file (TOML, or JSON by extension)
        #[arg(short, long, env = "APPSYNC_CONFIG")]
        config: Option<PathBuf>,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines
    Text,
    /// One JSON object per line
    Json,
}
