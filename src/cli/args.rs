//! Command line argument parsing
//!
//! This module handles CLI argument parsing with subcommands:
//! - `run`: Transcode one or more local files through the queue
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write a default user configuration file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Run(RunConfig),
    ShowConfig,
    InitConfig,
}

#[derive(Debug)]
pub struct RunConfig {
    pub inputs: Vec<PathBuf>,
    pub config_override: Option<PathBuf>,
    pub concurrency: Option<usize>,
    /// Output container, without the leading dot
    pub format: Option<String>,
    pub verbose: bool,
}

#[derive(Debug, Parser)]
#[command(name = "tq")]
#[command(author = "Transcode Queue Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Queue media files for transcoding with ffmpeg, a few at a time")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Transcode files, printing service events as JSON lines
    Run {
        /// Input media files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Maximum number of concurrent encoder processes
        #[arg(short = 'j', long = "concurrency")]
        concurrency: Option<usize>,
        /// Output container format (mp4, mkv, webm, ...)
        #[arg(short = 'f', long = "format")]
        format: Option<String>,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Show configuration discovery information
    ShowConfig,
    /// Create ~/.tq/config.toml with default settings
    InitConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Run {
                inputs,
                config,
                concurrency,
                format,
                verbose,
            }) => {
                if *concurrency == Some(0) {
                    return Err("--concurrency must be at least 1".to_string());
                }
                let format = match format.as_deref().map(Self::normalize_format) {
                    Some(f) if f.is_empty() => return Err("--format must not be empty".to_string()),
                    other => other,
                };

                Ok(ExecutionMode::Run(RunConfig {
                    inputs: inputs.clone(),
                    config_override: config.clone(),
                    concurrency: *concurrency,
                    format,
                    verbose: *verbose,
                }))
            }
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            Some(Commands::InitConfig) => Ok(ExecutionMode::InitConfig),
            None => Err(
                "No command specified. Use 'tq --help' to see available commands.".to_string(),
            ),
        }
    }

    /// `.MKV` and `mkv` name the same container
    fn normalize_format(format: &str) -> String {
        format.trim().trim_start_matches('.').to_ascii_lowercase()
    }
}
