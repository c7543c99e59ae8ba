//! CLI-specific functionality for the transcode queue
//!
//! This module contains all CLI-related code including argument parsing
//! and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, ExecutionMode, RunConfig};
pub use config::ConfigDiscovery;
