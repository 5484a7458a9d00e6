//! CLI module for the edgeweave tool.
//!
//! This module provides the command-line interface for planning and
//! applying edge resource declarations.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
