//! CLI module for stackplan.
//!
//! This module provides the command-line interface for planning,
//! applying and inspecting stacks.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::OutputFormatter;
