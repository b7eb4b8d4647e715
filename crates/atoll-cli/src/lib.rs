//! Atoll CLI library
//!
//! Argument parsing, configuration loading and the `serve` / `worker`
//! command handlers behind the `atoll` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use error::{CliError, Result};
