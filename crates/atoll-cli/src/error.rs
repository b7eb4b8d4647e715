//! Error handling for the Atoll CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Atoll error: {0}")]
    Atoll(#[from] atoll_core::AtollError),

    #[error("Worker agent error: {0}")]
    Agent(#[from] atoll_runtime::AgentError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
