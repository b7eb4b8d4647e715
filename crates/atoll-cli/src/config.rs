//! Configuration loading
//!
//! The control plane reads an `AtollConfig` from a TOML file. Every section
//! is optional and falls back to its defaults, so an empty file is valid; a
//! control plane with no `[[nodes]]` accepts connections but can never
//! complete a handshake.

use std::collections::HashSet;
use std::path::Path;

use atoll_core::AtollConfig;
use tracing::{info, warn};

use crate::error::{CliError, Result};

/// Load and validate a configuration file
pub fn load_from_file(path: impl AsRef<Path>) -> Result<AtollConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    let config = parse(&raw)?;
    info!(path = %path.display(), nodes = config.nodes.len(), "Loaded configuration");
    Ok(config)
}

/// Load from `path` if given, else use defaults
pub fn load_or_default(path: Option<&Path>) -> Result<AtollConfig> {
    match path {
        Some(path) => load_from_file(path),
        None => {
            info!("Using default configuration");
            Ok(AtollConfig::default())
        }
    }
}

/// Parse and validate TOML configuration text
pub fn parse(raw: &str) -> Result<AtollConfig> {
    let config: AtollConfig = toml::from_str(raw)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &AtollConfig) -> Result<()> {
    if config.session.handshake.timeout_ms == 0 {
        return Err(CliError::Config(
            "session.handshake.timeout_ms must be positive".to_string(),
        ));
    }
    if config.transport.max_frame_len == 0 {
        return Err(CliError::Config("transport.max_frame_len must be positive".to_string()));
    }

    let mut seen = HashSet::new();
    for node in &config.nodes {
        if node.id < 0 {
            return Err(CliError::Config(format!("node id {} is negative", node.id)));
        }
        if !seen.insert(node.id) {
            return Err(CliError::Config(format!("node id {} is listed twice", node.id)));
        }
        if node.thread_capacity == 0 {
            warn!(
                node_id = node.id,
                host = %node.host,
                "Node has no threads and will never be given work"
            );
        }
    }
    Ok(())
}
