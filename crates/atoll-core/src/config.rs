//! Centralized Configuration Management
//!
//! Configuration structures for the handshake, node sessions, the transport
//! pair, and the node parameters used to seed a cluster registry.

use core::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Handshake Configuration
// ----------------------------------------------------------------------------

/// Bound on the wait for a node to report its id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Maximum wait for the `id` message, in milliseconds
    pub timeout_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 100_000, // 1000 polls of 100ms
        }
    }
}

impl HandshakeConfig {
    /// Short timeout for tests
    pub fn testing() -> Self {
        Self { timeout_ms: 500 }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for a single node session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub handshake: HandshakeConfig,
}

impl SessionConfig {
    pub fn testing() -> Self {
        Self {
            handshake: HandshakeConfig::testing(),
        }
    }
}

// ----------------------------------------------------------------------------
// Transport Configuration
// ----------------------------------------------------------------------------

/// Configuration for the socket-bound transport pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest accepted frame in bytes
    pub max_frame_len: usize,
    /// How long a closing writer may spend flushing queued messages
    pub drain_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_len: 16 * 1024 * 1024,
            drain_timeout_ms: 5_000,
        }
    }
}

impl TransportConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Node Parameters
// ----------------------------------------------------------------------------

/// Static parameters of a node known to the cluster registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeParams {
    pub id: i64,
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub exec_root: String,
    #[serde(default)]
    pub file_root: String,
    #[serde(default = "default_thread_capacity")]
    pub thread_capacity: usize,
}

fn default_thread_capacity() -> usize {
    1
}

// ----------------------------------------------------------------------------
// Top-level Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for an Atoll control plane
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtollConfig {
    pub session: SessionConfig,
    pub transport: TransportConfig,
    pub nodes: Vec<NodeParams>,
}
