//! Atoll Core
//!
//! This crate provides the foundational types for Atoll control-plane sessions:
//! node and work identifiers, the node identity record, the closed control
//! message vocabulary, error types, configuration, and the transport-pair and
//! cluster-registry abstractions that the runtime is written against.
//!
//! It holds no runtime state. The stateful session engine lives in
//! `atoll-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod cluster;
pub mod config;
pub mod errors;
pub mod message;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use cluster::ClusterRegistry;
pub use config::{AtollConfig, HandshakeConfig, NodeParams, SessionConfig, TransportConfig};
pub use errors::{AtollError, MessageError, Result, SessionError, TransportError};
pub use message::{ClusterMessage, MessageTag, Payload, WorkResult, WorkUnit};
pub use transport::{
    Connection, MessageListener, Receiver, SocketHandle, Transmitter, TransportPair,
};
pub use types::{NodeId, NodeIdentity, SharedIdentity, WorkId};
