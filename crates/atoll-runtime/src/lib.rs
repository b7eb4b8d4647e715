//! Atoll Runtime
//!
//! This crate contains the stateful side of an Atoll control plane:
//! - `NodeSession`: one worker connection, from handshake to teardown
//! - `ProcessHandlerRegistry`: work in flight on a node and its completion handlers
//! - `HandshakeController`: the bounded wait for a node's identity
//! - `InMemoryCluster`: node parameters and the live session set
//! - `TcpConnection` / `NodeAcceptor`: the TCP transport pair and accept loop
//! - `WorkerAgent`: the worker-side responder
//!
//! `atoll-core` provides the message vocabulary, errors and traits this crate
//! is built on.

pub mod acceptor;
pub mod agent;
pub mod cluster;
mod dispatch;
pub mod handlers;
pub mod handshake;
pub mod session;
pub mod tcp;

pub use acceptor::NodeAcceptor;
pub use agent::{AgentError, AgentExit, AgentProfile, EchoExecutor, WorkExecutor, WorkerAgent};
pub use cluster::InMemoryCluster;
pub use handlers::{CompletionHandler, ProcessHandlerRegistry};
pub use handshake::{HandshakeController, HandshakeState};
pub use session::{NodeSession, SessionStats};
pub use tcp::TcpConnection;

// Re-export core types for convenience
pub use atoll_core::{
    AtollConfig, AtollError, ClusterMessage, ClusterRegistry, Connection, MessageListener,
    MessageTag, NodeId, NodeIdentity, NodeParams, Payload, SessionConfig, SessionError,
    TransportConfig, WorkId, WorkResult, WorkUnit,
};
