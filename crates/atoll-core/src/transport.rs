//! Transport pair abstraction
//!
//! A node session talks to its socket through a transport pair: a queued
//! transmitter and a receiver task that delivers inbound messages and a
//! disconnect notification back to a `MessageListener`. Framing and
//! serialization belong to the implementation, not to the session.

use std::net::SocketAddr;
use std::sync::Weak;

use crate::config::TransportConfig;
use crate::errors::TransportError;
use crate::message::ClusterMessage;

// ----------------------------------------------------------------------------
// Transport Halves
// ----------------------------------------------------------------------------

/// Outbound half of a transport pair
pub trait Transmitter: Send + Sync {
    /// Queue a message for sending. Returns false if the transmitter can no
    /// longer send.
    fn enqueue(&self, message: ClusterMessage) -> bool;

    /// Stop sending. Messages still queued may be dropped.
    fn close(&self);
}

/// Inbound half of a transport pair
pub trait Receiver: Send + Sync {
    /// Stop delivering messages to the listener
    fn close(&self);
}

/// Handle on the socket both halves are bound to
pub trait SocketHandle: Send + Sync {
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Close the underlying socket
    fn shutdown(&self) -> std::io::Result<()>;
}

/// Callbacks delivered by the receiver half
pub trait MessageListener: Send + Sync {
    /// Handle one inbound message. Must not panic on malformed input.
    fn handle_message(&self, message: ClusterMessage);

    /// The stream hit EOF or a read error. Delivered at most once.
    fn stream_closed(&self);
}

/// Transmitter, receiver and socket bound to one connection
pub struct TransportPair {
    pub tx: Box<dyn Transmitter>,
    pub rx: Box<dyn Receiver>,
    pub socket: Box<dyn SocketHandle>,
}

impl core::fmt::Debug for TransportPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransportPair")
            .field("peer_addr", &self.socket.peer_addr())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// An accepted connection that has not yet been bound to a session
pub trait Connection: Send + 'static {
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Bind a transport pair to this connection. The listener is held weakly
    /// so the session owning the pair can be dropped.
    fn attach(
        self,
        listener: Weak<dyn MessageListener>,
        config: &TransportConfig,
    ) -> Result<TransportPair, TransportError>;
}
