//! Error types for Atoll
//!
//! Each concern gets its own enum: session-level rejections, malformed control
//! messages, and transport failures. `AtollError` unifies them for callers that
//! only need a single error type.

use crate::message::MessageTag;
use crate::types::{NodeId, WorkId};

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised by a node session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Timed out waiting for node id after {waited_ms}ms")]
    HandshakeTimeout { waited_ms: u64 },
    #[error("Work {work_id} is already in flight on this node")]
    DuplicateWorkId { work_id: WorkId },
    #[error("Session is not ready")]
    NotReady,
    #[error("Node identity has not been assigned")]
    IdentityUnassigned,
    #[error("Cluster registry has no parameters for node {node_id}")]
    UnknownNode { node_id: NodeId },
}

/// A control message whose payload does not match its tag
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("Message '{tag}' requires a payload")]
    MissingPayload { tag: MessageTag },
    #[error("Message '{tag}' expected a {expected} payload, got {actual}")]
    UnexpectedPayload {
        tag: MessageTag,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Unknown message tag '{tag}'")]
    UnknownTag { tag: String },
}

/// Errors from the socket-bound transport pair
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Top-level error type for Atoll
#[derive(Debug, thiserror::Error)]
pub enum AtollError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Malformed message: {0}")]
    Message(#[from] MessageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl AtollError {
    /// True when the error means the session never became usable
    pub fn is_handshake_timeout(&self) -> bool {
        matches!(
            self,
            AtollError::Session(SessionError::HandshakeTimeout { .. })
        )
    }
}

impl From<std::io::Error> for AtollError {
    fn from(err: std::io::Error) -> Self {
        AtollError::Transport(TransportError::Io(err))
    }
}

pub type Result<T> = core::result::Result<T, AtollError>;
