//! Control message vocabulary
//!
//! A control message is a tag drawn from a fixed vocabulary plus an optional
//! payload. The payload is a tagged variant, so a receiver checks its shape
//! against what the tag expects instead of casting. Work bodies are opaque
//! bytes: the session only needs the work id to route a completion.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::MessageError;
use crate::types::{NodeId, WorkId};

// ----------------------------------------------------------------------------
// Message Tags
// ----------------------------------------------------------------------------

/// Closed set of control message tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageTag {
    /// Request identity assignment (out)
    GetId,
    /// Assigned node id (in)
    Id,
    /// Request the node's username (out)
    GetUser,
    /// Username (in)
    User,
    /// Request the executable root path (out)
    GetExecRoot,
    /// Executable root path (in)
    ExecRoot,
    /// Request the file root path (out)
    GetFileRoot,
    /// File root path (in)
    FileRoot,
    /// Push a file root update (out)
    SetFileRoot,
    /// Work dispatch (out) or work completion (in)
    Process,
    /// Liveness signal (both)
    Ping,
    /// Request graceful remote shutdown (out)
    Halt,
}

impl MessageTag {
    pub const ALL: [MessageTag; 12] = [
        MessageTag::GetId,
        MessageTag::Id,
        MessageTag::GetUser,
        MessageTag::User,
        MessageTag::GetExecRoot,
        MessageTag::ExecRoot,
        MessageTag::GetFileRoot,
        MessageTag::FileRoot,
        MessageTag::SetFileRoot,
        MessageTag::Process,
        MessageTag::Ping,
        MessageTag::Halt,
    ];

    /// Wire name of the tag
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageTag::GetId => "getid",
            MessageTag::Id => "id",
            MessageTag::GetUser => "getuser",
            MessageTag::User => "user",
            MessageTag::GetExecRoot => "getexecroot",
            MessageTag::ExecRoot => "execroot",
            MessageTag::GetFileRoot => "getfileroot",
            MessageTag::FileRoot => "fileroot",
            MessageTag::SetFileRoot => "setfileroot",
            MessageTag::Process => "process",
            MessageTag::Ping => "ping",
            MessageTag::Halt => "halt",
        }
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageTag {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| MessageError::UnknownTag { tag: s.to_string() })
    }
}

// ----------------------------------------------------------------------------
// Payloads
// ----------------------------------------------------------------------------

/// One unit of remote work, as dispatched to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: WorkId,
    pub body: Vec<u8>,
}

impl WorkUnit {
    pub fn new(id: WorkId, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }
}

/// Completed unit of remote work, carrying the id it was dispatched with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkResult {
    pub id: WorkId,
    pub body: Vec<u8>,
}

impl WorkResult {
    pub fn new(id: WorkId, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }
}

/// Message payload variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Id(i64),
    Text(String),
    Work(WorkUnit),
    Result(WorkResult),
}

impl Payload {
    /// Short shape name used in error reports
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Id(_) => "id",
            Payload::Text(_) => "text",
            Payload::Work(_) => "work",
            Payload::Result(_) => "result",
        }
    }
}

// ----------------------------------------------------------------------------
// Cluster Message
// ----------------------------------------------------------------------------

/// Wire-level unit exchanged with the transport pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMessage {
    pub tag: MessageTag,
    pub payload: Option<Payload>,
}

impl ClusterMessage {
    /// Message with no payload
    pub fn new(tag: MessageTag) -> Self {
        Self { tag, payload: None }
    }

    pub fn with_payload(tag: MessageTag, payload: Payload) -> Self {
        Self {
            tag,
            payload: Some(payload),
        }
    }

    pub fn id(id: NodeId) -> Self {
        Self::with_payload(MessageTag::Id, Payload::Id(id.as_i64()))
    }

    pub fn text(tag: MessageTag, text: impl Into<String>) -> Self {
        Self::with_payload(tag, Payload::Text(text.into()))
    }

    pub fn dispatch(unit: WorkUnit) -> Self {
        Self::with_payload(MessageTag::Process, Payload::Work(unit))
    }

    pub fn completion(result: WorkResult) -> Self {
        Self::with_payload(MessageTag::Process, Payload::Result(result))
    }

    /// Encode for the wire
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode from the wire
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    fn payload(&self) -> Result<&Payload, MessageError> {
        self.payload
            .as_ref()
            .ok_or(MessageError::MissingPayload { tag: self.tag })
    }

    fn unexpected(&self, expected: &'static str, actual: &Payload) -> MessageError {
        MessageError::UnexpectedPayload {
            tag: self.tag,
            expected,
            actual: actual.kind(),
        }
    }

    /// Payload as an assigned node id
    pub fn node_id(&self) -> Result<NodeId, MessageError> {
        match self.payload()? {
            Payload::Id(id) => Ok(NodeId::new(*id)),
            other => Err(self.unexpected("id", other)),
        }
    }

    /// Payload as a string
    pub fn text_payload(&self) -> Result<&str, MessageError> {
        match self.payload()? {
            Payload::Text(text) => Ok(text),
            other => Err(self.unexpected("text", other)),
        }
    }

    /// Payload as a work unit to run
    pub fn work_unit(&self) -> Result<&WorkUnit, MessageError> {
        match self.payload()? {
            Payload::Work(unit) => Ok(unit),
            other => Err(self.unexpected("work", other)),
        }
    }

    /// Consume the message, yielding its work unit
    pub fn into_work_unit(self) -> Result<WorkUnit, MessageError> {
        match self.payload {
            Some(Payload::Work(unit)) => Ok(unit),
            Some(other) => Err(MessageError::UnexpectedPayload {
                tag: self.tag,
                expected: "work",
                actual: other.kind(),
            }),
            None => Err(MessageError::MissingPayload { tag: self.tag }),
        }
    }

    /// Consume the message, yielding its work result
    pub fn into_work_result(self) -> Result<WorkResult, MessageError> {
        match self.payload {
            Some(Payload::Result(result)) => Ok(result),
            Some(other) => Err(MessageError::UnexpectedPayload {
                tag: self.tag,
                expected: "result",
                actual: other.kind(),
            }),
            None => Err(MessageError::MissingPayload { tag: self.tag }),
        }
    }
}

impl From<MessageTag> for ClusterMessage {
    fn from(tag: MessageTag) -> Self {
        Self::new(tag)
    }
}
