//! Worker-side responder
//!
//! `WorkerAgent` is the other end of a node session: it connects to the
//! control plane, answers the bootstrap requests from its profile, runs
//! dispatched work through a `WorkExecutor`, and stops when told to halt or
//! when the control plane goes away.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use atoll_core::{
    ClusterMessage, MessageTag, NodeId, TransportConfig, TransportError, WorkResult, WorkUnit,
};

use crate::tcp::{encode_frame, framed};

// ----------------------------------------------------------------------------
// Work Execution
// ----------------------------------------------------------------------------

/// Runs one unit of dispatched work on the worker
#[async_trait]
pub trait WorkExecutor: Send + Sync + 'static {
    async fn execute(&self, unit: WorkUnit) -> WorkResult;
}

/// Returns each work body unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoExecutor;

#[async_trait]
impl WorkExecutor for EchoExecutor {
    async fn execute(&self, unit: WorkUnit) -> WorkResult {
        WorkResult::new(unit.id, unit.body)
    }
}

// ----------------------------------------------------------------------------
// Agent
// ----------------------------------------------------------------------------

/// What the agent reports about itself during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub node_id: NodeId,
    pub user: String,
    pub exec_root: String,
    pub file_root: String,
}

impl AgentProfile {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            user: String::new(),
            exec_root: String::new(),
            file_root: String::new(),
        }
    }
}

/// Why the agent stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    /// The control plane sent `halt`
    Halted,
    /// The stream ended without a `halt`
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Failed to connect to control plane at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub struct WorkerAgent<E: WorkExecutor> {
    profile: AgentProfile,
    executor: Arc<E>,
    config: TransportConfig,
}

impl<E: WorkExecutor> WorkerAgent<E> {
    pub fn new(profile: AgentProfile, executor: E, config: TransportConfig) -> Self {
        Self {
            profile,
            executor: Arc::new(executor),
            config,
        }
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    /// Connect to the control plane and serve until halted or disconnected
    pub async fn connect(self, addr: SocketAddr) -> Result<AgentExit, AgentError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| AgentError::Connect { addr, source })?;
        info!(addr = %addr, node_id = %self.profile.node_id, "Connected to control plane");
        self.run(stream).await
    }

    /// Serve an established stream
    pub async fn run(self, stream: TcpStream) -> Result<AgentExit, AgentError> {
        stream.set_nodelay(true).map_err(TransportError::from)?;
        let (mut reader, mut writer) = framed(stream, &self.config);
        let (replies, mut outbound) = mpsc::unbounded_channel::<ClusterMessage>();

        let config = self.config.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                let frame = match encode_frame(&message, &config) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(tag = %message.tag, error = %err, "Dropping unencodable reply");
                        continue;
                    }
                };
                if let Err(err) = writer.send(frame).await {
                    warn!(error = %err, "Control plane stream closed while writing");
                    break;
                }
            }
            if let Err(err) = SinkExt::<Bytes>::close(&mut writer).await {
                debug!(error = %err, "Error closing write half");
            }
        });

        let mut file_root = self.profile.file_root.clone();
        let exit = loop {
            let bytes = match reader.next().await {
                Some(Ok(bytes)) => bytes,
                Some(Err(err)) => {
                    warn!(error = %err, "Read error on control plane stream");
                    break AgentExit::Disconnected;
                }
                None => break AgentExit::Disconnected,
            };

            let message = match ClusterMessage::decode(&bytes) {
                Ok(message) => message,
                Err(err) => {
                    warn!(error = %err, "Dropping undecodable frame");
                    continue;
                }
            };

            let tag = message.tag;
            let reply = match tag {
                MessageTag::GetId => Some(ClusterMessage::id(self.profile.node_id)),
                MessageTag::GetUser => Some(ClusterMessage::text(
                    MessageTag::User,
                    self.profile.user.clone(),
                )),
                MessageTag::GetExecRoot => Some(ClusterMessage::text(
                    MessageTag::ExecRoot,
                    self.profile.exec_root.clone(),
                )),
                MessageTag::GetFileRoot => Some(ClusterMessage::text(
                    MessageTag::FileRoot,
                    file_root.clone(),
                )),
                MessageTag::SetFileRoot => {
                    match message.text_payload() {
                        Ok(path) => {
                            debug!(file_root = %path, "File root updated");
                            file_root = path.to_string();
                        }
                        Err(err) => warn!(error = %err, "Ignoring malformed setfileroot"),
                    }
                    None
                }
                MessageTag::Ping => Some(ClusterMessage::new(MessageTag::Ping)),
                MessageTag::Process => {
                    match message.into_work_unit() {
                        Ok(unit) => {
                            debug!(work_id = %unit.id, "Running work");
                            let executor = self.executor.clone();
                            let replies = replies.clone();
                            tokio::spawn(async move {
                                let result = executor.execute(unit).await;
                                let _ = replies.send(ClusterMessage::completion(result));
                            });
                        }
                        Err(err) => warn!(error = %err, "Ignoring malformed process request"),
                    }
                    None
                }
                MessageTag::Halt => {
                    info!(node_id = %self.profile.node_id, "Halt requested");
                    break AgentExit::Halted;
                }
                MessageTag::Id | MessageTag::User | MessageTag::ExecRoot | MessageTag::FileRoot => {
                    warn!(tag = %tag, "Ignoring worker-bound reply from control plane");
                    None
                }
            };

            if let Some(reply) = reply {
                let _ = replies.send(reply);
            }
        };

        // The writer finishes once running work has reported back.
        drop(replies);
        let _ = writer_task.await;
        info!(node_id = %self.profile.node_id, exit = ?exit, "Worker agent stopped");
        Ok(exit)
    }
}
