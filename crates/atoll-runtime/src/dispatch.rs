//! Inbound message dispatch
//!
//! The receiver half of the transport pair calls into the session through
//! `MessageListener`. Every inbound message is interpreted here. A message
//! whose payload does not fit its tag is logged and dropped; nothing in this
//! path may take the session down.

use std::sync::atomic::Ordering;

use atoll_core::{
    ClusterMessage, MessageError, MessageListener, MessageTag, NodeId, NodeIdentity, SessionError,
};
use tracing::{debug, info, warn};

use crate::session::NodeSession;

impl NodeSession {
    fn dispatch(&self, message: ClusterMessage) -> Result<(), MessageError> {
        match message.tag {
            MessageTag::Process => {
                let result = message.into_work_result()?;
                let work_id = result.id;
                if self.handlers.complete(result) {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                    info!(node = %self.label(), work_id = %work_id, "Got process results");
                } else {
                    self.counters
                        .unmatched_completions
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        node = %self.label(),
                        work_id = %work_id,
                        "Got results for work that was never dispatched"
                    );
                }
            }
            MessageTag::Ping => {
                info!(node = %self.label(), "Received ping");
            }
            MessageTag::User => {
                self.update_identity(&message, |identity, user| identity.user = user)?;
            }
            MessageTag::ExecRoot => {
                self.update_identity(&message, |identity, root| identity.exec_root = root)?;
            }
            MessageTag::FileRoot => {
                self.update_identity(&message, |identity, root| identity.file_root = root)?;
            }
            MessageTag::Id => {
                let id = message.node_id()?;
                if let Err(err) = self.assign_identity(id) {
                    warn!(peer_addr = ?self.peer_addr(), error = %err, "Node id not assigned");
                }
            }
            MessageTag::GetId
            | MessageTag::GetUser
            | MessageTag::GetExecRoot
            | MessageTag::GetFileRoot
            | MessageTag::SetFileRoot
            | MessageTag::Halt => {
                warn!(
                    node = %self.label(),
                    tag = %message.tag,
                    "Ignoring outbound-only message from node"
                );
            }
        }
        Ok(())
    }

    /// Apply a string payload to the identity. Requires an assigned identity.
    fn update_identity<F>(&self, message: &ClusterMessage, apply: F) -> Result<(), MessageError>
    where
        F: FnOnce(&mut NodeIdentity, String),
    {
        if self.identity.get().is_none() {
            warn!(
                peer_addr = ?self.peer_addr(),
                tag = %message.tag,
                "Got identity field before node id"
            );
            return Ok(());
        }

        let value = message.text_payload()?.to_string();
        if let Ok(mut identity) = self.write_identity() {
            debug!(
                node_id = %identity.id(),
                tag = %message.tag,
                value = %value,
                "Updating node identity"
            );
            apply(&mut identity, value);
        }
        Ok(())
    }

    /// Bind the registry's identity for `id`. A repeated `id` is ignored.
    fn assign_identity(&self, id: NodeId) -> Result<(), SessionError> {
        if self.identity.get().is_some() {
            warn!(node = %self.label(), node_id = %id, "Ignoring repeated id message");
            return Ok(());
        }

        let shared = self
            .cluster_lookup(id)
            .ok_or(SessionError::UnknownNode { node_id: id })?;

        if self.identity.set(shared).is_err() {
            warn!(node_id = %id, "Identity already bound");
            return Ok(());
        }
        debug!(node_id = %id, "Got id message, identity bound");
        self.handshake.assign(id);
        Ok(())
    }
}

impl MessageListener for NodeSession {
    fn handle_message(&self, message: ClusterMessage) {
        let tag = message.tag;
        if let Err(err) = self.dispatch(message) {
            self.counters
                .malformed_messages
                .fetch_add(1, Ordering::Relaxed);
            warn!(node = %self.label(), tag = %tag, error = %err, "Dropped malformed message");
        }
    }

    fn stream_closed(&self) {
        info!(node = %self.label(), "Stream closed");
        self.mark_disconnected();
        self.close();
    }
}
