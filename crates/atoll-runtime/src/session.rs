//! Node session
//!
//! `NodeSession` is the control-plane side of one worker connection. It owns
//! the transport pair bound to the node's socket, runs the identity handshake,
//! tracks work in flight on the node, and tears everything down exactly once
//! whether the close comes from a caller or from the receiver noticing a
//! disconnect.
//!
//! Inbound message handling lives in `dispatch.rs`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use atoll_core::{
    AtollError, ClusterMessage, ClusterRegistry, Connection, MessageListener, MessageTag, NodeId,
    NodeIdentity, SessionConfig, SessionError, SharedIdentity, TransportConfig, TransportPair,
    WorkResult, WorkUnit,
};
use tracing::{debug, info, warn};

use crate::handlers::{CompletionHandler, ProcessHandlerRegistry};
use crate::handshake::HandshakeController;

// ----------------------------------------------------------------------------
// Session Statistics
// ----------------------------------------------------------------------------

/// Counters for inbound traffic the session had to drop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Completions routed to a waiting handler
    pub completed: u64,
    /// `process` results with no matching dispatch
    pub unmatched_completions: u64,
    /// Messages whose payload did not match their tag
    pub malformed_messages: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub(crate) completed: AtomicU64,
    pub(crate) unmatched_completions: AtomicU64,
    pub(crate) malformed_messages: AtomicU64,
}

impl SessionCounters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            completed: self.completed.load(Ordering::Relaxed),
            unmatched_completions: self.unmatched_completions.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// Node Session
// ----------------------------------------------------------------------------

/// Control-plane session for one worker node
pub struct NodeSession {
    peer_addr: Option<SocketAddr>,
    cluster: Arc<dyn ClusterRegistry>,
    transport: OnceLock<TransportPair>,
    /// True from transport attach until the start of teardown
    ready: AtomicBool,
    /// Set by the receiver before it closes the session
    disconnected: AtomicBool,
    /// Bound exactly once, by the inbound `id` message
    pub(crate) identity: OnceLock<SharedIdentity>,
    pub(crate) handshake: HandshakeController,
    pub(crate) handlers: ProcessHandlerRegistry,
    pub(crate) counters: SessionCounters,
}

impl NodeSession {
    fn new(peer_addr: Option<SocketAddr>, cluster: Arc<dyn ClusterRegistry>) -> Self {
        Self {
            peer_addr,
            cluster,
            transport: OnceLock::new(),
            ready: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            identity: OnceLock::new(),
            handshake: HandshakeController::new(),
            handlers: ProcessHandlerRegistry::new(),
            counters: SessionCounters::default(),
        }
    }

    /// Bind a session to an accepted connection and run the handshake.
    ///
    /// Returns once the node has reported its id and the follow-up
    /// configuration requests are queued. On any failure the session is torn
    /// down before the error is returned, so a failed construction leaves
    /// nothing to clean up.
    pub async fn connect<C: Connection>(
        connection: C,
        cluster: Arc<dyn ClusterRegistry>,
        session_config: &SessionConfig,
        transport_config: &TransportConfig,
    ) -> Result<Arc<NodeSession>, AtollError> {
        let session = Arc::new(NodeSession::new(connection.peer_addr(), cluster));

        let weak: Weak<NodeSession> = Arc::downgrade(&session);
        let listener: Weak<dyn MessageListener> = weak;
        let pair = connection.attach(listener, transport_config)?;
        session.install(pair)?;

        info!(peer_addr = ?session.peer_addr, "Got socket from node");

        let Some(pair) = session.transport.get() else {
            return Err(SessionError::NotReady.into());
        };
        match session
            .handshake
            .run(pair.tx.as_ref(), session_config.handshake.timeout())
            .await
        {
            Ok(id) => {
                info!(node_id = %id, peer_addr = ?session.peer_addr, "Node session ready");
                Ok(session)
            }
            Err(err) => {
                warn!(peer_addr = ?session.peer_addr, error = %err, "Node handshake failed");
                session.close();
                Err(err.into())
            }
        }
    }

    fn install(&self, pair: TransportPair) -> Result<(), SessionError> {
        if self.transport.set(pair).is_err() {
            return Err(SessionError::NotReady);
        }
        self.ready.store(true, Ordering::SeqCst);

        // The receiver may have seen EOF before `ready` was set, in which case
        // its close() was a no-op.
        if self.disconnected.load(Ordering::SeqCst) {
            self.close();
            return Err(SessionError::NotReady);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Number of work units dispatched and not yet completed
    pub fn in_flight(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------------

    pub(crate) fn cluster_lookup(&self, id: NodeId) -> Option<SharedIdentity> {
        self.cluster.lookup(id)
    }

    fn shared_identity(&self) -> Result<&SharedIdentity, SessionError> {
        self.identity.get().ok_or(SessionError::IdentityUnassigned)
    }

    pub(crate) fn read_identity(&self) -> Result<RwLockReadGuard<'_, NodeIdentity>, SessionError> {
        let shared = self.shared_identity()?;
        Ok(shared.read().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    pub(crate) fn write_identity(
        &self,
    ) -> Result<RwLockWriteGuard<'_, NodeIdentity>, SessionError> {
        let shared = self.shared_identity()?;
        Ok(shared.write().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// Snapshot of the node's identity
    pub fn identity(&self) -> Result<NodeIdentity, SessionError> {
        Ok(self.read_identity()?.clone())
    }

    pub fn node_id(&self) -> Result<NodeId, SessionError> {
        Ok(self.read_identity()?.id())
    }

    pub fn host(&self) -> Result<String, SessionError> {
        Ok(self.read_identity()?.host().to_string())
    }

    pub fn user(&self) -> Result<String, SessionError> {
        Ok(self.read_identity()?.user.clone())
    }

    pub fn exec_root(&self) -> Result<String, SessionError> {
        Ok(self.read_identity()?.exec_root.clone())
    }

    pub fn file_root(&self) -> Result<String, SessionError> {
        Ok(self.read_identity()?.file_root.clone())
    }

    /// Set the executable root locally. The node is not told.
    pub fn set_exec_root(&self, path: impl Into<String>) -> bool {
        match self.write_identity() {
            Ok(mut identity) => {
                identity.exec_root = path.into();
                true
            }
            Err(_) => false,
        }
    }

    /// Set the file root locally and push it to the node
    pub fn set_file_root(&self, path: impl Into<String>) -> bool {
        let path = path.into();
        match self.write_identity() {
            Ok(mut identity) => identity.file_root = path.clone(),
            Err(_) => return false,
        }
        self.enqueue(ClusterMessage::text(MessageTag::SetFileRoot, path))
    }

    /// Log label: the node's host once known, else its socket address
    pub(crate) fn label(&self) -> String {
        match self.read_identity() {
            Ok(identity) => identity.host().to_string(),
            Err(_) => self
                .peer_addr
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "<unassigned>".to_string()),
        }
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Queue a message to the node. False if the session is not ready or the
    /// transmitter refused it.
    pub fn enqueue(&self, message: ClusterMessage) -> bool {
        if !self.is_ready() {
            return false;
        }
        match self.transport.get() {
            Some(pair) => pair.tx.enqueue(message),
            None => false,
        }
    }

    /// Dispatch a unit of work, reporting why it was rejected
    ///
    /// The handler is registered before the `process` message is queued, so a
    /// completion can never arrive ahead of its handler.
    pub fn try_submit(
        &self,
        unit: WorkUnit,
        on_complete: Box<dyn CompletionHandler>,
    ) -> Result<(), SessionError> {
        if !self.is_ready() {
            return Err(SessionError::NotReady);
        }

        let work_id = unit.id;
        self.handlers.register(work_id, on_complete)?;

        if !self.enqueue(ClusterMessage::dispatch(unit)) {
            self.handlers.take(work_id);
            return Err(SessionError::NotReady);
        }

        debug!(node = %self.label(), work_id = %work_id, "Dispatched work");
        Ok(())
    }

    /// Dispatch a unit of work. Returns false on a duplicate id or when the
    /// session is not ready.
    pub fn submit<F>(&self, unit: WorkUnit, on_complete: F) -> bool
    where
        F: FnOnce(WorkResult) + Send + Sync + 'static,
    {
        match self.try_submit(unit, Box::new(on_complete)) {
            Ok(()) => true,
            Err(err) => {
                debug!(node = %self.label(), error = %err, "Work rejected");
                false
            }
        }
    }

    /// Threads the node has free: capacity minus work in flight, never
    /// negative. Advisory only; a submit may still race and be rejected.
    pub fn available_capacity(&self) -> usize {
        let capacity = match self.read_identity() {
            Ok(identity) => identity.thread_capacity(),
            Err(_) => return 0,
        };
        let available = capacity.saturating_sub(self.handlers.len());
        debug!(node = %self.label(), available, "Available threads");
        available
    }

    pub fn ping(&self) -> bool {
        self.enqueue(ClusterMessage::new(MessageTag::Ping))
    }

    /// Ask the node to shut down gracefully
    pub fn send_shutdown(&self) -> bool {
        self.enqueue(ClusterMessage::new(MessageTag::Halt))
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Tear the session down. Safe to call any number of times from any
    /// thread; only the first call after the session became ready does
    /// anything.
    ///
    /// Work still in flight is discarded and its handlers are never called.
    pub fn close(&self) {
        if self
            .ready
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let label = self.label();
        self.handshake.abort();

        if let Ok(id) = self.node_id() {
            self.cluster.remove_node(id);
        }

        if let Some(pair) = self.transport.get() {
            if !pair.tx.enqueue(ClusterMessage::new(MessageTag::Halt)) {
                debug!(node = %label, "Could not queue halt");
            }
            pair.tx.close();
            pair.rx.close();
            if let Err(err) = pair.socket.shutdown() {
                warn!(node = %label, error = %err, "Error closing node socket");
            }
        }

        let discarded = self.handlers.clear();
        if discarded > 0 {
            warn!(node = %label, discarded, "Discarded work in flight on closed session");
        }
        info!(node = %label, "Node session closed");
    }
}

impl core::fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NodeSession")
            .field("peer_addr", &self.peer_addr)
            .field("ready", &self.is_ready())
            .field("node_id", &self.node_id().ok())
            .field("in_flight", &self.handlers.len())
            .finish()
    }
}
