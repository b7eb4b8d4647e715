//! Node connection acceptor
//!
//! Accepts worker connections, runs each through `NodeSession::connect` on
//! its own task, and adds the sessions that complete the handshake to the
//! cluster.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use atoll_core::{ClusterRegistry, SessionConfig, TransportConfig};

use crate::cluster::InMemoryCluster;
use crate::session::NodeSession;
use crate::tcp::TcpConnection;

pub struct NodeAcceptor {
    listener: TcpListener,
    cluster: Arc<InMemoryCluster>,
    session_config: SessionConfig,
    transport_config: TransportConfig,
}

impl NodeAcceptor {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        cluster: Arc<InMemoryCluster>,
        session_config: SessionConfig,
        transport_config: TransportConfig,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            cluster,
            session_config,
            transport_config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn cluster(&self) -> &Arc<InMemoryCluster> {
        &self.cluster
    }

    /// Accept connections until `shutdown` fires, then close every live
    /// session.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(addr = ?self.listener.local_addr().ok(), "Accepting node connections");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "Accept failed");
                    continue;
                }
            };
            debug!(peer_addr = %peer_addr, "New node connection");

            let cluster = self.cluster.clone();
            let session_config = self.session_config.clone();
            let transport_config = self.transport_config.clone();
            tokio::spawn(async move {
                let registry: Arc<dyn ClusterRegistry> = cluster.clone();
                match NodeSession::connect(
                    TcpConnection::new(stream),
                    registry,
                    &session_config,
                    &transport_config,
                )
                .await
                {
                    Ok(session) => {
                        if !cluster.attach_session(session.clone()) {
                            session.close();
                        }
                    }
                    Err(err) => {
                        warn!(peer_addr = %peer_addr, error = %err, "Dropping node connection");
                    }
                }
            });
        }

        info!(live = self.cluster.live_count(), "Acceptor stopping, closing node sessions");
        self.cluster.close_all();
    }
}
