//! Command handlers for the Atoll CLI

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use atoll_core::{AtollConfig, NodeId};
use atoll_runtime::{AgentProfile, EchoExecutor, InMemoryCluster, NodeAcceptor, WorkerAgent};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::{Cli, Commands};
use crate::error::Result;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AtollConfig) -> Result<()> {
        match cli.command {
            Commands::Serve {
                listen,
                status_interval,
            } => Self::handle_serve_command(config, listen, status_interval).await,
            Commands::Worker {
                connect,
                id,
                user,
                exec_root,
                file_root,
            } => {
                let profile = AgentProfile {
                    node_id: NodeId::new(id),
                    user,
                    exec_root,
                    file_root,
                };
                Self::handle_worker_command(config, connect, profile).await
            }
        }
    }

    /// Run the control plane until interrupted
    async fn handle_serve_command(
        config: AtollConfig,
        listen: SocketAddr,
        status_interval: u64,
    ) -> Result<()> {
        let cluster = Arc::new(InMemoryCluster::from_params(config.nodes));
        let acceptor =
            NodeAcceptor::bind(listen, cluster.clone(), config.session, config.transport).await?;
        info!(addr = %acceptor.local_addr()?, "Control plane listening");

        let shutdown = CancellationToken::new();
        let acceptor = tokio::spawn(acceptor.run(shutdown.clone()));

        if status_interval > 0 {
            let cluster = cluster.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(status_interval));
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            info!(
                                live = cluster.live_count(),
                                available_threads = cluster.total_available_capacity(),
                                "Cluster status"
                            );
                        }
                    }
                }
            });
        }

        tokio::signal::ctrl_c().await?;
        info!("Interrupted, shutting down");
        shutdown.cancel();
        if let Err(err) = acceptor.await {
            error!(error = %err, "Acceptor task failed");
        }
        Ok(())
    }

    /// Run a worker agent until the control plane halts or drops it
    async fn handle_worker_command(
        config: AtollConfig,
        connect: SocketAddr,
        profile: AgentProfile,
    ) -> Result<()> {
        let agent = WorkerAgent::new(profile, EchoExecutor, config.transport);
        let exit = agent.connect(connect).await?;
        info!(exit = ?exit, "Worker agent stopped");
        Ok(())
    }
}
