//! Command-line interface definitions and parsing

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the control plane and accept worker connections
    Serve {
        /// Address to accept worker connections on
        #[arg(short, long, default_value = "0.0.0.0:7077")]
        listen: SocketAddr,

        /// Seconds between cluster status reports (0 disables them)
        #[arg(long, default_value_t = 30)]
        status_interval: u64,
    },
    /// Run a worker agent that echoes dispatched work back
    Worker {
        /// Control plane address
        #[arg(long)]
        connect: SocketAddr,

        /// Node id to report during the handshake
        #[arg(long)]
        id: i64,

        /// Username to report
        #[arg(long, default_value = "")]
        user: String,

        /// Executable root to report
        #[arg(long, default_value = "")]
        exec_root: String,

        /// File root to report
        #[arg(long, default_value = "")]
        file_root: String,
    },
}
