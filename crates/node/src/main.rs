// Path: crates/node/src/main.rs
//! The `shutter-node` binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use shutter_node::{Config, Node};

#[derive(Debug, Parser)]
#[command(name = "shutter-node", about = "Shutter threshold-decryption relay node")]
struct Cli {
    /// Path of the node's database file.
    #[arg(long, env = "SHUTTER_NODE_DB_PATH", default_value = "shutter-node.redb")]
    db_path: PathBuf,

    /// Listen address of the decryption-key gRPC service.
    #[arg(long, env = "SHUTTER_NODE_GRPC_ADDR", default_value = "127.0.0.1:9191")]
    grpc_listen_addr: SocketAddr,

    /// Log filter, e.g. `info` or `sync=debug,keys=trace`.
    #[arg(long, env = "SHUTTER_NODE_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let node = Node::start(Config {
        db_path: cli.db_path,
        grpc_listen_addr: cli.grpc_listen_addr,
    })?;
    node.run_until_stopped().await
}
