mod cluster;
mod connect;
mod documents;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cluster::{ClusterTopology, DatabaseTopology, TcpInfo};
use connect::ConnectArgs;
use documents::{Get, Put};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "docdb-cli")]
#[command(about = "A command-line tool to query a document database cluster")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Show the nodes serving the database")]
    Topology(DatabaseTopology),

    #[command(about = "Show the cluster membership reported by a node")]
    ClusterTopology(ClusterTopology),

    #[command(about = "Show where a node accepts TCP connections")]
    TcpInfo(TcpInfo),

    #[command(about = "Load a document by id")]
    Get(Get),

    #[command(about = "Store a document")]
    Put(Put),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let executor = cli.connect.executor().await?;

    match cli.command {
        Commands::Topology(args) => cluster::handle_topology(&executor, args).await?,
        Commands::ClusterTopology(args) => cluster::handle_cluster_topology(&executor, args).await?,
        Commands::TcpInfo(args) => cluster::handle_tcp_info(&executor, args).await?,
        Commands::Get(args) => documents::handle_get(&executor, args).await?,
        Commands::Put(args) => documents::handle_put(&executor, args).await?,
    }

    Ok(())
}
