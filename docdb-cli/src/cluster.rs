use anyhow::{Context, Result};
use clap::Parser;
use docdb_client::commands::{GetClusterTopologyCommand, GetTcpInfoCommand};
use docdb_client::RequestExecutor;

#[derive(Debug, Parser)]
pub struct DatabaseTopology {
    #[arg(long, help = "Ask the cluster again instead of printing the topology fetched at startup")]
    pub refresh: bool,
}

#[derive(Debug, Parser)]
pub struct ClusterTopology {}

#[derive(Debug, Parser)]
pub struct TcpInfo {
    #[arg(long, short = 't', default_value = "docdb-cli", help = "Tag identifying the caller")]
    pub tag: String,
}

pub async fn handle_topology(executor: &RequestExecutor, args: DatabaseTopology) -> Result<()> {
    if args.refresh {
        executor.refresh_topology().await?;
    }
    let topology = executor.topology();
    println!("{}", serde_json::to_string_pretty(topology.as_ref())?);
    Ok(())
}

pub async fn handle_cluster_topology(
    executor: &RequestExecutor,
    _args: ClusterTopology,
) -> Result<()> {
    let mut command = GetClusterTopologyCommand::new();
    executor.execute(&mut command).await?;
    let response = command
        .result
        .context("the cluster returned no topology")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

pub async fn handle_tcp_info(executor: &RequestExecutor, args: TcpInfo) -> Result<()> {
    let mut command = GetTcpInfoCommand::new(args.tag);
    executor.execute(&mut command).await?;
    let info = command.result.context("the node returned no tcp info")?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
