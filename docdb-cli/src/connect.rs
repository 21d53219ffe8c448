use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use docdb_client::{ExecutorConfig, ReadBalancePolicy, RequestExecutor};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Args)]
pub struct ConnectArgs {
    #[arg(
        long,
        short = 'u',
        global = true,
        default_value = "http://127.0.0.1:8080",
        help = "Url of a cluster node; repeat to give several"
    )]
    pub url: Vec<String>,

    #[arg(
        long,
        short = 'd',
        global = true,
        default_value = "default",
        help = "The database to run commands against"
    )]
    pub database: String,

    #[arg(long, global = true, value_enum, help = "Overrides the read balance policy of the config")]
    pub read_balance: Option<ReadBalanceArg>,

    #[arg(long, short = 'c', global = true, help = "Path to a YAML executor config")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum ReadBalanceArg {
    None,
    RoundRobin,
    FastestNode,
}

impl From<ReadBalanceArg> for ReadBalancePolicy {
    fn from(arg: ReadBalanceArg) -> Self {
        match arg {
            ReadBalanceArg::None => ReadBalancePolicy::None,
            ReadBalanceArg::RoundRobin => ReadBalancePolicy::RoundRobin,
            ReadBalanceArg::FastestNode => ReadBalancePolicy::FastestNode,
        }
    }
}

impl ConnectArgs {
    pub async fn executor(&self) -> Result<RequestExecutor> {
        let mut config = match &self.config {
            Some(path) => ExecutorConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ExecutorConfig::default(),
        };
        if let Some(policy) = self.read_balance {
            config.read_balance = policy.into();
        }

        let executor = RequestExecutor::builder()
            .urls(self.url.iter().cloned())
            .database(self.database.clone())
            .config(config)
            .build()
            .await
            .context("failed to create the request executor")?;
        debug!(?executor, nodes = executor.topology().nodes.len(), "connected");
        Ok(executor)
    }
}
