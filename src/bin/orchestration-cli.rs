use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use shard_orchestrator::config::loader::{load_config, load_toml};
use shard_orchestrator::config::RepositoryConfig;
use shard_orchestrator::orchestration::{ConfigCenter, OrchestrationNode, SchemaConfiguration};
use shard_orchestrator::registry::{self, CoordinationRepository};

#[derive(Parser)]
#[command(name = "orchestration-cli")]
#[command(about = "Inspect and edit the orchestration registry", long_about = None)]
struct Cli {
    /// Orchestrator config file; supplies registry, namespace and schema
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated registry servers, overrides the config file
    #[arg(short, long)]
    servers: Option<String>,

    /// Authentication digest, e.g. user:password
    #[arg(long)]
    digest: Option<String>,

    #[arg(long)]
    namespace: Option<String>,

    #[arg(long)]
    schema: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value stored at a path
    Get { path: String },
    /// List the children of a path
    Ls { path: String },
    /// Store a durable value at a path
    Put { path: String, value: String },
    /// Delete a path and everything beneath it
    Rm { path: String },
    /// Take a replica out of read rotation
    Disable { data_source: String },
    /// Return a replica to read rotation
    Enable { data_source: String },
    /// Upload a local schema file (rule, data sources, props, disabled flags)
    Push { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let base = match &cli.config {
        Some(path) => load_config(path)?,
        None => Default::default(),
    };
    let mut repository_config: RepositoryConfig = base.registry.clone();
    if let Some(servers) = &cli.servers {
        repository_config.server_lists = servers.clone();
    }
    if cli.digest.is_some() {
        repository_config.digest = cli.digest.clone();
    }
    // One-shot session; expires soon even if the process dies before close
    repository_config.time_to_live_secs = 10;

    let namespace = cli.namespace.clone().or(base.orchestration.namespace.clone());
    let schema = cli.schema.clone().unwrap_or(base.orchestration.schema.clone());
    let node = OrchestrationNode::new(namespace.as_deref(), schema);

    let repository = registry::create_repository(&repository_config).await?;
    let result = run(cli.command, repository.clone(), node).await;
    repository.close().await;
    result
}

async fn run(
    command: Commands,
    repository: Arc<dyn CoordinationRepository>,
    node: OrchestrationNode,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match command {
        Commands::Get { path } => match repository.get(&path).await? {
            Some(value) => println!("{}", value),
            None => return Err(format!("{} does not exist", path).into()),
        },
        Commands::Ls { path } => {
            for child in repository.get_children_keys(&path).await? {
                println!("{}", child);
            }
        }
        Commands::Put { path, value } => {
            repository.persist(&path, &value).await?;
            println!("Stored {}", path);
        }
        Commands::Rm { path } => {
            repository.delete(&path).await?;
            println!("Deleted {}", path);
        }
        Commands::Disable { data_source } => {
            let center = ConfigCenter::new(repository, node);
            center.persist_disabled(&data_source, true).await?;
            println!("Disabled {} in schema {}", data_source, center.node().schema());
        }
        Commands::Enable { data_source } => {
            let center = ConfigCenter::new(repository, node);
            center.persist_disabled(&data_source, false).await?;
            println!("Enabled {} in schema {}", data_source, center.node().schema());
        }
        Commands::Push { file } => {
            let local: SchemaConfiguration = load_toml(&file)?;
            if local.rule.is_empty() {
                return Err(format!("{} has no table rules", file.display()).into());
            }
            let center = ConfigCenter::new(repository, node);
            center.persist_all(&local).await?;
            println!(
                "Pushed {} tables and {} data sources to {}",
                local.rule.tables.len(),
                local.data_sources.len(),
                center.node().schema_path()
            );
        }
    }
    Ok(())
}
