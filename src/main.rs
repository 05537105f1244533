use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hubgate::backend::LocalGitBackend;
use hubgate::{Config, HubServer, RepoRef};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hubgate")]
#[command(about = "Git smart HTTP, LFS and deploy log gateway for a model hub", long_about = None)]
struct Cli {
    /// Config file, defaults to ~/.hubgate/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides storage.data_dir from the config
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Start {
        /// Overrides server.bind_address from the config
        #[arg(long)]
        addr: Option<String>,
    },
    /// Create an empty bare repository
    InitRepo {
        /// Repository as <type>/<namespace>/<name>, e.g. models/alice/demo
        repo: String,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hubgate=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.to_string_lossy().into_owned();
    }

    match cli.command {
        Commands::Start { addr } => {
            if let Some(addr) = addr {
                config.server.bind_address = addr;
            }
            println!("Starting hubgate on {}", config.server.bind_address);
            println!("Data directory: {}", config.storage.data_dir);
            println!("Public URL: {}", config.server.public_domain);
            println!("Deploy units: {}", config.deploy.units.len());

            let server = HubServer::from_config(&config).await?;
            server.run().await?;
        }
        Commands::InitRepo { repo } => {
            let repo: RepoRef = repo.parse()?;

            let backend = LocalGitBackend::new(
                PathBuf::from(&config.storage.data_dir).join("repos"),
                config.storage.max_push_bytes,
            );
            let path = backend
                .init_repo(&repo)
                .await
                .with_context(|| format!("Failed to create {}", repo))?;
            println!("Created {}", repo);
            println!("Path: {}", path.display());
            println!("Clone: {}/{}", config.server.public_domain, repo.git_path());
        }
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
