use anyhow::Result;
use clap::{Parser, Subcommand};
use raftlease::upgrades::{drop_legacy_leases, run_upgrade_steps, StepContext};
use raftlease::{create_raft_router, create_router, LeaseDaemon, NodeConfig, StaticStateBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "raftlease")]
#[command(about = "Raft-replicated lease daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pending upgrade steps, then serve leases.
    Run {
        #[arg(short, long, default_value = "raftlease.toml")]
        config: PathBuf,
    },
    Init {
        #[arg(short, long, default_value = "raftlease.toml")]
        config: PathBuf,
    },
    /// Run the upgrade steps without starting the daemon.
    Upgrade {
        #[arg(short, long, default_value = "raftlease.toml")]
        config: PathBuf,

        /// Remove the legacy lease store. Only once every controller has
        /// migrated.
        #[arg(long)]
        drop_legacy: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "raftlease=info,openraft=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config: config_path } => {
            run_daemon(config_path).await?;
        }
        Commands::Init { config: config_path } => {
            init_config(config_path)?;
        }
        Commands::Upgrade {
            config: config_path,
            drop_legacy,
        } => {
            run_upgrade(config_path, drop_legacy).await?;
        }
    }

    Ok(())
}

fn load_config(config_path: &PathBuf) -> Result<NodeConfig> {
    if config_path.exists() {
        info!("Loading config from {:?}", config_path);
        NodeConfig::load(config_path)
    } else {
        info!("Config file not found, using defaults");
        Ok(NodeConfig::default())
    }
}

async fn run_daemon(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;

    let daemon = Arc::new(LeaseDaemon::from_config(config.clone()).await?);

    let api_router = create_router(daemon.clone());
    let raft_router = create_raft_router(daemon.node().clone());
    let router = api_router.merge(raft_router);

    let listener = TcpListener::bind(&config.listen_addr()).await?;
    info!("API server listening on {}", config.listen_addr());

    let daemon_clone = daemon.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("API server error: {}", e);
        }
    });

    let daemon_handle = tokio::spawn(async move {
        if let Err(e) = daemon_clone.run().await {
            error!("Daemon error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    daemon.shutdown();

    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let _ = daemon_handle.await;
    })
    .await;
    api_handle.abort();

    Ok(())
}

async fn run_upgrade(config_path: PathBuf, drop_legacy: bool) -> Result<()> {
    let config = load_config(&config_path)?;
    let ctx = StepContext::new(
        config.agent_config(),
        StaticStateBackend::from_config(&config),
    );

    run_upgrade_steps(&ctx).await?;
    if drop_legacy {
        drop_legacy_leases(&ctx).await?;
    }

    println!("Upgrade steps complete for {}", config.agent_version);
    Ok(())
}

fn init_config(config_path: PathBuf) -> Result<()> {
    if config_path.exists() {
        anyhow::bail!("Config file already exists: {:?}", config_path);
    }

    let config = NodeConfig::default();
    config.save(&config_path)?;
    println!("Created config file: {:?}", config_path);
    println!("\nEdit the config file to:");
    println!("  - Set this node's machine_id");
    println!("  - List every controller under [[cluster.members]]");
    println!("  - Point cluster.legacy_leases_file at leases to migrate");

    Ok(())
}
