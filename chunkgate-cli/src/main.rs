//! chunkgate - the client-facing router of a replicated object-storage
//! cluster.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use chunkgate_cli::api::{api_routes, ApiState};
use chunkgate_cli::config::CliConfig;
use chunkgate_core::control::spawn_pollers;
use chunkgate_core::{MasterClient, Router};
use chunkgate_meta::{MemoryMetaStore, MetaBackend, MetaStore, MySqlMetaStore};

/// chunkgate object-storage router
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Set the log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the router
    Start {
        /// Configuration file; embedded defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured master address
        #[arg(long)]
        master: Option<String>,

        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .parse::<Level>()
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting tracing subscriber")?;

    match cli.command {
        Commands::Start {
            config,
            master,
            port,
        } => {
            let mut config = CliConfig::load(config.as_deref())?;
            if let Some(master) = master {
                config.router.master_addr = master;
            }
            if let Some(port) = port {
                config.router.listen_port = port;
            }
            run(config).await
        }
    }
}

async fn run(config: CliConfig) -> Result<()> {
    let master = Arc::new(
        MasterClient::new(&config.router.master_addr, config.router.request_timeout)
            .context("building master client")?,
    );
    let router = Arc::new(Router::new(config.router.clone(), master));

    // One synchronous round against the master; an unreachable master at
    // startup is fatal, afterwards the pollers absorb failures.
    router
        .bootstrap()
        .await
        .context("initial master synchronization failed")?;

    let meta: Arc<dyn MetaStore> = match config.meta.backend {
        MetaBackend::Mysql => Arc::new(
            MySqlMetaStore::connect(&config.meta)
                .await
                .context("connecting to the metadata database")?,
        ),
        MetaBackend::Memory => {
            info!("using in-memory metadata store; records will not survive a restart");
            Arc::new(MemoryMetaStore::new())
        }
    };

    let pollers = spawn_pollers(Arc::clone(&router));

    let addr: SocketAddr = format!(
        "{}:{}",
        config.router.listen_ip, config.router.listen_port
    )
    .parse()
    .context("parsing listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "chunkgate listening");

    let app = api_routes(ApiState { router, meta });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    for poller in pollers {
        poller.abort();
    }
    info!("chunkgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
}
