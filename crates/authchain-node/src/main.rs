//! AuthChain Node - decision ledger service.
//!
//! This is the main entry point for running the ledger and for offline
//! verification of a ledger file.

use anyhow::Context;
use authchain_ledger::{Blockchain, LedgerService};
use authchain_node::api::{cors_layer, create_router, AppState};
use authchain_node::config::NodeConfig;
use authchain_node::mailbox::MailboxWatcher;
use authchain_node::observability::{init_logging, LogFormat};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// AuthChain Node - tamper-evident record of AI-agent tool decisions
#[derive(Parser, Debug)]
#[command(name = "authchain-node")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ledger node (default)
    Serve(ServeArgs),

    /// Verify a ledger file and exit
    Verify {
        /// Ledger file (defaults to the configured data_dir/ledger_file)
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug, Default)]
struct ServeArgs {
    /// API listen address
    #[arg(long)]
    api_addr: Option<SocketAddr>,

    /// Data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable the file mailbox watcher
    #[arg(long)]
    mailbox: bool,

    /// Mailbox directory
    #[arg(long)]
    mailbox_dir: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(self, config: &mut NodeConfig) {
        if let Some(addr) = self.api_addr {
            config.api_addr = addr;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(dir) = self.mailbox_dir {
            config.mailbox.dir = dir;
            config.mailbox.enabled = true;
        }
        if self.mailbox {
            config.mailbox.enabled = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = NodeConfig::load(&cli.config)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => {
            args.apply(&mut config);
            init_logging(&config.log_level, config.log_format);
            config.validate()?;
            serve(config).await
        }
        Command::Verify { ledger } => {
            init_logging(&config.log_level, config.log_format);
            let path = ledger.unwrap_or_else(|| config.ledger_path());
            verify(path)
        }
    }
}

fn verify(path: PathBuf) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("ledger file {} does not exist", path.display());
    }
    let chain = Blockchain::load_snapshot(&path)
        .with_context(|| format!("ledger {} failed verification", path.display()))?;

    println!(
        "ledger {} is valid: {} blocks, tip {}",
        path.display(),
        chain.len(),
        chain.chain_hash()
    );
    Ok(())
}

async fn serve(config: NodeConfig) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting AuthChain node");
    tracing::info!(
        api_addr = %config.api_addr,
        data_dir = %config.data_dir.display(),
        mailbox = config.mailbox.enabled,
        "Node configuration"
    );

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.data_dir.display()
        )
    })?;

    // A corrupt ledger stops startup here.
    let ledger = Arc::new(
        LedgerService::open(
            config.ledger_path(),
            config.consensus.to_consensus_config(),
        )
        .context("failed to open ledger")?,
    );

    for seed in &config.validators {
        ledger
            .add_validator(&seed.id, &seed.name, seed.public_key.clone())
            .with_context(|| format!("failed to register validator {}", seed.id))?;
    }
    if ledger.list_active_validators().is_empty() {
        tracing::warn!("No validators registered; decisions stay pending until one is added");
    }

    let sweeper = ledger.spawn_expiry_sweeper();

    let mailbox = config.mailbox.enabled.then(|| {
        let watcher = MailboxWatcher::new(
            ledger.clone(),
            config.mailbox.dir.clone(),
            config.mailbox.poll_interval(),
        );
        tokio::spawn(async move {
            if let Err(e) = watcher.run().await {
                tracing::error!(error = %e, "Mailbox watcher stopped");
            }
        })
    });

    let app = create_router(
        AppState::new(ledger.clone()),
        cors_layer(&config.cors_origins),
    );

    let listener = tokio::net::TcpListener::bind(config.api_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.api_addr))?;

    tracing::info!(addr = %config.api_addr, "Node is ready. Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    sweeper.abort();
    if let Some(handle) = mailbox {
        handle.abort();
    }
    ledger
        .persist()
        .context("failed to save ledger on shutdown")?;

    tracing::info!(length = ledger.chain().len(), "AuthChain node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
