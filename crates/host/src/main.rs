use anyhow::{Context, Result};
use clap::Parser;
use mcpbroker_host::builtin::{calculator_server, files_server};
use mcpbroker_host::{gateway, Host, HostConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mcpbroker")]
#[command(about = "Consent-checked MCP host speaking line-delimited JSON-RPC on stdio", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "mcpbroker.toml", env = "MCPBROKER_CONFIG")]
    config: PathBuf,

    /// Serve this directory as resource://files/...
    #[arg(long)]
    files_root: Option<PathBuf>,

    /// Allow calls that no consent grant covers
    #[arg(long)]
    auto_consent: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Stdout carries protocol traffic, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "mcpbroker=info,mcpbroker_host=info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = HostConfig::load(&args.config).context("Failed to load configuration")?;
    if args.auto_consent {
        config.consent.auto_consent = true;
    }
    if let Some(root) = args.files_root {
        config.builtin.files_root = Some(root);
    }

    tracing::info!(auto_consent = config.consent.auto_consent, "Starting mcpbroker");

    let host = Host::new(config.consent.auto_consent);

    // The host holds servers weakly; they live as long as this list
    let mut servers = Vec::new();
    if config.builtin.calculator {
        servers.push(Arc::new(calculator_server().await));
    }
    if let Some(root) = &config.builtin.files_root {
        if !root.is_dir() {
            anyhow::bail!("files root {} is not a directory", root.display());
        }
        servers.push(Arc::new(files_server(root.clone(), config.resources.clone()).await));
    }
    for server in &servers {
        host.register_mcp_server(server).await;
    }
    tracing::info!("Registered {} servers", servers.len());

    for grant in config.grants {
        host.register_consent(grant).await;
    }

    gateway::serve(&host, tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("Gateway failed")
}
