//! Passage - multi-tenant tunnel gateway edge
//!
//! One public listener that routes every request and upgrade either to
//! a tenant's tunnel backend or to the gateway's own control plane.

use anyhow::{Context, Result};
use clap::Parser;
use passage_auth::JwtAuthFactory;
use passage_gateway::{control_router, ControlState, Dispatcher, EdgeServer, ForwardingProxy};
use passage_registry::{key_thumbprint, ActiveTunnel, MemoryRegistry};
use passage_session::MemorySessions;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Passage - multi-tenant tunnel gateway edge
#[derive(Parser, Debug)]
#[command(name = "passage")]
#[command(about = "Passage - multi-tenant tunnel gateway edge")]
#[command(version)]
struct Cli {
    /// Address to listen on for all inbound traffic
    #[arg(long, env = "PASSAGE_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Gateway base hostname; the control plane answers on
    /// auth.<base> and api.<base>, tenants on <env>.<base>
    #[arg(long, env = "PASSAGE_BASE_HOST")]
    base_host: String,

    /// Scheme used when building externally visible URLs
    #[arg(long, env = "PASSAGE_EXTERNAL_SCHEME", default_value = "https")]
    external_scheme: String,

    /// Secondary identity provider base URL (e.g., https://idp.example)
    #[arg(long, env = "PASSAGE_IDP_URL")]
    idp_url: Option<String>,

    /// JSON file of tunnels to register at startup
    #[arg(long, env = "PASSAGE_TUNNELS_FILE")]
    tunnels_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Tunnel entry in the seed file
#[derive(Debug, Deserialize)]
struct SeedTunnel {
    env_id: String,
    /// Tenant public key, PEM encoded
    public_key: String,
    #[serde(default)]
    access: serde_json::Value,
    #[serde(default)]
    meta: serde_json::Value,
    /// Backend address traffic for this tunnel is forwarded to
    backend: Option<String>,
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

/// Register tunnels from the seed file and attach their backends.
fn load_seed_tunnels(
    path: &Path,
    base_host: &str,
    registry: &MemoryRegistry,
    proxy: &ForwardingProxy,
) -> Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tunnels file {}", path.display()))?;
    let seeds: Vec<SeedTunnel> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse tunnels file {}", path.display()))?;

    let mut registered = 0;
    for seed in seeds {
        let hostname = format!("{}.{}", seed.env_id, base_host);
        let thumbprint = key_thumbprint(&seed.public_key);

        registry
            .register(ActiveTunnel {
                env_id: seed.env_id.clone(),
                hostname: hostname.clone(),
                public_key: seed.public_key,
                public_key_thumbprint: thumbprint,
                access: seed.access,
                meta: seed.meta,
            })
            .with_context(|| format!("Failed to register tunnel {}", seed.env_id))?;

        match seed.backend {
            Some(backend) => proxy.attach(&hostname, &backend),
            None => warn!("Tunnel {} has no backend; its traffic will 404", seed.env_id),
        }
        registered += 1;
    }
    Ok(registered)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    info!(
        "Passage {} starting (commit {}, built {})",
        env!("GIT_TAG"),
        env!("GIT_HASH"),
        env!("BUILD_TIME")
    );
    info!("Base host: {}", cli.base_host);
    if let Some(ref idp) = cli.idp_url {
        info!("Identity provider: {}", idp);
    }

    let registry = Arc::new(MemoryRegistry::new());
    let sessions = Arc::new(MemorySessions::new());
    let proxy = Arc::new(ForwardingProxy::new());

    if let Some(ref path) = cli.tunnels_file {
        let registered = load_seed_tunnels(path, &cli.base_host, &registry, &proxy)?;
        info!("Registered {} seed tunnel(s) from {}", registered, path.display());
    }

    let control = control_router(ControlState {
        registry: registry.clone(),
        auth_factory: Arc::new(JwtAuthFactory),
        sessions,
        base_host: cli.base_host.clone(),
        external_scheme: cli.external_scheme,
        idp_url: cli.idp_url,
    });

    let dispatcher = Arc::new(Dispatcher::new(cli.base_host, proxy, control));
    let server = EdgeServer::new(dispatcher);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let listen = cli.listen;
    let server_task = tokio::spawn(async move { server.run(listen).await });

    tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = server_task => {
            match result {
                Ok(Ok(())) => info!("Server stopped normally"),
                Ok(Err(e)) => {
                    error!("Server error: {:#}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("Server task panicked: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    info!("Passage stopped");
    Ok(())
}
