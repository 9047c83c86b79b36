//! Rice server binary.

use anyhow::{Context, Result};
use clap::Parser;
use rice_core::config::RiceConfig;
use rice_server::api;
use rice_server::state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Hybrid code-search server.
#[derive(Debug, Parser)]
#[command(name = "rice-server", version, about)]
struct Cli {
    /// Path to a TOML config file; environment and defaults apply beneath
    #[arg(long, env = "RICE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(long)]
    port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long, env = "RICE_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves when SIGINT, SIGTERM or SIGQUIT arrives.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
            _ = sigquit.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = RiceConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.server.data_dir.display(),
        "starting rice-server"
    );

    let state = AppState::new(config.clone())
        .await
        .context("initializing application state")?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parsing bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("listening on http://{}", addr);

    let app = api::build_router(state.clone());
    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Flip readiness first so load balancers stop routing here
            // while in-flight requests drain.
            shutdown_state.set_ready(false);
        })
        .await
        .context("server error")?;

    state.shutdown().await;
    Ok(())
}
