use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use stockpile_core::lifecycle::RestartStrategy;
use stockpile_server::{build_state, create_router, spawn_background};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Command line arguments for the stockpile mirror server.
#[derive(Parser, Debug)]
#[command(name = "stockpile-server")]
#[command(about = "Multi-protocol caching mirror server")]
struct Args {
    /// Settings file (JSON, deep-merged over defaults)
    #[arg(short, long, env = "STOCKPILE_SETTINGS")]
    config: Option<PathBuf>,

    /// Listen port (overrides settings)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Listen host (overrides settings)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockpile_server=info,stockpile_core=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings_path = args
        .config
        .clone()
        .or_else(|| Some(stockpile_config::default_settings_path()));
    let mut config = stockpile_config::Config::load(settings_path.as_deref())
        .context("configuration error")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    info!(
        base_dir = %config.server.base_dir.display(),
        database = %config.database.db_type,
        "configuration loaded"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid listen address")?;

    let state = build_state(config, settings_path).await?;
    let background = spawn_background(&state);
    info!(tasks = background.len(), "background loops started");

    // Termination signals drain through the same path as a confirmed
    // graceful restart.
    {
        let lifecycle = state.lifecycle.clone();
        tokio::spawn(async move {
            let terminated = async {
                #[cfg(unix)]
                {
                    use tokio::signal::unix::{SignalKind, signal};
                    let mut sigterm =
                        signal(SignalKind::terminate()).expect("sigterm handler install");
                    let mut sighup = signal(SignalKind::hangup()).expect("sighup handler install");
                    tokio::select! {
                        _ = sigterm.recv() => {},
                        _ = sighup.recv() => {},
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            };
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        warn!(error = %err, "ctrl-c handler failed");
                    }
                }
                _ = terminated => {}
            }
            info!("termination signal received, draining");
            lifecycle.shutdown(RestartStrategy::Graceful).await;
        });
    }

    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "stockpile mirror server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(state.lifecycle.shutdown_signal())
    .await
    .context("server error")?;

    for handle in background {
        handle.abort();
    }
    info!(
        pending = state.lifecycle.pending_requests(),
        "shutdown complete"
    );
    Ok(())
}
