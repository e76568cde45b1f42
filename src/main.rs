use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use voice_relay::{ServerConfig, routes, state::AppState};

/// How often relay counters are logged
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Voice relay - duplex voice chat between browsers and a realtime speech API
#[derive(Parser, Debug)]
#[command(name = "voice-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Needed before any wss:// upstream connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path)?
    } else {
        ServerConfig::from_env()?
    };

    let address = config.address();
    info!(
        model = %config.model,
        voice = %config.voice,
        commit_policy = config.commit_policy.name(),
        audio_framing = %config.audio_framing,
        "Starting server on {address}"
    );

    let app_state = AppState::new(config).await;
    let stats_task = tokio::spawn(log_stats(app_state.clone()));

    let app = routes::create_router(app_state.clone());

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| anyhow!("Failed to bind {}: {}", address, e))?;
    info!("Server listening on http://{}", listener.local_addr()?);

    let sessions = app_state.sessions.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!(clients = sessions.len(), "Shutdown signal received, closing sessions");
        sessions.close_all();
    })
    .await?;

    stats_task.abort();
    info!("Server stopped");
    Ok(())
}

async fn log_stats(app_state: Arc<AppState>) {
    let mut interval = tokio::time::interval(STATS_LOG_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        let stats = app_state.stats.snapshot();
        info!(
            clients = app_state.sessions.len(),
            frames_received = stats.frames_received,
            frames_forwarded = stats.frames_forwarded,
            frames_suppressed = stats.frames_suppressed,
            audio_deltas_sent = stats.audio_deltas_sent,
            audio_deltas_dropped = stats.audio_deltas_dropped,
            responses_completed = stats.responses_completed,
            interruptions = stats.interruptions,
            "Relay stats"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
