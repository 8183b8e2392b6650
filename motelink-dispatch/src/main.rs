use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::{Json, Router, routing::get};
use clap::Parser;
use motelink_dispatch::{
    Config, GatewayState, GatewayStatus, HttpSink, LinkConfig, LogSink, MockLink, PublishSink,
    SinkConfig, StaticLocation, Supervisor,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const LINK_EVENT_QUEUE: usize = 256;

#[derive(Parser)]
#[command(name = "motelink-dispatch")]
#[command(about = "Motelink gateway: collects motion-state streams from peripherals")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "motelink-dispatch.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "motelink_dispatch=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    info!(
        gateway = %config.gateway.name,
        http_addr = %config.server.http_addr,
        targets = ?config.targets,
        "Starting motelink-dispatch"
    );

    match &config.sink {
        SinkConfig::Log => {
            info!("Publishing to log");
            run_gateway(&config, LogSink).await
        }
        SinkConfig::Http { url, timeout_secs } => {
            info!(%url, "Publishing over HTTP");
            let sink = HttpSink::new(url.clone(), std::time::Duration::from_secs(*timeout_secs))?;
            run_gateway(&config, sink).await
        }
    }
}

async fn run_gateway<K: PublishSink>(config: &Config, sink: K) -> color_eyre::Result<()> {
    let cancel = CancellationToken::new();
    let state = GatewayState::new(config.gateway.name.clone());
    let location = StaticLocation::new(config.location.fix()?);

    let (events_tx, events_rx) = mpsc::channel(LINK_EVENT_QUEUE);
    let link = match &config.link {
        LinkConfig::Mock { peers } => {
            let peers = peers
                .iter()
                .map(|peer| peer.build())
                .collect::<color_eyre::Result<Vec<_>>>()?;
            info!(peers = peers.len(), "Using mock link");
            Arc::new(MockLink::new(peers, events_tx))
        }
    };

    let supervisor = Supervisor::new(
        link,
        events_rx,
        sink,
        location,
        config.supervisor(),
        state.clone(),
    );
    let supervisor_handle = tokio::spawn(supervisor.run(cancel.clone()));

    let http_addr = config.server.http_addr;
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state);
    let listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();

    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    }

    cancel.cancel();
    let _ = supervisor_handle.await;

    info!("motelink-dispatch shut down complete");
    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn status_handler(State(state): State<GatewayState>) -> Json<GatewayStatus> {
    Json(state.snapshot().await)
}
