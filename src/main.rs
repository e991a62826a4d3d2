//! CrowdGuard - live crowd-density telemetry ingestion.
//!
//! # API Endpoints
//!
//! - `GET /snapshot` - The live reading and its revision
//! - `GET /history` - Rolling history of recent readings
//! - `GET /events` - Surge event log
//! - `GET /view` - All three from the same update
//! - `GET /stats` - Ingest counters and uptime
//! - `POST /telemetry` - Queue a raw telemetry payload
//! - `GET /health` - Health check

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crowdguard::aggregation::StateAggregator;
use crowdguard::api::{AppState, router};
use crowdguard::config::Config;
use crowdguard::subscription::{TcpLineFeed, channel, spawn_ingest_loop};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("crowdguard=info".parse()?))
        .init();

    let config = Config::from_env()?;

    info!(
        port = config.port,
        history_capacity = config.aggregator.history_capacity.get(),
        event_log_cap = ?config.aggregator.event_log_cap,
        channel_capacity = config.channel_capacity.get(),
        feed_addr = ?config.feed_addr,
        "Starting CrowdGuard"
    );

    let aggregator = Arc::new(StateAggregator::new(config.aggregator));
    let cancel = CancellationToken::new();

    let (publisher, rx) = channel(config.channel_capacity.get());
    let ingest = spawn_ingest_loop(Arc::clone(&aggregator), rx, cancel.clone());

    if let Some(feed_addr) = config.feed_addr {
        let feed = TcpLineFeed::bind(feed_addr).await?;
        info!(addr = %feed.local_addr()?, "TCP telemetry feed listening");
        feed.spawn(publisher.clone(), cancel.clone());
    }

    let app = router(AppState {
        aggregator,
        publisher,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "CrowdGuard is listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => {
                    warn!(error = %e, "Cannot listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
            }
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    ingest.await?;

    Ok(())
}
