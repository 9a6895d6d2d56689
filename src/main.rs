//! horo-feed-ingest binary entrypoint.
//! Loads the pipeline config, starts one poller + worker pool per feed and
//! serves `/metrics` until ctrl-c.

use anyhow::Context;
use horo_feed_ingest::config::load_config_default;
use horo_feed_ingest::metrics::Metrics;
use horo_feed_ingest::PipelineRouter;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9000";

/// `RUST_LOG` filter (default `info`); `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = load_config_default()?;
    let metrics = Metrics::init()?;

    // Fails fast on any configuration error; nothing is polled before this passes.
    let router = PipelineRouter::from_config(&cfg).await?;
    tracing::info!(feeds = ?router.feed_names(), "pipeline configured");

    let addr: SocketAddr = std::env::var("METRICS_ADDR")
        .unwrap_or_else(|_| DEFAULT_METRICS_ADDR.to_string())
        .parse()
        .context("parsing METRICS_ADDR")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics listener on {addr}"))?;
    let app = metrics.router();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    let running = router.start();
    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");

    running.shutdown().await;
    server.abort();
    Ok(())
}
