//! TradeFlow - Account Balance Feed
//!
//! Watches a single brokerage account over the venue's streaming endpoint and
//! logs its balance stream, standing in for the dashboard push layer.

use std::env;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tradeflow_balance_feed::{
    BalanceFeedError, BalanceHandler, BalanceListener, BalanceUpdate, CloseInfo, ConnectionState,
    FeedConfig,
};

/// Logs every notification channel
struct LoggingHandler;

impl BalanceHandler for LoggingHandler {
    fn on_balance(&self, update: &BalanceUpdate) {
        info!(
            account_id = %update.account_id,
            balance = %update.balance,
            currency = %update.currency,
            as_of = ?update.as_of,
            "Balance update"
        );
    }

    fn on_error(&self, error: &BalanceFeedError) {
        error!(error = %error, "Feed error");
    }

    fn on_status(&self, status: ConnectionState, detail: Option<&str>) {
        info!(status = ?status, detail = ?detail, "Feed status");
    }

    fn on_close(&self, info: &CloseInfo) {
        warn!(
            code = ?info.code,
            reason = ?info.reason,
            clean = info.clean,
            "Transport closed"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting TradeFlow Balance Feed");

    // Load configuration
    let config = FeedConfig::load()?;
    let token = env::var("BROKER_ACCESS_TOKEN")
        .map_err(|_| anyhow::anyhow!("BROKER_ACCESS_TOKEN is not set"))?;
    let account_id = env::var("BROKER_ACCOUNT_ID")
        .map_err(|_| anyhow::anyhow!("BROKER_ACCOUNT_ID is not set"))?;
    info!(account_id = %account_id, endpoint = %config.ws_endpoint, "Configuration loaded");

    // Start health check server
    tokio::spawn(async {
        if let Err(e) = start_health_server().await {
            warn!(error = %e, "Health server error");
        }
    });

    // Start the balance listener; it connects immediately
    let listener = BalanceListener::spawn(config, token, account_id, Arc::new(LoggingHandler))?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, closing listener");
    listener.close(true).await;

    Ok(())
}

/// Start HTTP server for health checks and metrics
async fn start_health_server() -> anyhow::Result<()> {
    use std::net::SocketAddr;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics));

    let addr = SocketAddr::from(([0, 0, 0, 0], 9090));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "balance-feed",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics() -> String {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
