use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tickets_rs::{
    bus::Bus,
    clients::{ReceiptsClient, SpreadsheetsClient},
    config::Config,
    Service, ServiceDeps,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting tickets service...");

    // Fail fast on bad configuration, before anything connects
    let config = Config::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        bus_type = ?config.bus_type,
        "Configuration loaded"
    );

    let bus = Bus::connect(&config).await?;

    let http = reqwest::Client::new();
    let receipts = Arc::new(ReceiptsClient::new(http.clone(), &config.gateway_addr));
    let spreadsheets = Arc::new(SpreadsheetsClient::new(http, &config.gateway_addr));

    let service = Service::new(ServiceDeps {
        bus,
        receipts,
        spreadsheets,
        retry: config.retry.clone(),
        consumer_group_prefix: config.consumer_group_prefix.clone(),
    })?;

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    service.run(listener, shutdown).await?;
    Ok(())
}
