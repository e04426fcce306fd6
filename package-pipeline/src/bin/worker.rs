//! Package delivery-cost worker
//!
//! Consumes package-created events, computes delivery costs, and writes them
//! back through the storage collaborator until told to stop.

use anyhow::Result;
use delivery_core::{CbrRateSource, CurrencyRateCache, InMemoryPackageStore};
use package_pipeline::{MqConfig, PackageConsumer, PipelineConfig};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    info!("Starting package delivery-cost worker");

    let mq = MqConfig::from_env();
    let pipeline = PipelineConfig::from_env();

    info!(
        "Broker: {}:{}, max retries: {}, rate cache: {} min",
        mq.host, mq.port, pipeline.max_retries, pipeline.cache_duration_minutes
    );

    let source = Arc::new(CbrRateSource::new(
        pipeline.rate_url.clone(),
        pipeline.rate_timeout(),
    )?);
    let rates = Arc::new(CurrencyRateCache::new(source, pipeline.cache_duration()));
    let store = Arc::new(InMemoryPackageStore::new());

    let mut consumer = PackageConsumer::new(mq, pipeline, store, rates);

    // Cooperative shutdown: the in-flight message finishes first
    let stop = consumer.stop_handle();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                stop.stop();
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
            }
        }
    });

    if let Err(e) = consumer.start_consuming().await {
        error!("Worker stopped with error: {}", e);
    }

    consumer.close().await?;
    info!("Worker shut down");

    Ok(())
}
