mod workflows;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weft_durable::prelude::*;

use workflows::{
    wait_until_waiting, FulfillmentInput, LineItem, Order, OrderFulfillment, PAYMENT_SIGNAL,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before the filter reads RUST_LOG
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weft_durable=debug,weft_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        tracing::info!("Loaded .env from {:?}", path);
    }

    tracing::info!("weft-worker starting...");

    let config = WorkerPoolConfig::from_env();
    tracing::info!(
        worker_id = %config.worker_id,
        concurrency = config.concurrency,
        lease_secs = config.lease_duration.as_secs(),
        max_poll_ms = config.poller.max_interval.as_millis(),
        "Worker pool configured"
    );

    let backend = Arc::new(InMemoryBackend::new());
    let mut executor = WorkflowExecutor::new(backend);
    executor.register::<OrderFulfillment>();
    let executor = Arc::new(executor);

    let input = FulfillmentInput {
        order: Order {
            id: "ord-1".to_string(),
            items: vec![
                LineItem {
                    sku: "kettle".to_string(),
                    quantity: 1,
                    unit_price_cents: 3900,
                },
                LineItem {
                    sku: "filter".to_string(),
                    quantity: 3,
                    unit_price_cents: 250,
                },
            ],
        },
        cooling_off_ms: 2000,
    };
    let instance = executor
        .start_workflow(OrderFulfillment::TYPE, Some(serde_json::to_value(&input)?))
        .await
        .context("Failed to start demo workflow")?;

    let pool = WorkerPool::new(Arc::clone(&executor), config);
    pool.start().context("Failed to start worker pool")?;

    // Pay for the demo order once the workflow is waiting for it
    let payer = {
        let executor = Arc::clone(&executor);
        let instance_id = instance.id.clone();
        tokio::spawn(async move {
            let waiting =
                wait_until_waiting(&executor, &instance_id, PAYMENT_SIGNAL, Duration::from_millis(200));
            if let Err(e) = waiting.await {
                tracing::error!(error = %e, "Failed to read demo history");
                return;
            }

            if let Err(e) = executor
                .signal_workflow(&instance_id, PAYMENT_SIGNAL, Some(json!({"amount_cents": 4650})))
                .await
            {
                tracing::error!(error = %e, "Failed to deliver payment");
            }
        })
    };

    tracing::info!("Worker ready, waiting for shutdown signal...");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    payer.abort();
    pool.shutdown().await?;

    let instance = executor.instance(&instance.id).await?;
    tracing::info!(
        instance_id = %instance.id,
        completed = instance.is_completed(),
        result = ?instance.result,
        error = ?instance.error,
        "Demo workflow state"
    );

    tracing::info!("Worker shutdown complete");
    Ok(())
}
