//! enrichment-pipeline: pulls stream records from Pub/Sub, adds sentiment,
//! and appends them to the BigQuery table.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use trendwire_bus::{PubSubClient, PubSubSubscriber};
use trendwire_core::config::{self, Config};
use trendwire_core::shutdown::shutdown_token;
use trendwire_pipeline::{
    BigQueryClient, LanguageClient, Pipeline, RetryPolicy, SentimentEnricher, WarehouseSink,
};

/// Sentiment enrichment from the bus into the warehouse.
#[derive(Parser, Debug)]
#[command(name = "enrichment-pipeline", version, about)]
struct Cli {
    /// Subscription name (overrides PUBSUB_SUBSCRIPTION).
    #[arg(long)]
    subscription: Option<String>,

    /// Messages per pull (overrides PUBSUB_PULL_MAX_MESSAGES).
    #[arg(long)]
    pull_max_messages: Option<u32>,

    /// Concurrent sentiment calls (overrides ENRICHMENT_CONCURRENCY).
    #[arg(long)]
    concurrency: Option<usize>,

    /// Seconds between progress log lines.
    #[arg(long, env = "PIPELINE_STATS_INTERVAL_SECS", default_value_t = 60)]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    config::load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let gcp = config
        .require_pipeline()
        .context("enrichment pipeline is missing credentials")?;

    let subscription = match &cli.subscription {
        Some(name) => format!("projects/{}/subscriptions/{}", gcp.project_id, name),
        None => config.bus.subscription_path(&gcp.project_id),
    };
    let source = PubSubSubscriber::new(
        PubSubClient::new(&config.bus.endpoint, &gcp.access_token),
        subscription,
    );

    let analyzer = LanguageClient::new(&config.enrichment.endpoint, &gcp.access_token);
    let warehouse = BigQueryClient::new(
        &config.warehouse.endpoint,
        &gcp.project_id,
        &config.warehouse.dataset,
        &config.warehouse.table,
        &gcp.access_token,
    );
    let retry = RetryPolicy {
        max_attempts: config.warehouse.max_attempts,
        initial_backoff: Duration::from_millis(config.warehouse.initial_backoff_ms),
        ..RetryPolicy::default()
    };

    let pipeline = Pipeline::builder()
        .source(Arc::new(source))
        .enricher(SentimentEnricher::new(Arc::new(analyzer)))
        .sink(WarehouseSink::new(Arc::new(warehouse), retry))
        .concurrency(cli.concurrency.unwrap_or(config.enrichment.concurrency))
        .pull_max_messages(cli.pull_max_messages.unwrap_or(config.bus.pull_max_messages))
        .batch_size(config.warehouse.batch_size)
        .batch_wait(Duration::from_millis(config.warehouse.batch_wait_ms))
        .stats_interval(Duration::from_secs(cli.stats_interval))
        .build()?;

    let stats = pipeline.run(shutdown_token()).await;
    info!(%stats, "enrichment pipeline exited");
    Ok(())
}
