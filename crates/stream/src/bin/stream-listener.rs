//! stream-listener: keeps a filtered-stream connection alive and forwards
//! every matched record to the Pub/Sub topic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use trendwire_bus::pubsub::PublishSettings;
use trendwire_bus::{PubSubClient, PubSubPublisher};
use trendwire_core::config::{self, Config};
use trendwire_core::shutdown::shutdown_token;
use trendwire_core::{default_rules, load_rules};
use trendwire_stream::{ConnectionSupervisor, HttpProvider, RuleManager, StreamListener};

/// Filtered-stream listener with supervised reconnects.
#[derive(Parser, Debug)]
#[command(name = "stream-listener", version, about)]
struct Cli {
    /// TOML file declaring the filter rules. Built-in rules when omitted.
    #[arg(long, env = "RULES_FILE")]
    rules: Option<PathBuf>,

    /// Seconds between liveness checks (overrides SUPERVISOR_LIVENESS_INTERVAL_SECS).
    #[arg(long)]
    interval: Option<u64>,

    /// Publish to this topic name instead of PUBSUB_TOPIC.
    #[arg(long)]
    topic: Option<String>,

    /// Seconds to wait for the last publish batch on shutdown.
    #[arg(long, default_value_t = 5)]
    drain_timeout: u64,
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

    let credentials = config
        .require_listener()
        .context("stream listener is missing credentials")?;

    let rules = match &cli.rules {
        Some(path) => load_rules(path)
            .with_context(|| format!("failed to load rules from {}", path.display()))?,
        None => default_rules(),
    };
    info!(count = rules.len(), "desired rules loaded");

    let provider = Arc::new(
        HttpProvider::new(&config.provider, credentials.bearer_token)
            .context("failed to build provider client")?,
    );

    let topic = cli.topic.as_deref().unwrap_or(&config.bus.topic);
    let settings = PublishSettings {
        batch_size: config.bus.publish_batch_size,
        batch_wait: Duration::from_millis(config.bus.publish_batch_wait_ms),
        buffer: config.bus.publish_buffer,
    };
    let client = PubSubClient::new(&config.bus.endpoint, &credentials.gcp.access_token);
    let (publisher, publish_task) = PubSubPublisher::spawn(
        client,
        config::topic_path(&credentials.gcp.project_id, topic),
        settings,
    );

    let listener = Arc::new(StreamListener::new(provider.clone(), Arc::new(publisher)));
    let interval = Duration::from_secs(
        cli.interval
            .unwrap_or(config.supervisor.liveness_interval_secs),
    );
    let supervisor =
        ConnectionSupervisor::new(RuleManager::new(provider), listener, rules, interval);

    supervisor.run(shutdown_token()).await;

    // The publish task exits once every publisher handle is gone.
    match tokio::time::timeout(Duration::from_secs(cli.drain_timeout), publish_task).await {
        Ok(Ok(())) => info!("publish buffer drained"),
        Ok(Err(e)) => warn!(error = %e, "publish task failed"),
        Err(_) => warn!("publish buffer not drained before timeout"),
    }

    info!("stream listener stopped");
    Ok(())
}
