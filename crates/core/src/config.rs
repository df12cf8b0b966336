use std::env;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn require(value: &Option<String>, key: &str) -> Result<String, ConfigError> {
    value.clone().ok_or_else(|| ConfigError::Missing(key.to_string()))
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub provider: ProviderConfig,
    pub gcp: GcpConfig,
    pub bus: BusConfig,
    pub supervisor: SupervisorConfig,
    pub enrichment: EnrichmentConfig,
    pub warehouse: WarehouseConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TRENDWIRE_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TRENDWIRE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            provider: ProviderConfig::from_env_profiled(p),
            gcp: GcpConfig::from_env_profiled(p),
            bus: BusConfig::from_env_profiled(p),
            supervisor: SupervisorConfig::from_env_profiled(p),
            enrichment: EnrichmentConfig::from_env_profiled(p),
            warehouse: WarehouseConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Credentials the stream listener cannot start without.
    pub fn require_listener(&self) -> Result<ListenerCredentials, ConfigError> {
        Ok(ListenerCredentials {
            bearer_token: require(&self.provider.bearer_token, "BEARER_TOKEN")?,
            gcp: self.gcp.require()?,
        })
    }

    /// Credentials the enrichment pipeline cannot start without.
    pub fn require_pipeline(&self) -> Result<GcpCredentials, ConfigError> {
        self.gcp.require()
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  provider:    base_url={}, token={}",
            self.provider.base_url,
            if self.provider.bearer_token.is_some() { "set" } else { "(none)" }
        );
        tracing::info!(
            "  gcp:         project={}",
            self.gcp.project_id.as_deref().unwrap_or("(none)")
        );
        tracing::info!(
            "  bus:         topic={}, subscription={}",
            self.bus.topic, self.bus.subscription
        );
        tracing::info!(
            "  supervisor:  liveness_interval={}s",
            self.supervisor.liveness_interval_secs
        );
        tracing::info!(
            "  enrichment:  endpoint={}, concurrency={}",
            self.enrichment.endpoint, self.enrichment.concurrency
        );
        tracing::info!(
            "  warehouse:   table={}.{}, batch_size={}",
            self.warehouse.dataset, self.warehouse.table, self.warehouse.batch_size
        );
    }
}

/// Secrets resolved for the listener process.
#[derive(Debug, Clone)]
pub struct ListenerCredentials {
    pub bearer_token: String,
    pub gcp: GcpCredentials,
}

/// Project id plus a pre-minted OAuth access token for Google APIs.
#[derive(Debug, Clone)]
pub struct GcpCredentials {
    pub project_id: String,
    pub access_token: String,
}

// ── Stream provider ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub bearer_token: Option<String>,
    pub base_url: String,
    pub user_agent: String,
    /// Max silence on the stream body before the read fails.
    pub read_timeout_secs: u64,
}

impl ProviderConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            bearer_token: profiled_env_opt(p, "BEARER_TOKEN"),
            base_url: profiled_env_or(p, "PROVIDER_BASE_URL", "https://api.twitter.com/2"),
            user_agent: profiled_env_or(p, "PROVIDER_USER_AGENT", "v2FilteredStreamRust"),
            read_timeout_secs: profiled_env_u64(p, "PROVIDER_READ_TIMEOUT_SECS", 25),
        }
    }
}

// ── Google Cloud ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    pub project_id: Option<String>,
    pub access_token: Option<String>,
}

impl GcpConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            project_id: profiled_env_opt(p, "GCP_PROJECT_ID"),
            access_token: profiled_env_opt(p, "GCP_ACCESS_TOKEN"),
        }
    }

    fn require(&self) -> Result<GcpCredentials, ConfigError> {
        Ok(GcpCredentials {
            project_id: require(&self.project_id, "GCP_PROJECT_ID")?,
            access_token: require(&self.access_token, "GCP_ACCESS_TOKEN")?,
        })
    }
}

// ── Message bus (Pub/Sub) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub endpoint: String,
    pub topic: String,
    pub subscription: String,
    pub pull_max_messages: u32,
    pub publish_batch_size: usize,
    pub publish_batch_wait_ms: u64,
    /// Records buffered between the listener and the publish task.
    pub publish_buffer: usize,
}

impl BusConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            endpoint: profiled_env_or(p, "PUBSUB_ENDPOINT", "https://pubsub.googleapis.com"),
            topic: profiled_env_or(p, "PUBSUB_TOPIC", "tweet_stream"),
            subscription: profiled_env_or(p, "PUBSUB_SUBSCRIPTION", "tweet_stream-sub"),
            pull_max_messages: profiled_env_u32(p, "PUBSUB_PULL_MAX_MESSAGES", 100),
            publish_batch_size: profiled_env_usize(p, "PUBSUB_PUBLISH_BATCH_SIZE", 100),
            publish_batch_wait_ms: profiled_env_u64(p, "PUBSUB_PUBLISH_BATCH_WAIT_MS", 50),
            publish_buffer: profiled_env_usize(p, "PUBSUB_PUBLISH_BUFFER", 10_000),
        }
    }

    /// Fully-qualified topic name.
    pub fn topic_path(&self, project_id: &str) -> String {
        topic_path(project_id, &self.topic)
    }

    /// Fully-qualified subscription name.
    pub fn subscription_path(&self, project_id: &str) -> String {
        format!("projects/{}/subscriptions/{}", project_id, self.subscription)
    }
}

/// `projects/{project}/topics/{topic}`
pub fn topic_path(project_id: &str, topic: &str) -> String {
    format!("projects/{}/topics/{}", project_id, topic)
}

// ── Connection supervisor ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub liveness_interval_secs: u64,
}

impl SupervisorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            liveness_interval_secs: profiled_env_u64(p, "SUPERVISOR_LIVENESS_INTERVAL_SECS", 10),
        }
    }
}

// ── Sentiment enrichment ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub endpoint: String,
    /// Records analyzed concurrently per pulled batch.
    pub concurrency: usize,
}

impl EnrichmentConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            endpoint: profiled_env_or(p, "LANGUAGE_ENDPOINT", "https://language.googleapis.com"),
            concurrency: profiled_env_usize(p, "ENRICHMENT_CONCURRENCY", 8),
        }
    }
}

// ── Warehouse (BigQuery) ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub endpoint: String,
    pub dataset: String,
    pub table: String,
    pub batch_size: usize,
    pub batch_wait_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl WarehouseConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            endpoint: profiled_env_or(p, "BIGQUERY_ENDPOINT", "https://bigquery.googleapis.com"),
            dataset: profiled_env_or(p, "BIGQUERY_DATASET", "rs_analytics"),
            table: profiled_env_or(p, "BIGQUERY_TABLE", "streamed_tweets"),
            batch_size: profiled_env_usize(p, "WAREHOUSE_BATCH_SIZE", 500),
            batch_wait_ms: profiled_env_u64(p, "WAREHOUSE_BATCH_WAIT_MS", 2000),
            max_attempts: profiled_env_u32(p, "WAREHOUSE_MAX_ATTEMPTS", 5),
            initial_backoff_ms: profiled_env_u64(p, "WAREHOUSE_INITIAL_BACKOFF_MS", 200),
        }
    }
}
