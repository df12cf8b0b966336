//! Server-side rule synchronization.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use trendwire_core::Rule;

use crate::error::ProviderError;
use crate::provider::{ProviderApi, ProviderResponse};

const STATUS_OK: u16 = 200;
const STATUS_CREATED: u16 = 201;

#[derive(Debug, Deserialize)]
struct RulesEnvelope {
    // Absent when the provider has no active rules.
    #[serde(default)]
    data: Vec<Rule>,
}

/// Replaces the provider's active rule set with a desired one.
///
/// Holds no state of its own: every call is a round trip to the provider.
#[derive(Clone)]
pub struct RuleManager {
    provider: Arc<dyn ProviderApi>,
}

impl RuleManager {
    pub fn new(provider: Arc<dyn ProviderApi>) -> Self {
        Self { provider }
    }

    /// Rules currently installed, with their provider-assigned ids.
    pub async fn fetch_active_rules(&self) -> Result<Vec<Rule>, ProviderError> {
        let response = self.provider.get_rules().await?;
        let response = expect_status(response, STATUS_OK, "get rules")?;
        let envelope: RulesEnvelope = serde_json::from_str(&response.body)?;
        info!(count = envelope.data.len(), "fetched active rules");
        Ok(envelope.data)
    }

    /// Delete `rules` by id. Empty input (or rules without ids) is a no-op.
    pub async fn delete_rules(&self, rules: &[Rule]) -> Result<(), ProviderError> {
        let ids: Vec<&str> = rules.iter().filter_map(|r| r.id.as_deref()).collect();
        if ids.is_empty() {
            return Ok(());
        }

        let response = self
            .provider
            .post_rules(&json!({ "delete": { "ids": ids } }))
            .await?;
        expect_status(response, STATUS_OK, "delete rules")?;
        info!(count = ids.len(), "deleted rules");
        Ok(())
    }

    /// Install `rules`, returning them with the ids the provider assigned.
    pub async fn add_rules(&self, rules: &[Rule]) -> Result<Vec<Rule>, ProviderError> {
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let add: Vec<_> = rules
            .iter()
            .map(|r| json!({ "value": r.value, "tag": r.tag }))
            .collect();
        let response = self.provider.post_rules(&json!({ "add": add })).await?;
        let response = expect_status(response, STATUS_CREATED, "add rules")?;

        let body = response.json()?;
        if let Some(errors) = body.get("errors") {
            warn!(errors = %errors, "provider rejected some rules");
        }
        let envelope: RulesEnvelope = serde_json::from_value(body)?;
        info!(count = envelope.data.len(), "installed rules");
        Ok(envelope.data)
    }

    /// Fetch, delete everything active, then install `desired`.
    ///
    /// Not transactional: a crash between delete and add leaves the provider
    /// with no rules, so this runs on every supervised (re)connect.
    pub async fn sync_rules(&self, desired: &[Rule]) -> Result<Vec<Rule>, ProviderError> {
        let active = self.fetch_active_rules().await?;
        self.delete_rules(&active).await?;
        self.add_rules(desired).await
    }
}

fn expect_status(
    response: ProviderResponse,
    expected: u16,
    operation: &'static str,
) -> Result<ProviderResponse, ProviderError> {
    if response.status == expected {
        Ok(response)
    } else {
        Err(ProviderError::Status {
            operation,
            status: response.status,
            body: response.body,
        })
    }
}
