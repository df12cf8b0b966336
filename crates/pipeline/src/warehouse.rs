//! Append-only warehouse sink backed by BigQuery streaming inserts.
//!
//! [`WarehouseSink`] owns the retry policy and the create-if-absent logic;
//! [`WarehouseClient`] is the transport seam, with [`BigQueryClient`] as the
//! REST implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use trendwire_core::EnrichedRecord;

use crate::error::SinkError;

// ── Schema ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSchema>,
}

impl FieldSchema {
    fn nullable(name: &str, field_type: &str) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: "NULLABLE".into(),
            fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

/// Column layout of the streamed tweets table.
pub fn tweets_schema() -> TableSchema {
    TableSchema {
        fields: vec![
            FieldSchema::nullable("id", "INTEGER"),
            FieldSchema::nullable("text", "STRING"),
            FieldSchema {
                name: "matching_rules".into(),
                field_type: "RECORD".into(),
                mode: "REPEATED".into(),
                fields: vec![
                    FieldSchema::nullable("id", "INTEGER"),
                    FieldSchema::nullable("tag", "STRING"),
                ],
            },
            FieldSchema::nullable("sentiment_score", "FLOAT"),
            FieldSchema::nullable("sentiment_magnitude", "FLOAT"),
            FieldSchema::nullable("language", "STRING"),
            FieldSchema::nullable("created_at", "TIMESTAMP"),
        ],
    }
}

// ── Rows ────────────────────────────────────────────────────────────

/// One streaming-insert row. `insert_id` is the record id, so a retried
/// batch deduplicates on the warehouse side.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseRow {
    pub insert_id: String,
    pub json: Value,
}

impl WarehouseRow {
    /// Project a record onto the table columns. Payload fields outside the
    /// schema are not written.
    pub fn from_record(record: &EnrichedRecord) -> Self {
        let inner = &record.record;
        let mut row = json!({
            "id": inner.id,
            "text": inner.text,
            "matching_rules": inner.matching_rules,
        });
        if let Some(created_at) = inner.created_at {
            row["created_at"] = json!(created_at.to_rfc3339());
        }
        if let Some(score) = record.sentiment_score {
            row["sentiment_score"] = json!(score);
        }
        if let Some(magnitude) = record.sentiment_magnitude {
            row["sentiment_magnitude"] = json!(magnitude);
        }
        if let Some(language) = &record.language {
            row["language"] = json!(language);
        }

        Self {
            insert_id: inner.id.clone(),
            json: row,
        }
    }
}

// ── Transport seam ──────────────────────────────────────────────────

#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Insert rows. `SinkError::TableNotFound` when the table is missing.
    async fn insert_rows(&self, rows: &[WarehouseRow]) -> Result<(), SinkError>;

    /// Create the table. Succeeds when it already exists.
    async fn create_table(&self, schema: &TableSchema) -> Result<(), SinkError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowErrors>,
}

#[derive(Debug, Deserialize)]
struct RowErrors {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    errors: Vec<RowError>,
}

#[derive(Debug, Deserialize)]
struct RowError {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

// Row-level reasons the service documents as safe to retry. "stopped" marks
// valid rows that were not written because a sibling failed.
const RETRYABLE_ROW_REASONS: &[&str] = &[
    "backendError",
    "internalError",
    "rateLimitExceeded",
    "timeout",
    "stopped",
];

/// BigQuery v2 REST client bound to one table.
pub struct BigQueryClient {
    http: reqwest::Client,
    tables_url: String,
    insert_url: String,
    project_id: String,
    dataset: String,
    table: String,
    access_token: String,
}

impl BigQueryClient {
    pub fn new(
        endpoint: &str,
        project_id: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        let project_id = project_id.into();
        let dataset = dataset.into();
        let table = table.into();
        let tables_url = format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables",
            endpoint.trim_end_matches('/'),
            project_id,
            dataset
        );
        let insert_url = format!("{tables_url}/{table}/insertAll");

        info!(
            project = %project_id,
            dataset = %dataset,
            table = %table,
            "BigQuery client initialized"
        );
        Self {
            http: reqwest::Client::new(),
            tables_url,
            insert_url,
            project_id,
            dataset,
            table,
            access_token: access_token.into(),
        }
    }

    pub fn table_ref(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset, self.table)
    }
}

#[async_trait]
impl WarehouseClient for BigQueryClient {
    #[instrument(skip_all, fields(rows = rows.len()))]
    async fn insert_rows(&self, rows: &[WarehouseRow]) -> Result<(), SinkError> {
        let body = json!({
            "rows": rows,
            "skipInvalidRows": false,
            "ignoreUnknownValues": false,
        });
        let response = self
            .http
            .post(&self.insert_url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        match status {
            200 => {}
            404 => return Err(SinkError::TableNotFound(self.table_ref())),
            _ => return Err(classify_status(status, text)),
        }

        let parsed: InsertAllResponse = serde_json::from_str(&text)
            .map_err(|e| SinkError::Transient(format!("unreadable insertAll response: {e}")))?;
        if parsed.insert_errors.is_empty() {
            debug!(rows = rows.len(), "rows inserted");
            return Ok(());
        }

        // Rows whose own data was refused; "stopped" siblings are merely unwritten.
        let invalid: Vec<&RowErrors> = parsed
            .insert_errors
            .iter()
            .filter(|row| {
                row.errors
                    .iter()
                    .any(|e| !RETRYABLE_ROW_REASONS.contains(&e.reason.as_str()))
            })
            .collect();
        let first = invalid
            .first()
            .copied()
            .or(parsed.insert_errors.first())
            .and_then(|row| row.errors.first().map(|e| (row.index, e)))
            .map(|(index, e)| format!("row {index}: {} ({})", e.message, e.reason))
            .unwrap_or_default();

        if invalid.is_empty() {
            let count = parsed.insert_errors.len();
            return Err(SinkError::Transient(format!("{count} rows not written, first {first}")));
        }
        Err(SinkError::InvalidRows {
            rows: invalid.iter().map(|row| row.index as usize).collect(),
            message: first,
        })
    }

    #[instrument(skip_all)]
    async fn create_table(&self, schema: &TableSchema) -> Result<(), SinkError> {
        let body = json!({
            "tableReference": {
                "projectId": self.project_id,
                "datasetId": self.dataset,
                "tableId": self.table,
            },
            "schema": schema,
        });
        let response = self
            .http
            .post(&self.tables_url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        match status {
            200 => {
                info!(table = %self.table_ref(), "table created");
                Ok(())
            }
            // Created concurrently by another writer.
            409 => Ok(()),
            _ => {
                let text = response.text().await.unwrap_or_default();
                Err(classify_status(status, text))
            }
        }
    }
}

fn classify_status(status: u16, body: String) -> SinkError {
    let message = format!("HTTP {status}: {body}");
    if status == 429 || status >= 500 {
        SinkError::Transient(message)
    } else {
        SinkError::Permanent(message)
    }
}

// ── Sink ────────────────────────────────────────────────────────────

/// Exponential backoff between append attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_factor).min(self.max_backoff)
    }
}

/// Outcome of one [`WarehouseSink::append`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendReport {
    pub written: usize,
    /// Positions in the input of records the warehouse refused as invalid.
    pub rejected: Vec<usize>,
}

/// Appends enriched records to the warehouse table.
#[derive(Clone)]
pub struct WarehouseSink {
    client: Arc<dyn WarehouseClient>,
    schema: TableSchema,
    retry: RetryPolicy,
}

impl WarehouseSink {
    pub fn new(client: Arc<dyn WarehouseClient>, retry: RetryPolicy) -> Self {
        Self {
            client,
            schema: tweets_schema(),
            retry,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Append `records`, creating the table on first use.
    ///
    /// Transient failures are retried with backoff until `max_attempts`;
    /// permanent ones return immediately. Rows the warehouse flags as invalid
    /// are set aside and the rest of the batch is resent without them.
    pub async fn append(&self, records: &[EnrichedRecord]) -> Result<AppendReport, SinkError> {
        let mut report = AppendReport::default();
        // Input positions still waiting to be written, parallel to `rows`.
        let mut positions: Vec<usize> = (0..records.len()).collect();
        let mut rows: Vec<WarehouseRow> = records.iter().map(WarehouseRow::from_record).collect();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut delay = self.retry.initial_backoff;
        let mut table_created = false;
        let mut attempt = 0;

        while !rows.is_empty() {
            attempt += 1;
            let err = match self.client.insert_rows(&rows).await {
                Ok(()) => {
                    debug!(rows = rows.len(), attempt, "batch appended");
                    report.written = rows.len();
                    break;
                }
                Err(SinkError::TableNotFound(table)) if !table_created => {
                    info!(table = %table, "table missing, creating it");
                    self.client.create_table(&self.schema).await?;
                    table_created = true;
                    // The insert after a create does not count as a retry.
                    attempt -= 1;
                    continue;
                }
                // A freshly created table can briefly answer 404.
                Err(SinkError::TableNotFound(table)) => {
                    SinkError::Transient(format!("table {table} not visible yet"))
                }
                Err(SinkError::InvalidRows { rows: invalid, message }) => {
                    let before = rows.len();
                    let mut kept_positions = Vec::with_capacity(before);
                    let mut kept_rows = Vec::with_capacity(before);
                    for (index, (position, row)) in
                        positions.drain(..).zip(rows.drain(..)).enumerate()
                    {
                        if invalid.contains(&index) {
                            report.rejected.push(position);
                        } else {
                            kept_positions.push(position);
                            kept_rows.push(row);
                        }
                    }
                    positions = kept_positions;
                    rows = kept_rows;
                    if rows.len() == before {
                        // Nothing identifiable to set aside.
                        return Err(SinkError::Permanent(message));
                    }
                    warn!(
                        rejected = before - rows.len(),
                        remaining = rows.len(),
                        reason = %message,
                        "warehouse refused rows, resending the rest"
                    );
                    // Resending the valid remainder is not a retry.
                    attempt -= 1;
                    continue;
                }
                Err(e) => e,
            };

            if !err.is_transient() {
                return Err(err);
            }
            if attempt >= max_attempts {
                return Err(SinkError::RetriesExhausted {
                    attempts: attempt,
                    last: err.to_string(),
                });
            }

            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient warehouse error, retrying"
            );
            tokio::time::sleep(delay).await;
            delay = self.retry.next_delay(delay);
        }

        report.rejected.sort_unstable();
        Ok(report)
    }
}
