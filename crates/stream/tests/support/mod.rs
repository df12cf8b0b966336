//! In-process fake of the provider's rules and stream endpoints.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use trendwire_core::Rule;
use trendwire_stream::{ProviderApi, ProviderError, ProviderResponse, StreamResponse};

/// A transport failure, as reqwest reports a request that never left.
pub fn transport_error() -> reqwest::Error {
    reqwest::Client::new()
        .get("not a url")
        .build()
        .unwrap_err()
}

/// Keeps a server-side rule store and records every call.
pub struct FakeProvider {
    active: Mutex<Vec<Rule>>,
    next_id: AtomicU64,
    posts: Mutex<Vec<Value>>,
    rule_fetches: Mutex<Vec<Instant>>,
    stream_opens: Mutex<Vec<Instant>>,
    fail_rules: AtomicBool,
    stream_status: Mutex<u16>,
    stream_lines: Mutex<Vec<String>>,
    hold_stream_open: AtomicBool,
    cancel_after_fetches: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            posts: Mutex::new(Vec::new()),
            rule_fetches: Mutex::new(Vec::new()),
            stream_opens: Mutex::new(Vec::new()),
            fail_rules: AtomicBool::new(false),
            stream_status: Mutex::new(200),
            stream_lines: Mutex::new(Vec::new()),
            hold_stream_open: AtomicBool::new(false),
            cancel_after_fetches: Mutex::new(None),
        }
    }

    /// Seed the provider with already-installed rules (ids kept as given).
    pub fn with_active(self, rules: Vec<Rule>) -> Self {
        *self.active.lock().unwrap() = rules;
        self.next_id.store(100, Ordering::SeqCst);
        self
    }

    pub fn failing_rules(self) -> Self {
        self.fail_rules.store(true, Ordering::SeqCst);
        self
    }

    pub fn stream_status(self, status: u16) -> Self {
        *self.stream_status.lock().unwrap() = status;
        self
    }

    pub fn stream_lines(self, lines: Vec<&str>) -> Self {
        *self.stream_lines.lock().unwrap() = lines.into_iter().map(str::to_string).collect();
        self
    }

    /// After the body is sent, keep the connection open forever.
    pub fn hold_stream_open(self) -> Self {
        self.hold_stream_open.store(true, Ordering::SeqCst);
        self
    }

    pub fn cancel_after_fetches(&self, count: usize, token: CancellationToken) {
        *self.cancel_after_fetches.lock().unwrap() = Some((count, token));
    }

    pub fn active(&self) -> Vec<Rule> {
        self.active.lock().unwrap().clone()
    }

    pub fn posts(&self) -> Vec<Value> {
        self.posts.lock().unwrap().clone()
    }

    pub fn rule_fetches(&self) -> Vec<Instant> {
        self.rule_fetches.lock().unwrap().clone()
    }

    pub fn stream_opens(&self) -> usize {
        self.stream_opens.lock().unwrap().len()
    }
}

#[async_trait]
impl ProviderApi for FakeProvider {
    async fn get_rules(&self) -> Result<ProviderResponse, ProviderError> {
        let fetches = {
            let mut fetches = self.rule_fetches.lock().unwrap();
            fetches.push(Instant::now());
            fetches.len()
        };
        if let Some((limit, token)) = self.cancel_after_fetches.lock().unwrap().as_ref() {
            if fetches >= *limit {
                token.cancel();
            }
        }

        if self.fail_rules.load(Ordering::SeqCst) {
            return Err(ProviderError::Http(transport_error()));
        }

        let active = self.active();
        let body = if active.is_empty() {
            json!({ "meta": { "result_count": 0 } })
        } else {
            json!({ "data": active, "meta": { "result_count": active.len() } })
        };
        Ok(ProviderResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    async fn post_rules(&self, payload: &Value) -> Result<ProviderResponse, ProviderError> {
        self.posts.lock().unwrap().push(payload.clone());

        if let Some(ids) = payload["delete"]["ids"].as_array() {
            let ids: Vec<&str> = ids.iter().filter_map(Value::as_str).collect();
            self.active
                .lock()
                .unwrap()
                .retain(|r| !ids.contains(&r.id.as_deref().unwrap_or_default()));
            return Ok(ProviderResponse {
                status: 200,
                body: json!({ "meta": { "summary": { "deleted": ids.len() } } }).to_string(),
            });
        }

        if let Some(add) = payload["add"].as_array() {
            let mut created = Vec::new();
            for rule in add {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
                created.push(Rule {
                    value: rule["value"].as_str().unwrap_or_default().to_string(),
                    tag: rule["tag"].as_str().unwrap_or_default().to_string(),
                    id: Some(id),
                });
            }
            self.active.lock().unwrap().extend(created.clone());
            return Ok(ProviderResponse {
                status: 201,
                body: json!({ "data": created }).to_string(),
            });
        }

        Ok(ProviderResponse {
            status: 400,
            body: "{\"title\":\"Invalid Request\"}".into(),
        })
    }

    async fn open_stream(&self) -> Result<StreamResponse, ProviderError> {
        self.stream_opens.lock().unwrap().push(Instant::now());

        let status = *self.stream_status.lock().unwrap();
        if status != 200 {
            return Ok(StreamResponse::Rejected {
                status,
                body: "{\"title\":\"Too Many Requests\"}".into(),
            });
        }

        let chunks: Vec<Result<Bytes, ProviderError>> = self
            .stream_lines
            .lock()
            .unwrap()
            .iter()
            .map(|l| Ok(Bytes::from(format!("{l}\r\n"))))
            .collect();
        let body = stream::iter(chunks);

        if self.hold_stream_open.load(Ordering::SeqCst) {
            Ok(StreamResponse::Open(Box::pin(body.chain(stream::pending()))))
        } else {
            Ok(StreamResponse::Open(Box::pin(body)))
        }
    }
}
