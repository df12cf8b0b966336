//! `HttpProvider` against a local mock of the filtered-stream API.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};

use trendwire_bus::InMemoryBus;
use trendwire_core::config::ProviderConfig;
use trendwire_core::Rule;
use trendwire_stream::{HttpProvider, RuleManager, StreamListener};

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path_and_query: String,
    auth: Option<String>,
    user_agent: Option<String>,
    body: Value,
}

#[derive(Clone)]
struct MockApi {
    seen: Arc<Mutex<Vec<Seen>>>,
    stream_status: StatusCode,
}

impl MockApi {
    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn handle(
    State(api): State<MockApi>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    api.seen.lock().unwrap().push(Seen {
        method: method.clone(),
        path_and_query: uri
            .path_and_query()
            .map(|p| p.to_string())
            .unwrap_or_default(),
        auth: header(&headers, "authorization"),
        user_agent: header(&headers, "user-agent"),
        body: body.clone(),
    });

    match (method.as_str(), uri.path()) {
        ("GET", "/2/tweets/search/stream/rules") => Json(json!({
            "data": [{ "id": "1", "value": "Y", "tag": "Y" }],
            "meta": { "result_count": 1 }
        }))
        .into_response(),
        ("POST", "/2/tweets/search/stream/rules") if body.get("delete").is_some() => {
            Json(json!({ "meta": { "summary": { "deleted": 1 } } })).into_response()
        }
        ("POST", "/2/tweets/search/stream/rules") => (
            StatusCode::CREATED,
            Json(json!({ "data": [{ "id": "2", "value": "X", "tag": "X" }] })),
        )
            .into_response(),
        ("GET", "/2/tweets/search/stream") if api.stream_status != StatusCode::OK => {
            (api.stream_status, "{\"title\":\"ConnectionException\"}").into_response()
        }
        ("GET", "/2/tweets/search/stream") => concat!(
            "{\"data\":{\"id\":\"7\",\"text\":\"hi\",\"created_at\":\"2024-05-01T10:00:00.000Z\"},",
            "\"matching_rules\":[{\"id\":\"2\",\"tag\":\"X\"}]}\r\n",
            "\r\n",
            "{\"errors\":[{\"title\":\"operational-disconnect\"}]}\r\n",
        )
        .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn start_server(stream_status: StatusCode) -> (ProviderConfig, MockApi) {
    let api = MockApi {
        seen: Arc::new(Mutex::new(Vec::new())),
        stream_status,
    };
    let app = Router::new().fallback(handle).with_state(api.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = ProviderConfig {
        bearer_token: None,
        base_url: format!("http://{addr}/2/"),
        user_agent: "v2FilteredStreamRust".into(),
        read_timeout_secs: 5,
    };
    (config, api)
}

#[tokio::test]
async fn rule_sync_speaks_the_rules_endpoint() {
    let (config, api) = start_server(StatusCode::OK).await;
    let provider = Arc::new(HttpProvider::new(&config, "secret").unwrap());

    let installed = RuleManager::new(provider)
        .sync_rules(&[Rule::new("X", "X")])
        .await
        .unwrap();
    assert_eq!(installed[0].id.as_deref(), Some("2"));

    let seen = api.seen();
    assert_eq!(seen.len(), 3);
    for request in &seen {
        assert_eq!(request.path_and_query, "/2/tweets/search/stream/rules");
        assert_eq!(request.auth.as_deref(), Some("Bearer secret"));
        assert_eq!(request.user_agent.as_deref(), Some("v2FilteredStreamRust"));
    }
    assert_eq!(seen[0].method, Method::GET);
    assert_eq!(seen[1].body, json!({ "delete": { "ids": ["1"] } }));
    assert_eq!(seen[2].body, json!({ "add": [{ "value": "X", "tag": "X" }] }));
}

#[tokio::test]
async fn stream_lines_are_forwarded_to_the_bus() {
    let (config, api) = start_server(StatusCode::OK).await;
    let provider = Arc::new(HttpProvider::new(&config, "secret").unwrap());
    let bus = InMemoryBus::new();
    let listener = StreamListener::new(provider, Arc::new(bus.clone()));

    let summary = listener.listen().await.unwrap().unwrap();
    assert_eq!(summary.published, 1);
    assert_eq!(summary.keep_alives, 1);
    assert_eq!(summary.soft_errors, 1);

    let published: Value = serde_json::from_slice(&bus.published()[0]).unwrap();
    assert_eq!(published["data"]["id"], json!("7"));
    assert_eq!(published["matching_rules"][0]["tag"], json!("X"));

    let seen = api.seen();
    assert_eq!(
        seen[0].path_and_query,
        "/2/tweets/search/stream?tweet.fields=created_at"
    );
    assert_eq!(seen[0].auth.as_deref(), Some("Bearer secret"));
}

#[tokio::test]
async fn too_many_connections_opens_nothing() {
    let (config, _api) = start_server(StatusCode::TOO_MANY_REQUESTS).await;
    let provider = Arc::new(HttpProvider::new(&config, "secret").unwrap());
    let bus = InMemoryBus::new();
    let listener = StreamListener::new(provider, Arc::new(bus.clone()));

    assert!(listener.listen().await.unwrap().is_none());
    assert!(bus.published().is_empty());
}

#[tokio::test]
async fn unauthorized_stream_is_an_error_with_body() {
    let (config, _api) = start_server(StatusCode::UNAUTHORIZED).await;
    let provider = Arc::new(HttpProvider::new(&config, "secret").unwrap());
    let listener = StreamListener::new(provider, Arc::new(InMemoryBus::new()));

    let err = listener.listen().await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("401"));
    assert!(message.contains("ConnectionException"));
}
