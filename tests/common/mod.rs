// Shared across test binaries; not every binary uses every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use chatgate::{app, build_state, AppConfig, AppState};

/// Bind the application on an ephemeral port.  The state is returned so
/// tests can inspect the history store and counters directly.
pub async fn spawn_app(config: AppConfig) -> (String, AppState, JoinHandle<()>) {
    let state = build_state(config).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state.clone());
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}", addr), state, handle)
}

pub fn test_config(upstream_url: &str) -> AppConfig {
    AppConfig {
        upstream_url: upstream_url.to_string(),
        ..AppConfig::default()
    }
}

/// A fake completion API recording every request body it receives.
pub struct MockUpstream {
    pub url: String,
    pub calls: Arc<AtomicUsize>,
    pub bodies: Arc<Mutex<Vec<Value>>>,
}

impl MockUpstream {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Spawn a completion endpoint answering every request with `status` and
/// `body`.
pub async fn mock_upstream(status: u16, body: Value) -> MockUpstream {
    let calls = Arc::new(AtomicUsize::new(0));
    let bodies: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let calls_in = calls.clone();
    let bodies_in = bodies.clone();
    let router = Router::new().route(
        "/v1/chat/completions",
        post(move |Json(req): Json<Value>| {
            let calls = calls_in.clone();
            let bodies = bodies_in.clone();
            let body = body.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                bodies.lock().unwrap().push(req);
                (StatusCode::from_u16(status).unwrap(), Json(body))
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    MockUpstream {
        url: format!("http://{}/v1/chat/completions", addr),
        calls,
        bodies,
    }
}

/// Spawn a JSON-RPC monitoring backend answering `host.get` and
/// `problem.get` with fixed results.
pub async fn mock_monitor(host_result: Value, problem_result: Value) -> String {
    let router = Router::new().route(
        "/api_jsonrpc.php",
        // The real JSON-RPC client posts `content-type: application/json-rpc`,
        // which axum's `Json` extractor rejects; parse the raw body instead so
        // the double accepts exactly what the client sends.
        post(move |body: axum::body::Bytes| {
            let host = host_result.clone();
            let problems = problem_result.clone();
            async move {
                let req: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
                let id = req.get("id").cloned().unwrap_or(Value::Null);
                let result = match req.get("method").and_then(Value::as_str) {
                    Some("host.get") => host,
                    Some("problem.get") => problems,
                    Some("apiinfo.version") => json!("7.0.0"),
                    Some("user.login") => json!("mock-auth-token"),
                    _ => Value::Null,
                };
                Json(json!({ "jsonrpc": "2.0", "result": result, "id": id }))
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/api_jsonrpc.php", addr)
}

/// A chat body that passes validation.
pub fn valid_chat_body(message: &str) -> Value {
    json!({
        "message": message,
        "credential": "sk-abcdefghij",
    })
}
