//! Minimal JSON-RPC client for the monitoring backend.
//!
//! Only the operations the relay needs: host lookup, recent problems and
//! the login handshake.  Failures never propagate as errors; every call
//! yields `None` and records a last-error string the caller can surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};

/// Methods that must not carry the auth field.
const HANDSHAKE_METHODS: [&str; 2] = ["user.login", "apiinfo.version"];

#[derive(Debug, Clone, PartialEq)]
pub struct HostRecord {
    pub id: u64,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProblemRecord {
    pub name: String,
    pub severity: String,
}

pub struct MonitorClient {
    api_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
    next_id: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl MonitorClient {
    pub fn new(api_url: impl Into<String>, auth_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");
        Self {
            api_url: api_url.into(),
            auth_token,
            client,
            next_id: AtomicU64::new(1),
            last_error: Mutex::new(None),
        }
    }

    /// Login handshake: stores the returned token and verifies it by
    /// fetching the API version.  Returns false (with last_error set) when
    /// either step fails.
    pub async fn login(&mut self, username: &str, password: &str) -> bool {
        let params = json!({ "username": username, "password": password });
        match self.call("user.login", params).await {
            Some(Value::String(token)) => {
                self.auth_token = Some(token);
                self.api_version().await.is_some()
            }
            _ => false,
        }
    }

    pub async fn api_version(&self) -> Option<String> {
        match self.call("apiinfo.version", json!([])).await? {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|g| g.clone())
    }

    fn record_error(&self, message: String) {
        tracing::warn!(error = %message, "monitoring backend call failed");
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(message);
        }
    }

    fn build_request(&self, method: &str, params: Value, id: u64) -> Value {
        let mut request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        if let Some(token) = &self.auth_token {
            if !HANDSHAKE_METHODS.contains(&method) {
                request["auth"] = Value::String(token.clone());
            }
        }
        request
    }

    /// One JSON-RPC call.  Returns the `result` member, or `None` after
    /// recording a last-error string.
    pub async fn call(&self, method: &str, params: Value) -> Option<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = self.build_request(method, params, id);
        let resp = match self
            .client
            .post(&self.api_url)
            .header("content-type", "application/json-rpc")
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.record_error(format!("transport error: {e}"));
                return None;
            }
        };
        let status = resp.status();
        if !status.is_success() {
            self.record_error(format!("HTTP error {}", status.as_u16()));
            return None;
        }
        let body: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                self.record_error(format!("invalid JSON-RPC response: {e}"));
                return None;
            }
        };
        if let Some(err) = body.get("error") {
            let message = err.get("message").and_then(Value::as_str).unwrap_or("unknown error");
            let data = err.get("data").and_then(Value::as_str).unwrap_or("");
            self.record_error(format!("{message}: {data}"));
            return None;
        }
        body.get("result").cloned()
    }

    /// Fetch one host by id.  `None` when the backend is unreachable or the
    /// host does not exist.
    pub async fn get_host_by_id(&self, host_id: u64) -> Option<HostRecord> {
        let params = json!({
            "output": ["hostid", "host", "name", "status"],
            "hostids": host_id.to_string(),
        });
        let result = self.call("host.get", params).await?;
        let row = result.as_array()?.first()?;
        let name = row
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| row.get("host").and_then(Value::as_str))?
            .to_owned();
        // The backend reports status 0 for enabled hosts.
        let enabled = coerce_u64(row.get("status")?)? == 0;
        Some(HostRecord {
            id: host_id,
            name,
            enabled,
        })
    }

    /// Most recent problems for a host, newest first.  `None` on any
    /// backend failure; an empty list is a host with no active problems.
    pub async fn get_problems_for_host(&self, host_id: u64) -> Option<Vec<ProblemRecord>> {
        let params = json!({
            "output": ["eventid", "objectid", "name", "clock", "severity"],
            "hostids": [host_id.to_string()],
            "sortfield": ["clock", "eventid"],
            "sortorder": "DESC",
            "recent": true,
        });
        let result = self.call("problem.get", params).await?;
        let rows = result.as_array()?;
        let problems = rows
            .iter()
            .filter_map(|row| {
                let name = row.get("name").and_then(Value::as_str)?.to_owned();
                let severity = match row.get("severity") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => return None,
                };
                Some(ProblemRecord { name, severity })
            })
            .collect();
        Some(problems)
    }
}

/// Numeric fields arrive as strings or numbers depending on backend version.
fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
