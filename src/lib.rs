//! Core library for chatgate.  This module wires together the boundary
//! request/response structures, shared application state and the HTTP
//! handlers.  The relay and lookup flows themselves live in `relay` and
//! `lookup`; everything here is transport concerns.

pub mod config;
pub mod history;
pub mod lookup;
pub mod monitor;
pub mod ratelimit;
pub mod relay;
pub mod sanitize;
pub mod scanners;
pub mod telemetry;
pub mod upstream;
pub mod util;
pub mod validate;

pub use config::AppConfig;

use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody, JsonRejection},
    DefaultBodyLimit, State,
};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::history::HistoryStore;
use crate::monitor::MonitorClient;
use crate::ratelimit::{Decision, RateLimiter};
use crate::sanitize::Sanitizer;
use crate::telemetry::{ChatEvent, TelemetrySink};
use crate::upstream::CompletionClient;
use crate::util::short_session;

/// One chat-send request.  Snake_case aliases are accepted for callers that
/// predate the camelCase interface.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "host_id")]
    pub host_id: Option<serde_json::Value>,
    #[serde(default, alias = "conversation_id")]
    pub conversation_id: Option<String>,
    #[serde(default, alias = "api_key")]
    pub credential: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<serde_json::Value>,
    #[serde(default, alias = "max_tokens")]
    pub max_tokens: Option<serde_json::Value>,
    #[serde(default, alias = "system_prompt")]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ClearRequest {
    #[serde(default)]
    pub clear: bool,
}

/// Failure categories exposed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    RateLimited,
    InvalidInput,
    PayloadTooLarge,
    UpstreamTransportError,
    #[serde(rename = "UpstreamHTTPError")]
    UpstreamHttpError,
    UpstreamMalformedResponse,
    UpstreamServiceError,
    BackendLookupFailed,
}

/// The only response shape this boundary produces.  `text` carries a stable
/// human-readable message on failure paths too.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub ok: bool,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatResponse {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            ok: true,
            text: text.into(),
            error_kind: None,
            conversation_id: None,
        }
    }

    pub fn failure(kind: ErrorKind, text: impl Into<String>) -> Self {
        Self {
            ok: false,
            text: text.into(),
            error_kind: Some(kind),
            conversation_id: None,
        }
    }

    pub fn with_conversation(mut self, id: String) -> Self {
        if !id.is_empty() {
            self.conversation_id = Some(id);
        }
        self
    }
}

const THROTTLE_MESSAGE: &str = "Too many requests. Please wait a minute and try again.";

/// Shared application state.  Request-scoped work holds only cheap clones.
#[derive(Clone)]
pub struct AppState {
    pub history: Arc<HistoryStore>,
    pub limiter: Arc<RateLimiter>,
    pub upstream: Arc<CompletionClient>,
    pub monitor: Option<Arc<MonitorClient>>,
    pub sanitizer: Arc<Sanitizer>,
    pub allowed_sessions: Option<Arc<HashSet<String>>>,
    pub max_request_bytes: usize,
    pub telemetry: TelemetrySink,
    // Metrics counters
    pub metric_requests_total: Arc<AtomicU64>,
    pub metric_rate_limited_total: Arc<AtomicU64>,
    pub metric_upstream_errors_total: Arc<AtomicU64>,
    pub metric_flagged_total: Arc<AtomicU64>,
    pub metric_lookups_total: Arc<AtomicU64>,
    pub process_start_epoch: f64,
    pub process_start_instant: Instant,
}

/// Build state from a parsed configuration.  Performs the monitoring login
/// handshake when credentials (and no static token) are configured.
pub async fn build_state(config: AppConfig) -> AppState {
    let monitor = match &config.monitor_url {
        Some(url) => {
            let mut client = MonitorClient::new(url.clone(), config.monitor_token.clone());
            if config.monitor_token.is_none() {
                if let (Some(user), Some(pass)) = (&config.monitor_user, &config.monitor_pass) {
                    if !client.login(user, pass).await {
                        tracing::warn!(
                            error = ?client.last_error(),
                            "monitoring backend login failed; host lookups will fail"
                        );
                    }
                }
            }
            Some(Arc::new(client))
        }
        None => None,
    };

    let telemetry = TelemetrySink::open(
        config.log_file.as_deref(),
        &config.rotation,
        config.log_stdout,
    );

    let start_time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();

    AppState {
        history: Arc::new(HistoryStore::new()),
        limiter: Arc::new(RateLimiter::new(
            config.rate_limit,
            std::time::Duration::from_secs(config.rate_window_secs),
        )),
        upstream: Arc::new(CompletionClient::new(config.upstream_url)),
        monitor,
        sanitizer: Arc::new(Sanitizer::new()),
        allowed_sessions: config.allowed_sessions.map(Arc::new),
        max_request_bytes: config.max_request_bytes,
        telemetry,
        metric_requests_total: Arc::new(AtomicU64::new(0)),
        metric_rate_limited_total: Arc::new(AtomicU64::new(0)),
        metric_upstream_errors_total: Arc::new(AtomicU64::new(0)),
        metric_flagged_total: Arc::new(AtomicU64::new(0)),
        metric_lookups_total: Arc::new(AtomicU64::new(0)),
        process_start_epoch: start_time.as_secs_f64(),
        process_start_instant: Instant::now(),
    }
}

pub async fn build_state_from_env() -> anyhow::Result<AppState> {
    Ok(build_state(AppConfig::from_env()?).await)
}

/// Build the Axum router.  Every response from this boundary carries the
/// no-cache and content-policy headers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    Router::new()
        .route("/chat/send", post(chat_send_handler))
        .route("/history/clear", post(history_clear_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, max-age=0"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(
                "default-src 'self'; script-src 'self'; connect-src 'self'; img-src 'self'; style-src 'self'",
            ),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .with_state(state)
}

fn status_for(response: &ChatResponse) -> StatusCode {
    match response.error_kind {
        None => StatusCode::OK,
        Some(ErrorKind::InvalidInput) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::PayloadTooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
        Some(ErrorKind::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        // Upstream and backend failures stay structured 200s so the caller's
        // parser only ever sees this boundary's JSON.
        Some(_) => StatusCode::OK,
    }
}

fn respond(response: ChatResponse) -> axum::response::Response {
    (status_for(&response), Json(response)).into_response()
}

/// The session token is the caller's opaque bearer token; it keys both the
/// rate limiter and the history store.
fn extract_session(
    headers: &HeaderMap,
    allowed: Option<&HashSet<String>>,
) -> Result<String, axum::response::Response> {
    let unauthorized = || {
        (
            StatusCode::UNAUTHORIZED,
            Json(ChatResponse::failure(
                ErrorKind::InvalidInput,
                "Missing or invalid session token.",
            )),
        )
            .into_response()
    };

    let raw = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;
    if raw.len() < 7 || !raw[..6].eq_ignore_ascii_case("bearer") {
        return Err(unauthorized());
    }
    let token = raw[6..].trim();
    if token.is_empty() {
        return Err(unauthorized());
    }
    if let Some(tokens) = allowed {
        if !tokens.contains(token) {
            return Err(unauthorized());
        }
    }
    Ok(token.to_string())
}

/// Content-Length guard ahead of body buffering.
fn oversize_by_header(headers: &HeaderMap, limit: usize) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .map(|len| len > limit)
        .unwrap_or(false)
}

fn payload_too_large(limit: usize) -> ChatResponse {
    ChatResponse::failure(
        ErrorKind::PayloadTooLarge,
        format!("Request too large (limit {} bytes).", limit),
    )
}

fn handle_json_rejection(limit: usize, rejection: JsonRejection) -> axum::response::Response {
    match rejection {
        JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        )) => {
            tracing::warn!(limit, "request body exceeded configured limit");
            respond(payload_too_large(limit))
        }
        other => {
            tracing::info!(reason = %other.body_text(), "rejected malformed request body");
            respond(ChatResponse::failure(
                ErrorKind::InvalidInput,
                "Malformed JSON request body.",
            ))
        }
    }
}

/// Handler for `POST /chat/send`: rate gate, validation, then either the
/// host-lookup flow or the relay flow.
async fn chat_send_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> axum::response::Response {
    let start = Instant::now();
    state.metric_requests_total.fetch_add(1, Ordering::Relaxed);

    let session = match extract_session(&headers, state.allowed_sessions.as_deref()) {
        Ok(session) => session,
        Err(response) => return response,
    };

    if state.limiter.admit(&session) == Decision::Deny {
        state
            .metric_rate_limited_total
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(session = %short_session(&session), "rate limit exceeded");
        let response = ChatResponse::failure(ErrorKind::RateLimited, THROTTLE_MESSAGE);
        state.telemetry.emit(&ChatEvent {
            kind: "chat",
            session: &session,
            ok: false,
            error_kind: response.error_kind,
            latency_ms: start.elapsed().as_millis(),
            flagged: false,
        });
        return respond(response);
    }

    if oversize_by_header(&headers, state.max_request_bytes) {
        return respond(payload_too_large(state.max_request_bytes));
    }

    let request = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => return handle_json_rejection(state.max_request_bytes, rejection),
    };

    // A host id takes precedence over free text: the lookup flow runs and
    // the message, if any, is ignored.
    let (response, flagged, kind) = if request.host_id.is_some() {
        state.metric_lookups_total.fetch_add(1, Ordering::Relaxed);
        let response = lookup::handle_lookup(state.monitor.as_deref(), &request).await;
        (response, false, "lookup")
    } else {
        let outcome = relay::relay_turn(&state, &session, &request).await;
        (outcome.response, outcome.flagged, "chat")
    };

    if matches!(
        response.error_kind,
        Some(
            ErrorKind::UpstreamTransportError
                | ErrorKind::UpstreamHttpError
                | ErrorKind::UpstreamMalformedResponse
                | ErrorKind::UpstreamServiceError
        )
    ) {
        state
            .metric_upstream_errors_total
            .fetch_add(1, Ordering::Relaxed);
    }
    if flagged {
        state.metric_flagged_total.fetch_add(1, Ordering::Relaxed);
    }

    state.telemetry.emit(&ChatEvent {
        kind,
        session: &session,
        ok: response.ok,
        error_kind: response.error_kind,
        latency_ms: start.elapsed().as_millis(),
        flagged,
    });
    respond(response)
}

/// Handler for `POST /history/clear`.
async fn history_clear_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ClearRequest>, JsonRejection>,
) -> axum::response::Response {
    let start = Instant::now();
    state.metric_requests_total.fetch_add(1, Ordering::Relaxed);

    let session = match extract_session(&headers, state.allowed_sessions.as_deref()) {
        Ok(session) => session,
        Err(response) => return response,
    };

    if state.limiter.admit(&session) == Decision::Deny {
        state
            .metric_rate_limited_total
            .fetch_add(1, Ordering::Relaxed);
        return respond(ChatResponse::failure(ErrorKind::RateLimited, THROTTLE_MESSAGE));
    }

    let request = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => return handle_json_rejection(state.max_request_bytes, rejection),
    };
    if !request.clear {
        return respond(ChatResponse::failure(
            ErrorKind::InvalidInput,
            "The clear flag is required.",
        ));
    }

    state.history.clear(&session);
    state.telemetry.emit(&ChatEvent {
        kind: "clear",
        session: &session,
        ok: true,
        error_kind: None,
        latency_ms: start.elapsed().as_millis(),
        flagged: false,
    });
    respond(ChatResponse::success("History cleared."))
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "monitorConfigured": state.monitor.is_some(),
        "scannerCount": state.sanitizer.scanner_count(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition.  Counters plus process gauges.
async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    use std::fmt::Write as _;
    let mut buf = String::new();
    let counters: [(&str, &str, u64); 7] = [
        (
            "chatgate_requests_total",
            "Total boundary requests handled",
            state.metric_requests_total.load(Ordering::Relaxed),
        ),
        (
            "chatgate_rate_limited_total",
            "Requests denied by the rate limiter",
            state.metric_rate_limited_total.load(Ordering::Relaxed),
        ),
        (
            "chatgate_upstream_errors_total",
            "Completion API calls that failed",
            state.metric_upstream_errors_total.load(Ordering::Relaxed),
        ),
        (
            "chatgate_flagged_replies_total",
            "Completion replies neutralized by the sanitizer",
            state.metric_flagged_total.load(Ordering::Relaxed),
        ),
        (
            "chatgate_lookups_total",
            "Host lookup requests handled",
            state.metric_lookups_total.load(Ordering::Relaxed),
        ),
        (
            "chatgate_telemetry_lines_total",
            "Event log lines written",
            state.telemetry.lines_total(),
        ),
        (
            "chatgate_telemetry_write_errors_total",
            "Event log line write failures",
            state.telemetry.write_errors_total(),
        ),
    ];
    for (name, help, value) in counters {
        writeln!(&mut buf, "# HELP {} {}", name, help).ok();
        writeln!(&mut buf, "# TYPE {} counter", name).ok();
        writeln!(&mut buf, "{} {}", name, value).ok();
    }
    writeln!(
        &mut buf,
        "# HELP chatgate_log_file_size_bytes Current size of the active event log (0 if disabled)\n# TYPE chatgate_log_file_size_bytes gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "chatgate_log_file_size_bytes {}",
        state.telemetry.file_size_bytes()
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP chatgate_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE chatgate_process_start_time_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "chatgate_process_start_time_seconds {}",
        state.process_start_epoch
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP chatgate_process_uptime_seconds Process uptime seconds\n# TYPE chatgate_process_uptime_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "chatgate_process_uptime_seconds {}",
        state.process_start_instant.elapsed().as_secs_f64()
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP chatgate_build_info Build information\n# TYPE chatgate_build_info gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "chatgate_build_info{{version=\"{}\"}} 1",
        env!("CARGO_PKG_VERSION")
    )
    .ok();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buf,
    )
        .into_response()
}
