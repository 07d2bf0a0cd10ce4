//! Outbound client for the LLM completion API.
//!
//! Fixed security posture: rustls with certificate and hostname
//! verification, HTTPS-only redirects capped at 3, 10s connect / 60s
//! overall timeouts.  The credential travels only in the authorization
//! header and is never logged.

use std::error::Error as _;
use std::time::Duration;

use reqwest::{redirect, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::HistoryEntry;
use crate::validate::ValidTurn;
use crate::ErrorKind;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const MAX_REDIRECTS: usize = 3;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Connection security error: the completion API certificate could not be verified.")]
    Tls(String),
    #[error("Connection error: {0}")]
    Transport(String),
    #[error("Completion API request failed with HTTP {0}.")]
    Status(u16),
    #[error("Could not decode the completion API response.")]
    Malformed(String),
    #[error("Completion API error: {0}")]
    Service(String),
    #[error("Unexpected response format from the completion API.")]
    UnexpectedShape,
}

impl UpstreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpstreamError::Tls(_) | UpstreamError::Transport(_) => ErrorKind::UpstreamTransportError,
            UpstreamError::Status(_) => ErrorKind::UpstreamHttpError,
            UpstreamError::Malformed(_) | UpstreamError::UnexpectedShape => {
                ErrorKind::UpstreamMalformedResponse
            }
            UpstreamError::Service(_) => ErrorKind::UpstreamServiceError,
        }
    }
}

#[derive(Serialize)]
struct CompletionPayload<'a> {
    model: &'a str,
    messages: &'a [HistoryEntry],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionReply {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ServiceError {
    message: Option<String>,
}

pub struct CompletionClient {
    url: String,
    client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .redirect(redirect::Policy::custom(|attempt| {
                if attempt.previous().len() > MAX_REDIRECTS {
                    attempt.error("too many redirects")
                } else if attempt.url().scheme() != "https" {
                    attempt.error("redirect to a non-HTTPS endpoint refused")
                } else {
                    attempt.follow()
                }
            }))
            .build()
            .expect("failed to build reqwest client");
        Self {
            url: url.into(),
            client,
        }
    }

    /// One completion call.  The composed `messages` sequence already carries
    /// the system prompt and normalized history; no retry on any failure.
    pub async fn complete(
        &self,
        messages: &[HistoryEntry],
        turn: &ValidTurn,
    ) -> Result<String, UpstreamError> {
        self.check_scheme()?;
        let payload = CompletionPayload {
            model: &turn.model,
            messages,
            temperature: turn.temperature,
            max_tokens: turn.max_tokens,
        };
        let resp = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .bearer_auth(&turn.credential)
            .json(&payload)
            .send()
            .await
            .map_err(classify_send_error)?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }
        parse_reply(&body)
    }

    /// Plaintext HTTP is accepted only towards loopback (local testing);
    /// everything else must be HTTPS.
    fn check_scheme(&self) -> Result<(), UpstreamError> {
        let url = Url::parse(&self.url)
            .map_err(|e| UpstreamError::Transport(format!("invalid upstream URL: {e}")))?;
        if url.scheme() == "https" {
            return Ok(());
        }
        let loopback = matches!(url.host_str(), Some("127.0.0.1") | Some("localhost") | Some("[::1]"));
        if url.scheme() == "http" && loopback {
            return Ok(());
        }
        Err(UpstreamError::Transport(
            "the completion API endpoint must use HTTPS".into(),
        ))
    }
}

fn parse_reply(body: &str) -> Result<String, UpstreamError> {
    if body.trim().is_empty() {
        return Err(UpstreamError::Malformed("empty response body".into()));
    }
    let reply: CompletionReply =
        serde_json::from_str(body).map_err(|e| UpstreamError::Malformed(e.to_string()))?;
    if let Some(err) = reply.error {
        return Err(UpstreamError::Service(
            err.message.unwrap_or_else(|| "unknown error".into()),
        ));
    }
    reply
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or(UpstreamError::UnexpectedShape)
}

fn classify_send_error(err: reqwest::Error) -> UpstreamError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = err.source();
    while let Some(inner) = source {
        let text = inner.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("handshake") || text.contains("tls") {
            return UpstreamError::Tls(inner.to_string());
        }
        source = inner.source();
    }
    if err.is_timeout() {
        return UpstreamError::Transport("request timed out".into());
    }
    UpstreamError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_successful_reply() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hi there"}}]}"#;
        assert_eq!(parse_reply(body).unwrap(), "hi there");
    }

    #[test]
    fn service_errors_propagate_the_upstream_message() {
        let body = r#"{"error":{"message":"quota exceeded"}}"#;
        match parse_reply(body) {
            Err(UpstreamError::Service(msg)) => assert_eq!(msg, "quota exceeded"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_content_is_an_unexpected_shape() {
        for body in [
            r#"{"choices":[]}"#,
            r#"{"choices":[{"message":{}}]}"#,
            r#"{"choices":[{}]}"#,
            r#"{}"#,
        ] {
            assert!(matches!(parse_reply(body), Err(UpstreamError::UnexpectedShape)));
        }
    }

    #[test]
    fn unparseable_bodies_are_malformed() {
        assert!(matches!(parse_reply("not json"), Err(UpstreamError::Malformed(_))));
        assert!(matches!(parse_reply("  "), Err(UpstreamError::Malformed(_))));
    }

    #[test]
    fn error_kinds_map_to_the_boundary_taxonomy() {
        assert_eq!(
            UpstreamError::Tls("x".into()).kind(),
            ErrorKind::UpstreamTransportError
        );
        assert_eq!(UpstreamError::Status(500).kind(), ErrorKind::UpstreamHttpError);
        assert_eq!(
            UpstreamError::UnexpectedShape.kind(),
            ErrorKind::UpstreamMalformedResponse
        );
        assert_eq!(
            UpstreamError::Service("x".into()).kind(),
            ErrorKind::UpstreamServiceError
        );
    }

    #[test]
    fn non_https_remote_endpoints_are_refused() {
        let client = CompletionClient::new("http://api.example.com/v1/chat/completions");
        assert!(client.check_scheme().is_err());
        let local = CompletionClient::new("http://127.0.0.1:9999/v1/chat/completions");
        assert!(local.check_scheme().is_ok());
        let https = CompletionClient::new("https://api.openai.com/v1/chat/completions");
        assert!(https.check_scheme().is_ok());
    }
}
