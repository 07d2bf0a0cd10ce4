//! Input validation for chat turns.
//!
//! Produces a typed, fully-defaulted [`ValidTurn`] or a specific rejection.
//! Numeric parameters are deliberately permissive: out-of-range or
//! non-numeric values fall back to defaults instead of failing the request.
//! The credential value must never appear in logs or responses.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::util::{escape_html_full, truncate_chars};
use crate::ChatRequest;

/// Models accepted by the relay; anything else falls back to the default.
pub const ALLOWED_MODELS: [&str; 4] = ["gpt-3.5-turbo", "gpt-4", "gpt-4o", "gpt-4-turbo"];
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 800;
pub const MAX_MESSAGE_CHARS: usize = 4000;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant for an infrastructure \
monitoring platform, experienced with monitoring and alerting. Help the user with their \
questions clearly and concisely, keeping the context of previous exchanges.";

static CREDENTIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^sk-[A-Za-z0-9_\-]{10,}$").unwrap());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("The message cannot be empty.")]
    MissingMessage,
    #[error("API credential not provided or invalid. Configure it in the chat settings.")]
    InvalidCredential,
}

/// A validated chat turn.  Constructed fresh per request, never persisted;
/// the credential is used for exactly one outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidTurn {
    pub message: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub credential: String,
}

/// Check the credential shape shared by the chat and lookup paths.
pub fn validate_credential(credential: Option<&str>) -> Result<&str, ValidationError> {
    match credential {
        Some(c) if CREDENTIAL_RE.is_match(c) => Ok(c),
        _ => Err(ValidationError::InvalidCredential),
    }
}

pub fn validate_turn(req: &ChatRequest) -> Result<ValidTurn, ValidationError> {
    let raw_message = req.message.as_deref().map(str::trim).unwrap_or("");
    if raw_message.is_empty() {
        return Err(ValidationError::MissingMessage);
    }
    let credential = validate_credential(req.credential.as_deref())?.to_owned();

    let escaped = escape_html_full(raw_message);
    let message = truncate_chars(&escaped, MAX_MESSAGE_CHARS).to_owned();

    let model = match req.model.as_deref() {
        Some(m) if ALLOWED_MODELS.contains(&m) => m.to_owned(),
        _ => DEFAULT_MODEL.to_owned(),
    };

    let temperature = coerce_f64(req.temperature.as_ref())
        .filter(|t| (0.0..=1.0).contains(t))
        .unwrap_or(DEFAULT_TEMPERATURE);

    let max_tokens = coerce_u32(req.max_tokens.as_ref())
        .filter(|t| (1..=4000).contains(t))
        .unwrap_or(DEFAULT_MAX_TOKENS);

    let system_prompt = match req.system_prompt.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => escape_html_full(p),
        _ => DEFAULT_SYSTEM_PROMPT.to_owned(),
    };

    Ok(ValidTurn {
        message,
        model,
        temperature,
        max_tokens,
        system_prompt,
        credential,
    })
}

/// Numeric coercion accepting JSON numbers and numeric strings.
fn coerce_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_u32(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
