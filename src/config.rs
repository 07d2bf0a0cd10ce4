use std::collections::HashSet;
use std::env;

use anyhow::{anyhow, Result};

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Default cap on raw request body size: 1 MiB.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Completion API endpoint.
    pub upstream_url: String,
    /// Monitoring backend JSON-RPC endpoint; lookups fail soft when unset.
    pub monitor_url: Option<String>,
    /// Static monitoring auth token, used as-is when present.
    pub monitor_token: Option<String>,
    /// Credentials for the monitoring login handshake at start-up.
    pub monitor_user: Option<String>,
    pub monitor_pass: Option<String>,
    /// Requests admitted per session within one rate window.
    pub rate_limit: u32,
    pub rate_window_secs: u64,
    /// Maximum accepted raw request body size in bytes.
    pub max_request_bytes: usize,
    /// Optional allowlist of accepted session tokens.
    pub allowed_sessions: Option<HashSet<String>>,
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upstream_url: DEFAULT_UPSTREAM_URL.to_owned(),
            monitor_url: None,
            monitor_token: None,
            monitor_user: None,
            monitor_pass: None,
            rate_limit: 10,
            rate_window_secs: 60,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            allowed_sessions: None,
            log_file: None,
            rotation: RotationConfig {
                max_bytes: None,
                keep: 1,
                compress: false,
            },
            log_stdout: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let upstream_url =
            env::var("CHATGATE_UPSTREAM_URL").unwrap_or(defaults.upstream_url);
        let monitor_url = env::var("CHATGATE_MONITOR_URL").ok();
        let monitor_token = env::var("CHATGATE_MONITOR_TOKEN").ok();
        let monitor_user = env::var("CHATGATE_MONITOR_USER").ok();
        let monitor_pass = env::var("CHATGATE_MONITOR_PASS").ok();

        let rate_limit = parse_optional_u64("CHATGATE_RATE_LIMIT")?
            .map(|v| v as u32)
            .unwrap_or(defaults.rate_limit);
        let rate_window_secs =
            parse_optional_u64("CHATGATE_RATE_WINDOW_SECS")?.unwrap_or(defaults.rate_window_secs);
        let max_request_bytes = parse_optional_u64("CHATGATE_MAX_REQUEST_BYTES")?
            .map(|v| v as usize)
            .unwrap_or(defaults.max_request_bytes);

        let allowed_sessions = env::var("CHATGATE_ALLOWED_SESSIONS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect::<HashSet<_>>()
            })
            .filter(|set: &HashSet<String>| !set.is_empty());

        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        Ok(Self {
            upstream_url,
            monitor_url,
            monitor_token,
            monitor_user,
            monitor_pass,
            rate_limit,
            rate_window_secs,
            max_request_bytes,
            allowed_sessions,
            log_file: env::var("LOG_FILE").ok(),
            rotation,
            log_stdout: parse_bool_env("CHATGATE_LOG_STDOUT")?.unwrap_or(false),
        })
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
