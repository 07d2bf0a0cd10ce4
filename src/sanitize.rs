//! Post-processing of completion replies before they reach the caller.
//!
//! Two-tier policy: any hint of active content forfeits all formatting and
//! the whole reply is quote-escaped; otherwise the reply is escaped and a
//! small fixed allow-list of formatting tags is re-enabled.

use crate::scanners::ScannerPipeline;
use crate::util::{escape_html_full, escape_html_text, truncate_chars};

pub const MAX_REPLY_CHARS: usize = 16384;
pub const TRUNCATION_MARKER: &str = "\n\n[Reply truncated for being too long]";

pub struct SanitizeOutcome {
    pub text: String,
    /// Name of the scanner that flagged the reply, when one did.
    pub flagged: Option<String>,
}

pub struct Sanitizer {
    pipeline: ScannerPipeline,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            pipeline: ScannerPipeline::default_set(),
        }
    }
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scanner_count(&self) -> usize {
        self.pipeline.len()
    }

    pub async fn sanitize(&self, reply: &str) -> SanitizeOutcome {
        let cut = truncate_chars(reply, MAX_REPLY_CHARS);
        let mut text = cut.to_owned();
        if cut.len() < reply.len() {
            text.push_str(TRUNCATION_MARKER);
        }

        if let Some(scanner) = self.pipeline.detect(&text).await {
            tracing::warn!(scanner = %scanner, "possible active content in completion reply, neutralizing");
            return SanitizeOutcome {
                text: escape_html_full(&text),
                flagged: Some(scanner),
            };
        }

        SanitizeOutcome {
            text: restore_allowed_tags(&escape_html_text(&text)),
            flagged: None,
        }
    }
}

/// Re-enable exactly the allow-listed formatting tokens.
fn restore_allowed_tags(text: &str) -> String {
    text.replace("&lt;br&gt;", "<br>")
        .replace("&lt;b&gt;", "<b>")
        .replace("&lt;/b&gt;", "</b>")
        .replace("&lt;i&gt;", "<i>")
        .replace("&lt;/i&gt;", "</i>")
        .replace("&lt;code&gt;", "<code>")
        .replace("&lt;/code&gt;", "</code>")
}
