use super::Scanner;
use once_cell::sync::Lazy;
use regex::Regex;

/// Flags opening `<script>` tags, with or without attributes.
#[derive(Default)]
pub struct ScriptTagScanner;

static SCRIPT_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<script\b[^>]*>").unwrap());

#[async_trait::async_trait]
impl Scanner for ScriptTagScanner {
    fn name(&self) -> &str {
        "script_tag"
    }

    async fn scan(&self, text: &str) -> bool {
        SCRIPT_TAG_RE.is_match(text)
    }
}
