use super::Scanner;
use once_cell::sync::Lazy;
use regex::Regex;

/// Flags inline DOM event handler attributes (`onclick=`, `onerror=`, ...).
#[derive(Default)]
pub struct EventHandlerScanner;

static EVENT_HANDLER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bon[a-z]+\s*=").unwrap());

#[async_trait::async_trait]
impl Scanner for EventHandlerScanner {
    fn name(&self) -> &str {
        "event_handler"
    }

    async fn scan(&self, text: &str) -> bool {
        EVENT_HANDLER_RE.is_match(text)
    }
}
