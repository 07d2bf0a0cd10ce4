//! Unsafe-content scanners for completion replies.
//!
//! Each scanner encapsulates one class of active-markup pattern.  The
//! `ScannerPipeline` runs the registered scanners in order and stops at the
//! first hit; the sanitizer treats any hit as a reason to neutralize the
//! whole reply.  Keeping the set behind one trait lets it grow without
//! touching the relay flow.

use std::sync::Arc;

pub mod eval_call;
pub mod event_handler;
pub mod script_tag;
pub mod uri_scheme;

use self::eval_call::EvalCallScanner;
use self::event_handler::EventHandlerScanner;
use self::script_tag::ScriptTagScanner;
use self::uri_scheme::UriSchemeScanner;

/// Trait implemented by all scanners.  Returning `true` flags the text as
/// carrying active content.
#[async_trait::async_trait]
pub trait Scanner: Send + Sync {
    fn name(&self) -> &str;
    async fn scan(&self, text: &str) -> bool;
}

#[derive(Clone)]
pub struct ScannerPipeline {
    scanners: Vec<Arc<dyn Scanner>>,
}

impl ScannerPipeline {
    pub fn new(scanners: Vec<Arc<dyn Scanner>>) -> Self {
        Self { scanners }
    }

    /// The fixed set used for completion replies.
    pub fn default_set() -> Self {
        Self::new(vec![
            Arc::new(ScriptTagScanner),
            Arc::new(EventHandlerScanner),
            Arc::new(UriSchemeScanner),
            Arc::new(EvalCallScanner),
        ])
    }

    /// Name of the first scanner that flags `text`, if any.
    pub async fn detect(&self, text: &str) -> Option<String> {
        for scanner in &self.scanners {
            if scanner.scan(text).await {
                tracing::debug!(scanner = %scanner.name(), "scanner flagged reply content");
                return Some(scanner.name().to_string());
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }
}
