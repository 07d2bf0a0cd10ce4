use super::Scanner;
use once_cell::sync::Lazy;
use regex::Regex;

/// Flags `eval(` calls, tolerating whitespace before the parenthesis.
#[derive(Default)]
pub struct EvalCallScanner;

static EVAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\beval\s*\(").unwrap());

#[async_trait::async_trait]
impl Scanner for EvalCallScanner {
    fn name(&self) -> &str {
        "eval_call"
    }

    async fn scan(&self, text: &str) -> bool {
        EVAL_RE.is_match(text)
    }
}
