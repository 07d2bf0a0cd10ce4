use super::Scanner;
use crate::util::ac_for;

/// Flags URI schemes that execute or embed active content.  Literal
/// substrings, matched case-insensitively via a shared automaton.
#[derive(Default)]
pub struct UriSchemeScanner;

const UNSAFE_SCHEMES: [&str; 2] = ["javascript:", "data:text/html"];

#[async_trait::async_trait]
impl Scanner for UriSchemeScanner {
    fn name(&self) -> &str {
        "uri_scheme"
    }

    async fn scan(&self, text: &str) -> bool {
        ac_for(&UNSAFE_SCHEMES).is_match(text)
    }
}
