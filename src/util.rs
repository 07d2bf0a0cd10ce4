//! Shared helpers for chatgate.
//!
//! Text escaping, character-based truncation and the memoized pattern
//! matcher used by the response scanners live here.  The escape functions
//! are entity-aware: text that already contains `&amp;`-style entities is
//! not re-encoded, so sanitizing twice yields the same output.

use ahash::AHasher;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use dashmap::DashMap;
use memchr::{memchr2, memchr3};
use once_cell::sync::Lazy;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Escape `&`, `<`, `>`, `"` and `'` for safe HTML embedding.
pub fn escape_html_full(input: &str) -> String {
    escape_html(input, true)
}

/// Escape `&`, `<` and `>` only, leaving quotes intact.  Used on the
/// formatting-preserving sanitizer path.
pub fn escape_html_text(input: &str) -> String {
    escape_html(input, false)
}

fn escape_html(input: &str, quotes: bool) -> String {
    let bytes = input.as_bytes();
    // Fast path: nothing to escape.
    if memchr3(b'&', b'<', b'>', bytes).is_none()
        && (!quotes || memchr2(b'"', b'\'', bytes).is_none())
    {
        return input.to_owned();
    }
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    let mut rest = input;
    while let Some(pos) = rest.find(['&', '<', '>', '"', '\'']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let ch = tail.chars().next().unwrap();
        match ch {
            '&' => {
                if let Some(len) = entity_len(tail) {
                    out.push_str(&tail[..len]);
                    rest = &tail[len..];
                    continue;
                }
                out.push_str("&amp;");
            }
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if quotes => out.push_str("&quot;"),
            '\'' if quotes => out.push_str("&#39;"),
            other => out.push(other),
        }
        rest = &tail[ch.len_utf8()..];
    }
    out.push_str(rest);
    out
}

/// Length in bytes of the entity starting at `s` (which begins with `&`),
/// or `None` if it is a bare ampersand.  Recognizes the named entities this
/// crate emits plus numeric character references.
fn entity_len(s: &str) -> Option<usize> {
    for named in ["&amp;", "&lt;", "&gt;", "&quot;", "&#39;"] {
        if s.starts_with(named) {
            return Some(named.len());
        }
    }
    // Numeric references: &#123; or &#x1f4a9;
    let body = s.strip_prefix("&#")?;
    let (digits, prefix_len) = match body.strip_prefix(['x', 'X']) {
        Some(hex) => (hex, 3),
        None => (body, 2),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(digits.len());
    if end == 0 || !digits[end..].starts_with(';') {
        return None;
    }
    Some(prefix_len + end + 1)
}

/// Truncate `input` to at most `max` characters, respecting char boundaries.
/// Returns the input untouched when it already fits.
pub fn truncate_chars(input: &str, max: usize) -> &str {
    match input.char_indices().nth(max) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Shortened session token for log lines.  Never log the full token.
pub fn short_session(token: &str) -> &str {
    truncate_chars(token, 8)
}

/// A memoising wrapper around `AhoCorasick::new` to avoid recompiling
/// automata for repeated pattern lists.  Keyed by a hash of the list.
static AC_CACHE: Lazy<DashMap<u64, Arc<AhoCorasick>>> = Lazy::new(DashMap::new);

/// Given a list of literal patterns, return a shared case-insensitive
/// `AhoCorasick` matcher.  Callers must ensure the pattern set does not
/// change between calls for the same list.
pub fn ac_for(list: &[&str]) -> Arc<AhoCorasick> {
    let mut hasher = AHasher::default();
    for pat in list {
        pat.hash(&mut hasher);
    }
    let key = hasher.finish();
    if let Some(existing) = AC_CACHE.get(&key) {
        return existing.clone();
    }
    let ac = AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .build(list)
        .unwrap();
    let arc = Arc::new(ac);
    AC_CACHE.insert(key, arc.clone());
    arc
}
