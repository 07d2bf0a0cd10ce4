//! Per-session conversation history.
//!
//! The store keeps an ordered log of role-tagged turns for each session and
//! normalizes on every read.  Older deployments persisted entries as
//! `{sender, text}` pairs; that shape is representable here as a tagged
//! union so it can be imported and rewritten into the canonical
//! `{role, content}` form without ever reaching the orchestrator.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Entries kept per session after each append.
pub const HISTORY_CAP: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One stored turn.  `Canonical` is what this service writes; `Legacy` is
/// the two-field shape older deployments produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Canonical { role: Role, content: String },
    Legacy { sender: String, text: String },
}

impl StoredEntry {
    /// Rewrite into the canonical shape; `None` drops the entry.
    fn normalize(&self) -> Option<HistoryEntry> {
        match self {
            StoredEntry::Canonical { role, content } => {
                Some(HistoryEntry::new(*role, content.clone()))
            }
            StoredEntry::Legacy { sender, text } => match sender.as_str() {
                "user" => Some(HistoryEntry::new(Role::User, text.clone())),
                "bot" | "assistant" => Some(HistoryEntry::new(Role::Assistant, text.clone())),
                _ => None,
            },
        }
    }
}

/// Bounded per-session history, keyed by the opaque session token.  The
/// map's entry lock serializes read-modify-write per session; sessions are
/// independent of each other.
#[derive(Default)]
pub struct HistoryStore {
    sessions: DashMap<String, Vec<StoredEntry>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the session log, normalized.  Entries that fit neither shape
    /// were already dropped at import; legacy senders outside the allowed
    /// set are dropped here.
    pub fn read(&self, session: &str) -> Vec<HistoryEntry> {
        self.sessions
            .get(session)
            .map(|entries| entries.iter().filter_map(StoredEntry::normalize).collect())
            .unwrap_or_default()
    }

    /// Append turns and apply the capacity bound, keeping the most recent
    /// `HISTORY_CAP` entries.
    pub fn append(&self, session: &str, entries: impl IntoIterator<Item = HistoryEntry>) {
        let mut log = self.sessions.entry(session.to_string()).or_default();
        for entry in entries {
            log.push(StoredEntry::Canonical {
                role: entry.role,
                content: entry.content,
            });
        }
        if log.len() > HISTORY_CAP {
            let excess = log.len() - HISTORY_CAP;
            log.drain(..excess);
        }
    }

    /// Seed a session from raw persisted values.  Values that parse as
    /// neither the canonical nor the legacy shape are silently dropped.
    pub fn import(&self, session: &str, raw: Vec<serde_json::Value>) {
        let mut entries: Vec<StoredEntry> = raw
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        if entries.len() > HISTORY_CAP {
            let excess = entries.len() - HISTORY_CAP;
            entries.drain(..excess);
        }
        self.sessions.insert(session.to_string(), entries);
    }

    pub fn clear(&self, session: &str) {
        self.sessions.remove(session);
    }

    pub fn len(&self, session: &str) -> usize {
        self.sessions.get(session).map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, session: &str) -> bool {
        self.len(session) == 0
    }
}
