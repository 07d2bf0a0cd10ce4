//! Host-selection flow: resolve a monitored host by id and fold its status
//! and recent problems into an assistant message.
//!
//! This path never touches the turn history; it produces a standalone
//! informational message keyed by the caller-supplied conversation id.

use serde_json::Value;

use crate::monitor::{HostRecord, MonitorClient, ProblemRecord};
use crate::util::escape_html_full;
use crate::validate::validate_credential;
use crate::{ChatRequest, ChatResponse, ErrorKind};

/// At most this many problems are embedded in the synthesized message.
pub const PROBLEM_LIMIT: usize = 5;

pub async fn handle_lookup(monitor: Option<&MonitorClient>, req: &ChatRequest) -> ChatResponse {
    let conversation_id = req
        .conversation_id
        .as_deref()
        .map(escape_html_full)
        .unwrap_or_default();

    if let Err(err) = validate_credential(req.credential.as_deref()) {
        return ChatResponse::failure(ErrorKind::InvalidInput, err.to_string())
            .with_conversation(conversation_id);
    }

    let host_id = match req.host_id.as_ref().and_then(coerce_host_id) {
        Some(id) => id,
        None => {
            return ChatResponse::failure(ErrorKind::InvalidInput, "Invalid host id.")
                .with_conversation(conversation_id);
        }
    };

    let Some(monitor) = monitor else {
        return lookup_failure(conversation_id);
    };
    let Some(host) = monitor.get_host_by_id(host_id).await else {
        return lookup_failure(conversation_id);
    };
    // A backend error on the problem query degrades to "no problems" rather
    // than failing the whole lookup.
    let problems = monitor.get_problems_for_host(host_id).await.unwrap_or_default();

    ChatResponse::success(compose_host_message(&host, &problems)).with_conversation(conversation_id)
}

fn lookup_failure(conversation_id: String) -> ChatResponse {
    ChatResponse::failure(
        ErrorKind::BackendLookupFailed,
        "Could not retrieve information for the selected host.",
    )
    .with_conversation(conversation_id)
}

/// Host ids must be positive integers; JSON numbers and numeric strings are
/// both accepted.
fn coerce_host_id(value: &Value) -> Option<u64> {
    let id = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (id > 0).then_some(id)
}

fn compose_host_message(host: &HostRecord, problems: &[ProblemRecord]) -> String {
    let status = if host.enabled { "Enabled" } else { "Disabled" };
    let mut message = String::from("I've retrieved information for the selected host.\n\n");
    message.push_str("Host information:\n");
    message.push_str(&format!("- Name: {}\n", escape_html_full(&host.name)));
    message.push_str(&format!("- Status: {status}\n"));

    if problems.is_empty() {
        message.push_str("\nNo active problems for this host.");
    } else {
        message.push_str("\nRecent problems:\n");
        for problem in problems.iter().take(PROBLEM_LIMIT) {
            message.push_str(&format!(
                "- {} (Severity: {})\n",
                escape_html_full(&problem.name),
                escape_html_full(&problem.severity)
            ));
        }
    }

    message.push_str("\n\nWhat would you like to know about this host?");
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host() -> HostRecord {
        HostRecord {
            id: 42,
            name: "web-01".into(),
            enabled: true,
        }
    }

    #[test]
    fn coerces_positive_integer_ids_only() {
        assert_eq!(coerce_host_id(&json!(42)), Some(42));
        assert_eq!(coerce_host_id(&json!("42")), Some(42));
        assert_eq!(coerce_host_id(&json!(" 7 ")), Some(7));
        assert_eq!(coerce_host_id(&json!(0)), None);
        assert_eq!(coerce_host_id(&json!(-3)), None);
        assert_eq!(coerce_host_id(&json!("abc")), None);
        assert_eq!(coerce_host_id(&json!(1.5)), None);
        assert_eq!(coerce_host_id(&json!(null)), None);
    }

    #[test]
    fn message_embeds_host_and_problems() {
        let problems = vec![
            ProblemRecord {
                name: "High CPU".into(),
                severity: "4".into(),
            },
            ProblemRecord {
                name: "Disk <full>".into(),
                severity: "2".into(),
            },
        ];
        let message = compose_host_message(&host(), &problems);
        assert!(message.contains("- Name: web-01"));
        assert!(message.contains("- Status: Enabled"));
        assert!(message.contains("- High CPU (Severity: 4)"));
        assert!(message.contains("- Disk &lt;full&gt; (Severity: 2)"));
    }

    #[test]
    fn message_without_problems_says_so() {
        let message = compose_host_message(&host(), &[]);
        assert!(message.contains("No active problems for this host."));
        assert!(!message.contains("Recent problems"));
    }

    #[test]
    fn problem_list_is_capped_at_five() {
        let problems: Vec<_> = (0..8)
            .map(|i| ProblemRecord {
                name: format!("p{i}"),
                severity: "1".into(),
            })
            .collect();
        let message = compose_host_message(&host(), &problems);
        assert!(message.contains("- p4 "));
        assert!(!message.contains("- p5 "));
    }

    #[test]
    fn disabled_hosts_are_reported_disabled() {
        let mut h = host();
        h.enabled = false;
        assert!(compose_host_message(&h, &[]).contains("- Status: Disabled"));
    }
}
