//! The relay flow for one chat turn.
//!
//! Validate, load history, compose the upstream message sequence, call the
//! completion API, sanitize, persist, respond.  Failure at any step
//! short-circuits to the response; an upstream failure never mutates
//! history and nothing is retried.

use crate::history::{HistoryEntry, Role};
use crate::util::short_session;
use crate::{AppState, ChatRequest, ChatResponse, ErrorKind};

pub struct RelayOutcome {
    pub response: ChatResponse,
    /// Set when the sanitizer neutralized the reply.
    pub flagged: bool,
}

impl RelayOutcome {
    fn failed(response: ChatResponse) -> Self {
        Self {
            response,
            flagged: false,
        }
    }
}

pub async fn relay_turn(state: &AppState, session: &str, req: &ChatRequest) -> RelayOutcome {
    let turn = match crate::validate::validate_turn(req) {
        Ok(turn) => turn,
        Err(err) => {
            tracing::info!(session = %short_session(session), reason = %err, "chat turn rejected");
            return RelayOutcome::failed(ChatResponse::failure(
                ErrorKind::InvalidInput,
                err.to_string(),
            ));
        }
    };

    let history = state.history.read(session);

    // system prompt, then history in order, then the new user turn.
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(HistoryEntry::new(Role::System, turn.system_prompt.clone()));
    messages.extend(history);
    messages.push(HistoryEntry::new(Role::User, turn.message.clone()));

    let reply = match state.upstream.complete(&messages, &turn).await {
        Ok(reply) => reply,
        Err(err) => {
            tracing::warn!(session = %short_session(session), kind = ?err.kind(), error = %err, "completion call failed");
            return RelayOutcome::failed(ChatResponse::failure(err.kind(), err.to_string()));
        }
    };

    let sanitized = state.sanitizer.sanitize(&reply).await;

    state.history.append(
        session,
        [
            HistoryEntry::new(Role::User, turn.message),
            HistoryEntry::new(Role::Assistant, sanitized.text.clone()),
        ],
    );

    RelayOutcome {
        response: ChatResponse::success(sanitized.text),
        flagged: sanitized.flagged.is_some(),
    }
}
