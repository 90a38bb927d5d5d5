//! Thin convenience wrapper over [`Store`]'s audit log: records every
//! policy-relevant event the agent loop and approval pipeline produce.

use serde_json::{Value, json};

use crate::error::Result;
use crate::store::{AuditEventRow, Store};

/// Everything needed to attribute an audit event to a turn.
#[derive(Debug, Clone)]
pub struct AuditSubject<'a> {
    pub workspace_id: Option<&'a str>,
    pub context_id: Option<&'a str>,
    pub connector: Option<&'a str>,
    pub external_id: Option<&'a str>,
}

/// Append an event. `detail` is free-form JSON specific to `event_type`
/// (e.g. `{"tool": "search", "error": "..."}`).
pub async fn record(store: &Store, subject: &AuditSubject<'_>, event_type: &str, blocked: bool, detail: Value) -> Result<()> {
    store
        .append_audit_event(
            subject.workspace_id,
            subject.context_id,
            subject.connector,
            subject.external_id,
            event_type,
            blocked,
            &detail,
        )
        .await
}

/// Record a turn being blocked by policy, with the reason as detail.
pub async fn record_block(store: &Store, subject: &AuditSubject<'_>, reason: &str) -> Result<()> {
    record(store, subject, "turn.blocked", true, json!({ "reason": reason })).await
}

/// Fetch recent audit events for a context, newest first.
pub async fn recent(store: &Store, context_id: &str, blocked_only: bool, limit: usize) -> Result<Vec<AuditEventRow>> {
    store.list_audit_events(context_id, blocked_only, limit).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_then_recent_round_trips() {
        let store = Store::open_in_memory().await.expect("store");
        let subject = AuditSubject {
            workspace_id: Some("ws_1"),
            context_id: Some("ctx_1"),
            connector: Some("cli"),
            external_id: Some("local"),
        };
        record_block(&store, &subject, "max tool calls").await.expect("record");
        let events = recent(&store, "ctx_1", true, 10).await.expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "turn.blocked");
    }
}
