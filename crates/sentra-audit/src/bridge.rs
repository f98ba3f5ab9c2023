//! Records policy-change events as audit events.
//!
//! Subscribing this bridge to a [`ChangeNotifier`] completes the
//! change-to-audit protocol: every published change is wrapped in a
//! `policyChange` audit event and submitted through the pipeline's
//! non-blocking ingest.

use std::sync::Arc;

use sentra_core::events::{ChangeEvent, ChangeNotifier};

use crate::event::{AuditEvent, AuditEventType};
use crate::pipeline::AuditService;

/// Subscribes `service` to every change event on `notifier`.
///
/// Each change is recorded as a `policyChange` audit event attributed to
/// `actor_id` under `tenant_id`. Ingest failures (a full buffer, shutdown)
/// are logged and dropped; audit pressure must never block policy changes.
pub fn record_policy_changes(
    notifier: &ChangeNotifier,
    service: Arc<AuditService>,
    tenant_id: impl Into<String>,
    actor_id: impl Into<String>,
) {
    let tenant_id = tenant_id.into();
    let actor_id = actor_id.into();

    notifier.subscribe_all(Arc::new(move |change: ChangeEvent| {
        let service = Arc::clone(&service);
        let event = change_to_audit(&change, &tenant_id, &actor_id);
        tokio::spawn(async move {
            if let Err(e) = service.log(event).await {
                tracing::warn!(
                    kind = %change.kind,
                    error = %e,
                    "Failed to record policy change in audit trail"
                );
            }
        });
    }));
}

/// Builds the audit event describing one policy change.
fn change_to_audit(change: &ChangeEvent, tenant_id: &str, actor_id: &str) -> AuditEvent {
    let mut builder = AuditEvent::builder(AuditEventType::PolicyChange)
        .actor(actor_id)
        .tenant(tenant_id)
        .at(change.timestamp)
        .metadata("change", change.kind.as_str());

    if let Some(version) = change.version {
        builder = builder.metadata("version", version);
    }
    if !change.policies.is_empty() {
        builder = builder.metadata("policies", serde_json::json!(change.policies));
    }
    if let Some(comment) = &change.comment {
        builder = builder.metadata("comment", comment.as_str());
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::store::{AuditEventStore, AuditQueryFilter, MemoryAuditStore};
    use sentra_core::events::ChangeEventKind;
    use std::time::Duration;

    #[tokio::test]
    async fn test_changes_recorded_as_policy_change_events() {
        let store = Arc::new(MemoryAuditStore::new());
        let service = Arc::new(AuditService::new(store.clone(), AuditConfig::default()));
        let notifier = ChangeNotifier::new();
        record_policy_changes(&notifier, Arc::clone(&service), "t", "policy-admin");
        notifier.start().await;

        notifier.publish(ChangeEvent::updated(
            7,
            vec!["p1".to_string()],
            "rollout",
        ));
        notifier.stop().await;

        // The handler spawns a task per change; give it a beat, then drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.start().await;
        service.close().await;

        let page = store.query(&AuditQueryFilter::new()).await.unwrap();
        assert_eq!(page.events.len(), 1);
        let event = &page.events[0];
        assert_eq!(event.event_type, AuditEventType::PolicyChange);
        assert_eq!(event.actor_id, "policy-admin");
        assert_eq!(event.tenant_id, "t");
        assert_eq!(event.metadata["change"], "policy.updated");
        assert_eq!(event.metadata["version"], 7);
        assert_eq!(event.metadata["policies"][0], "p1");
        assert_eq!(event.metadata["comment"], "rollout");
    }

    #[test]
    fn test_change_to_audit_minimal() {
        let change = ChangeEvent::new(ChangeEventKind::PolicyValidationFailed);
        let event = change_to_audit(&change, "t", "admin");
        assert_eq!(event.metadata["change"], "policy.validation_failed");
        assert!(!event.metadata.contains_key("version"));
        assert!(!event.metadata.contains_key("policies"));
        assert_eq!(event.timestamp, change.timestamp);
    }
}
