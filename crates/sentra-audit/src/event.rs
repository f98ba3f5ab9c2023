//! Audit event model and canonical hashing serialization.
//!
//! Events are stored as JSON with snake_case field names. Hashing uses a
//! separate canonical rendering with a pinned field order and omit rules, so
//! a digest computed today can be recomputed byte-for-byte by any verifier.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use sentra_core::time::format_event_timestamp;

// =============================================================================
// Event type
// =============================================================================

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum AuditEventType {
    /// Successful interactive login.
    LoginSuccess,
    /// Failed interactive login.
    LoginFailure,
    /// Access token issued.
    TokenIssued,
    /// Access token validated.
    TokenValidated,
    /// Access token revoked.
    TokenRevoked,
    /// API key created.
    ApiKeyCreated,
    /// API key used.
    ApiKeyUsed,
    /// API key revoked.
    ApiKeyRevoked,
    /// A rate limit rejected a request.
    RateLimitExceeded,
    /// An authorization check denied access.
    PermissionDenied,
    /// An authorization check ran.
    AuthzCheck,
    /// The policy set changed.
    PolicyChange,
    /// An autonomous agent acted.
    AgentAction,
}

impl AuditEventType {
    /// Returns the wire representation of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginSuccess => "loginSuccess",
            Self::LoginFailure => "loginFailure",
            Self::TokenIssued => "tokenIssued",
            Self::TokenValidated => "tokenValidated",
            Self::TokenRevoked => "tokenRevoked",
            Self::ApiKeyCreated => "apiKeyCreated",
            Self::ApiKeyUsed => "apiKeyUsed",
            Self::ApiKeyRevoked => "apiKeyRevoked",
            Self::RateLimitExceeded => "rateLimitExceeded",
            Self::PermissionDenied => "permissionDenied",
            Self::AuthzCheck => "authzCheck",
            Self::PolicyChange => "policyChange",
            Self::AgentAction => "agentAction",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Event
// =============================================================================

/// One audit event.
///
/// `prev_hash` links the event to its predecessor in the chain; `hash` is the
/// SHA-256 digest of the event's canonical rendering (see [`canonical_json`]).
/// Both are set by the hash chain, not by constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id.
    pub id: String,

    /// When the event happened (UTC, microsecond resolution).
    #[serde(with = "sentra_core::time::serde_micros")]
    pub timestamp: OffsetDateTime,

    /// Kind of event.
    pub event_type: AuditEventType,

    /// Who acted.
    pub actor_id: String,

    /// Acting agent, when the actor delegated to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Isolation boundary for query and verification.
    pub tenant_id: String,

    /// Source address of the request.
    #[serde(default)]
    pub ip_address: String,

    /// Client user agent.
    #[serde(default)]
    pub user_agent: String,

    /// Correlation id of the originating request.
    #[serde(default)]
    pub request_id: String,

    /// Whether the audited operation succeeded.
    pub success: bool,

    /// Failure description, when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Machine-readable failure code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    /// Free-form event attributes.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,

    /// Hash of the previous event in the chain; empty for genesis.
    #[serde(default)]
    pub prev_hash: String,

    /// SHA-256 of this event's canonical rendering, lowercase hex.
    #[serde(default)]
    pub hash: String,
}

impl AuditEvent {
    /// Starts building an event of the given type.
    #[must_use]
    pub fn builder(event_type: AuditEventType) -> AuditEventBuilder {
        AuditEventBuilder::new(event_type)
    }
}

/// Fluent builder for audit events.
#[derive(Debug, Clone)]
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    /// Creates a builder with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event: AuditEvent {
                id: Uuid::new_v4().to_string(),
                timestamp: OffsetDateTime::now_utc(),
                event_type,
                actor_id: String::new(),
                agent_id: None,
                tenant_id: String::new(),
                ip_address: String::new(),
                user_agent: String::new(),
                request_id: String::new(),
                success: true,
                error_message: None,
                error_code: None,
                metadata: serde_json::Map::new(),
                prev_hash: String::new(),
                hash: String::new(),
            },
        }
    }

    /// Sets the acting principal.
    #[must_use]
    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.event.actor_id = actor_id.into();
        self
    }

    /// Sets the acting agent.
    #[must_use]
    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.event.agent_id = Some(agent_id.into());
        self
    }

    /// Sets the tenant.
    #[must_use]
    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.event.tenant_id = tenant_id.into();
        self
    }

    /// Sets the source address.
    #[must_use]
    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.event.ip_address = ip.into();
        self
    }

    /// Sets the client user agent.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.event.user_agent = user_agent.into();
        self
    }

    /// Sets the request correlation id.
    #[must_use]
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.event.request_id = request_id.into();
        self
    }

    /// Sets the outcome.
    #[must_use]
    pub fn success(mut self, success: bool) -> Self {
        self.event.success = success;
        self
    }

    /// Marks the event failed with a code and message.
    #[must_use]
    pub fn error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.event.success = false;
        self.event.error_code = Some(code.into());
        self.event.error_message = Some(message.into());
        self
    }

    /// Adds one metadata attribute.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.event.metadata.insert(key.into(), value.into());
        self
    }

    /// Overrides the timestamp (tests and replays).
    #[must_use]
    pub fn at(mut self, timestamp: OffsetDateTime) -> Self {
        self.event.timestamp = timestamp;
        self
    }

    /// Finishes the event.
    #[must_use]
    pub fn build(self) -> AuditEvent {
        self.event
    }
}

// =============================================================================
// Canonical rendering
// =============================================================================

/// Renders the canonical JSON an event's hash is computed over.
///
/// Keys are emitted in a pinned order: `timestamp`, `event_type`, `actor_id`,
/// `agent_id` (omitted if empty), `tenant_id`, `ip_address`, `success`,
/// `error_code` (omitted if empty), `request_id` (omitted if empty),
/// `metadata` (omitted if empty; keys sorted lexicographically, recursively),
/// `prev_hash`. The `id`, `user_agent`, `error_message`, and `hash` fields
/// are not part of the hashed rendering.
#[must_use]
pub fn canonical_json(event: &AuditEvent) -> String {
    let mut out = String::with_capacity(256);
    out.push('{');
    push_raw(
        &mut out,
        "timestamp",
        &json_string(&format_event_timestamp(event.timestamp)),
    );
    push_raw(&mut out, "event_type", &json_string(event.event_type.as_str()));
    push_raw(&mut out, "actor_id", &json_string(&event.actor_id));
    if let Some(agent_id) = event.agent_id.as_deref()
        && !agent_id.is_empty()
    {
        push_raw(&mut out, "agent_id", &json_string(agent_id));
    }
    push_raw(&mut out, "tenant_id", &json_string(&event.tenant_id));
    push_raw(&mut out, "ip_address", &json_string(&event.ip_address));
    push_raw(&mut out, "success", if event.success { "true" } else { "false" });
    if let Some(error_code) = event.error_code.as_deref()
        && !error_code.is_empty()
    {
        push_raw(&mut out, "error_code", &json_string(error_code));
    }
    if !event.request_id.is_empty() {
        push_raw(&mut out, "request_id", &json_string(&event.request_id));
    }
    if !event.metadata.is_empty() {
        let sorted = canonical_value(&Value::Object(event.metadata.clone()));
        push_raw(&mut out, "metadata", &sorted);
    }
    push_raw(&mut out, "prev_hash", &json_string(&event.prev_hash));
    out.push('}');
    out
}

/// Renders a JSON value with every object's keys sorted, recursively.
fn canonical_value(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(key, _)| key.as_str());
            let mut out = String::from("{");
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&json_string(key));
                out.push(':');
                out.push_str(&canonical_value(value));
            }
            out.push('}');
            out
        }
        Value::Array(items) => {
            let mut out = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonical_value(item));
            }
            out.push(']');
            out
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn push_raw(out: &mut String, key: &str, rendered: &str) {
    if !out.ends_with('{') {
        out.push(',');
    }
    out.push_str(&json_string(key));
    out.push(':');
    out.push_str(rendered);
}

fn json_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn login_event() -> AuditEvent {
        AuditEvent::builder(AuditEventType::LoginSuccess)
            .actor("alice")
            .tenant("t")
            .at(datetime!(2024-01-01 12:00:00 UTC))
            .build()
    }

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(AuditEventType::LoginSuccess.as_str(), "loginSuccess");
        assert_eq!(AuditEventType::ApiKeyRevoked.as_str(), "apiKeyRevoked");
        assert_eq!(AuditEventType::AuthzCheck.to_string(), "authzCheck");

        let json = serde_json::to_string(&AuditEventType::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"rateLimitExceeded\"");
    }

    #[test]
    fn test_canonical_minimal_event() {
        let rendered = canonical_json(&login_event());
        assert_eq!(
            rendered,
            r#"{"timestamp":"2024-01-01T12:00:00.000000Z","event_type":"loginSuccess","actor_id":"alice","tenant_id":"t","ip_address":"","success":true,"prev_hash":""}"#
        );
    }

    #[test]
    fn test_canonical_omits_only_empty_optionals() {
        let event = AuditEvent::builder(AuditEventType::PermissionDenied)
            .actor("bob")
            .tenant("t")
            .agent("agent-7")
            .request_id("req-1")
            .error("denied", "no policy allowed access")
            .at(datetime!(2024-01-01 12:00:00 UTC))
            .build();

        let rendered = canonical_json(&event);
        assert!(rendered.contains(r#""agent_id":"agent-7""#));
        assert!(rendered.contains(r#""error_code":"denied""#));
        assert!(rendered.contains(r#""request_id":"req-1""#));
        assert!(rendered.contains(r#""success":false"#));
        // error_message, user_agent, id, and hash never enter the rendering.
        assert!(!rendered.contains("error_message"));
        assert!(!rendered.contains("user_agent"));
        assert!(!rendered.contains(r#""id""#));
        assert!(!rendered.contains(r#""hash""#));
        // Field order is pinned: agent_id sits between actor_id and tenant_id.
        let agent_pos = rendered.find("agent_id").unwrap();
        assert!(rendered.find("actor_id").unwrap() < agent_pos);
        assert!(agent_pos < rendered.find("tenant_id").unwrap());
    }

    #[test]
    fn test_canonical_metadata_keys_sorted_recursively() {
        let event = AuditEvent::builder(AuditEventType::AuthzCheck)
            .actor("alice")
            .tenant("t")
            .metadata("zebra", 1)
            .metadata("apple", serde_json::json!({ "c": 1, "a": [ { "b": 2, "a": 3 } ] }))
            .at(datetime!(2024-01-01 12:00:00 UTC))
            .build();

        let rendered = canonical_json(&event);
        assert!(rendered.contains(
            r#""metadata":{"apple":{"a":[{"a":3,"b":2}],"c":1},"zebra":1}"#
        ));
    }

    #[test]
    fn test_canonical_ignores_insertion_order() {
        let a = AuditEvent::builder(AuditEventType::AuthzCheck)
            .actor("alice")
            .tenant("t")
            .metadata("x", 1)
            .metadata("y", 2)
            .at(datetime!(2024-01-01 12:00:00 UTC))
            .build();
        let b = AuditEvent::builder(AuditEventType::AuthzCheck)
            .actor("alice")
            .tenant("t")
            .metadata("y", 2)
            .metadata("x", 1)
            .at(datetime!(2024-01-01 12:00:00 UTC))
            .build();

        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn test_storage_serialization_field_names() {
        let event = AuditEvent::builder(AuditEventType::TokenIssued)
            .actor("alice")
            .tenant("t")
            .user_agent("curl/8")
            .at(datetime!(2024-01-01 12:00:00.000001 UTC))
            .build();

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "tokenIssued");
        assert_eq!(json["actor_id"], "alice");
        assert_eq!(json["user_agent"], "curl/8");
        assert_eq!(json["timestamp"], "2024-01-01T12:00:00.000001Z");
        assert!(json.get("error_message").is_none());

        let back: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_builder_defaults() {
        let event = login_event();
        assert!(!event.id.is_empty());
        assert!(event.success);
        assert!(event.prev_hash.is_empty());
        assert!(event.hash.is_empty());
        assert!(event.metadata.is_empty());
    }
}
