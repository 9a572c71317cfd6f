use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Namespace for deterministic UUID v5 ids derived from external identifiers.
/// Generated via uuid5(NAMESPACE_URL, "hana-external-id").
const EXTERNAL_NS: Uuid = Uuid::from_bytes([
    0x3b, 0x6e, 0x91, 0x0c, 0x5d, 0x2a, 0x5f, 0x41,
    0x9c, 0x07, 0xe4, 0x1d, 0x62, 0xa8, 0x37, 0xb5,
]);

/// Stable UUID for an external identifier (message id, thread id, user id).
/// The same input always maps to the same UUID, across restarts.
pub fn stable_id(external: &str) -> Uuid {
    Uuid::new_v5(&EXTERNAL_NS, external.as_bytes())
}

// ── Platform events ────────────────────────────────────────────

/// One reply-style message fetched from the platform. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: String,
    pub conversation_id: String,
    pub author_id: String,
    pub author_handle: String,
    pub author_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

impl InboundEvent {
    /// True when the event is strictly newer than `now - threshold`.
    pub fn is_recent(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let Ok(window) = TimeDelta::from_std(threshold) else {
            return true;
        };
        match now.checked_sub_signed(window) {
            Some(cutoff) => self.created_at > cutoff,
            None => true,
        }
    }

    /// True when the event was written by `handle` (case-insensitive, `@` ignored).
    pub fn is_authored_by(&self, handle: &str) -> bool {
        normalize_handle(&self.author_handle) == normalize_handle(handle)
    }
}

pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

// ── Fragments ──────────────────────────────────────────────────

/// A persisted unit of conversation content (one message, inbound or outbound).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: Uuid,
    /// Platform identifier of the message this fragment was built from.
    /// Fragments carrying one enter the processed index when stored.
    pub external_id: Option<String>,
    pub actor_id: Uuid,
    pub session_id: Uuid,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Fragment {
    /// Build the fragment for an inbound event. Ids are derived from the
    /// event's external ids so that re-fetching the event is idempotent.
    pub fn from_event(event: &InboundEvent, embedding: Vec<f32>) -> Self {
        Self {
            id: stable_id(&event.id),
            external_id: Some(event.id.clone()),
            actor_id: stable_id(&event.author_id),
            session_id: stable_id(&event.conversation_id),
            content: event.text.clone(),
            embedding,
            metadata: to_metadata(event),
            created_at: event.created_at,
        }
    }

    /// Empty seed fragment for unprompted posts: nothing is being replied to.
    pub fn seed(agent: &AgentIdentity) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: None,
            actor_id: agent.actor_id,
            session_id: agent.session_id,
            content: String::new(),
            embedding: Vec::new(),
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Serialize any record into a flat JSON metadata map.
/// Non-object values yield an empty map.
pub fn to_metadata<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

// ── Insights ───────────────────────────────────────────────────

/// What an insight is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightScope {
    /// The conversation thread.
    Session,
    /// The person who wrote the message.
    Actor,
    /// Standalone observations worth remembering regardless of thread or author.
    Unique,
}

impl InsightScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Actor => "actor",
            Self::Unique => "unique",
        }
    }
}

/// A short fact extracted from a fragment and kept for later prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: Uuid,
    pub scope: InsightScope,
    /// Session or actor id; `None` for unique insights.
    pub subject_id: Option<Uuid>,
    pub content: String,
    pub source_fragment: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    /// Insight number `n` of `scope` extracted from `source`. The id is
    /// derived from those three, so re-extracting is idempotent.
    pub fn extracted(source: &Fragment, scope: InsightScope, n: usize, content: impl Into<String>) -> Self {
        let subject_id = match scope {
            InsightScope::Session => Some(source.session_id),
            InsightScope::Actor => Some(source.actor_id),
            InsightScope::Unique => None,
        };
        Self {
            id: stable_id(&format!("insight:{}:{}:{n}", source.id, scope.as_str())),
            scope,
            subject_id,
            content: content.into(),
            source_fragment: source.id,
            created_at: Utc::now(),
        }
    }
}

// ── Agent identity ─────────────────────────────────────────────

/// Who the agent is on the platform. Derived once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub name: String,
    pub handle: String,
    pub actor_id: Uuid,
    /// Fixed session that holds the agent's unprompted posts.
    pub session_id: Uuid,
}

impl AgentIdentity {
    pub fn new(name: impl Into<String>, handle: impl Into<String>) -> Self {
        let name = name.into();
        let handle = handle.into();
        Self {
            actor_id: stable_id(&format!("actor:{}", normalize_handle(&handle))),
            session_id: stable_id(&format!("session:{name}")),
            name,
            handle,
        }
    }

    pub fn owns_handle(&self, handle: &str) -> bool {
        normalize_handle(&self.handle) == normalize_handle(handle)
    }
}

// ── Conversation state ─────────────────────────────────────────

/// Custom-data key carrying the agent's platform handle.
pub const AGENT_HANDLE: &str = "agent_handle";
/// Custom-data key carrying the agent's display name.
pub const AGENT_NAME: &str = "agent_name";

/// Working context for one pipeline run. Created fresh per run and never
/// shared between runs.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub input: Fragment,
    manager_data: HashMap<String, Value>,
    custom_data: HashMap<String, String>,
}

impl ConversationState {
    pub fn new(input: Fragment) -> Self {
        Self {
            input,
            manager_data: HashMap::new(),
            custom_data: HashMap::new(),
        }
    }

    /// True for outbound runs seeded with an empty fragment.
    pub fn is_seed(&self) -> bool {
        self.input.external_id.is_none() && self.input.content.is_empty()
    }

    pub fn set_manager_data(&mut self, key: impl Into<String>, value: Value) {
        self.manager_data.insert(key.into(), value);
    }

    pub fn manager_data(&self, key: &str) -> Option<&Value> {
        self.manager_data.get(key)
    }

    pub fn add_custom_data(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.custom_data.insert(key.into(), value.into());
    }

    pub fn custom_data(&self, key: &str) -> Option<&str> {
        self.custom_data.get(key).map(String::as_str)
    }

    /// Text value for a template placeholder: manager data first, then custom
    /// data. Non-string JSON values render as compact JSON.
    pub fn lookup(&self, key: &str) -> Option<String> {
        if let Some(value) = self.manager_data.get(key) {
            return Some(match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            });
        }
        self.custom_data.get(key).cloned()
    }
}

// ── Moderation ─────────────────────────────────────────────────

/// Closed set of policy violations the moderation model may report.
/// Codes outside the set deserialize as [`ViolationCode::Unclassified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    Racism,
    /// Promotion of other projects or contract addresses.
    ShillOtherCa,
    Sexism,
    RevealPrompts,
    SexualContent,
    /// Veiled attempts to steer around the other rules.
    Hinting,
    #[serde(other)]
    Unclassified,
}

impl ViolationCode {
    /// Every code the policy defines, in policy order.
    pub const POLICY: [ViolationCode; 6] = [
        Self::Racism,
        Self::ShillOtherCa,
        Self::Sexism,
        Self::RevealPrompts,
        Self::SexualContent,
        Self::Hinting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Racism => "RACISM",
            Self::ShillOtherCa => "SHILL_OTHER_CA",
            Self::Sexism => "SEXISM",
            Self::RevealPrompts => "REVEAL_PROMPTS",
            Self::SexualContent => "SEXUAL_CONTENT",
            Self::Hinting => "HINTING",
            Self::Unclassified => "UNCLASSIFIED",
        }
    }
}

impl std::fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content-safety verdict written into the state by the guardrails manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub allowed: bool,
    #[serde(default)]
    pub reasons: Vec<ViolationCode>,
}

// ── Responses ──────────────────────────────────────────────────

/// Platform addressing for an outgoing message, stored as fragment metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyShape {
    pub author_handle: String,
    pub author_name: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

/// A composed message ready to publish. Ownership moves to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedResponse {
    /// Agent-authored fragment with the final text and its embedding.
    pub fragment: Fragment,
    /// Platform conversation the message belongs to.
    pub conversation_id: String,
    pub in_reply_to: Option<String>,
}

impl ComposedResponse {
    pub fn text(&self) -> &str {
        &self.fragment.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_at(created_at: DateTime<Utc>) -> InboundEvent {
        InboundEvent {
            id: "1001".into(),
            conversation_id: "900".into(),
            author_id: "42".into(),
            author_handle: "alice".into(),
            author_name: "Alice".into(),
            text: "hello hana".into(),
            created_at,
            in_reply_to: Some("999".into()),
        }
    }

    #[test]
    fn recency_cutoff_is_exclusive() {
        let now = Utc::now();
        let day = Duration::from_secs(24 * 3600);
        assert!(event_at(now - TimeDelta::hours(23)).is_recent(now, day));
        assert!(!event_at(now - TimeDelta::hours(24)).is_recent(now, day));
        assert!(!event_at(now - TimeDelta::hours(30)).is_recent(now, day));
    }

    #[test]
    fn handles_compare_loosely() {
        let e = event_at(Utc::now());
        assert!(e.is_authored_by("@Alice"));
        assert!(!e.is_authored_by("bob"));
    }

    #[test]
    fn event_fragment_ids_are_stable() {
        let e = event_at(Utc::now());
        let a = Fragment::from_event(&e, vec![1.0]);
        let b = Fragment::from_event(&e, vec![2.0]);
        assert_eq!(a.id, b.id);
        assert_eq!(a.session_id, stable_id("900"));
        assert_eq!(a.external_id.as_deref(), Some("1001"));
        assert_eq!(a.metadata_str("author_handle"), Some("alice"));
        assert_eq!(a.metadata_str("in_reply_to"), Some("999"));
    }

    #[test]
    fn seed_fragment_is_empty() {
        let agent = AgentIdentity::new("hana", "hana_bot");
        let state = ConversationState::new(Fragment::seed(&agent));
        assert!(state.is_seed());
        assert_eq!(state.input.session_id, agent.session_id);
    }

    #[test]
    fn lookup_prefers_manager_data() {
        let agent = AgentIdentity::new("hana", "hana_bot");
        let mut state = ConversationState::new(Fragment::seed(&agent));
        state.add_custom_data("k", "custom");
        assert_eq!(state.lookup("k").as_deref(), Some("custom"));
        state.set_manager_data("k", Value::String("manager".into()));
        assert_eq!(state.lookup("k").as_deref(), Some("manager"));
        state.set_manager_data("n", serde_json::json!({"a": 1}));
        assert_eq!(state.lookup("n").as_deref(), Some("{\"a\":1}"));
        assert_eq!(state.lookup("missing"), None);
    }

    #[test]
    fn verdict_reasons_default_empty() {
        let v: ModerationVerdict = serde_json::from_str(r#"{"allowed": true}"#).unwrap();
        assert!(v.allowed);
        assert!(v.reasons.is_empty());
    }

    #[test]
    fn violation_codes_use_policy_names() {
        let v: ModerationVerdict =
            serde_json::from_str(r#"{"allowed": false, "reasons": ["SHILL_OTHER_CA", "HINTING", "spam"]}"#).unwrap();
        assert_eq!(
            v.reasons,
            vec![ViolationCode::ShillOtherCa, ViolationCode::Hinting, ViolationCode::Unclassified]
        );
        for code in ViolationCode::POLICY {
            assert_eq!(serde_json::to_value(code).unwrap(), Value::String(code.as_str().into()));
        }
    }

    #[test]
    fn insights_attach_to_their_scope() {
        let fragment = Fragment::from_event(&event_at(Utc::now()), vec![]);
        let session = Insight::extracted(&fragment, InsightScope::Session, 0, "thread is about fees");
        let actor = Insight::extracted(&fragment, InsightScope::Actor, 0, "alice trades daily");
        let unique = Insight::extracted(&fragment, InsightScope::Unique, 0, "fees doubled this week");
        assert_eq!(session.subject_id, Some(fragment.session_id));
        assert_eq!(actor.subject_id, Some(fragment.actor_id));
        assert_eq!(unique.subject_id, None);
        assert_ne!(session.id, actor.id);
        assert_eq!(session.id, Insight::extracted(&fragment, InsightScope::Session, 0, "other text").id);
    }

    #[test]
    fn agent_identity_matches_handle() {
        let agent = AgentIdentity::new("hana", "Hana_Bot");
        assert!(agent.owns_handle("@hana_bot"));
        assert_eq!(agent.actor_id, AgentIdentity::new("hana", "hana_bot").actor_id);
    }
}
