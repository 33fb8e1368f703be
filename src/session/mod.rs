//! Durable conversational sessions.
//!
//! A [`Session`] is the unit of persistence for one `(application, owner)`
//! conversation: an append-only list of [`Event`]s plus a mutable key/value
//! state map. State is never written directly; every change rides on an
//! event's `state_delta` (or, for growing lists, its `state_append`) and is
//! applied when the event is appended, so the journal always explains the
//! snapshot.
//!
//! ## Components
//!
//! - [`SessionStore`]: the storage port used by the orchestrator
//! - [`store::FileSessionStore`]: one JSON file per session, fully rewritten on
//!   every append

pub mod store;

pub use store::FileSessionStore;

use crate::errors::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// State key holding the list of [`crate::orchestrator::AnalysisHistoryRecord`]s.
pub const HISTORY_KEY: &str = "analysis_history";

/// Who produced a piece of content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Model,
    System,
}

/// One piece of event content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Data { data: Value },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    pub fn empty(role: Role) -> Self {
        Self {
            role,
            parts: Vec::new(),
        }
    }
}

/// An immutable journal entry produced by a worker, the orchestrator or the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub author: String,
    pub content: Content,
    /// Marks the final event of a request.
    #[serde(default)]
    pub terminal: bool,
    /// Provisional until the event is appended; the store restamps it.
    pub timestamp: DateTime<Utc>,
    /// State writes carried by this event, applied on append.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub state_delta: Map<String, Value>,
    /// Items pushed onto list-valued state keys, applied after `state_delta`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub state_append: Map<String, Value>,
}

impl Event {
    pub fn new(author: impl Into<String>, content: Content) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author: author.into(),
            content,
            terminal: false,
            timestamp: Utc::now(),
            state_delta: Map::new(),
            state_append: Map::new(),
        }
    }

    /// Convenience for a single text part.
    pub fn text(author: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self::new(author, Content::text(role, text))
    }

    /// An event that only carries state writes.
    pub fn state_only(author: impl Into<String>, delta: Map<String, Value>) -> Self {
        let mut event = Self::new(author, Content::empty(Role::System));
        event.state_delta = delta;
        event
    }

    pub fn into_terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state_delta.insert(key.into(), value);
        self
    }

    /// Push `item` onto the list under `key` instead of rewriting the list.
    pub fn with_appended(mut self, key: impl Into<String>, item: Value) -> Self {
        self.state_append.insert(key.into(), item);
        self
    }

    /// All text parts joined with newlines.
    pub fn text_content(&self) -> String {
        self.content
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                Part::Data { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub application: String,
    pub owner: String,
    #[serde(default)]
    state: Map<String, Value>,
    #[serde(default)]
    events: Vec<Event>,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "last_update")]
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        application: impl Into<String>,
        owner: impl Into<String>,
        state: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            application: application.into(),
            owner: owner.into(),
            state,
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Apply an event in memory: merge its delta, append it, bump `updated_at`.
    ///
    /// An appended item turns a missing or non-list value into a one-item
    /// list. `updated_at` never moves backwards even if `now` does.
    pub(crate) fn apply(&mut self, event: Event, now: DateTime<Utc>) {
        for (key, value) in &event.state_delta {
            self.state.insert(key.clone(), value.clone());
        }
        for (key, item) in &event.state_append {
            match self.state.get_mut(key) {
                Some(Value::Array(items)) => items.push(item.clone()),
                _ => {
                    self.state
                        .insert(key.clone(), Value::Array(vec![item.clone()]));
                }
            }
        }
        self.events.push(event);
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// The state a new session starts with when no seed document is available.
pub fn default_state_template() -> Map<String, Value> {
    let mut state = Map::new();
    state.insert(HISTORY_KEY.to_string(), Value::Array(Vec::new()));
    state.insert("preferences".to_string(), Value::Object(Map::new()));
    state
}

/// Storage port for sessions.
///
/// Implementations own the persisted form; callers only ever hold copies.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create and persist a new session, seeding its state exactly once.
    async fn create(
        &self,
        application: &str,
        owner: &str,
        session_id: Option<&str>,
    ) -> Result<Session, StoreError>;

    async fn get(
        &self,
        application: &str,
        owner: &str,
        session_id: &str,
    ) -> Result<Option<Session>, StoreError>;

    /// All sessions of one `(application, owner)` pair.
    async fn list(&self, application: &str, owner: &str) -> Result<Vec<Session>, StoreError>;

    /// Returns `true` if a session was removed.
    async fn delete(
        &self,
        application: &str,
        owner: &str,
        session_id: &str,
    ) -> Result<bool, StoreError>;

    /// Stamp `event` with the store's clock, append it to `session` and
    /// persist the whole session.
    ///
    /// The in-memory session is updated even if persistence fails.
    async fn append_event(&self, session: &mut Session, event: Event) -> Result<Event, StoreError>;

    /// Append a state-only event carrying `delta`.
    async fn update_state(
        &self,
        session: &mut Session,
        author: &str,
        delta: Map<String, Value>,
    ) -> Result<Event, StoreError> {
        self.append_event(session, Event::state_only(author, delta))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_apply_merges_delta_and_appends() {
        let now = Utc::now();
        let mut session = Session::new("s1", "app", "alice", Map::new(), now);
        let event = Event::text("user", Role::User, "hello").with_state("k", json!(1));
        session.apply(event.clone(), now + Duration::seconds(1));

        assert_eq!(session.events(), &[event]);
        assert_eq!(session.get_state("k"), Some(&json!(1)));
        assert_eq!(session.updated_at, now + Duration::seconds(1));
    }

    #[test]
    fn test_apply_never_moves_updated_at_backwards() {
        let now = Utc::now();
        let mut session = Session::new("s1", "app", "alice", Map::new(), now);
        session.apply(
            Event::text("user", Role::User, "a"),
            now - Duration::seconds(30),
        );
        assert_eq!(session.updated_at, now);
    }

    #[test]
    fn test_apply_pushes_appended_items() {
        let now = Utc::now();
        let mut session = Session::new("s1", "app", "alice", default_state_template(), now);
        let push = |key: &str, item: Value| {
            Event::state_only("orchestrator", Map::new()).with_appended(key, item)
        };
        session.apply(push(HISTORY_KEY, json!({"n": 1})), now);
        session.apply(push(HISTORY_KEY, json!({"n": 2})), now);
        session.apply(push("fresh", json!("x")), now);

        assert_eq!(
            session.get_state(HISTORY_KEY),
            Some(&json!([{"n": 1}, {"n": 2}]))
        );
        assert_eq!(session.get_state("fresh"), Some(&json!(["x"])));
        let journalled = serde_json::to_value(&session.events()[1]).unwrap();
        assert_eq!(journalled["state_append"][HISTORY_KEY], json!({"n": 2}));
        assert!(journalled.get("state_delta").is_none());
    }

    #[test]
    fn test_event_text_content_skips_data_parts() {
        let mut event = Event::text("worker", Role::Model, "first");
        event.content.parts.push(Part::Data { data: json!({"x": 1}) });
        event.content.parts.push(Part::Text {
            text: "second".to_string(),
        });
        assert_eq!(event.text_content(), "first\nsecond");
    }

    #[test]
    fn test_session_serializes_last_update_field() {
        let session = Session::new("s1", "app", "alice", default_state_template(), Utc::now());
        let value = serde_json::to_value(&session).unwrap();
        assert!(value.get("last_update").is_some());
        assert!(value.get("updated_at").is_none());
        assert_eq!(value["state"][HISTORY_KEY], json!([]));
    }

    #[test]
    fn test_part_tagging() {
        let part = Part::Text {
            text: "hi".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&part).unwrap(),
            json!({"type": "text", "text": "hi"})
        );
    }
}
