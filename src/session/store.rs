use super::{Event, Session, SessionStore, default_state_template};
use crate::clock::{Clock, SystemClock};
use crate::errors::{StoreError, validate_component};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

/// File-backed session store.
///
/// Directory structure:
/// ```text
/// root/
/// └── <application>/
///     └── <owner>/
///         ├── <session-id-1>.json
///         └── <session-id-2>.json
/// ```
///
/// Every append rewrites the whole session file (write to a temp file, then
/// rename), so write cost grows with session size.
pub struct FileSessionStore {
    root: PathBuf,
    seed_file: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seed_file: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Seed new sessions from this JSON document when it exists.
    pub fn with_seed_file(mut self, path: Option<PathBuf>) -> Self {
        self.seed_file = path;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn owner_dir(&self, application: &str, owner: &str) -> Result<PathBuf, StoreError> {
        validate_component("application", application)?;
        validate_component("owner", owner)?;
        Ok(self.root.join(application).join(owner))
    }

    fn session_path(
        &self,
        application: &str,
        owner: &str,
        session_id: &str,
    ) -> Result<PathBuf, StoreError> {
        validate_component("session id", session_id)?;
        Ok(self
            .owner_dir(application, owner)?
            .join(format!("{}.json", session_id)))
    }

    /// Initial state: the seed document if configured and readable, else the template.
    async fn initial_state(&self) -> Map<String, Value> {
        let Some(path) = self.seed_file.as_ref() else {
            return default_state_template();
        };
        match fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    tracing::warn!(
                        path = %path.display(),
                        "seed document is not a JSON object; using default state"
                    );
                    default_state_template()
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to parse seed document; using default state"
                    );
                    default_state_template()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => default_state_template(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to read seed document; using default state"
                );
                default_state_template()
            }
        }
    }

    async fn write_session(&self, session: &Session) -> Result<(), StoreError> {
        let path = self.session_path(&session.application, &session.owner, &session.id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(session)
            .map_err(|e| StoreError::serialization(&path, e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }

    async fn read_session(path: &Path) -> Result<Option<Session>, StoreError> {
        let raw = match fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let session = serde_json::from_slice(&raw).map_err(|e| StoreError::serialization(path, e))?;
        Ok(Some(session))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(
        &self,
        application: &str,
        owner: &str,
        session_id: Option<&str>,
    ) -> Result<Session, StoreError> {
        let id = match session_id {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let path = self.session_path(application, owner, &id)?;
        if fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?
        {
            return Err(StoreError::SessionExists {
                application: application.to_string(),
                owner: owner.to_string(),
                id,
            });
        }

        let state = self.initial_state().await;
        let session = Session::new(id, application, owner, state, self.clock.now());
        self.write_session(&session).await?;
        tracing::debug!(application, owner, session_id = %session.id, "created session");
        Ok(session)
    }

    async fn get(
        &self,
        application: &str,
        owner: &str,
        session_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let path = self.session_path(application, owner, session_id)?;
        Self::read_session(&path).await
    }

    async fn list(&self, application: &str, owner: &str) -> Result<Vec<Session>, StoreError> {
        let dir = self.owner_dir(application, owner)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match Self::read_session(&path).await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable session file"
                    );
                }
            }
        }

        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(sessions)
    }

    async fn delete(
        &self,
        application: &str,
        owner: &str,
        session_id: &str,
    ) -> Result<bool, StoreError> {
        let path = self.session_path(application, owner, session_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    async fn append_event(
        &self,
        session: &mut Session,
        mut event: Event,
    ) -> Result<Event, StoreError> {
        let now = self.clock.now();
        event.timestamp = now;
        session.apply(event.clone(), now);
        self.write_session(session).await?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::{HISTORY_KEY, Role};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn make_store() -> (FileSessionStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (FileSessionStore::new(dir.path().join("sessions")), dir)
    }

    #[tokio::test]
    async fn test_create_seeds_default_template() {
        let (store, _dir) = make_store();
        let session = store.create("app", "alice", None).await.unwrap();
        assert_eq!(session.get_state(HISTORY_KEY), Some(&json!([])));
        assert!(session.events().is_empty());
        assert!(
            store
                .root()
                .join("app/alice")
                .join(format!("{}.json", session.id))
                .exists()
        );
    }

    #[tokio::test]
    async fn test_create_seeds_from_seed_document_once() {
        let dir = TempDir::new().unwrap();
        let seed = dir.path().join("seed.json");
        std::fs::write(&seed, r#"{"preferences": {"language": "rust"}}"#).unwrap();
        let store =
            FileSessionStore::new(dir.path().join("sessions")).with_seed_file(Some(seed.clone()));

        let mut session = store.create("app", "alice", Some("s1")).await.unwrap();
        assert_eq!(session.get_state("preferences"), Some(&json!({"language": "rust"})));

        store
            .update_state(&mut session, "test", {
                let mut m = Map::new();
                m.insert("preferences".into(), json!({"language": "go"}));
                m
            })
            .await
            .unwrap();

        // Changing the seed later must not affect an existing session.
        std::fs::write(&seed, r#"{"preferences": {"language": "zig"}}"#).unwrap();
        let loaded = store.get("app", "alice", "s1").await.unwrap().unwrap();
        assert_eq!(loaded.get_state("preferences"), Some(&json!({"language": "go"})));
    }

    #[tokio::test]
    async fn test_missing_seed_falls_back_to_template() {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions"))
            .with_seed_file(Some(dir.path().join("missing.json")));
        let session = store.create("app", "alice", None).await.unwrap();
        assert_eq!(session.get_state(HISTORY_KEY), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_create_duplicate_id_fails() {
        let (store, _dir) = make_store();
        store.create("app", "alice", Some("dup")).await.unwrap();
        let err = store.create("app", "alice", Some("dup")).await.unwrap_err();
        assert!(matches!(err, StoreError::SessionExists { .. }));
    }

    #[tokio::test]
    async fn test_reload_yields_all_appended_events_in_order() {
        let (store, _dir) = make_store();
        let mut session = store.create("app", "alice", Some("s1")).await.unwrap();

        let mut appended = Vec::new();
        for i in 0..5 {
            let event = Event::text("user", Role::User, format!("message {}", i));
            appended.push(store.append_event(&mut session, event).await.unwrap());
        }

        let loaded = store.get("app", "alice", "s1").await.unwrap().unwrap();
        assert_eq!(loaded.events(), appended.as_slice());
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn test_updated_at_is_non_decreasing() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = FileSessionStore::new(dir.path()).with_clock(clock.clone());
        let mut session = store.create("app", "alice", None).await.unwrap();

        let mut last = session.updated_at;
        for step in [10, -60, 5, -1] {
            clock.advance(Duration::seconds(step));
            store
                .append_event(&mut session, Event::text("user", Role::User, "x"))
                .await
                .unwrap();
            let loaded = store
                .get("app", "alice", &session.id)
                .await
                .unwrap()
                .unwrap();
            assert!(loaded.updated_at >= last);
            last = loaded.updated_at;
        }
    }

    #[tokio::test]
    async fn test_events_are_stamped_with_store_clock() {
        let dir = TempDir::new().unwrap();
        let start = Utc::now() - Duration::days(3);
        let clock = Arc::new(ManualClock::new(start));
        let store = FileSessionStore::new(dir.path()).with_clock(clock.clone());
        let mut session = store.create("app", "alice", Some("s1")).await.unwrap();

        clock.advance(Duration::seconds(90));
        let stored = store
            .append_event(&mut session, Event::text("user", Role::User, "hi"))
            .await
            .unwrap();

        assert_eq!(stored.timestamp, start + Duration::seconds(90));
        let loaded = store.get("app", "alice", "s1").await.unwrap().unwrap();
        assert_eq!(loaded.events()[0].timestamp, loaded.updated_at);
    }

    #[tokio::test]
    async fn test_state_delta_applied_on_append() {
        let (store, _dir) = make_store();
        let mut session = store.create("app", "alice", Some("s1")).await.unwrap();
        let event = Event::text("security_worker", Role::Model, "done")
            .with_state("security_analysis", json!({"summary": "ok"}));
        store.append_event(&mut session, event).await.unwrap();

        let loaded = store.get("app", "alice", "s1").await.unwrap().unwrap();
        assert_eq!(
            loaded.get_state("security_analysis"),
            Some(&json!({"summary": "ok"}))
        );
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_owner() {
        let (store, _dir) = make_store();
        store.create("app", "alice", Some("a1")).await.unwrap();
        store.create("app", "alice", Some("a2")).await.unwrap();
        store.create("app", "bob", Some("b1")).await.unwrap();
        store.create("other", "alice", Some("o1")).await.unwrap();

        let ids: Vec<String> = store
            .list("app", "alice")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"a1".to_string()));
        assert!(ids.contains(&"a2".to_string()));
        assert!(store.list("app", "nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _dir) = make_store();
        store.create("app", "alice", Some("s1")).await.unwrap();
        assert!(store.delete("app", "alice", "s1").await.unwrap());
        assert!(!store.delete("app", "alice", "s1").await.unwrap());
        assert!(store.get("app", "alice", "s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let (store, _dir) = make_store();
        let err = store.get("app", "..", "s1").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidName { kind: "owner", .. }));
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (store, _dir) = make_store();
        assert!(store.get("app", "alice", "nope").await.unwrap().is_none());
    }
}
