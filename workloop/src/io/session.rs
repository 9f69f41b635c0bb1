//! Session store for the single active work item (`.workloop/session.json`).
//!
//! The session file is advisory state: a missing, unreadable or schema-invalid
//! file is treated as "no session" and never surfaces as an error.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::checklist::parse_checklist;
use crate::core::types::WorkItem;

const SESSION_SCHEMA: &str = include_str!("../../schemas/session.schema.json");

/// Persisted record of the work item being executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub item_id: String,
    pub item_title: String,
    /// Branch prepared by the VCS collaborator, if any. Opaque to the loop.
    #[serde(default)]
    pub branch_ref: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Completed iterations for this item. Starts at 0, grows by exactly 1.
    pub iteration_count: u32,
    /// Last fetched work item body. Advisory only; the source is authoritative.
    #[serde(default)]
    pub cached_content: Option<String>,
    #[serde(default)]
    pub cached_content_fetched_at: Option<DateTime<Utc>>,
    pub total_tasks: usize,
    pub completed_tasks: usize,
}

impl Session {
    /// Percent of tasks checked in the cached content (100 without a checklist).
    pub fn progress_percent(&self) -> u8 {
        if self.total_tasks == 0 {
            return 100;
        }
        (self.completed_tasks as f64 / self.total_tasks as f64 * 100.0)
            .round()
            .clamp(0.0, 100.0) as u8
    }

    fn cache_content(&mut self, content: String) {
        let tasks = parse_checklist(&content);
        self.total_tasks = tasks.total();
        self.completed_tasks = tasks.completed();
        self.cached_content = Some(content);
        self.cached_content_fetched_at = Some(Utc::now());
    }
}

/// Data needed to start a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub item_id: String,
    pub item_title: String,
    pub branch_ref: Option<String>,
    pub content: Option<String>,
}

impl NewSession {
    pub fn for_item(item: &WorkItem, branch_ref: Option<String>) -> Self {
        Self {
            item_id: item.id.clone(),
            item_title: item.title.clone(),
            branch_ref,
            content: Some(item.content.clone()),
        }
    }
}

/// Partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub item_title: Option<String>,
    pub branch_ref: Option<String>,
    /// New cached body; also refreshes the fetch time and task counts.
    pub content: Option<String>,
}

impl SessionPatch {
    /// Patch that re-caches a freshly fetched work item.
    pub fn refresh_from(item: &WorkItem) -> Self {
        Self {
            item_title: Some(item.title.clone()),
            branch_ref: None,
            content: Some(item.content.clone()),
        }
    }
}

/// Read/modify/write access to the session file.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a session, overwriting any existing one unconditionally.
    pub fn init(&self, data: NewSession) -> Result<Session> {
        let mut session = Session {
            item_id: data.item_id,
            item_title: data.item_title,
            branch_ref: data.branch_ref,
            started_at: Utc::now(),
            iteration_count: 0,
            cached_content: None,
            cached_content_fetched_at: None,
            total_tasks: 0,
            completed_tasks: 0,
        };
        if let Some(content) = data.content {
            session.cache_content(content);
        }
        self.write(&session)?;
        debug!(item_id = %session.item_id, "session started");
        Ok(session)
    }

    /// Current session, or `None` when missing or unusable.
    pub fn load(&self) -> Option<Session> {
        match self.read() {
            Ok(session) => session,
            Err(err) => {
                warn!(path = %self.path.display(), err = %format!("{err:#}"), "ignoring unreadable session");
                None
            }
        }
    }

    /// Apply `patch` to the current session. No-op returning `None` without one.
    pub fn update(&self, patch: SessionPatch) -> Result<Option<Session>> {
        let Some(mut session) = self.load() else {
            return Ok(None);
        };
        if let Some(title) = patch.item_title {
            session.item_title = title;
        }
        if let Some(branch_ref) = patch.branch_ref {
            session.branch_ref = Some(branch_ref);
        }
        if let Some(content) = patch.content {
            session.cache_content(content);
        }
        self.write(&session)?;
        Ok(Some(session))
    }

    /// Record one completed iteration. Returns the new count, or 0 without a session.
    pub fn increment_iteration(&self) -> Result<u32> {
        let Some(mut session) = self.load() else {
            return Ok(0);
        };
        session.iteration_count += 1;
        self.write(&session)?;
        debug!(item_id = %session.item_id, iteration_count = session.iteration_count, "iteration recorded");
        Ok(session.iteration_count)
    }

    /// Remove the session. Idempotent.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "session cleared");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", self.path.display())),
        }
    }

    fn read(&self) -> Result<Option<Session>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("read {}", self.path.display())),
        };
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse {}", self.path.display()))?;
        validate_schema(&value)?;
        let session: Session = serde_json::from_value(value)
            .with_context(|| format!("deserialize {}", self.path.display()))?;
        Ok(Some(session))
    }

    /// Atomically write the session (temp file + rename).
    fn write(&self, session: &Session) -> Result<()> {
        let parent = self
            .path
            .parent()
            .with_context(|| format!("session path missing parent {}", self.path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let mut buf = serde_json::to_string_pretty(session)?;
        buf.push('\n');
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp session {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace session {}", self.path.display()))?;
        Ok(())
    }
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(SESSION_SCHEMA).context("parse session schema")?;
    let validator =
        jsonschema::validator_for(&schema).map_err(|err| anyhow!("invalid session schema: {err}"))?;
    let messages: Vec<String> = validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "session schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> SessionStore {
        SessionStore::new(dir.join(".workloop").join("session.json"))
    }

    fn new_session() -> NewSession {
        NewSession {
            item_id: "auth-api".to_string(),
            item_title: "Auth API".to_string(),
            branch_ref: Some("workloop/auth-api".to_string()),
            content: Some("- [x] design\n- [ ] build\n- [ ] ship\n".to_string()),
        }
    }

    #[test]
    fn init_then_load_round_trips_with_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let created = store.init(new_session()).expect("init");
        let loaded = store.load().expect("session");

        assert_eq!(loaded, created);
        assert_eq!(loaded.item_id, "auth-api");
        assert_eq!(loaded.item_title, "Auth API");
        assert_eq!(loaded.branch_ref.as_deref(), Some("workloop/auth-api"));
        assert_eq!(loaded.iteration_count, 0);
        assert_eq!(loaded.total_tasks, 3);
        assert_eq!(loaded.completed_tasks, 1);
        assert_eq!(loaded.progress_percent(), 33);
        assert!(loaded.cached_content_fetched_at.is_some());
    }

    #[test]
    fn init_overwrites_existing_session() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        store.init(new_session()).expect("init");
        store.increment_iteration().expect("increment");

        let replaced = store
            .init(NewSession {
                item_id: "other".to_string(),
                item_title: "Other".to_string(),
                branch_ref: None,
                content: None,
            })
            .expect("init");
        assert_eq!(replaced.iteration_count, 0);
        assert_eq!(store.load().expect("session").item_id, "other");
    }

    #[test]
    fn load_missing_returns_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(store(temp.path()).load().is_none());
    }

    #[test]
    fn corrupted_file_is_treated_as_absent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");

        fs::write(store.path(), "{ not json").expect("write");
        assert!(store.load().is_none());

        fs::write(
            store.path(),
            r#"{"item_id": "a", "item_title": "A", "started_at": "2024-01-01T00:00:00Z", "iteration_count": -1, "total_tasks": 0, "completed_tasks": 0}"#,
        )
        .expect("write");
        assert!(store.load().is_none());

        assert_eq!(store.increment_iteration().expect("increment"), 0);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(
            store.path(),
            r#"{"item_id": "a", "item_title": "A", "started_at": "2024-01-01T00:00:00Z", "iteration_count": 4, "total_tasks": 0, "completed_tasks": 0, "future_field": true}"#,
        )
        .expect("write");
        let session = store.load().expect("session");
        assert_eq!(session.iteration_count, 4);
        assert_eq!(session.branch_ref, None);
    }

    #[test]
    fn increment_counts_from_zero() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        assert_eq!(store.increment_iteration().expect("no session"), 0);

        store.init(new_session()).expect("init");
        assert_eq!(store.increment_iteration().expect("first"), 1);
        assert_eq!(store.increment_iteration().expect("second"), 2);
        assert_eq!(store.load().expect("session").iteration_count, 2);
    }

    #[test]
    fn update_refreshes_cached_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        assert_eq!(
            store.update(SessionPatch::default()).expect("update"),
            None
        );

        store.init(new_session()).expect("init");
        let updated = store
            .update(SessionPatch {
                content: Some("- [x] a\n- [x] b\n".to_string()),
                ..SessionPatch::default()
            })
            .expect("update")
            .expect("session");
        assert_eq!(updated.total_tasks, 2);
        assert_eq!(updated.completed_tasks, 2);
        assert_eq!(updated.branch_ref.as_deref(), Some("workloop/auth-api"));
        assert_eq!(store.load().expect("session"), updated);
    }

    #[test]
    fn clear_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        store.clear().expect("clear missing");
        store.init(new_session()).expect("init");
        store.clear().expect("clear");
        store.clear().expect("clear again");
        assert!(store.load().is_none());
    }
}
