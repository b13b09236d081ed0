//! Persisted per-session hierarchy state.
//!
//! Producers are short-lived processes with no shared memory, so the
//! session map lives in an external keyed store. Every update is a
//! read-modify-write of the whole map: read it, patch one key, write it
//! back. Each read-modify-write holds an exclusive lock on a sibling
//! `.lock` file, so concurrent writers touching different sessions never
//! drop each other's entries; two writers racing on the same session is
//! last-writer-wins.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

/// Hierarchy pointers tracked for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Id of the session-start event.
    #[serde(default)]
    pub root_event_id: Option<String>,
    /// Id of the most recent user-prompt-submit event.
    #[serde(default)]
    pub last_user_prompt_id: Option<String>,
    /// Id of the most recent stop event.
    #[serde(default)]
    pub last_stop_id: Option<String>,
    /// Tool-use correlation id to the pre-tool-use event that opened it.
    #[serde(default)]
    pub tool_uses: BTreeMap<String, String>,
    /// Task correlation id to the pre-tool-use event that launched it.
    #[serde(default)]
    pub task_launches: BTreeMap<String, String>,
    /// Epoch milliseconds when the session was first seen.
    #[serde(default)]
    pub created_at: i64,
    /// Epoch milliseconds of the last update, used for LRU eviction.
    #[serde(default)]
    pub last_access_at: i64,
}

impl SessionState {
    /// A fresh state first seen at `now_ms`.
    pub fn new(now_ms: i64) -> Self {
        Self {
            created_at: now_ms,
            last_access_at: now_ms,
            ..Self::default()
        }
    }
}

/// Errors from a session store backend.
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    /// Reading or writing the backing file failed.
    #[error("session store I/O error at {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The backing file did not contain a valid session map.
    #[error("session store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A keyed store of [`SessionState`], authoritative across processes.
pub trait SessionStore: Send + Sync {
    /// Read one session's state.
    fn load(&self, session_id: &str) -> Result<Option<SessionState>, SessionStoreError>;

    /// Write one session's state, pruning the map to `max_sessions` by
    /// oldest `last_access_at`.
    fn save(
        &self,
        session_id: &str,
        state: &SessionState,
        max_sessions: usize,
    ) -> Result<(), SessionStoreError>;

    /// Remove one session's state.
    fn remove(&self, session_id: &str) -> Result<(), SessionStoreError>;
}

/// Drop the least recently accessed sessions until at most `max` remain.
pub fn prune_lru(map: &mut BTreeMap<String, SessionState>, max: usize) {
    let excess = map.len().saturating_sub(max);
    if excess == 0 {
        return;
    }
    let mut by_age: Vec<(i64, String)> = map
        .iter()
        .map(|(id, s)| (s.last_access_at, id.clone()))
        .collect();
    by_age.sort_unstable();
    for (_, id) in by_age.into_iter().take(excess) {
        map.remove(&id);
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// Session map persisted as one JSON object in a file.
///
/// Writes go through a uniquely named temp file in the same directory
/// and an atomic rename, so a reader never observes a half-written map.
/// Updates are serialized across threads and processes by an advisory
/// lock on `<path>.lock`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Store backed by the file at `path`. The file need not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the backing file, created if missing.
    fn dir(&self) -> Result<&Path, SessionStoreError> {
        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;
        Ok(dir)
    }

    /// Take the exclusive update lock. Released when the handle drops.
    fn lock(&self) -> Result<File, SessionStoreError> {
        self.dir()?;
        let mut name = self.path.clone().into_os_string();
        name.push(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(PathBuf::from(name))
            .map_err(|e| self.io_err(e))?;
        file.lock().map_err(|e| self.io_err(e))?;
        Ok(file)
    }

    fn io_err(&self, source: std::io::Error) -> SessionStoreError {
        SessionStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Read the full map. A missing or empty file is an empty map.
    fn read_map(&self) -> Result<BTreeMap<String, SessionState>, SessionStoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(self.io_err(e)),
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    /// Read the map for a write. A corrupt file is replaced rather than
    /// blocking every later update.
    fn read_map_for_update(&self) -> Result<BTreeMap<String, SessionState>, SessionStoreError> {
        match self.read_map() {
            Err(SessionStoreError::Json(e)) => {
                warn!(path = %self.path.display(), error = %e, "session state file corrupt, starting fresh");
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn write_map(&self, map: &BTreeMap<String, SessionState>) -> Result<(), SessionStoreError> {
        let json = serde_json::to_string(map)?;
        let mut tmp = NamedTempFile::new_in(self.dir()?).map_err(|e| self.io_err(e))?;
        tmp.write_all(json.as_bytes()).map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, session_id: &str) -> Result<Option<SessionState>, SessionStoreError> {
        Ok(self.read_map()?.remove(session_id))
    }

    fn save(
        &self,
        session_id: &str,
        state: &SessionState,
        max_sessions: usize,
    ) -> Result<(), SessionStoreError> {
        let _guard = self.lock()?;
        let mut map = self.read_map_for_update()?;
        map.insert(session_id.to_owned(), state.clone());
        prune_lru(&mut map, max_sessions);
        self.write_map(&map)
    }

    fn remove(&self, session_id: &str) -> Result<(), SessionStoreError> {
        let _guard = self.lock()?;
        let mut map = self.read_map_for_update()?;
        if map.remove(session_id).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local session map. Used in tests and when persistence is
/// disabled.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    map: Mutex<BTreeMap<String, SessionState>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions held.
    pub fn len(&self) -> usize {
        self.map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, session_id: &str) -> Result<Option<SessionState>, SessionStoreError> {
        let map = self
            .map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(map.get(session_id).cloned())
    }

    fn save(
        &self,
        session_id: &str,
        state: &SessionState,
        max_sessions: usize,
    ) -> Result<(), SessionStoreError> {
        let mut map = self
            .map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.insert(session_id.to_owned(), state.clone());
        prune_lru(&mut map, max_sessions);
        Ok(())
    }

    fn remove(&self, session_id: &str) -> Result<(), SessionStoreError> {
        self.map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn state(root: &str, at: i64) -> SessionState {
        SessionState {
            root_event_id: Some(root.to_owned()),
            ..SessionState::new(at)
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("state.json"));
        assert_eq!(store.load("s1").unwrap(), None);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested/state.json"));
        store.save("s1", &state("e1", 10), 100).unwrap();
        assert_eq!(store.load("s1").unwrap(), Some(state("e1", 10)));
    }

    #[test]
    fn independent_instances_do_not_clobber_each_other() {
        // Two "processes" sharing the same file, each patching its own key.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let a = FileSessionStore::new(&path);
        let b = FileSessionStore::new(&path);

        a.save("s1", &state("e1", 1), 100).unwrap();
        b.save("s2", &state("e2", 2), 100).unwrap();
        a.save("s1", &state("e3", 3), 100).unwrap();

        let fresh = FileSessionStore::new(&path);
        assert_eq!(fresh.load("s1").unwrap(), Some(state("e3", 3)));
        assert_eq!(fresh.load("s2").unwrap(), Some(state("e2", 2)));
    }

    #[test]
    fn concurrent_writers_keep_every_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let handles: Vec<_> = (0..8_i64)
            .map(|t| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = FileSessionStore::new(path);
                    let session = format!("sess-{t}");
                    for i in 0..200_i64 {
                        store
                            .save(&session, &state(&format!("e{t}-{i}"), t * 1000 + i), 100)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let fresh = FileSessionStore::new(&path);
        for t in 0..8 {
            let saved = fresh.load(&format!("sess-{t}")).unwrap().unwrap();
            assert_eq!(saved.root_event_id, Some(format!("e{t}-199")));
        }
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name != "state.json" && name != "state.json.lock")
            .collect();
        assert!(leftovers.is_empty(), "stray temp files: {leftovers:?}");
    }

    #[test]
    fn save_prunes_oldest_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("state.json"));
        store.save("old", &state("e1", 1), 2).unwrap();
        store.save("mid", &state("e2", 2), 2).unwrap();
        store.save("new", &state("e3", 3), 2).unwrap();
        assert_eq!(store.load("old").unwrap(), None);
        assert!(store.load("mid").unwrap().is_some());
        assert!(store.load("new").unwrap().is_some());
    }

    #[test]
    fn remove_deletes_only_that_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("state.json"));
        store.save("s1", &state("e1", 1), 100).unwrap();
        store.save("s2", &state("e2", 2), 100).unwrap();
        store.remove("s1").unwrap();
        assert_eq!(store.load("s1").unwrap(), None);
        assert!(store.load("s2").unwrap().is_some());
    }

    #[test]
    fn corrupt_file_errors_on_load_and_is_replaced_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileSessionStore::new(&path);
        assert!(matches!(store.load("s1"), Err(SessionStoreError::Json(_))));
        store.save("s1", &state("e1", 1), 100).unwrap();
        assert!(store.load("s1").unwrap().is_some());
    }

    #[test]
    fn persisted_field_names_are_camel_case() {
        let json = serde_json::to_value(state("e1", 5)).unwrap();
        assert_eq!(json["rootEventId"], "e1");
        assert_eq!(json["lastAccessAt"], 5);
    }

    #[test]
    fn memory_store_prunes() {
        let store = MemorySessionStore::new();
        for i in 0..5 {
            store.save(&format!("s{i}"), &state("e", i), 3).unwrap();
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.load("s0").unwrap(), None);
        assert!(store.load("s4").unwrap().is_some());
    }
}
