//! Parent resolution across events that share no direct link.
//!
//! Each session is a small state machine. For every event the resolver
//! first computes the parent from the event type and the session's
//! current pointers, then applies the type's state update:
//!
//! | Event type | Parent | State update |
//! |---|---|---|
//! | `SessionStart` | none | root := this |
//! | `UserPromptSubmit` | root | last prompt := this |
//! | `PreToolUse` | last prompt, else last stop | tool id := this; task id := this for task launches |
//! | `PostToolUse` | event for its tool id, else last prompt | |
//! | `Stop` | last prompt | last stop := this |
//! | `SubagentStop` | event for its task id, else its tool id, else last prompt | |
//! | `SessionEnd` | root | session dropped |
//! | `Notification`, `PreCompact` | last prompt | |
//!
//! Dangling parents are expected. The resolver only names a parent id;
//! whether it is still inside the window is the event store's concern.

use std::collections::HashMap;

use hookscope_types::{Event, HookEventType};
use serde_json::Value;
use tracing::{debug, warn};

use crate::session_store::{SessionState, SessionStore};

/// Tool names whose pre-tool-use launches a subagent.
const TASK_TOOLS: [&str; 2] = ["Task", "Agent"];

/// Per-session parent resolver with a write-through persisted store.
///
/// The in-memory cache only saves repeated reads within this process.
/// A cache miss always consults the store, and every update is written
/// back to it.
pub struct HierarchyResolver {
    store: Box<dyn SessionStore>,
    cache: HashMap<String, SessionState>,
    max_sessions: usize,
}

impl HierarchyResolver {
    /// Create a resolver over `store`, tracking at most `max_sessions`.
    pub fn new(store: Box<dyn SessionStore>, max_sessions: usize) -> Self {
        Self {
            store,
            cache: HashMap::new(),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Number of sessions in the in-memory cache.
    pub fn cached_sessions(&self) -> usize {
        self.cache.len()
    }

    /// Attach `parent_event_id` and `span_kind` to `event`, then update
    /// the session's state.
    ///
    /// A parent id the producer already wrote is kept as-is; the state
    /// update still runs so later events resolve correctly.
    pub fn resolve(&mut self, event: &mut Event, now_ms: i64) {
        let mut state = self.session(&event.session_id, now_ms);

        if event.parent_event_id.is_none() {
            event.parent_event_id =
                resolve_parent(&state, event.hook_event_type, &event.payload, &event.event_id);
        }
        event.span_kind = event.hook_event_type.span_kind();

        apply_update(&mut state, event);
        state.last_access_at = now_ms;

        if event.hook_event_type == HookEventType::SessionEnd {
            self.end_session(&event.session_id);
        } else {
            self.persist(&event.session_id, state);
        }
    }

    /// Current state for a session: cache, then store, then fresh.
    fn session(&self, session_id: &str, now_ms: i64) -> SessionState {
        if let Some(state) = self.cache.get(session_id) {
            return state.clone();
        }
        match self.store.load(session_id) {
            Ok(Some(state)) => state,
            Ok(None) => SessionState::new(now_ms),
            Err(e) => {
                warn!(session_id, error = %e, "session state read failed, using in-memory state");
                SessionState::new(now_ms)
            }
        }
    }

    fn persist(&mut self, session_id: &str, state: SessionState) {
        if let Err(e) = self.store.save(session_id, &state, self.max_sessions) {
            warn!(session_id, error = %e, "session state write failed, continuing in memory");
        }
        self.cache.insert(session_id.to_owned(), state);
        self.evict_lru();
    }

    fn end_session(&mut self, session_id: &str) {
        self.cache.remove(session_id);
        if let Err(e) = self.store.remove(session_id) {
            warn!(session_id, error = %e, "session state cleanup failed");
        }
        debug!(session_id, "session ended, state dropped");
    }

    /// Evict cached sessions with the oldest `last_access_at` until the
    /// cache is within its cap.
    fn evict_lru(&mut self) {
        while self.cache.len() > self.max_sessions {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|(_, s)| s.last_access_at)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    debug!(session_id = %id, "evicting least recently used session");
                    self.cache.remove(&id);
                }
                None => break,
            }
        }
    }
}

/// Compute the parent for an event of type `kind` given the session's
/// state before this event.
pub fn resolve_parent(
    state: &SessionState,
    kind: HookEventType,
    payload: &Value,
    event_id: &str,
) -> Option<String> {
    let last_prompt = || state.last_user_prompt_id.clone();
    match kind {
        HookEventType::SessionStart => None,
        HookEventType::UserPromptSubmit | HookEventType::SessionEnd => {
            state.root_event_id.clone()
        }
        HookEventType::PreToolUse => last_prompt().or_else(|| state.last_stop_id.clone()),
        HookEventType::PostToolUse => tool_use_id(payload)
            .and_then(|id| state.tool_uses.get(id).cloned())
            .or_else(last_prompt),
        HookEventType::SubagentStop => subagent_launch(state, payload, event_id).or_else(last_prompt),
        HookEventType::Stop | HookEventType::Notification | HookEventType::PreCompact => {
            last_prompt()
        }
    }
}

/// The launching event for a subagent-stop: task id first, tool-use id
/// second.
fn subagent_launch(state: &SessionState, payload: &Value, event_id: &str) -> Option<String> {
    let by_task = task_id(payload).and_then(|id| state.task_launches.get(id));
    let by_tool = tool_use_id(payload).and_then(|id| state.tool_uses.get(id));
    if let (Some(task), Some(tool)) = (by_task, by_tool)
        && task != tool
    {
        warn!(
            event_id,
            task_parent = task.as_str(),
            tool_parent = tool.as_str(),
            "subagent stop correlates to two different launches, using task id"
        );
    }
    by_task.or(by_tool).cloned()
}

/// Apply the type's state update after parent resolution.
fn apply_update(state: &mut SessionState, event: &Event) {
    let id = event.event_id.clone();
    match event.hook_event_type {
        HookEventType::SessionStart => state.root_event_id = Some(id),
        HookEventType::UserPromptSubmit => state.last_user_prompt_id = Some(id),
        HookEventType::PreToolUse => {
            if let Some(tool) = tool_use_id(&event.payload) {
                state.tool_uses.insert(tool.to_owned(), id.clone());
            }
            if is_task_launch(&event.payload)
                && let Some(task) = task_id(&event.payload)
            {
                state.task_launches.insert(task.to_owned(), id);
            }
        }
        HookEventType::Stop => state.last_stop_id = Some(id),
        HookEventType::SessionEnd
        | HookEventType::PostToolUse
        | HookEventType::SubagentStop
        | HookEventType::Notification
        | HookEventType::PreCompact => {}
    }
}

// ---------------------------------------------------------------------------
// Payload correlation ids
// ---------------------------------------------------------------------------

fn non_empty<'a>(value: Option<&'a Value>) -> Option<&'a str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Tool-use correlation id (`payload.tool_use_id`).
pub fn tool_use_id(payload: &Value) -> Option<&str> {
    non_empty(payload.get("tool_use_id"))
}

/// Task correlation id (`payload.task_id`, else `payload.tool_input.task_id`).
pub fn task_id(payload: &Value) -> Option<&str> {
    non_empty(payload.get("task_id"))
        .or_else(|| non_empty(payload.get("tool_input").and_then(|i| i.get("task_id"))))
}

/// Whether a pre-tool-use payload launches a subagent.
pub fn is_task_launch(payload: &Value) -> bool {
    non_empty(payload.get("tool_name")).is_some_and(|name| TASK_TOOLS.contains(&name))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use hookscope_types::SpanKind;
    use serde_json::json;

    use super::*;
    use crate::session_store::{FileSessionStore, MemorySessionStore, SessionStoreError};

    /// Lets a test keep a handle on the store the resolver owns.
    struct Shared(Arc<MemorySessionStore>);

    impl SessionStore for Shared {
        fn load(&self, id: &str) -> Result<Option<SessionState>, SessionStoreError> {
            self.0.load(id)
        }
        fn save(&self, id: &str, s: &SessionState, max: usize) -> Result<(), SessionStoreError> {
            self.0.save(id, s, max)
        }
        fn remove(&self, id: &str) -> Result<(), SessionStoreError> {
            self.0.remove(id)
        }
    }

    /// Every operation fails, as with an unwritable disk.
    struct Broken;

    impl SessionStore for Broken {
        fn load(&self, _: &str) -> Result<Option<SessionState>, SessionStoreError> {
            Err(SessionStoreError::Io {
                path: "/dev/full".into(),
                source: std::io::Error::other("disk gone"),
            })
        }
        fn save(&self, _: &str, _: &SessionState, _: usize) -> Result<(), SessionStoreError> {
            Err(SessionStoreError::Io {
                path: "/dev/full".into(),
                source: std::io::Error::other("disk gone"),
            })
        }
        fn remove(&self, _: &str) -> Result<(), SessionStoreError> {
            Ok(())
        }
    }

    fn event(id: &str, session: &str, kind: HookEventType, payload: Value) -> Event {
        Event {
            event_id: id.to_owned(),
            parent_event_id: None,
            source_app: "cli".to_owned(),
            session_id: session.to_owned(),
            hook_event_type: kind,
            payload,
            timestamp: 0,
            timestamp_display: String::new(),
            summary: None,
            model_name: None,
            span_kind: SpanKind::Internal,
            children: Vec::new(),
            depth: 0,
        }
    }

    fn resolver() -> HierarchyResolver {
        HierarchyResolver::new(Box::new(MemorySessionStore::new()), 100)
    }

    fn feed(r: &mut HierarchyResolver, mut e: Event) -> Option<String> {
        r.resolve(&mut e, 1);
        e.parent_event_id
    }

    #[test]
    fn tool_use_chain() {
        let mut r = resolver();
        let s = "s1-session";
        assert_eq!(feed(&mut r, event("1", s, HookEventType::SessionStart, json!({}))), None);
        assert_eq!(
            feed(&mut r, event("2", s, HookEventType::UserPromptSubmit, json!({}))).as_deref(),
            Some("1")
        );
        let pre = json!({"tool_name": "Bash", "tool_use_id": "t1"});
        assert_eq!(
            feed(&mut r, event("3", s, HookEventType::PreToolUse, pre)).as_deref(),
            Some("2")
        );
        let post = json!({"tool_name": "Bash", "tool_use_id": "t1"});
        assert_eq!(
            feed(&mut r, event("4", s, HookEventType::PostToolUse, post)).as_deref(),
            Some("3")
        );
    }

    #[test]
    fn missing_root_gives_no_parent() {
        let mut r = resolver();
        assert_eq!(
            feed(&mut r, event("10", "s2-session", HookEventType::UserPromptSubmit, json!({}))),
            None
        );
    }

    #[test]
    fn post_tool_use_without_match_falls_back_to_prompt() {
        let mut r = resolver();
        let s = "sess";
        feed(&mut r, event("1", s, HookEventType::SessionStart, json!({})));
        feed(&mut r, event("2", s, HookEventType::UserPromptSubmit, json!({})));
        let post = json!({"tool_use_id": "unknown"});
        assert_eq!(
            feed(&mut r, event("3", s, HookEventType::PostToolUse, post)).as_deref(),
            Some("2")
        );
    }

    #[test]
    fn pre_tool_use_falls_back_to_last_stop() {
        let mut state = SessionState::new(0);
        state.last_stop_id = Some("stop-1".to_owned());
        assert_eq!(
            resolve_parent(&state, HookEventType::PreToolUse, &json!({}), "x").as_deref(),
            Some("stop-1")
        );
        state.last_user_prompt_id = Some("prompt-1".to_owned());
        assert_eq!(
            resolve_parent(&state, HookEventType::PreToolUse, &json!({}), "x").as_deref(),
            Some("prompt-1")
        );
    }

    #[test]
    fn stop_notification_and_compact_hang_off_last_prompt() {
        let mut r = resolver();
        let s = "sess";
        feed(&mut r, event("1", s, HookEventType::SessionStart, json!({})));
        feed(&mut r, event("2", s, HookEventType::UserPromptSubmit, json!({})));
        for (id, kind) in [
            ("3", HookEventType::Notification),
            ("4", HookEventType::PreCompact),
            ("5", HookEventType::Stop),
        ] {
            assert_eq!(feed(&mut r, event(id, s, kind, json!({}))).as_deref(), Some("2"));
        }
    }

    #[test]
    fn subagent_stop_prefers_task_id() {
        let mut r = resolver();
        let s = "sess";
        feed(&mut r, event("1", s, HookEventType::SessionStart, json!({})));
        feed(&mut r, event("2", s, HookEventType::UserPromptSubmit, json!({})));
        let launch = json!({"tool_name": "Task", "tool_use_id": "tu-1", "tool_input": {"task_id": "task-1"}});
        feed(&mut r, event("3", s, HookEventType::PreToolUse, launch));
        let other = json!({"tool_name": "Read", "tool_use_id": "tu-2"});
        feed(&mut r, event("4", s, HookEventType::PreToolUse, other));

        // Both ids present and disagreeing: task id wins.
        let stop = json!({"task_id": "task-1", "tool_use_id": "tu-2"});
        assert_eq!(
            feed(&mut r, event("5", s, HookEventType::SubagentStop, stop)).as_deref(),
            Some("3")
        );

        // Only the tool-use id resolves.
        let stop = json!({"task_id": "missing", "tool_use_id": "tu-1"});
        assert_eq!(
            feed(&mut r, event("6", s, HookEventType::SubagentStop, stop)).as_deref(),
            Some("3")
        );

        // Nothing resolves.
        assert_eq!(
            feed(&mut r, event("7", s, HookEventType::SubagentStop, json!({}))).as_deref(),
            Some("2")
        );
    }

    #[test]
    fn non_task_tools_do_not_register_task_ids() {
        let mut state = SessionState::new(0);
        let e = event(
            "3",
            "sess",
            HookEventType::PreToolUse,
            json!({"tool_name": "Bash", "task_id": "task-9"}),
        );
        apply_update(&mut state, &e);
        assert!(state.task_launches.is_empty());
    }

    #[test]
    fn session_end_hangs_off_root_and_drops_state() {
        let store = Arc::new(MemorySessionStore::new());
        let mut r = HierarchyResolver::new(Box::new(Shared(Arc::clone(&store))), 100);
        let s = "sess";
        feed(&mut r, event("1", s, HookEventType::SessionStart, json!({})));
        assert_eq!(store.len(), 1);
        assert_eq!(
            feed(&mut r, event("9", s, HookEventType::SessionEnd, json!({}))).as_deref(),
            Some("1")
        );
        assert!(store.is_empty());
        assert_eq!(r.cached_sessions(), 0);
    }

    #[test]
    fn producer_parent_is_kept() {
        let mut r = resolver();
        let mut e = event("2", "sess", HookEventType::UserPromptSubmit, json!({}));
        e.parent_event_id = Some("from-producer".to_owned());
        r.resolve(&mut e, 1);
        assert_eq!(e.parent_event_id.as_deref(), Some("from-producer"));
        // State still advances.
        assert_eq!(
            feed(&mut r, event("3", "sess", HookEventType::Stop, json!({}))).as_deref(),
            Some("2")
        );
    }

    #[test]
    fn span_kind_is_attached() {
        let mut r = resolver();
        let mut e = event("1", "sess", HookEventType::SessionStart, json!({}));
        r.resolve(&mut e, 1);
        assert_eq!(e.span_kind, SpanKind::Root);
    }

    #[test]
    fn state_survives_restart_through_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let mut first = HierarchyResolver::new(Box::new(FileSessionStore::new(&path)), 100);
            feed(&mut first, event("1", "sess", HookEventType::SessionStart, json!({})));
        }
        let mut second = HierarchyResolver::new(Box::new(FileSessionStore::new(&path)), 100);
        assert_eq!(
            feed(&mut second, event("2", "sess", HookEventType::UserPromptSubmit, json!({})))
                .as_deref(),
            Some("1")
        );
    }

    #[test]
    fn cache_is_bounded_by_lru() {
        let mut r = HierarchyResolver::new(Box::new(MemorySessionStore::new()), 2);
        for (i, s) in ["a-1", "b-1", "c-1"].into_iter().enumerate() {
            let mut e = event(&format!("{i}"), s, HookEventType::SessionStart, json!({}));
            r.resolve(&mut e, i64::try_from(i).unwrap_or_default());
        }
        assert_eq!(r.cached_sessions(), 2);
    }

    #[test]
    fn persistence_failure_falls_back_to_memory() {
        let mut r = HierarchyResolver::new(Box::new(Broken), 100);
        let s = "sess";
        assert_eq!(feed(&mut r, event("1", s, HookEventType::SessionStart, json!({}))), None);
        assert_eq!(
            feed(&mut r, event("2", s, HookEventType::UserPromptSubmit, json!({}))).as_deref(),
            Some("1")
        );
    }

    #[test]
    fn correlation_id_extraction() {
        assert_eq!(tool_use_id(&json!({"tool_use_id": "t"})), Some("t"));
        assert_eq!(tool_use_id(&json!({"tool_use_id": ""})), None);
        assert_eq!(task_id(&json!({"task_id": "a", "tool_input": {"task_id": "b"}})), Some("a"));
        assert_eq!(task_id(&json!({"tool_input": {"task_id": "b"}})), Some("b"));
        assert!(is_task_launch(&json!({"tool_name": "Agent"})));
        assert!(!is_task_launch(&json!({"tool_name": "Bash"})));
    }
}
