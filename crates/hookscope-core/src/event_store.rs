//! Bounded window of the most recent accepted events.
//!
//! `children` and `depth` are derived over the whole window on every
//! append. Trimming the head can orphan events whose parents were just
//! evicted, so links are never patched incrementally: each rebuild
//! indexes the surviving events by id and recomputes everything.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use hookscope_types::{Event, FilterOptions};
use tracing::{debug, warn};

/// Ring buffer of the last `capacity` events in acceptance order.
#[derive(Debug, Clone)]
pub struct EventStore {
    events: VecDeque<Event>,
    capacity: usize,
}

impl EventStore {
    /// Create an empty window holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum window size.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events currently held.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append a batch, trim to capacity, and rebuild derived fields.
    ///
    /// Events whose id is already in the window (or repeated within the
    /// batch) are dropped. Returns the appended events that survived
    /// trimming, with their derived fields as of this rebuild, in
    /// acceptance order.
    pub fn append(&mut self, batch: Vec<Event>) -> Vec<Event> {
        let mut seen: HashSet<String> = self.events.iter().map(|e| e.event_id.clone()).collect();
        let mut added = 0_usize;
        for event in batch {
            if seen.insert(event.event_id.clone()) {
                self.events.push_back(event);
                added = added.saturating_add(1);
            } else {
                debug!(event_id = %event.event_id, "duplicate event id dropped");
            }
        }

        let overflow = self.events.len().saturating_sub(self.capacity);
        for _ in 0..overflow {
            self.events.pop_front();
        }

        self.rebuild();

        let survivors = added.min(self.events.len());
        let start = self.events.len().saturating_sub(survivors);
        self.events.range(start..).cloned().collect()
    }

    /// Recompute `children` and `depth` for every event in the window.
    ///
    /// Running it twice on an unchanged window yields identical results.
    pub fn rebuild(&mut self) {
        let index: HashMap<String, usize> = self
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (e.event_id.clone(), i))
            .collect();

        let parents: Vec<Option<usize>> = self
            .events
            .iter()
            .map(|e| {
                e.parent_event_id
                    .as_ref()
                    .and_then(|p| index.get(p))
                    .copied()
            })
            .collect();

        let ids: Vec<&str> = self.events.iter().map(|e| e.event_id.as_str()).collect();
        let depths = compute_depths(&parents, &ids);

        let mut children: Vec<Vec<String>> = vec![Vec::new(); self.events.len()];
        for (child, parent) in parents.iter().enumerate() {
            if let Some(p) = *parent
                && p != child
                && let (Some(slot), Some(id)) = (children.get_mut(p), ids.get(child))
            {
                slot.push((*id).to_owned());
            }
        }

        for ((event, kids), depth) in self.events.iter_mut().zip(children).zip(depths) {
            event.children = kids;
            event.depth = depth;
        }
    }

    /// The most recent `limit` events, newest first.
    pub fn snapshot(&self, limit: usize) -> Vec<Event> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    /// The whole window in acceptance order.
    pub fn window(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    /// Look up an event in the window by id.
    pub fn get(&self, event_id: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.event_id == event_id)
    }

    /// Distinct sources, up to `session_sample` most recently seen
    /// session ids, and distinct event types currently in the window.
    pub fn filter_options(&self, session_sample: usize) -> FilterOptions {
        let source_apps: BTreeSet<&str> =
            self.events.iter().map(|e| e.source_app.as_str()).collect();
        let hook_event_types: BTreeSet<_> =
            self.events.iter().map(|e| e.hook_event_type).collect();

        let mut seen = HashSet::new();
        let session_ids = self
            .events
            .iter()
            .rev()
            .filter(|e| seen.insert(e.session_id.as_str()))
            .take(session_sample)
            .map(|e| e.session_id.clone())
            .collect();

        FilterOptions {
            source_apps: source_apps.into_iter().map(str::to_owned).collect(),
            session_ids,
            hook_event_types: hook_event_types.into_iter().collect(),
        }
    }
}

/// How a parent walk ended.
enum Anchor {
    /// Reached an event with no resolvable parent.
    Root,
    /// Reached an event whose depth is already known.
    Known(u32),
    /// Revisited the event at this position of the walk.
    Cycle(usize),
}

/// Depth of every event given each event's parent position.
///
/// Each walk follows parent links with its own visited set and stops at
/// a root, at an event already computed in this pass, or on a revisit.
/// Events on a cycle get depth 0 (logged); events leading into a cycle
/// count from it.
fn compute_depths(parents: &[Option<usize>], ids: &[&str]) -> Vec<u32> {
    let mut memo: Vec<Option<u32>> = vec![None; parents.len()];
    let mut path: Vec<usize> = Vec::new();
    let mut on_path: HashMap<usize, usize> = HashMap::new();

    for start in 0..parents.len() {
        if memo.get(start).copied().flatten().is_some() {
            continue;
        }
        path.clear();
        on_path.clear();

        let mut cur = start;
        let anchor = loop {
            if let Some(d) = memo.get(cur).copied().flatten() {
                break Anchor::Known(d);
            }
            if let Some(&pos) = on_path.get(&cur) {
                break Anchor::Cycle(pos);
            }
            on_path.insert(cur, path.len());
            path.push(cur);
            match parents.get(cur).copied().flatten() {
                Some(p) => cur = p,
                None => break Anchor::Root,
            }
        };

        let (tail_len, mut depth) = match anchor {
            Anchor::Root => (path.len(), 0),
            Anchor::Known(d) => (path.len(), d.saturating_add(1)),
            Anchor::Cycle(pos) => {
                let members: Vec<&str> = path
                    .get(pos..)
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|&i| ids.get(i).copied())
                    .collect();
                warn!(cycle = ?members, "cycle in parent chain, assigning depth 0");
                for &i in path.get(pos..).unwrap_or_default() {
                    if let Some(slot) = memo.get_mut(i) {
                        *slot = Some(0);
                    }
                }
                (pos, 1)
            }
        };

        for &i in path.get(..tail_len).unwrap_or_default().iter().rev() {
            if let Some(slot) = memo.get_mut(i) {
                *slot = Some(depth);
            }
            depth = depth.saturating_add(1);
        }
    }

    memo.into_iter().map(Option::unwrap_or_default).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use hookscope_types::{HookEventType, SpanKind};
    use serde_json::json;

    use super::*;

    fn event(id: &str, parent: Option<&str>) -> Event {
        Event {
            event_id: id.to_owned(),
            parent_event_id: parent.map(str::to_owned),
            source_app: "cli".to_owned(),
            session_id: "sess-1".to_owned(),
            hook_event_type: HookEventType::Notification,
            payload: json!({}),
            timestamp: 0,
            timestamp_display: String::new(),
            summary: None,
            model_name: None,
            span_kind: SpanKind::Internal,
            children: Vec::new(),
            depth: 0,
        }
    }

    fn depth(store: &EventStore, id: &str) -> u32 {
        store.get(id).map(|e| e.depth).unwrap()
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let mut store = EventStore::new(5);
        for batch in 0..10 {
            let events = (0..3).map(|i| event(&format!("{batch}-{i}"), None)).collect();
            store.append(events);
            assert!(store.len() <= 5);
        }
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn chain_depths_and_children() {
        let mut store = EventStore::new(10);
        store.append(vec![
            event("1", None),
            event("2", Some("1")),
            event("3", Some("2")),
            event("4", Some("3")),
        ]);
        assert_eq!(depth(&store, "1"), 0);
        assert_eq!(depth(&store, "2"), 1);
        assert_eq!(depth(&store, "3"), 2);
        assert_eq!(depth(&store, "4"), 3);
        assert_eq!(store.get("1").unwrap().children, vec!["2".to_owned()]);
        assert!(store.get("4").unwrap().children.is_empty());
    }

    #[test]
    fn parent_in_later_batch_is_linked() {
        let mut store = EventStore::new(10);
        store.append(vec![event("a", None)]);
        store.append(vec![event("b", Some("a")), event("c", Some("a"))]);
        assert_eq!(
            store.get("a").unwrap().children,
            vec!["b".to_owned(), "c".to_owned()]
        );
        assert_eq!(depth(&store, "c"), 1);
    }

    #[test]
    fn eviction_invalidates_parent() {
        let mut store = EventStore::new(3);
        store.append(vec![
            event("1", None),
            event("2", Some("1")),
            event("3", Some("2")),
            event("4", Some("3")),
        ]);
        assert_eq!(store.len(), 3);
        assert!(store.get("1").is_none());
        assert_eq!(depth(&store, "2"), 0);
        assert_eq!(depth(&store, "3"), 1);
        assert_eq!(depth(&store, "4"), 2);
    }

    #[test]
    fn eviction_across_batches_clears_stale_children() {
        let mut store = EventStore::new(2);
        store.append(vec![event("1", None), event("2", Some("1"))]);
        assert_eq!(store.get("1").unwrap().children, vec!["2".to_owned()]);
        store.append(vec![event("3", Some("1"))]);
        assert_eq!(depth(&store, "2"), 0);
        assert_eq!(depth(&store, "3"), 0);
    }

    #[test]
    fn dangling_parent_is_depth_zero() {
        let mut store = EventStore::new(10);
        store.append(vec![event("x", Some("never-seen"))]);
        assert_eq!(depth(&store, "x"), 0);
    }

    /// Log sink shared between a test and its scoped subscriber.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn two_cycle_terminates_at_zero() {
        let logs = Captured::default();
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();

        let mut store = EventStore::new(10);
        tracing::subscriber::with_default(subscriber, || {
            store.append(vec![event("e1", Some("e2")), event("e2", Some("e1"))]);
        });

        assert_eq!(depth(&store, "e1"), 0);
        assert_eq!(depth(&store, "e2"), 0);
        let output = logs.text();
        let warning = output
            .lines()
            .find(|l| l.contains("cycle in parent chain"))
            .unwrap();
        assert!(warning.contains("WARN"));
        assert!(warning.contains("\"e1\""));
        assert!(warning.contains("\"e2\""));
    }

    #[test]
    fn self_parent_terminates_and_is_not_its_own_child() {
        let mut store = EventStore::new(10);
        store.append(vec![event("loop", Some("loop"))]);
        assert_eq!(depth(&store, "loop"), 0);
        assert!(store.get("loop").unwrap().children.is_empty());
    }

    #[test]
    fn events_hanging_off_a_cycle_count_from_it() {
        let mut store = EventStore::new(10);
        store.append(vec![
            event("tail", Some("a")),
            event("a", Some("b")),
            event("b", Some("a")),
        ]);
        assert_eq!(depth(&store, "a"), 0);
        assert_eq!(depth(&store, "b"), 0);
        assert_eq!(depth(&store, "tail"), 1);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let mut store = EventStore::new(4);
        store.append(vec![
            event("1", None),
            event("2", Some("1")),
            event("3", Some("2")),
            event("4", Some("1")),
            event("5", Some("4")),
        ]);
        let before = store.window();
        store.rebuild();
        assert_eq!(store.window(), before);
    }

    #[test]
    fn depth_matches_parent_plus_one() {
        let mut store = EventStore::new(50);
        let events = (0..40)
            .map(|i: u32| {
                let parent = (i > 0).then(|| format!("{}", i / 2));
                event(&format!("{i}"), parent.as_deref())
            })
            .collect();
        store.append(events);
        for e in store.window() {
            match e.parent_event_id.as_deref().and_then(|p| store.get(p)) {
                Some(parent) => assert_eq!(e.depth, parent.depth + 1),
                None => assert_eq!(e.depth, 0),
            }
        }
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut store = EventStore::new(10);
        store.append(vec![event("1", None)]);
        let added = store.append(vec![event("1", None), event("2", None), event("2", None)]);
        assert_eq!(store.len(), 2);
        assert_eq!(added.len(), 1);
    }

    #[test]
    fn append_returns_surviving_new_events_with_depth() {
        let mut store = EventStore::new(2);
        store.append(vec![event("1", None)]);
        let added = store.append(vec![event("2", Some("1")), event("3", Some("2"))]);
        let ids: Vec<_> = added.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, ["2", "3"]);
        assert_eq!(added.last().map(|e| e.depth), Some(1));
    }

    #[test]
    fn snapshot_is_newest_first_and_limited() {
        let mut store = EventStore::new(10);
        store.append((0..5).map(|i| event(&format!("{i}"), None)).collect());
        let ids: Vec<_> = store.snapshot(3).into_iter().map(|e| e.event_id).collect();
        assert_eq!(ids, ["4", "3", "2"]);
    }

    #[test]
    fn filter_options_reflect_window() {
        let mut store = EventStore::new(10);
        let mut a = event("1", None);
        a.source_app = "zeta".to_owned();
        a.session_id = "sess-a".to_owned();
        a.hook_event_type = HookEventType::Stop;
        let mut b = event("2", None);
        b.source_app = "alpha".to_owned();
        b.session_id = "sess-b".to_owned();
        b.hook_event_type = HookEventType::SessionStart;
        let mut c = event("3", None);
        c.source_app = "alpha".to_owned();
        c.session_id = "sess-a".to_owned();
        c.hook_event_type = HookEventType::Stop;
        store.append(vec![a, b, c]);

        let opts = store.filter_options(300);
        assert_eq!(opts.source_apps, ["alpha", "zeta"]);
        assert_eq!(opts.session_ids, ["sess-a", "sess-b"]);
        assert_eq!(
            opts.hook_event_types,
            [HookEventType::SessionStart, HookEventType::Stop]
        );

        assert_eq!(store.filter_options(1).session_ids, ["sess-a"]);
    }
}
