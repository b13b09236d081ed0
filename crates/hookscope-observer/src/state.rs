//! Shared application state for the Observer API server.
//!
//! [`AppState`] owns the downstream half of the pipeline: the hierarchy
//! resolver, the bounded event window, and the observer registry. The
//! tailer task is the only caller of [`AppState::ingest`], so appends are
//! serialized. Broadcasting happens while the window's write lock is
//! held, and a connecting observer snapshots the window under the read
//! lock, so every batch lands either in an observer's initial snapshot
//! or in a later `event` message, never both and never neither.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use hookscope_core::{
    EventStore, HierarchyResolver, IngestStats, MemorySessionStore, SessionStore,
};
use hookscope_types::{Event, FilterOptions, HealthReport, ObserverId, StreamMessage};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info};

use crate::broadcaster::{Broadcaster, Payload};
use crate::error::ObserverError;

/// Default cap on session ids returned by the filter-options query.
pub const DEFAULT_SESSION_SAMPLE: usize = 300;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
pub struct AppState {
    /// The bounded window of recent events.
    pub store: RwLock<EventStore>,
    /// Per-session parent resolution.
    pub resolver: Mutex<HierarchyResolver>,
    /// Connected stream observers.
    pub broadcaster: Broadcaster,
    /// Ingestion counters shared with the tailer.
    pub stats: Arc<IngestStats>,
    /// Cap on session ids in filter options.
    pub session_sample: usize,
}

impl AppState {
    /// Assemble state from its parts.
    pub fn new(store: EventStore, resolver: HierarchyResolver, stats: Arc<IngestStats>) -> Self {
        Self {
            store: RwLock::new(store),
            resolver: Mutex::new(resolver),
            broadcaster: Broadcaster::new(),
            stats,
            session_sample: DEFAULT_SESSION_SAMPLE,
        }
    }

    /// State with a window of `max_events` and non-persistent sessions.
    pub fn in_memory(max_events: usize) -> Self {
        let sessions: Box<dyn SessionStore> = Box::new(MemorySessionStore::new());
        Self::new(
            EventStore::new(max_events),
            HierarchyResolver::new(sessions, 100),
            Arc::new(IngestStats::new()),
        )
    }

    /// Override the session-id cap used by filter options.
    #[must_use]
    pub fn with_session_sample(mut self, session_sample: usize) -> Self {
        self.session_sample = session_sample;
        self
    }

    /// Resolve parents for a validated batch, append it to the window,
    /// and push the appended events to every observer.
    ///
    /// Events whose id is already in the window are dropped before
    /// resolution, so they never touch session state.
    ///
    /// Returns the number of events that entered the window.
    pub async fn ingest(&self, mut batch: Vec<Event>) -> usize {
        {
            // Re-read lines must not rewind session pointers.
            let store = self.store.read().await;
            let mut seen = HashSet::new();
            batch.retain(|e| {
                store.get(&e.event_id).is_none() && seen.insert(e.event_id.clone())
            });
        }
        if batch.is_empty() {
            return 0;
        }
        let now = Utc::now().timestamp_millis();

        {
            let mut resolver = self.resolver.lock().await;
            for event in &mut batch {
                resolver.resolve(event, now);
            }
        }

        let mut store = self.store.write().await;
        let added = store.append(batch);
        let count = added.len();
        self.stats
            .record_accepted(u64::try_from(count).unwrap_or(u64::MAX), now);
        if count > 0 {
            let delivered = self.broadcaster.broadcast(&StreamMessage::Event(added));
            debug!(events = count, observers = delivered, "batch broadcast");
        }
        count
    }

    /// Feed batches from `rx` into [`ingest`](Self::ingest) until the
    /// sender side closes.
    pub async fn run_ingest(self: Arc<Self>, mut rx: mpsc::Receiver<Vec<Event>>) {
        while let Some(batch) = rx.recv().await {
            self.ingest(batch).await;
        }
        info!("ingest loop finished");
    }

    /// Register a stream observer and queue its initial snapshot.
    pub async fn connect_observer(
        &self,
    ) -> Result<(ObserverId, mpsc::Receiver<Payload>), ObserverError> {
        let store = self.store.read().await;
        let initial = StreamMessage::Initial(store.window());
        Ok(self.broadcaster.register(&initial)?)
    }

    /// The most recent `limit` events, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<Event> {
        self.store.read().await.snapshot(limit)
    }

    /// A single event from the window.
    pub async fn event(&self, event_id: &str) -> Option<Event> {
        self.store.read().await.get(event_id).cloned()
    }

    /// Distinct filter values currently in the window.
    pub async fn filter_options(&self) -> FilterOptions {
        self.store.read().await.filter_options(self.session_sample)
    }

    /// Ingestion counters plus window and observer sizes.
    pub async fn health(&self) -> HealthReport {
        let counters = self.stats.counters();
        HealthReport {
            status: "ok".to_owned(),
            lines_read: counters.lines_read,
            malformed_lines: counters.malformed_lines,
            rejected: counters.rejected,
            accepted: counters.accepted,
            window_size: self.store.read().await.len(),
            observers: self.broadcaster.len(),
            last_accepted_at: counters.last_accepted_at,
        }
    }

    /// Close every observer stream.
    pub fn shutdown(&self) {
        self.broadcaster.close_all();
    }
}
