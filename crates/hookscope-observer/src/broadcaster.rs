//! Fan-out of accepted batches to connected stream observers.
//!
//! Each observer owns an independent bounded channel drained by its own
//! `WebSocket` task. A message is serialized once and the same payload
//! is handed to every observer with a non-blocking `try_send`. There is
//! no retry and no waiting: an observer whose channel is closed or full
//! is removed on the spot, and delivery to everyone else carries on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use hookscope_types::{ObserverId, StreamMessage};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Messages an observer may have in flight before it counts as dead.
pub const OBSERVER_BUFFER: usize = 64;

/// Serialized stream message shared by every observer.
pub type Payload = Arc<str>;

/// Registry of connected observers.
#[derive(Debug, Default)]
pub struct Broadcaster {
    observers: Mutex<HashMap<ObserverId, mpsc::Sender<Payload>>>,
}

impl Broadcaster {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer whose first message is `initial`.
    ///
    /// # Errors
    ///
    /// Returns an error if `initial` cannot be serialized.
    pub fn register(
        &self,
        initial: &StreamMessage,
    ) -> Result<(ObserverId, mpsc::Receiver<Payload>), serde_json::Error> {
        let payload: Payload = serde_json::to_string(initial)?.into();
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        // A fresh channel always has room for the first message.
        let _ = tx.try_send(payload);

        let id = ObserverId::new();
        self.lock().insert(id, tx);
        debug!(observer = %id, "observer registered");
        Ok((id, rx))
    }

    /// Remove an observer. Unknown ids are ignored.
    pub fn unregister(&self, id: ObserverId) {
        if self.lock().remove(&id).is_some() {
            debug!(observer = %id, "observer unregistered");
        }
    }

    /// Push `message` to every observer, dropping any that cannot take it.
    ///
    /// Returns the number of observers the message was delivered to.
    pub fn broadcast(&self, message: &StreamMessage) -> usize {
        let payload: Payload = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(error = %e, "failed to serialize stream message");
                return 0;
            }
        };

        let mut delivered = 0_usize;
        self.lock().retain(|id, tx| match tx.try_send(Arc::clone(&payload)) {
            Ok(()) => {
                delivered = delivered.saturating_add(1);
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!(observer = %id, "observer fell behind, dropping");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(observer = %id, "observer gone, dropping");
                false
            }
        });
        delivered
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every observer. Their receivers see the channel close.
    pub fn close_all(&self) {
        let mut observers = self.lock();
        debug!(count = observers.len(), "closing all observers");
        observers.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObserverId, mpsc::Sender<Payload>>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
