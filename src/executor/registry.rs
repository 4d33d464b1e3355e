//! Live session registry
//!
//! Tracks the executors currently able to run queries. The count
//! feeds status announcements over the host protocol, and the
//! fail-fast check in the relay reads it before dispatching.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::info;

use super::base::Executor;
use super::session::origin_of;

/// Handle identifying an attached session
pub type SessionId = u64;

/// Registry of live, query-capable sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<dyn Executor>>>,
    next_id: AtomicU64,
    count_tx: watch::Sender<usize>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            count_tx,
        }
    }

    /// Stream of live-session counts, for status announcements
    pub fn watch_count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }

    /// Registers a session and returns its handle
    pub async fn attach(&self, executor: Arc<dyn Executor>) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, executor);
        let count = sessions.len();
        drop(sessions);

        info!("Session {} attached ({} live)", id, count);
        let _ = self.count_tx.send(count);
        id
    }

    /// Removes a session; unknown handles are ignored
    pub async fn detach(&self, id: SessionId) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(&id).is_some() {
            let count = sessions.len();
            drop(sessions);

            info!("Session {} detached ({} live)", id, count);
            let _ = self.count_tx.send(count);
        }
    }

    pub async fn live_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Picks the session a query should run on
    ///
    /// Prefers a session whose endpoint shares the target's origin,
    /// since its cookies belong there; falls back to any live session
    /// when none matches, and to `None` when none exist.
    pub async fn find_for(&self, endpoint: Option<&str>) -> Option<Arc<dyn Executor>> {
        let sessions = self.sessions.read().await;
        if let Some(target) = endpoint.and_then(origin_of) {
            for executor in sessions.values() {
                if origin_of(executor.endpoint()).as_deref() == Some(target.as_str()) {
                    return Some(executor.clone());
                }
            }
        }
        sessions.values().next().cloned()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
