use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use buybuddy_core::domain::packet::InventorySnapshot;
use buybuddy_core::{ConversationState, IterationCounters};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Committed per-session values. Only a completed turn writes here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub state: ConversationState,
    pub counters: IterationCounters,
    #[serde(default)]
    pub inventory: InventorySnapshot,
}

pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

struct Entry {
    handle: Arc<Mutex<Session>>,
    last_active: Instant,
}

impl Entry {
    fn new(now: Instant) -> Self {
        Self { handle: Arc::new(Mutex::new(Session::default())), last_active: now }
    }

    /// Nobody outside the map holds the handle, so no turn is in flight.
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.handle) == 1
    }
}

/// Keyed session store. The map lock is held only to look up or insert a
/// handle; a turn holds the per-session mutex for its whole duration.
///
/// At `max_sessions` a new session displaces the least recently active idle
/// one. Sessions with a turn in flight are never displaced or swept.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Entry>>,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_sessions: usize) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), max_sessions: max_sessions.max(1) }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Handle for `id`, creating a fresh session on first use. Marks the
    /// session active.
    pub async fn session(&self, id: &SessionId) -> Arc<Mutex<Session>> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        if let Some(entry) = sessions.get_mut(id) {
            entry.last_active = now;
            return Arc::clone(&entry.handle);
        }

        if sessions.len() >= self.max_sessions {
            if let Some(displaced) = least_recently_active_idle(&sessions) {
                sessions.remove(&displaced);
                debug!(
                    event_name = "session.displaced",
                    session_id = %displaced,
                    max_sessions = self.max_sessions,
                    "session store full; dropped least recently active session"
                );
            } else {
                warn!(
                    event_name = "session.capacity_exceeded",
                    max_sessions = self.max_sessions,
                    "every stored session has a turn in flight; admitting over capacity"
                );
            }
        }

        let entry = sessions.entry(id.clone()).or_insert_with(|| Entry::new(now));
        Arc::clone(&entry.handle)
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(id).map(|entry| Arc::clone(&entry.handle))
    }

    /// Current committed values. Waits for an in-flight turn on the same
    /// session to finish.
    pub async fn snapshot(&self, id: &SessionId) -> Option<Session> {
        let handle = self.get(id).await?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    pub async fn reset(&self, id: &SessionId) -> Session {
        let handle = self.session(id).await;
        let mut session = handle.lock().await;
        *session = Session::default();
        session.clone()
    }

    /// Drops the session. A turn already in flight finishes against its own
    /// handle, but its commit is not visible afterwards.
    pub async fn remove(&self, id: &SessionId) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Drops idle sessions not touched for at least `idle_ttl`. Returns how
    /// many were dropped.
    pub async fn evict_idle(&self, idle_ttl: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            !(entry.is_idle() && now.saturating_duration_since(entry.last_active) >= idle_ttl)
        });
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn least_recently_active_idle(sessions: &HashMap<SessionId, Entry>) -> Option<SessionId> {
    sessions
        .iter()
        .filter(|(_, entry)| entry.is_idle())
        .min_by_key(|(_, entry)| entry.last_active)
        .map(|(id, _)| id.clone())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use buybuddy_core::{OverallStatus, ProductStatus};

    use super::{Session, SessionId, SessionStore};

    #[tokio::test]
    async fn sessions_are_created_on_first_use() {
        let store = SessionStore::new();
        let id = SessionId::from("s-1");

        assert!(store.snapshot(&id).await.is_none());
        let handle = store.session(&id).await;
        assert_eq!(*handle.lock().await, Session::default());
        assert_eq!(store.len().await, 1);

        let again = store.session(&id).await;
        assert!(Arc::ptr_eq(&handle, &again));
    }

    #[tokio::test]
    async fn reset_restores_initial_values() {
        let store = SessionStore::new();
        let id = SessionId::from("s-2");
        {
            let handle = store.session(&id).await;
            let mut session = handle.lock().await;
            session.state.product_status = ProductStatus::Searching;
            session.state.overall_status = OverallStatus::InventoryCheck;
            session.counters.product_agent_calls = 2;
        }

        assert_eq!(store.reset(&id).await, Session::default());
        assert_eq!(store.snapshot(&id).await, Some(Session::default()));
    }

    #[tokio::test]
    async fn distinct_sessions_are_independent() {
        let store = SessionStore::new();
        let first = store.session(&SessionId::from("a")).await;
        let second = store.session(&SessionId::from("b")).await;

        let _held = first.lock().await;
        second.lock().await.counters.customer_clarifications = 1;

        let snapshot = store.snapshot(&SessionId::from("b")).await.expect("session b");
        assert_eq!(snapshot.counters.customer_clarifications, 1);
    }

    #[tokio::test]
    async fn full_store_displaces_least_recently_active_session() {
        let store = SessionStore::with_capacity(2);
        store.session(&SessionId::from("old")).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.session(&SessionId::from("recent")).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        store.session(&SessionId::from("old")).await;

        store.session(&SessionId::from("new")).await;

        assert_eq!(store.len().await, 2);
        assert!(store.get(&SessionId::from("recent")).await.is_none());
        assert!(store.get(&SessionId::from("old")).await.is_some());
        assert!(store.get(&SessionId::from("new")).await.is_some());
    }

    #[tokio::test]
    async fn busy_sessions_are_never_displaced() {
        let store = SessionStore::with_capacity(1);
        let busy = store.session(&SessionId::from("busy")).await;

        store.session(&SessionId::from("other")).await;

        assert!(store.get(&SessionId::from("busy")).await.is_some());
        assert_eq!(store.len().await, 2);
        drop(busy);
    }

    #[tokio::test]
    async fn idle_sweep_drops_only_stale_unlocked_sessions() {
        let store = SessionStore::new();
        store.session(&SessionId::from("idle")).await;
        let held = store.session(&SessionId::from("held")).await;

        assert_eq!(store.evict_idle(Duration::from_secs(3_600)).await, 0);
        assert_eq!(store.evict_idle(Duration::ZERO).await, 1);

        assert!(store.get(&SessionId::from("idle")).await.is_none());
        assert!(store.get(&SessionId::from("held")).await.is_some());
        drop(held);
        assert_eq!(store.evict_idle(Duration::ZERO).await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn removed_session_starts_fresh() {
        let store = SessionStore::new();
        let id = SessionId::from("gone");
        store.session(&id).await.lock().await.counters.product_agent_calls = 2;

        assert!(store.remove(&id).await);
        assert!(!store.remove(&id).await);
        assert!(store.snapshot(&id).await.is_none());
        assert_eq!(*store.session(&id).await.lock().await, Session::default());
    }
}
