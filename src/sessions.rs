use crate::flow::Flow;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

/// Sessions older than this are treated as abandoned page loads.
const SESSION_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SessionId(Uuid::parse_str(s)?))
    }
}

struct Entry {
    flow: Flow,
    touched_at: DateTime<Utc>,
}

/// Binds one page load to one state-machine instance.
///
/// Actions `claim` the instance, taking it out of the map, and `restore`
/// it when done. A second request racing on the same session finds nothing
/// and is bounced back to a reload, which is what enforces the single
/// in-flight mutation per page instance. Expired entries are pruned on
/// access rather than by a background task.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<Uuid, Entry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: SessionId, flow: Flow, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        prune(&mut inner, now);
        inner.insert(
            id.0,
            Entry {
                flow,
                touched_at: now,
            },
        );
    }

    /// Take exclusive ownership of a session's flow. Returns `None` if the
    /// session is unknown, expired, or currently claimed by another request.
    pub fn claim(&self, id: &SessionId, now: DateTime<Utc>) -> Option<Flow> {
        let mut inner = self.inner.lock().unwrap();
        prune(&mut inner, now);
        inner.remove(&id.0).map(|entry| entry.flow)
    }

    /// Put a claimed flow back, refreshing its TTL.
    pub fn restore(&self, id: SessionId, flow: Flow, now: DateTime<Utc>) {
        self.insert(id, flow, now);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

fn prune(inner: &mut HashMap<Uuid, Entry>, now: DateTime<Utc>) {
    let ttl = Duration::minutes(SESSION_TTL_MINUTES);
    inner.retain(|_, entry| now - entry.touched_at < ttl);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowConfig;

    fn t0() -> DateTime<Utc> {
        "2025-06-01T12:00:00Z".parse().unwrap()
    }

    fn some_flow() -> Flow {
        Flow::new(FlowConfig::topic("product-updates"), "user:1".parse().unwrap())
    }

    #[test]
    fn claim_returns_the_stored_flow_once() {
        let store = SessionStore::new();
        let id = SessionId::new();
        store.insert(id, some_flow(), t0());

        assert!(store.claim(&id, t0()).is_some());
        // Claimed: a concurrent request on the same session gets nothing.
        assert!(store.claim(&id, t0()).is_none());
    }

    #[test]
    fn restore_makes_the_session_claimable_again() {
        let store = SessionStore::new();
        let id = SessionId::new();
        store.insert(id, some_flow(), t0());

        let flow = store.claim(&id, t0()).unwrap();
        store.restore(id, flow, t0());

        assert!(store.claim(&id, t0()).is_some());
    }

    #[test]
    fn unknown_sessions_yield_nothing() {
        let store = SessionStore::new();
        assert!(store.claim(&SessionId::new(), t0()).is_none());
    }

    #[test]
    fn expired_sessions_are_pruned() {
        let store = SessionStore::new();
        let id = SessionId::new();
        store.insert(id, some_flow(), t0());

        let later = t0() + Duration::minutes(SESSION_TTL_MINUTES + 1);
        assert!(store.claim(&id, later).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn touching_a_session_extends_its_life() {
        let store = SessionStore::new();
        let id = SessionId::new();
        store.insert(id, some_flow(), t0());

        let midway = t0() + Duration::minutes(20);
        let flow = store.claim(&id, midway).unwrap();
        store.restore(id, flow, midway);

        let later = t0() + Duration::minutes(40);
        assert!(store.claim(&id, later).is_some());
    }

    #[test]
    fn session_id_roundtrips_through_display() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-session".parse::<SessionId>().is_err());
    }
}
