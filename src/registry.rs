//! Connection registry
//!
//! Concurrent mapping from (group, agent id) to a live session. Entries
//! are inserted when a session completes its handshake and removed when
//! its socket closes; removal may race ahead of full teardown, so a
//! lookup can briefly return a session whose socket is already closing.
//! A subsequent send on such a session simply fails.

use crate::session::ClientSession;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Registry key: an agent id namespaced by its group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    group: String,
    id: String,
}

impl SessionKey {
    fn new(group: &str, id: &str) -> Self {
        Self {
            group: group.to_string(),
            id: id.to_string(),
        }
    }
}

/// Process-wide map of live sessions, explicitly constructed and passed
/// to every component that needs it.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<RwLock<HashMap<SessionKey, Arc<ClientSession>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, overwriting any stale entry under the same key.
    pub fn register(&self, session: Arc<ClientSession>) {
        let key = SessionKey::new(&session.group, &session.id);
        let mut sessions = self.sessions.write().expect("registry lock");
        if sessions.insert(key, session).is_some() {
            tracing::debug!("replaced stale registry entry");
        }
    }

    /// Remove a session entry; returns it if it was present.
    pub fn unregister(&self, group: &str, id: &str) -> Option<Arc<ClientSession>> {
        let mut sessions = self.sessions.write().expect("registry lock");
        sessions.remove(&SessionKey::new(group, id))
    }

    /// Remove the entry for this exact session. A reconnect that already
    /// overwrote the key is left in place.
    pub fn unregister_exact(&self, session: &Arc<ClientSession>) -> bool {
        let mut sessions = self.sessions.write().expect("registry lock");
        let key = SessionKey::new(&session.group, &session.id);
        match sessions.get(&key) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Point lookup.
    pub fn lookup(&self, group: &str, id: &str) -> Option<Arc<ClientSession>> {
        let sessions = self.sessions.read().expect("registry lock");
        sessions.get(&SessionKey::new(group, id)).cloned()
    }

    /// All sessions currently registered under a group.
    pub fn scan_by_group(&self, group: &str) -> Vec<Arc<ClientSession>> {
        let sessions = self.sessions.read().expect("registry lock");
        sessions
            .values()
            .filter(|session| session.group == group)
            .cloned()
            .collect()
    }

    /// Every live session.
    pub fn scan_all(&self) -> Vec<Arc<ClientSession>> {
        let sessions = self.sessions.read().expect("registry lock");
        sessions.values().cloned().collect()
    }

    /// Group → sorted agent ids, for the listing endpoints.
    pub fn group_index(&self) -> BTreeMap<String, Vec<String>> {
        let sessions = self.sessions.read().expect("registry lock");
        let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for session in sessions.values() {
            index
                .entry(session.group.clone())
                .or_default()
                .push(session.id.clone());
        }
        for ids in index.values_mut() {
            ids.sort();
        }
        index
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().expect("registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
