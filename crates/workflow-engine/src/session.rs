//! Session context store
//!
//! An arena of per-session key-value records. Handlers never touch this
//! directly: the orchestrator merges completed handler outputs on their
//! behalf, so the only concurrency to serialize is merges for one session
//! during a parallel group. Each session's fields sit behind their own
//! mutex (the per-session critical section); the arena index is a RwLock
//! only consulted on open/evict.
//!
//! Writes are additive and overwriting per key, never removing; the
//! latest value is the only one visible to later steps.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::types::FieldMap;

#[derive(Default)]
struct SessionSlot {
    fields: Mutex<FieldMap>,
}

/// Arena of session contexts keyed by session id
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, session_id: &str) -> Arc<SessionSlot> {
        if let Some(slot) = self.sessions.read().get(session_id) {
            return slot.clone();
        }
        let mut sessions = self.sessions.write();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Open a handle to a session's context, creating it if absent
    ///
    /// Auto-creation is not an error; a fresh session starts empty.
    pub fn open(&self, session_id: &str) -> SessionContext {
        SessionContext {
            session_id: session_id.to_string(),
            slot: self.slot(session_id),
        }
    }

    /// Merge fields into a session's context (last-writer-wins per key)
    pub fn merge(&self, session_id: &str, fields: FieldMap) {
        self.open(session_id).merge(fields);
    }

    /// Read-only copy of a session's context
    ///
    /// An absent session reads as empty; nothing is created.
    pub fn snapshot(&self, session_id: &str) -> FieldMap {
        match self.sessions.read().get(session_id) {
            Some(slot) => slot.fields.lock().clone(),
            None => FieldMap::new(),
        }
    }

    /// Whether a session is live in the store
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Discard a session, returning its final fields if it existed
    ///
    /// The engine keeps sessions after workflow completion (follow-up
    /// requests may reference earlier outputs); eviction is the embedding
    /// application's archival hook.
    pub fn evict(&self, session_id: &str) -> Option<FieldMap> {
        self.sessions
            .write()
            .remove(session_id)
            .map(|slot| slot.fields.lock().clone())
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// Cheap cloneable handle to one session's context
#[derive(Clone)]
pub struct SessionContext {
    session_id: String,
    slot: Arc<SessionSlot>,
}

impl SessionContext {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// One field's current value
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.slot.fields.lock().get(key).cloned()
    }

    /// Merge fields (last-writer-wins per key, never removes)
    pub fn merge(&self, fields: FieldMap) {
        if fields.is_empty() {
            return;
        }
        let mut current = self.slot.fields.lock();
        for (key, value) in fields {
            current.insert(key, value);
        }
    }

    /// Read-only copy of the whole context
    pub fn snapshot(&self) -> FieldMap {
        self.slot.fields.lock().clone()
    }
}
