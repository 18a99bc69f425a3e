//! Active session registry
//!
//! Sessions are keyed by call SID. Only the task owning a session mutates
//! its entry; the registry itself is just the shared map behind a short
//! lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

/// Bookkeeping for one live session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub stream_sid: String,
    pub started_at: Instant,
}

/// Map of live bridge sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, call_sid: impl Into<String>, stream_sid: impl Into<String>) {
        let call_sid = call_sid.into();
        let handle = SessionHandle {
            stream_sid: stream_sid.into(),
            started_at: Instant::now(),
        };
        self.sessions.write().insert(call_sid.clone(), handle);
        tracing::debug!(call_sid = %call_sid, "Session registered");
    }

    pub fn remove(&self, call_sid: &str) {
        if self.sessions.write().remove(call_sid).is_some() {
            tracing::debug!(call_sid = %call_sid, "Session released");
        }
    }

    pub fn contains(&self, call_sid: &str) -> bool {
        self.sessions.read().contains_key(call_sid)
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }
}
