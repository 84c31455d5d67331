//! Registry of live sessions.
//!
//! The registry maps session IDs to their entries and assigns ordinals.
//! Ordinals are assigned sequentially starting from 0, one per admitted
//! session, and exist for humans reading logs; the UUID is the key.
//!
//! A session is present exactly while its connection is open and admitted.
//! Only the admission controller evicts entries; everything else removes its
//! own entry through [`SessionRegistry::deregister`].

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
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

/// Registered session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Session ID.
    pub id: SessionId,
    /// Admission ordinal.
    pub ordinal: u64,
    /// When the connection was admitted.
    pub created_at: Instant,
    /// Remote address, if known.
    pub peer: Option<SocketAddr>,
    /// Cancelling this closes the session's connection.
    pub cancel: CancellationToken,
}

impl SessionEntry {
    /// Handle given to the task serving this session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            ordinal: self.ordinal,
            cancel: self.cancel.clone(),
        }
    }
}

/// What a session's own task needs to know about itself.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Session ID.
    pub id: SessionId,
    /// Admission ordinal.
    pub ordinal: u64,
    /// Fires on eviction or shutdown.
    pub cancel: CancellationToken,
}

/// Registry mapping session IDs to entries.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Live sessions by ID.
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    /// Next ordinal to assign.
    next_ordinal: AtomicU64,
}

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Session count, or `None` if the lock is held elsewhere.
    pub fn try_len(&self) -> Option<usize> {
        self.sessions.try_lock().map(|sessions| sessions.len())
    }

    /// Check if no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Check if a session is registered.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains_key(id)
    }

    /// Build an entry with the next ordinal, without registering it.
    pub fn new_entry(
        &self,
        peer: Option<SocketAddr>,
        created_at: Instant,
        cancel: CancellationToken,
    ) -> SessionEntry {
        SessionEntry {
            id: SessionId::new(),
            ordinal: self.next_ordinal.fetch_add(1, Ordering::Relaxed),
            created_at,
            peer,
            cancel,
        }
    }

    /// Register a session unconditionally.
    ///
    /// Admission normally goes through the admission controller; this is for
    /// callers that already decided.
    pub fn register(&self, entry: SessionEntry) -> SessionHandle {
        let handle = entry.handle();
        self.sessions.lock().insert(entry.id, entry);
        handle
    }

    /// Remove a session.
    ///
    /// Returns `None` if it was already removed (for example by eviction), so
    /// a session is never deregistered twice.
    pub fn deregister(&self, id: &SessionId) -> Option<SessionEntry> {
        self.sessions.lock().remove(id)
    }

    /// Entry with the earliest admission time.
    pub fn oldest(&self) -> Option<SessionEntry> {
        oldest_in(&self.sessions.lock()).cloned()
    }

    /// Cancel every live session. Entries are removed by their own tasks.
    pub fn cancel_all(&self) -> usize {
        let sessions = self.sessions.lock();
        for entry in sessions.values() {
            entry.cancel.cancel();
        }
        sessions.len()
    }

    /// Like [`cancel_all`](Self::cancel_all), but gives up instead of waiting
    /// for the lock.
    pub fn try_cancel_all(&self) -> Option<usize> {
        let sessions = self.sessions.try_lock()?;
        for entry in sessions.values() {
            entry.cancel.cancel();
        }
        Some(sessions.len())
    }

    /// Lock the map so a decision and its mutation happen atomically.
    pub(crate) fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.sessions.lock()
    }
}

/// Entry with the minimum `created_at` in a locked map.
pub(crate) fn oldest_in(sessions: &HashMap<SessionId, SessionEntry>) -> Option<&SessionEntry> {
    sessions.values().min_by_key(|entry| entry.created_at)
}
