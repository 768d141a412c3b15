//! Registry of live sessions for one listening port.
//!
//! Each session is represented by the sender half of its outbound line
//! queue. A dedicated writer task per connection drains that queue onto the
//! socket, so pushing a line here never blocks on network I/O and the lock
//! is only held for in-memory work.
//!
//! Sessions are kept in accept order, which is also the delivery order of
//! [`SessionRegistry::broadcast`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Identifier assigned to a session on accept. Monotonic per registry.
pub type SessionId = u64;

/// Errors from registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The session is not (or no longer) registered.
    #[error("session {0} is not registered")]
    UnknownSession(SessionId),

    /// The session already has a username.
    #[error("session {id} already bound to {username:?}")]
    UsernameAlreadyBound {
        /// Session that was targeted.
        id: SessionId,
        /// Username it already carries.
        username: String,
    },
}

/// Snapshot of a registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Username, once the first line has been read.
    pub username: Option<String>,
    /// Remote address of the connection.
    pub remote_addr: SocketAddr,
}

struct SessionEntry {
    info: SessionInfo,
    outbound: mpsc::UnboundedSender<String>,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the line was queued for.
    pub delivered: usize,
    /// Sessions whose writer had already gone away.
    pub failed: Vec<SessionId>,
}

/// Lock-protected set of live sessions plus lifetime counters.
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<SessionId, SessionEntry>>,
    next_id: AtomicU64,
    lifetime_total: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            lifetime_total: AtomicU64::new(0),
        }
    }

    /// Adds a freshly accepted connection and bumps the lifetime counter.
    pub fn register(
        &self,
        remote_addr: SocketAddr,
        outbound: mpsc::UnboundedSender<String>,
    ) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = SessionEntry {
            info: SessionInfo {
                id,
                username: None,
                remote_addr,
            },
            outbound,
        };
        self.sessions.lock().insert(id, entry);
        self.lifetime_total.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Sets the username of a session. A username can be set only once.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownSession`] if the session is gone, or
    /// [`RegistryError::UsernameAlreadyBound`] on a second call.
    pub fn bind_username(&self, id: SessionId, username: &str) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock();
        let entry = sessions
            .get_mut(&id)
            .ok_or(RegistryError::UnknownSession(id))?;
        if let Some(existing) = &entry.info.username {
            return Err(RegistryError::UsernameAlreadyBound {
                id,
                username: existing.clone(),
            });
        }
        entry.info.username = Some(username.to_string());
        drop(sessions);
        Ok(())
    }

    /// Removes a session, returning its final snapshot.
    ///
    /// Only the first call for an id returns `Some`. Dropping the entry
    /// drops the outbound sender, which lets the writer task drain and
    /// close the socket.
    pub fn remove(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.lock().remove(&id).map(|entry| entry.info)
    }

    /// Queues `line` for every registered session in accept order.
    ///
    /// Runs entirely under the registry lock, which serializes concurrent
    /// broadcasts: every session sees lines in the same relative order and
    /// whole lines are never interleaved on one socket. A closed target is
    /// recorded in the report and skipped.
    pub fn broadcast(&self, line: &str) -> BroadcastReport {
        let sessions = self.sessions.lock();
        let mut report = BroadcastReport::default();
        for (id, entry) in sessions.iter() {
            if entry.outbound.send(line.to_string()).is_ok() {
                report.delivered += 1;
            } else {
                tracing::debug!(session_id = id, "outbound queue closed, skipping");
                report.failed.push(*id);
            }
        }
        drop(sessions);
        report
    }

    /// Queues `line` for a single session. Returns `false` if the session is
    /// gone or its writer has exited.
    pub fn send_to(&self, id: SessionId, line: &str) -> bool {
        self.sessions
            .lock()
            .get(&id)
            .is_some_and(|entry| entry.outbound.send(line.to_string()).is_ok())
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.lock().get(&id).map(|entry| entry.info.clone())
    }

    /// Snapshots of all sessions in accept order.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .lock()
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Usernames of sessions that have bound one, in accept order.
    #[must_use]
    pub fn usernames(&self) -> Vec<String> {
        self.sessions
            .lock()
            .values()
            .filter_map(|entry| entry.info.username.clone())
            .collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Sessions accepted since the last [`reset`](Self::reset).
    #[must_use]
    pub fn lifetime_total(&self) -> u64 {
        self.lifetime_total.load(Ordering::Relaxed)
    }

    /// Drops every session, returning how many were still registered.
    pub fn clear(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let count = sessions.len();
        sessions.clear();
        drop(sessions);
        count
    }

    /// Clears the registry and zeroes the lifetime counter.
    pub fn reset(&self) {
        self.clear();
        self.lifetime_total.store(0, Ordering::Relaxed);
    }
}
