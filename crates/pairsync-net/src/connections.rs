//! Connection lifecycle tracking.
//!
//! Maintains an in-memory map of live connections to remote identities and
//! per-peer failure history. Each connection moves through
//! `connecting -> connected -> disconnected`, or straight from `connecting`
//! to `disconnected` on failure or timeout. A disconnected connection is
//! dropped from the map; reconnecting creates a fresh [`ConnectionId`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pairsync_shared::IdentityId;

use crate::backoff::Backoff;
use crate::error::NetError;
use crate::observers::{ObserverList, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Why a connection reached `disconnected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Orderly close by either side.
    Closed,
    /// Stayed in `connecting` past the connect timeout.
    Timeout,
    /// The transport reported an error.
    Failed(String),
}

/// A transport session to one remote identity.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub remote: IdentityId,
    pub state: ConnectionState,
    /// Set once the connection is disconnected.
    pub close_reason: Option<CloseReason>,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    started: Instant,
}

impl Connection {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Time since the connection attempt began.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

/// What the registry remembers about a peer across connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerHistory {
    /// Failed or timed-out attempts since the last successful connect.
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_connected_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    history: HashMap<IdentityId, PeerHistory>,
}

/// Tracks every connection attempt and live connection.
///
/// Cloning is cheap; clones share state and observers.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<Inner>>,
    opened: Arc<ObserverList<Connection>>,
    closed: Arc<ObserverList<Connection>>,
}

impl ConnectionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            opened: Arc::new(ObserverList::new()),
            closed: Arc::new(ObserverList::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Record a new connection attempt to `remote`.
    pub fn begin_connect(&self, remote: IdentityId) -> ConnectionId {
        let id = ConnectionId::new();
        let connection = Connection {
            id,
            remote,
            state: ConnectionState::Connecting,
            close_reason: None,
            started_at: Utc::now(),
            connected_at: None,
            started: Instant::now(),
        };

        debug!(connection = %id, peer = %remote.short(), "Connection attempt started");
        self.lock().connections.insert(id, connection);
        id
    }

    /// `connecting -> connected`. Notifies opened observers.
    pub fn mark_connected(&self, id: ConnectionId) -> Result<Connection, NetError> {
        let connection = {
            let mut inner = self.lock();
            let connection = inner
                .connections
                .get_mut(&id)
                .ok_or(NetError::UnknownConnection(id))?;

            if connection.state != ConnectionState::Connecting {
                return Err(NetError::InvalidTransition {
                    id,
                    from: connection.state,
                    to: ConnectionState::Connected,
                });
            }

            let now = Utc::now();
            connection.state = ConnectionState::Connected;
            connection.connected_at = Some(now);
            let snapshot = connection.clone();

            let history = inner.history.entry(snapshot.remote).or_default();
            history.consecutive_failures = 0;
            history.last_connected_at = Some(now);
            snapshot
        };

        info!(connection = %id, peer = %connection.remote.short(), "Connection opened");
        self.opened.notify(&connection);
        Ok(connection)
    }

    /// Transport-level failure. Valid from either `connecting` or
    /// `connected`; counts toward the peer's failure streak.
    pub fn mark_failed(&self, id: ConnectionId, reason: CloseReason) -> Result<Connection, NetError> {
        self.disconnect(id, reason)
    }

    /// Orderly close of a connection.
    pub fn close(&self, id: ConnectionId) -> Result<Connection, NetError> {
        self.disconnect(id, CloseReason::Closed)
    }

    fn disconnect(&self, id: ConnectionId, reason: CloseReason) -> Result<Connection, NetError> {
        let connection = {
            let mut inner = self.lock();
            let mut connection = inner
                .connections
                .remove(&id)
                .ok_or(NetError::UnknownConnection(id))?;

            connection.state = ConnectionState::Disconnected;
            connection.close_reason = Some(reason.clone());

            if reason != CloseReason::Closed {
                let history = inner.history.entry(connection.remote).or_default();
                history.consecutive_failures = history.consecutive_failures.saturating_add(1);
                history.last_failure_at = Some(Utc::now());
            }
            connection
        };

        match &reason {
            CloseReason::Closed => {
                info!(connection = %id, peer = %connection.remote.short(), "Connection closed")
            }
            other => warn!(
                connection = %id,
                peer = %connection.remote.short(),
                reason = ?other,
                "Connection lost"
            ),
        }

        self.closed.notify(&connection);
        Ok(connection)
    }

    /// Expire attempts that have been `connecting` for at least `timeout`.
    ///
    /// Each expired attempt is disconnected with [`CloseReason::Timeout`] and
    /// reported as a [`NetError::ConnectionTimeout`] so callers can surface
    /// "peer unreachable".
    pub fn expire_stale(&self, timeout: Duration) -> Vec<NetError> {
        let stale: Vec<(ConnectionId, IdentityId, Duration)> = self
            .lock()
            .connections
            .values()
            .filter(|c| c.state == ConnectionState::Connecting && c.age() >= timeout)
            .map(|c| (c.id, c.remote, c.age()))
            .collect();

        let mut expired = Vec::new();
        for (id, remote, waited) in stale {
            if self.disconnect(id, CloseReason::Timeout).is_ok() {
                expired.push(NetError::ConnectionTimeout { remote, waited });
            }
        }
        expired
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Called after a connection reaches `connected`.
    pub fn on_connection_opened<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.opened.subscribe(callback)
    }

    /// Called after a connection reaches `disconnected`, for any reason.
    pub fn on_connection_closed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.closed.subscribe(callback)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Snapshot of every connection in state `connected`.
    pub fn active_connections(&self) -> Vec<Connection> {
        self.lock()
            .connections
            .values()
            .filter(|c| c.is_connected())
            .cloned()
            .collect()
    }

    /// Any live connection to `remote`.
    pub fn active_connection_to(&self, remote: &IdentityId) -> Option<Connection> {
        self.lock()
            .connections
            .values()
            .find(|c| c.is_connected() && &c.remote == remote)
            .cloned()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.lock().connections.get(&id).cloned()
    }

    pub fn is_connected(&self, remote: &IdentityId) -> bool {
        self.active_connection_to(remote).is_some()
    }

    pub fn history(&self, remote: &IdentityId) -> PeerHistory {
        self.lock().history.get(remote).cloned().unwrap_or_default()
    }

    /// How long a caller should wait before dialing `remote` again.
    pub fn retry_delay(&self, remote: &IdentityId, backoff: &Backoff) -> Duration {
        backoff.delay(self.history(remote).consecutive_failures)
    }

    /// Number of connections in any non-terminal state.
    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
