//! Connection registry.
//!
//! A connection is one guest's authorization of one provider. The registry
//! tracks its lifecycle and sync status; the facets and attributes it owns
//! live in the stores, keyed by [`ConnectionId`].

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::types::{ConnectionId, GuestId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sync status of a connection, as shown to the user and the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Last cycle succeeded (or none has run yet).
    Up,
    /// The provider throttled us; do not sync before `until` (epoch ms).
    RateLimited {
        /// Earliest time the next cycle may start.
        until: i64,
    },
    /// Authorization expired; syncing stops until the user re-authorizes.
    AuthExpired,
    /// Last cycle failed with a retryable error.
    Failed {
        /// Human-readable failure.
        reason: String,
    },
}

impl ConnectionStatus {
    /// Short status label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Up => "up",
            ConnectionStatus::RateLimited { .. } => "rate_limited",
            ConnectionStatus::AuthExpired => "auth_expired",
            ConnectionStatus::Failed { .. } => "failed",
        }
    }
}

/// A registered connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Connection id.
    pub id: ConnectionId,
    /// Owning guest.
    pub guest_id: GuestId,
    /// Provider name, e.g. `evernote`.
    pub provider: String,
    /// Current status.
    pub status: ConnectionStatus,
    /// True while a sync cycle runs.
    pub synching: bool,
    /// No cycle may start before this time (epoch ms).
    pub resume_not_before: Option<i64>,
    /// Creation time (epoch ms).
    pub created_at: i64,
}

impl Connection {
    /// Returns true if a cycle may start at `now`.
    #[must_use]
    pub fn may_sync_at(&self, now: i64) -> bool {
        if self.status == ConnectionStatus::AuthExpired {
            return false;
        }
        self.resume_not_before.map_or(true, |resume| now >= resume)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    connections: BTreeMap<ConnectionId, Connection>,
}

/// In-memory registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    /// Creates an empty registry. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection for `guest_id` to `provider`.
    pub fn create(&self, guest_id: GuestId, provider: &str, clock: &dyn Clock) -> Connection {
        let mut state = self.state.write();
        state.next_id += 1;
        let id = ConnectionId::new(state.next_id);
        let connection = Connection {
            id,
            guest_id,
            provider: provider.to_string(),
            status: ConnectionStatus::Up,
            synching: false,
            resume_not_before: None,
            created_at: clock.now_millis(),
        };
        state.connections.insert(id, connection.clone());
        tracing::info!(connection_id = %id, guest_id = %guest_id, provider, "connection created");
        connection
    }

    /// Registers a connection with a known id, e.g. when restoring from a
    /// data directory. Later [`Self::create`] calls never reuse the id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionExists`] if the id is already registered.
    pub fn insert(&self, connection: Connection) -> CoreResult<()> {
        let mut state = self.state.write();
        if state.connections.contains_key(&connection.id) {
            return Err(CoreError::ConnectionExists(connection.id));
        }
        state.next_id = state.next_id.max(connection.id.as_u64());
        state.connections.insert(connection.id, connection);
        Ok(())
    }

    /// Returns a connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.state.read().connections.get(&id).cloned()
    }

    /// Every live connection, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<Connection> {
        self.state.read().connections.values().cloned().collect()
    }

    /// Live connections of one guest, ordered by id.
    #[must_use]
    pub fn list_for_guest(&self, guest_id: GuestId) -> Vec<Connection> {
        self.state
            .read()
            .connections
            .values()
            .filter(|c| c.guest_id == guest_id)
            .cloned()
            .collect()
    }

    /// Sets the status. Setting [`ConnectionStatus::Up`] also clears any
    /// resume-not-before time.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownConnection`] if the connection is not registered.
    pub fn set_status(&self, id: ConnectionId, status: ConnectionStatus) -> CoreResult<()> {
        self.update(id, |connection| {
            if status == ConnectionStatus::Up {
                connection.resume_not_before = None;
            }
            if connection.status != status {
                tracing::debug!(connection_id = %id, status = status.label(), "connection status changed");
            }
            connection.status = status;
        })
    }

    /// Sets or clears the resume-not-before time.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownConnection`] if the connection is not registered.
    pub fn set_resume_not_before(&self, id: ConnectionId, at: Option<i64>) -> CoreResult<()> {
        self.update(id, |connection| connection.resume_not_before = at)
    }

    /// Marks the connection busy. Returns `false` if a cycle already runs.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownConnection`] if the connection is not registered.
    pub fn try_begin_sync(&self, id: ConnectionId) -> CoreResult<bool> {
        let mut state = self.state.write();
        let connection = state
            .connections
            .get_mut(&id)
            .ok_or(CoreError::UnknownConnection(id))?;
        if connection.synching {
            return Ok(false);
        }
        connection.synching = true;
        Ok(true)
    }

    /// Clears the busy flag. Unknown connections are ignored, since the
    /// connection may have been removed while its cycle ran.
    pub fn end_sync(&self, id: ConnectionId) {
        if let Some(connection) = self.state.write().connections.get_mut(&id) {
            connection.synching = false;
        }
    }

    /// Unregisters a connection and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownConnection`] if the connection is not registered.
    pub fn remove(&self, id: ConnectionId) -> CoreResult<Connection> {
        let removed = self
            .state
            .write()
            .connections
            .remove(&id)
            .ok_or(CoreError::UnknownConnection(id))?;
        tracing::info!(connection_id = %id, provider = %removed.provider, "connection removed");
        Ok(removed)
    }

    /// Unregisters every connection of a guest and returns them.
    pub fn remove_guest(&self, guest_id: GuestId) -> Vec<Connection> {
        let mut state = self.state.write();
        let ids: Vec<ConnectionId> = state
            .connections
            .values()
            .filter(|c| c.guest_id == guest_id)
            .map(|c| c.id)
            .collect();
        let removed: Vec<Connection> = ids
            .iter()
            .filter_map(|id| state.connections.remove(id))
            .collect();
        tracing::info!(guest_id = %guest_id, connections = removed.len(), "guest connections removed");
        removed
    }

    fn update(&self, id: ConnectionId, f: impl FnOnce(&mut Connection)) -> CoreResult<()> {
        let mut state = self.state.write();
        let connection = state
            .connections
            .get_mut(&id)
            .ok_or(CoreError::UnknownConnection(id))?;
        f(connection);
        Ok(())
    }
}
