//! Explicitly owned set of live connections.
//!
//! The manager maps profile ids to connections. It is a plain value held by
//! whoever runs the UI or CLI loop; there is no process-wide registry.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::profile::SessionProfile;
use crate::tracker::InFlightPolicy;
use crate::transport::{Transport, TransportEvent, WebSocketTransport};

/// Connections keyed by profile id.
#[derive(Debug)]
pub struct ConnectionManager<T: Transport> {
    connections: HashMap<u64, Connection<T>>,
}

impl<T: Transport> Default for ConnectionManager<T> {
    fn default() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a connection, returning the one it replaced.
    ///
    /// A replaced connection is torn down before it is returned.
    pub fn insert(&mut self, profile_id: u64, connection: Connection<T>) -> Option<Connection<T>> {
        let mut previous = self.connections.insert(profile_id, connection)?;
        tracing::debug!(profile_id, "Replacing existing connection");
        previous.teardown();
        Some(previous)
    }

    /// Returns the connection for a profile.
    pub fn get(&self, profile_id: u64) -> Option<&Connection<T>> {
        self.connections.get(&profile_id)
    }

    /// Returns the connection for a profile, mutably.
    pub fn get_mut(&mut self, profile_id: u64) -> Option<&mut Connection<T>> {
        self.connections.get_mut(&profile_id)
    }

    /// Removes a connection without tearing it down.
    pub fn remove(&mut self, profile_id: u64) -> Option<Connection<T>> {
        self.connections.remove(&profile_id)
    }

    /// Whether a connection exists for the profile.
    pub fn contains(&self, profile_id: u64) -> bool {
        self.connections.contains_key(&profile_id)
    }

    /// Number of stored connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are stored.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Routes a transport event to the profile's connection.
    ///
    /// Returns `false` if no connection exists for the profile.
    pub fn handle_transport_event(&mut self, profile_id: u64, event: TransportEvent) -> bool {
        match self.connections.get_mut(&profile_id) {
            Some(connection) => {
                connection.handle_transport_event(event);
                true
            }
            None => {
                tracing::debug!(profile_id, "Transport event for unknown connection");
                false
            }
        }
    }

    /// Drops every connection that has closed. Returns their profile ids.
    pub fn reap_closed(&mut self) -> Vec<u64> {
        let closed: Vec<u64> = self
            .connections
            .iter()
            .filter(|(_, c)| c.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for id in &closed {
            self.connections.remove(id);
            tracing::debug!(profile_id = id, "Reaped closed connection");
        }
        closed
    }

    /// Tears down every connection and empties the manager.
    pub fn close_all(&mut self) {
        for (_, mut connection) in self.connections.drain() {
            connection.teardown();
        }
    }
}

impl ConnectionManager<WebSocketTransport> {
    /// Opens a connection for a profile and stores it under the profile id.
    ///
    /// Returns the transport event receiver for the new connection.
    pub fn connect_profile(
        &mut self,
        profile: &SessionProfile,
        policy: InFlightPolicy,
    ) -> protocol::Result<mpsc::Receiver<TransportEvent>> {
        let (connection, events) = Connection::open(&profile.url, profile.protocol)?;
        tracing::info!(profile_id = profile.id, name = %profile.name, url = %profile.url, "Opening profile");
        self.insert(profile.id, connection.with_policy(policy));
        Ok(events)
    }
}
