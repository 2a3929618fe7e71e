//! Event dispatcher.
//!
//! Inbound traffic and connection lifecycle changes are turned into typed
//! [`Event`]s and fanned out synchronously to subscribed handlers, in the
//! order the handlers were registered. Delivery happens on the caller's
//! stack: there is no queue, so event order equals wire order.

use std::collections::HashMap;

use bytes::Bytes;
use protocol::{FsResult, InfoMessage};

use crate::registry::SessionId;

/// Events published by a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The transport finished connecting.
    Ready,
    /// The server asks a question (usually a password).
    Auth {
        /// Session the challenge arrived on.
        session_id: SessionId,
        /// Challenge text.
        question: String,
    },
    /// A session open request was answered.
    NewSession {
        /// Session that was opened or rejected.
        session_id: SessionId,
        /// Whether the server accepted.
        accepted: bool,
    },
    /// Terminal output for a shell session.
    TermData {
        /// Shell session.
        session_id: SessionId,
        /// Raw bytes.
        data: Bytes,
    },
    /// A file operation result arrived.
    FsOperation {
        /// File-transfer session.
        session_id: SessionId,
        /// Parsed result.
        result: FsResult,
    },
    /// Free-form status from the server.
    Info {
        /// Session the message arrived on.
        session_id: SessionId,
        /// Message body.
        info: InfoMessage,
    },
    /// A session was closed locally or by transport loss.
    SessionClosed {
        /// Closed session.
        session_id: SessionId,
    },
    /// The connection is gone. Published exactly once.
    Closed {
        /// Reason reported by the transport, if any.
        reason: Option<String>,
    },
}

/// Fieldless discriminant of [`Event`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::Ready`].
    Ready,
    /// [`Event::Auth`].
    Auth,
    /// [`Event::NewSession`].
    NewSession,
    /// [`Event::TermData`].
    TermData,
    /// [`Event::FsOperation`].
    FsOperation,
    /// [`Event::Info`].
    Info,
    /// [`Event::SessionClosed`].
    SessionClosed,
    /// [`Event::Closed`].
    Closed,
}

impl Event {
    /// Returns the event's kind.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Ready => EventKind::Ready,
            Event::Auth { .. } => EventKind::Auth,
            Event::NewSession { .. } => EventKind::NewSession,
            Event::TermData { .. } => EventKind::TermData,
            Event::FsOperation { .. } => EventKind::FsOperation,
            Event::Info { .. } => EventKind::Info,
            Event::SessionClosed { .. } => EventKind::SessionClosed,
            Event::Closed { .. } => EventKind::Closed,
        }
    }

    /// Returns the session the event belongs to, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Event::Auth { session_id, .. }
            | Event::NewSession { session_id, .. }
            | Event::TermData { session_id, .. }
            | Event::FsOperation { session_id, .. }
            | Event::Info { session_id, .. }
            | Event::SessionClosed { session_id } => Some(*session_id),
            Event::Ready | Event::Closed { .. } => None,
        }
    }
}

/// Handle returned by [`Dispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Event handler. Errors are logged and do not stop delivery.
pub type Handler = Box<dyn FnMut(&Event) -> anyhow::Result<()> + Send>;

/// Synchronous publish/subscribe over [`EventKind`].
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Vec<(SubscriptionId, Handler)>>,
    next_id: u64,
}

impl Dispatcher {
    /// Creates a dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one event kind.
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) -> anyhow::Result<()> + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Removes a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for handlers in self.handlers.values_mut() {
            if let Some(pos) = handlers.iter().position(|(sub, _)| *sub == id) {
                drop(handlers.remove(pos));
                return true;
            }
        }
        false
    }

    /// Delivers an event to every handler of its kind.
    ///
    /// Returns how many handlers ran successfully.
    pub fn publish(&mut self, event: &Event) -> usize {
        let Some(handlers) = self.handlers.get_mut(&event.kind()) else {
            tracing::trace!(kind = ?event.kind(), "No subscribers for event");
            return 0;
        };

        let mut delivered = 0;
        for (id, handler) in handlers.iter_mut() {
            match handler(event) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(subscription = id.0, kind = ?event.kind(), error = %e, "Event handler failed");
                }
            }
        }
        delivered
    }

    /// Number of handlers registered for a kind.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<EventKind, usize> = self
            .handlers
            .iter()
            .map(|(kind, handlers)| (*kind, handlers.len()))
            .collect();
        f.debug_struct("Dispatcher")
            .field("handlers", &counts)
            .finish()
    }
}
