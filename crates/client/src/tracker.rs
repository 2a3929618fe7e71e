//! File-operation request tracking.
//!
//! Each file-transfer session has at most one outstanding operation. The
//! response frame carries no correlation id, so an inbound result is matched
//! to the pending request by `(session id, operation kind)` alone.
//!
//! Issuing returns a [`PendingOperation`], a future that resolves once the
//! matching result frame arrives. If the request is superseded, its session
//! closes, or the connection goes away, the future resolves to
//! [`ProtocolError::OperationAbandoned`] instead of hanging.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use protocol::{FsOpKind, FsResult, ProtocolError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::registry::SessionId;

/// What to do when an operation is issued while another is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InFlightPolicy {
    /// Replace the outstanding operation; its handle is abandoned.
    #[default]
    Overwrite,
    /// Refuse the new operation with `OperationInFlight`.
    Reject,
}

struct Pending {
    kind: FsOpKind,
    tx: oneshot::Sender<FsResult>,
}

#[derive(Default)]
struct FileHandle {
    pending: Option<Pending>,
    cwd: Option<String>,
}

/// Per-session outstanding file operation, plus the cached working path.
pub struct FileOperationTracker {
    policy: InFlightPolicy,
    handles: HashMap<SessionId, FileHandle>,
}

impl FileOperationTracker {
    /// Creates an empty tracker.
    pub fn new(policy: InFlightPolicy) -> Self {
        Self {
            policy,
            handles: HashMap::new(),
        }
    }

    /// Returns the in-flight policy.
    pub fn policy(&self) -> InFlightPolicy {
        self.policy
    }

    /// Starts tracking a file-transfer session.
    pub fn register(&mut self, session_id: SessionId) {
        self.handles.entry(session_id).or_default();
    }

    /// Stops tracking a session. Any outstanding handle is abandoned.
    pub fn evict(&mut self, session_id: SessionId) -> bool {
        match self.handles.remove(&session_id) {
            Some(handle) => {
                if let Some(pending) = handle.pending {
                    tracing::debug!(session_id, kind = %pending.kind, "Abandoning file operation");
                }
                true
            }
            None => false,
        }
    }

    /// Whether the session is tracked.
    pub fn contains(&self, session_id: SessionId) -> bool {
        self.handles.contains_key(&session_id)
    }

    /// Records a new outstanding operation and returns its completion handle.
    pub fn issue(&mut self, session_id: SessionId, kind: FsOpKind) -> Result<PendingOperation> {
        let policy = self.policy;
        let handle = self
            .handles
            .get_mut(&session_id)
            .ok_or(ProtocolError::SessionNotFound { session_id })?;

        if let Some(previous) = &handle.pending {
            // A handle the caller already dropped does not block anything.
            if !previous.tx.is_closed() {
                match policy {
                    InFlightPolicy::Reject => {
                        return Err(ProtocolError::OperationInFlight { session_id });
                    }
                    InFlightPolicy::Overwrite => {
                        tracing::warn!(
                            session_id,
                            previous = %previous.kind,
                            next = %kind,
                            "Overwriting outstanding file operation"
                        );
                    }
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        handle.pending = Some(Pending { kind, tx });
        Ok(PendingOperation {
            session_id,
            kind,
            rx,
            extract: Some,
        })
    }

    /// Drops the outstanding operation without resolving it.
    ///
    /// Used when the request frame could not be sent. Returns `false` if
    /// nothing was pending.
    pub fn cancel(&mut self, session_id: SessionId) -> bool {
        self.handles
            .get_mut(&session_id)
            .and_then(|h| h.pending.take())
            .is_some()
    }

    /// Delivers an inbound result to the matching outstanding operation.
    ///
    /// Returns `true` if a pending handle of the same kind was resolved.
    pub fn resolve(&mut self, session_id: SessionId, result: FsResult) -> bool {
        let Some(handle) = self.handles.get_mut(&session_id) else {
            tracing::debug!(session_id, kind = %result.kind(), "File result for untracked session");
            return false;
        };

        let kind = result.kind();
        match &handle.pending {
            Some(pending) if pending.kind == kind => {}
            Some(pending) => {
                tracing::debug!(session_id, pending = %pending.kind, received = %kind, "File result does not match pending operation");
                return false;
            }
            None => {
                tracing::debug!(session_id, kind = %kind, "File result with nothing pending");
                return false;
            }
        }

        if let FsResult::Getwd(path) = &result {
            handle.cwd = Some(path.clone());
        }

        let Some(pending) = handle.pending.take() else {
            return false;
        };
        if pending.tx.send(result).is_err() {
            tracing::debug!(session_id, kind = %kind, "File operation handle was dropped before completion");
        }
        true
    }

    /// Whether the session has an outstanding operation.
    pub fn is_pending(&self, session_id: SessionId) -> bool {
        self.handles
            .get(&session_id)
            .is_some_and(|h| h.pending.is_some())
    }

    /// Kind of the outstanding operation, if any.
    pub fn pending_kind(&self, session_id: SessionId) -> Option<FsOpKind> {
        self.handles
            .get(&session_id)
            .and_then(|h| h.pending.as_ref().map(|p| p.kind))
    }

    /// Last working path reported by `getwd` for the session.
    pub fn cwd(&self, session_id: SessionId) -> Option<&str> {
        self.handles
            .get(&session_id)
            .and_then(|h| h.cwd.as_deref())
    }

    /// Overrides the cached working path, e.g. after a local `cd`.
    pub fn set_cwd(&mut self, session_id: SessionId, path: impl Into<String>) {
        if let Some(handle) = self.handles.get_mut(&session_id) {
            handle.cwd = Some(path.into());
        }
    }

    /// Abandons every outstanding operation and forgets all sessions.
    pub fn abandon_all(&mut self) -> usize {
        let abandoned = self
            .handles
            .values()
            .filter(|h| h.pending.is_some())
            .count();
        self.handles.clear();
        abandoned
    }
}

impl std::fmt::Debug for FileOperationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileOperationTracker")
            .field("policy", &self.policy)
            .field("sessions", &self.handles.len())
            .finish()
    }
}

/// Completion handle for one file operation.
///
/// `T` is the typed result; the default is the raw [`FsResult`].
#[must_use = "a file operation does nothing useful unless its result is awaited"]
pub struct PendingOperation<T = FsResult> {
    session_id: SessionId,
    kind: FsOpKind,
    rx: oneshot::Receiver<FsResult>,
    extract: fn(FsResult) -> Option<T>,
}

impl<T> PendingOperation<T> {
    /// Session the operation was issued on.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Operation kind.
    pub fn kind(&self) -> FsOpKind {
        self.kind
    }
}

impl PendingOperation<FsResult> {
    /// Narrows the result to one variant's payload.
    pub fn typed<U>(self, extract: fn(FsResult) -> Option<U>) -> PendingOperation<U> {
        PendingOperation {
            session_id: self.session_id,
            kind: self.kind,
            rx: self.rx,
            extract,
        }
    }
}

impl<T> Future for PendingOperation<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let session_id = self.session_id;
        let kind = self.kind;
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready((self.extract)(result).ok_or_else(|| {
                ProtocolError::Deserialization(format!("unexpected result type for {kind}"))
            })),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ProtocolError::OperationAbandoned { session_id })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for PendingOperation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("session_id", &self.session_id)
            .field("kind", &self.kind)
            .finish()
    }
}
