//! Session registry for one connection.
//!
//! The registry hands out session identifiers, tracks each session's kind
//! and state, and counts live sessions so the connection knows when to
//! release its transport. Callers outside the connection only ever see the
//! integer id and read-only [`SessionRecord`] snapshots.

use std::collections::BTreeMap;

use protocol::{ProtocolError, Result, SessionKind};

/// Identifier of a logical session within one connection.
pub type SessionId = u16;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Open request sent, no acknowledgment yet.
    Pending,
    /// Acknowledged and accepted.
    Open,
    /// Acknowledged and denied. Terminal.
    Rejected,
    /// Closed locally or by transport loss. Terminal.
    Closed,
}

impl SessionState {
    /// Whether the session counts toward the connection's live total.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Pending | SessionState::Open)
    }
}

/// How identifiers are allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMode {
    /// Monotonic counter, sessions start `Pending`.
    Multiplexed,
    /// Always id 0, at most one live session, opens immediately.
    SingleSession,
}

/// Snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Session identifier.
    pub id: SessionId,
    /// Session kind.
    pub kind: SessionKind,
    /// Current state.
    pub state: SessionState,
    /// File-transfer session paired with this shell, if any.
    pub paired: Option<SessionId>,
}

/// Result of recording a `new_session` acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The session moved `Pending -> Open`.
    Opened,
    /// The session moved `Pending -> Rejected`.
    Rejected {
        /// Shell whose pairing to this session was evicted.
        unpaired_from: Option<SessionId>,
        /// Live sessions left afterwards.
        remaining: usize,
    },
    /// Unknown session or not pending; nothing changed.
    Ignored,
}

/// Result of closing a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The session was live and is now closed.
    Closed {
        /// File-transfer session paired with the closed shell.
        paired: Option<SessionId>,
        /// Live sessions left afterwards.
        remaining: usize,
    },
    /// The session was already rejected or closed.
    AlreadyClosed,
}

/// Tracks session identity, kind, state and liveness for one connection.
#[derive(Debug)]
pub struct SessionRegistry {
    mode: AllocationMode,
    /// Next identifier to hand out (u32 so exhaustion is detectable).
    next_id: u32,
    sessions: BTreeMap<SessionId, SessionRecord>,
    live: usize,
    /// Path style fixed by the first accepted acknowledgment.
    windows_paths: Option<bool>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(mode: AllocationMode) -> Self {
        Self {
            mode,
            next_id: 0,
            sessions: BTreeMap::new(),
            live: 0,
            windows_paths: None,
        }
    }

    /// Returns the allocation mode.
    pub fn mode(&self) -> AllocationMode {
        self.mode
    }

    /// Allocates a new session of the given kind.
    ///
    /// In multiplexed mode the id comes from a monotonic counter and the
    /// session starts `Pending`. In single-session mode the id is always 0,
    /// the session starts `Open`, and a second allocation while one is live
    /// is rejected.
    pub fn allocate(&mut self, kind: SessionKind) -> Result<SessionId> {
        let (id, state) = match self.mode {
            AllocationMode::Multiplexed => {
                let id =
                    SessionId::try_from(self.next_id).map_err(|_| ProtocolError::SessionIdsExhausted)?;
                self.next_id += 1;
                (id, SessionState::Pending)
            }
            AllocationMode::SingleSession => {
                if self.live > 0 {
                    return Err(ProtocolError::UnsupportedByDialect {
                        operation: "a second concurrent session",
                        dialect: "goTTYd",
                    });
                }
                (0, SessionState::Open)
            }
        };

        self.sessions.insert(
            id,
            SessionRecord {
                id,
                kind,
                state,
                paired: None,
            },
        );
        self.live += 1;
        tracing::debug!(session_id = id, kind = %kind, state = ?state, "Allocated session");
        Ok(id)
    }

    /// Records the server's answer to a `new_session` request.
    pub fn record_ack(&mut self, id: SessionId, accepted: bool, windows_paths: bool) -> AckOutcome {
        let Some(record) = self.sessions.get_mut(&id) else {
            tracing::warn!(session_id = id, "Acknowledgment for unknown session");
            return AckOutcome::Ignored;
        };
        if record.state != SessionState::Pending {
            tracing::warn!(session_id = id, state = ?record.state, "Acknowledgment for session that is not pending");
            return AckOutcome::Ignored;
        }

        if accepted {
            record.state = SessionState::Open;
            if self.windows_paths.is_none() {
                self.windows_paths = Some(windows_paths);
            }
            return AckOutcome::Opened;
        }

        record.state = SessionState::Rejected;
        self.live -= 1;

        let unpaired_from = self
            .sessions
            .values_mut()
            .find(|r| r.paired == Some(id))
            .map(|owner| {
                owner.paired = None;
                owner.id
            });

        AckOutcome::Rejected {
            unpaired_from,
            remaining: self.live,
        }
    }

    /// Closes a session. Closing a rejected or closed session is a no-op.
    pub fn record_close(&mut self, id: SessionId) -> Result<CloseOutcome> {
        let record = self
            .sessions
            .get_mut(&id)
            .ok_or(ProtocolError::SessionNotFound { session_id: id })?;

        if !record.state.is_live() {
            return Ok(CloseOutcome::AlreadyClosed);
        }

        record.state = SessionState::Closed;
        let paired = record.paired.take();
        self.live -= 1;

        // A closed file-transfer session can no longer be anyone's pair.
        for owner in self.sessions.values_mut() {
            if owner.paired == Some(id) {
                owner.paired = None;
            }
        }

        Ok(CloseOutcome::Closed {
            paired,
            remaining: self.live,
        })
    }

    /// Forgets a session whose open request never reached the server.
    ///
    /// The id is not handed out again. Returns `false` for unknown ids.
    pub fn release(&mut self, id: SessionId) -> bool {
        let Some(record) = self.sessions.remove(&id) else {
            return false;
        };
        if record.state.is_live() {
            self.live -= 1;
        }
        for owner in self.sessions.values_mut() {
            if owner.paired == Some(id) {
                owner.paired = None;
            }
        }
        tracing::debug!(session_id = id, "Released session");
        true
    }

    /// Links a file-transfer session to a shell session.
    pub fn pair(&mut self, shell: SessionId, file_transfer: SessionId) -> Result<()> {
        match self.sessions.get(&file_transfer) {
            Some(r) if r.kind == SessionKind::FileTransfer && r.state.is_live() => {}
            Some(_) => {
                return Err(ProtocolError::InvalidSessionState {
                    session_id: file_transfer,
                    reason: "pairing requires a live file-transfer session".to_string(),
                })
            }
            None => {
                return Err(ProtocolError::SessionNotFound {
                    session_id: file_transfer,
                })
            }
        }

        let owner = self
            .sessions
            .get_mut(&shell)
            .ok_or(ProtocolError::SessionNotFound { session_id: shell })?;
        if owner.kind != SessionKind::Shell || !owner.state.is_live() {
            return Err(ProtocolError::InvalidSessionState {
                session_id: shell,
                reason: "pairing requires a live shell session".to_string(),
            });
        }
        owner.paired = Some(file_transfer);
        Ok(())
    }

    /// Force-closes every live session. Returns the ids that were live.
    pub fn close_all(&mut self) -> Vec<SessionId> {
        let mut closed = Vec::new();
        for record in self.sessions.values_mut() {
            if record.state.is_live() {
                record.state = SessionState::Closed;
                record.paired = None;
                closed.push(record.id);
            }
        }
        self.live = 0;
        closed
    }

    /// Whether the session is pending or open.
    pub fn is_live(&self, id: SessionId) -> bool {
        self.sessions
            .get(&id)
            .is_some_and(|r| r.state.is_live())
    }

    /// Returns a snapshot of the session.
    pub fn session(&self, id: SessionId) -> Option<&SessionRecord> {
        self.sessions.get(&id)
    }

    /// Returns the state of the session.
    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.get(&id).map(|r| r.state)
    }

    /// Number of pending or open sessions.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Whether the remote side uses backslash paths.
    ///
    /// Decided by the first accepted acknowledgment; `false` until then.
    pub fn windows_paths(&self) -> bool {
        self.windows_paths.unwrap_or(false)
    }

    /// Iterates over all sessions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &SessionRecord> {
        self.sessions.values()
    }
}
