//! A connection to one wterm server.
//!
//! [`Connection`] owns the transport, the session registry, the
//! file-operation tracker and the event dispatcher. All of its methods take
//! `&mut self` and never block: outbound calls encode and queue a frame,
//! inbound traffic is fed in through [`Connection::handle_transport_event`],
//! and file operations hand back a [`PendingOperation`] future.
//!
//! ```text
//!   caller ──open_shell/send/resize/file ops──▶ WireDialect ──▶ Transport
//!                                                                  │
//!   handlers ◀── Dispatcher ◀── registry/tracker ◀── decode ◀── TransportEvent
//! ```

use std::future::Future;

use futures_util::FutureExt;
use protocol::{
    split_fs_payload, AuthReply, DirEntry, DownloadDescriptor, FsOpKind, FsRequest, FsResult,
    InfoMessage, MessageType, OpStatus, ProtocolError, Result, SessionAck, SessionKind,
    TermSize, UploadReply,
};
use tokio::sync::mpsc;

use crate::dialect::{Dialect, WireDialect};
use crate::dispatcher::{Dispatcher, Event, EventKind, SubscriptionId};
use crate::registry::{AckOutcome, CloseOutcome, SessionId, SessionRecord, SessionRegistry, SessionState};
use crate::tracker::{FileOperationTracker, InFlightPolicy, PendingOperation};
use crate::transport::{Transport, TransportEvent, WebSocketTransport};

/// One transport plus every session multiplexed over it.
pub struct Connection<T: Transport> {
    address: String,
    wire: Box<dyn WireDialect>,
    transport: T,
    registry: SessionRegistry,
    tracker: FileOperationTracker,
    dispatcher: Dispatcher,
    ready: bool,
    closed: bool,
}

impl Connection<WebSocketTransport> {
    /// Opens a WebSocket connection to `address`.
    ///
    /// Returns the connection and the transport's event receiver. The
    /// caller drives the connection by passing every received event to
    /// [`Connection::handle_transport_event`], or by using
    /// [`Connection::drive`].
    pub fn open(
        address: &str,
        dialect: Dialect,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let (transport, events) = WebSocketTransport::connect(address)?;
        Ok((Self::with_transport(address, dialect, transport), events))
    }
}

impl<T: Transport> Connection<T> {
    /// Wraps an already-created transport.
    pub fn with_transport(address: impl Into<String>, dialect: Dialect, transport: T) -> Self {
        let wire = dialect.wire();
        Self {
            address: address.into(),
            registry: SessionRegistry::new(wire.allocation_mode()),
            wire,
            transport,
            tracker: FileOperationTracker::new(InFlightPolicy::default()),
            dispatcher: Dispatcher::new(),
            ready: false,
            closed: false,
        }
    }

    /// Sets the policy for overlapping file operations.
    ///
    /// Intended to be called before any session is opened; switching it
    /// later forgets tracked file-transfer sessions.
    pub fn with_policy(mut self, policy: InFlightPolicy) -> Self {
        self.tracker = FileOperationTracker::new(policy);
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Server address this connection was opened with.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Active dialect.
    pub fn dialect(&self) -> Dialect {
        self.wire.dialect()
    }

    /// Whether the transport has reported that it is connected.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether the connection has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the remote side uses `\` paths.
    pub fn is_windows_path(&self) -> bool {
        self.registry.windows_paths()
    }

    /// Joins a remote directory and an entry name with the remote separator.
    pub fn join_remote_path(&self, dir: &str, name: &str) -> String {
        let sep = if self.is_windows_path() { '\\' } else { '/' };
        if dir.ends_with(sep) {
            format!("{dir}{name}")
        } else {
            format!("{dir}{sep}{name}")
        }
    }

    /// Number of pending or open sessions.
    pub fn live_sessions(&self) -> usize {
        self.registry.live_count()
    }

    /// Snapshot of one session.
    pub fn session(&self, session_id: SessionId) -> Option<&SessionRecord> {
        self.registry.session(session_id)
    }

    /// Last working path reported by `getwd` on a file-transfer session.
    pub fn cwd(&self, session_id: SessionId) -> Option<&str> {
        self.tracker.cwd(session_id)
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Registers an event handler.
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) -> anyhow::Result<()> + Send + 'static,
    {
        self.dispatcher.subscribe(kind, handler)
    }

    /// Removes an event handler.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Requests a new shell session and returns its id.
    ///
    /// The outcome arrives later as [`Event::NewSession`]. Under the goTTYd
    /// dialect the acknowledgment is synthesized immediately, and a second
    /// shell while the first is live fails with `UnsupportedByDialect`.
    pub fn open_shell(&mut self) -> Result<SessionId> {
        self.open_session(SessionKind::Shell)
    }

    /// Requests a new file-transfer session and returns its id.
    pub fn open_file_transfer(&mut self) -> Result<SessionId> {
        self.open_session(SessionKind::FileTransfer)
    }

    /// Opens a file-transfer session tied to a shell.
    ///
    /// Closing the shell later also closes the file-transfer session.
    pub fn open_paired_file_transfer(&mut self, shell_id: SessionId) -> Result<SessionId> {
        match self.registry.session(shell_id) {
            Some(r) if r.kind == SessionKind::Shell && r.state.is_live() => {}
            Some(_) => {
                return Err(ProtocolError::InvalidSessionState {
                    session_id: shell_id,
                    reason: "only a live shell session can own a file-transfer session".to_string(),
                })
            }
            None => return Err(ProtocolError::SessionNotFound { session_id: shell_id }),
        }

        let file_id = self.open_file_transfer()?;
        self.registry.pair(shell_id, file_id)?;
        Ok(file_id)
    }

    fn open_session(&mut self, kind: SessionKind) -> Result<SessionId> {
        self.ensure_open()?;
        if kind == SessionKind::FileTransfer && !self.wire.supports_file_transfer() {
            return Err(self.unsupported("file transfer"));
        }

        let session_id = self.registry.allocate(kind)?;
        if kind == SessionKind::FileTransfer {
            self.tracker.register(session_id);
        }

        match self.wire.new_session(session_id, kind) {
            Some(frame) => {
                tracing::info!(session_id, kind = %kind, "Requesting new session");
                if let Err(e) = self.transport.send(frame) {
                    // The server never heard of this id.
                    self.registry.release(session_id);
                    self.tracker.evict(session_id);
                    tracing::warn!(session_id, error = %e, "Failed to send new_session");
                    return Err(e);
                }
            }
            None => {
                tracing::info!(session_id, kind = %kind, "Opened local session");
                self.dispatcher.publish(&Event::NewSession {
                    session_id,
                    accepted: true,
                });
            }
        }
        Ok(session_id)
    }

    /// Closes a session, and the file-transfer session paired with it.
    ///
    /// Closing an already closed or rejected session is a no-op. When the
    /// last live session closes, the connection tears down.
    pub fn close_session(&mut self, session_id: SessionId) -> Result<()> {
        let CloseOutcome::Closed { paired, mut remaining } =
            self.registry.record_close(session_id)?
        else {
            tracing::debug!(session_id, "Session already closed");
            return Ok(());
        };
        self.finish_close(session_id);

        if let Some(paired_id) = paired {
            if let Ok(CloseOutcome::Closed { remaining: left, .. }) =
                self.registry.record_close(paired_id)
            {
                self.finish_close(paired_id);
                remaining = left;
            }
        }

        if remaining == 0 {
            self.shutdown(None);
        }
        Ok(())
    }

    fn finish_close(&mut self, session_id: SessionId) {
        if let Some(frame) = self.wire.close_session(session_id) {
            if let Err(e) = self.transport.send(frame) {
                tracing::warn!(session_id, error = %e, "Failed to send close_session");
            }
        }
        self.tracker.evict(session_id);
        tracing::info!(session_id, "Session closed");
        self.dispatcher.publish(&Event::SessionClosed { session_id });
    }

    // ------------------------------------------------------------------
    // Shell traffic
    // ------------------------------------------------------------------

    /// Sends terminal input to a shell session.
    pub fn send_terminal_data(&mut self, session_id: SessionId, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.require_open(session_id, SessionKind::Shell)?;
        let frame = self.wire.term_data(session_id, data);
        self.transport.send(frame)
    }

    /// Tells the server the terminal size of a shell session.
    pub fn resize(&mut self, session_id: SessionId, size: TermSize) -> Result<()> {
        self.ensure_open()?;
        self.require_open(session_id, SessionKind::Shell)?;
        let frame = self.wire.resize(session_id, size)?;
        tracing::debug!(session_id, rows = size.rows, cols = size.cols, "Resizing terminal");
        self.transport.send(frame)
    }

    /// Answers an authentication challenge. A no-op under goTTYd.
    pub fn authenticate(&mut self, question: &str, answer: &str, remember: bool) -> Result<()> {
        self.ensure_open()?;
        let reply = AuthReply {
            question: question.to_string(),
            password: answer.to_string(),
            saved: remember,
        };
        match self.wire.auth(&reply)? {
            Some(frame) => self.transport.send(frame),
            None => {
                tracing::debug!(dialect = %self.dialect(), "Dialect has no authentication");
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // File operations
    // ------------------------------------------------------------------

    /// Issues a raw file operation on an open file-transfer session.
    pub fn file_operation(
        &mut self,
        session_id: SessionId,
        kind: FsOpKind,
        args: Vec<String>,
    ) -> Result<PendingOperation> {
        self.ensure_open()?;
        if !self.wire.supports_file_transfer() {
            return Err(self.unsupported("file operations"));
        }
        self.require_open(session_id, SessionKind::FileTransfer)?;

        let frame = self
            .wire
            .fs_operation(session_id, &FsRequest::new(kind, args))?;
        let pending = self.tracker.issue(session_id, kind)?;
        tracing::debug!(session_id, op = %kind, "Issuing file operation");
        if let Err(e) = self.transport.send(frame) {
            self.tracker.cancel(session_id);
            tracing::warn!(session_id, op = %kind, error = %e, "Failed to send file operation");
            return Err(e);
        }
        Ok(pending)
    }

    /// Current working directory of the remote side.
    pub fn getwd(&mut self, session_id: SessionId) -> Result<PendingOperation<String>> {
        Ok(self
            .file_operation(session_id, FsOpKind::Getwd, Vec::new())?
            .typed(|r| match r {
                FsResult::Getwd(path) => Some(path),
                _ => None,
            }))
    }

    /// Lists a directory.
    pub fn readdir(
        &mut self,
        session_id: SessionId,
        path: &str,
    ) -> Result<PendingOperation<Vec<DirEntry>>> {
        Ok(self
            .file_operation(session_id, FsOpKind::Readdir, vec![path.to_string()])?
            .typed(|r| match r {
                FsResult::Readdir(entries) => Some(entries),
                _ => None,
            }))
    }

    /// Creates a directory.
    pub fn mkdir(&mut self, session_id: SessionId, path: &str) -> Result<PendingOperation<OpStatus>> {
        Ok(self
            .file_operation(session_id, FsOpKind::Mkdir, vec![path.to_string()])?
            .typed(|r| match r {
                FsResult::Mkdir(status) => Some(status),
                _ => None,
            }))
    }

    /// Removes a file or directory.
    pub fn remove(&mut self, session_id: SessionId, path: &str) -> Result<PendingOperation<OpStatus>> {
        Ok(self
            .file_operation(session_id, FsOpKind::Remove, vec![path.to_string()])?
            .typed(|r| match r {
                FsResult::Remove(status) => Some(status),
                _ => None,
            }))
    }

    /// Renames a file or directory.
    pub fn rename(
        &mut self,
        session_id: SessionId,
        from: &str,
        to: &str,
    ) -> Result<PendingOperation<OpStatus>> {
        Ok(self
            .file_operation(
                session_id,
                FsOpKind::Rename,
                vec![from.to_string(), to.to_string()],
            )?
            .typed(|r| match r {
                FsResult::Rename(status) => Some(status),
                _ => None,
            }))
    }

    /// Asks the server to prepare a download.
    pub fn download_file(
        &mut self,
        session_id: SessionId,
        path: &str,
    ) -> Result<PendingOperation<DownloadDescriptor>> {
        Ok(self
            .file_operation(session_id, FsOpKind::DownloadFile, vec![path.to_string()])?
            .typed(|r| match r {
                FsResult::DownloadFile(descriptor) => Some(descriptor),
                _ => None,
            }))
    }

    /// Asks the server to accept a batch upload into a directory.
    ///
    /// Resolves once the server is ready.
    pub fn upload_to(&mut self, session_id: SessionId, dir: &str) -> Result<PendingOperation<()>> {
        Ok(self
            .file_operation(
                session_id,
                FsOpKind::UploadFile,
                vec![dir.to_string(), String::new()],
            )?
            .typed(|r| match r {
                FsResult::UploadFile(UploadReply::Ready) => Some(()),
                _ => None,
            }))
    }

    /// Asks the server for a one-shot upload target for `path`.
    ///
    /// Resolves to the server-relative URL path; empty when refused.
    pub fn upload_file(
        &mut self,
        session_id: SessionId,
        path: &str,
    ) -> Result<PendingOperation<String>> {
        Ok(self
            .file_operation(
                session_id,
                FsOpKind::UploadFile,
                vec![path.to_string(), "selected".to_string()],
            )?
            .typed(|r| match r {
                FsResult::UploadFile(UploadReply::Target(url)) => Some(url),
                _ => None,
            }))
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Feeds one transport lifecycle event into the connection.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                if self.ready || self.closed {
                    return;
                }
                self.ready = true;
                tracing::info!(address = %self.address, dialect = %self.dialect(), "Connected");
                self.dispatcher.publish(&Event::Ready);
            }
            TransportEvent::Message(data) => self.handle_inbound(&data),
            TransportEvent::Closed(reason) => self.shutdown(reason),
        }
    }

    /// Decodes one inbound message and publishes the resulting event.
    ///
    /// Malformed or unknown frames are logged and dropped.
    pub fn handle_inbound(&mut self, data: &[u8]) {
        if self.closed {
            tracing::debug!(len = data.len(), "Dropping message received after close");
            return;
        }

        let frame = match self.wire.decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };
        let session_id = frame.session_id;
        let Some(kind) = frame.kind() else {
            tracing::debug!(message_type = frame.message_type, session_id, "Dropping frame with unknown type");
            return;
        };

        let event = match kind {
            MessageType::Auth => Event::Auth {
                session_id,
                question: String::from_utf8_lossy(&frame.payload).into_owned(),
            },
            MessageType::NewSession => {
                self.handle_ack(session_id, SessionAck::from_payload(&frame.payload));
                return;
            }
            MessageType::TermData => Event::TermData {
                session_id,
                data: frame.payload,
            },
            MessageType::FsOperation => {
                let parsed = split_fs_payload(&frame.payload)
                    .and_then(|(op, value)| FsResult::from_value(op, value));
                let result = match parsed {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!(session_id, error = %e, "Dropping malformed file operation result");
                        return;
                    }
                };
                // Subscribers borrow the result; the pending handle then takes it.
                let event = Event::FsOperation { session_id, result };
                self.dispatcher.publish(&event);
                if let Event::FsOperation { result, .. } = event {
                    self.tracker.resolve(session_id, result);
                }
                return;
            }
            MessageType::Info => match serde_json::from_slice::<InfoMessage>(&frame.payload) {
                Ok(info) => Event::Info { session_id, info },
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "Dropping malformed info message");
                    return;
                }
            },
            MessageType::CloseSession | MessageType::Resize => {
                tracing::debug!(message_type = ?kind, session_id, "Dropping outbound-only message type");
                return;
            }
        };

        self.dispatcher.publish(&event);
    }

    fn handle_ack(&mut self, session_id: SessionId, ack: SessionAck) {
        let last_rejected = match self
            .registry
            .record_ack(session_id, ack.accepted, ack.windows_paths)
        {
            AckOutcome::Opened => {
                tracing::info!(session_id, windows_paths = self.is_windows_path(), "Session opened");
                false
            }
            AckOutcome::Rejected {
                unpaired_from,
                remaining,
            } => {
                self.tracker.evict(session_id);
                tracing::warn!(session_id, unpaired_from = ?unpaired_from, remaining, "Session rejected by server");
                remaining == 0
            }
            AckOutcome::Ignored => return,
        };

        self.dispatcher.publish(&Event::NewSession {
            session_id,
            accepted: ack.accepted,
        });

        if last_rejected {
            self.shutdown(Some("server rejected the last live session".to_string()));
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Closes the transport and every session. Runs once.
    pub fn teardown(&mut self) {
        self.shutdown(None);
    }

    fn shutdown(&mut self, reason: Option<String>) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transport.close();

        for session_id in self.registry.close_all() {
            self.dispatcher.publish(&Event::SessionClosed { session_id });
        }
        let abandoned = self.tracker.abandon_all();

        tracing::info!(address = %self.address, reason = ?reason, abandoned, "Connection closed");
        self.dispatcher.publish(&Event::Closed { reason });
    }

    /// Pumps transport events into the connection until `fut` completes.
    ///
    /// Returns `None` if the event channel ends and `fut` still cannot
    /// complete.
    pub async fn drive<F>(
        &mut self,
        events: &mut mpsc::Receiver<TransportEvent>,
        fut: F,
    ) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;
                output = &mut fut => return Some(output),
                event = events.recv() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => {
                        self.shutdown(Some("transport event channel closed".to_string()));
                        return fut.as_mut().now_or_never();
                    }
                },
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ProtocolError::TransportClosed(format!(
                "connection to {} is closed",
                self.address
            )));
        }
        Ok(())
    }

    fn require_open(&self, session_id: SessionId, kind: SessionKind) -> Result<()> {
        let record = self
            .registry
            .session(session_id)
            .ok_or(ProtocolError::SessionNotFound { session_id })?;
        if record.kind != kind {
            return Err(ProtocolError::InvalidSessionState {
                session_id,
                reason: format!("expected a {kind} session, found {}", record.kind),
            });
        }
        if record.state != SessionState::Open {
            return Err(ProtocolError::InvalidSessionState {
                session_id,
                reason: format!("session is {:?}", record.state).to_lowercase(),
            });
        }
        Ok(())
    }

    fn unsupported(&self, operation: &'static str) -> ProtocolError {
        ProtocolError::UnsupportedByDialect {
            operation,
            dialect: self.dialect().name(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("dialect", &self.dialect())
            .field("live_sessions", &self.registry.live_count())
            .field("ready", &self.ready)
            .field("closed", &self.closed)
            .finish()
    }
}
