//! Integration tests for connection flows.
//!
//! These tests drive a [`Connection`] over an in-memory transport and verify:
//! - Session id allocation and lifecycle
//! - The goTTYd single-session rules
//! - File operation correlation and the overwrite policy
//! - Teardown semantics

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use client::{
    Connection, Dialect, Event, EventKind, InFlightPolicy, SessionState, Transport,
    TransportEvent,
};
use protocol::{
    framing, DirEntry, Frame, FsOpKind, FsResult, MessageType, OpStatus, ProtocolError, TermSize,
    UploadReply,
};
use serde_json::{json, Value};

// =============================================================================
// Test harness
// =============================================================================

/// Transport that records everything sent and counts close calls.
#[derive(Clone, Default)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<Bytes>>>,
    closes: Arc<Mutex<usize>>,
}

impl RecordingTransport {
    fn frames(&self) -> Vec<Frame> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|b| framing::decode(b).unwrap())
            .collect()
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn close_count(&self) -> usize {
        *self.closes.lock().unwrap()
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, data: Bytes) -> protocol::Result<()> {
        self.sent.lock().unwrap().push(data);
        Ok(())
    }

    fn close(&mut self) {
        *self.closes.lock().unwrap() += 1;
    }
}

/// Transport whose sends fail once `broken` is set.
#[derive(Clone, Default)]
struct FlakyTransport {
    broken: Arc<Mutex<bool>>,
    sent: Arc<Mutex<usize>>,
}

impl FlakyTransport {
    fn break_now(&self) {
        *self.broken.lock().unwrap() = true;
    }
}

impl Transport for FlakyTransport {
    fn send(&mut self, _data: Bytes) -> protocol::Result<()> {
        if *self.broken.lock().unwrap() {
            return Err(ProtocolError::TransportClosed(
                "socket task has stopped".to_string(),
            ));
        }
        *self.sent.lock().unwrap() += 1;
        Ok(())
    }

    fn close(&mut self) {}
}

fn standard() -> (Connection<RecordingTransport>, RecordingTransport) {
    let transport = RecordingTransport::default();
    let conn = Connection::with_transport(
        "ws://localhost:32300/ws",
        Dialect::FullMultiplex,
        transport.clone(),
    );
    (conn, transport)
}

fn legacy() -> (Connection<RecordingTransport>, RecordingTransport) {
    let transport = RecordingTransport::default();
    let conn = Connection::with_transport(
        "ws://localhost:8080/ws",
        Dialect::SingleSessionLegacy,
        transport.clone(),
    );
    (conn, transport)
}

/// Records every event published by the connection.
fn record_events(conn: &mut Connection<RecordingTransport>) -> Arc<Mutex<Vec<Event>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        EventKind::Ready,
        EventKind::Auth,
        EventKind::NewSession,
        EventKind::TermData,
        EventKind::FsOperation,
        EventKind::Info,
        EventKind::SessionClosed,
        EventKind::Closed,
    ] {
        let log = log.clone();
        conn.subscribe(kind, move |event: &Event| {
            log.lock().unwrap().push(event.clone());
            Ok(())
        });
    }
    log
}

fn inbound(message_type: MessageType, session_id: u16, payload: &[u8]) -> TransportEvent {
    TransportEvent::Message(framing::encode(message_type, session_id, payload))
}

fn ack(session_id: u16, accepted: bool, windows: bool) -> TransportEvent {
    inbound(
        MessageType::NewSession,
        session_id,
        &[accepted as u8, windows as u8],
    )
}

fn fs_reply(session_id: u16, kind: FsOpKind, body: Value) -> TransportEvent {
    let mut payload = vec![kind.code()];
    payload.extend_from_slice(&serde_json::to_vec(&body).unwrap());
    inbound(MessageType::FsOperation, session_id, &payload)
}

fn open_files(conn: &mut Connection<RecordingTransport>) -> u16 {
    let id = conn.open_file_transfer().unwrap();
    conn.handle_transport_event(ack(id, true, false));
    id
}

// =============================================================================
// Session ids
// =============================================================================

#[test]
fn test_session_ids_are_monotonic_across_kinds() {
    let (mut conn, transport) = standard();

    assert_eq!(conn.open_shell().unwrap(), 0);
    assert_eq!(conn.open_file_transfer().unwrap(), 1);
    assert_eq!(conn.open_shell().unwrap(), 2);

    let frames = transport.frames();
    assert_eq!(frames.len(), 3);
    for (expected_id, frame) in frames.iter().enumerate() {
        assert_eq!(frame.kind(), Some(MessageType::NewSession));
        assert_eq!(frame.session_id as usize, expected_id);
    }
    assert_eq!(&frames[0].payload[..], &[0, 0]);
    assert_eq!(&frames[1].payload[..], &[1, 0]);
}

#[test]
fn test_accepted_ack_opens_shell_with_posix_paths() {
    let (mut conn, _transport) = standard();
    let events = record_events(&mut conn);

    assert_eq!(conn.open_shell().unwrap(), 0);
    assert_eq!(conn.session(0).unwrap().state, SessionState::Pending);

    conn.handle_transport_event(ack(0, true, false));

    assert_eq!(conn.session(0).unwrap().state, SessionState::Open);
    assert!(!conn.is_windows_path());
    assert_eq!(
        *events.lock().unwrap(),
        vec![Event::NewSession {
            session_id: 0,
            accepted: true
        }]
    );
}

#[test]
fn test_first_ack_fixes_windows_paths() {
    let (mut conn, _transport) = standard();
    conn.open_shell().unwrap();
    conn.open_shell().unwrap();

    conn.handle_transport_event(ack(0, true, true));
    conn.handle_transport_event(ack(1, true, false));
    assert!(conn.is_windows_path());
}

// =============================================================================
// Rejection
// =============================================================================

#[test]
fn test_rejected_session_never_opens() {
    let (mut conn, transport) = standard();
    let events = record_events(&mut conn);

    let keep = conn.open_shell().unwrap();
    let id = conn.open_shell().unwrap();
    conn.handle_transport_event(ack(id, false, false));
    assert_eq!(conn.session(id).unwrap().state, SessionState::Rejected);

    // A late positive acknowledgment is ignored.
    conn.handle_transport_event(ack(id, true, false));
    assert_eq!(conn.session(id).unwrap().state, SessionState::Rejected);
    assert_eq!(
        *events.lock().unwrap(),
        vec![Event::NewSession {
            session_id: id,
            accepted: false
        }]
    );

    assert!(matches!(
        conn.send_terminal_data(id, b"ls\r"),
        Err(ProtocolError::InvalidSessionState { .. })
    ));
    // The other session is still pending, so the connection stays up.
    assert_eq!(conn.live_sessions(), 1);
    assert!(conn.session(keep).unwrap().state.is_live());
    assert!(!conn.is_closed());
    assert_eq!(transport.sent_count(), 2);
    assert_eq!(transport.close_count(), 0);
}

#[test]
fn test_rejecting_last_live_session_tears_down() {
    let (mut conn, transport) = standard();
    let events = record_events(&mut conn);

    let id = conn.open_shell().unwrap();
    conn.handle_transport_event(ack(id, false, false));

    assert_eq!(conn.live_sessions(), 0);
    assert!(conn.is_closed());
    assert_eq!(transport.close_count(), 1);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        Event::NewSession {
            session_id: id,
            accepted: false
        }
    );
    assert_eq!(events[1].kind(), EventKind::Closed);
    drop(events);

    // Closing the rejected session afterwards changes nothing.
    conn.close_session(id).unwrap();
    conn.handle_transport_event(TransportEvent::Closed(None));
    assert_eq!(transport.close_count(), 1);
}

#[test]
fn test_rejected_file_transfer_is_unpaired_and_evicted() {
    let (mut conn, _transport) = standard();

    let shell = conn.open_shell().unwrap();
    conn.handle_transport_event(ack(shell, true, false));
    let files = conn.open_paired_file_transfer(shell).unwrap();
    assert_eq!(conn.session(shell).unwrap().paired, Some(files));

    conn.handle_transport_event(ack(files, false, false));

    assert_eq!(conn.session(shell).unwrap().paired, None);
    assert!(matches!(
        conn.getwd(files),
        Err(ProtocolError::InvalidSessionState { .. })
    ));
    assert_eq!(conn.live_sessions(), 1);
}

// =============================================================================
// Shell traffic
// =============================================================================

#[test]
fn test_terminal_data_and_resize_frames() {
    let (mut conn, transport) = standard();
    let id = conn.open_shell().unwrap();
    conn.handle_transport_event(ack(id, true, false));

    conn.send_terminal_data(id, b"echo hi\r").unwrap();
    conn.resize(id, TermSize::new(24, 80)).unwrap();

    let frames = transport.frames();
    assert_eq!(frames[1].kind(), Some(MessageType::TermData));
    assert_eq!(&frames[1].payload[..], b"echo hi\r");
    assert_eq!(frames[2].kind(), Some(MessageType::Resize));
    assert_eq!(
        serde_json::from_slice::<Value>(&frames[2].payload).unwrap(),
        json!({"rows": 24, "cols": 80})
    );
}

#[test]
fn test_inbound_events_are_routed() {
    let (mut conn, _transport) = standard();
    let events = record_events(&mut conn);

    conn.handle_transport_event(TransportEvent::Opened);
    conn.handle_transport_event(TransportEvent::Opened);
    conn.handle_transport_event(inbound(MessageType::Auth, 0, b"password"));
    conn.handle_transport_event(inbound(MessageType::TermData, 3, b"$ "));
    conn.handle_transport_event(inbound(
        MessageType::Info,
        0,
        br#"{"type":"ERROR","info":"bad password"}"#,
    ));

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], Event::Ready);
    assert_eq!(
        events[1],
        Event::Auth {
            session_id: 0,
            question: "password".to_string()
        }
    );
    assert_eq!(
        events[2],
        Event::TermData {
            session_id: 3,
            data: Bytes::from_static(b"$ ")
        }
    );
    assert!(matches!(&events[3], Event::Info { info, .. } if info.message == "bad password"));
    assert!(conn.is_ready());
}

#[test]
fn test_malformed_and_unknown_frames_are_dropped() {
    let (mut conn, transport) = standard();
    let events = record_events(&mut conn);

    conn.handle_transport_event(TransportEvent::Message(Bytes::from_static(&[3, 0])));
    conn.handle_transport_event(inbound(MessageType::Resize, 0, b"{}"));
    conn.handle_transport_event(TransportEvent::Message(framing::encode(0x0777u16, 0, b"?")));
    conn.handle_transport_event(inbound(MessageType::Info, 0, b"not json"));
    conn.handle_transport_event(inbound(MessageType::FsOperation, 0, &[9, b'1']));

    assert!(events.lock().unwrap().is_empty());
    assert!(!conn.is_closed());
    assert_eq!(transport.close_count(), 0);
}

#[test]
fn test_authenticate_sends_json_answer() {
    let (mut conn, transport) = standard();
    conn.authenticate("password", "hunter2", true).unwrap();

    let frames = transport.frames();
    assert_eq!(frames[0].kind(), Some(MessageType::Auth));
    assert_eq!(frames[0].session_id, 0);
    assert_eq!(
        serde_json::from_slice::<Value>(&frames[0].payload).unwrap(),
        json!({"question": "password", "password": "hunter2", "saved": true})
    );
}

// =============================================================================
// goTTYd dialect
// =============================================================================

#[test]
fn test_legacy_single_session() {
    let (mut conn, transport) = legacy();
    let events = record_events(&mut conn);

    assert_eq!(conn.open_shell().unwrap(), 0);
    assert_eq!(conn.session(0).unwrap().state, SessionState::Open);
    assert_eq!(
        *events.lock().unwrap(),
        vec![Event::NewSession {
            session_id: 0,
            accepted: true
        }]
    );

    let second = conn.open_shell();
    assert!(matches!(
        second,
        Err(ProtocolError::UnsupportedByDialect { dialect: "goTTYd", .. })
    ));
    assert_eq!(transport.sent_count(), 0);
    assert_eq!(events.lock().unwrap().len(), 1);
}

#[test]
fn test_legacy_wire_format() {
    let (mut conn, transport) = legacy();
    let events = record_events(&mut conn);
    let id = conn.open_shell().unwrap();

    conn.send_terminal_data(id, b"ls\r").unwrap();
    conn.resize(id, TermSize::new(30, 100)).unwrap();
    conn.authenticate("password", "ignored", false).unwrap();

    let sent = transport.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(&sent[0][..], &[1, 0, 0, 0, b'l', b's', b'\r']);
    assert_eq!(&sent[1][..4], &[2, 0, 0, 0]);
    assert_eq!(&sent[1][4..], br#"{"rows":30,"cols":100}"#);

    // Inbound bytes have no header.
    conn.handle_transport_event(TransportEvent::Message(Bytes::from_static(b"\x1b[1mhi")));
    assert_eq!(
        events.lock().unwrap().last(),
        Some(&Event::TermData {
            session_id: 0,
            data: Bytes::from_static(b"\x1b[1mhi")
        })
    );
}

#[test]
fn test_legacy_rejects_file_transfer() {
    let (mut conn, transport) = legacy();
    assert!(matches!(
        conn.open_file_transfer(),
        Err(ProtocolError::UnsupportedByDialect { .. })
    ));
    assert!(matches!(
        conn.file_operation(0, FsOpKind::Getwd, vec![]),
        Err(ProtocolError::UnsupportedByDialect { .. })
    ));
    assert_eq!(transport.sent_count(), 0);
}

#[test]
fn test_legacy_close_tears_down() {
    let (mut conn, transport) = legacy();
    let id = conn.open_shell().unwrap();
    conn.close_session(id).unwrap();

    assert_eq!(transport.sent_count(), 0);
    assert_eq!(transport.close_count(), 1);
    assert!(conn.is_closed());
}

// =============================================================================
// File operations
// =============================================================================

#[tokio::test]
async fn test_readdir_scenario() {
    let (mut conn, transport) = standard();
    let files = open_files(&mut conn);
    assert_eq!(files, 0);

    let pending = conn.readdir(files, "/").unwrap();

    let frame = transport.frames().pop().unwrap();
    assert_eq!(frame.kind(), Some(MessageType::FsOperation));
    assert_eq!(frame.session_id, 0);
    assert_eq!(frame.payload[0], FsOpKind::Readdir.code());
    assert_eq!(
        serde_json::from_slice::<Value>(&frame.payload[1..]).unwrap(),
        json!({"op": 1, "args": ["/"]})
    );

    conn.handle_transport_event(fs_reply(
        0,
        FsOpKind::Readdir,
        json!([{
            "name": "a.txt",
            "isDirectory": false,
            "modifiedTimeMillis": 0,
            "unixPermissionBits": 0o644
        }]),
    ));

    let entries = pending.await.unwrap();
    assert_eq!(
        entries,
        vec![DirEntry {
            name: "a.txt".to_string(),
            is_directory: false,
            modified_time_millis: 0,
            unix_permission_bits: 0o644,
        }]
    );
    assert_eq!(entries[0].permissions().to_string(), "rw-r--r--");
}

#[tokio::test]
async fn test_second_operation_orphans_the_first() {
    let (mut conn, _transport) = standard();
    let files = open_files(&mut conn);

    let readdir = conn.readdir(files, "/").unwrap();
    let mkdir = conn.mkdir(files, "/tmp/new").unwrap();

    // The orphaned readdir reply matches nothing.
    conn.handle_transport_event(fs_reply(files, FsOpKind::Readdir, json!([])));
    conn.handle_transport_event(fs_reply(files, FsOpKind::Mkdir, json!("")));

    assert!(mkdir.await.unwrap().is_success());
    // The readdir caller never receives a listing.
    assert!(matches!(
        readdir.await,
        Err(ProtocolError::OperationAbandoned { .. })
    ));
}

#[test]
fn test_reject_policy_refuses_overlap() {
    let transport = RecordingTransport::default();
    let mut conn = Connection::with_transport(
        "ws://localhost:32300/ws",
        Dialect::FullMultiplex,
        transport.clone(),
    )
    .with_policy(InFlightPolicy::Reject);
    let files = open_files(&mut conn);

    let _first = conn.getwd(files).unwrap();
    let sent_before = transport.sent_count();
    assert!(matches!(
        conn.readdir(files, "/"),
        Err(ProtocolError::OperationInFlight { .. })
    ));
    assert_eq!(transport.sent_count(), sent_before);
}

#[tokio::test]
async fn test_typed_file_helpers() {
    let (mut conn, transport) = standard();
    let files = open_files(&mut conn);

    let getwd = conn.getwd(files).unwrap();
    conn.handle_transport_event(fs_reply(files, FsOpKind::Getwd, json!("/home/me")));
    assert_eq!(getwd.await.unwrap(), "/home/me");
    assert_eq!(conn.cwd(files), Some("/home/me"));

    let rename = conn.rename(files, "a", "b").unwrap();
    conn.handle_transport_event(fs_reply(files, FsOpKind::Rename, json!("file exists")));
    assert_eq!(rename.await.unwrap(), OpStatus("file exists".to_string()));

    let remove = conn.remove(files, "b").unwrap();
    conn.handle_transport_event(fs_reply(files, FsOpKind::Remove, json!("")));
    assert!(remove.await.unwrap().is_success());

    let download = conn.download_file(files, "/home/me/a.txt").unwrap();
    conn.handle_transport_event(fs_reply(
        files,
        FsOpKind::DownloadFile,
        json!(["a.txt", "/api/download/7"]),
    ));
    let descriptor = download.await.unwrap();
    assert_eq!(
        descriptor.resolve("http://localhost:32300"),
        "http://localhost:32300/api/download/7"
    );

    let upload_to = conn.upload_to(files, "/home/me").unwrap();
    conn.handle_transport_event(fs_reply(files, FsOpKind::UploadFile, json!([])));
    upload_to.await.unwrap();

    let upload = conn.upload_file(files, "/home/me/b.txt").unwrap();
    conn.handle_transport_event(fs_reply(
        files,
        FsOpKind::UploadFile,
        json!(["/api/upload/8"]),
    ));
    assert_eq!(upload.await.unwrap(), "/api/upload/8");

    let args: Vec<Value> = transport
        .frames()
        .iter()
        .filter(|f| f.kind() == Some(MessageType::FsOperation))
        .map(|f| serde_json::from_slice::<Value>(&f.payload[1..]).unwrap()["args"].clone())
        .collect();
    assert_eq!(args[4], json!(["/home/me", ""]));
    assert_eq!(args[5], json!(["/home/me/b.txt", "selected"]));
}

#[tokio::test]
async fn test_fs_results_are_also_published() {
    let (mut conn, _transport) = standard();
    let events = record_events(&mut conn);
    let files = open_files(&mut conn);

    conn.handle_transport_event(fs_reply(files, FsOpKind::UploadFile, json!([])));
    assert_eq!(
        events.lock().unwrap().last(),
        Some(&Event::FsOperation {
            session_id: files,
            result: FsResult::UploadFile(UploadReply::Ready)
        })
    );
}

#[test]
fn test_file_operation_requires_open_file_transfer_session() {
    let (mut conn, _transport) = standard();
    let pending_files = conn.open_file_transfer().unwrap();
    assert!(matches!(
        conn.getwd(pending_files),
        Err(ProtocolError::InvalidSessionState { .. })
    ));
}

#[tokio::test]
async fn test_fs_result_reaches_subscriber_and_future() {
    let (mut conn, _transport) = standard();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    conn.subscribe(EventKind::FsOperation, move |event: &Event| {
        if let Event::FsOperation {
            result: FsResult::Readdir(entries),
            ..
        } = event
        {
            log.lock().unwrap().extend(entries.iter().map(|e| e.name.clone()));
        }
        Ok(())
    });
    let files = open_files(&mut conn);

    let pending = conn.readdir(files, "/srv").unwrap();
    conn.handle_transport_event(fs_reply(
        files,
        FsOpKind::Readdir,
        json!([
            {"name": "a", "isDirectory": true, "modifiedTimeMillis": 1, "unixPermissionBits": 0o755},
            {"name": "b", "isDirectory": false, "modifiedTimeMillis": 2, "unixPermissionBits": 0o600}
        ]),
    ));

    let entries = pending.await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
}

// =============================================================================
// Send failures
// =============================================================================

#[test]
fn test_failed_open_leaves_no_session_behind() {
    let transport = FlakyTransport::default();
    let mut conn = Connection::with_transport(
        "ws://localhost:32300/ws",
        Dialect::FullMultiplex,
        transport.clone(),
    );
    let shell = conn.open_shell().unwrap();
    transport.break_now();

    assert!(matches!(
        conn.open_shell(),
        Err(ProtocolError::TransportClosed(_))
    ));
    assert!(matches!(
        conn.open_file_transfer(),
        Err(ProtocolError::TransportClosed(_))
    ));
    assert_eq!(conn.live_sessions(), 1);
    assert!(conn.session(1).is_none());
    assert!(conn.session(2).is_none());

    // Teardown on zero still works for what remains.
    conn.close_session(shell).unwrap();
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_failed_file_operation_is_not_left_pending() {
    let transport = FlakyTransport::default();
    let mut conn = Connection::with_transport(
        "ws://localhost:32300/ws",
        Dialect::FullMultiplex,
        transport.clone(),
    )
    .with_policy(InFlightPolicy::Reject);
    let files = conn.open_file_transfer().unwrap();
    conn.handle_transport_event(ack(files, true, false));

    transport.break_now();
    assert!(matches!(
        conn.readdir(files, "/"),
        Err(ProtocolError::TransportClosed(_))
    ));

    // A late reply for the unsent request resolves nothing, and the reject
    // policy does not see a request in flight.
    conn.handle_transport_event(fs_reply(files, FsOpKind::Readdir, json!([])));
    *transport.broken.lock().unwrap() = false;
    let getwd = conn.getwd(files).unwrap();
    conn.handle_transport_event(fs_reply(files, FsOpKind::Getwd, json!("/")));
    assert_eq!(getwd.await.unwrap(), "/");
    assert_eq!(*transport.sent.lock().unwrap(), 2);
}

// =============================================================================
// Teardown
// =============================================================================

#[test]
fn test_closing_last_session_tears_down_once() {
    let (mut conn, transport) = standard();
    let events = record_events(&mut conn);

    let a = conn.open_shell().unwrap();
    let b = conn.open_shell().unwrap();
    conn.handle_transport_event(ack(a, true, false));
    conn.handle_transport_event(ack(b, true, false));

    conn.close_session(a).unwrap();
    assert!(!conn.is_closed());
    conn.close_session(b).unwrap();
    conn.close_session(b).unwrap();
    conn.handle_transport_event(TransportEvent::Closed(None));

    assert_eq!(transport.close_count(), 1);
    let closed = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.kind() == EventKind::Closed)
        .count();
    assert_eq!(closed, 1);

    let close_frames: Vec<u16> = transport
        .frames()
        .iter()
        .filter(|f| f.kind() == Some(MessageType::CloseSession))
        .map(|f| f.session_id)
        .collect();
    assert_eq!(close_frames, vec![a, b]);
}

#[test]
fn test_closing_shell_closes_paired_file_transfer() {
    let (mut conn, transport) = standard();
    let shell = conn.open_shell().unwrap();
    conn.handle_transport_event(ack(shell, true, false));
    let files = conn.open_paired_file_transfer(shell).unwrap();
    conn.handle_transport_event(ack(files, true, false));

    conn.close_session(shell).unwrap();

    let close_frames: Vec<u16> = transport
        .frames()
        .iter()
        .filter(|f| f.kind() == Some(MessageType::CloseSession))
        .map(|f| f.session_id)
        .collect();
    assert_eq!(close_frames, vec![shell, files]);
    assert_eq!(conn.session(files).unwrap().state, SessionState::Closed);
    assert!(conn.is_closed());
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test]
async fn test_transport_loss_closes_everything() {
    let (mut conn, transport) = standard();
    let events = record_events(&mut conn);

    let shell = conn.open_shell().unwrap();
    conn.handle_transport_event(ack(shell, true, false));
    let files = open_files(&mut conn);
    let pending = conn.getwd(files).unwrap();
    events.lock().unwrap().clear();

    conn.handle_transport_event(TransportEvent::Closed(Some("reset".to_string())));
    conn.handle_transport_event(TransportEvent::Closed(None));

    assert!(conn.is_closed());
    assert_eq!(conn.live_sessions(), 0);
    assert_eq!(transport.close_count(), 1);
    assert!(matches!(
        pending.await,
        Err(ProtocolError::OperationAbandoned { .. })
    ));

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            Event::SessionClosed { session_id: shell },
            Event::SessionClosed { session_id: files },
            Event::Closed {
                reason: Some("reset".to_string())
            },
        ]
    );

    // Nothing is accepted after close.
    drop(events);
    assert!(matches!(
        conn.open_shell(),
        Err(ProtocolError::TransportClosed(_))
    ));
}

#[test]
fn test_close_unknown_session() {
    let (mut conn, _transport) = standard();
    assert!(matches!(
        conn.close_session(5),
        Err(ProtocolError::SessionNotFound { session_id: 5 })
    ));
}
