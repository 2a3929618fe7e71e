//! Wire dialects.
//!
//! A connection speaks one of two dialects, chosen when it is opened:
//!
//! - **standard**: every message in both directions is a framed
//!   `(type, session id, payload)` triple and many sessions share the
//!   transport.
//! - **goTTYd**: a single shell, no authentication, no file transfer.
//!   Inbound bytes are raw terminal output with no header. Outbound input
//!   and resize messages reuse the 4-byte header with the legacy type codes.
//!
//! The connection holds a `Box<dyn WireDialect>` and never branches on the
//! dialect itself.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use protocol::{
    framing, AuthReply, Frame, FsRequest, MessageType, ProtocolError, Result, SessionKind,
    TermSize,
};
use serde::{Deserialize, Serialize};

use crate::registry::{AllocationMode, SessionId};

/// Legacy header type for terminal input.
pub const LEGACY_INPUT: u16 = 1;

/// Legacy header type for a resize.
pub const LEGACY_RESIZE: u16 = 2;

/// Dialect selector, as stored in configuration and session profiles.
///
/// Parsing is case-insensitive everywhere (`--dialect`, `WTERM_DIALECT`,
/// config files, profiles); serialization writes the canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Dialect {
    /// Multiplexed framing with auth and file transfer.
    #[default]
    #[serde(rename = "standard")]
    FullMultiplex,
    /// Single-session compatibility mode.
    #[serde(rename = "goTTYd")]
    SingleSessionLegacy,
}

impl Dialect {
    /// Name used on the command line, in config files and in errors.
    pub fn name(self) -> &'static str {
        match self {
            Dialect::FullMultiplex => "standard",
            Dialect::SingleSessionLegacy => "goTTYd",
        }
    }

    /// Returns the strategy implementing this dialect.
    pub fn wire(self) -> Box<dyn WireDialect> {
        match self {
            Dialect::FullMultiplex => Box::new(Multiplexed),
            Dialect::SingleSessionLegacy => Box::new(Legacy),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(Dialect::FullMultiplex),
            "gottyd" | "gotty" => Ok(Dialect::SingleSessionLegacy),
            other => Err(format!(
                "unknown dialect '{other}' (expected 'standard' or 'goTTYd')"
            )),
        }
    }
}

impl TryFrom<String> for Dialect {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Encoding strategy for one dialect.
///
/// Methods that return `None` have no wire representation in the dialect
/// and are handled locally by the connection.
pub trait WireDialect: Send + fmt::Debug {
    /// Which dialect this is.
    fn dialect(&self) -> Dialect;

    /// How the session registry hands out ids.
    fn allocation_mode(&self) -> AllocationMode;

    /// Whether file-transfer sessions exist.
    fn supports_file_transfer(&self) -> bool;

    /// Encode a session open request.
    fn new_session(&self, session_id: SessionId, kind: SessionKind) -> Option<Bytes>;

    /// Encode a session close request.
    fn close_session(&self, session_id: SessionId) -> Option<Bytes>;

    /// Encode terminal input.
    fn term_data(&self, session_id: SessionId, data: &[u8]) -> Bytes;

    /// Encode a resize.
    fn resize(&self, session_id: SessionId, size: TermSize) -> Result<Bytes>;

    /// Encode an authentication answer.
    fn auth(&self, reply: &AuthReply) -> Result<Option<Bytes>>;

    /// Encode a file operation request.
    fn fs_operation(&self, session_id: SessionId, request: &FsRequest) -> Result<Bytes>;

    /// Decode one inbound transport message.
    fn decode(&self, data: &[u8]) -> Result<Frame>;
}

/// The standard multiplexed dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct Multiplexed;

impl WireDialect for Multiplexed {
    fn dialect(&self) -> Dialect {
        Dialect::FullMultiplex
    }

    fn allocation_mode(&self) -> AllocationMode {
        AllocationMode::Multiplexed
    }

    fn supports_file_transfer(&self) -> bool {
        true
    }

    fn new_session(&self, session_id: SessionId, kind: SessionKind) -> Option<Bytes> {
        Some(framing::encode(
            MessageType::NewSession,
            session_id,
            &kind.to_request_payload(),
        ))
    }

    fn close_session(&self, session_id: SessionId) -> Option<Bytes> {
        Some(framing::encode(MessageType::CloseSession, session_id, &[]))
    }

    fn term_data(&self, session_id: SessionId, data: &[u8]) -> Bytes {
        framing::encode(MessageType::TermData, session_id, data)
    }

    fn resize(&self, session_id: SessionId, size: TermSize) -> Result<Bytes> {
        let body = serde_json::to_vec(&size)?;
        Ok(framing::encode(MessageType::Resize, session_id, &body))
    }

    fn auth(&self, reply: &AuthReply) -> Result<Option<Bytes>> {
        let body = serde_json::to_vec(reply)?;
        Ok(Some(framing::encode(MessageType::Auth, 0, &body)))
    }

    fn fs_operation(&self, session_id: SessionId, request: &FsRequest) -> Result<Bytes> {
        let body = request.to_payload()?;
        Ok(framing::encode(MessageType::FsOperation, session_id, &body))
    }

    fn decode(&self, data: &[u8]) -> Result<Frame> {
        framing::decode(data)
    }
}

/// The single-session goTTYd dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct Legacy;

impl WireDialect for Legacy {
    fn dialect(&self) -> Dialect {
        Dialect::SingleSessionLegacy
    }

    fn allocation_mode(&self) -> AllocationMode {
        AllocationMode::SingleSession
    }

    fn supports_file_transfer(&self) -> bool {
        false
    }

    fn new_session(&self, _session_id: SessionId, _kind: SessionKind) -> Option<Bytes> {
        None
    }

    fn close_session(&self, _session_id: SessionId) -> Option<Bytes> {
        None
    }

    fn term_data(&self, _session_id: SessionId, data: &[u8]) -> Bytes {
        framing::encode(LEGACY_INPUT, 0, data)
    }

    fn resize(&self, _session_id: SessionId, size: TermSize) -> Result<Bytes> {
        let body = serde_json::to_vec(&size)?;
        Ok(framing::encode(LEGACY_RESIZE, 0, &body))
    }

    fn auth(&self, _reply: &AuthReply) -> Result<Option<Bytes>> {
        Ok(None)
    }

    fn fs_operation(&self, _session_id: SessionId, _request: &FsRequest) -> Result<Bytes> {
        Err(ProtocolError::UnsupportedByDialect {
            operation: "file operations",
            dialect: Dialect::SingleSessionLegacy.name(),
        })
    }

    fn decode(&self, data: &[u8]) -> Result<Frame> {
        Ok(Frame::new(
            MessageType::TermData,
            0,
            Bytes::copy_from_slice(data),
        ))
    }
}
