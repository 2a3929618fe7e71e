//! # wterm Protocol Library
//!
//! Wire-level definitions for the wterm remote terminal service.
//!
//! ## Overview
//!
//! One duplex, message-framed transport (a WebSocket in practice) carries
//! many logical sessions. This crate knows how those sessions look on the
//! wire and nothing about their lifecycle:
//!
//! - **Frame Codec**: 4-byte little-endian header (type, session id) + payload
//! - **Message Catalogue**: stable numeric message types and file-operation kinds
//! - **Payloads**: JSON bodies, session acknowledgments, file-operation results
//! - **Errors**: one error enum shared with the client crate
//!
//! ## Wire Layout
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────────────────────┐
//! │ type (u16le) │ ssid (u16le) │ payload (JSON / raw / op+JSON)  │
//! └──────────────┴──────────────┴─────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{framing, FsOpKind, FsRequest, MessageType};
//!
//! let body = FsRequest::new(FsOpKind::Readdir, vec!["/".to_string()])
//!     .to_payload()
//!     .unwrap();
//! let bytes = framing::encode(MessageType::FsOperation, 0, &body);
//!
//! let frame = framing::decode(&bytes).unwrap();
//! assert_eq!(frame.kind(), Some(MessageType::FsOperation));
//! assert_eq!(frame.payload[0], FsOpKind::Readdir.code());
//! ```
//!
//! ## Modules
//!
//! - [`framing`]: Frame codec
//! - [`messages`]: Payload definitions
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use framing::{Frame, MessageType, FRAME_HEADER_SIZE};
pub use messages::{
    split_fs_payload, AuthReply, DirEntry, DownloadDescriptor, FsOpKind, FsRequest, FsResult,
    InfoLevel, InfoMessage, OpStatus, Permissions, SessionAck, SessionKind, TermSize, UploadReply,
};
