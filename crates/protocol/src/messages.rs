//! Payload definitions for the wterm protocol.
//!
//! Structured payloads are JSON; the new-session request and acknowledgment
//! are small fixed binary layouts; file-operation payloads carry a one-byte
//! operation kind in front of their JSON body.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

// ============================================================================
// Sessions
// ============================================================================

/// Kind of a logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    /// Interactive shell.
    Shell,
    /// File-transfer session.
    FileTransfer,
}

impl SessionKind {
    /// Wire code sent in a `new_session` request.
    pub fn code(self) -> u16 {
        match self {
            SessionKind::Shell => 0,
            SessionKind::FileTransfer => 1,
        }
    }

    /// Encode the `new_session` request payload (kind as little-endian u16).
    pub fn to_request_payload(self) -> [u8; 2] {
        self.code().to_le_bytes()
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Shell => f.write_str("shell"),
            SessionKind::FileTransfer => f.write_str("file-transfer"),
        }
    }
}

/// Server acknowledgment of a `new_session` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionAck {
    /// Whether the server opened the session.
    pub accepted: bool,
    /// Whether the remote side uses `\` as its path separator.
    pub windows_paths: bool,
}

impl SessionAck {
    /// Parse an acknowledgment payload. Missing bytes read as zero.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self {
            accepted: payload.first().is_some_and(|b| *b != 0),
            windows_paths: payload.get(1).is_some_and(|b| *b != 0),
        }
    }

    /// Encode the acknowledgment as the server would.
    pub fn to_payload(self) -> [u8; 2] {
        [self.accepted as u8, self.windows_paths as u8]
    }
}

/// Answer to an authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthReply {
    /// The challenge being answered (echoed back).
    pub question: String,
    /// The secret.
    pub password: String,
    /// Whether the server should remember the answer.
    pub saved: bool,
}

/// Terminal dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    /// Rows.
    pub rows: u16,
    /// Columns.
    pub cols: u16,
}

impl TermSize {
    /// Create a new terminal size.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

// ============================================================================
// Info
// ============================================================================

/// Severity of an `info` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InfoLevel {
    /// Informational.
    Info,
    /// Error report.
    Error,
}

/// Free-form status message pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoMessage {
    /// Severity.
    #[serde(rename = "type")]
    pub level: InfoLevel,
    /// Message text.
    #[serde(rename = "info", alias = "message")]
    pub message: String,
}

// ============================================================================
// File operations
// ============================================================================

/// File-operation kinds, sent as the first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FsOpKind {
    /// Current working directory. Args: none.
    Getwd = 0,
    /// List a directory. Args: `[path]`.
    Readdir = 1,
    /// Create a directory. Args: `[path]`.
    Mkdir = 2,
    /// Remove a file or directory. Args: `[path]`.
    Remove = 3,
    /// Rename. Args: `[old, new]`.
    Rename = 4,
    /// Prepare a download. Args: `[path]`.
    DownloadFile = 5,
    /// Prepare an upload. Args: `[path, mode]`.
    UploadFile = 6,
}

impl FsOpKind {
    /// All kinds in wire order.
    pub const ALL: [FsOpKind; 7] = [
        FsOpKind::Getwd,
        FsOpKind::Readdir,
        FsOpKind::Mkdir,
        FsOpKind::Remove,
        FsOpKind::Rename,
        FsOpKind::DownloadFile,
        FsOpKind::UploadFile,
    ];

    /// Returns the wire code.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FsOpKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        FsOpKind::ALL
            .get(value as usize)
            .copied()
            .ok_or(ProtocolError::UnknownOperation(value))
    }
}

impl fmt::Display for FsOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsOpKind::Getwd => "getwd",
            FsOpKind::Readdir => "readdir",
            FsOpKind::Mkdir => "mkdir",
            FsOpKind::Remove => "remove",
            FsOpKind::Rename => "rename",
            FsOpKind::DownloadFile => "downloadFile",
            FsOpKind::UploadFile => "uploadFile",
        };
        f.write_str(name)
    }
}

/// Outbound file-operation body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsRequest {
    /// Operation kind code.
    pub op: u8,
    /// Positional string arguments.
    pub args: Vec<String>,
}

impl FsRequest {
    /// Create a request for the given kind.
    pub fn new(kind: FsOpKind, args: Vec<String>) -> Self {
        Self {
            op: kind.code(),
            args,
        }
    }

    /// Encode as `[kind] + JSON({op, args})`.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let mut payload = vec![self.op];
        serde_json::to_writer(&mut payload, self)?;
        Ok(payload)
    }
}

/// Split an inbound file-operation payload into its kind and JSON body.
pub fn split_fs_payload(payload: &[u8]) -> Result<(FsOpKind, Value)> {
    let (&op, body) = payload.split_first().ok_or_else(|| {
        ProtocolError::Deserialization("empty file-operation payload".to_string())
    })?;
    let kind = FsOpKind::try_from(op)?;
    let value = serde_json::from_slice(body)?;
    Ok((kind, value))
}

/// A single directory entry returned by `readdir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (not a full path).
    pub name: String,
    /// Whether the entry is a directory.
    #[serde(rename = "dir", alias = "isDirectory")]
    pub is_directory: bool,
    /// Last modification time, Unix epoch milliseconds.
    #[serde(rename = "modTime", alias = "modifiedTimeMillis")]
    pub modified_time_millis: i64,
    /// Unix permission bits (`0o777` mask).
    #[serde(rename = "perm", alias = "unixPermissionBits")]
    pub unix_permission_bits: u32,
}

impl DirEntry {
    /// Returns the permission bits split into owner/group/other groups.
    pub fn permissions(&self) -> Permissions {
        Permissions::from_bits(self.unix_permission_bits)
    }
}

/// Unix permission bits interpreted as three 3-bit groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    /// Owner bits (0-7).
    pub owner: u8,
    /// Group bits (0-7).
    pub group: u8,
    /// Other bits (0-7).
    pub other: u8,
}

impl Permissions {
    /// Split a mode into its three groups; bits above `0o777` are ignored.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            owner: ((bits & 0o700) >> 6) as u8,
            group: ((bits & 0o070) >> 3) as u8,
            other: (bits & 0o007) as u8,
        }
    }

    /// Render one 3-bit group as `rwx`-style text.
    pub fn group_str(bits: u8) -> &'static str {
        const TABLE: [&str; 8] = ["---", "--x", "-w-", "-wx", "r--", "r-x", "rw-", "rwx"];
        TABLE[(bits & 0o7) as usize]
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            Self::group_str(self.owner),
            Self::group_str(self.group),
            Self::group_str(self.other)
        )
    }
}

/// Outcome of a `mkdir`, `remove` or `rename`: empty text means success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpStatus(pub String);

impl OpStatus {
    /// Whether the server reported success.
    pub fn is_success(&self) -> bool {
        self.0.is_empty()
    }

    /// The server's error text, if any.
    pub fn error(&self) -> Option<&str> {
        (!self.0.is_empty()).then_some(self.0.as_str())
    }
}

/// Download descriptor: file name and a server-relative URL path.
///
/// Both fields are empty when the server refused the download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDescriptor {
    /// Suggested file name.
    pub name: String,
    /// URL path on the HTTP side of the server.
    pub path: String,
}

impl DownloadDescriptor {
    /// Whether the server produced a download target.
    pub fn is_available(&self) -> bool {
        !self.path.is_empty()
    }

    /// Join the URL path onto an HTTP base such as `http://localhost:32300`.
    pub fn resolve(&self, base_url: &str) -> String {
        join_url(base_url, &self.path)
    }
}

/// Reply to an `uploadFile` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadReply {
    /// Batch upload accepted; the server is ready (empty payload array).
    Ready,
    /// One-shot upload target. An empty path means the server refused.
    Target(String),
}

impl UploadReply {
    /// Join the upload target onto an HTTP base. `None` for `Ready` or a refusal.
    pub fn resolve(&self, base_url: &str) -> Option<String> {
        match self {
            UploadReply::Target(path) if !path.is_empty() => Some(join_url(base_url, path)),
            _ => None,
        }
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Typed result of a completed file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsResult {
    /// Current working directory.
    Getwd(String),
    /// Directory listing, in server order.
    Readdir(Vec<DirEntry>),
    /// `mkdir` status.
    Mkdir(OpStatus),
    /// `remove` status.
    Remove(OpStatus),
    /// `rename` status.
    Rename(OpStatus),
    /// Download descriptor.
    DownloadFile(DownloadDescriptor),
    /// Upload reply.
    UploadFile(UploadReply),
}

impl FsResult {
    /// Interpret a JSON body for the given operation kind.
    pub fn from_value(kind: FsOpKind, value: Value) -> Result<Self> {
        let result = match kind {
            FsOpKind::Getwd => FsResult::Getwd(serde_json::from_value(value)?),
            FsOpKind::Readdir => {
                // A listing of an empty directory can arrive as `null`.
                let entries: Option<Vec<DirEntry>> = serde_json::from_value(value)?;
                FsResult::Readdir(entries.unwrap_or_default())
            }
            FsOpKind::Mkdir => FsResult::Mkdir(serde_json::from_value(value)?),
            FsOpKind::Remove => FsResult::Remove(serde_json::from_value(value)?),
            FsOpKind::Rename => FsResult::Rename(serde_json::from_value(value)?),
            FsOpKind::DownloadFile => {
                let mut parts: Vec<String> = serde_json::from_value(value)?;
                if parts.len() != 2 {
                    return Err(ProtocolError::Deserialization(format!(
                        "download descriptor must have 2 elements, got {}",
                        parts.len()
                    )));
                }
                let path = parts.pop().unwrap_or_default();
                let name = parts.pop().unwrap_or_default();
                FsResult::DownloadFile(DownloadDescriptor { name, path })
            }
            FsOpKind::UploadFile => {
                let mut parts: Vec<String> = serde_json::from_value(value)?;
                match parts.len() {
                    0 => FsResult::UploadFile(UploadReply::Ready),
                    1 => FsResult::UploadFile(UploadReply::Target(parts.remove(0))),
                    n => {
                        return Err(ProtocolError::Deserialization(format!(
                            "upload reply must have 0 or 1 elements, got {}",
                            n
                        )))
                    }
                }
            }
        };
        Ok(result)
    }

    /// The operation kind this result answers.
    pub fn kind(&self) -> FsOpKind {
        match self {
            FsResult::Getwd(_) => FsOpKind::Getwd,
            FsResult::Readdir(_) => FsOpKind::Readdir,
            FsResult::Mkdir(_) => FsOpKind::Mkdir,
            FsResult::Remove(_) => FsOpKind::Remove,
            FsResult::Rename(_) => FsOpKind::Rename,
            FsResult::DownloadFile(_) => FsOpKind::DownloadFile,
            FsResult::UploadFile(_) => FsOpKind::UploadFile,
        }
    }
}
