//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Frame errors
    /// Fewer bytes than a frame header were received.
    #[error("malformed frame: need at least {expected} bytes, got {got}")]
    MalformedFrame {
        /// Minimum frame length.
        expected: usize,
        /// Actual number of bytes received.
        got: usize,
    },

    /// A file-operation kind byte outside the known catalogue.
    #[error("unknown file operation: {0}")]
    UnknownOperation(u8),

    // Caller misuse
    /// The operation is not available under the connection's dialect.
    #[error("{operation} is not supported by the {dialect} dialect")]
    UnsupportedByDialect {
        /// The rejected operation.
        operation: &'static str,
        /// Name of the active dialect.
        dialect: &'static str,
    },

    /// The session exists but is not in a state that allows the operation.
    #[error("invalid state for session {session_id}: {reason}")]
    InvalidSessionState {
        /// The session identifier.
        session_id: u16,
        /// Human-readable explanation.
        reason: String,
    },

    /// Session with the given ID was not found.
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// The missing session identifier.
        session_id: u16,
    },

    /// Every 16-bit session id has been handed out on this connection.
    #[error("session ids exhausted")]
    SessionIdsExhausted,

    /// A file operation is already outstanding on the session.
    #[error("file operation already in flight on session {session_id}")]
    OperationInFlight {
        /// The busy session identifier.
        session_id: u16,
    },

    /// The completion handle was orphaned without a result.
    #[error("file operation on session {session_id} was abandoned")]
    OperationAbandoned {
        /// The session the operation was issued on.
        session_id: u16,
    },

    // Connection errors
    /// The underlying duplex channel is closed.
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// Transport-level I/O failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversion from serde_json errors

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_frame_display() {
        let err = ProtocolError::MalformedFrame {
            expected: 4,
            got: 3,
        };
        assert_eq!(
            err.to_string(),
            "malformed frame: need at least 4 bytes, got 3"
        );
    }

    #[test]
    fn test_unsupported_by_dialect_display() {
        let err = ProtocolError::UnsupportedByDialect {
            operation: "file transfer",
            dialect: "goTTYd",
        };
        assert_eq!(
            err.to_string(),
            "file transfer is not supported by the goTTYd dialect"
        );
    }

    #[test]
    fn test_invalid_session_state_display() {
        let err = ProtocolError::InvalidSessionState {
            session_id: 3,
            reason: "session is pending".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid state for session 3: session is pending"
        );
    }

    #[test]
    fn test_operation_errors_display() {
        assert_eq!(
            ProtocolError::OperationInFlight { session_id: 1 }.to_string(),
            "file operation already in flight on session 1"
        );
        assert_eq!(
            ProtocolError::OperationAbandoned { session_id: 1 }.to_string(),
            "file operation on session 1 was abandoned"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let protocol_err: ProtocolError = json_err.into();
        assert!(matches!(protocol_err, ProtocolError::Deserialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
