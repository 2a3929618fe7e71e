//! Frame codec for the multiplexed ("standard") dialect.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 2 bytes: message type (little-endian)
//! - 2 bytes: session id (little-endian)
//! - N bytes: payload
//!
//! There is no length field. The transport preserves message boundaries,
//! so one transport message is exactly one frame.
//!
//! The codec does not validate the message type. Unknown codes decode
//! fine and are left for the receiver to drop.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Frame header size: 2 (type) + 2 (session id) = 4 bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Message type codes carried in the first two bytes of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// Authentication challenge (inbound) or answer (outbound).
    Auth = 0,
    /// Session open request (outbound) or acknowledgment (inbound).
    NewSession = 1,
    /// Session close request. Outbound only.
    CloseSession = 2,
    /// Raw terminal bytes.
    TermData = 3,
    /// File operation request or response.
    FsOperation = 4,
    /// Free-form status message from the server.
    Info = 5,
    /// Terminal resize.
    Resize = 0x0100,
}

impl MessageType {
    /// Returns the wire code for this message type.
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Looks up a message type by wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(MessageType::Auth),
            1 => Some(MessageType::NewSession),
            2 => Some(MessageType::CloseSession),
            3 => Some(MessageType::TermData),
            4 => Some(MessageType::FsOperation),
            5 => Some(MessageType::Info),
            0x0100 => Some(MessageType::Resize),
            _ => None,
        }
    }
}

impl From<MessageType> for u16 {
    fn from(value: MessageType) -> Self {
        value.code()
    }
}

/// A decoded frame.
///
/// `message_type` stays a raw code so that frames with unknown types can
/// still be decoded and reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw message type code.
    pub message_type: u16,
    /// Logical session the frame belongs to.
    pub session_id: u16,
    /// Opaque payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(message_type: impl Into<u16>, session_id: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type: message_type.into(),
            session_id,
            payload: payload.into(),
        }
    }

    /// Returns the message type if the code is known.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_code(self.message_type)
    }

    /// Encode this frame into bytes.
    pub fn encode(&self) -> Bytes {
        encode(self.message_type, self.session_id, &self.payload)
    }

    /// Decode a frame from one transport message.
    pub fn decode(data: &[u8]) -> Result<Self> {
        decode(data)
    }
}

/// Encode a frame: 4-byte little-endian header followed by the payload.
///
/// String payloads are passed as their UTF-8 bytes (`"text".as_bytes()`).
pub fn encode(message_type: impl Into<u16>, session_id: u16, payload: &[u8]) -> Bytes {
    let mut output = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    output.put_u16_le(message_type.into());
    output.put_u16_le(session_id);
    output.put_slice(payload);
    output.freeze()
}

/// Decode a frame from one transport message.
///
/// Fails with [`ProtocolError::MalformedFrame`] when fewer than
/// [`FRAME_HEADER_SIZE`] bytes are supplied.
pub fn decode(data: &[u8]) -> Result<Frame> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(ProtocolError::MalformedFrame {
            expected: FRAME_HEADER_SIZE,
            got: data.len(),
        });
    }

    let message_type = u16::from_le_bytes([data[0], data[1]]);
    let session_id = u16::from_le_bytes([data[2], data[3]]);

    Ok(Frame {
        message_type,
        session_id,
        payload: Bytes::copy_from_slice(&data[FRAME_HEADER_SIZE..]),
    })
}
