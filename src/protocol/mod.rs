//! Helper handshake protocol
//!
//! Framed messages exchanged between the supervisor and the X11 helper over
//! a private per-session Unix socket. A frame is a 4-byte big-endian signed
//! message tag followed by tag-specific payload; the only application-level
//! message today is `Started`, carrying the negotiated display name.
//!
//! The tag set is closed and range checked: anything below
//! [`MessageKind::Unknown`] or at/beyond the internal `Last` sentinel marks
//! the stream corrupted and the frame is dropped without touching the
//! payload bytes. New message kinds are added before `Last`.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a payload, to keep corrupt length prefixes from
/// ballooning allocations.
pub const MAX_PAYLOAD_LEN: u32 = 4096;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Protocol decode/encode error types
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Wire tag outside the closed message-kind range
    #[error("corrupt stream: message tag {0} outside valid range")]
    CorruptStream(i32),

    /// Payload length prefix exceeds the allowed maximum
    #[error("payload length {0} exceeds maximum {MAX_PAYLOAD_LEN}")]
    PayloadTooLarge(u32),

    /// Frame ended before the declared payload
    #[error("truncated frame")]
    Truncated,

    /// Payload text is not valid UTF-8
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// Underlying channel I/O error
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message kinds understood on the helper channel.
///
/// `Unknown` is a sentinel: decodable, never meaningful. `Last` bounds the
/// valid range and never appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MessageKind {
    /// Sentinel, carries no payload and no meaning
    Unknown = 0,
    /// Display server is up, payload is the display name
    Started = 1,
    /// Range bound, invalid on the wire
    Last = 2,
}

impl TryFrom<i32> for MessageKind {
    type Error = ProtocolError;

    fn try_from(tag: i32) -> Result<Self> {
        match tag {
            0 => Ok(MessageKind::Unknown),
            1 => Ok(MessageKind::Started),
            _ => Err(ProtocolError::CorruptStream(tag)),
        }
    }
}

/// A decoded helper channel message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperMessage {
    /// Sentinel frame, ignored by the supervisor
    Unknown,
    /// The display server is ready under the given display name
    Started {
        /// Negotiated display name, e.g. `:7`
        display_name: String,
    },
}

impl HelperMessage {
    /// Wire tag for this message
    pub fn kind(&self) -> MessageKind {
        match self {
            HelperMessage::Unknown => MessageKind::Unknown,
            HelperMessage::Started { .. } => MessageKind::Started,
        }
    }
}

/// Encode a message into a standalone frame.
pub fn encode(msg: &HelperMessage) -> BytesMut {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_i32(msg.kind() as i32);
    if let HelperMessage::Started { display_name } = msg {
        buf.put_u32(display_name.len() as u32);
        buf.put_slice(display_name.as_bytes());
    }
    buf
}

/// Decode a single frame from a buffer.
///
/// The tag is read and range checked first; payload bytes are never
/// interpreted for an out-of-range tag.
pub fn decode(buf: &mut impl Buf) -> Result<HelperMessage> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated);
    }
    let kind = MessageKind::try_from(buf.get_i32())?;

    match kind {
        MessageKind::Unknown => Ok(HelperMessage::Unknown),
        MessageKind::Started => {
            if buf.remaining() < 4 {
                return Err(ProtocolError::Truncated);
            }
            let len = buf.get_u32();
            if len > MAX_PAYLOAD_LEN {
                return Err(ProtocolError::PayloadTooLarge(len));
            }
            if buf.remaining() < len as usize {
                return Err(ProtocolError::Truncated);
            }
            let mut bytes = vec![0u8; len as usize];
            buf.copy_to_slice(&mut bytes);
            let display_name =
                String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
            Ok(HelperMessage::Started { display_name })
        }
        MessageKind::Last => Err(ProtocolError::CorruptStream(MessageKind::Last as i32)),
    }
}

/// Read exactly one frame from the channel.
pub async fn read_message<R>(reader: &mut R) -> Result<HelperMessage>
where
    R: AsyncRead + Unpin,
{
    let kind = MessageKind::try_from(reader.read_i32().await?)?;

    match kind {
        MessageKind::Unknown => Ok(HelperMessage::Unknown),
        MessageKind::Started => {
            let len = reader.read_u32().await?;
            if len > MAX_PAYLOAD_LEN {
                return Err(ProtocolError::PayloadTooLarge(len));
            }
            let mut bytes = vec![0u8; len as usize];
            reader.read_exact(&mut bytes).await?;
            let display_name =
                String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
            Ok(HelperMessage::Started { display_name })
        }
        MessageKind::Last => Err(ProtocolError::CorruptStream(MessageKind::Last as i32)),
    }
}

/// Write one frame to the channel and flush it.
pub async fn write_message<W>(writer: &mut W, msg: &HelperMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(msg);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
