//! Line-framed wire protocol shared by the work queue and the result sinks.
//!
//! Every frame is one UTF-8 line terminated by `\n`.
//!
//! Work queue: the client sends [`NUMBER`] (reply: decimal item count) or
//! any other frame, conventionally [`NEXT`] (reply: next item identifier,
//! or [`END`] once exhausted).
//!
//! Result push: `<image_name>%::%<json_payload>` per image; a bare [`END`]
//! frame asks the sink to close.

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Request for the total item count.
pub const NUMBER: &str = "NUMBER";
/// Request for the next item.
pub const NEXT: &str = "NEXT";
/// End-of-stream marker in both directions.
pub const END: &str = "END";
/// Separator between image name and payload in a result frame.
pub const SEPARATOR: &str = "%::%";

// ── Error types ──

/// Errors raised while speaking the wire protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Socket I/O failed.
    #[error("protocol I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload (de)serialization failed.
    #[error("protocol JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame did not have the expected shape.
    #[error("malformed frame: {0:?}")]
    MalformedFrame(String),

    /// The peer closed the connection mid-exchange.
    #[error("connection closed by peer")]
    ConnectionClosed,
}

// ── Framing ──

/// Read one frame; `None` at end of stream.
///
/// # Errors
///
/// Returns [`ProtocolError::Io`] on read failure.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']);
    Ok(Some(trimmed.to_owned()))
}

/// Write one frame and flush.
///
/// # Errors
///
/// Returns [`ProtocolError::Io`] on write failure, or
/// [`ProtocolError::MalformedFrame`] if `frame` contains a line break.
pub async fn write_frame<W>(writer: &mut W, frame: &str) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if frame.contains(['\n', '\r']) {
        return Err(ProtocolError::MalformedFrame(frame.to_owned()));
    }
    let mut bytes = Vec::with_capacity(frame.len().saturating_add(1));
    bytes.extend_from_slice(frame.as_bytes());
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

// ── Result frames ──

/// Encode a result frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] if the payload cannot be serialized.
pub fn encode_result(image_name: &str, payload: &Value) -> Result<String, ProtocolError> {
    Ok(format!(
        "{image_name}{SEPARATOR}{}",
        serde_json::to_string(payload)?
    ))
}

/// Decode a result frame into image name and payload.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedFrame`] without a separator, or
/// [`ProtocolError::Json`] for an unparsable payload.
pub fn decode_result(frame: &str) -> Result<(String, Value), ProtocolError> {
    let (name, payload) = frame
        .split_once(SEPARATOR)
        .ok_or_else(|| ProtocolError::MalformedFrame(frame.to_owned()))?;
    Ok((name.to_owned(), serde_json::from_str(payload)?))
}

/// Parse a decimal count reply.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedFrame`] if `frame` is not a count.
pub fn parse_count(frame: &str) -> Result<usize, ProtocolError> {
    frame
        .trim()
        .parse()
        .map_err(|_| ProtocolError::MalformedFrame(frame.to_owned()))
}
