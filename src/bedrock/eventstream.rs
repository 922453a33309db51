//! AWS event stream framing.
//!
//! Each frame is: total length (u32), headers length (u32), prelude CRC,
//! headers, payload, message CRC. All integers are big-endian and both
//! checksums are CRC-32 (IEEE).

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{ChatError, Result};

/// Prelude (8) + prelude CRC (4).
const PRELUDE_LEN: usize = 12;

/// Prelude + prelude CRC + message CRC.
const MIN_MESSAGE_LEN: usize = 16;

/// Frames above this size are treated as corruption.
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

const HEADER_STRING: u8 = 7;

/// One decoded frame. Only string headers are kept; other header types are
/// skipped since nothing downstream reads them.
#[derive(Debug, Clone)]
pub struct Message {
    headers: HashMap<String, String>,
    payload: Bytes,
}

impl Message {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// `:event-type`, e.g. `output` or `citation`.
    pub fn event_type(&self) -> Option<&str> {
        self.header(":event-type")
    }

    /// `:message-type`, `event` or `exception`.
    pub fn message_type(&self) -> Option<&str> {
        self.header(":message-type")
    }

    pub fn exception_type(&self) -> Option<&str> {
        self.header(":exception-type")
    }

    pub fn is_exception(&self) -> bool {
        matches!(self.message_type(), Some("exception" | "error"))
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Incremental frame decoder fed with arbitrary byte chunks.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// True when no partial frame is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Pop the next complete frame, or `None` if more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total_len = read_u32(&self.buffer[0..4]) as usize;
        if !(MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&total_len) {
            return Err(ChatError::Stream(format!(
                "invalid message length: {total_len}"
            )));
        }

        if crc32fast::hash(&self.buffer[0..8]) != read_u32(&self.buffer[8..12]) {
            return Err(ChatError::Stream("prelude CRC mismatch".to_string()));
        }

        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let frame = self.buffer.split_to(total_len).freeze();
        parse_frame(frame).map(Some)
    }
}

fn parse_frame(mut frame: Bytes) -> Result<Message> {
    let total_len = frame.len();
    let expected_crc = read_u32(&frame[total_len - 4..]);
    if crc32fast::hash(&frame[..total_len - 4]) != expected_crc {
        return Err(ChatError::Stream("message CRC mismatch".to_string()));
    }

    frame.advance(4);
    let headers_len = frame.get_u32() as usize;
    frame.advance(4);

    let payload_len = total_len
        .checked_sub(MIN_MESSAGE_LEN + headers_len)
        .ok_or_else(|| ChatError::Stream(format!("headers length {headers_len} overflows frame")))?;

    let headers = parse_headers(frame.split_to(headers_len))?;
    let payload = frame.split_to(payload_len);

    Ok(Message { headers, payload })
}

fn parse_headers(mut data: Bytes) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();

    while data.has_remaining() {
        let name_len = usize::from(data.get_u8());
        let name = take(&mut data, name_len, "header name")?;
        let name = String::from_utf8_lossy(&name).into_owned();

        need(&data, 1, "header value type")?;
        let value_type = data.get_u8();

        let skip = match value_type {
            // bool true / bool false
            0 | 1 => 0,
            // byte, short, int, long
            2 => 1,
            3 => 2,
            4 => 4,
            5 => 8,
            // byte array / string
            6 | HEADER_STRING => {
                need(&data, 2, "header value length")?;
                let len = usize::from(data.get_u16());
                let raw = take(&mut data, len, "header value")?;
                if value_type == HEADER_STRING {
                    headers.insert(name, String::from_utf8_lossy(&raw).into_owned());
                }
                continue;
            }
            // timestamp
            8 => 8,
            // uuid
            9 => 16,
            other => {
                return Err(ChatError::Stream(format!(
                    "unknown header value type: {other}"
                )));
            }
        };
        take(&mut data, skip, "header value")?;
    }

    Ok(headers)
}

fn need(data: &Bytes, len: usize, what: &str) -> Result<()> {
    if data.remaining() < len {
        return Err(ChatError::Stream(format!("truncated {what}")));
    }
    Ok(())
}

fn take(data: &mut Bytes, len: usize, what: &str) -> Result<Bytes> {
    need(data, len, what)?;
    Ok(data.split_to(len))
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Encode a frame with string headers.
///
/// The endpoint is the only producer in production; this exists so fixtures
/// and scripted servers can speak the same framing.
pub fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut encoded_headers = Vec::new();
    for (name, value) in headers {
        encoded_headers.push(u8::try_from(name.len()).unwrap_or(u8::MAX));
        encoded_headers.extend_from_slice(name.as_bytes());
        encoded_headers.push(HEADER_STRING);
        encoded_headers.extend_from_slice(&u16::try_from(value.len()).unwrap_or(u16::MAX).to_be_bytes());
        encoded_headers.extend_from_slice(value.as_bytes());
    }

    let total_len = MIN_MESSAGE_LEN + encoded_headers.len() + payload.len();
    let mut frame = Vec::with_capacity(total_len);
    frame.extend_from_slice(&u32::try_from(total_len).unwrap_or(u32::MAX).to_be_bytes());
    frame.extend_from_slice(&u32::try_from(encoded_headers.len()).unwrap_or(u32::MAX).to_be_bytes());
    let prelude_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&prelude_crc.to_be_bytes());
    frame.extend_from_slice(&encoded_headers);
    frame.extend_from_slice(payload);
    let message_crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&message_crc.to_be_bytes());
    frame
}

/// Encode an `event` frame of the given type with a JSON payload.
pub fn encode_event(event_type: &str, payload: &serde_json::Value) -> Vec<u8> {
    encode_frame(
        &[
            (":message-type", "event"),
            (":event-type", event_type),
            (":content-type", "application/json"),
        ],
        payload.to_string().as_bytes(),
    )
}
