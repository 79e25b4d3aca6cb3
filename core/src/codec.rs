//! Wire codec for the register server protocol.
//!
//! # Request and response payloads
//!
//! A request is the command token, one space, then the JSON encoding of the
//! argument list:
//!
//! ```text
//! puts [1,"pump"]
//! getv ["sensors","t1"]
//! ```
//!
//! A response is the JSON encoding of the result, or empty. Empty and
//! undecodable responses decode to `None`; callers treat that as a falsy
//! result, never as an error.
//!
//! # Framing
//!
//! Every payload travels in a frame: a 4-byte big-endian length, then the
//! bytes. Writes are issued in chunks of at most `SOCKET_BUFFER_SIZE`, and
//! reads pull chunks of at most `SOCKET_BUFFER_SIZE` until the announced
//! length has arrived.
//!
//! A payload whose size is an exact multiple of the buffer is read like any
//! other; the reader never infers the end of a frame from a short read.

use std::io::{Read, Write};

use serde_json::Value;

use crate::error::{RegisterError, Result};


/// Opaque payload carried by commands, values and responses.
pub type Payload = Value;

/// Chunk size for socket reads and writes.
pub const SOCKET_BUFFER_SIZE: usize = 8192;

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;


/// Command tokens understood by the register server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    PutValue,
    GetValue,
    HasValue,
    PutStatus,
    GetStatus,
    PutCommand,
    HasCommand,
    GetCommand,
    ClearCommand,
    Alert,
    AcknowledgeAlert,
    GetAlerts,
    Stop,
    Stopped,
    UnacknowledgedAlerts,
    EndCycle,
    Exit,
}


impl Token {
    pub fn as_str(self) -> &'static str {
        match self {
            Token::PutValue => "putv",
            Token::GetValue => "getv",
            Token::HasValue => "hasv",
            Token::PutStatus => "puts",
            Token::GetStatus => "gets",
            Token::PutCommand => "putc",
            Token::HasCommand => "hasc",
            Token::GetCommand => "getc",
            Token::ClearCommand => "clearc",
            Token::Alert => "alrt",
            Token::AcknowledgeAlert => "alrtq",
            Token::GetAlerts => "alrtget",
            Token::Stop => "stop",
            Token::Stopped => "stopped",
            Token::UnacknowledgedAlerts => "ialrtq",
            Token::EndCycle => "endcycle",
            Token::Exit => "exit",
        }
    }

    pub fn parse(s: &str) -> Option<Token> {
        let token = match s {
            "putv" => Token::PutValue,
            "getv" => Token::GetValue,
            "hasv" => Token::HasValue,
            "puts" => Token::PutStatus,
            "gets" => Token::GetStatus,
            "putc" => Token::PutCommand,
            "hasc" => Token::HasCommand,
            "getc" => Token::GetCommand,
            "clearc" => Token::ClearCommand,
            "alrt" => Token::Alert,
            "alrtq" => Token::AcknowledgeAlert,
            "alrtget" => Token::GetAlerts,
            "stop" => Token::Stop,
            "stopped" => Token::Stopped,
            "ialrtq" => Token::UnacknowledgedAlerts,
            "endcycle" => Token::EndCycle,
            "exit" => Token::Exit,
            _ => return None,
        };
        Some(token)
    }
}


/// Encode a request payload: `"<token> " + json(args)`.
pub fn encode_request(token: Token, args: &[Payload]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(token.as_str().as_bytes());
    out.push(b' ');
    serde_json::to_writer(&mut out, args).map_err(|e| RegisterError::Codec(e.to_string()))?;
    Ok(out)
}


/// Split a request payload into its token string and arguments.
///
/// A bare token with no argument list decodes with empty arguments.
pub fn decode_request(bytes: &[u8]) -> Option<(String, Vec<Payload>)> {
    let text = std::str::from_utf8(bytes).ok()?;
    let (token, rest) = match text.split_once(' ') {
        Some((token, rest)) => (token, rest.trim()),
        None => (text.trim(), ""),
    };
    if token.is_empty() {
        return None;
    }
    let args = if rest.is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(rest).ok()?
    };
    Some((token.to_string(), args))
}


/// Encode a response payload. `None` becomes an empty response.
pub fn encode_response(value: Option<&Payload>) -> Vec<u8> {
    match value {
        Some(v) => serde_json::to_vec(v).unwrap_or_default(),
        None => Vec::new(),
    }
}


/// Decode a response payload. Empty or undecodable bytes yield `None`.
pub fn decode_response(bytes: &[u8]) -> Option<Payload> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("discarding undecodable response ({} bytes): {}", bytes.len(), e);
            None
        }
    }
}


/// JSON-style truthiness used to turn replies into booleans.
pub fn is_truthy(value: Option<&Payload>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty() && s != "0",
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}


/// Write one length-prefixed frame, in chunks of at most `SOCKET_BUFFER_SIZE`.
pub fn write_frame<W: Write>(stream: &mut W, payload: &[u8]) -> std::io::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("frame too large: {} bytes", payload.len()),
        ));
    }
    let len = payload.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    for chunk in payload.chunks(SOCKET_BUFFER_SIZE) {
        stream.write_all(chunk)?;
    }
    stream.flush()
}


/// Read one length-prefixed frame, pulling at most `SOCKET_BUFFER_SIZE` bytes
/// per read.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before a new
/// frame started.
pub fn read_frame<R: Read>(stream: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match stream.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", len),
        ));
    }

    let mut payload = vec![0u8; len];
    let mut received = 0;
    while received < len {
        let end = usize::min(received + SOCKET_BUFFER_SIZE, len);
        match stream.read(&mut payload[received..end]) {
            Ok(0) => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => received += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Some(payload))
}
