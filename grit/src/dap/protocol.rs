//! Debug Adapter Protocol wire types and framing
//!
//! Messages travel as `Content-Length: N\r\n\r\n{json}` in both
//! directions.

use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// An incoming request
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub seq: i64,
    pub command: String,
    #[serde(default)]
    pub arguments: Json,
}

/// An outgoing response to a request
#[derive(Debug, Serialize)]
pub struct Response {
    #[serde(rename = "type")]
    kind: &'static str,
    request_seq: i64,
    success: bool,
    command: String,
    message: String,
    #[serde(skip_serializing_if = "Json::is_null")]
    body: Json,
}

impl Request {
    pub fn response(&self, body: Json) -> Response {
        Response {
            kind: "response",
            request_seq: self.seq,
            success: true,
            command: self.command.clone(),
            message: "success".to_string(),
            body,
        }
    }

    pub fn error_response(&self, message: &str) -> Response {
        Response {
            kind: "response",
            request_seq: self.seq,
            success: false,
            command: self.command.clone(),
            message: message.to_string(),
            body: Json::Null,
        }
    }
}

/// An outgoing event
#[derive(Debug, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    kind: &'static str,
    event: String,
    #[serde(skip_serializing_if = "Json::is_null")]
    body: Json,
}

impl Event {
    pub fn new(event: &str) -> Event {
        Event {
            kind: "event",
            event: event.to_string(),
            body: Json::Null,
        }
    }

    pub fn with_body(event: &str, body: Json) -> Event {
        Event {
            kind: "event",
            event: event.to_string(),
            body,
        }
    }
}

/// The `stopped` event every step/pause notification uses
pub fn stop_event(reason: &str) -> Event {
    Event::with_body(
        "stopped",
        serde_json::json!({
            "reason": reason,
            "allThreadsStopped": true,
            "threadId": 0,
        }),
    )
}

/// Write one framed message.
pub fn write_message<W: Write>(writer: &mut W, payload: &impl Serialize) -> io::Result<()> {
    let body = serde_json::to_string(payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write!(writer, "Content-Length: {}\r\n\r\n{}", body.len(), body)?;
    writer.flush()
}

/// Read one framed request. `Ok(None)` means the peer closed the
/// connection cleanly.
pub fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<Request>> {
    let mut length: Option<usize> = None;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some(rest) = line.strip_prefix("Content-Length:") {
            length = rest.trim().parse().ok();
        }
    }

    let Some(length) = length else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing Content-Length header",
        ));
    };

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;
    let request = serde_json::from_slice(&body)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(request))
}
