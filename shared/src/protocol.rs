//! Text framing spoken over a crank socket.
//!
//! Router to connector, one text frame each:
//!
//! ```text
//! GET /path with spaces
//! Accept: text/plain
//! <any frame without a colon>
//! ```
//!
//! Connector to router: a status line, one frame per response header, a bare
//! `\r\n`, the body as binary frames, then a close frame.

use crate::error::{Error, Result};

/// Sent once the response has been fully relayed.
pub const CLOSE_NORMAL: u16 = 1000;
/// Sent when the router breaks the request framing.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Sent when the origin call or a tunnel write fails.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

pub const PROXY_COMPLETE: &str = "Proxy complete";

/// A close frame holds 125 payload bytes, two of which are the code.
pub const MAX_CLOSE_REASON_LEN: usize = 123;

/// Terminates the response header block.
pub const END_OF_HEADERS: &str = "\r\n";

/// First frame of an exchange: `<METHOD> <PATH>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
}

impl RequestLine {
    /// Only the first space splits, so the path may itself contain spaces.
    /// The method is not checked against any known verb set.
    pub fn parse(frame: &str) -> Result<Self> {
        match frame.split_once(' ') {
            Some((method, path)) => Ok(Self {
                method: method.to_string(),
                path: path.to_string(),
            }),
            None => Err(Error::MalformedRequestLine(frame.to_string())),
        }
    }
}

/// A frame received while the request header block is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderFrame {
    Header { name: String, value: String },
    /// Any frame whose first colon is missing or leading, including `""`.
    EndOfHeaders,
}

impl HeaderFrame {
    pub fn parse(frame: &str) -> Self {
        match frame.find(':') {
            Some(pos) if pos > 0 => HeaderFrame::Header {
                name: frame[..pos].to_string(),
                value: frame[pos + 1..].trim().to_string(),
            },
            _ => HeaderFrame::EndOfHeaders,
        }
    }
}

/// Encode a request the way a router sends it to a connector.
pub fn request_frames(method: &str, path: &str, headers: &[(String, String)]) -> Vec<String> {
    let mut frames = Vec::with_capacity(headers.len() + 2);
    frames.push(format!("{} {}", method, path));
    frames.extend(headers.iter().map(|(name, value)| format!("{}: {}", name, value)));
    frames.push(String::new());
    frames
}

pub fn status_line(code: u16, reason: &str) -> String {
    format!("HTTP/1.1 {} {}\r\n", code, reason)
}

pub fn header_line(name: &str, value: &str) -> String {
    format!("{}: {}\r\n", name, value)
}

/// Code and reason carried by the single close frame of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    pub code: u16,
    pub reason: String,
}

impl CloseStatus {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: truncate_reason(reason.into()),
        }
    }

    pub fn complete() -> Self {
        Self::new(CLOSE_NORMAL, PROXY_COMPLETE)
    }

    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_PROTOCOL_ERROR, reason)
    }

    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_INTERNAL_ERROR, reason)
    }

    pub fn is_normal(&self) -> bool {
        self.code == CLOSE_NORMAL
    }
}

impl From<&Error> for CloseStatus {
    fn from(err: &Error) -> Self {
        match err {
            e if e.is_protocol_violation() => CloseStatus::protocol_error(e.to_string()),
            Error::Origin(reason) => CloseStatus::internal_error(reason.as_str()),
            e => CloseStatus::internal_error(e.to_string()),
        }
    }
}

fn truncate_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON_LEN {
        let mut end = MAX_CLOSE_REASON_LEN;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}
